use crate::alerts;
use crate::buffer::{DrainReport, DurableBuffer};
use crate::delivery::Deliver;
use crate::features;
use crate::outbox::OutboxEntry;
use crate::stats::AgentStats;
use crate::telemetry::{self, ParseError};
use anyhow::Result;
use bytes::Bytes;
use chrono::Utc;
use futures::future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Discarded(ParseError),
    Handled { delivered: usize, buffered: usize },
}

/// Single worker that turns bus messages into delivered (or buffered)
/// entries. Owns the delivery client and the buffer; nothing else touches
/// either while it runs.
pub struct IngestCoordinator<D> {
    delivery: D,
    buffer: DurableBuffer,
    stats: Arc<AgentStats>,
    drain_after_message: bool,
}

impl<D> IngestCoordinator<D>
where
    D: Deliver + Sync,
{
    pub fn new(
        delivery: D,
        buffer: DurableBuffer,
        stats: Arc<AgentStats>,
        drain_after_message: bool,
    ) -> Self {
        Self {
            delivery,
            buffer,
            stats,
            drain_after_message,
        }
    }

    /// Processes one message to completion: parse, derive, deliver or
    /// buffer each entry, then drain the backlog. Errors are durable-store
    /// failures only; every other failure is absorbed.
    pub async fn handle_message(&self, payload: &[u8]) -> Result<MessageOutcome> {
        AgentStats::bump(&self.stats.messages_received, 1);

        let record = match telemetry::parse_message(payload, Utc::now()) {
            Ok(record) => record,
            Err(reason) => {
                AgentStats::bump(&self.stats.messages_discarded, 1);
                tracing::debug!(%reason, "discarding inbound message");
                return Ok(MessageOutcome::Discarded(reason));
            }
        };

        let features = features::extract(&record);
        let alerts = alerts::evaluate(&record.vehicle_code, &record.ts, &features);

        let mut entries = Vec::with_capacity(1 + alerts.len());
        entries.push(OutboxEntry::Telemetry(record));
        entries.extend(alerts.into_iter().map(OutboxEntry::Alert));

        let (delivered, buffered) = self.deliver_or_buffer(&entries).await?;

        if self.drain_after_message {
            self.drain().await?;
        }

        Ok(MessageOutcome::Handled {
            delivered,
            buffered,
        })
    }

    async fn deliver_or_buffer(&self, entries: &[OutboxEntry]) -> Result<(usize, usize)> {
        let mut delivered = 0usize;
        let mut buffered = 0usize;
        let mut store_err = None;

        for entry in entries {
            if self.delivery.deliver(entry).await {
                delivered += 1;
                continue;
            }
            match self.buffer.append(entry).await {
                Ok(()) => {
                    buffered += 1;
                    tracing::warn!(
                        kind = entry.kind(),
                        vehicle = entry.vehicle_code(),
                        "delivery failed; entry buffered"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        error=%err,
                        kind = entry.kind(),
                        vehicle = entry.vehicle_code(),
                        "failed to buffer undelivered entry; entry lost"
                    );
                    self.stats.record_store_error(format!("{err:#}"));
                    store_err.get_or_insert(err);
                }
            }
        }

        AgentStats::bump(&self.stats.entries_delivered, delivered as u64);
        AgentStats::bump(&self.stats.entries_buffered, buffered as u64);
        AgentStats::bump(&self.stats.buffer_depth, buffered as u64);

        match store_err {
            Some(err) => Err(err),
            None => Ok((delivered, buffered)),
        }
    }

    pub async fn drain(&self) -> Result<DrainReport> {
        let report = match self.buffer.drain_and_retry(&self.delivery).await {
            Ok(report) => report,
            Err(err) => {
                self.stats.record_store_error(format!("{err:#}"));
                return Err(err);
            }
        };

        AgentStats::bump(&self.stats.drain_passes, 1);
        AgentStats::bump(&self.stats.entries_delivered, report.delivered as u64);
        self.stats
            .buffer_depth
            .store(report.remaining as u64, Ordering::Relaxed);
        self.stats.clear_store_error();

        if report.delivered > 0 {
            tracing::info!(
                delivered = report.delivered,
                remaining = report.remaining,
                "flushed buffered entries"
            );
        }
        Ok(report)
    }

    /// Consumes messages in arrival order until the sender side closes.
    /// With `drain_interval` set, a timer drain is interleaved between
    /// messages, never concurrently with one.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<InboundMessage>,
        drain_interval: Option<Duration>,
    ) -> Result<()> {
        let mut ticker = drain_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(message) = maybe else { break; };
                    if let Err(err) = self.handle_message(&message.payload).await {
                        tracing::error!(error=%err, topic=%message.topic, "buffer store failure while handling message");
                    }
                }
                _ = next_tick(&mut ticker) => {
                    if let Err(err) = self.drain().await {
                        tracing::error!(error=%err, "scheduled buffer drain failed");
                    }
                }
            }
        }

        tracing::info!("inbound channel closed; coordinator stopping");
        Ok(())
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending::<()>().await,
    }
}
