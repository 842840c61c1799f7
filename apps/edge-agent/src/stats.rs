use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct AgentStats {
    pub messages_received: AtomicU64,
    pub messages_discarded: AtomicU64,
    pub entries_delivered: AtomicU64,
    pub entries_buffered: AtomicU64,
    pub buffer_depth: AtomicU64,
    pub drain_passes: AtomicU64,
    pub mqtt_connected: AtomicBool,
    pub last_store_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub messages_discarded: u64,
    pub entries_delivered: u64,
    pub entries_buffered: u64,
    pub buffer_depth: u64,
    pub drain_passes: u64,
    pub mqtt_connected: bool,
    pub last_store_error: Option<String>,
}

impl AgentStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn record_store_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_store_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_store_error(&self) {
        if let Ok(mut guard) = self.last_store_error.lock() {
            *guard = None;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            entries_delivered: self.entries_delivered.load(Ordering::Relaxed),
            entries_buffered: self.entries_buffered.load(Ordering::Relaxed),
            buffer_depth: self.buffer_depth.load(Ordering::Relaxed),
            drain_passes: self.drain_passes.load(Ordering::Relaxed),
            mqtt_connected: self.mqtt_connected.load(Ordering::Relaxed),
            last_store_error: self
                .last_store_error
                .lock()
                .ok()
                .and_then(|guard| guard.clone()),
        }
    }
}
