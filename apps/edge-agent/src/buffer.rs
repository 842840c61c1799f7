use crate::delivery::Deliver;
use crate::outbox::OutboxEntry;
use anyhow::{Context, Result};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Append-only JSON-lines store of entries that could not be delivered yet.
///
/// Every access goes through `lock`, so a drain's read → deliver → rewrite
/// cycle never interleaves with an append. Drains replace the file through a
/// temp file + rename; appends never touch existing bytes.
pub struct DurableBuffer {
    path: PathBuf,
    lock: Mutex<()>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub delivered: usize,
    pub remaining: usize,
    pub malformed: usize,
}

impl DurableBuffer {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        // A leftover temp file means a crash mid-rewrite; the store itself was
        // never replaced, so the temp copy is discarded.
        let tmp = tmp_path(&path);
        if tmp.exists() {
            tracing::warn!(path=%tmp.display(), "removing stale buffer rewrite");
            fs::remove_file(&tmp).with_context(|| format!("remove {}", tmp.display()))?;
        }

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &OutboxEntry) -> Result<()> {
        let line = entry.encode_line()?;
        let _guard = self.lock.lock().await;
        append_line(&self.path, &line)
    }

    /// Entries currently stored, in append order. Malformed lines are skipped.
    #[cfg(test)]
    pub async fn entries(&self) -> Result<Vec<OutboxEntry>> {
        let _guard = self.lock.lock().await;
        let Some(contents) = read_store(&self.path)? else {
            return Ok(Vec::new());
        };
        Ok(store_lines(&contents)
            .filter_map(|raw| std::str::from_utf8(raw).ok())
            .filter_map(|line| OutboxEntry::decode_line(line).ok())
            .collect())
    }

    /// Replays every stored entry through `delivery` and rewrites the store
    /// to the entries that still failed, keeping their original lines and
    /// relative order.
    pub async fn drain_and_retry<D>(&self, delivery: &D) -> Result<DrainReport>
    where
        D: Deliver + Sync,
    {
        let _guard = self.lock.lock().await;
        let Some(contents) = read_store(&self.path)? else {
            return Ok(DrainReport::default());
        };

        let mut report = DrainReport::default();
        let mut pending = Vec::new();
        for (idx, raw) in store_lines(&contents).enumerate() {
            // Lines are carried over as text, so one that is not UTF-8 could
            // not be rewritten verbatim.
            let Ok(line) = std::str::from_utf8(raw) else {
                report.malformed += 1;
                tracing::warn!(line = idx + 1, "skipping non UTF-8 buffer line");
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            match OutboxEntry::decode_line(line) {
                Ok(entry) => pending.push((line, entry)),
                Err(err) => {
                    report.malformed += 1;
                    tracing::warn!(error=%err, line = idx + 1, "skipping malformed buffer line");
                }
            }
        }
        if pending.is_empty() && report.malformed == 0 {
            return Ok(report);
        }

        let mut still_failing = Vec::with_capacity(pending.len());
        for (line, entry) in &pending {
            report.attempted += 1;
            if delivery.deliver(entry).await {
                report.delivered += 1;
            } else {
                still_failing.push(*line);
            }
        }
        report.remaining = still_failing.len();

        replace_contents(&self.path, &still_failing)?;
        Ok(report)
    }
}

fn read_store(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

/// Splits the raw store into lines, dropping the `\r` of CRLF endings.
fn store_lines(contents: &[u8]) -> impl Iterator<Item = &[u8]> {
    contents
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;

    let mut buf = String::with_capacity(line.len() + 2);
    if has_torn_tail(&mut file)? {
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');

    file.write_all(buf.as_bytes())
        .with_context(|| format!("append to {}", path.display()))?;
    file.sync_data().ok();
    Ok(())
}

/// True when the last byte is not a newline, i.e. a previous append was cut short.
fn has_torn_tail(file: &mut fs::File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn replace_contents(path: &Path, lines: &[&str]) -> Result<()> {
    let tmp = tmp_path(path);
    let mut data = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        data.push_str(line);
        data.push('\n');
    }

    let mut file =
        fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
    file.write_all(data.as_bytes())
        .with_context(|| format!("write {}", tmp.display()))?;
    file.sync_all().ok();
    drop(file);

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = fs::File::open(parent) {
            dir.sync_all().ok();
        }
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
