//! Frame age accounting
//!
//! Every decoded frame produces a [`DelaySample`]: receipt time minus the
//! sender's timestamp. Samples are kept in a bounded history and, when a log
//! path is configured, appended to a CSV file by a background task:
//!
//! ```text
//! Timestamp,DelayMilliseconds
//! 20250314_101502_250,12.00
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::config::LinkConfig;
use crate::types::ticks;

/// CSV header of the delay log.
pub const DELAY_LOG_HEADER: &str = "Timestamp,DelayMilliseconds";

/// Age of one frame at the moment it was decoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelaySample {
    pub recorded_at: DateTime<Utc>,
    pub delay_ms: f64,
}

impl DelaySample {
    /// One delay log line, without the trailing newline.
    pub fn to_csv_line(&self) -> String {
        format!("{},{:.2}", self.recorded_at.format("%Y%m%d_%H%M%S_%3f"), self.delay_ms)
    }
}

/// Aggregate over the samples still held in memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelaySummary {
    pub count: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub last_ms: f64,
}

enum LogCommand {
    Append(DelaySample),
    Sync(oneshot::Sender<()>),
}

struct Inner {
    history: Mutex<VecDeque<DelaySample>>,
    capacity: usize,
    log: Option<mpsc::UnboundedSender<LogCommand>>,
}

/// Records frame delays. Clones share the same history and log.
#[derive(Clone)]
pub struct LatencyTracker {
    inner: Arc<Inner>,
}

impl LatencyTracker {
    /// Tracker keeping the last `capacity` samples in memory only.
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Tracker that also appends every sample to the CSV file at `path`.
    ///
    /// Must be called inside a tokio runtime; the file is written by a
    /// background task so recording never waits on disk.
    pub fn with_log(capacity: usize, path: impl Into<PathBuf>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(log_writer(path.into(), rx));
        Self::build(capacity, Some(tx))
    }

    /// Tracker sized and logged as `config` says.
    pub fn from_config(config: &LinkConfig) -> Self {
        match &config.delay_log {
            Some(path) => Self::with_log(config.latency_history, path),
            None => Self::new(config.latency_history),
        }
    }

    fn build(capacity: usize, log: Option<mpsc::UnboundedSender<LogCommand>>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                history: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
                capacity,
                log,
            }),
        }
    }

    /// Record a frame stamped `sender_ticks` that arrived just now.
    pub fn record(&self, sender_ticks: i64) -> DelaySample {
        self.record_at(sender_ticks, Utc::now())
    }

    /// Record a frame stamped `sender_ticks` that arrived at `receipt`.
    pub fn record_at(&self, sender_ticks: i64, receipt: DateTime<Utc>) -> DelaySample {
        let sample = DelaySample {
            recorded_at: receipt,
            delay_ms: ticks::delay_ms(sender_ticks, ticks::ticks_from_datetime(receipt)),
        };
        trace!("Frame delay {:.2} ms", sample.delay_ms);

        {
            let mut history = self.inner.history.lock();
            if history.len() == self.inner.capacity {
                history.pop_front();
            }
            history.push_back(sample);
        }

        if let Some(log) = &self.inner.log {
            if log.send(LogCommand::Append(sample)).is_err() {
                debug!("Delay log writer has stopped");
            }
        }
        sample
    }

    /// Samples in recording order, oldest first.
    pub fn samples(&self) -> Vec<DelaySample> {
        self.inner.history.lock().iter().copied().collect()
    }

    pub fn latest(&self) -> Option<DelaySample> {
        self.inner.history.lock().back().copied()
    }

    pub fn summary(&self) -> Option<DelaySummary> {
        let history = self.inner.history.lock();
        let last = history.back()?;

        let mut min_ms = f64::INFINITY;
        let mut max_ms = f64::NEG_INFINITY;
        let mut total = 0.0;
        for sample in history.iter() {
            min_ms = min_ms.min(sample.delay_ms);
            max_ms = max_ms.max(sample.delay_ms);
            total += sample.delay_ms;
        }
        Some(DelaySummary {
            count: history.len(),
            mean_ms: total / history.len() as f64,
            min_ms,
            max_ms,
            last_ms: last.delay_ms,
        })
    }

    /// Wait until every sample recorded so far has reached the log file.
    ///
    /// Returns at once when no log is configured.
    pub async fn sync_log(&self) {
        let Some(log) = &self.inner.log else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if log.send(LogCommand::Sync(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl std::fmt::Debug for LatencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyTracker")
            .field("capacity", &self.inner.capacity)
            .field("logging", &self.inner.log.is_some())
            .finish()
    }
}

async fn open_log(path: &Path) -> std::io::Result<tokio::fs::File> {
    let mut file =
        tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    if file.metadata().await?.len() == 0 {
        file.write_all(format!("{}\n", DELAY_LOG_HEADER).as_bytes()).await?;
        file.flush().await?;
    }
    Ok(file)
}

async fn log_writer(path: PathBuf, mut commands: mpsc::UnboundedReceiver<LogCommand>) {
    let mut file = match open_log(&path).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!("Cannot open delay log {}: {}", path.display(), e);
            None
        }
    };

    while let Some(command) = commands.recv().await {
        match command {
            LogCommand::Append(sample) => {
                let Some(out) = file.as_mut() else { continue };
                let line = format!("{}\n", sample.to_csv_line());
                if let Err(e) = out.write_all(line.as_bytes()).await {
                    warn!("Failed to append to delay log {}: {}", path.display(), e);
                }
            }
            LogCommand::Sync(done) => {
                if let Some(out) = file.as_mut() {
                    if let Err(e) = out.flush().await {
                        warn!("Failed to flush delay log {}: {}", path.display(), e);
                    }
                }
                let _ = done.send(());
            }
        }
    }

    if let Some(mut out) = file {
        let _ = out.flush().await;
    }
    debug!("Delay log writer for {} stopped", path.display());
}
