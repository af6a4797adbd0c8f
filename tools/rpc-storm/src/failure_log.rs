//! Optional JSON-lines log of failed requests.
//!
//! Workers hand records to a bounded channel with `try_send`; a single task owns
//! the file. When the channel is full the record is counted and dropped, the
//! worker never waits on disk.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocols::Outcome;

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub method: &'static str,
    pub kind: &'static str,
    pub latency_ms: f64,
    pub params: Vec<Value>,
    pub error: String,
}

impl FailureRecord {
    /// `None` for successful outcomes.
    pub fn from_outcome(outcome: &Outcome, params: &[Value]) -> Option<Self> {
        let error = outcome.result.detail()?;
        Some(Self {
            timestamp: outcome.started_at,
            method: outcome.method,
            kind: outcome.result.kind().as_str(),
            latency_ms: outcome.latency.as_secs_f64() * 1000.0,
            params: params.to_vec(),
            error,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureLogSummary {
    pub written: u64,
    pub dropped: u64,
}

/// Cloneable handle used by workers.
#[derive(Debug, Clone)]
pub struct FailureSink {
    tx: mpsc::Sender<FailureRecord>,
    dropped: Arc<AtomicU64>,
}

impl FailureSink {
    pub fn record(&self, outcome: &Outcome, params: &[Value]) {
        let Some(record) = FailureRecord::from_outcome(outcome, params) else {
            return;
        };
        if self.tx.try_send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    sink: FailureSink,
    writer: JoinHandle<u64>,
}

impl FailureLog {
    /// Creates (truncates) `path` up front so an unwritable location fails the
    /// run before any traffic.
    pub async fn create(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await.map_err(|err| {
            Error::config(format!(
                "cannot create failure log `{}`: {err}",
                path.display()
            ))
        })?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = tokio::spawn(write_records(rx, BufWriter::new(file)));
        Ok(Self {
            path,
            sink: FailureSink {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            writer,
        })
    }

    pub fn sink(&self) -> FailureSink {
        self.sink.clone()
    }

    /// Waits for every outstanding sink to be dropped and the file flushed.
    pub async fn finish(self) -> FailureLogSummary {
        let Self { path, sink, writer } = self;
        let dropped = sink.dropped.clone();
        drop(sink);
        let written = match writer.await {
            Ok(written) => written,
            Err(err) => {
                warn!(?err, path = %path.display(), "failure log writer task failed");
                0
            }
        };
        FailureLogSummary {
            written,
            dropped: dropped.load(Ordering::Relaxed),
        }
    }
}

async fn write_records(mut rx: mpsc::Receiver<FailureRecord>, mut out: BufWriter<File>) -> u64 {
    let mut written = 0;
    while let Some(record) = rx.recv().await {
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(err) => {
                warn!(?err, method = record.method, "failed to serialize failure record");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(err) = out.write_all(&line).await {
            warn!(?err, "failed to write failure log, closing it");
            return written;
        }
        written += 1;
    }
    if let Err(err) = out.flush().await {
        warn!(?err, "failed to flush failure log");
    }
    debug!(written, "failure log closed");
    written
}
