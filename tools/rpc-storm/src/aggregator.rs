//! Collects outcomes from every worker into one set of running statistics.
//!
//! All counters sit behind a single lock so a snapshot is always internally
//! consistent: `total_sent` equals the sum of the four result classes and of
//! the per-method counts. Verbose lines go through a bounded queue drained by
//! a separate task, so ingestion never waits on stdout.
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::SecondsFormat;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::protocols::{CallResult, Outcome, preview};

pub const DEFAULT_RESERVOIR_SIZE: usize = 10_000;
pub const DEFAULT_VERBOSE_QUEUE: usize = 4096;

/// Per-method breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCounts {
    pub sent: u64,
    pub succeeded: u64,
    pub protocol_errors: u64,
    pub transport_errors: u64,
    pub timeouts: u64,
}

impl MethodCounts {
    pub fn failed(&self) -> u64 {
        self.protocol_errors + self.transport_errors + self.timeouts
    }

    fn record(&mut self, result: &CallResult) {
        self.sent += 1;
        match result {
            CallResult::Success(_) => self.succeeded += 1,
            CallResult::ProtocolError { .. } => self.protocol_errors += 1,
            CallResult::TransportError(_) => self.transport_errors += 1,
            CallResult::Timeout => self.timeouts += 1,
        }
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub totals: MethodCounts,
    pub per_method: BTreeMap<&'static str, MethodCounts>,
    pub protocol_error_codes: BTreeMap<i64, u64>,
    /// uniform sample of observed latencies, at most `reservoir_size` long
    pub latency_sample: Vec<Duration>,
    pub latency_observed: u64,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    pub latency_sum: Duration,
    /// verbose lines dropped because the emitter could not keep up
    pub verbose_dropped: u64,
}

impl RunStats {
    pub fn total_sent(&self) -> u64 {
        self.totals.sent
    }

    pub fn total_succeeded(&self) -> u64 {
        self.totals.succeeded
    }

    pub fn total_protocol_errors(&self) -> u64 {
        self.totals.protocol_errors
    }

    pub fn total_transport_errors(&self) -> u64 {
        self.totals.transport_errors
    }

    pub fn total_timeouts(&self) -> u64 {
        self.totals.timeouts
    }

    pub fn mean_latency(&self) -> Option<Duration> {
        if self.latency_observed == 0 {
            return None;
        }
        let nanos = self.latency_sum.as_nanos() / u128::from(self.latency_observed);
        Some(Duration::from_nanos(nanos as u64))
    }

    /// `(p50, p95, p99)` over the reservoir.
    pub fn percentiles(&self) -> [Option<Duration>; 3] {
        let mut sorted = self.latency_sample.clone();
        sorted.sort_unstable();
        [0.50, 0.95, 0.99].map(|p| percentile(&sorted, p))
    }
}

fn percentile(values: &[Duration], p: f64) -> Option<Duration> {
    if values.is_empty() {
        return None;
    }
    let index = ((values.len() - 1) as f64 * p).round() as usize;
    values.get(index).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorOptions {
    pub reservoir_size: usize,
    /// `Some(capacity)` turns on per-request lines.
    pub verbose_queue: Option<usize>,
    pub seed: u64,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            reservoir_size: DEFAULT_RESERVOIR_SIZE,
            verbose_queue: None,
            seed: 1,
        }
    }
}

#[derive(Debug)]
struct AggregatorState {
    stats: RunStats,
    reservoir_size: usize,
    rng: StdRng,
}

impl AggregatorState {
    fn record(&mut self, outcome: &Outcome) {
        let stats = &mut self.stats;
        stats.totals.record(&outcome.result);
        stats
            .per_method
            .entry(outcome.method)
            .or_default()
            .record(&outcome.result);
        if let CallResult::ProtocolError { code, .. } = outcome.result {
            *stats.protocol_error_codes.entry(code).or_default() += 1;
        }

        let latency = outcome.latency;
        stats.latency_observed += 1;
        stats.latency_sum += latency;
        stats.min_latency = Some(stats.min_latency.map_or(latency, |min| min.min(latency)));
        stats.max_latency = Some(stats.max_latency.map_or(latency, |max| max.max(latency)));

        // Algorithm R
        if stats.latency_sample.len() < self.reservoir_size {
            stats.latency_sample.push(latency);
        } else if self.reservoir_size > 0 {
            let j = self.rng.gen_range(0..stats.latency_observed);
            if let Some(slot) = usize::try_from(j)
                .ok()
                .and_then(|j| stats.latency_sample.get_mut(j))
            {
                *slot = latency;
            }
        }
    }
}

/// Concurrent sink for [`Outcome`]s.
#[derive(Debug)]
pub struct Aggregator {
    state: Mutex<AggregatorState>,
    lines: Option<Arc<LineQueue>>,
    emitter: Mutex<Option<JoinHandle<()>>>,
}

impl Aggregator {
    /// Verbose lines, when enabled, go to stdout.
    pub fn new(options: AggregatorOptions) -> Self {
        Self::with_writer(options, tokio::io::stdout())
    }

    pub fn with_writer<W>(options: AggregatorOptions, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let lines = options.verbose_queue.map(|cap| Arc::new(LineQueue::new(cap)));
        let emitter = lines
            .as_ref()
            .map(|queue| tokio::spawn(emit_lines(queue.clone(), writer)));
        Self {
            state: Mutex::new(AggregatorState {
                stats: RunStats::default(),
                reservoir_size: options.reservoir_size,
                rng: StdRng::seed_from_u64(options.seed),
            }),
            lines,
            emitter: Mutex::new(emitter),
        }
    }

    pub fn ingest(&self, outcome: Outcome) {
        self.state.lock().record(&outcome);
        if let Some(queue) = &self.lines {
            queue.push(verbose_line(&outcome));
        }
    }

    pub fn snapshot(&self) -> RunStats {
        let mut stats = self.state.lock().stats.clone();
        stats.verbose_dropped = self.lines.as_ref().map_or(0, |q| q.dropped());
        stats
    }

    /// Flush pending verbose lines and return the final statistics.
    pub async fn finish(&self) -> RunStats {
        if let Some(queue) = &self.lines {
            queue.close();
        }
        let emitter = self.emitter.lock().take();
        if let Some(handle) = emitter {
            if let Err(err) = handle.await {
                warn!(?err, "verbose emitter task failed");
            }
        }
        self.snapshot()
    }
}

fn verbose_line(outcome: &Outcome) -> String {
    let ts = outcome
        .started_at
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let ms = outcome.latency.as_secs_f64() * 1000.0;
    let tail = match &outcome.result {
        CallResult::Success(payload) => preview(payload.to_string().as_bytes()),
        failed => failed.detail().unwrap_or_default(),
    };
    format!(
        "{ts} {} {} {ms:.3}ms {tail}",
        outcome.method,
        outcome.result.kind()
    )
}

/// Bounded line buffer that drops the oldest entry when full.
#[derive(Debug)]
pub struct LineQueue {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl LineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_VERBOSE_QUEUE))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, line: String) {
        {
            let mut lines = self.lines.lock();
            if lines.len() >= self.capacity {
                lines.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            lines.push_back(line);
        }
        self.notify.notify_one();
    }

    pub fn take_all(&self) -> Vec<String> {
        self.lines.lock().drain(..).collect()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_done(&self) -> bool {
        self.closed.load(Ordering::Acquire) && self.lines.lock().is_empty()
    }
}

async fn emit_lines<W>(queue: Arc<LineQueue>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let batch = queue.take_all();
        if !batch.is_empty() {
            let mut buf = String::new();
            for line in batch {
                buf.push_str(&line);
                buf.push('\n');
            }
            if let Err(err) = writer.write_all(buf.as_bytes()).await {
                warn!(?err, "failed to write verbose output, disabling it");
                return;
            }
            continue;
        }
        if queue.is_done() {
            break;
        }
        queue.notify.notified().await;
    }
    if let Err(err) = writer.flush().await {
        warn!(?err, "failed to flush verbose output");
    }
}
