use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregator::{MethodCounts, RunStats};
use crate::catalog::Protocol;
use crate::config::{RunConfig, Selection};
use crate::engine::DispatchSummary;
use crate::failure_log::FailureLogSummary;

/// Subset of [`RunConfig`] echoed back in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub url: String,
    pub protocol: Protocol,
    pub methods: Vec<String>,
    pub requests_per_second: u64,
    pub duration_secs: u64,
    pub workers: usize,
    pub timeout_ms: u64,
    pub selection: Selection,
    pub seed: u64,
    pub dry_run: bool,
}

impl From<&RunConfig> for RunConfigSnapshot {
    fn from(config: &RunConfig) -> Self {
        Self {
            url: config.url.clone(),
            protocol: config.protocol,
            methods: config.methods.clone(),
            requests_per_second: config.requests_per_second,
            duration_secs: config.duration_secs,
            workers: config.workers,
            timeout_ms: config.timeout_ms,
            selection: config.selection,
            seed: config.seed,
            dry_run: config.dry_run,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub planned: u64,
    pub sent: u64,
    pub succeeded: u64,
    pub protocol_errors: u64,
    pub transport_errors: u64,
    pub timeouts: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub min_ms: Option<f64>,
    pub mean_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

impl From<&RunStats> for LatencySummary {
    fn from(stats: &RunStats) -> Self {
        let [p50, p95, p99] = stats.percentiles();
        Self {
            samples: stats.latency_sample.len(),
            min_ms: stats.min_latency.map(as_ms),
            mean_ms: stats.mean_latency().map(as_ms),
            p50_ms: p50.map(as_ms),
            p95_ms: p95.map(as_ms),
            p99_ms: p99.map(as_ms),
            max_ms: stats.max_latency.map(as_ms),
        }
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub elapsed_ms: u128,
    pub achieved_rps: f64,
    pub error_rate: f64,
    pub slots_skipped: u64,
    pub verbose_lines_dropped: u64,
    pub interrupted: bool,
}

/// One encoded request per method, produced by `--dry-run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRequest {
    pub method: String,
    pub family: String,
    pub request: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub config: RunConfigSnapshot,
    pub dry_run: bool,
    pub totals: Totals,
    pub latency: LatencySummary,
    pub stats: RuntimeStats,
    pub per_method: BTreeMap<String, MethodCounts>,
    pub protocol_error_codes: BTreeMap<i64, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_log: Option<FailureLogSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub samples: Vec<SampleRequest>,
}

impl RunReport {
    pub fn from_run(
        config: &RunConfig,
        stats: &RunStats,
        dispatch: &DispatchSummary,
        failure_log: Option<FailureLogSummary>,
    ) -> Self {
        let secs = dispatch.elapsed.as_secs_f64().max(1e-9);
        let sent = stats.total_sent();
        let failed = stats.totals.failed();
        Self {
            config: RunConfigSnapshot::from(config),
            dry_run: false,
            totals: Totals {
                planned: dispatch.capacity,
                sent,
                succeeded: stats.total_succeeded(),
                protocol_errors: stats.total_protocol_errors(),
                transport_errors: stats.total_transport_errors(),
                timeouts: stats.total_timeouts(),
            },
            latency: LatencySummary::from(stats),
            stats: RuntimeStats {
                elapsed_ms: dispatch.elapsed.as_millis(),
                achieved_rps: sent as f64 / secs,
                error_rate: if sent == 0 {
                    0.0
                } else {
                    failed as f64 / sent as f64
                },
                slots_skipped: dispatch.slots_skipped,
                verbose_lines_dropped: stats.verbose_dropped,
                interrupted: dispatch.interrupted,
            },
            per_method: stats
                .per_method
                .iter()
                .map(|(name, counts)| ((*name).to_string(), *counts))
                .collect(),
            protocol_error_codes: stats.protocol_error_codes.clone(),
            failure_log,
            samples: Vec::new(),
        }
    }

    pub fn dry_run(config: &RunConfig, samples: Vec<SampleRequest>) -> Self {
        Self {
            config: RunConfigSnapshot::from(config),
            dry_run: true,
            totals: Totals {
                planned: config.planned_requests(),
                ..Totals::default()
            },
            latency: LatencySummary::default(),
            stats: RuntimeStats::default(),
            per_method: BTreeMap::new(),
            protocol_error_codes: BTreeMap::new(),
            failure_log: None,
            samples,
        }
    }

    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "RPC storm report");
        let _ = writeln!(
            output,
            "target: {} {} ({} rps for {}s, {} workers, {:?} selection)",
            self.config.protocol,
            self.config.url,
            self.config.requests_per_second,
            self.config.duration_secs,
            self.config.workers,
            self.config.selection,
        );

        if self.dry_run {
            let _ = writeln!(
                output,
                "dry run: {} methods, up to {} requests planned, nothing sent",
                self.samples.len(),
                self.totals.planned
            );
            for sample in &self.samples {
                let _ = writeln!(output, "  [{}] {}", sample.family, sample.request);
            }
            return output;
        }

        if self.stats.interrupted {
            let _ = writeln!(output, "status: INTERRUPTED");
        }
        let _ = writeln!(
            output,
            "requests: planned={} sent={} succeeded={} protocol_errors={} transport_errors={} timeouts={}",
            self.totals.planned,
            self.totals.sent,
            self.totals.succeeded,
            self.totals.protocol_errors,
            self.totals.transport_errors,
            self.totals.timeouts,
        );
        let _ = writeln!(
            output,
            "timing: elapsed={}ms achieved={:.2}/s error_rate={:.2}% skipped_slots={}",
            self.stats.elapsed_ms,
            self.stats.achieved_rps,
            self.stats.error_rate * 100.0,
            self.stats.slots_skipped,
        );
        let _ = writeln!(
            output,
            "latency: min={} mean={} p50={} p95={} p99={} max={} (sampled {})",
            fmt_ms(self.latency.min_ms),
            fmt_ms(self.latency.mean_ms),
            fmt_ms(self.latency.p50_ms),
            fmt_ms(self.latency.p95_ms),
            fmt_ms(self.latency.p99_ms),
            fmt_ms(self.latency.max_ms),
            self.latency.samples,
        );

        if !self.protocol_error_codes.is_empty() {
            let codes = self
                .protocol_error_codes
                .iter()
                .map(|(code, count)| format!("{code}x{count}"))
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(output, "protocol error codes: {codes}");
        }

        for (method, counts) in &self.per_method {
            let _ = writeln!(
                output,
                "  {method}: sent={} ok={} protocol={} transport={} timeout={}",
                counts.sent,
                counts.succeeded,
                counts.protocol_errors,
                counts.transport_errors,
                counts.timeouts,
            );
        }

        if self.stats.verbose_lines_dropped > 0 {
            let _ = writeln!(
                output,
                "verbose output fell behind, {} lines dropped",
                self.stats.verbose_lines_dropped
            );
        }
        if let Some(log) = &self.failure_log {
            let _ = writeln!(
                output,
                "failure log: written={} dropped={}",
                log.written, log.dropped
            );
        }
        output
    }
}

fn fmt_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |ms| format!("{ms:.2}ms"))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use serde_json::json;

    use super::*;
    use crate::config::Cli;

    fn config() -> RunConfig {
        let cli = Cli::try_parse_from(["storm", "eth", "http://node:8545", "-r", "10", "-d", "2"])
            .expect("cli");
        RunConfig::try_from(cli).expect("config")
    }

    fn stats() -> RunStats {
        let mut stats = RunStats::default();
        let counts = MethodCounts {
            sent: 4,
            succeeded: 2,
            protocol_errors: 1,
            transport_errors: 0,
            timeouts: 1,
        };
        stats.totals = counts;
        stats.per_method.insert("eth_call", counts);
        stats.protocol_error_codes.insert(-32000, 1);
        stats.latency_sample = vec![Duration::from_millis(10); 4];
        stats.latency_observed = 4;
        stats.latency_sum = Duration::from_millis(40);
        stats.min_latency = Some(Duration::from_millis(10));
        stats.max_latency = Some(Duration::from_millis(10));
        stats
    }

    #[test]
    fn summary_mentions_every_class() {
        let dispatch = DispatchSummary {
            elapsed: Duration::from_secs(2),
            capacity: 20,
            ..DispatchSummary::default()
        };
        let report = RunReport::from_run(&config(), &stats(), &dispatch, None);
        assert_eq!(report.totals.planned, 20);
        assert_eq!(report.stats.error_rate, 0.5);
        assert_eq!(report.stats.achieved_rps, 2.0);
        assert_eq!(report.latency.mean_ms, Some(10.0));

        let text = report.human_summary();
        assert!(text.contains("sent=4 succeeded=2 protocol_errors=1 transport_errors=0 timeouts=1"));
        assert!(text.contains("-32000x1"));
        assert!(text.contains("eth_call: sent=4"));
        assert!(!text.contains("INTERRUPTED"));
    }

    #[test]
    fn json_keys_error_codes_as_strings() {
        let report = RunReport::from_run(&config(), &stats(), &DispatchSummary::default(), None);
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["protocol_error_codes"], json!({"-32000": 1}));
        assert!(value.get("samples").is_none());
    }

    #[test]
    fn dry_run_lists_samples() {
        let report = RunReport::dry_run(
            &config(),
            vec![SampleRequest {
                method: "eth_chainId".into(),
                family: "eth".into(),
                request: json!({"jsonrpc":"2.0","method":"eth_chainId","params":[],"id":1}),
            }],
        );
        assert_eq!(report.totals.planned, 20);
        let text = report.human_summary();
        assert!(text.contains("dry run: 1 methods"));
        assert!(text.contains("eth_chainId"));
    }
}
