use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::aggregator::{DEFAULT_RESERVOIR_SIZE, DEFAULT_VERBOSE_QUEUE};
use crate::catalog::Protocol;
use crate::discover::DEFAULT_DISCOVER_ATTEMPTS;
use crate::error::{Error, Result};
use crate::fuzzer::{
    DEFAULT_MAX_BLOCK_NUMBER, DEFAULT_MAX_BYTES, DEFAULT_MAX_QUANTITY, DEFAULT_MIN_BYTES,
    FuzzBounds,
};
use crate::governor::{DEFAULT_MAX_LAG, MAX_WINDOW};
use crate::trace::{DEFAULT_LOG_LEVEL, LogFormat};

pub const DEFAULT_REQUESTS_PER_SECOND: u64 = 100;
pub const DEFAULT_DURATION_SECS: u64 = 60;
pub const DEFAULT_WORKERS: usize = 64;
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_FAILURE_LOG_QUEUE: usize = 1024;
pub const MAX_REQUESTS_PER_SECOND: u64 = 1_000_000;
pub const MAX_DURATION_SECS: u64 = MAX_WINDOW.as_secs();

/// How each worker picks the next method.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Selection {
    #[default]
    Random,
    RoundRobin,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "storm",
    version,
    about = "Rate-controlled flood and fuzz tester for Ethereum JSON-RPC and CometBFT ABCI++ nodes"
)]
pub struct Cli {
    #[command(subcommand)]
    pub target: Target,

    /// tracing filter directive
    #[arg(long, global = true, env = "STORM_LOG", default_value = DEFAULT_LOG_LEVEL)]
    pub log: String,
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Standard)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Target {
    /// Flood an Ethereum JSON-RPC endpoint
    Eth(RunArgs),
    /// Flood a CometBFT endpoint with ABCI++ messages and RPC routes
    Abci(RunArgs),
    /// Find the abci_query paths a CometBFT node answers
    Discover(DiscoverArgs),
}

impl Target {
    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::Eth(_) => Protocol::Ethereum,
            Self::Abci(_) | Self::Discover(_) => Protocol::Abci,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct DiscoverArgs {
    /// CometBFT RPC endpoint, e.g. http://127.0.0.1:26657
    pub url: String,
    /// number of queries to send
    #[arg(short = 'n', long, default_value_t = DEFAULT_DISCOVER_ATTEMPTS)]
    pub attempts: u64,
    /// account tried first in every `{address}` path
    #[arg(long)]
    pub actor_address: Option<String>,
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// node endpoint, e.g. http://127.0.0.1:8545
    pub url: String,

    #[arg(short = 'r', long, default_value_t = DEFAULT_REQUESTS_PER_SECOND)]
    pub requests_per_second: u64,
    /// run length in seconds
    #[arg(short = 'd', long, default_value_t = DEFAULT_DURATION_SECS)]
    pub duration: u64,
    /// restrict the run to these methods (default: every method of the protocol)
    #[arg(short = 'm', long, num_args = 1.., value_delimiter = ',')]
    pub methods: Vec<String>,
    /// print one line per request
    #[arg(short = 'v', long)]
    pub verbose: bool,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,
    #[arg(long, value_enum, default_value_t = Selection::Random)]
    pub selection: Selection,
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
    /// how far the pool may fall behind schedule before slots are skipped
    #[arg(long, default_value_t = DEFAULT_MAX_LAG.as_millis() as u64)]
    pub max_lag_ms: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_QUANTITY)]
    pub max_quantity: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_BLOCK_NUMBER)]
    pub max_block_number: u64,
    #[arg(long, default_value_t = DEFAULT_MIN_BYTES)]
    pub min_bytes: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_BYTES)]
    pub max_bytes: usize,

    #[arg(long, default_value_t = DEFAULT_RESERVOIR_SIZE)]
    pub reservoir_size: usize,
    #[arg(long, default_value_t = DEFAULT_VERBOSE_QUEUE)]
    pub verbose_queue: usize,

    #[arg(long)]
    pub json: bool,
    /// resolve methods and print a sample request for each, send nothing
    #[arg(long)]
    pub dry_run: bool,
    /// do not check the endpoint before the run
    #[arg(long)]
    pub skip_probe: bool,
    /// call every selected method once and drop the ones the node does not serve
    #[arg(long)]
    pub skip_unavailable: bool,
    /// write failed requests to this file as JSON lines
    #[arg(long)]
    pub failure_log: Option<PathBuf>,
}

/// Validated, immutable settings for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub url: String,
    pub protocol: Protocol,
    /// empty means every method of `protocol`
    pub methods: Vec<String>,
    pub requests_per_second: u64,
    pub duration_secs: u64,
    pub verbose: bool,
    pub workers: usize,
    pub timeout_ms: u64,
    pub selection: Selection,
    pub seed: u64,
    pub max_lag_ms: u64,
    pub fuzz: FuzzBounds,
    pub reservoir_size: usize,
    pub verbose_queue: usize,
    pub failure_log_queue: usize,
    pub json: bool,
    pub dry_run: bool,
    pub probe: bool,
    pub skip_unavailable: bool,
    pub failure_log: Option<PathBuf>,
    pub log: String,
    pub log_format: LogFormat,
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn max_lag(&self) -> Duration {
        Duration::from_millis(self.max_lag_ms)
    }

    /// Upper bound on requests for the run.
    pub fn planned_requests(&self) -> u64 {
        self.requests_per_second.saturating_mul(self.duration_secs)
    }
}

impl TryFrom<Cli> for RunConfig {
    type Error = Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let protocol = cli.target.protocol();
        let args = match cli.target {
            Target::Eth(args) | Target::Abci(args) => args,
            Target::Discover(_) => {
                return Err(Error::config("`discover` does not take flood settings"));
            }
        };

        if args.requests_per_second == 0 {
            return Err(Error::config("--requests-per-second must be greater than 0"));
        }
        if args.requests_per_second > MAX_REQUESTS_PER_SECOND {
            return Err(Error::config(format!(
                "--requests-per-second must not exceed {MAX_REQUESTS_PER_SECOND}"
            )));
        }
        if args.duration == 0 {
            return Err(Error::config("--duration must be greater than 0"));
        }
        if args.duration > MAX_DURATION_SECS {
            return Err(Error::config(format!(
                "--duration must not exceed {MAX_DURATION_SECS} seconds"
            )));
        }
        if args.workers == 0 {
            return Err(Error::config("--workers must be greater than 0"));
        }
        if args.timeout_ms == 0 {
            return Err(Error::config("--timeout-ms must be greater than 0"));
        }
        if args.max_bytes == 0 {
            return Err(Error::config("--max-bytes must be greater than 0"));
        }
        if args.min_bytes > args.max_bytes {
            return Err(Error::config(format!(
                "--min-bytes ({}) must not exceed --max-bytes ({})",
                args.min_bytes, args.max_bytes
            )));
        }
        if args.reservoir_size == 0 {
            return Err(Error::config("--reservoir-size must be greater than 0"));
        }
        if args.verbose_queue == 0 {
            return Err(Error::config("--verbose-queue must be greater than 0"));
        }
        let url = validate_url(&args.url)?;

        let mut methods: Vec<String> = Vec::with_capacity(args.methods.len());
        for name in args.methods.iter().map(|m| m.trim()) {
            if name.is_empty() {
                return Err(Error::config("--methods entries must not be empty"));
            }
            if !methods.iter().any(|m| m == name) {
                methods.push(name.to_string());
            }
        }

        Ok(Self {
            url,
            protocol,
            methods,
            requests_per_second: args.requests_per_second,
            duration_secs: args.duration,
            verbose: args.verbose,
            workers: args.workers,
            timeout_ms: args.timeout_ms,
            selection: args.selection,
            seed: args.seed,
            max_lag_ms: args.max_lag_ms,
            fuzz: FuzzBounds {
                max_quantity: args.max_quantity,
                max_block_number: args.max_block_number,
                min_bytes: args.min_bytes,
                max_bytes: args.max_bytes,
                ..FuzzBounds::default()
            },
            reservoir_size: args.reservoir_size,
            verbose_queue: args.verbose_queue,
            failure_log_queue: DEFAULT_FAILURE_LOG_QUEUE,
            json: args.json,
            dry_run: args.dry_run,
            probe: !args.skip_probe,
            skip_unavailable: args.skip_unavailable,
            failure_log: args.failure_log,
            log: cli.log,
            log_format: cli.log_format,
        })
    }
}

/// Validated settings for `abci_query` path discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverConfig {
    pub url: String,
    pub attempts: u64,
    pub actor_address: Option<String>,
    pub timeout_ms: u64,
    pub seed: u64,
    pub json: bool,
    pub log: String,
    pub log_format: LogFormat,
}

impl DiscoverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TryFrom<Cli> for DiscoverConfig {
    type Error = Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let Target::Discover(args) = cli.target else {
            return Err(Error::config("expected the `discover` subcommand"));
        };
        if args.attempts == 0 {
            return Err(Error::config("--attempts must be greater than 0"));
        }
        if args.timeout_ms == 0 {
            return Err(Error::config("--timeout-ms must be greater than 0"));
        }
        let actor_address = match args.actor_address.as_deref().map(str::trim) {
            Some("") => return Err(Error::config("--actor-address must not be empty")),
            Some(address) => Some(address.to_string()),
            None => None,
        };
        Ok(Self {
            url: validate_url(&args.url)?,
            attempts: args.attempts,
            actor_address,
            timeout_ms: args.timeout_ms,
            seed: args.seed,
            json: args.json,
            log: cli.log,
            log_format: cli.log_format,
        })
    }
}

/// What the binary was asked to do.
#[derive(Debug, Clone)]
pub enum Mode {
    Storm(RunConfig),
    Discover(DiscoverConfig),
}

impl Mode {
    /// Log filter and format, shared by both modes.
    pub fn logging(&self) -> (&str, LogFormat) {
        match self {
            Self::Storm(config) => (config.log.as_str(), config.log_format),
            Self::Discover(config) => (config.log.as_str(), config.log_format),
        }
    }
}

impl TryFrom<Cli> for Mode {
    type Error = Error;

    fn try_from(cli: Cli) -> Result<Self> {
        match cli.target {
            Target::Discover(_) => DiscoverConfig::try_from(cli).map(Self::Discover),
            Target::Eth(_) | Target::Abci(_) => RunConfig::try_from(cli).map(Self::Storm),
        }
    }
}

fn validate_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw).map_err(|err| Error::config(format!("invalid url `{raw}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        other => Err(Error::config(format!(
            "unsupported url scheme `{other}`, expected http or https"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Mode, RunConfig, Selection};
    use crate::catalog::Protocol;
use crate::discover::DEFAULT_DISCOVER_ATTEMPTS;
    use crate::error::Error;

    fn parse(args: &[&str]) -> Result<RunConfig, Error> {
        let cli = Cli::try_parse_from(args).expect("cli should parse");
        RunConfig::try_from(cli)
    }

    #[test]
    fn parse_eth_defaults() {
        let cfg = parse(&["storm", "eth", "http://127.0.0.1:8545"]).expect("config should build");

        assert_eq!(cfg.protocol, Protocol::Ethereum);
        assert_eq!(cfg.requests_per_second, 100);
        assert_eq!(cfg.duration_secs, 60);
        assert!(cfg.methods.is_empty());
        assert!(!cfg.verbose);
        assert_eq!(cfg.workers, 64);
        assert_eq!(cfg.selection, Selection::Random);
        assert!(cfg.probe);
        assert_eq!(cfg.planned_requests(), 6000);
    }

    #[test]
    fn parse_abci_with_methods() {
        let cfg = parse(&[
            "storm",
            "abci",
            "http://localhost:26657",
            "-r",
            "25",
            "-d",
            "5",
            "-m",
            "echo",
            "info,checkTx",
            "echo",
            "-v",
            "--selection",
            "round-robin",
        ])
        .expect("config should build");

        assert_eq!(cfg.protocol, Protocol::Abci);
        assert_eq!(cfg.requests_per_second, 25);
        assert_eq!(cfg.duration_secs, 5);
        assert_eq!(cfg.methods, vec!["echo", "info", "checkTx"]);
        assert!(cfg.verbose);
        assert_eq!(cfg.selection, Selection::RoundRobin);
    }

    #[test]
    fn reject_zero_rate() {
        let err = parse(&["storm", "eth", "http://node:8545", "-r", "0"])
            .expect_err("expected rate validation error");
        assert!(err.to_string().contains("--requests-per-second"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn reject_zero_duration() {
        let err = parse(&["storm", "eth", "http://node:8545", "-d", "0"])
            .expect_err("expected duration validation error");
        assert!(err.to_string().contains("--duration"));
    }

    #[test]
    fn reject_oversized_window() {
        let err = parse(&["storm", "eth", "http://node:8545", "-d", "18446744073709551615"])
            .expect_err("expected duration bound");
        assert!(err.to_string().contains("--duration must not exceed"));
        assert_eq!(err.exit_code(), 2);

        let err = parse(&["storm", "eth", "http://node:8545", "-r", "1000001"])
            .expect_err("expected rate bound");
        assert!(err.to_string().contains("--requests-per-second must not exceed"));

        let cfg = parse(&[
            "storm",
            "eth",
            "http://node:8545",
            "-r",
            "1000000",
            "-d",
            &super::MAX_DURATION_SECS.to_string(),
        ])
        .expect("largest window is accepted");
        assert_eq!(cfg.planned_requests(), 1_000_000 * super::MAX_DURATION_SECS);
    }

    #[test]
    fn reject_inverted_byte_range() {
        let err = parse(&[
            "storm",
            "eth",
            "http://node:8545",
            "--min-bytes",
            "64",
            "--max-bytes",
            "8",
        ])
        .expect_err("expected byte range error");
        assert!(err.to_string().contains("--min-bytes"));
    }

    #[test]
    fn reject_non_http_url() {
        let err = parse(&["storm", "eth", "ws://node:8546"]).expect_err("ws is not supported");
        assert!(err.to_string().contains("scheme"));

        let err = parse(&["storm", "eth", "not a url"]).expect_err("garbage url");
        assert!(err.to_string().contains("invalid url"));
    }

    #[test]
    fn parse_discover() {
        let cli = Cli::try_parse_from([
            "storm",
            "discover",
            "http://localhost:26657",
            "-n",
            "50",
            "--actor-address",
            "cosmos1jxv0u20scum4trha72c7ltfgfqef6nscwf8dg8",
        ])
        .expect("cli should parse");
        let Mode::Discover(cfg) = Mode::try_from(cli.clone()).expect("config should build") else {
            panic!("expected discover mode");
        };
        assert_eq!(cfg.attempts, 50);
        assert_eq!(
            cfg.actor_address.as_deref(),
            Some("cosmos1jxv0u20scum4trha72c7ltfgfqef6nscwf8dg8")
        );
        assert_eq!(cfg.timeout_ms, 5000);

        let err = RunConfig::try_from(cli).expect_err("discover is not a flood run");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn reject_zero_discover_attempts() {
        let cli = Cli::try_parse_from(["storm", "discover", "http://localhost:26657", "-n", "0"])
            .expect("cli should parse");
        let err = Mode::try_from(cli).expect_err("expected attempts validation error");
        assert!(err.to_string().contains("--attempts"));
    }

    #[test]
    fn flood_subcommands_build_storm_mode() {
        let cli = Cli::try_parse_from(["storm", "abci", "http://localhost:26657"])
            .expect("cli should parse");
        assert!(matches!(Mode::try_from(cli), Ok(Mode::Storm(_))));
    }

    #[test]
    fn global_log_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "storm",
            "eth",
            "http://node:8545",
            "--log",
            "debug",
            "--log-format",
            "json",
        ])
        .expect("cli should parse");
        let cfg = RunConfig::try_from(cli).expect("config should build");
        assert_eq!(cfg.log, "debug");
        assert_eq!(cfg.log_format, crate::trace::LogFormat::Json);
    }
}
