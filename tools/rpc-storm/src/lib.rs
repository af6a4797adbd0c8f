//! Rate-controlled flood and fuzz testing for blockchain node RPC endpoints.
//!
//! A run paces calls with a [`governor::RateGovernor`], draws methods from the
//! [`catalog::Catalog`], fills their arguments with a [`fuzzer::ParamFuzzer`],
//! sends them through a [`protocols::ProtocolClient`] and folds every
//! [`protocols::Outcome`] into an [`aggregator::Aggregator`].
//!
//! [`discover`] is a separate mode that looks for the `abci_query` paths a
//! CometBFT application answers.
pub mod aggregator;
pub mod catalog;
pub mod config;
pub mod discover;
pub mod engine;
pub mod error;
pub mod failure_log;
pub mod fuzzer;
pub mod governor;
pub mod probe;
pub mod protocols;
pub mod report;
pub mod trace;
pub mod transport;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use config::{Cli, DiscoverConfig, Mode, RunConfig, Selection};
pub use discover::DiscoveryReport;
pub use engine::{Dispatcher, DispatcherState};
pub use error::{Error, Result};
pub use report::RunReport;
pub use transport::{HttpTransport, Transport};

/// Run against the real endpoint over HTTP.
pub async fn run_storm(config: RunConfig, cancel: CancellationToken) -> Result<RunReport> {
    let transport = HttpTransport::new(config.workers)
        .map_err(|err| Error::Startup(format!("failed to build http client: {err}")))?;
    engine::run(config, Arc::new(transport), cancel).await
}

/// Discover working `abci_query` paths over HTTP.
pub async fn discover_paths(
    config: DiscoverConfig,
    cancel: CancellationToken,
) -> Result<DiscoveryReport> {
    let transport = HttpTransport::new(1)
        .map_err(|err| Error::Startup(format!("failed to build http client: {err}")))?;
    discover::run(config, Arc::new(transport), cancel).await
}

/// Run with a caller-supplied transport.
pub async fn run_with_transport(
    config: RunConfig,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
) -> Result<RunReport> {
    engine::run(config, transport, cancel).await
}
