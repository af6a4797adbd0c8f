use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, AggregatorOptions};
use crate::catalog::{Catalog, MethodSpec, Protocol};
use crate::config::{RunConfig, Selection};
use crate::error::{Error, Result};
use crate::failure_log::{FailureLog, FailureSink};
use crate::fuzzer::ParamFuzzer;
use crate::governor::RateGovernor;
use crate::probe;
use crate::protocols::{self, ProtocolClient};
use crate::report::{RunReport, SampleRequest};
use crate::transport::Transport;

/// Fuzzer stream used for probes and dry-run samples, disjoint from every
/// worker's stream.
const CONTROL_STREAM: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatcherState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

/// What the dispatcher itself observed, independent of call outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub elapsed: Duration,
    /// permits the governor could have issued
    pub capacity: u64,
    pub slots_skipped: u64,
    pub interrupted: bool,
    /// workers still busy after the drain window and aborted
    pub aborted: bool,
}

/// Resolve `filter` against the catalog. An empty filter selects every method
/// of `protocol`.
pub fn resolve_methods(
    catalog: &Catalog,
    protocol: Protocol,
    filter: &[String],
) -> Result<Vec<&'static MethodSpec>> {
    if filter.is_empty() {
        let all: Vec<_> = catalog.specs(protocol).collect();
        if all.is_empty() {
            return Err(Error::config(format!("no {protocol} methods in catalog")));
        }
        return Ok(all);
    }

    let mut unknown = Vec::new();
    let mut methods = Vec::with_capacity(filter.len());
    for name in filter {
        match catalog.spec_for(protocol, name) {
            Some(spec) => methods.push(spec),
            None => unknown.push(name.as_str()),
        }
    }
    if !unknown.is_empty() {
        return Err(Error::config(format!(
            "unknown {protocol} method(s): {}",
            unknown.join(", ")
        )));
    }
    Ok(methods)
}

struct WorkerContext {
    governor: RateGovernor,
    client: Arc<dyn ProtocolClient>,
    aggregator: Arc<Aggregator>,
    failures: Option<FailureSink>,
    methods: Arc<[&'static MethodSpec]>,
    selection: Selection,
    cursor: AtomicUsize,
}

impl WorkerContext {
    fn pick(&self, fuzzer: &mut ParamFuzzer) -> &'static MethodSpec {
        let index = match self.selection {
            Selection::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed),
            Selection::Random => fuzzer.rng().gen_range(0..self.methods.len()),
        };
        self.methods[index % self.methods.len()]
    }
}

/// Fixed pool of workers sharing one governor and one aggregator.
pub struct Dispatcher {
    config: Arc<RunConfig>,
    client: Arc<dyn ProtocolClient>,
    aggregator: Arc<Aggregator>,
    methods: Arc<[&'static MethodSpec]>,
    failures: Option<FailureSink>,
    state: watch::Sender<DispatcherState>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("protocol", &self.client.protocol())
            .field("methods", &self.methods.len())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl Dispatcher {
    /// `methods` comes from [`resolve_methods`], optionally narrowed by the
    /// availability probe.
    pub fn new(
        config: Arc<RunConfig>,
        methods: Vec<&'static MethodSpec>,
        client: Arc<dyn ProtocolClient>,
        aggregator: Arc<Aggregator>,
    ) -> Result<Self> {
        if methods.is_empty() {
            return Err(Error::config("method set must not be empty"));
        }
        let (state, _) = watch::channel(DispatcherState::Idle);
        Ok(Self {
            config,
            client,
            aggregator,
            methods: methods.into(),
            failures: None,
            state,
        })
    }

    pub fn with_failure_sink(mut self, sink: FailureSink) -> Self {
        self.failures = Some(sink);
        self
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    fn transition(&self, next: DispatcherState) {
        let prev = self.state.send_replace(next);
        debug!(%prev, %next, "dispatcher state change");
    }

    /// Run until the governor's window closes or `cancel` fires. Returns once
    /// every worker has finished or been aborted.
    pub async fn run(&self, cancel: &CancellationToken) -> DispatchSummary {
        let config = &self.config;
        let ctx = Arc::new(WorkerContext {
            governor: RateGovernor::with_max_lag(
                config.requests_per_second,
                config.duration(),
                config.max_lag(),
                cancel,
            ),
            client: self.client.clone(),
            aggregator: self.aggregator.clone(),
            failures: self.failures.clone(),
            methods: self.methods.clone(),
            selection: config.selection,
            cursor: AtomicUsize::new(0),
        });
        let capacity = ctx.governor.capacity();

        self.transition(DispatcherState::Running);
        info!(
            protocol = %self.client.protocol(),
            rps = config.requests_per_second,
            duration_secs = config.duration_secs,
            workers = config.workers,
            methods = self.methods.len(),
            planned = capacity,
            "starting run"
        );

        let mut workers = JoinSet::new();
        for index in 0..config.workers {
            let ctx = ctx.clone();
            let seed = config.seed;
            let bounds = config.fuzz;
            workers.spawn(async move {
                let fuzzer = ParamFuzzer::seeded(seed, index as u64, bounds);
                run_worker(ctx, fuzzer).await
            });
        }

        ctx.governor.closed().await;
        // a cancelled run goes straight to Stopped, in-flight calls still get
        // the drain window
        let interrupted = cancel.is_cancelled();
        if interrupted {
            info!("run cancelled, waiting for in-flight requests");
        } else {
            self.transition(DispatcherState::Draining);
            debug!("rate window elapsed, draining in-flight requests");
        }

        // in-flight calls are bounded by the transport timeout
        let aborted = !drain(&mut workers, config.timeout()).await;
        if aborted {
            warn!(
                timeout_ms = config.timeout_ms,
                "workers still busy after drain window, aborted"
            );
        }

        let summary = DispatchSummary {
            elapsed: ctx.governor.start().elapsed(),
            capacity,
            slots_skipped: ctx.governor.skipped(),
            interrupted,
            aborted,
        };
        self.transition(DispatcherState::Stopped);
        info!(elapsed = ?summary.elapsed, skipped = summary.slots_skipped, "run stopped");
        summary
    }
}

async fn run_worker(ctx: Arc<WorkerContext>, mut fuzzer: ParamFuzzer) {
    while let Some(_permit) = ctx.governor.acquire().await {
        let spec = ctx.pick(&mut fuzzer);
        let call = fuzzer.call(spec);
        let outcome = ctx.client.invoke(call.method, &call.args).await;
        if let Some(failures) = &ctx.failures {
            failures.record(&outcome, &call.args);
        }
        ctx.aggregator.ingest(outcome);
    }
}

/// Join every worker within `window`. Returns `false` if some had to be aborted.
async fn drain(workers: &mut JoinSet<()>, window: Duration) -> bool {
    let joined = tokio::time::timeout(window, async {
        while let Some(res) = workers.join_next().await {
            if let Err(err) = res {
                if err.is_panic() {
                    warn!(?err, "worker panicked");
                }
            }
        }
    })
    .await;

    if joined.is_ok() {
        return true;
    }
    workers.abort_all();
    while workers.join_next().await.is_some() {}
    false
}

/// Everything between a validated config and the final report: catalog load,
/// method resolution, probes, dispatch and aggregation.
pub async fn run(
    config: RunConfig,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let config = Arc::new(config);
    let catalog = Catalog::load()?;
    let client = protocols::client_for(
        config.protocol,
        config.url.clone(),
        transport,
        config.timeout(),
    );
    let mut control = ParamFuzzer::seeded(config.seed, CONTROL_STREAM, config.fuzz);

    if config.dry_run {
        let methods = resolve_methods(&catalog, config.protocol, &config.methods)?;
        let samples = methods
            .iter()
            .enumerate()
            .map(|(i, spec)| SampleRequest {
                method: spec.name.to_string(),
                family: spec.family.to_string(),
                request: client.encode(i as u64 + 1, spec, &control.generate(spec)),
            })
            .collect();
        return Ok(RunReport::dry_run(&config, samples));
    }

    // every configuration error surfaces before the probes send anything
    let mut methods = resolve_methods(&catalog, config.protocol, &config.methods)?;
    let failure_log = match &config.failure_log {
        Some(path) => Some(FailureLog::create(path, config.failure_log_queue).await?),
        None => None,
    };

    if config.probe {
        probe::check_connection(client.as_ref(), &catalog, &mut control).await?;
    }
    if config.skip_unavailable {
        methods = probe::filter_available(client.as_ref(), methods, &mut control).await?;
    }

    let aggregator = Arc::new(Aggregator::new(AggregatorOptions {
        reservoir_size: config.reservoir_size,
        verbose_queue: config.verbose.then_some(config.verbose_queue),
        seed: config.seed,
    }));
    let mut dispatcher = Dispatcher::new(config.clone(), methods, client, aggregator.clone())?;
    if let Some(log) = &failure_log {
        dispatcher = dispatcher.with_failure_sink(log.sink());
    }

    let dispatch = dispatcher.run(&cancel).await;
    // releases the last failure sink
    drop(dispatcher);

    let stats = aggregator.finish().await;
    let failures = match failure_log {
        Some(log) => Some(log.finish().await),
        None => None,
    };
    Ok(RunReport::from_run(&config, &stats, &dispatch, failures))
}
