//! `abci_query` path discovery.
//!
//! Sends a series of `abci_query` calls over Cosmos SDK store and gRPC query
//! paths and records which ones the application answers with code 0. Path
//! placeholders (`{address}`, `{cid}`) and the request data are filled per
//! query from sample values.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, MethodSpec, Protocol};
use crate::config::DiscoverConfig;
use crate::error::{Error, Result};
use crate::protocols::{self, CallResult, METHOD_NOT_FOUND, Outcome, ProtocolClient};
use crate::transport::Transport;

pub const DEFAULT_DISCOVER_ATTEMPTS: u64 = 1000;

/// Paths many applications answer without any data.
pub const SIMPLE_PATHS: &[&str] = &[
    "/",
    "/app/info",
    "/app/version",
    "/info",
    "/version",
    "/store",
    "/key",
    "/custom",
    "/p2p/filter/addr",
    "/p2p/filter/id",
    "/validators",
];

pub const PATH_TEMPLATES: &[&str] = &[
    "/store/bank/key",
    "/cosmos.bank.v1beta1.Query/AllBalances",
    "/cosmos.bank.v1beta1.Query/Balance",
    "/cosmos.bank.v1beta1.Query/TotalSupply",
    "/cosmos.bank.v1beta1.Query/SupplyOf",
    "/cosmos.bank.v1beta1.Query/Params",
    "/cosmos.bank.v1beta1.Query/DenomMetadata",
    "/cosmos.bank.v1beta1.Query/DenomsMetadata",
    "/store/staking/key",
    "/cosmos.staking.v1beta1.Query/Validators",
    "/cosmos.staking.v1beta1.Query/Validator",
    "/cosmos.staking.v1beta1.Query/ValidatorDelegations",
    "/cosmos.staking.v1beta1.Query/ValidatorUnbondingDelegations",
    "/cosmos.staking.v1beta1.Query/Delegation",
    "/cosmos.staking.v1beta1.Query/UnbondingDelegation",
    "/cosmos.staking.v1beta1.Query/DelegatorDelegations",
    "/cosmos.staking.v1beta1.Query/DelegatorUnbondingDelegations",
    "/cosmos.staking.v1beta1.Query/Redelegations",
    "/cosmos.staking.v1beta1.Query/DelegatorValidators",
    "/cosmos.staking.v1beta1.Query/DelegatorValidator",
    "/cosmos.staking.v1beta1.Query/HistoricalInfo",
    "/cosmos.staking.v1beta1.Query/Pool",
    "/cosmos.staking.v1beta1.Query/Params",
    "/cosmos.gov.v1beta1.Query/Proposal",
    "/cosmos.gov.v1beta1.Query/Proposals",
    "/cosmos.gov.v1beta1.Query/Vote",
    "/cosmos.gov.v1beta1.Query/Votes",
    "/cosmos.gov.v1beta1.Query/Params",
    "/cosmos.gov.v1beta1.Query/Deposit",
    "/cosmos.gov.v1beta1.Query/Deposits",
    "/cosmos.gov.v1beta1.Query/TallyResult",
    "/cosmos.auth.v1beta1.Query/Account",
    "/cosmos.auth.v1beta1.Query/Accounts",
    "/cosmos.auth.v1beta1.Query/Params",
    "/cosmos.distribution.v1beta1.Query/Params",
    "/cosmos.distribution.v1beta1.Query/ValidatorOutstandingRewards",
    "/cosmos.distribution.v1beta1.Query/ValidatorCommission",
    "/cosmos.distribution.v1beta1.Query/ValidatorSlashes",
    "/cosmos.distribution.v1beta1.Query/DelegationRewards",
    "/cosmos.distribution.v1beta1.Query/DelegationTotalRewards",
    "/cosmos.distribution.v1beta1.Query/DelegatorWithdrawAddress",
    "/cosmos.distribution.v1beta1.Query/CommunityPool",
    "/cosmos.slashing.v1beta1.Query/Params",
    "/cosmos.slashing.v1beta1.Query/SigningInfo",
    "/cosmos.slashing.v1beta1.Query/SigningInfos",
    "/fvm/ipld/{cid}",
    "/fvm/actor_state/{address}",
    "/fvm/actor_code/{address}",
    "/fvm/actor_balance/{address}",
    "/fvm/actor_nonce/{address}",
];

pub const SAMPLE_ACCOUNTS: &[&str] = &[
    "cosmos1jxv0u20scum4trha72c7ltfgfqef6nscwf8dg8",
    "cosmos1xyxs3skf3f4jfqeuv89yyaqvjc6lffavxqhc8g",
    "cosmos1e0jnq2sun3dzjh8p2xq95kk0expwmd7shwjpfg",
    "cosmos1ujax3mefa6mn5zeq7xcnetwz9skv9stmuf59sf",
];

const SAMPLE_CIDS: &[&str] = &[
    "bafy2bzacecmda75ovposbdateg7eyhwij3uucabtxgziaf3aeyn6tuqje7psm",
    "bafy2bzaceaxm23epjsmh75yvzcecsrbavlmkcxnva66bkdcfpsp4fzwovuv6q",
    "bafy2bzacedikkmeotawrxrrbnrdqlsknlad4xjyubo52cmlmuxfhrgxvktws6",
];

const DENOMS: &[&str] = &["uatom", "stake", "ustake"];
const PROPOSAL_IDS: &[&str] = &["1", "2", "3", "10", "100"];
const HEIGHTS: &[&str] = &["0", "1", "10", "100"];

/// Answered by most Cosmos SDK applications, used to check `abci_query` works.
const VERSION_PATH: &str = "/app/version";

const PROGRESS_EVERY: u64 = 10;

/// Fills path templates and query data.
#[derive(Debug)]
pub struct QueryBuilder {
    rng: StdRng,
    accounts: Vec<String>,
    actor_address: Option<String>,
    /// templates already queried at least once
    tried: BTreeSet<&'static str>,
}

impl QueryBuilder {
    pub fn new(seed: u64, actor_address: Option<String>) -> Self {
        let mut accounts: Vec<String> = SAMPLE_ACCOUNTS.iter().map(|a| a.to_string()).collect();
        if let Some(actor) = &actor_address {
            accounts.insert(0, actor.clone());
        }
        Self {
            rng: StdRng::seed_from_u64(seed),
            accounts,
            actor_address,
            tried: BTreeSet::new(),
        }
    }

    pub fn pick_template(&mut self) -> &'static str {
        let index = self.rng.gen_range(0..SIMPLE_PATHS.len() + PATH_TEMPLATES.len());
        SIMPLE_PATHS
            .get(index)
            .or_else(|| PATH_TEMPLATES.get(index - SIMPLE_PATHS.len()))
            .copied()
            .unwrap_or(VERSION_PATH)
    }

    /// Substitute placeholders. The actor address, when given, is used the
    /// first time a template is queried.
    pub fn fill(&mut self, template: &'static str) -> String {
        let mut path = template.to_string();
        if path.contains("{address}") {
            let first_use = !self.tried.contains(template);
            let address = match self.actor_address.clone() {
                Some(actor) if first_use => actor,
                _ => self.account(),
            };
            path = path.replace("{address}", &address);
        }
        if path.contains("{cid}") {
            let cid = SAMPLE_CIDS.choose(&mut self.rng).copied().unwrap_or_default();
            path = path.replace("{cid}", cid);
        }
        self.tried.insert(template);
        path
    }

    fn account(&mut self) -> String {
        self.accounts
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_default()
    }

    fn pick(&mut self, values: &[&'static str]) -> &'static str {
        values.choose(&mut self.rng).copied().unwrap_or_default()
    }

    /// Request object for the gRPC method at the end of `path`. Unknown
    /// methods and store paths get an empty object.
    pub fn data_for(&mut self, path: &str) -> Value {
        let rpc = path.rsplit('/').next().unwrap_or_default();
        match rpc {
            "AllBalances" | "Account" => json!({ "address": self.account() }),
            "Balance" => json!({ "address": self.account(), "denom": self.pick(DENOMS) }),
            "SupplyOf" | "DenomMetadata" => json!({ "denom": self.pick(DENOMS) }),
            "Validator" | "ValidatorDelegations" | "ValidatorUnbondingDelegations" => {
                json!({ "validator_addr": self.account() })
            }
            "Delegation" | "UnbondingDelegation" | "DelegatorValidator" => json!({
                "delegator_addr": self.account(),
                "validator_addr": self.account(),
            }),
            "DelegatorDelegations"
            | "DelegatorUnbondingDelegations"
            | "DelegatorValidators"
            | "Redelegations" => json!({ "delegator_addr": self.account() }),
            "ValidatorOutstandingRewards" | "ValidatorCommission" | "ValidatorSlashes" => {
                json!({ "validator_address": self.account() })
            }
            "DelegationRewards" => json!({
                "delegator_address": self.account(),
                "validator_address": self.account(),
            }),
            "DelegationTotalRewards" | "DelegatorWithdrawAddress" => {
                json!({ "delegator_address": self.account() })
            }
            "Proposal" | "Votes" | "Deposits" | "TallyResult" => {
                json!({ "proposal_id": self.pick(PROPOSAL_IDS) })
            }
            "Vote" => json!({ "proposal_id": self.pick(PROPOSAL_IDS), "voter": self.account() }),
            "Deposit" => {
                json!({ "proposal_id": self.pick(PROPOSAL_IDS), "depositor": self.account() })
            }
            "SigningInfo" => json!({ "cons_address": self.account() }),
            "HistoricalInfo" => json!({ "height": self.pick(HEIGHTS) }),
            _ => json!({}),
        }
    }

    /// Named params for one `abci_query` call. `data` is hex, as CometBFT
    /// expects for `HexBytes`.
    pub fn params(&mut self, path: &str) -> Value {
        let data = self.data_for(path);
        json!({
            "path": path,
            "data": hex::encode(data.to_string()),
            "height": self.pick(HEIGHTS),
            "prove": self.rng.gen_bool(0.5),
        })
    }
}

/// A query works when the node returns a result whose ABCI response code is 0.
pub fn query_succeeded(result: &CallResult) -> bool {
    match result {
        CallResult::Success(value) => value
            .pointer("/response/code")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            == 0,
        _ => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_address: Option<String>,
    pub queries: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub interrupted: bool,
    /// templates answered with code 0 at least once
    pub working_paths: BTreeSet<String>,
    /// failures per template
    pub failed_paths: BTreeMap<String, u64>,
    pub paths_tried: usize,
    pub min_latency_ms: Option<f64>,
    pub mean_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

impl DiscoveryReport {
    fn record(&mut self, template: &str, outcome: &Outcome, latency: &mut LatencyTally) {
        self.queries += 1;
        if query_succeeded(&outcome.result) {
            self.succeeded += 1;
            if self.working_paths.insert(template.to_string()) {
                info!(path = template, "working path found");
            }
        } else {
            self.failed += 1;
            *self.failed_paths.entry(template.to_string()).or_default() += 1;
        }
        latency.observe(outcome.latency);
    }

    pub fn success_rate(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.queries as f64
        }
    }

    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "abci_query path discovery");
        let _ = writeln!(output, "target: {}", self.url);
        if let Some(actor) = &self.actor_address {
            let _ = writeln!(output, "actor address: {actor}");
        }
        if self.interrupted {
            let _ = writeln!(output, "status: INTERRUPTED");
        }
        let _ = writeln!(
            output,
            "queries: total={} succeeded={} failed={} success_rate={:.1}%",
            self.queries,
            self.succeeded,
            self.failed,
            self.success_rate() * 100.0,
        );
        let _ = writeln!(
            output,
            "latency: min={} mean={} max={}",
            fmt_ms(self.min_latency_ms),
            fmt_ms(self.mean_latency_ms),
            fmt_ms(self.max_latency_ms),
        );
        let _ = writeln!(output, "paths tried: {}", self.paths_tried);
        if self.working_paths.is_empty() {
            let _ = writeln!(output, "no working paths");
        } else {
            let _ = writeln!(output, "working paths:");
            for path in &self.working_paths {
                let _ = writeln!(output, "  {path}");
            }
        }
        output
    }
}

fn fmt_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |ms| format!("{ms:.2}ms"))
}

#[derive(Debug, Default)]
struct LatencyTally {
    count: u64,
    sum: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl LatencyTally {
    fn observe(&mut self, latency: Duration) {
        self.count += 1;
        self.sum += latency;
        self.min = Some(self.min.map_or(latency, |min| min.min(latency)));
        self.max = Some(self.max.map_or(latency, |max| max.max(latency)));
    }

    fn apply(&self, report: &mut DiscoveryReport) {
        let as_ms = |d: Duration| d.as_secs_f64() * 1000.0;
        report.min_latency_ms = self.min.map(as_ms);
        report.max_latency_ms = self.max.map(as_ms);
        if self.count > 0 {
            report.mean_latency_ms = Some(as_ms(self.sum) / self.count as f64);
        }
    }
}

fn method(catalog: &Catalog, name: &str) -> Result<&'static MethodSpec> {
    catalog
        .spec_for(Protocol::Abci, name)
        .ok_or_else(|| Error::Startup(format!("`{name}` missing from catalog")))
}

/// Make sure the endpoint is a CometBFT node. Any JSON-RPC answer to
/// `status` is accepted.
async fn check_endpoint(client: &dyn ProtocolClient, status: &MethodSpec) -> Result<()> {
    let outcome = client.invoke(status, &[]).await;
    match &outcome.result {
        CallResult::Success(result) => {
            let node = result.get("node_info");
            info!(
                version = node.and_then(|n| n.get("version")).and_then(serde_json::Value::as_str),
                network = node.and_then(|n| n.get("network")).and_then(serde_json::Value::as_str),
                "endpoint answers status"
            );
            Ok(())
        }
        CallResult::ProtocolError { code, message } => {
            warn!(code, %message, "status returned an error, continuing");
            Ok(())
        }
        failed => Err(Error::Startup(format!(
            "endpoint did not answer `status`: {}",
            failed.detail().unwrap_or_default()
        ))),
    }
}

/// One plain query to make sure the node serves `abci_query` at all.
async fn check_query(client: &dyn ProtocolClient, query: &MethodSpec) -> Result<()> {
    let params = json!({ "path": VERSION_PATH, "data": "", "height": "0", "prove": false });
    let outcome = client.invoke(query, &[params]).await;
    match &outcome.result {
        CallResult::ProtocolError { code, .. } if *code == METHOD_NOT_FOUND => Err(Error::Startup(
            "the endpoint does not serve abci_query".to_string(),
        )),
        CallResult::TransportError(_) | CallResult::Timeout => Err(Error::Startup(format!(
            "abci_query check failed: {}",
            outcome.result.detail().unwrap_or_default()
        ))),
        result => {
            debug!(kind = %result.kind(), "abci_query is served");
            Ok(())
        }
    }
}

/// Run path discovery against `config.url`.
pub async fn run(
    config: DiscoverConfig,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
) -> Result<DiscoveryReport> {
    let catalog = Catalog::load()?;
    let client = protocols::client_for(
        Protocol::Abci,
        config.url.clone(),
        transport,
        config.timeout(),
    );
    let status = method(&catalog, "status")?;
    let query = method(&catalog, "abci_query")?;

    check_endpoint(client.as_ref(), status).await?;
    check_query(client.as_ref(), query).await?;

    info!(attempts = config.attempts, url = %config.url, "starting abci_query path discovery");
    let mut builder = QueryBuilder::new(config.seed, config.actor_address.clone());
    let mut report = DiscoveryReport {
        url: config.url.clone(),
        actor_address: config.actor_address.clone(),
        ..DiscoveryReport::default()
    };
    let mut latency = LatencyTally::default();
    let mut tried = BTreeSet::new();

    for attempt in 1..=config.attempts {
        let template = builder.pick_template();
        let path = builder.fill(template);
        let params = builder.params(&path);
        tried.insert(template);

        let args = [params];
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.interrupted = true;
                break;
            }
            outcome = client.invoke(query, &args) => outcome,
        };
        debug!(%path, kind = %outcome.result.kind(), latency = ?outcome.latency, "query finished");
        report.record(template, &outcome, &mut latency);

        if attempt % PROGRESS_EVERY == 0 {
            info!(
                done = attempt,
                total = config.attempts,
                working = report.working_paths.len(),
                success_rate = report.success_rate(),
                "discovery progress"
            );
        }
    }

    report.paths_tried = tried.len();
    latency.apply(&mut report);
    Ok(report)
}
