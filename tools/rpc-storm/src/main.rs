use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use rpc_storm::{
    Cli, DiscoveryReport, Mode, Result, RunReport, discover_paths, run_storm, trace,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mode = match Mode::try_from(cli) {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(err.exit_code());
        }
    };

    let (log, log_format) = mode.logging();
    if let Err(err) = trace::init(log, log_format) {
        eprintln!("failed to initialize logging: {err:#}");
        std::process::exit(2);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping");
                cancel.cancel();
            }
        }
    });

    match mode {
        Mode::Storm(config) => {
            let json = config.json;
            print_report(run_storm(config, cancel).await, json, RunReport::human_summary);
        }
        Mode::Discover(config) => {
            let json = config.json;
            print_report(
                discover_paths(config, cancel).await,
                json,
                DiscoveryReport::human_summary,
            );
        }
    }
}

fn print_report<T: Serialize>(result: Result<T>, json: bool, human: impl Fn(&T) -> String) {
    match result {
        Ok(report) if json => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("failed to serialize report: {err:#}");
                std::process::exit(2);
            }
        },
        Ok(report) => println!("{}", human(&report)),
        Err(err) => {
            error!(%err, "run aborted");
            eprintln!("{err:#}");
            std::process::exit(err.exit_code());
        }
    }
}
