//! tracing configuration
use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        self,
        format::{Format, PrettyFields},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// log as "json", "pretty" or "standard" (unstructured)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Standard,
    Json,
    Pretty,
}

/// Install the global subscriber. Logs go to stderr so stdout stays reserved
/// for verbose lines and the report.
pub fn init(level: &str, format: LogFormat) -> Result<()> {
    let filter = filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .event_format(Format::default().pretty().with_source_location(false))
                    .fmt_fields(PrettyFields::new())
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        LogFormat::Standard => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}

fn filter(level: &str) -> Result<EnvFilter> {
    // fall back to info on an unparsable directive
    Ok(EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_LEVEL))?
        .add_directive("hyper=off".parse()?)
        .add_directive("hyper_util=off".parse()?)
        .add_directive("reqwest=warn".parse()?))
}
