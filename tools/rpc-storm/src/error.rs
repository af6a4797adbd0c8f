use thiserror::Error;

use crate::catalog::CatalogError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal errors. Anything that happens to a single request is recorded as an
/// [`Outcome`](crate::protocols::Outcome) instead and never shows up here.
#[derive(Debug, Error)]
pub enum Error {
    /// invalid rate, duration, url or method filter. Raised before any traffic.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// malformed static method table
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// the target could not be reached while establishing the run
    #[error("startup failed: {0}")]
    Startup(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Process exit status used by the `storm` binary.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Catalog(_) => 2,
            Self::Startup(_) => 1,
        }
    }
}
