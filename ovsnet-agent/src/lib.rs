pub mod agent;
pub mod config;
pub mod driver;
pub mod http;
pub mod metrics;
pub mod netlink;
pub mod records;
pub mod resource;
pub mod resync;
pub mod switch;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    State(#[from] ovsnet_state::Error),

    #[error(transparent)]
    Resource(#[from] ovsnet_resources::Error),

    #[error("{op} {name} failed: {reason}")]
    Platform {
        op: &'static str,
        name: String,
        reason: String,
    },

    #[error("{0} is not supported on this platform")]
    UnsupportedPlatform(String),

    #[error("{0}")]
    ResourceExhausted(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    JsonConversion(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::State(e) => e.is_not_found(),
            Error::Resource(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Error::State(e) => e.is_transient(),
            Error::Resource(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            Error::ResourceExhausted(_)
                | Error::Resource(ovsnet_resources::Error::ResourceExhausted(_))
        )
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::State(e) => e.metric_label(),
            Error::Resource(e) => e.metric_label(),
            Error::Platform { .. } => "platform",
            Error::UnsupportedPlatform(_) => "unsupported_platform",
            Error::ResourceExhausted(_) => "resource_exhausted",
            Error::InvalidEndpoint(_) => "invalid_endpoint",
            Error::IoError(_) => "io",
            Error::JsonConversion(_) => "json",
            Error::Config(_) => "config",
            Error::Task(_) => "task",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
