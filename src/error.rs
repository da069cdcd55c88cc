use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while setting up a self test or writing its results.
///
/// Failures of the test steps themselves never surface here; they end up in
/// the step verdicts and the summary message.
#[derive(Debug, Error)]
pub enum SelfTestError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no helper URL given (pass it on the command line or set helper_url in the config)")]
    MissingHelperUrl,

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("failed to write report: {0}")]
    Report(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SelfTestError>;
