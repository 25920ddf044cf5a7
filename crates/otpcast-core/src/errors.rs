use std::path::PathBuf;

/// Core error type for the relay.
///
/// Adapter crates map their transport errors into this type so the polling
/// loop can decide continue-vs-abort consistently: `Config` is fatal before
/// the loop starts, everything else is isolated per account / per fetch /
/// per destination.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("auth failed for account {account}: {reason}")]
    Auth { account: String, reason: String },

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("delivery to {destination} failed: {reason}")]
    Delivery {
        destination: String,
        reason: String,
    },

    #[error("persistence error at {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
