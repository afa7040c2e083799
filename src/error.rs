use thiserror::Error;

/// Failure classes surfaced by the client.
///
/// Validation errors are raised before a request leaves the process;
/// everything else maps a transport or server outcome. Callers turn these
/// into local view state rather than re-throwing them upward.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// The session is no longer authenticated: a 401 survived the one-shot
    /// credential refresh, or the refresh itself was rejected. A refresh
    /// that misses its deadline reports [`ApiError::Timeout`] instead.
    #[error("not authenticated")]
    Unauthorized,

    #[error("server error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("response did not match expected shape: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Timeout(String),

    #[error("credential store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// True when the caller should treat the session as logged out.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}
