use std::env;
use std::time::Duration;

use crate::error::ApiError;

const DEFAULT_CREDENTIAL_DB: &str = "./classhub-credentials.db";
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60;
const DEFAULT_UPLOAD_RETRIES: u32 = 3;

/// Runtime configuration, sourced from the environment. A `.env` file in
/// the working directory is loaded first when present.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the ClassHub backend, e.g. `https://api.classhub.example`.
    pub base_url: String,
    /// Path of the sqlite file holding the access/refresh credentials.
    pub credential_db_path: String,
    /// Deadline for the one-shot credential refresh call.
    pub refresh_timeout: Duration,
    /// Deadline for a single file-upload attempt.
    pub upload_timeout: Duration,
    /// Fixed number of upload attempts. No backoff between them.
    pub upload_retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ApiError> {
        dotenvy::dotenv().ok();
        let base_url = env::var("CLASSHUB_BASE_URL")
            .map_err(|_| ApiError::Config("CLASSHUB_BASE_URL must be set".to_string()))?;

        Ok(Self {
            base_url,
            credential_db_path: env::var("CLASSHUB_CREDENTIAL_DB")
                .unwrap_or_else(|_| DEFAULT_CREDENTIAL_DB.to_string()),
            refresh_timeout: Duration::from_secs(parse_or(
                "CLASSHUB_REFRESH_TIMEOUT_SECS",
                DEFAULT_REFRESH_TIMEOUT_SECS,
            )),
            upload_timeout: Duration::from_secs(parse_or(
                "CLASSHUB_UPLOAD_TIMEOUT_SECS",
                DEFAULT_UPLOAD_TIMEOUT_SECS,
            )),
            upload_retries: parse_or("CLASSHUB_UPLOAD_RETRIES", DEFAULT_UPLOAD_RETRIES),
        })
    }

    /// Configuration pointing at an explicit base URL, defaults elsewhere.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credential_db_path: DEFAULT_CREDENTIAL_DB.to_string(),
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            upload_retries: DEFAULT_UPLOAD_RETRIES,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_base_url_gets_defaults() {
        let config = Config::for_base_url("http://localhost:9000");
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.upload_retries, DEFAULT_UPLOAD_RETRIES);
        assert_eq!(config.refresh_timeout, Duration::from_secs(10));
    }
}
