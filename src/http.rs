use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::ApiError;

/// Authenticated HTTP wrapper around [`reqwest::Client`].
///
/// Every request attaches the stored access credential as a bearer header
/// when one is present. A 401 triggers exactly one credential refresh and
/// one replay of the original request; concurrent requests that hit a 401
/// during the same window share a single in-flight refresh instead of
/// racing their own.
///
/// Cheap to clone; clones share the credential store and refresh gate.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<CredentialStore>,
    /// Generation counter bumped on every successful refresh. A request
    /// that observed generation N only refreshes if the counter is still N
    /// once it holds the lock; otherwise some other request already did.
    refresh_gate: Arc<tokio::sync::Mutex<u64>>,
    config: Config,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
}

impl ApiClient {
    pub fn new(config: Config, store: Arc<CredentialStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            store,
            refresh_gate: Arc::new(tokio::sync::Mutex::new(0)),
            config,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.store
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn attempt(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let mut request = self.http.request(method, self.url(path));
        if let Some(token) = self.store.access_token()? {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Issue a request, running the one-shot refresh-and-replay dance on a
    /// 401. Any other non-success status becomes [`ApiError::Api`].
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, ApiError> {
        // Snapshot the refresh generation before the first attempt so a
        // refresh completed by another request is detectable.
        let observed = *self.refresh_gate.lock().await;

        let response = self.attempt(method.clone(), path, body.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check(response).await;
        }

        tracing::debug!(path, "request rejected with 401, refreshing credentials");
        self.refresh_credentials(observed).await?;

        let replay = self.attempt(method, path, body.as_ref()).await?;
        if replay.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        check(replay).await
    }

    /// Refresh the stored credentials, coalescing with any refresh another
    /// request already ran since `observed` was snapshotted.
    ///
    /// On success the store is overwritten; on failure it is cleared so
    /// the session reads as logged out.
    async fn refresh_credentials(&self, observed: u64) -> Result<(), ApiError> {
        let mut generation = self.refresh_gate.lock().await;
        if *generation != observed {
            // Another request refreshed while we waited; reuse its tokens.
            return Ok(());
        }

        let Some(refresh_token) = self.store.refresh_token()? else {
            self.store.clear()?;
            return Err(ApiError::Unauthorized);
        };

        let request = self
            .http
            .post(self.url("/api/auth/refresh"))
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send();

        let outcome = tokio::time::timeout(self.config.refresh_timeout, request).await;
        let response = match outcome {
            Ok(Ok(response)) if response.status().is_success() => response,
            Ok(Ok(response)) => {
                tracing::warn!(status = %response.status(), "credential refresh rejected");
                self.store.clear()?;
                return Err(ApiError::Unauthorized);
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "credential refresh failed");
                self.store.clear()?;
                return Err(ApiError::Unauthorized);
            }
            Err(_) => {
                tracing::warn!("credential refresh timed out");
                self.store.clear()?;
                return Err(ApiError::Timeout(
                    "credential refresh timed out".to_string(),
                ));
            }
        };

        let pair: TokenPair = response.json().await.map_err(ApiError::Network)?;
        self.store.store(&pair.access_token, &pair.refresh_token)?;
        *generation += 1;
        tracing::debug!("credentials refreshed");
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(Method::GET, path, None).await?;
        decode(response).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.execute(Method::POST, path, Some(body)).await?;
        decode(response).await
    }

    pub async fn patch_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        let response = self.execute(Method::PATCH, path, Some(body)).await?;
        decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(Method::DELETE, path, None).await?;
        Ok(())
    }

    /// Upload a file, the one write with an explicit per-attempt timeout
    /// and a bounded, fixed retry count (no backoff between attempts).
    pub async fn upload(
        &self,
        path: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, ApiError> {
        for attempt in 1..=self.config.upload_retries {
            let part = reqwest::multipart::Part::bytes(bytes.clone())
                .file_name(file_name.to_string());
            let form = reqwest::multipart::Form::new().part("file", part);

            let mut request = self.http.post(self.url(path)).multipart(form);
            if let Some(token) = self.store.access_token()? {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }

            match tokio::time::timeout(self.config.upload_timeout, request.send()).await {
                Ok(Ok(response)) if response.status().is_success() => {
                    return response.json().await.map_err(ApiError::Network);
                }
                Ok(Ok(response)) => return Err(api_error(response).await),
                Ok(Err(err)) => return Err(ApiError::Network(err)),
                Err(_) => {
                    tracing::warn!(attempt, "file upload timed out, retrying");
                }
            }
        }
        Err(ApiError::Timeout(format!(
            "file upload timed out after {} attempts",
            self.config.upload_retries
        )))
    }
}

/// Map a non-success status to [`ApiError::Api`], keeping the raw
/// server-provided message string when there is one.
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(error_from(status, response).await)
}

async fn api_error(response: Response) -> ApiError {
    error_from(response.status(), response).await
}

async fn error_from(status: StatusCode, response: Response) -> ApiError {
    let message = response.text().await.unwrap_or_default();
    ApiError::Api {
        status: status.as_u16(),
        message,
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = response.text().await.map_err(ApiError::Network)?;
    serde_json::from_str(&body).map_err(ApiError::Decode)
}
