use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::forms::{ChangeRequestForm, SignupForm};
use crate::http::ApiClient;
use crate::models::User;

/// Explicit, passed-down session handle. There is no ambient auth state:
/// whoever needs the current user or the login/logout operations receives
/// a clone of this and threads it through composition.
#[derive(Clone)]
pub struct Session {
    client: ApiClient,
    user: Arc<RwLock<Option<User>>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    user: User,
}

impl Session {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            user: Arc::new(RwLock::new(None)),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn current_user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let response: LoginResponse = self
            .client
            .post_json("/api/auth/login", &LoginRequest { email, password })
            .await?;
        self.client
            .credentials()
            .store(&response.access_token, &response.refresh_token)?;
        *self.user.write() = Some(response.user.clone());
        tracing::info!(user = %response.user.email, "logged in");
        Ok(response.user)
    }

    /// Drop stored credentials and the cached user. Local only; the
    /// backend invalidates refresh tokens on its own schedule.
    pub fn logout(&self) -> Result<(), ApiError> {
        self.client.credentials().clear()?;
        *self.user.write() = None;
        tracing::info!("logged out");
        Ok(())
    }

    /// Re-read the authenticated user from the backend.
    pub async fn refetch(&self) -> Result<User, ApiError> {
        let user: User = self.client.get_json("/api/auth/me").await?;
        *self.user.write() = Some(user.clone());
        Ok(user)
    }

    pub async fn signup(&self, form: SignupForm) -> Result<User, ApiError> {
        let request = form.into_request()?;
        let response: LoginResponse = self.client.post_json("/api/auth/signup", &request).await?;
        self.client
            .credentials()
            .store(&response.access_token, &response.refresh_token)?;
        *self.user.write() = Some(response.user.clone());
        Ok(response.user)
    }

    /// Submit a validated course-change request.
    pub async fn request_course_change(&self, form: ChangeRequestForm) -> Result<(), ApiError> {
        let request = form.into_request()?;
        let _: serde_json::Value = self
            .client
            .post_json("/api/courses/change-requests", &request)
            .await?;
        Ok(())
    }
}
