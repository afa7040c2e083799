use std::sync::Arc;

use crate::cache::{QueryCache, QueryKey};
use crate::error::ApiError;
use crate::http::ApiClient;
use crate::models::{Cohort, Course};

pub fn cohorts_key() -> QueryKey {
    QueryKey::new("cohorts", "all")
}

pub fn courses_key() -> QueryKey {
    QueryKey::new("courses", "all")
}

/// Thin read hooks for the reference entities. Their lifecycle is owned
/// by registration and enrollment flows elsewhere; this client only ever
/// lists them.
#[derive(Clone)]
pub struct CatalogApi {
    client: ApiClient,
    cache: Arc<QueryCache>,
}

impl CatalogApi {
    pub fn new(client: ApiClient, cache: Arc<QueryCache>) -> Self {
        Self { client, cache }
    }

    pub async fn cohorts(&self) -> Result<Vec<Cohort>, ApiError> {
        let client = self.client.clone();
        let value = self
            .cache
            .get_with(cohorts_key(), move || {
                let client = client.clone();
                async move { client.get_json("/api/cohorts").await }
            })
            .await?;
        serde_json::from_value(value).map_err(ApiError::Decode)
    }

    pub async fn courses(&self) -> Result<Vec<Course>, ApiError> {
        let client = self.client.clone();
        let value = self
            .cache
            .get_with(courses_key(), move || {
                let client = client.clone();
                async move { client.get_json("/api/courses").await }
            })
            .await?;
        serde_json::from_value(value).map_err(ApiError::Decode)
    }
}
