use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::cache::{QueryCache, QueryKey};
use crate::error::ApiError;
use crate::http::ApiClient;
use crate::models::{CohortCourse, Topic};
use crate::quiz::QuizDraft;

pub fn topics_key(cohort_id: &str) -> QueryKey {
    QueryKey::new("classroom-topics", cohort_id)
}

pub fn cohort_course_key(cohort_id: &str) -> QueryKey {
    QueryKey::new("cohort-course", cohort_id)
}

#[derive(Debug, Clone, Default)]
pub struct NewTopic {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTopicRequest {
    title: String,
    description: String,
    is_pinned: bool,
    cohort_course_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchTopicsRequest {
    title: String,
    description: String,
    is_pinned: bool,
    cohort_course_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchTopicsResponse {
    created: u32,
    failed: u32,
}

/// Outcome of a batch topic creation: the server's per-cohort counts plus
/// the cohorts this client dropped because their cohort-course lookup
/// failed.
#[derive(Debug, Clone)]
pub struct BatchTopicsOutcome {
    pub created: u32,
    pub failed: u32,
    pub skipped_cohorts: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PinTopicRequest {
    is_pinned: bool,
}

/// Sub-item of a topic, discriminated by kind. Materials and recordings
/// are plain links; an assignment may additionally carry a validated quiz
/// draft, which routes it through the quiz-creation endpoint.
#[derive(Debug, Clone)]
pub enum NewItem {
    Assignment(NewAssignment),
    Material(NewMaterial),
    Recording(NewRecording),
}

#[derive(Debug, Clone, Default)]
pub struct NewAssignment {
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub points: u32,
    pub quiz: Option<QuizDraft>,
}

#[derive(Debug, Clone, Default)]
pub struct NewMaterial {
    pub title: String,
    pub description: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewRecording {
    pub title: String,
    pub url: String,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl NewItem {
    pub fn title(&self) -> &str {
        match self {
            NewItem::Assignment(a) => &a.title,
            NewItem::Material(m) => &m.title,
            NewItem::Recording(r) => &r.title,
        }
    }

    fn validate(&self) -> Result<(), ApiError> {
        if self.title().trim().is_empty() {
            return Err(ApiError::Validation("title is required".to_string()));
        }
        Ok(())
    }
}

/// Wire shape of a non-quiz item, tagged by kind.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ItemPayload {
    #[serde(rename_all = "camelCase")]
    Assignment {
        title: String,
        description: Option<String>,
        instructions: Option<String>,
        due_date: Option<DateTime<Utc>>,
        points: u32,
    },
    #[serde(rename_all = "camelCase")]
    Material {
        title: String,
        description: Option<String>,
        url: String,
    },
    #[serde(rename_all = "camelCase")]
    Recording {
        title: String,
        url: String,
        recorded_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateItemRequest {
    topic_id: String,
    #[serde(flatten)]
    item: ItemPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateQuizRequest {
    topic_id: String,
    title: String,
    description: Option<String>,
    instructions: Option<String>,
    due_date: Option<DateTime<Utc>>,
    points: u32,
    questions: QuizDraft,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchItemsRequest {
    topic_ids: Vec<String>,
    #[serde(flatten)]
    item: ItemPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    quiz: Option<QuizDraft>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchItemsResponse {
    created: u32,
}

fn split_item(item: NewItem) -> (ItemPayload, Option<QuizDraft>) {
    match item {
        NewItem::Assignment(a) => {
            let quiz = a.quiz;
            // In quiz mode the points always come from the questions.
            let points = quiz
                .as_ref()
                .map(|q| q.total_points())
                .unwrap_or(a.points);
            (
                ItemPayload::Assignment {
                    title: a.title,
                    description: a.description,
                    instructions: a.instructions,
                    due_date: a.due_date,
                    points,
                },
                quiz,
            )
        }
        NewItem::Material(m) => (
            ItemPayload::Material {
                title: m.title,
                description: m.description,
                url: m.url,
            },
            None,
        ),
        NewItem::Recording(r) => (
            ItemPayload::Recording {
                title: r.title,
                url: r.url,
                recorded_at: r.recorded_at,
            },
            None,
        ),
    }
}

/// The cohort's classroom content tree: topics and their sub-items, with
/// the create/pin/delete operations and the batch fan-out flows.
#[derive(Clone)]
pub struct ClassroomApi {
    client: ApiClient,
    cache: Arc<QueryCache>,
}

impl ClassroomApi {
    pub fn new(client: ApiClient, cache: Arc<QueryCache>) -> Self {
        Self { client, cache }
    }

    /// Cohort-course context for a cohort, cached.
    pub async fn cohort_course(&self, cohort_id: &str) -> Result<CohortCourse, ApiError> {
        let client = self.client.clone();
        let path = format!("/api/classroom/{}", cohort_id);
        let value = self
            .cache
            .get_with(cohort_course_key(cohort_id), move || {
                let client = client.clone();
                let path = path.clone();
                async move { client.get_json(&path).await }
            })
            .await?;
        serde_json::from_value(value).map_err(ApiError::Decode)
    }

    /// Topic list for a cohort, cached.
    pub async fn topics(&self, cohort_id: &str) -> Result<Vec<Topic>, ApiError> {
        let client = self.client.clone();
        let path = format!("/api/classroom/{}/topics", cohort_id);
        let value = self
            .cache
            .get_with(topics_key(cohort_id), move || {
                let client = client.clone();
                let path = path.clone();
                async move { client.get_json(&path).await }
            })
            .await?;
        serde_json::from_value(value).map_err(ApiError::Decode)
    }

    /// Create one topic. The owning cohort-course id is resolved first;
    /// on success the cohort's topic list is invalidated.
    pub async fn create_topic(&self, cohort_id: &str, topic: NewTopic) -> Result<Topic, ApiError> {
        if topic.title.trim().is_empty() {
            return Err(ApiError::Validation("title is required".to_string()));
        }
        let cohort_course = self.cohort_course(cohort_id).await?;
        let request = CreateTopicRequest {
            title: topic.title,
            description: topic.description.unwrap_or_default(),
            is_pinned: false,
            cohort_course_id: cohort_course.id,
        };
        let created: Topic = self
            .client
            .post_json("/api/classroom/topics", &request)
            .await?;
        self.cache.invalidate(&topics_key(cohort_id));
        Ok(created)
    }

    /// Create the same topic across several cohorts. Each cohort's
    /// cohort-course id is resolved in parallel; cohorts whose lookup
    /// fails are dropped from the batch and reported back in the outcome.
    pub async fn batch_create_topics(
        &self,
        cohort_ids: &[String],
        topic: NewTopic,
    ) -> Result<BatchTopicsOutcome, ApiError> {
        if topic.title.trim().is_empty() {
            return Err(ApiError::Validation("title is required".to_string()));
        }
        if cohort_ids.is_empty() {
            return Err(ApiError::Validation("select at least one cohort".to_string()));
        }

        let mut lookups = JoinSet::new();
        for cohort_id in cohort_ids {
            let client = self.client.clone();
            let cohort_id = cohort_id.clone();
            lookups.spawn(async move {
                let path = format!("/api/classroom/{}", cohort_id);
                let result: Result<CohortCourse, ApiError> = client.get_json(&path).await;
                (cohort_id, result)
            });
        }

        let mut cohort_course_ids = Vec::new();
        let mut skipped = Vec::new();
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((_, Ok(cohort_course))) => cohort_course_ids.push(cohort_course.id),
                Ok((cohort_id, Err(err))) => {
                    tracing::warn!(cohort = %cohort_id, error = %err, "cohort-course lookup failed, dropping cohort from batch");
                    skipped.push(cohort_id);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "cohort-course lookup task panicked");
                }
            }
        }

        if cohort_course_ids.is_empty() {
            return Err(ApiError::Validation(
                "none of the selected cohorts could be resolved".to_string(),
            ));
        }

        let request = BatchTopicsRequest {
            title: topic.title,
            description: topic.description.unwrap_or_default(),
            is_pinned: false,
            cohort_course_ids,
        };
        let response: BatchTopicsResponse = self
            .client
            .post_json("/api/classroom/batch/topics", &request)
            .await?;

        for cohort_id in cohort_ids {
            self.cache.invalidate(&topics_key(cohort_id));
        }
        Ok(BatchTopicsOutcome {
            created: response.created,
            failed: response.failed,
            skipped_cohorts: skipped,
        })
    }

    pub async fn set_topic_pinned(
        &self,
        cohort_id: &str,
        topic_id: &str,
        pinned: bool,
    ) -> Result<Topic, ApiError> {
        let path = format!("/api/classroom/topics/{}", topic_id);
        let updated: Topic = self
            .client
            .patch_json(&path, &PinTopicRequest { is_pinned: pinned })
            .await?;
        self.cache.invalidate(&topics_key(cohort_id));
        Ok(updated)
    }

    /// Immediate, not undoable. The backend cascades the delete to the
    /// topic's sub-items.
    pub async fn delete_topic(&self, cohort_id: &str, topic_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/classroom/topics/{}", topic_id);
        self.client.delete(&path).await?;
        self.cache.invalidate(&topics_key(cohort_id));
        Ok(())
    }

    /// Create one sub-item under a topic. Quiz assignments route through
    /// the dedicated quiz-creation endpoint.
    pub async fn create_item(
        &self,
        cohort_id: &str,
        topic_id: &str,
        item: NewItem,
    ) -> Result<(), ApiError> {
        item.validate()?;
        match item {
            NewItem::Assignment(NewAssignment {
                title,
                description,
                instructions,
                due_date,
                quiz: Some(quiz),
                // points come from the questions in quiz mode
                points: _,
            }) => {
                let request = CreateQuizRequest {
                    topic_id: topic_id.to_string(),
                    title,
                    description,
                    instructions,
                    due_date,
                    points: quiz.total_points(),
                    questions: quiz,
                };
                let _: serde_json::Value = self
                    .client
                    .post_json("/api/assignments/create-quiz", &request)
                    .await?;
            }
            other => {
                let (payload, _) = split_item(other);
                let request = CreateItemRequest {
                    topic_id: topic_id.to_string(),
                    item: payload,
                };
                let _: serde_json::Value = self
                    .client
                    .post_json("/api/classroom/items", &request)
                    .await?;
            }
        }
        self.cache.invalidate(&topics_key(cohort_id));
        Ok(())
    }

    /// Fan one item out to all selected topics in a single call; returns
    /// the server's aggregate success count. Every cached topic list is
    /// invalidated since the touched topics span cohorts.
    pub async fn batch_create_items(
        &self,
        topic_ids: &[String],
        item: NewItem,
    ) -> Result<u32, ApiError> {
        item.validate()?;
        if topic_ids.is_empty() {
            return Err(ApiError::Validation("select at least one topic".to_string()));
        }
        let (payload, quiz) = split_item(item);
        let request = BatchItemsRequest {
            topic_ids: topic_ids.to_vec(),
            item: payload,
            quiz,
        };
        let response: BatchItemsResponse = self
            .client
            .post_json("/api/classroom/batch/items", &request)
            .await?;
        self.cache.invalidate_resource("classroom-topics");
        Ok(response.created)
    }

    /// Immediate, not undoable.
    pub async fn delete_item(&self, cohort_id: &str, item_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/classroom/items/{}", item_id);
        self.client.delete(&path).await?;
        self.cache.invalidate(&topics_key(cohort_id));
        Ok(())
    }
}

/// Step of the batch add-item wizard. Forward-only, one back transition,
/// no skip-ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    SelectCohorts,
    SelectTopics,
    AddItem,
}

/// Selection state for the three-step batch flow. Dropping the wizard
/// discards all selections; nothing persists across reopen.
#[derive(Debug)]
pub struct BatchWizard {
    step: WizardStep,
    cohorts: Vec<String>,
    topics: Vec<String>,
}

impl BatchWizard {
    pub fn new() -> Self {
        Self {
            step: WizardStep::SelectCohorts,
            cohorts: Vec::new(),
            topics: Vec::new(),
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn select_cohorts(&mut self, cohort_ids: Vec<String>) -> Result<(), ApiError> {
        if self.step != WizardStep::SelectCohorts {
            return Err(ApiError::Validation("not selecting cohorts".to_string()));
        }
        if cohort_ids.is_empty() {
            return Err(ApiError::Validation("select at least one cohort".to_string()));
        }
        self.cohorts = cohort_ids;
        self.step = WizardStep::SelectTopics;
        Ok(())
    }

    pub fn select_topics(&mut self, topic_ids: Vec<String>) -> Result<(), ApiError> {
        if self.step != WizardStep::SelectTopics {
            return Err(ApiError::Validation("not selecting topics".to_string()));
        }
        if topic_ids.is_empty() {
            return Err(ApiError::Validation("select at least one topic".to_string()));
        }
        self.topics = topic_ids;
        self.step = WizardStep::AddItem;
        Ok(())
    }

    /// One step back. Selections made at the abandoned step are dropped.
    pub fn back(&mut self) {
        self.step = match self.step {
            WizardStep::SelectCohorts => WizardStep::SelectCohorts,
            WizardStep::SelectTopics => {
                self.topics.clear();
                WizardStep::SelectCohorts
            }
            WizardStep::AddItem => WizardStep::SelectTopics,
        };
    }

    pub fn selected_cohorts(&self) -> &[String] {
        &self.cohorts
    }

    /// Topics the item will fan out to. Only available at the final step.
    pub fn selected_topics(&self) -> Result<&[String], ApiError> {
        if self.step != WizardStep::AddItem {
            return Err(ApiError::Validation(
                "finish selecting topics first".to_string(),
            ));
        }
        Ok(&self.topics)
    }
}

impl Default for BatchWizard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wizard_walks_forward_in_order() {
        let mut wizard = BatchWizard::new();
        assert_eq!(wizard.step(), WizardStep::SelectCohorts);

        wizard.select_cohorts(vec!["c-1".to_string()]).unwrap();
        assert_eq!(wizard.step(), WizardStep::SelectTopics);

        wizard.select_topics(vec!["t-1".to_string(), "t-2".to_string()]).unwrap();
        assert_eq!(wizard.step(), WizardStep::AddItem);
        assert_eq!(wizard.selected_topics().unwrap().len(), 2);
    }

    #[test]
    fn wizard_rejects_skip_ahead() {
        let mut wizard = BatchWizard::new();
        assert!(wizard.select_topics(vec!["t-1".to_string()]).is_err());
        assert!(wizard.selected_topics().is_err());
    }

    #[test]
    fn wizard_rejects_empty_selections() {
        let mut wizard = BatchWizard::new();
        assert!(wizard.select_cohorts(Vec::new()).is_err());
        assert_eq!(wizard.step(), WizardStep::SelectCohorts);
    }

    #[test]
    fn back_steps_to_the_previous_step_only() {
        let mut wizard = BatchWizard::new();
        wizard.select_cohorts(vec!["c-1".to_string()]).unwrap();
        wizard.select_topics(vec!["t-1".to_string()]).unwrap();

        wizard.back();
        assert_eq!(wizard.step(), WizardStep::SelectTopics);
        wizard.back();
        assert_eq!(wizard.step(), WizardStep::SelectCohorts);
        wizard.back();
        assert_eq!(wizard.step(), WizardStep::SelectCohorts);
    }

    #[test]
    fn item_validation_requires_a_title() {
        let item = NewItem::Material(NewMaterial {
            title: "  ".to_string(),
            description: None,
            url: "https://example.com/slides.pdf".to_string(),
        });
        assert!(item.validate().is_err());
    }
}
