use std::sync::Arc;

use serde::Serialize;

use crate::cache::{QueryCache, QueryKey};
use crate::error::ApiError;
use crate::http::ApiClient;
use crate::models::{QuizSubmission, Submission};

pub fn submissions_key(assignment_id: &str) -> QueryKey {
    QueryKey::new("assignment-submissions", assignment_id)
}

pub fn quiz_submissions_key(assignment_id: &str) -> QueryKey {
    QueryKey::new("assignment-quiz-submissions", assignment_id)
}

/// Grade and feedback for one submission. Applied in place by the
/// backend; the client never reverts a set grade to empty.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSubmission {
    pub submission_id: String,
    pub grade: u32,
    pub feedback: String,
    pub graded_by_id: String,
}

/// List/detail operations over submissions for one assignment.
#[derive(Clone)]
pub struct SubmissionsApi {
    client: ApiClient,
    cache: Arc<QueryCache>,
}

impl SubmissionsApi {
    pub fn new(client: ApiClient, cache: Arc<QueryCache>) -> Self {
        Self { client, cache }
    }

    pub async fn list_submissions(
        &self,
        assignment_id: &str,
    ) -> Result<Vec<Submission>, ApiError> {
        let client = self.client.clone();
        let path = format!("/api/assignments/{}/submissions", assignment_id);
        let value = self
            .cache
            .get_with(submissions_key(assignment_id), move || {
                let client = client.clone();
                let path = path.clone();
                async move { client.get_json(&path).await }
            })
            .await?;
        serde_json::from_value(value).map_err(ApiError::Decode)
    }

    pub async fn list_quiz_submissions(
        &self,
        assignment_id: &str,
    ) -> Result<Vec<QuizSubmission>, ApiError> {
        let client = self.client.clone();
        let path = format!("/api/assignments/{}/quiz-submissions", assignment_id);
        let value = self
            .cache
            .get_with(quiz_submissions_key(assignment_id), move || {
                let client = client.clone();
                let path = path.clone();
                async move { client.get_json(&path).await }
            })
            .await?;
        serde_json::from_value(value).map_err(ApiError::Decode)
    }

    /// Apply a grade. The server returns the updated submission and the
    /// cached list for the assignment is invalidated so dependent views
    /// re-fetch.
    pub async fn grade_submission(
        &self,
        assignment_id: &str,
        grade: GradeSubmission,
    ) -> Result<Submission, ApiError> {
        if grade.feedback.trim().is_empty() {
            tracing::debug!(submission = %grade.submission_id, "grading without feedback");
        }
        let path = format!("/api/assignments/submissions/{}/grade", grade.submission_id);
        let updated: Submission = self.client.post_json(&path, &grade).await?;
        self.cache.invalidate(&submissions_key(assignment_id));
        Ok(updated)
    }
}

/// Row shape used by the engagement table; filtering happens over these
/// three text fields.
#[derive(Debug, Clone)]
pub struct EngagementRow {
    pub title: String,
    pub module: String,
    pub week: String,
}

/// Case-insensitive substring filter, recomputed on every keystroke over
/// the already-fetched rows. Never server-side at current data volumes.
pub fn filter_engagement<'a>(rows: &'a [EngagementRow], query: &str) -> Vec<&'a EngagementRow> {
    let needle = query.to_lowercase();
    if needle.is_empty() {
        return rows.iter().collect();
    }
    rows.iter()
        .filter(|row| {
            row.title.to_lowercase().contains(&needle)
                || row.module.to_lowercase().contains(&needle)
                || row.week.to_lowercase().contains(&needle)
        })
        .collect()
}

/// Detail-view grade line, e.g. `85/100 (85%)`. `None` while the
/// submission is still pending.
pub fn grade_line(submission: &Submission, assignment_points: u32) -> Option<String> {
    let grade = submission.grade?;
    let percent = if assignment_points == 0 {
        0
    } else {
        ((grade as f64 / assignment_points as f64) * 100.0).round() as u32
    };
    Some(format!("{}/{} ({}%)", grade, assignment_points, percent))
}
