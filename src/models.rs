//! Wire entities, owned and persisted by the backend. The client only ever
//! holds transient copies of these, coherent with the query cache.
//!
//! Everything serializes camelCase to match the REST payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub materials: Vec<Material>,
    #[serde(default)]
    pub recordings: Vec<Recording>,
}

impl Topic {
    /// Sub-item count is always derived from the fetched children, never
    /// stored redundantly.
    pub fn item_count(&self) -> usize {
        self.assignments.len() + self.materials.len() + self.recordings.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentType {
    Regular,
    Quiz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    pub points: u32,
    #[serde(rename = "type")]
    pub kind: AssignmentType,
    #[serde(default)]
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: String,
    pub question: String,
    pub points: u32,
    pub options: Vec<QuizOption>,
}

impl QuizQuestion {
    /// The authored correct option, revealed in result views for missed
    /// questions.
    pub fn correct_option(&self) -> Option<&QuizOption> {
        self.options.iter().find(|opt| opt.is_correct)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizOption {
    pub id: String,
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Regular (non-quiz) submission. Created once per student per assignment;
/// grade and feedback are set in place by a later admin action and never
/// reverted to empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub student_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub grade: Option<u32>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub graded_by: Option<String>,
    #[serde(default)]
    pub graded_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn is_graded(&self) -> bool {
        self.grade.is_some()
    }
}

/// Created exactly once per (student, quiz assignment) pair and immutable
/// afterwards. Scoring is entirely server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmission {
    pub id: String,
    pub student_id: String,
    pub total_score: u32,
    pub max_score: u32,
    pub submitted_at: DateTime<Utc>,
    pub answers: Vec<QuizAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswer {
    pub question_id: String,
    pub selected_option_id: String,
    pub is_correct: bool,
    pub points_earned: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cohort {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub title: String,
}

/// Join entity resolved before topic creation; topics belong to one of
/// these, not to a cohort directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortCourse {
    pub id: String,
    pub cohort_id: String,
    pub course_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}
