use std::sync::Arc;

use serde::Serialize;

use crate::cache::QueryCache;
use crate::error::ApiError;
use crate::http::ApiClient;
use crate::models::{Assignment, AssignmentType, QuizQuestion, QuizSubmission};
use crate::submissions::{quiz_submissions_key, SubmissionsApi};

pub const OPTIONS_PER_QUESTION: usize = 4;
const DEFAULT_QUESTION_POINTS: u32 = 1;

/// Policy for removing questions while authoring. The two observed
/// behaviors; which applies is the caller's choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinQuestions {
    /// Removal is blocked once a single question remains.
    #[default]
    KeepOne,
    /// Removal is always permitted; validation still refuses to submit an
    /// empty quiz.
    AllowEmpty,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionDraft {
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub question: String,
    pub points: u32,
    pub options: Vec<OptionDraft>,
}

impl QuestionDraft {
    fn new() -> Self {
        Self {
            question: String::new(),
            points: DEFAULT_QUESTION_POINTS,
            options: vec![OptionDraft::default(); OPTIONS_PER_QUESTION],
        }
    }

    /// Mark one option correct, clearing the others. Mutual exclusion is
    /// structural: there is no way to mark two at once.
    pub fn mark_correct(&mut self, index: usize) {
        for (i, option) in self.options.iter_mut().enumerate() {
            option.is_correct = i == index;
        }
    }
}

/// Validated set of quiz questions, ready to be sent. Obtained through
/// [`QuizBuilder::build`], which is the only constructor.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct QuizDraft {
    questions: Vec<QuestionDraft>,
}

impl QuizDraft {
    pub fn questions(&self) -> &[QuestionDraft] {
        &self.questions
    }

    pub fn total_points(&self) -> u32 {
        self.questions.iter().map(|q| q.points).sum()
    }
}

/// Quiz authoring state. An ordered list of questions, each with exactly
/// four free-text options and one marked correct.
#[derive(Debug, Clone)]
pub struct QuizBuilder {
    questions: Vec<QuestionDraft>,
    policy: MinQuestions,
}

impl QuizBuilder {
    pub fn new(policy: MinQuestions) -> Self {
        Self {
            questions: vec![QuestionDraft::new()],
            policy,
        }
    }

    pub fn questions(&self) -> &[QuestionDraft] {
        &self.questions
    }

    pub fn add_question(&mut self) -> &mut QuestionDraft {
        self.questions.push(QuestionDraft::new());
        let last = self.questions.len() - 1;
        &mut self.questions[last]
    }

    pub fn question_mut(&mut self, index: usize) -> Option<&mut QuestionDraft> {
        self.questions.get_mut(index)
    }

    pub fn remove_question(&mut self, index: usize) -> Result<(), ApiError> {
        if index >= self.questions.len() {
            return Err(ApiError::Validation("no such question".to_string()));
        }
        if self.policy == MinQuestions::KeepOne && self.questions.len() <= 1 {
            return Err(ApiError::Validation(
                "a quiz must keep at least one question".to_string(),
            ));
        }
        self.questions.remove(index);
        Ok(())
    }

    pub fn total_points(&self) -> u32 {
        self.questions.iter().map(|q| q.points).sum()
    }

    /// Authoring invariants, checked before anything leaves the client:
    /// at least one question, no empty question or option text, exactly
    /// one marked-correct option per question.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.questions.is_empty() {
            errors.push("add at least one question".to_string());
        }
        for (i, question) in self.questions.iter().enumerate() {
            let n = i + 1;
            if question.question.trim().is_empty() {
                errors.push(format!("question {} needs text", n));
            }
            if question.options.iter().any(|o| o.text.trim().is_empty()) {
                errors.push(format!("question {} has an empty option", n));
            }
            let correct = question.options.iter().filter(|o| o.is_correct).count();
            if correct != 1 {
                errors.push(format!(
                    "question {} must have exactly one correct option",
                    n
                ));
            }
        }
        errors
    }

    pub fn build(self) -> Result<QuizDraft, ApiError> {
        let errors = self.validate();
        if let Some(first) = errors.into_iter().next() {
            return Err(ApiError::Validation(first));
        }
        Ok(QuizDraft {
            questions: self.questions,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitQuizRequest {
    answers: Vec<SubmitAnswer>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitAnswer {
    question_id: String,
    selected_option_id: String,
}

/// Read-only view of a submitted quiz: score plus per-question outcome,
/// with the correct answer revealed for missed questions.
#[derive(Debug, Clone)]
pub struct QuizResult {
    pub total_score: u32,
    pub max_score: u32,
    pub questions: Vec<QuestionResult>,
}

#[derive(Debug, Clone)]
pub struct QuestionResult {
    pub question_id: String,
    pub question: String,
    pub selected_option_id: Option<String>,
    pub is_correct: bool,
    pub points_earned: u32,
    /// Present only when the question was missed.
    pub revealed_correct_option_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    AwaitingConfirmation,
    Submitted,
}

/// Student-side quiz flow: one question at a time, forward navigation
/// gated on the current answer, a free-jump navigator grid, and a single,
/// confirmed, irreversible submission.
#[derive(Debug)]
pub struct QuizSession {
    assignment_id: String,
    questions: Vec<QuizQuestion>,
    answers: Vec<Option<String>>,
    current: usize,
    state: SessionState,
    result: Option<QuizResult>,
}

impl QuizSession {
    fn new(assignment: &Assignment) -> Result<Self, ApiError> {
        if assignment.kind != AssignmentType::Quiz {
            return Err(ApiError::Validation(
                "assignment is not a quiz".to_string(),
            ));
        }
        if assignment.questions.is_empty() {
            return Err(ApiError::Validation("quiz has no questions".to_string()));
        }
        Ok(Self {
            assignment_id: assignment.id.clone(),
            answers: vec![None; assignment.questions.len()],
            questions: assignment.questions.clone(),
            current: 0,
            state: SessionState::Active,
            result: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Progress indicator, 1-based: `(current, total)`.
    pub fn progress(&self) -> (usize, usize) {
        (self.current + 1, self.questions.len())
    }

    pub fn current_question(&self) -> &QuizQuestion {
        &self.questions[self.current]
    }

    fn ensure_active(&self) -> Result<(), ApiError> {
        match self.state {
            SessionState::Submitted => Err(ApiError::Validation(
                "quiz already submitted".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn select(&mut self, option_id: &str) -> Result<(), ApiError> {
        self.ensure_active()?;
        let question = &self.questions[self.current];
        if !question.options.iter().any(|o| o.id == option_id) {
            return Err(ApiError::Validation(
                "option does not belong to this question".to_string(),
            ));
        }
        self.answers[self.current] = Some(option_id.to_string());
        Ok(())
    }

    pub fn can_advance(&self) -> bool {
        self.answers[self.current].is_some() && self.current + 1 < self.questions.len()
    }

    /// Move to the next question. Blocked until the current question has
    /// a selection.
    pub fn advance(&mut self) -> Result<(), ApiError> {
        self.ensure_active()?;
        if self.answers[self.current].is_none() {
            return Err(ApiError::Validation(
                "answer the current question first".to_string(),
            ));
        }
        if self.current + 1 >= self.questions.len() {
            return Err(ApiError::Validation("already at the last question".to_string()));
        }
        self.current += 1;
        Ok(())
    }

    /// Direct jump through the navigator grid. No answered-first gate.
    pub fn jump(&mut self, index: usize) -> Result<(), ApiError> {
        self.ensure_active()?;
        if index >= self.questions.len() {
            return Err(ApiError::Validation("no such question".to_string()));
        }
        self.current = index;
        Ok(())
    }

    pub fn all_answered(&self) -> bool {
        self.answers.iter().all(Option::is_some)
    }

    /// First half of the explicit confirmation step.
    pub fn request_submit(&mut self) -> Result<(), ApiError> {
        self.ensure_active()?;
        if !self.all_answered() {
            return Err(ApiError::Validation(
                "answer every question before submitting".to_string(),
            ));
        }
        self.state = SessionState::AwaitingConfirmation;
        Ok(())
    }

    pub fn cancel_submit(&mut self) -> Result<(), ApiError> {
        self.ensure_active()?;
        self.state = SessionState::Active;
        Ok(())
    }

    fn answer_payload(&self) -> Result<Vec<SubmitAnswer>, ApiError> {
        if self.state != SessionState::AwaitingConfirmation {
            return Err(ApiError::Validation(
                "submission requires explicit confirmation".to_string(),
            ));
        }
        self.questions
            .iter()
            .zip(&self.answers)
            .map(|(question, answer)| {
                let selected = answer.clone().ok_or_else(|| {
                    ApiError::Validation("answer every question before submitting".to_string())
                })?;
                Ok(SubmitAnswer {
                    question_id: question.id.clone(),
                    selected_option_id: selected,
                })
            })
            .collect()
    }

    fn complete(&mut self, submission: QuizSubmission) {
        let questions = self
            .questions
            .iter()
            .map(|question| {
                let answer = submission
                    .answers
                    .iter()
                    .find(|a| a.question_id == question.id);
                let is_correct = answer.map(|a| a.is_correct).unwrap_or(false);
                QuestionResult {
                    question_id: question.id.clone(),
                    question: question.question.clone(),
                    selected_option_id: answer.map(|a| a.selected_option_id.clone()),
                    is_correct,
                    points_earned: answer.map(|a| a.points_earned).unwrap_or(0),
                    revealed_correct_option_id: if is_correct {
                        None
                    } else {
                        question.correct_option().map(|o| o.id.clone())
                    },
                }
            })
            .collect();
        self.result = Some(QuizResult {
            total_score: submission.total_score,
            max_score: submission.max_score,
            questions,
        });
        self.state = SessionState::Submitted;
    }

    pub fn result(&self) -> Option<&QuizResult> {
        self.result.as_ref()
    }
}

/// Quiz-taking operations against the backend. Scoring happens entirely
/// server-side; the client only relays answers and renders what comes
/// back.
#[derive(Clone)]
pub struct QuizApi {
    client: ApiClient,
    cache: Arc<QueryCache>,
    submissions: SubmissionsApi,
}

impl QuizApi {
    pub fn new(client: ApiClient, cache: Arc<QueryCache>) -> Self {
        let submissions = SubmissionsApi::new(client.clone(), cache.clone());
        Self {
            client,
            cache,
            submissions,
        }
    }

    pub async fn existing_submission(
        &self,
        assignment_id: &str,
        student_id: &str,
    ) -> Result<Option<QuizSubmission>, ApiError> {
        let submissions = self.submissions.list_quiz_submissions(assignment_id).await?;
        Ok(submissions
            .into_iter()
            .find(|s| s.student_id == student_id))
    }

    /// Open a taking session, refusing when a submission for this
    /// (student, assignment) pair already exists.
    pub async fn start(
        &self,
        assignment: &Assignment,
        student_id: &str,
    ) -> Result<QuizSession, ApiError> {
        if let Some(existing) = self.existing_submission(&assignment.id, student_id).await? {
            tracing::debug!(
                assignment = %assignment.id,
                submitted_at = %existing.submitted_at,
                "refusing to reopen a submitted quiz"
            );
            return Err(ApiError::Validation(
                "this quiz was already submitted".to_string(),
            ));
        }
        QuizSession::new(assignment)
    }

    /// Send the confirmed answers. On success the session flips to its
    /// permanent read-only result state and the submissions list for this
    /// assignment is invalidated.
    pub async fn submit(&self, session: &mut QuizSession) -> Result<(), ApiError> {
        let answers = session.answer_payload()?;
        let path = format!("/api/assignments/{}/submit", session.assignment_id);
        let submission: QuizSubmission = self
            .client
            .post_json(&path, &SubmitQuizRequest { answers })
            .await?;
        self.cache
            .invalidate(&quiz_submissions_key(&session.assignment_id));
        session.complete(submission);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuizAnswer, QuizOption};
    use chrono::Utc;

    fn filled_builder() -> QuizBuilder {
        let mut builder = QuizBuilder::new(MinQuestions::KeepOne);
        let q = builder.question_mut(0).unwrap();
        q.question = "What is 2 + 2?".to_string();
        for (i, opt) in q.options.iter_mut().enumerate() {
            opt.text = format!("answer {}", i);
        }
        q.mark_correct(1);
        builder
    }

    #[test]
    fn new_question_defaults_to_one_point_and_four_options() {
        let builder = QuizBuilder::new(MinQuestions::KeepOne);
        let q = &builder.questions()[0];
        assert_eq!(q.points, 1);
        assert_eq!(q.options.len(), OPTIONS_PER_QUESTION);
    }

    #[test]
    fn validation_requires_exactly_one_correct_option() {
        let mut builder = filled_builder();
        builder.question_mut(0).unwrap().options[3].is_correct = true;
        assert!(builder
            .validate()
            .iter()
            .any(|e| e.contains("exactly one correct")));

        let mut builder = filled_builder();
        for opt in &mut builder.question_mut(0).unwrap().options {
            opt.is_correct = false;
        }
        assert_eq!(builder.validate().len(), 1);
    }

    #[test]
    fn validation_rejects_empty_texts() {
        let mut builder = filled_builder();
        builder.question_mut(0).unwrap().question = "  ".to_string();
        builder.question_mut(0).unwrap().options[2].text = String::new();
        let errors = builder.validate();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn mark_correct_is_mutually_exclusive() {
        let mut builder = filled_builder();
        let q = builder.question_mut(0).unwrap();
        q.mark_correct(3);
        let correct: Vec<_> = q
            .options
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_correct)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(correct, vec![3]);
    }

    #[test]
    fn keep_one_policy_blocks_removing_the_last_question() {
        let mut builder = filled_builder();
        assert!(builder.remove_question(0).is_err());

        builder.add_question();
        assert!(builder.remove_question(1).is_ok());
    }

    #[test]
    fn allow_empty_policy_permits_removing_everything() {
        let mut builder = QuizBuilder::new(MinQuestions::AllowEmpty);
        assert!(builder.remove_question(0).is_ok());
        assert!(builder.questions().is_empty());
        assert!(builder.build().is_err());
    }

    #[test]
    fn total_points_is_the_sum_of_question_points() {
        let mut builder = filled_builder();
        builder.question_mut(0).unwrap().points = 3;
        let q = builder.add_question();
        q.points = 5;
        assert_eq!(builder.total_points(), 8);
    }

    fn quiz_assignment() -> Assignment {
        let question = |id: &str| QuizQuestion {
            id: id.to_string(),
            question: format!("question {}", id),
            points: 1,
            options: (0..4)
                .map(|i| QuizOption {
                    id: format!("{}-opt-{}", id, i),
                    text: format!("option {}", i),
                    is_correct: i == 0,
                })
                .collect(),
        };
        Assignment {
            id: "a-1".to_string(),
            title: "Quiz".to_string(),
            description: None,
            instructions: None,
            due_date: None,
            points: 2,
            kind: AssignmentType::Quiz,
            questions: vec![question("q1"), question("q2")],
        }
    }

    #[test]
    fn advance_is_gated_on_an_answer_but_jump_is_not() {
        let mut session = QuizSession::new(&quiz_assignment()).unwrap();
        assert_eq!(session.progress(), (1, 2));
        assert!(!session.can_advance());
        assert!(session.advance().is_err());

        session.jump(1).unwrap();
        assert_eq!(session.progress(), (2, 2));
        session.jump(0).unwrap();

        session.select("q1-opt-2").unwrap();
        assert!(session.can_advance());
        session.advance().unwrap();
        assert_eq!(session.progress(), (2, 2));
    }

    #[test]
    fn submit_requires_all_answers_and_confirmation() {
        let mut session = QuizSession::new(&quiz_assignment()).unwrap();
        session.select("q1-opt-0").unwrap();
        assert!(session.request_submit().is_err());

        session.jump(1).unwrap();
        session.select("q2-opt-1").unwrap();
        assert!(session.answer_payload().is_err());

        session.request_submit().unwrap();
        assert_eq!(session.state(), SessionState::AwaitingConfirmation);
        assert_eq!(session.answer_payload().unwrap().len(), 2);
    }

    #[test]
    fn completed_session_is_read_only_and_reveals_missed_answers() {
        let mut session = QuizSession::new(&quiz_assignment()).unwrap();
        session.select("q1-opt-0").unwrap();
        session.jump(1).unwrap();
        session.select("q2-opt-1").unwrap();
        session.request_submit().unwrap();

        session.complete(QuizSubmission {
            id: "qs-1".to_string(),
            student_id: "s-1".to_string(),
            total_score: 1,
            max_score: 2,
            submitted_at: Utc::now(),
            answers: vec![
                QuizAnswer {
                    question_id: "q1".to_string(),
                    selected_option_id: "q1-opt-0".to_string(),
                    is_correct: true,
                    points_earned: 1,
                },
                QuizAnswer {
                    question_id: "q2".to_string(),
                    selected_option_id: "q2-opt-1".to_string(),
                    is_correct: false,
                    points_earned: 0,
                },
            ],
        });

        assert_eq!(session.state(), SessionState::Submitted);
        assert!(session.select("q1-opt-1").is_err());
        assert!(session.jump(0).is_err());

        let result = session.result().unwrap();
        assert_eq!(result.total_score, 1);
        assert_eq!(result.questions[0].revealed_correct_option_id, None);
        assert_eq!(
            result.questions[1].revealed_correct_option_id.as_deref(),
            Some("q2-opt-0")
        );
    }

    #[test]
    fn wrong_option_for_current_question_is_rejected() {
        let mut session = QuizSession::new(&quiz_assignment()).unwrap();
        assert!(session.select("q2-opt-0").is_err());
    }
}
