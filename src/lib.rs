//! Async client for the ClassHub e-learning platform REST API.
//!
//! The backend owns every business rule (grading, access control, cohort
//! and course integrity); this crate is the orchestration layer in front
//! of it: an authenticated HTTP client with a one-shot credential
//! refresh, a keyed query cache with single-flight de-duplication and
//! observable invalidation, and typed wrappers for the classroom content
//! tree, quiz authoring/taking, and submission grading flows.
//!
//! The usual shape of a flow: read through [`cache::QueryCache`], render,
//! mutate through [`http::ApiClient`], invalidate the affected keys, let
//! subscribed views re-read.

pub mod cache;
pub mod catalog;
pub mod classroom;
pub mod config;
pub mod credentials;
pub mod error;
pub mod forms;
pub mod http;
pub mod logger;
pub mod models;
pub mod quiz;
pub mod session;
pub mod submissions;

pub use cache::{QueryCache, QueryKey};
pub use catalog::CatalogApi;
pub use classroom::{BatchWizard, ClassroomApi, NewItem, NewTopic, WizardStep};
pub use config::Config;
pub use credentials::CredentialStore;
pub use error::ApiError;
pub use http::ApiClient;
pub use quiz::{MinQuestions, QuizApi, QuizBuilder, QuizSession};
pub use session::Session;
pub use submissions::{GradeSubmission, SubmissionsApi};
