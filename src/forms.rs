use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::ApiError;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

const MIN_PASSWORD_LEN: usize = 8;
const MIN_REASON_LEN: usize = 10;

/// One failed field check, addressed to the field that caused it so the
/// view can render it inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

fn into_validation_error(errors: Vec<FieldError>) -> ApiError {
    let joined = errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ");
    ApiError::Validation(joined)
}

#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl SignupForm {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "name is required"));
        }
        if !EMAIL_RE.is_match(self.email.trim()) {
            errors.push(FieldError::new("email", "enter a valid email address"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.push(FieldError::new(
                "password",
                format!("password must be at least {} characters", MIN_PASSWORD_LEN),
            ));
        }
        if self.password != self.confirm_password {
            errors.push(FieldError::new("confirmPassword", "passwords do not match"));
        }
        errors
    }

    pub fn into_request(self) -> Result<SignupRequest, ApiError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(into_validation_error(errors));
        }
        Ok(SignupRequest {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password,
        })
    }
}

/// Request to switch courses. The reason must carry some substance, hence
/// the minimum length.
#[derive(Debug, Clone, Default)]
pub struct ChangeRequestForm {
    pub course_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub course_id: String,
    pub reason: String,
}

impl ChangeRequestForm {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.course_id.trim().is_empty() {
            errors.push(FieldError::new("courseId", "select a course"));
        }
        if self.reason.trim().chars().count() < MIN_REASON_LEN {
            errors.push(FieldError::new(
                "reason",
                format!("reason must be at least {} characters", MIN_REASON_LEN),
            ));
        }
        errors
    }

    pub fn into_request(self) -> Result<ChangeRequest, ApiError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(into_validation_error(errors));
        }
        Ok(ChangeRequest {
            course_id: self.course_id,
            reason: self.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup() -> SignupForm {
        SignupForm {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "correcthorse".to_string(),
            confirm_password: "correcthorse".to_string(),
        }
    }

    #[test]
    fn valid_signup_passes() {
        assert!(signup().validate().is_empty());
    }

    #[test]
    fn signup_rejects_bad_email_and_short_password() {
        let form = SignupForm {
            email: "not-an-email".to_string(),
            password: "short".to_string(),
            confirm_password: "short".to_string(),
            ..signup()
        };
        let fields: Vec<_> = form.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"password"));
    }

    #[test]
    fn signup_rejects_mismatched_confirmation() {
        let form = SignupForm {
            confirm_password: "different-pass".to_string(),
            ..signup()
        };
        assert_eq!(form.validate()[0].field, "confirmPassword");
    }

    #[test]
    fn reason_of_nine_characters_is_rejected() {
        let form = ChangeRequestForm {
            course_id: "course-1".to_string(),
            reason: "123456789".to_string(),
        };
        assert_eq!(form.validate().len(), 1);
        assert!(form.into_request().is_err());
    }

    #[test]
    fn length_minimums_count_characters_not_bytes() {
        // 9 characters, 27 bytes: must still miss the 10 minimum.
        let form = ChangeRequestForm {
            course_id: "course-1".to_string(),
            reason: "ありがとう存じます".to_string(),
        };
        assert_eq!(form.validate().len(), 1);

        // 8 characters with multibyte letters satisfies the password rule.
        let form = SignupForm {
            password: "pässwörd".to_string(),
            confirm_password: "pässwörd".to_string(),
            ..signup()
        };
        assert!(form.validate().is_empty());
    }

    #[test]
    fn reason_of_ten_characters_is_accepted() {
        let form = ChangeRequestForm {
            course_id: "course-1".to_string(),
            reason: "1234567890".to_string(),
        };
        assert!(form.validate().is_empty());
        assert!(form.into_request().is_ok());
    }
}
