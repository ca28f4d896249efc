//! Teacher Application Model
//!
//! Learners apply to teach; an admin approves or rejects the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::utils::{
    error::AppError,
    validation::{url_validator, validate_language_code},
};

/// Review state of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ApplicationStatus::Pending),
            "approved" => Ok(ApplicationStatus::Approved),
            "rejected" => Ok(ApplicationStatus::Rejected),
            _ => Err(format!("Unknown application status: {}", s)),
        }
    }
}

/// Outcome an admin records for an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub fn resulting_status(&self) -> ApplicationStatus {
        match self {
            ReviewDecision::Approve => ApplicationStatus::Approved,
            ReviewDecision::Reject => ApplicationStatus::Rejected,
        }
    }
}

/// Application to become a teacher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherApplication {
    pub id: Uuid,
    pub user_id: Uuid,
    pub bio: String,
    /// Languages the applicant wants to teach
    pub languages: Vec<String>,
    pub certificate_url: Option<String>,
    pub status: ApplicationStatus,
    pub reviewer_id: Option<Uuid>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TeacherApplicationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub bio: String,
    pub languages: Vec<String>,
    pub certificate_url: Option<String>,
    pub status: String,
    pub reviewer_id: Option<Uuid>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TeacherApplicationRow> for TeacherApplication {
    type Error = AppError;

    fn try_from(row: TeacherApplicationRow) -> Result<Self, Self::Error> {
        Ok(TeacherApplication {
            id: row.id,
            user_id: row.user_id,
            bio: row.bio,
            languages: row.languages,
            certificate_url: row.certificate_url,
            status: row.status.parse().map_err(AppError::Internal)?,
            reviewer_id: row.reviewer_id,
            review_note: row.review_note,
            created_at: row.created_at,
            reviewed_at: row.reviewed_at,
        })
    }
}

fn languages_validator(languages: &[String]) -> Result<(), ValidationError> {
    if languages.iter().all(|code| validate_language_code(code)) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_language")
            .with_message("Every language must be a tag like 'en' or 'zh-CN'".into()))
    }
}

/// Request payload for submitting an application
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitApplicationRequest {
    #[validate(length(min = 20, max = 5000, message = "Bio must be 20-5000 characters"))]
    pub bio: String,

    #[validate(length(min = 1, max = 10, message = "List between 1 and 10 languages"))]
    #[validate(custom(function = "languages_validator"))]
    pub languages: Vec<String>,

    #[validate(custom(function = "url_validator"))]
    pub certificate_url: Option<String>,
}
