//! Enrollment Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::error::AppError;

/// Access state of a learner in a course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    /// Access withdrawn after a refund
    Revoked,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Revoked => "revoked",
        }
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            "revoked" => Ok(EnrollmentStatus::Revoked),
            _ => Err(format!("Unknown enrollment status: {}", s)),
        }
    }
}

/// A learner's seat in a course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub course_id: Uuid,
    /// Purchase that granted access; `None` for free enrollments made by an admin
    pub purchase_id: Option<Uuid>,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EnrollmentRow {
    pub id: Uuid,
    pub learner_id: Uuid,
    pub course_id: Uuid,
    pub purchase_id: Option<Uuid>,
    pub status: String,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl TryFrom<EnrollmentRow> for Enrollment {
    type Error = AppError;

    fn try_from(row: EnrollmentRow) -> Result<Self, Self::Error> {
        Ok(Enrollment {
            id: row.id,
            learner_id: row.learner_id,
            course_id: row.course_id,
            purchase_id: row.purchase_id,
            status: row.status.parse().map_err(AppError::Internal)?,
            enrolled_at: row.enrolled_at,
            completed_at: row.completed_at,
            revoked_at: row.revoked_at,
        })
    }
}
