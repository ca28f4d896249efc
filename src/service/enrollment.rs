//! Enrollment Service
//!
//! Enrollments are created by the purchase workflow, so the write helpers
//! take any executor and run inside the caller's transaction.

use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::database::{ListQuery, Page, PageRequest, SortDirection};
use crate::models::enrollment::{Enrollment, EnrollmentRow, EnrollmentStatus};
use crate::utils::error::{AppError, AppResult};

const ENROLLMENT_COLUMNS: &str =
    "id, learner_id, course_id, purchase_id, status, enrolled_at, completed_at, revoked_at";

/// Grants access to a course, reviving a revoked enrollment if one exists.
///
/// Fails with `Conflict` when the learner already holds an active or
/// completed enrollment.
pub async fn enroll_in_tx<'e, E>(
    executor: E,
    learner_id: Uuid,
    course_id: Uuid,
    purchase_id: Option<Uuid>,
) -> AppResult<Enrollment>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
        r#"
        INSERT INTO enrollments (learner_id, course_id, purchase_id, status)
        VALUES ($1, $2, $3, 'active')
        ON CONFLICT ON CONSTRAINT enrollments_learner_course_key DO UPDATE
            SET status = 'active',
                purchase_id = EXCLUDED.purchase_id,
                enrolled_at = NOW(),
                completed_at = NULL,
                revoked_at = NULL
            WHERE enrollments.status = 'revoked'
        RETURNING {}
        "#,
        ENROLLMENT_COLUMNS
    ))
    .bind(learner_id)
    .bind(course_id)
    .bind(purchase_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::Conflict("Learner is already enrolled in this course".to_string()))?;

    log::info!("Learner {} enrolled in course {}", learner_id, course_id);
    row.try_into()
}

/// Whether the learner currently has access to the course
pub async fn has_access<'e, E>(executor: E, learner_id: Uuid, course_id: Uuid) -> AppResult<bool>
where
    E: PgExecutor<'e>,
{
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM enrollments
            WHERE learner_id = $1 AND course_id = $2 AND status IN ('active', 'completed')
        )
        "#,
    )
    .bind(learner_id)
    .bind(course_id)
    .fetch_one(executor)
    .await?;

    Ok(exists)
}

/// Withdraws access after a refund. Returns `None` when there was nothing to revoke.
pub async fn revoke_in_tx<'e, E>(
    executor: E,
    learner_id: Uuid,
    course_id: Uuid,
) -> AppResult<Option<Enrollment>>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
        r#"
        UPDATE enrollments
        SET status = 'revoked', revoked_at = NOW()
        WHERE learner_id = $1 AND course_id = $2 AND status <> 'revoked'
        RETURNING {}
        "#,
        ENROLLMENT_COLUMNS
    ))
    .bind(learner_id)
    .bind(course_id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => {
            log::info!("Revoked enrollment of {} in course {}", learner_id, course_id);
            Ok(Some(row.try_into()?))
        }
        None => Ok(None),
    }
}

/// Read side of enrollments plus course completion
#[derive(Clone)]
pub struct EnrollmentService {
    db_pool: PgPool,
}

impl EnrollmentService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn is_enrolled(&self, learner_id: Uuid, course_id: Uuid) -> AppResult<bool> {
        has_access(&self.db_pool, learner_id, course_id).await
    }

    pub async fn get_enrollment(&self, learner_id: Uuid, course_id: Uuid) -> AppResult<Enrollment> {
        sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM enrollments WHERE learner_id = $1 AND course_id = $2",
            ENROLLMENT_COLUMNS
        ))
        .bind(learner_id)
        .bind(course_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Enrollment not found".to_string()))?
        .try_into()
    }

    /// A learner's enrollments, most recent first
    pub async fn list_for_learner(
        &self,
        learner_id: Uuid,
        status: Option<EnrollmentStatus>,
        page: PageRequest,
    ) -> AppResult<Page<Enrollment>> {
        ListQuery::new(
            "SELECT id, learner_id, course_id, purchase_id, status, enrolled_at, completed_at, revoked_at FROM enrollments",
            "SELECT COUNT(*) FROM enrollments",
        )
        .eq("learner_id", learner_id)
        .eq_opt("status", status.map(|s| s.as_str()))
        .order_by("enrolled_at", SortDirection::Desc)
        .fetch_page::<EnrollmentRow>(&self.db_pool, page)
        .await?
        .try_map(Enrollment::try_from)
    }

    /// Marks an active enrollment as completed
    pub async fn complete(&self, learner_id: Uuid, course_id: Uuid) -> AppResult<Enrollment> {
        let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
            r#"
            UPDATE enrollments
            SET status = 'completed', completed_at = NOW()
            WHERE learner_id = $1 AND course_id = $2 AND status = 'active'
            RETURNING {}
            "#,
            ENROLLMENT_COLUMNS
        ))
        .bind(learner_id)
        .bind(course_id)
        .fetch_optional(&self.db_pool)
        .await?;

        match row {
            Some(row) => {
                log::info!("Learner {} completed course {}", learner_id, course_id);
                row.try_into()
            }
            None => {
                let existing = self.get_enrollment(learner_id, course_id).await?;
                Err(AppError::InvalidState(format!(
                    "Only active enrollments can be completed (enrollment is {})",
                    existing.status
                )))
            }
        }
    }
}
