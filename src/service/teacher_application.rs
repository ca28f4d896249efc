//! Teacher Application Service
//!
//! Learners apply to teach; admins review. Approval promotes the applicant
//! to the teacher role in the same transaction that closes the application.

use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::database::{ListQuery, Page, PageRequest, SortDirection};
use crate::models::teacher_application::{
    ApplicationStatus, ReviewDecision, SubmitApplicationRequest, TeacherApplication,
    TeacherApplicationRow,
};
use crate::models::user::UserRole;
use crate::service::user::{find_user, require_role};
use crate::utils::error::{map_unique_violation, AppError, AppResult};

const APPLICATION_COLUMNS: &str = "id, user_id, bio, languages, certificate_url, status, \
     reviewer_id, review_note, created_at, reviewed_at";

async fn find_application<'e, E>(
    executor: E,
    application_id: Uuid,
    for_update: bool,
) -> AppResult<TeacherApplication>
where
    E: PgExecutor<'e>,
{
    let lock = if for_update { " FOR UPDATE" } else { "" };

    sqlx::query_as::<_, TeacherApplicationRow>(&format!(
        "SELECT {} FROM teacher_applications WHERE id = $1{}",
        APPLICATION_COLUMNS, lock
    ))
    .bind(application_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound("Teacher application not found".to_string()))?
    .try_into()
}

#[derive(Clone)]
pub struct TeacherApplicationService {
    db_pool: PgPool,
}

impl TeacherApplicationService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Files an application; a user may have only one pending at a time
    pub async fn submit_application(
        &self,
        user_id: Uuid,
        request: SubmitApplicationRequest,
    ) -> AppResult<TeacherApplication> {
        request.validate()?;

        let user = find_user(&self.db_pool, user_id).await?;
        match user.role {
            UserRole::Learner => {}
            UserRole::Teacher => {
                return Err(AppError::Conflict("User is already a teacher".to_string()))
            }
            UserRole::Admin => {
                return Err(AppError::Forbidden(
                    "Only learners can apply to teach".to_string(),
                ))
            }
        }

        let row = sqlx::query_as::<_, TeacherApplicationRow>(&format!(
            r#"
            INSERT INTO teacher_applications (user_id, bio, languages, certificate_url, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING {}
            "#,
            APPLICATION_COLUMNS
        ))
        .bind(user_id)
        .bind(request.bio.trim())
        .bind(&request.languages)
        .bind(request.certificate_url.as_deref())
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| map_unique_violation(e, "An application is already pending review"))?;

        log::info!("User {} submitted teacher application {}", user_id, row.id);
        row.try_into()
    }

    /// Approves or rejects a pending application
    pub async fn review_application(
        &self,
        application_id: Uuid,
        reviewer_id: Uuid,
        decision: ReviewDecision,
        note: Option<String>,
    ) -> AppResult<TeacherApplication> {
        let mut tx = self.db_pool.begin().await?;

        require_role(&mut *tx, reviewer_id, UserRole::Admin).await?;
        let application = find_application(&mut *tx, application_id, true).await?;

        if application.status != ApplicationStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "Application was already {}",
                application.status
            )));
        }

        if decision == ReviewDecision::Approve {
            // Only learners are promoted
            let promoted = sqlx::query(
                "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 AND role = $3",
            )
            .bind(application.user_id)
            .bind(UserRole::Teacher.as_str())
            .bind(UserRole::Learner.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if promoted == 0 {
                return Err(AppError::InvalidState(
                    "Applicant is no longer a learner; reject the application instead".to_string(),
                ));
            }
        }

        let status = decision.resulting_status();
        let row = sqlx::query_as::<_, TeacherApplicationRow>(&format!(
            r#"
            UPDATE teacher_applications
            SET status = $2, reviewer_id = $3, review_note = $4, reviewed_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            APPLICATION_COLUMNS
        ))
        .bind(application_id)
        .bind(status.as_str())
        .bind(reviewer_id)
        .bind(note.as_deref().map(str::trim).filter(|n| !n.is_empty()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        log::info!(
            "Teacher application {} {} by {}",
            application_id,
            status,
            reviewer_id
        );
        row.try_into()
    }

    pub async fn get_application(&self, application_id: Uuid) -> AppResult<TeacherApplication> {
        find_application(&self.db_pool, application_id, false).await
    }

    /// Review queue; oldest first so applications are handled in order
    pub async fn list_applications(
        &self,
        status: Option<ApplicationStatus>,
        page: PageRequest,
    ) -> AppResult<Page<TeacherApplication>> {
        ListQuery::new(
            "SELECT id, user_id, bio, languages, certificate_url, status, reviewer_id, \
             review_note, created_at, reviewed_at FROM teacher_applications",
            "SELECT COUNT(*) FROM teacher_applications",
        )
        .eq_opt("status", status.map(|s| s.as_str()))
        .order_by("created_at", SortDirection::Asc)
        .fetch_page::<TeacherApplicationRow>(&self.db_pool, page)
        .await?
        .try_map(TeacherApplication::try_from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::insert_user;
    use crate::service::user::UserService;

    fn application_request() -> SubmitApplicationRequest {
        SubmitApplicationRequest {
            bio: "Certified Spanish teacher with eight years of classroom experience.".to_string(),
            languages: vec!["es".to_string()],
            certificate_url: Some("https://example.com/dele.pdf".to_string()),
        }
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_submit_application(pool: PgPool) {
        let service = TeacherApplicationService::new(pool.clone());
        let learner = insert_user(&pool, "Sofia", UserRole::Learner).await;

        let application = service
            .submit_application(learner.id, application_request())
            .await
            .unwrap();
        assert_eq!(application.status, ApplicationStatus::Pending);
        assert_eq!(application.languages, vec!["es".to_string()]);

        let duplicate = service
            .submit_application(learner.id, application_request())
            .await;
        assert!(matches!(duplicate, Err(AppError::Conflict(_))));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_teachers_cannot_apply(pool: PgPool) {
        let service = TeacherApplicationService::new(pool.clone());
        let teacher = insert_user(&pool, "Lucia", UserRole::Teacher).await;

        let result = service
            .submit_application(teacher.id, application_request())
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_approval_promotes_applicant(pool: PgPool) {
        let service = TeacherApplicationService::new(pool.clone());
        let admin = insert_user(&pool, "Admin", UserRole::Admin).await;
        let learner = insert_user(&pool, "Sofia", UserRole::Learner).await;
        let application = service
            .submit_application(learner.id, application_request())
            .await
            .unwrap();

        let reviewed = service
            .review_application(
                application.id,
                admin.id,
                ReviewDecision::Approve,
                Some("Welcome aboard".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(reviewed.status, ApplicationStatus::Approved);
        assert_eq!(reviewed.reviewer_id, Some(admin.id));
        assert!(reviewed.reviewed_at.is_some());

        let user = find_user(&pool, learner.id).await.unwrap();
        assert_eq!(user.role, UserRole::Teacher);

        let again = service
            .review_application(application.id, admin.id, ReviewDecision::Reject, None)
            .await;
        assert!(matches!(again, Err(AppError::InvalidState(_))));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_rejection_keeps_role_and_allows_reapplying(pool: PgPool) {
        let service = TeacherApplicationService::new(pool.clone());
        let admin = insert_user(&pool, "Admin", UserRole::Admin).await;
        let learner = insert_user(&pool, "Sofia", UserRole::Learner).await;
        let application = service
            .submit_application(learner.id, application_request())
            .await
            .unwrap();

        service
            .review_application(application.id, admin.id, ReviewDecision::Reject, None)
            .await
            .unwrap();

        let user = find_user(&pool, learner.id).await.unwrap();
        assert_eq!(user.role, UserRole::Learner);

        assert!(service
            .submit_application(learner.id, application_request())
            .await
            .is_ok());
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_only_admins_review(pool: PgPool) {
        let service = TeacherApplicationService::new(pool.clone());
        let learner = insert_user(&pool, "Sofia", UserRole::Learner).await;
        let teacher = insert_user(&pool, "Lucia", UserRole::Teacher).await;
        let application = service
            .submit_application(learner.id, application_request())
            .await
            .unwrap();

        let result = service
            .review_application(application.id, teacher.id, ReviewDecision::Approve, None)
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let pending = service
            .list_applications(Some(ApplicationStatus::Pending), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(pending.total_count, 1);
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_approval_never_demotes_an_admin(pool: PgPool) {
        let service = TeacherApplicationService::new(pool.clone());
        let users = UserService::new(pool.clone());
        let admin = insert_user(&pool, "Admin", UserRole::Admin).await;
        let learner = insert_user(&pool, "Sofia", UserRole::Learner).await;
        let application = service
            .submit_application(learner.id, application_request())
            .await
            .unwrap();

        users
            .set_role(admin.id, learner.id, UserRole::Admin)
            .await
            .unwrap();

        let result = service
            .review_application(application.id, admin.id, ReviewDecision::Approve, None)
            .await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));

        let user = find_user(&pool, learner.id).await.unwrap();
        assert_eq!(user.role, UserRole::Admin);

        let still_pending = service.get_application(application.id).await.unwrap();
        assert_eq!(still_pending.status, ApplicationStatus::Pending);

        let rejected = service
            .review_application(application.id, admin.id, ReviewDecision::Reject, None)
            .await
            .unwrap();
        assert_eq!(rejected.status, ApplicationStatus::Rejected);
    }
}
