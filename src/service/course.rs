//! Course Service
//!
//! Authoring, publication and marketplace search for courses.

use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::database::{ListQuery, Page, PageRequest};
use crate::models::course::{
    Course, CourseFilter, CourseRow, CourseSort, CourseStatus, CreateCourseRequest,
    UpdateCourseRequest,
};
use crate::models::user::UserRole;
use crate::service::user::require_role;
use crate::utils::error::{AppError, AppResult};

const COURSE_COLUMNS: &str = "id, teacher_id, title, description, language, proficiency, price, \
     status, created_at, updated_at, published_at";

/// Loads a course on any executor, optionally locking the row
pub async fn find_course<'e, E>(executor: E, course_id: Uuid, for_update: bool) -> AppResult<Course>
where
    E: PgExecutor<'e>,
{
    let lock = if for_update { " FOR UPDATE" } else { "" };

    sqlx::query_as::<_, CourseRow>(&format!(
        "SELECT {} FROM courses WHERE id = $1{}",
        COURSE_COLUMNS, lock
    ))
    .bind(course_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?
    .try_into()
}

#[derive(Clone)]
pub struct CourseService {
    db_pool: PgPool,
}

impl CourseService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Creates a draft course owned by `teacher_id`
    pub async fn create_course(
        &self,
        teacher_id: Uuid,
        request: CreateCourseRequest,
    ) -> AppResult<Course> {
        request.validate()?;
        require_role(&self.db_pool, teacher_id, UserRole::Teacher).await?;

        let row = sqlx::query_as::<_, CourseRow>(&format!(
            r#"
            INSERT INTO courses (teacher_id, title, description, language, proficiency, price, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'draft')
            RETURNING {}
            "#,
            COURSE_COLUMNS
        ))
        .bind(teacher_id)
        .bind(request.title.trim())
        .bind(request.description.trim())
        .bind(&request.language)
        .bind(request.proficiency.as_str())
        .bind(request.price)
        .fetch_one(&self.db_pool)
        .await?;

        log::info!("Teacher {} created course {}", teacher_id, row.id);
        row.try_into()
    }

    pub async fn get_course(&self, course_id: Uuid) -> AppResult<Course> {
        find_course(&self.db_pool, course_id, false).await
    }

    /// Applies a partial update; archived courses are frozen
    pub async fn update_course(
        &self,
        course_id: Uuid,
        teacher_id: Uuid,
        request: UpdateCourseRequest,
    ) -> AppResult<Course> {
        request.validate()?;

        let mut tx = self.db_pool.begin().await?;
        let course = find_course(&mut *tx, course_id, true).await?;
        ensure_owner(&course, teacher_id)?;

        if course.status == CourseStatus::Archived {
            return Err(AppError::InvalidState(
                "Archived courses cannot be edited".to_string(),
            ));
        }

        let row = sqlx::query_as::<_, CourseRow>(&format!(
            r#"
            UPDATE courses
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                price = COALESCE($4, price),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            COURSE_COLUMNS
        ))
        .bind(course_id)
        .bind(request.title.as_deref().map(str::trim))
        .bind(request.description.as_deref().map(str::trim))
        .bind(request.price)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    /// Draft → Published
    pub async fn publish(&self, course_id: Uuid, teacher_id: Uuid) -> AppResult<Course> {
        self.transition(course_id, teacher_id, CourseStatus::Published)
            .await
    }

    /// Takes a course off the marketplace; existing enrollments keep access
    pub async fn archive(&self, course_id: Uuid, teacher_id: Uuid) -> AppResult<Course> {
        self.transition(course_id, teacher_id, CourseStatus::Archived)
            .await
    }

    async fn transition(
        &self,
        course_id: Uuid,
        teacher_id: Uuid,
        next: CourseStatus,
    ) -> AppResult<Course> {
        let mut tx = self.db_pool.begin().await?;
        let course = find_course(&mut *tx, course_id, true).await?;
        ensure_owner(&course, teacher_id)?;

        let allowed = match next {
            CourseStatus::Published => course.status == CourseStatus::Draft,
            CourseStatus::Archived => course.status != CourseStatus::Archived,
            CourseStatus::Draft => false,
        };
        if !allowed {
            return Err(AppError::InvalidState(format!(
                "Course cannot move from {} to {}",
                course.status, next
            )));
        }

        let row = sqlx::query_as::<_, CourseRow>(&format!(
            r#"
            UPDATE courses
            SET status = $2,
                published_at = CASE WHEN $2 = 'published' THEN NOW() ELSE published_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            COURSE_COLUMNS
        ))
        .bind(course_id)
        .bind(next.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        log::info!("Course {} is now {}", course_id, next);
        row.try_into()
    }

    /// Marketplace search
    pub async fn list_courses(
        &self,
        filter: CourseFilter,
        sort: CourseSort,
        page: PageRequest,
    ) -> AppResult<Page<Course>> {
        let (column, direction) = sort.column_and_direction();

        ListQuery::new(
            "SELECT id, teacher_id, title, description, language, proficiency, price, status, \
             created_at, updated_at, published_at FROM courses",
            "SELECT COUNT(*) FROM courses",
        )
        .eq_opt("language", filter.language)
        .eq_opt("proficiency", filter.proficiency.map(|p| p.as_str()))
        .eq_opt("teacher_id", filter.teacher_id)
        .eq_opt("status", filter.status.map(|s| s.as_str()))
        .gte_opt("price", filter.min_price)
        .lte_opt("price", filter.max_price)
        .search(&["title", "description"], filter.search.as_deref())
        .order_by(column, direction)
        .fetch_page::<CourseRow>(&self.db_pool, page)
        .await?
        .try_map(Course::try_from)
    }
}

fn ensure_owner(course: &Course, teacher_id: Uuid) -> AppResult<()> {
    if course.teacher_id != teacher_id {
        return Err(AppError::Forbidden(
            "Only the course author can change this course".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::course::Proficiency;
    use crate::service::test_support::{insert_course, insert_user};
    use chrono::Utc;

    fn create_course_request(title: &str, price: i64) -> CreateCourseRequest {
        CreateCourseRequest {
            title: title.to_string(),
            description: "Everyday phrases for getting around.".to_string(),
            language: "es".to_string(),
            proficiency: Proficiency::A2,
            price,
        }
    }

    #[test]
    fn test_ensure_owner() {
        let teacher_id = Uuid::new_v4();
        let course = Course {
            id: Uuid::new_v4(),
            teacher_id,
            title: "Spanish for travellers".to_string(),
            description: String::new(),
            language: "es".to_string(),
            proficiency: Proficiency::A1,
            price: 199_000,
            status: CourseStatus::Draft,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            published_at: None,
        };

        assert!(ensure_owner(&course, teacher_id).is_ok());
        assert!(matches!(
            ensure_owner(&course, Uuid::new_v4()),
            Err(AppError::Forbidden(_))
        ));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_create_course_requires_teacher(pool: PgPool) {
        let service = CourseService::new(pool.clone());
        let learner = insert_user(&pool, "Hoa", UserRole::Learner).await;
        let teacher = insert_user(&pool, "Lucia", UserRole::Teacher).await;

        let denied = service
            .create_course(learner.id, create_course_request("Spanish basics", 0))
            .await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));

        let course = service
            .create_course(teacher.id, create_course_request("Spanish basics", 150_000))
            .await
            .unwrap();
        assert_eq!(course.status, CourseStatus::Draft);
        assert_eq!(course.teacher_id, teacher.id);
        assert!(course.published_at.is_none());
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_titles_are_stored_trimmed(pool: PgPool) {
        let service = CourseService::new(pool.clone());
        let teacher = insert_user(&pool, "Lucia", UserRole::Teacher).await;

        let blank = service
            .create_course(teacher.id, create_course_request("     ", 0))
            .await;
        assert!(matches!(blank, Err(AppError::Validation(_))));

        let course = service
            .create_course(teacher.id, create_course_request("  Spanish basics  ", 0))
            .await
            .unwrap();
        assert_eq!(course.title, "Spanish basics");
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_publish_and_archive_lifecycle(pool: PgPool) {
        let service = CourseService::new(pool.clone());
        let teacher = insert_user(&pool, "Lucia", UserRole::Teacher).await;
        let course = service
            .create_course(teacher.id, create_course_request("Spanish basics", 150_000))
            .await
            .unwrap();

        let published = service.publish(course.id, teacher.id).await.unwrap();
        assert_eq!(published.status, CourseStatus::Published);
        assert!(published.published_at.is_some());

        let again = service.publish(course.id, teacher.id).await;
        assert!(matches!(again, Err(AppError::InvalidState(_))));

        let archived = service.archive(course.id, teacher.id).await.unwrap();
        assert_eq!(archived.status, CourseStatus::Archived);

        let edit = service
            .update_course(
                course.id,
                teacher.id,
                UpdateCourseRequest {
                    price: Some(99_000),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(edit, Err(AppError::InvalidState(_))));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_update_course_partial(pool: PgPool) {
        let service = CourseService::new(pool.clone());
        let teacher = insert_user(&pool, "Lucia", UserRole::Teacher).await;
        let other = insert_user(&pool, "Pablo", UserRole::Teacher).await;
        let course = service
            .create_course(teacher.id, create_course_request("Spanish basics", 150_000))
            .await
            .unwrap();

        let request = UpdateCourseRequest {
            price: Some(120_000),
            ..Default::default()
        };

        let denied = service
            .update_course(course.id, other.id, request.clone())
            .await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));

        let updated = service
            .update_course(course.id, teacher.id, request)
            .await
            .unwrap();
        assert_eq!(updated.price, 120_000);
        assert_eq!(updated.title, "Spanish basics");
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_list_courses_filter_and_sort(pool: PgPool) {
        let service = CourseService::new(pool.clone());
        let teacher = insert_user(&pool, "Lucia", UserRole::Teacher).await;
        insert_course(&pool, teacher.id, "Cheap", 50_000, CourseStatus::Published).await;
        insert_course(&pool, teacher.id, "Pricey", 500_000, CourseStatus::Published).await;
        insert_course(&pool, teacher.id, "Middle", 200_000, CourseStatus::Published).await;
        insert_course(&pool, teacher.id, "Unreleased", 100_000, CourseStatus::Draft).await;

        let filter = CourseFilter {
            status: Some(CourseStatus::Published),
            min_price: Some(100_000),
            ..Default::default()
        };
        let page = service
            .list_courses(filter, CourseSort::PriceLowToHigh, PageRequest::default())
            .await
            .unwrap();

        let titles: Vec<&str> = page.items.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Middle", "Pricey"]);
        assert_eq!(page.total_count, 2);

        let second_page = service
            .list_courses(
                CourseFilter::default(),
                CourseSort::Title,
                PageRequest::new(2, 3),
            )
            .await
            .unwrap();
        assert_eq!(second_page.total_count, 4);
        assert_eq!(second_page.items.len(), 1);
        assert_eq!(second_page.items[0].title, "Unreleased");
    }
}
