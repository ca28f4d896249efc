//! Admin Dashboard Service
//!
//! Read-only aggregates over users, courses, purchases and review queues.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::utils::error::AppResult;

/// Largest `top_courses` list returned
pub const MAX_TOP_COURSES: i64 = 50;

/// Platform-wide counters for the admin dashboard
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DashboardStats {
    pub learners: i64,
    pub teachers: i64,
    pub admins: i64,
    pub draft_courses: i64,
    pub published_courses: i64,
    pub archived_courses: i64,
    pub active_enrollments: i64,
    pub completed_enrollments: i64,
    /// Sum of purchases currently paid, in the smallest currency unit
    pub paid_revenue: i64,
    /// Sum of refunded purchases, including automatic refunds of late payments
    pub refunded_amount: i64,
    pub pending_purchases: i64,
    pub pending_refund_requests: i64,
    pub pending_teacher_applications: i64,
    pub generated_at: DateTime<Utc>,
}

impl DashboardStats {
    pub fn total_users(&self) -> i64 {
        self.learners + self.teachers + self.admins
    }

    /// Items waiting on an admin decision
    pub fn review_backlog(&self) -> i64 {
        self.pending_refund_requests + self.pending_teacher_applications
    }
}

/// A course ranked by how many learners hold access to it
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CourseRanking {
    pub course_id: Uuid,
    pub title: String,
    pub teacher_id: Uuid,
    /// Active plus completed enrollments
    pub enrollment_count: i64,
    pub revenue: i64,
}

#[derive(Clone)]
pub struct AdminService {
    db_pool: PgPool,
}

impl AdminService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn dashboard_stats(&self) -> AppResult<DashboardStats> {
        let stats = sqlx::query_as::<_, DashboardStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users WHERE role = 'learner') AS learners,
                (SELECT COUNT(*) FROM users WHERE role = 'teacher') AS teachers,
                (SELECT COUNT(*) FROM users WHERE role = 'admin') AS admins,
                (SELECT COUNT(*) FROM courses WHERE status = 'draft') AS draft_courses,
                (SELECT COUNT(*) FROM courses WHERE status = 'published') AS published_courses,
                (SELECT COUNT(*) FROM courses WHERE status = 'archived') AS archived_courses,
                (SELECT COUNT(*) FROM enrollments WHERE status = 'active') AS active_enrollments,
                (SELECT COUNT(*) FROM enrollments WHERE status = 'completed') AS completed_enrollments,
                (SELECT COALESCE(SUM(amount), 0)::BIGINT FROM purchases WHERE status = 'paid') AS paid_revenue,
                (SELECT COALESCE(SUM(amount), 0)::BIGINT FROM purchases WHERE status = 'refunded') AS refunded_amount,
                (SELECT COUNT(*) FROM purchases WHERE status = 'pending') AS pending_purchases,
                (SELECT COUNT(*) FROM refund_requests WHERE status = 'pending') AS pending_refund_requests,
                (SELECT COUNT(*) FROM teacher_applications WHERE status = 'pending') AS pending_teacher_applications,
                NOW() AS generated_at
            "#,
        )
        .fetch_one(&self.db_pool)
        .await?;

        Ok(stats)
    }

    /// Most enrolled courses, ties broken by title
    pub async fn top_courses(&self, limit: i64) -> AppResult<Vec<CourseRanking>> {
        let courses = sqlx::query_as::<_, CourseRanking>(
            r#"
            SELECT
                c.id AS course_id,
                c.title,
                c.teacher_id,
                COUNT(e.id) AS enrollment_count,
                COALESCE(
                    (SELECT SUM(p.amount) FROM purchases p
                     WHERE p.course_id = c.id AND p.status = 'paid'),
                    0
                )::BIGINT AS revenue
            FROM courses c
            LEFT JOIN enrollments e
                ON e.course_id = c.id AND e.status IN ('active', 'completed')
            GROUP BY c.id, c.title, c.teacher_id
            ORDER BY enrollment_count DESC, c.title ASC, c.id ASC
            LIMIT $1
            "#,
        )
        .bind(limit.clamp(1, MAX_TOP_COURSES))
        .fetch_all(&self.db_pool)
        .await?;

        Ok(courses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::course::CourseStatus;
    use crate::models::user::UserRole;
    use crate::service::test_support::{insert_course, insert_user};

    #[test]
    fn test_derived_totals() {
        let stats = DashboardStats {
            learners: 120,
            teachers: 8,
            admins: 2,
            draft_courses: 3,
            published_courses: 14,
            archived_courses: 1,
            active_enrollments: 300,
            completed_enrollments: 45,
            paid_revenue: 75_000_000,
            refunded_amount: 500_000,
            pending_purchases: 4,
            pending_refund_requests: 2,
            pending_teacher_applications: 5,
            generated_at: Utc::now(),
        };

        assert_eq!(stats.total_users(), 130);
        assert_eq!(stats.review_backlog(), 7);
    }

    async fn insert_enrollment(pool: &PgPool, learner_id: Uuid, course_id: Uuid, status: &str) {
        sqlx::query("INSERT INTO enrollments (learner_id, course_id, status) VALUES ($1, $2, $3)")
            .bind(learner_id)
            .bind(course_id)
            .bind(status)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn insert_purchase(
        pool: &PgPool,
        order_code: i64,
        learner_id: Uuid,
        course_id: Uuid,
        amount: i64,
        status: &str,
    ) -> Uuid {
        sqlx::query_scalar(
            r#"
            INSERT INTO purchases (order_code, learner_id, course_id, amount, currency, status, expires_at, paid_at)
            VALUES ($1, $2, $3, $4, 'VND', $5, NOW() + INTERVAL '15 minutes',
                    CASE WHEN $5 IN ('paid', 'refunded') THEN NOW() END)
            RETURNING id
            "#,
        )
        .bind(order_code)
        .bind(learner_id)
        .bind(course_id)
        .bind(amount)
        .bind(status)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_dashboard_counts_every_queue(pool: PgPool) {
        let service = AdminService::new(pool.clone());

        let ana = insert_user(&pool, "Ana", UserRole::Learner).await;
        let binh = insert_user(&pool, "Binh", UserRole::Learner).await;
        let chloe = insert_user(&pool, "Chloe", UserRole::Learner).await;
        let maria = insert_user(&pool, "Maria", UserRole::Teacher).await;
        let kenji = insert_user(&pool, "Kenji", UserRole::Teacher).await;
        insert_user(&pool, "Admin", UserRole::Admin).await;

        let alpha = insert_course(&pool, maria.id, "Alpha Spanish", 100_000, CourseStatus::Published).await;
        let beta = insert_course(&pool, maria.id, "Beta Spanish", 80_000, CourseStatus::Published).await;
        let bravo = insert_course(&pool, kenji.id, "Bravo Japanese", 90_000, CourseStatus::Published).await;
        insert_course(&pool, kenji.id, "Gamma", 50_000, CourseStatus::Draft).await;
        insert_course(&pool, maria.id, "Gamma", 50_000, CourseStatus::Archived).await;

        insert_enrollment(&pool, ana.id, alpha.id, "active").await;
        insert_enrollment(&pool, binh.id, alpha.id, "completed").await;
        insert_enrollment(&pool, chloe.id, alpha.id, "revoked").await;
        insert_enrollment(&pool, ana.id, beta.id, "active").await;
        insert_enrollment(&pool, binh.id, bravo.id, "completed").await;

        insert_purchase(&pool, 1, ana.id, alpha.id, 100_000, "paid").await;
        let disputed = insert_purchase(&pool, 2, binh.id, alpha.id, 150_000, "paid").await;
        let returned = insert_purchase(&pool, 3, chloe.id, alpha.id, 100_000, "refunded").await;
        insert_purchase(&pool, 4, ana.id, beta.id, 80_000, "pending").await;
        insert_purchase(&pool, 5, binh.id, bravo.id, 90_000, "failed").await;

        for (purchase_id, learner_id, status) in [
            (disputed, binh.id, "pending"),
            (returned, chloe.id, "approved"),
        ] {
            sqlx::query(
                "INSERT INTO refund_requests (purchase_id, learner_id, reason, status) \
                 VALUES ($1, $2, 'Audio quality', $3)",
            )
            .bind(purchase_id)
            .bind(learner_id)
            .bind(status)
            .execute(&pool)
            .await
            .unwrap();
        }

        for (user_id, status) in [(chloe.id, "pending"), (ana.id, "rejected")] {
            sqlx::query(
                "INSERT INTO teacher_applications (user_id, bio, languages, status) \
                 VALUES ($1, 'Native speaker', ARRAY['es'], $2)",
            )
            .bind(user_id)
            .bind(status)
            .execute(&pool)
            .await
            .unwrap();
        }

        let stats = service.dashboard_stats().await.unwrap();
        assert_eq!(stats.learners, 3);
        assert_eq!(stats.teachers, 2);
        assert_eq!(stats.admins, 1);
        assert_eq!(stats.total_users(), 6);
        assert_eq!(stats.draft_courses, 1);
        assert_eq!(stats.published_courses, 3);
        assert_eq!(stats.archived_courses, 1);
        assert_eq!(stats.active_enrollments, 2);
        assert_eq!(stats.completed_enrollments, 2);
        assert_eq!(stats.paid_revenue, 250_000);
        assert_eq!(stats.refunded_amount, 100_000);
        assert_eq!(stats.pending_purchases, 1);
        assert_eq!(stats.pending_refund_requests, 1);
        assert_eq!(stats.pending_teacher_applications, 1);
        assert_eq!(stats.review_backlog(), 2);
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_top_courses_ranking_and_limit(pool: PgPool) {
        let service = AdminService::new(pool.clone());

        let ana = insert_user(&pool, "Ana", UserRole::Learner).await;
        let binh = insert_user(&pool, "Binh", UserRole::Learner).await;
        let chloe = insert_user(&pool, "Chloe", UserRole::Learner).await;
        let maria = insert_user(&pool, "Maria", UserRole::Teacher).await;

        let bravo = insert_course(&pool, maria.id, "Bravo", 90_000, CourseStatus::Published).await;
        let alpha = insert_course(&pool, maria.id, "Alpha", 100_000, CourseStatus::Published).await;
        let beta = insert_course(&pool, maria.id, "Beta", 80_000, CourseStatus::Published).await;
        let gamma_one = insert_course(&pool, maria.id, "Gamma", 50_000, CourseStatus::Draft).await;
        let gamma_two = insert_course(&pool, maria.id, "Gamma", 50_000, CourseStatus::Draft).await;

        insert_enrollment(&pool, ana.id, alpha.id, "active").await;
        insert_enrollment(&pool, binh.id, alpha.id, "completed").await;
        insert_enrollment(&pool, chloe.id, alpha.id, "revoked").await;
        insert_enrollment(&pool, ana.id, bravo.id, "active").await;
        insert_enrollment(&pool, binh.id, beta.id, "active").await;

        insert_purchase(&pool, 1, ana.id, alpha.id, 100_000, "paid").await;
        insert_purchase(&pool, 2, binh.id, alpha.id, 100_000, "paid").await;
        insert_purchase(&pool, 3, chloe.id, alpha.id, 100_000, "refunded").await;
        insert_purchase(&pool, 4, ana.id, bravo.id, 90_000, "pending").await;

        let ranking = service.top_courses(10).await.unwrap();
        let mut gammas = [gamma_one.id, gamma_two.id];
        gammas.sort();
        let ids: Vec<Uuid> = ranking.iter().map(|c| c.course_id).collect();
        assert_eq!(ids, vec![alpha.id, beta.id, bravo.id, gammas[0], gammas[1]]);

        assert_eq!(ranking[0].enrollment_count, 2);
        assert_eq!(ranking[0].revenue, 200_000);
        assert_eq!(ranking[0].teacher_id, maria.id);
        assert_eq!(ranking[2].enrollment_count, 1);
        assert_eq!(ranking[2].revenue, 0);
        assert_eq!(ranking[4].enrollment_count, 0);

        let clamped_low = service.top_courses(0).await.unwrap();
        assert_eq!(clamped_low.len(), 1);
        assert_eq!(clamped_low[0].course_id, alpha.id);

        let clamped_high = service.top_courses(i64::MAX).await.unwrap();
        assert_eq!(clamped_high.len(), 5);
    }
}
