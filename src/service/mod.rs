//! Service Layer
//!
//! Business logic and data access for the platform. Each service owns a
//! connection pool; workflows that span services share a transaction through
//! the executor-generic helpers in `user`, `course` and `enrollment`.

pub mod admin;
pub mod course;
pub mod enrollment;
pub mod gamification;
pub mod purchase;
pub mod teacher_application;
pub mod user;

// Re-export services
pub use admin::{AdminService, CourseRanking, DashboardStats};
pub use course::CourseService;
pub use enrollment::EnrollmentService;
pub use gamification::{GamificationError, GamificationService};
pub use purchase::{PurchaseError, PurchaseService, RefundReviewOutcome};
pub use teacher_application::TeacherApplicationService;
pub use user::UserService;

use sqlx::PgPool;

use crate::config::AppConfig;

/// Every service built over one pool and configuration
#[derive(Clone)]
pub struct Services {
    pub users: UserService,
    pub courses: CourseService,
    pub applications: TeacherApplicationService,
    pub enrollments: EnrollmentService,
    pub purchases: PurchaseService,
    pub gamification: GamificationService,
    pub admin: AdminService,
}

impl Services {
    pub fn new(pool: PgPool, config: &AppConfig) -> Self {
        Self {
            users: UserService::new(pool.clone()),
            courses: CourseService::new(pool.clone()),
            applications: TeacherApplicationService::new(pool.clone()),
            enrollments: EnrollmentService::new(pool.clone()),
            purchases: PurchaseService::new(pool.clone(), config.payment.clone()),
            gamification: GamificationService::new(pool.clone(), config.gamification.clone()),
            admin: AdminService::new(pool),
        }
    }
}
