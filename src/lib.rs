//! Language-Learning Platform Backend
//!
//! Core services behind a language-learning marketplace: teachers publish
//! courses, learners buy and enroll in them, and every activity feeds a
//! gamification layer of XP, levels, daily goals and streaks.
//!
//! # Features
//!
//! - **Course Marketplace**: Draft, publish and archive courses; filtered, sorted, paginated search
//! - **Teacher Onboarding**: Learners apply to teach, admins approve or reject
//! - **Purchase Workflow**: Checkout, idempotent gateway confirmation, expiry, cancellation
//! - **Refunds**: Time-boxed refund requests with admin review and access revocation
//! - **Gamification**: Triangular level curve, daily goals and streaks in a fixed platform timezone
//! - **Admin Dashboard**: Platform-wide counters and course rankings
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use lingua_backend::{
//!     config::AppConfig,
//!     models::XpSource,
//!     service::Services,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::from_env()?;
//!     let pool = config.database.create_pool().await?;
//!     let services = Services::new(pool, &config);
//!
//!     let learner_id = uuid::Uuid::new_v4();
//!     let award = services
//!         .gamification
//!         .award_xp(learner_id, XpSource::LessonCompleted, None)
//!         .await?;
//!     println!("Level {} with {} XP", award.profile.level, award.profile.total_xp);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Models**: Domain types and the pure state-transition and arithmetic rules
//! - **Service Layer**: Transactions, row locking and persistence around those rules
//! - **Database**: Connection pool, migrations, pagination and list query composition
//! - **Utils**: Error types, validation and timezone helpers

/// Configuration management for all service settings
pub mod config;

/// Database connection management, pagination and query composition
pub mod database;

/// Domain models and request structures
pub mod models;

/// Business logic services
pub mod service;

/// Shared utilities for validation, time and error handling
pub mod utils;

// Re-export commonly used types for convenient access
pub use models::{
    CheckoutOutcome, Course, CourseFilter, CourseSort, CreateCourseRequest, CreateUserRequest,
    Enrollment, PaymentOutcome, Purchase, PurchaseStatus, RefundRequest, TeacherApplication,
    User, UserGamification, UserRole, XpAward, XpSource,
};
pub use service::{
    AdminService, CourseService, EnrollmentService, GamificationService, PurchaseService,
    Services, TeacherApplicationService, UserService,
};
pub use utils::error::{AppError, AppResult};

// Re-export database utilities
pub use database::{DatabaseConfig, DatabasePool, Page, PageRequest};

// Re-export configuration system
pub use config::{env, AppConfig, GamificationConfig, PaymentConfig};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
