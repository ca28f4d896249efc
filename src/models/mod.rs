//! Data Models Module
//!
//! Domain entities, request payloads and the pure state-transition and
//! arithmetic rules that the services persist.

pub mod course;
pub mod enrollment;
pub mod gamification;
pub mod purchase;
pub mod teacher_application;
pub mod user;

// Re-export commonly used types
pub use course::{
    Course, CourseFilter, CourseSort, CourseStatus, CreateCourseRequest, Proficiency,
    UpdateCourseRequest,
};
pub use enrollment::{Enrollment, EnrollmentStatus};
pub use gamification::{
    level_for_xp, voice_assessment_xp, xp_threshold_for_level, DailyResetOutcome,
    LeaderboardEntry, LevelProgress, UserGamification, XpAward, XpEvent, XpSource,
};
pub use purchase::{
    AutoRefundReason, CheckoutOutcome, PaymentDecision, PaymentOutcome, Purchase,
    PurchaseFilter, PurchaseStatus, RefundRequest, RefundRequestInput, RefundStatus,
};
pub use teacher_application::{
    ApplicationStatus, ReviewDecision, SubmitApplicationRequest, TeacherApplication,
};
pub use user::{CreateUserRequest, User, UserFilter, UserRole};
