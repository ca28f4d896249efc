//! Utilities Module
//!
//! Shared utilities for error handling, validation, time handling and other
//! cross-cutting concerns used throughout the platform services.

pub mod error;
pub mod time;
pub mod validation;

// Re-export commonly used utilities
pub use error::{AppError, AppResult};
pub use time::*;
pub use validation::*;
