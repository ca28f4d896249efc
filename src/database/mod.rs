//! Database Module
//!
//! Connection management, pagination and filtered query composition.

pub mod connection;
pub mod pagination;
pub mod query;

// Re-export commonly used types
pub use connection::{run_migrations, DatabaseConfig, DatabasePool};
pub use pagination::{Page, PageRequest};
pub use query::{ListQuery, SortDirection};
