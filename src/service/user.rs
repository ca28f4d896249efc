//! User Service Implementation
//!
//! Account creation, lookup and role management.

use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::database::{ListQuery, Page, PageRequest, SortDirection};
use crate::models::user::{CreateUserRequest, User, UserFilter, UserRole, UserRow};
use crate::utils::{
    error::{map_unique_violation, AppError, AppResult},
    validation::normalize_email,
};

const USER_COLUMNS: &str = "id, name, email, role, created_at, updated_at";

/// Loads a user by id on any executor
pub async fn find_user<'e, E>(executor: E, user_id: Uuid) -> AppResult<User>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users WHERE id = $1",
        USER_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?
    .try_into()
}

/// Loads a user and checks they hold `role`
pub async fn require_role<'e, E>(executor: E, user_id: Uuid, role: UserRole) -> AppResult<User>
where
    E: PgExecutor<'e>,
{
    let user = find_user(executor, user_id).await?;
    if user.role != role {
        return Err(AppError::Forbidden(format!(
            "Operation requires the {} role",
            role
        )));
    }
    Ok(user)
}

/// Core user service providing account CRUD
#[derive(Clone)]
pub struct UserService {
    /// Database connection pool
    db_pool: PgPool,
}

impl UserService {
    /// Creates a new UserService instance with the provided database connection pool
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Creates a new learner account
    pub async fn create_user(&self, request: CreateUserRequest) -> AppResult<User> {
        request.validate()?;

        let normalized_email = normalize_email(&request.email);

        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (name, email, role) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(request.name.trim())
        .bind(&normalized_email)
        .bind(UserRole::Learner.as_str())
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| map_unique_violation(e, "Email already exists"))?;

        log::info!("Created user {}", row.id);
        row.try_into()
    }

    /// Retrieves a user by their unique ID
    pub async fn get_user_by_id(&self, user_id: Uuid) -> AppResult<User> {
        find_user(&self.db_pool, user_id).await
    }

    /// Retrieves a user by their email address
    pub async fn get_user_by_email(&self, email: &str) -> AppResult<User> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?
        .try_into()
    }

    /// Changes a user's role; only admins may do this
    pub async fn set_role(&self, actor_id: Uuid, user_id: Uuid, role: UserRole) -> AppResult<User> {
        require_role(&self.db_pool, actor_id, UserRole::Admin).await?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(role.as_str())
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        log::info!("User {} role set to {} by {}", user_id, role, actor_id);
        row.try_into()
    }

    /// Lists accounts, newest first
    pub async fn list_users(&self, filter: UserFilter, page: PageRequest) -> AppResult<Page<User>> {
        ListQuery::new(
            "SELECT id, name, email, role, created_at, updated_at FROM users",
            "SELECT COUNT(*) FROM users",
        )
        .eq_opt("role", filter.role.map(|r| r.as_str()))
        .search(&["name", "email"], filter.search.as_deref())
        .order_by("created_at", SortDirection::Desc)
        .fetch_page::<UserRow>(&self.db_pool, page)
        .await?
        .try_map(User::try_from)
    }

    /// Performs a health check on the database connection
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.db_pool).await?;
        Ok(())
    }
}
