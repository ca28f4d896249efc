//! Purchase Service Implementation
//!
//! Checkout, gateway payment confirmation, cancellation, expiry and refunds.
//! Each step runs in a single transaction with the purchase row locked, so a
//! duplicate gateway callback racing a cancellation sees a consistent state.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgExecutor, PgPool};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::config::PaymentConfig;
use crate::database::{ListQuery, Page, PageRequest, SortDirection};
use crate::models::course::CourseStatus;
use crate::models::enrollment::Enrollment;
use crate::models::purchase::{
    generate_order_code, CheckoutOutcome, PaymentDecision, PaymentOutcome, Purchase,
    PurchaseFilter, PurchaseRow, PurchaseStatus, RefundRequest, RefundRequestInput,
    RefundRequestRow, RefundStatus,
};
use crate::models::teacher_application::ReviewDecision;
use crate::models::user::UserRole;
use crate::service::{
    course::find_course,
    enrollment::{enroll_in_tx, has_access, revoke_in_tx},
    user::require_role,
};
use crate::utils::{error::AppError, validation::describe_validation_errors};

const PURCHASE_COLUMNS: &str = "id, order_code, learner_id, course_id, amount, currency, status, \
     gateway_reference, failure_reason, expires_at, paid_at, refunded_at, created_at, updated_at";

const REFUND_COLUMNS: &str =
    "id, purchase_id, learner_id, reason, status, reviewer_id, review_note, created_at, reviewed_at";

/// Attempts at drawing an unused order code before giving up
const ORDER_CODE_ATTEMPTS: usize = 5;

/// Purchase workflow errors
#[derive(Error, Debug)]
pub enum PurchaseError {
    #[error("Purchase not found")]
    PurchaseNotFound,

    #[error("Refund request not found")]
    RefundNotFound,

    #[error("Course is not available for purchase (course is {0})")]
    CourseNotPurchasable(CourseStatus),

    #[error("Learner is already enrolled in this course")]
    AlreadyEnrolled,

    /// The purchase belongs to a different learner
    #[error("Purchase belongs to another learner")]
    NotOwner,

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Refund not allowed: {0}")]
    RefundNotAllowed(String),

    #[error("A refund request is already pending for this purchase")]
    RefundAlreadyRequested,

    #[error("Refund request was already {0}")]
    RefundAlreadyReviewed(RefundStatus),

    #[error("Could not allocate a unique order code")]
    OrderCodeExhausted,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Failure raised by a collaborating service
    #[error(transparent)]
    App(#[from] AppError),
}

impl From<validator::ValidationErrors> for PurchaseError {
    fn from(err: validator::ValidationErrors) -> Self {
        PurchaseError::ValidationError(describe_validation_errors(&err))
    }
}

impl From<PurchaseError> for AppError {
    fn from(err: PurchaseError) -> Self {
        match err {
            PurchaseError::PurchaseNotFound | PurchaseError::RefundNotFound => {
                AppError::NotFound(err.to_string())
            }
            PurchaseError::AlreadyEnrolled | PurchaseError::RefundAlreadyRequested => {
                AppError::Conflict(err.to_string())
            }
            PurchaseError::NotOwner => AppError::Forbidden(err.to_string()),
            PurchaseError::CourseNotPurchasable(_)
            | PurchaseError::InvalidTransition(_)
            | PurchaseError::RefundNotAllowed(_)
            | PurchaseError::RefundAlreadyReviewed(_) => AppError::InvalidState(err.to_string()),
            PurchaseError::OrderCodeExhausted => AppError::Internal(err.to_string()),
            PurchaseError::ValidationError(msg) => AppError::Validation(msg),
            PurchaseError::DatabaseError(e) => AppError::Database(e),
            PurchaseError::App(e) => e,
        }
    }
}

/// Result type for purchase operations
pub type PurchaseServiceResult<T> = Result<T, PurchaseError>;

/// Result of an admin decision on a refund request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundReviewOutcome {
    pub request: RefundRequest,
    pub purchase: Purchase,
    /// Enrollment withdrawn by an approved refund
    pub revoked_enrollment: Option<Enrollment>,
}

async fn find_purchase<'e, E>(
    executor: E,
    purchase_id: Uuid,
    for_update: bool,
) -> PurchaseServiceResult<Purchase>
where
    E: PgExecutor<'e>,
{
    let lock = if for_update { " FOR UPDATE" } else { "" };

    let row = sqlx::query_as::<_, PurchaseRow>(&format!(
        "SELECT {} FROM purchases WHERE id = $1{}",
        PURCHASE_COLUMNS, lock
    ))
    .bind(purchase_id)
    .fetch_optional(executor)
    .await?
    .ok_or(PurchaseError::PurchaseNotFound)?;

    Ok(row.try_into()?)
}

async fn find_purchase_by_order_code<'e, E>(
    executor: E,
    order_code: i64,
    for_update: bool,
) -> PurchaseServiceResult<Purchase>
where
    E: PgExecutor<'e>,
{
    let lock = if for_update { " FOR UPDATE" } else { "" };

    let row = sqlx::query_as::<_, PurchaseRow>(&format!(
        "SELECT {} FROM purchases WHERE order_code = $1{}",
        PURCHASE_COLUMNS, lock
    ))
    .bind(order_code)
    .fetch_optional(executor)
    .await?
    .ok_or(PurchaseError::PurchaseNotFound)?;

    Ok(row.try_into()?)
}

/// Moves a locked purchase to `next`, stamping `paid_at` / `refunded_at` as needed
async fn update_status(
    conn: &mut PgConnection,
    purchase: &Purchase,
    next: PurchaseStatus,
    gateway_reference: Option<&str>,
    failure_reason: Option<&str>,
) -> PurchaseServiceResult<Purchase> {
    purchase
        .status
        .transition_to(next)
        .map_err(PurchaseError::InvalidTransition)?;

    let row = sqlx::query_as::<_, PurchaseRow>(&format!(
        r#"
        UPDATE purchases
        SET status = $2,
            gateway_reference = COALESCE($3, gateway_reference),
            failure_reason = COALESCE($4, failure_reason),
            paid_at = CASE WHEN $2 = 'paid' THEN NOW() ELSE paid_at END,
            refunded_at = CASE WHEN $2 = 'refunded' THEN NOW() ELSE refunded_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        PURCHASE_COLUMNS
    ))
    .bind(purchase.id)
    .bind(next.as_str())
    .bind(gateway_reference)
    .bind(failure_reason)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.try_into()?)
}

/// Locks the learner's user row. Checkout and payment confirmation both take
/// it, so work on one learner's orders is serialized.
async fn lock_learner<'e, E>(executor: E, learner_id: Uuid) -> PurchaseServiceResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(learner_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(())
}

#[derive(Clone)]
pub struct PurchaseService {
    db_pool: PgPool,
    config: PaymentConfig,
}

impl PurchaseService {
    pub fn new(db_pool: PgPool, config: PaymentConfig) -> Self {
        Self { db_pool, config }
    }

    /// Currency every purchase is charged in
    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    /// When a checkout started at `now` stops accepting payment
    fn payment_deadline(&self, now: DateTime<Utc>) -> PurchaseServiceResult<DateTime<Utc>> {
        Duration::try_minutes(self.config.pending_expiry_minutes)
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| {
                PurchaseError::App(AppError::Configuration(format!(
                    "Pending expiry of {} minutes is out of range",
                    self.config.pending_expiry_minutes
                )))
            })
    }

    /// Starts a checkout for `course_id`.
    ///
    /// An unexpired pending order for the same learner and course is reused.
    /// Free courses skip the gateway: the purchase is recorded as paid and
    /// the learner is enrolled right away.
    pub async fn create_purchase(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
    ) -> PurchaseServiceResult<CheckoutOutcome> {
        let mut tx = self.db_pool.begin().await?;
        lock_learner(&mut *tx, learner_id).await?;

        let course = find_course(&mut *tx, course_id, false).await?;
        if !course.status.is_purchasable() {
            return Err(PurchaseError::CourseNotPurchasable(course.status));
        }

        if has_access(&mut *tx, learner_id, course_id).await? {
            return Err(PurchaseError::AlreadyEnrolled);
        }

        let open = sqlx::query_as::<_, PurchaseRow>(&format!(
            r#"
            SELECT {} FROM purchases
            WHERE learner_id = $1 AND course_id = $2 AND status = 'pending' AND expires_at > NOW()
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            PURCHASE_COLUMNS
        ))
        .bind(learner_id)
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = open {
            tx.commit().await?;
            log::debug!("Reusing pending order {} for learner {}", row.order_code, learner_id);
            return Ok(CheckoutOutcome::AwaitingPayment {
                purchase: row.try_into()?,
            });
        }

        let now = Utc::now();
        let (status, expires_at) = if course.is_free() {
            (PurchaseStatus::Paid, now)
        } else {
            (PurchaseStatus::Pending, self.payment_deadline(now)?)
        };

        let mut inserted = None;
        for _ in 0..ORDER_CODE_ATTEMPTS {
            let row = sqlx::query_as::<_, PurchaseRow>(&format!(
                r#"
                INSERT INTO purchases (order_code, learner_id, course_id, amount, currency, status, expires_at, paid_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, CASE WHEN $6 = 'paid' THEN NOW() END)
                ON CONFLICT ON CONSTRAINT purchases_order_code_key DO NOTHING
                RETURNING {}
                "#,
                PURCHASE_COLUMNS
            ))
            .bind(generate_order_code(now))
            .bind(learner_id)
            .bind(course_id)
            .bind(course.price)
            .bind(&self.config.currency)
            .bind(status.as_str())
            .bind(expires_at)
            .fetch_optional(&mut *tx)
            .await?;

            if row.is_some() {
                inserted = row;
                break;
            }
        }
        let purchase: Purchase = inserted
            .ok_or(PurchaseError::OrderCodeExhausted)?
            .try_into()?;

        let outcome = if status == PurchaseStatus::Paid {
            let enrollment =
                enroll_in_tx(&mut *tx, learner_id, course_id, Some(purchase.id)).await?;
            CheckoutOutcome::Enrolled {
                purchase,
                enrollment,
            }
        } else {
            CheckoutOutcome::AwaitingPayment { purchase }
        };

        tx.commit().await?;

        log::info!(
            "Order {} created for learner {} on course {} ({} {})",
            outcome.purchase().order_code,
            learner_id,
            course_id,
            outcome.purchase().amount,
            outcome.purchase().currency
        );
        Ok(outcome)
    }

    /// Applies a payment reported by the gateway. Safe to call repeatedly
    /// with the same notification.
    pub async fn confirm_payment(
        &self,
        order_code: i64,
        paid_amount: i64,
        gateway_reference: Option<String>,
    ) -> PurchaseServiceResult<PaymentOutcome> {
        let mut tx = self.db_pool.begin().await?;
        let purchase = find_purchase_by_order_code(&mut *tx, order_code, true).await?;

        let already_enrolled = if purchase.status == PurchaseStatus::Pending {
            // Serialized with checkout and other payments of this learner
            lock_learner(&mut *tx, purchase.learner_id).await?;
            has_access(&mut *tx, purchase.learner_id, purchase.course_id).await?
        } else {
            false
        };
        let reference = gateway_reference.as_deref();

        let outcome = match purchase.decide_payment(paid_amount, already_enrolled, Utc::now()) {
            PaymentDecision::AlreadyProcessed => {
                log::debug!("Order {} already {}; ignoring payment", order_code, purchase.status);
                PaymentOutcome::AlreadyProcessed { purchase }
            }
            PaymentDecision::MarkPaid => {
                let purchase =
                    update_status(&mut *tx, &purchase, PurchaseStatus::Paid, reference, None)
                        .await?;
                let enrollment = enroll_in_tx(
                    &mut *tx,
                    purchase.learner_id,
                    purchase.course_id,
                    Some(purchase.id),
                )
                .await?;
                log::info!("Order {} paid; learner {} enrolled", order_code, purchase.learner_id);
                PaymentOutcome::Paid {
                    purchase,
                    enrollment,
                }
            }
            PaymentDecision::Fail(reason) => {
                log::warn!("Order {} failed: {}", order_code, reason);
                let purchase = update_status(
                    &mut *tx,
                    &purchase,
                    PurchaseStatus::Failed,
                    reference,
                    Some(reason.as_str()),
                )
                .await?;
                PaymentOutcome::Failed { purchase }
            }
            PaymentDecision::Refund(reason) => {
                log::warn!("Order {} refunded automatically: {}", order_code, reason);
                let purchase = update_status(
                    &mut *tx,
                    &purchase,
                    PurchaseStatus::Refunded,
                    reference,
                    Some(reason.to_string().as_str()),
                )
                .await?;
                PaymentOutcome::Refunded { purchase, reason }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Learner abandons a pending checkout
    pub async fn cancel_purchase(
        &self,
        order_code: i64,
        learner_id: Uuid,
    ) -> PurchaseServiceResult<Purchase> {
        let mut tx = self.db_pool.begin().await?;
        let purchase = find_purchase_by_order_code(&mut *tx, order_code, true).await?;

        if purchase.learner_id != learner_id {
            return Err(PurchaseError::NotOwner);
        }

        let purchase =
            update_status(&mut *tx, &purchase, PurchaseStatus::Cancelled, None, None).await?;
        tx.commit().await?;

        log::info!("Order {} cancelled by learner {}", order_code, learner_id);
        Ok(purchase)
    }

    /// Closes every pending order whose payment window has passed
    pub async fn expire_stale_purchases(&self) -> PurchaseServiceResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE purchases
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'pending' AND expires_at <= NOW()
            "#,
        )
        .execute(&self.db_pool)
        .await?;

        let expired = result.rows_affected();
        if expired > 0 {
            log::info!("Expired {} stale pending purchases", expired);
        }
        Ok(expired)
    }

    /// Learner asks for their money back
    pub async fn request_refund(
        &self,
        purchase_id: Uuid,
        learner_id: Uuid,
        input: RefundRequestInput,
    ) -> PurchaseServiceResult<RefundRequest> {
        input.validate()?;

        let mut tx = self.db_pool.begin().await?;
        let purchase = find_purchase(&mut *tx, purchase_id, true).await?;

        if purchase.learner_id != learner_id {
            return Err(PurchaseError::NotOwner);
        }

        purchase
            .check_refund_eligibility(Utc::now(), self.config.refund_window_days)
            .map_err(PurchaseError::RefundNotAllowed)?;

        let row = sqlx::query_as::<_, RefundRequestRow>(&format!(
            r#"
            INSERT INTO refund_requests (purchase_id, learner_id, reason, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING {}
            "#,
            REFUND_COLUMNS
        ))
        .bind(purchase_id)
        .bind(learner_id)
        .bind(input.reason.trim())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                PurchaseError::RefundAlreadyRequested
            }
            other => PurchaseError::DatabaseError(other),
        })?;

        tx.commit().await?;

        log::info!(
            "Refund requested for order {} by learner {}",
            purchase.order_code,
            learner_id
        );
        Ok(row.try_into()?)
    }

    /// Admin decision on a refund request. Approval refunds the purchase and
    /// withdraws course access.
    pub async fn review_refund(
        &self,
        request_id: Uuid,
        admin_id: Uuid,
        decision: ReviewDecision,
        note: Option<String>,
    ) -> PurchaseServiceResult<RefundReviewOutcome> {
        let mut tx = self.db_pool.begin().await?;
        require_role(&mut *tx, admin_id, UserRole::Admin).await?;

        let request: RefundRequest = sqlx::query_as::<_, RefundRequestRow>(&format!(
            "SELECT {} FROM refund_requests WHERE id = $1 FOR UPDATE",
            REFUND_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(PurchaseError::RefundNotFound)?
        .try_into()?;

        if request.status != RefundStatus::Pending {
            return Err(PurchaseError::RefundAlreadyReviewed(request.status));
        }

        let mut purchase = find_purchase(&mut *tx, request.purchase_id, true).await?;
        let mut revoked_enrollment = None;

        let status = match decision {
            ReviewDecision::Approve => {
                purchase =
                    update_status(&mut *tx, &purchase, PurchaseStatus::Refunded, None, None)
                        .await?;
                revoked_enrollment =
                    revoke_in_tx(&mut *tx, purchase.learner_id, purchase.course_id).await?;
                RefundStatus::Approved
            }
            ReviewDecision::Reject => RefundStatus::Rejected,
        };

        let request: RefundRequest = sqlx::query_as::<_, RefundRequestRow>(&format!(
            r#"
            UPDATE refund_requests
            SET status = $2, reviewer_id = $3, review_note = $4, reviewed_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            REFUND_COLUMNS
        ))
        .bind(request_id)
        .bind(status.as_str())
        .bind(admin_id)
        .bind(note.as_deref().map(str::trim).filter(|n| !n.is_empty()))
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        tx.commit().await?;

        log::info!(
            "Refund request {} for order {} {} by {}",
            request_id,
            purchase.order_code,
            status,
            admin_id
        );
        Ok(RefundReviewOutcome {
            request,
            purchase,
            revoked_enrollment,
        })
    }

    pub async fn get_purchase(&self, purchase_id: Uuid) -> PurchaseServiceResult<Purchase> {
        find_purchase(&self.db_pool, purchase_id, false).await
    }

    pub async fn get_purchase_by_order_code(
        &self,
        order_code: i64,
    ) -> PurchaseServiceResult<Purchase> {
        find_purchase_by_order_code(&self.db_pool, order_code, false).await
    }

    /// Purchase history, newest first
    pub async fn list_purchases(
        &self,
        filter: PurchaseFilter,
        page: PageRequest,
    ) -> PurchaseServiceResult<Page<Purchase>> {
        let page = ListQuery::new(
            "SELECT id, order_code, learner_id, course_id, amount, currency, status, \
             gateway_reference, failure_reason, expires_at, paid_at, refunded_at, created_at, \
             updated_at FROM purchases",
            "SELECT COUNT(*) FROM purchases",
        )
        .eq_opt("learner_id", filter.learner_id)
        .eq_opt("course_id", filter.course_id)
        .eq_opt("status", filter.status.map(|s| s.as_str()))
        .gte_opt("created_at", filter.from)
        .lte_opt("created_at", filter.to)
        .order_by("created_at", SortDirection::Desc)
        .fetch_page::<PurchaseRow>(&self.db_pool, page)
        .await?
        .try_map(Purchase::try_from)?;

        Ok(page)
    }

    /// Refund review queue, oldest first
    pub async fn list_refund_requests(
        &self,
        status: Option<RefundStatus>,
        page: PageRequest,
    ) -> PurchaseServiceResult<Page<RefundRequest>> {
        let page = ListQuery::new(
            "SELECT id, purchase_id, learner_id, reason, status, reviewer_id, review_note, \
             created_at, reviewed_at FROM refund_requests",
            "SELECT COUNT(*) FROM refund_requests",
        )
        .eq_opt("status", status.map(|s| s.as_str()))
        .order_by("created_at", SortDirection::Asc)
        .fetch_page::<RefundRequestRow>(&self.db_pool, page)
        .await?
        .try_map(RefundRequest::try_from)?;

        Ok(page)
    }
}
