//! Purchase and Refund Models
//!
//! A purchase moves through a small state machine driven by the learner,
//! the payment gateway callback and the expiry sweep:
//!
//! ```text
//! pending ──► paid ──► refunded
//!    │ ├────► failed
//!    │ ├────► cancelled ──► refunded   (late payment)
//!    │ ├────► expired   ──► refunded   (late payment)
//!    └─┴────► refunded                 (paid late or while already enrolled)
//! ```

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::enrollment::Enrollment;
use crate::utils::error::AppError;

/// State of a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Expired,
    Refunded,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Paid => "paid",
            PurchaseStatus::Failed => "failed",
            PurchaseStatus::Cancelled => "cancelled",
            PurchaseStatus::Expired => "expired",
            PurchaseStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(&self, next: PurchaseStatus) -> bool {
        use PurchaseStatus::*;

        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Pending, Refunded)
                | (Paid, Refunded)
                | (Cancelled, Refunded)
                | (Expired, Refunded)
        )
    }

    /// Checks a transition, describing the rejection when it is not allowed
    pub fn transition_to(&self, next: PurchaseStatus) -> Result<PurchaseStatus, String> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(format!("Purchase cannot move from {} to {}", self, next))
        }
    }
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(PurchaseStatus::Pending),
            "paid" => Ok(PurchaseStatus::Paid),
            "failed" => Ok(PurchaseStatus::Failed),
            "cancelled" => Ok(PurchaseStatus::Cancelled),
            "expired" => Ok(PurchaseStatus::Expired),
            "refunded" => Ok(PurchaseStatus::Refunded),
            _ => Err(format!("Unknown purchase status: {}", s)),
        }
    }
}

/// A learner's order for one course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: Uuid,
    /// Numeric order id shared with the payment gateway
    pub order_code: i64,
    pub learner_id: Uuid,
    pub course_id: Uuid,
    /// Amount due, in the currency's smallest unit
    pub amount: i64,
    pub currency: String,
    pub status: PurchaseStatus,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// A pending purchase whose payment window has closed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == PurchaseStatus::Pending && now >= self.expires_at
    }

    /// Decides what an incoming gateway payment arriving at `now` does to
    /// this purchase. A pending order past its payment window counts as
    /// expired whether or not the sweep has reached it yet.
    pub fn decide_payment(
        &self,
        paid_amount: i64,
        learner_already_enrolled: bool,
        now: DateTime<Utc>,
    ) -> PaymentDecision {
        match self.status {
            PurchaseStatus::Paid | PurchaseStatus::Failed | PurchaseStatus::Refunded => {
                PaymentDecision::AlreadyProcessed
            }
            PurchaseStatus::Cancelled | PurchaseStatus::Expired => {
                PaymentDecision::Refund(AutoRefundReason::OrderClosed)
            }
            PurchaseStatus::Pending if self.is_expired(now) => {
                PaymentDecision::Refund(AutoRefundReason::OrderClosed)
            }
            PurchaseStatus::Pending if paid_amount != self.amount => PaymentDecision::Fail(format!(
                "Paid amount {} does not match the order amount {}",
                paid_amount, self.amount
            )),
            PurchaseStatus::Pending if learner_already_enrolled => {
                PaymentDecision::Refund(AutoRefundReason::AlreadyEnrolled)
            }
            PurchaseStatus::Pending => PaymentDecision::MarkPaid,
        }
    }

    /// Checks that a refund may be requested at `now`
    pub fn check_refund_eligibility(
        &self,
        now: DateTime<Utc>,
        refund_window_days: i64,
    ) -> Result<(), String> {
        if self.status != PurchaseStatus::Paid {
            return Err(format!(
                "Only paid purchases can be refunded (purchase is {})",
                self.status
            ));
        }

        if self.amount == 0 {
            return Err("Free enrollments cannot be refunded".to_string());
        }

        let paid_at = self
            .paid_at
            .ok_or_else(|| "Paid purchase has no payment timestamp".to_string())?;

        let window_closes = Duration::try_days(refund_window_days)
            .and_then(|window| paid_at.checked_add_signed(window))
            .ok_or_else(|| format!("Refund window of {} days is out of range", refund_window_days))?;

        if now > window_closes {
            return Err(format!(
                "Refund window of {} days has passed",
                refund_window_days
            ));
        }

        Ok(())
    }
}

/// What to do with a payment reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentDecision {
    /// Duplicate notification; nothing changes
    AlreadyProcessed,
    /// Mark paid and enroll the learner
    MarkPaid,
    /// Mark failed with the given reason
    Fail(String),
    /// Money arrived but cannot buy access; refund it
    Refund(AutoRefundReason),
}

/// Why a payment was refunded without a learner request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoRefundReason {
    /// The learner gained access to the course through another purchase
    AlreadyEnrolled,
    /// The order had been cancelled or had expired
    OrderClosed,
}

impl std::fmt::Display for AutoRefundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutoRefundReason::AlreadyEnrolled => write!(f, "learner already enrolled"),
            AutoRefundReason::OrderClosed => write!(f, "order was closed before payment"),
        }
    }
}

/// Result of processing a gateway payment
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Paid {
        purchase: Purchase,
        enrollment: Enrollment,
    },
    AlreadyProcessed {
        purchase: Purchase,
    },
    Failed {
        purchase: Purchase,
    },
    Refunded {
        purchase: Purchase,
        reason: AutoRefundReason,
    },
}

impl PaymentOutcome {
    pub fn purchase(&self) -> &Purchase {
        match self {
            PaymentOutcome::Paid { purchase, .. }
            | PaymentOutcome::AlreadyProcessed { purchase }
            | PaymentOutcome::Failed { purchase }
            | PaymentOutcome::Refunded { purchase, .. } => purchase,
        }
    }
}

/// Result of starting a checkout
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    /// Waiting for the learner to pay
    AwaitingPayment { purchase: Purchase },
    /// Free course: paid and enrolled immediately
    Enrolled {
        purchase: Purchase,
        enrollment: Enrollment,
    },
}

impl CheckoutOutcome {
    pub fn purchase(&self) -> &Purchase {
        match self {
            CheckoutOutcome::AwaitingPayment { purchase }
            | CheckoutOutcome::Enrolled { purchase, .. } => purchase,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PurchaseRow {
    pub id: Uuid,
    pub order_code: i64,
    pub learner_id: Uuid,
    pub course_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PurchaseRow> for Purchase {
    type Error = AppError;

    fn try_from(row: PurchaseRow) -> Result<Self, Self::Error> {
        Ok(Purchase {
            id: row.id,
            order_code: row.order_code,
            learner_id: row.learner_id,
            course_id: row.course_id,
            amount: row.amount,
            currency: row.currency.trim().to_string(),
            status: row.status.parse().map_err(AppError::Internal)?,
            gateway_reference: row.gateway_reference,
            failure_reason: row.failure_reason,
            expires_at: row.expires_at,
            paid_at: row.paid_at,
            refunded_at: row.refunded_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Review state of a refund request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Approved => "approved",
            RefundStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RefundStatus::Pending),
            "approved" => Ok(RefundStatus::Approved),
            "rejected" => Ok(RefundStatus::Rejected),
            _ => Err(format!("Unknown refund status: {}", s)),
        }
    }
}

/// A learner's request to get their money back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub learner_id: Uuid,
    pub reason: String,
    pub status: RefundStatus,
    pub reviewer_id: Option<Uuid>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RefundRequestRow {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub learner_id: Uuid,
    pub reason: String,
    pub status: String,
    pub reviewer_id: Option<Uuid>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RefundRequestRow> for RefundRequest {
    type Error = AppError;

    fn try_from(row: RefundRequestRow) -> Result<Self, Self::Error> {
        Ok(RefundRequest {
            id: row.id,
            purchase_id: row.purchase_id,
            learner_id: row.learner_id,
            reason: row.reason,
            status: row.status.parse().map_err(AppError::Internal)?,
            reviewer_id: row.reviewer_id,
            review_note: row.review_note,
            created_at: row.created_at,
            reviewed_at: row.reviewed_at,
        })
    }
}

/// Request payload for asking for a refund
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RefundRequestInput {
    #[validate(length(min = 10, max = 2000, message = "Reason must be 10-2000 characters"))]
    pub reason: String,
}

/// Filters for listing purchases
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PurchaseFilter {
    pub learner_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub status: Option<PurchaseStatus>,
    /// Created at or after
    pub from: Option<DateTime<Utc>>,
    /// Created at or before
    pub to: Option<DateTime<Utc>>,
}

/// Generates a gateway order code: milliseconds since the epoch followed by
/// three random digits. Stays below 2^53 so JavaScript clients keep it exact.
pub fn generate_order_code(now: DateTime<Utc>) -> i64 {
    let suffix: i64 = rand::thread_rng().gen_range(0..1000);
    now.timestamp_millis() * 1000 + suffix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purchase(status: PurchaseStatus) -> Purchase {
        let now = Utc::now();
        Purchase {
            id: Uuid::new_v4(),
            order_code: 1_741_500_000_000_123,
            learner_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            amount: 250_000,
            currency: "VND".to_string(),
            status,
            gateway_reference: None,
            failure_reason: None,
            expires_at: now + Duration::minutes(15),
            paid_at: if status == PurchaseStatus::Paid {
                Some(now)
            } else {
                None
            },
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_allowed_transitions() {
        use PurchaseStatus::*;

        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Refunded));
        assert!(Paid.can_transition_to(Refunded));
        assert!(Expired.can_transition_to(Refunded));
        assert!(Cancelled.can_transition_to(Refunded));

        assert!(!Paid.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Cancelled));
        assert!(!Refunded.can_transition_to(Paid));
        assert!(!Failed.can_transition_to(Paid));
        assert!(!Expired.can_transition_to(Paid));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_failed_and_refunded_have_no_exits() {
        use PurchaseStatus::*;

        let all = [Pending, Paid, Failed, Cancelled, Expired, Refunded];
        for from in [Failed, Refunded] {
            for to in all {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_transition_error_message() {
        let err = PurchaseStatus::Refunded
            .transition_to(PurchaseStatus::Paid)
            .unwrap_err();
        assert_eq!(err, "Purchase cannot move from refunded to paid");
    }

    #[test]
    fn test_payment_decision_for_pending() {
        let p = purchase(PurchaseStatus::Pending);
        let now = p.created_at;
        assert_eq!(p.decide_payment(250_000, false, now), PaymentDecision::MarkPaid);
        assert_eq!(
            p.decide_payment(250_000, true, now),
            PaymentDecision::Refund(AutoRefundReason::AlreadyEnrolled)
        );
        assert!(matches!(
            p.decide_payment(100_000, false, now),
            PaymentDecision::Fail(_)
        ));
    }

    #[test]
    fn test_payment_after_window_refunds_unswept_order() {
        let p = purchase(PurchaseStatus::Pending);

        for enrolled in [false, true] {
            assert_eq!(
                p.decide_payment(250_000, enrolled, p.expires_at),
                PaymentDecision::Refund(AutoRefundReason::OrderClosed)
            );
        }
        assert_eq!(
            p.decide_payment(250_000, false, p.expires_at - Duration::seconds(1)),
            PaymentDecision::MarkPaid
        );
    }

    #[test]
    fn test_payment_decision_for_closed_orders() {
        for status in [PurchaseStatus::Cancelled, PurchaseStatus::Expired] {
            assert_eq!(
                purchase(status).decide_payment(250_000, false, Utc::now()),
                PaymentDecision::Refund(AutoRefundReason::OrderClosed)
            );
        }
    }

    #[test]
    fn test_payment_decision_is_idempotent_for_settled_orders() {
        for status in [
            PurchaseStatus::Paid,
            PurchaseStatus::Failed,
            PurchaseStatus::Refunded,
        ] {
            assert_eq!(
                purchase(status).decide_payment(250_000, false, Utc::now()),
                PaymentDecision::AlreadyProcessed
            );
        }
    }

    #[test]
    fn test_is_expired() {
        let p = purchase(PurchaseStatus::Pending);
        assert!(!p.is_expired(p.created_at));
        assert!(p.is_expired(p.expires_at));
        assert!(!purchase(PurchaseStatus::Paid).is_expired(p.expires_at + Duration::hours(1)));
    }

    #[test]
    fn test_refund_eligibility_window() {
        let p = purchase(PurchaseStatus::Paid);
        let paid_at = p.paid_at.unwrap();

        assert!(p.check_refund_eligibility(paid_at, 7).is_ok());
        assert!(p
            .check_refund_eligibility(paid_at + Duration::days(7), 7)
            .is_ok());
        assert!(p
            .check_refund_eligibility(paid_at + Duration::days(7) + Duration::seconds(1), 7)
            .is_err());
    }

    #[test]
    fn test_refund_window_out_of_range_is_rejected() {
        let p = purchase(PurchaseStatus::Paid);
        let err = p
            .check_refund_eligibility(Utc::now(), 200_000_000)
            .unwrap_err();
        assert!(err.contains("out of range"));
    }

    #[test]
    fn test_refund_eligibility_requires_paid_and_non_free() {
        let pending = purchase(PurchaseStatus::Pending);
        assert!(pending
            .check_refund_eligibility(Utc::now(), 7)
            .unwrap_err()
            .contains("Only paid purchases"));

        let mut free = purchase(PurchaseStatus::Paid);
        free.amount = 0;
        assert!(free.check_refund_eligibility(Utc::now(), 7).is_err());
    }

    #[test]
    fn test_order_code_shape() {
        let now = Utc::now();
        let code = generate_order_code(now);
        assert_eq!(code / 1000, now.timestamp_millis());
        assert!(code < 9_007_199_254_740_992);
    }
}
