//! crates/lms_core/src/purchase.rs
//!
//! The purchase fulfillment coordinator: turns a confirmed payment event
//! into content unlock plus enrollment, driving the purchase state machine
//! `pending -> completed | failed` (both terminal).
//!
//! Duplicate webhook delivery is expected, not exceptional: `fulfill` is
//! idempotent end-to-end. The unlock and enroll side effects are applied
//! before the status flip, so a fulfillment that dies half-way leaves the
//! purchase pending and the next delivery retries to fixed point.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{FulfillmentResult, Purchase, PurchaseStatus};
use crate::enrollment::EnrollmentLedger;
use crate::ports::{CourseCatalog, PortError, PortResult, PurchaseStore};

pub struct PurchaseFulfillment {
    catalog: Arc<dyn CourseCatalog>,
    purchases: Arc<dyn PurchaseStore>,
    ledger: Arc<EnrollmentLedger>,
}

impl PurchaseFulfillment {
    pub fn new(
        catalog: Arc<dyn CourseCatalog>,
        purchases: Arc<dyn PurchaseStore>,
        ledger: Arc<EnrollmentLedger>,
    ) -> Self {
        Self {
            catalog,
            purchases,
            ledger,
        }
    }

    /// Opens a pending purchase carrying the course price at this moment.
    /// Later price changes never alter an in-flight or completed purchase.
    ///
    /// `payment_reference` is the provider-side identifier for the
    /// transaction (e.g. a checkout session id), handed in by the host
    /// layer that talked to the provider.
    ///
    /// Fails with `NotFound` if the course is absent and `Conflict` if the
    /// user already has a completed purchase for it.
    pub async fn initiate(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        payment_reference: String,
        now: DateTime<Utc>,
    ) -> PortResult<Purchase> {
        let course = self.catalog.get_course(course_id).await.map_err(|e| match e {
            PortError::NotFound(_) => PortError::NotFound(format!("Course {} not found", course_id)),
            other => other,
        })?;

        if self.purchases.completed_exists(user_id, course_id).await? {
            return Err(PortError::Conflict(format!(
                "User {} already purchased course {}",
                user_id, course_id
            )));
        }

        let purchase = Purchase::pending(user_id, course_id, course.price, payment_reference, now);
        self.purchases.insert(&purchase).await?;
        Ok(purchase)
    }

    /// Converts a confirmed payment into enrollment and content unlock.
    ///
    /// At-most-once: a replay for an already-completed purchase returns the
    /// stored result without re-applying side effects. The settled amount
    /// is authoritative and overwrites the price snapshot on the purchase
    /// record only. A `CourseProgress` record is deliberately NOT created
    /// here; progress stays lazy.
    pub async fn fulfill(
        &self,
        reference: &str,
        settled_amount: f64,
        now: DateTime<Utc>,
    ) -> PortResult<FulfillmentResult> {
        if !settled_amount.is_finite() || settled_amount < 0.0 {
            return Err(PortError::Validation(format!(
                "settled amount must be a non-negative number, got {}",
                settled_amount
            )));
        }

        let purchase = self.require_purchase(reference).await?;
        match purchase.status {
            PurchaseStatus::Completed => {
                // Webhook replay: success outcome, no side effects.
                return Ok(FulfillmentResult {
                    purchase,
                    newly_fulfilled: false,
                    enrollment_created: false,
                });
            }
            PurchaseStatus::Failed => {
                return Err(PortError::InvalidState(format!(
                    "Purchase {} already failed; cannot fulfill",
                    reference
                )));
            }
            PurchaseStatus::Pending => {}
        }

        // Both side effects are idempotent, so they run before the status
        // flip: if either cannot be applied the purchase stays pending and
        // the provider's redelivery retries the whole sequence.
        self.catalog.unlock_lectures(purchase.course_id).await?;
        let outcome = self
            .ledger
            .enroll(purchase.user_id, purchase.course_id, now)
            .await?;

        let won = self
            .purchases
            .complete_if_pending(reference, settled_amount, now)
            .await?;
        let purchase = self.require_purchase(reference).await?;

        if !won {
            // A concurrent delivery won the conditional write. If it was a
            // failure event, the settlement contradicts the stored state.
            if purchase.status == PurchaseStatus::Failed {
                return Err(PortError::InvalidState(format!(
                    "Purchase {} failed concurrently; cannot fulfill",
                    reference
                )));
            }
            return Ok(FulfillmentResult {
                purchase,
                newly_fulfilled: false,
                enrollment_created: false,
            });
        }

        Ok(FulfillmentResult {
            purchase,
            newly_fulfilled: true,
            enrollment_created: outcome.created,
        })
    }

    /// Records a failed payment. No unlock or enrollment side effects.
    ///
    /// Fails with `NotFound` if the reference is unmatched and
    /// `InvalidState` if the purchase already completed. A replay for an
    /// already-failed purchase is a no-op success.
    pub async fn fail(
        &self,
        reference: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> PortResult<Purchase> {
        let purchase = self.require_purchase(reference).await?;
        match purchase.status {
            PurchaseStatus::Completed => {
                return Err(PortError::InvalidState(format!(
                    "Purchase {} already completed; cannot fail",
                    reference
                )));
            }
            PurchaseStatus::Failed => return Ok(purchase),
            PurchaseStatus::Pending => {}
        }

        let transitioned = self.purchases.fail_if_pending(reference, reason, now).await?;
        let purchase = self.require_purchase(reference).await?;
        if !transitioned && purchase.status != PurchaseStatus::Failed {
            // Lost the conditional write to a concurrent completion.
            return Err(PortError::InvalidState(format!(
                "Purchase {} already completed; cannot fail",
                reference
            )));
        }
        Ok(purchase)
    }

    /// True iff a completed purchase exists for the pair.
    pub async fn is_purchased(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool> {
        self.purchases.completed_exists(user_id, course_id).await
    }

    /// Course ids from the user's completed purchases.
    pub async fn purchased_courses(&self, user_id: Uuid) -> PortResult<Vec<Uuid>> {
        self.purchases.completed_course_ids(user_id).await
    }

    async fn require_purchase(&self, reference: &str) -> PortResult<Purchase> {
        self.purchases
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| {
                PortError::NotFound(format!("No purchase matches reference {}", reference))
            })
    }
}
