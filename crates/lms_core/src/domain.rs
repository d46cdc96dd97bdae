//! crates/lms_core/src/domain.rs
//!
//! Defines the pure, core data structures for the enrollment, progress
//! and purchase flows. These structs are independent of any database or
//! serialization format; all defaults are made explicit at construction.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// External read model of a course. Owned by the course-authoring side of
/// the platform; this core only references it by id.
#[derive(Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub price: f64,
    /// Ordered list of lecture ids; the order is externally assigned.
    pub lecture_ids: Vec<Uuid>,
    pub is_published: bool,
}

impl Course {
    pub fn total_lectures(&self) -> usize {
        self.lecture_ids.len()
    }
}

/// Durable grant of access from a user to a course. At most one per
/// (user, course) pair; created only by purchase fulfillment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an enrollment attempt. `created == false` means the pair
/// was already enrolled and nothing was modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollOutcome {
    pub created: bool,
}

/// Per-lecture completion and watch-time record, owned by a
/// `CourseProgress` and not independently addressable.
#[derive(Debug, Clone)]
pub struct LectureProgress {
    pub lecture_id: Uuid,
    pub is_completed: bool,
    /// Seconds watched; never decreases in normal operation.
    pub watch_time_secs: f64,
    pub last_watched: DateTime<Utc>,
}

impl LectureProgress {
    /// A fresh entry for a lecture the user has just touched.
    pub fn new(
        lecture_id: Uuid,
        is_completed: bool,
        watch_time_secs: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            lecture_id,
            is_completed,
            watch_time_secs,
            last_watched: now,
        }
    }
}

/// A user's progress through one course. Created lazily on the first
/// progress-touching call; enrollment alone never creates one.
#[derive(Debug, Clone)]
pub struct CourseProgress {
    pub user_id: Uuid,
    pub course_id: Uuid,
    /// One entry per lecture the user has interacted with. The set is not
    /// pre-populated with every course lecture.
    pub lectures: Vec<LectureProgress>,
    /// Derived: round(100 * completed / total lectures), clamped to 0..=100.
    pub completion_percentage: u8,
    /// Derived: true iff `completion_percentage == 100` and the course has
    /// at least one lecture.
    pub is_completed: bool,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CourseProgress {
    /// An empty progress record, as created on first touch.
    pub fn empty(user_id: Uuid, course_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            course_id,
            lectures: Vec::new(),
            completion_percentage: 0,
            is_completed: false,
            last_accessed: now,
            created_at: now,
        }
    }

    pub fn entry(&self, lecture_id: Uuid) -> Option<&LectureProgress> {
        self.lectures.iter().find(|lp| lp.lecture_id == lecture_id)
    }
}

/// Lifecycle of a purchase. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Failed,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PurchaseStatus::Pending),
            "completed" => Ok(PurchaseStatus::Completed),
            "failed" => Ok(PurchaseStatus::Failed),
            other => Err(format!("unknown purchase status '{}'", other)),
        }
    }
}

/// A single purchase of a course by a user.
///
/// `amount` is the course price snapshot taken at initiation; on
/// completion it is overwritten with the amount actually settled by the
/// payment provider. The course's own price is never touched.
#[derive(Debug, Clone)]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub amount: f64,
    pub status: PurchaseStatus,
    /// Opaque identifier correlating the payment-provider transaction to
    /// this record (e.g. a checkout session id).
    pub payment_reference: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// A new pending purchase carrying the price snapshot.
    pub fn pending(
        user_id: Uuid,
        course_id: Uuid,
        amount: f64,
        payment_reference: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            amount,
            status: PurchaseStatus::Pending,
            payment_reference,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What a `fulfill` call observed and did.
#[derive(Debug, Clone)]
pub struct FulfillmentResult {
    pub purchase: Purchase,
    /// False when the purchase was already completed (webhook replay);
    /// no side effects were re-applied in that case.
    pub newly_fulfilled: bool,
    /// Whether this fulfillment created the enrollment (false on replay
    /// or when the user was already enrolled).
    pub enrollment_created: bool,
}
