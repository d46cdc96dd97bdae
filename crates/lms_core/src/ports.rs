//! crates/lms_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or
//! payment providers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::completion::Rollup;
use crate::domain::{Course, CourseProgress, LectureProgress, Purchase};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network)
/// and carries the domain error taxonomy surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Collaborator Ports (Traits)
//=========================================================================================

/// Read model of the course catalog, plus the single write this core is
/// allowed to make to it: the permanent content unlock after a purchase.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    /// Fetches a course by id, or `NotFound`.
    async fn get_course(&self, course_id: Uuid) -> PortResult<Course>;

    /// Whether `lecture_id` currently belongs to `course_id`.
    async fn lecture_belongs_to_course(
        &self,
        course_id: Uuid,
        lecture_id: Uuid,
    ) -> PortResult<bool>;

    /// Flags every lecture of the course as preview-accessible.
    /// Idempotent and not reversible through this core.
    async fn unlock_lectures(&self, course_id: Uuid) -> PortResult<()>;
}

/// Persistence for the enrollment relation. The user-facing and
/// course-facing facets are both queries over this one store, so they
/// cannot diverge.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Inserts the (user, course) pairing if it does not exist yet.
    /// Must be atomic under concurrent calls for the same pair; returns
    /// `true` only for the caller that actually created the record.
    async fn insert_if_absent(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> PortResult<bool>;

    async fn exists(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool>;

    /// Course ids the user is enrolled in.
    async fn enrolled_courses(&self, user_id: Uuid) -> PortResult<Vec<Uuid>>;
}

/// Persistence for `CourseProgress` records.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn find(&self, user_id: Uuid, course_id: Uuid) -> PortResult<Option<CourseProgress>>;

    /// Creates an empty progress record if none exists, atomically, and
    /// returns the current record either way.
    async fn create_if_absent(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<CourseProgress>;

    /// Upserts the entry for `lecture_id` on an existing record and returns
    /// the post-image. The write must be atomic per lecture entry: two
    /// concurrent calls for distinct lectures on the same record must both
    /// be reflected in the final state. Watch time only ever increases
    /// (`None` leaves it untouched).
    async fn upsert_lecture(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        lecture_id: Uuid,
        completed: bool,
        watch_time_secs: Option<f64>,
        now: DateTime<Utc>,
    ) -> PortResult<CourseProgress>;

    /// Persists recomputed derived fields for the record.
    async fn write_rollup(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        rollup: Rollup,
        now: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Replaces the whole entry set and derived fields in one write.
    /// Returns `false` if no record exists for the pair.
    async fn overwrite_entries(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        entries: Vec<LectureProgress>,
        rollup: Rollup,
        now: DateTime<Utc>,
    ) -> PortResult<bool>;
}

/// Persistence for purchase records and their state machine.
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn insert(&self, purchase: &Purchase) -> PortResult<()>;

    async fn find_by_reference(&self, reference: &str) -> PortResult<Option<Purchase>>;

    /// Atomically transitions `pending -> completed`, recording the settled
    /// amount. Returns `true` only for the caller that won the conditional
    /// write; `false` when the purchase was not (or no longer) pending.
    async fn complete_if_pending(
        &self,
        reference: &str,
        settled_amount: f64,
        now: DateTime<Utc>,
    ) -> PortResult<bool>;

    /// Atomically transitions `pending -> failed` with a reason, under the
    /// same conditional-write rules as `complete_if_pending`.
    async fn fail_if_pending(
        &self,
        reference: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> PortResult<bool>;

    /// Whether a completed purchase exists for the pair.
    async fn completed_exists(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool>;

    /// Course ids from the user's completed purchases.
    async fn completed_course_ids(&self, user_id: Uuid) -> PortResult<Vec<Uuid>>;
}
