//! crates/lms_core/src/enrollment.rs
//!
//! The enrollment ledger: records which user has been granted access to
//! which course. Entries are created exactly once per successful payment
//! fulfillment and never deleted in normal operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::EnrollOutcome;
use crate::ports::{CourseCatalog, EnrollmentStore, PortError, PortResult};

/// Service over the enrollment relation. The store holds one canonical
/// record per (user, course) pair; "user's enrolled courses" and
/// "course's enrolled students" are two views of the same rows.
pub struct EnrollmentLedger {
    catalog: Arc<dyn CourseCatalog>,
    enrollments: Arc<dyn EnrollmentStore>,
}

impl EnrollmentLedger {
    pub fn new(catalog: Arc<dyn CourseCatalog>, enrollments: Arc<dyn EnrollmentStore>) -> Self {
        Self {
            catalog,
            enrollments,
        }
    }

    /// Grants the user access to the course.
    ///
    /// Idempotent: if the pair is already enrolled, returns
    /// `created: false` without modifying anything. Fails with `NotFound`
    /// if the course does not exist.
    pub async fn enroll(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<EnrollOutcome> {
        // Validate the course reference before touching the ledger.
        self.catalog
            .get_course(course_id)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => {
                    PortError::NotFound(format!("Course {} not found", course_id))
                }
                other => other,
            })?;

        let created = self
            .enrollments
            .insert_if_absent(user_id, course_id, now)
            .await?;
        Ok(EnrollOutcome { created })
    }

    /// Pure lookup, no side effects.
    pub async fn is_enrolled(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool> {
        self.enrollments.exists(user_id, course_id).await
    }

    pub async fn enrolled_courses(&self, user_id: Uuid) -> PortResult<Vec<Uuid>> {
        self.enrollments.enrolled_courses(user_id).await
    }
}
