//! crates/lms_core/src/progress.rs
//!
//! The lecture progress tracker: per-(user, course) completion state for
//! each lecture the user has touched, with course-level completion derived
//! by the aggregator in `completion` after every mutation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::completion::{self, Rollup};
use crate::domain::{Course, CourseProgress, LectureProgress};
use crate::ports::{CourseCatalog, PortError, PortResult, ProgressStore};

/// Read-only snapshot of a user's progress through a course, with the
/// percentage recomputed against the course's current lecture count.
/// Users with no progress record yet get empty defaults.
#[derive(Debug, Clone)]
pub struct ProgressView {
    pub course: Course,
    pub lectures: Vec<LectureProgress>,
    pub completion_percentage: u8,
    pub is_completed: bool,
}

pub struct ProgressTracker {
    catalog: Arc<dyn CourseCatalog>,
    progress: Arc<dyn ProgressStore>,
}

impl ProgressTracker {
    pub fn new(catalog: Arc<dyn CourseCatalog>, progress: Arc<dyn ProgressStore>) -> Self {
        Self { catalog, progress }
    }

    /// Returns the existing progress record for the pair, creating an
    /// empty one if absent. Fails with `NotFound` if the course does not
    /// exist. Enrollment never calls this: progress stays lazy.
    pub async fn get_or_create(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<CourseProgress> {
        self.require_course(course_id).await?;
        self.progress.create_if_absent(user_id, course_id, now).await
    }

    /// Upserts the progress entry for one lecture and recomputes the
    /// derived completion fields.
    ///
    /// Fails with `NotFound` if the course does not exist or the lecture
    /// does not belong to it, and with `Validation` for negative watch
    /// time. Safe under concurrent calls for distinct lectures on the same
    /// record: the entry write is atomic per lecture at the store layer.
    pub async fn mark_lecture(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        lecture_id: Uuid,
        completed: bool,
        watch_time_secs: Option<f64>,
        now: DateTime<Utc>,
    ) -> PortResult<CourseProgress> {
        if let Some(wt) = watch_time_secs {
            if !wt.is_finite() || wt < 0.0 {
                return Err(PortError::Validation(format!(
                    "watch time must be a non-negative number of seconds, got {}",
                    wt
                )));
            }
        }

        let course = self.require_course(course_id).await?;
        if !self
            .catalog
            .lecture_belongs_to_course(course_id, lecture_id)
            .await?
        {
            return Err(PortError::NotFound(format!(
                "Lecture {} not found in course {}",
                lecture_id, course_id
            )));
        }

        self.progress.create_if_absent(user_id, course_id, now).await?;
        let mut record = self
            .progress
            .upsert_lecture(user_id, course_id, lecture_id, completed, watch_time_secs, now)
            .await?;

        // Explicit recomputation against the current lecture count; the
        // total is never cached on the progress record.
        let rollup = completion::rollup(&record.lectures, course.total_lectures());
        self.progress
            .write_rollup(user_id, course_id, rollup, now)
            .await?;

        record.completion_percentage = rollup.completion_percentage;
        record.is_completed = rollup.is_completed;
        record.last_accessed = now;
        Ok(record)
    }

    /// Marks the whole course completed: every existing entry is flagged
    /// completed and entries are populated for course lectures not yet
    /// touched, so the derived percentage lands on 100 through the same
    /// aggregation as any other mutation.
    ///
    /// Fails with `NotFound` if no progress record exists; a course never
    /// started cannot be completed (callers may `get_or_create` first if
    /// they want auto-creation).
    pub async fn mark_all_completed(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<CourseProgress> {
        let course = self.require_course(course_id).await?;
        let record = self.require_progress(user_id, course_id).await?;

        let mut entries = record.lectures;
        for entry in entries.iter_mut() {
            entry.is_completed = true;
            entry.last_watched = now;
        }
        for &lecture_id in &course.lecture_ids {
            if !entries.iter().any(|lp| lp.lecture_id == lecture_id) {
                entries.push(LectureProgress::new(lecture_id, true, 0.0, now));
            }
        }

        let rollup = completion::rollup(&entries, course.total_lectures());
        self.persist_overwrite(user_id, course_id, entries, rollup, now)
            .await
    }

    /// Resets every entry and the record itself to not-completed.
    /// Fails with `NotFound` if no record exists. Idempotent.
    pub async fn reset(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<CourseProgress> {
        let record = self.require_progress(user_id, course_id).await?;

        let mut entries = record.lectures;
        for entry in entries.iter_mut() {
            entry.is_completed = false;
        }

        self.persist_overwrite(user_id, course_id, entries, Rollup::zero(), now)
            .await
    }

    /// Read path: the course plus the user's progress, with the percentage
    /// derived fresh at read time. Nothing is created or persisted here.
    pub async fn view(&self, user_id: Uuid, course_id: Uuid) -> PortResult<ProgressView> {
        let course = self.require_course(course_id).await?;
        let record = self.progress.find(user_id, course_id).await?;

        let lectures = record.map(|r| r.lectures).unwrap_or_default();
        let rollup = completion::rollup(&lectures, course.total_lectures());
        Ok(ProgressView {
            course,
            lectures,
            completion_percentage: rollup.completion_percentage,
            is_completed: rollup.is_completed,
        })
    }

    async fn require_course(&self, course_id: Uuid) -> PortResult<Course> {
        self.catalog.get_course(course_id).await.map_err(|e| match e {
            PortError::NotFound(_) => PortError::NotFound(format!("Course {} not found", course_id)),
            other => other,
        })
    }

    async fn require_progress(&self, user_id: Uuid, course_id: Uuid) -> PortResult<CourseProgress> {
        self.progress
            .find(user_id, course_id)
            .await?
            .ok_or_else(|| {
                PortError::NotFound(format!(
                    "No course progress for user {} in course {}",
                    user_id, course_id
                ))
            })
    }

    async fn persist_overwrite(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        entries: Vec<LectureProgress>,
        rollup: Rollup,
        now: DateTime<Utc>,
    ) -> PortResult<CourseProgress> {
        let found = self
            .progress
            .overwrite_entries(user_id, course_id, entries, rollup, now)
            .await?;
        if !found {
            return Err(PortError::NotFound(format!(
                "No course progress for user {} in course {}",
                user_id, course_id
            )));
        }
        self.require_progress(user_id, course_id).await
    }
}
