//! In-memory implementations of the core's ports for integration tests.
//! Each store guards a map with an async `RwLock`, so every port call is
//! atomic the way the real storage layer is required to be.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use lms_core::completion::Rollup;
use lms_core::domain::{Course, CourseProgress, Enrollment, LectureProgress, Purchase, PurchaseStatus};
use lms_core::ports::{
    CourseCatalog, EnrollmentStore, PortError, PortResult, ProgressStore, PurchaseStore,
};
use lms_core::{EnrollmentLedger, ProgressTracker, PurchaseFulfillment};

//=========================================================================================
// Catalog
//=========================================================================================

#[derive(Default)]
pub struct MemoryCatalog {
    courses: RwLock<HashMap<Uuid, Course>>,
    /// Preview flag per lecture id, as the lecture collection would hold it.
    preview: RwLock<HashMap<Uuid, bool>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_course(&self, course: Course) {
        let mut preview = self.preview.write().await;
        for &lecture_id in &course.lecture_ids {
            preview.entry(lecture_id).or_insert(false);
        }
        self.courses.write().await.insert(course.id, course);
    }

    pub async fn set_lectures(&self, course_id: Uuid, lecture_ids: Vec<Uuid>) {
        let mut courses = self.courses.write().await;
        if let Some(course) = courses.get_mut(&course_id) {
            course.lecture_ids = lecture_ids;
        }
    }

    pub async fn is_preview(&self, lecture_id: Uuid) -> bool {
        self.preview.read().await.get(&lecture_id).copied().unwrap_or(false)
    }
}

#[async_trait]
impl CourseCatalog for MemoryCatalog {
    async fn get_course(&self, course_id: Uuid) -> PortResult<Course> {
        self.courses
            .read()
            .await
            .get(&course_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))
    }

    async fn lecture_belongs_to_course(
        &self,
        course_id: Uuid,
        lecture_id: Uuid,
    ) -> PortResult<bool> {
        let course = self.get_course(course_id).await?;
        Ok(course.lecture_ids.contains(&lecture_id))
    }

    async fn unlock_lectures(&self, course_id: Uuid) -> PortResult<()> {
        let course = self.get_course(course_id).await?;
        let mut preview = self.preview.write().await;
        for lecture_id in course.lecture_ids {
            preview.insert(lecture_id, true);
        }
        Ok(())
    }
}

//=========================================================================================
// Enrollments
//=========================================================================================

#[derive(Default)]
pub struct MemoryEnrollments {
    records: RwLock<HashMap<(Uuid, Uuid), Enrollment>>,
}

impl MemoryEnrollments {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl EnrollmentStore for MemoryEnrollments {
    async fn insert_if_absent(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(&(user_id, course_id)) {
            return Ok(false);
        }
        records.insert(
            (user_id, course_id),
            Enrollment {
                user_id,
                course_id,
                created_at,
            },
        );
        Ok(true)
    }

    async fn exists(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool> {
        Ok(self.records.read().await.contains_key(&(user_id, course_id)))
    }

    async fn enrolled_courses(&self, user_id: Uuid) -> PortResult<Vec<Uuid>> {
        Ok(self
            .records
            .read()
            .await
            .keys()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, c)| *c)
            .collect())
    }
}

//=========================================================================================
// Progress
//=========================================================================================

#[derive(Default)]
pub struct MemoryProgress {
    records: RwLock<HashMap<(Uuid, Uuid), CourseProgress>>,
}

impl MemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgress {
    async fn find(&self, user_id: Uuid, course_id: Uuid) -> PortResult<Option<CourseProgress>> {
        Ok(self.records.read().await.get(&(user_id, course_id)).cloned())
    }

    async fn create_if_absent(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<CourseProgress> {
        let mut records = self.records.write().await;
        let record = records
            .entry((user_id, course_id))
            .or_insert_with(|| CourseProgress::empty(user_id, course_id, now));
        Ok(record.clone())
    }

    async fn upsert_lecture(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        lecture_id: Uuid,
        completed: bool,
        watch_time_secs: Option<f64>,
        now: DateTime<Utc>,
    ) -> PortResult<CourseProgress> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&(user_id, course_id)).ok_or_else(|| {
            PortError::NotFound(format!(
                "No course progress for user {} in course {}",
                user_id, course_id
            ))
        })?;

        match record.lectures.iter_mut().find(|lp| lp.lecture_id == lecture_id) {
            Some(entry) => {
                entry.is_completed = completed;
                if let Some(wt) = watch_time_secs {
                    entry.watch_time_secs = entry.watch_time_secs.max(wt);
                }
                entry.last_watched = now;
            }
            None => {
                record.lectures.push(LectureProgress::new(
                    lecture_id,
                    completed,
                    watch_time_secs.unwrap_or(0.0),
                    now,
                ));
            }
        }
        record.last_accessed = now;
        Ok(record.clone())
    }

    async fn write_rollup(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        rollup: Rollup,
        now: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&(user_id, course_id)) {
            record.completion_percentage = rollup.completion_percentage;
            record.is_completed = rollup.is_completed;
            record.last_accessed = now;
        }
        Ok(())
    }

    async fn overwrite_entries(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        entries: Vec<LectureProgress>,
        rollup: Rollup,
        now: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&(user_id, course_id)) {
            Some(record) => {
                record.lectures = entries;
                record.completion_percentage = rollup.completion_percentage;
                record.is_completed = rollup.is_completed;
                record.last_accessed = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

//=========================================================================================
// Purchases
//=========================================================================================

#[derive(Default)]
pub struct MemoryPurchases {
    records: RwLock<HashMap<String, Purchase>>,
}

impl MemoryPurchases {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, reference: &str) -> Option<Purchase> {
        self.records.read().await.get(reference).cloned()
    }
}

#[async_trait]
impl PurchaseStore for MemoryPurchases {
    async fn insert(&self, purchase: &Purchase) -> PortResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&purchase.payment_reference) {
            return Err(PortError::Conflict(format!(
                "Purchase reference {} already exists",
                purchase.payment_reference
            )));
        }
        records.insert(purchase.payment_reference.clone(), purchase.clone());
        Ok(())
    }

    async fn find_by_reference(&self, reference: &str) -> PortResult<Option<Purchase>> {
        Ok(self.records.read().await.get(reference).cloned())
    }

    async fn complete_if_pending(
        &self,
        reference: &str,
        settled_amount: f64,
        now: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(reference) {
            Some(purchase) if purchase.status == PurchaseStatus::Pending => {
                purchase.status = PurchaseStatus::Completed;
                purchase.amount = settled_amount;
                purchase.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_if_pending(
        &self,
        reference: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(reference) {
            Some(purchase) if purchase.status == PurchaseStatus::Pending => {
                purchase.status = PurchaseStatus::Failed;
                purchase.failure_reason = Some(reason.to_string());
                purchase.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn completed_exists(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool> {
        Ok(self.records.read().await.values().any(|p| {
            p.user_id == user_id && p.course_id == course_id && p.status == PurchaseStatus::Completed
        }))
    }

    async fn completed_course_ids(&self, user_id: Uuid) -> PortResult<Vec<Uuid>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|p| p.user_id == user_id && p.status == PurchaseStatus::Completed)
            .map(|p| p.course_id)
            .collect())
    }
}

//=========================================================================================
// Wiring helpers
//=========================================================================================

pub struct TestHarness {
    pub catalog: Arc<MemoryCatalog>,
    pub enrollments: Arc<MemoryEnrollments>,
    pub progress: Arc<MemoryProgress>,
    pub purchases: Arc<MemoryPurchases>,
    pub ledger: Arc<EnrollmentLedger>,
    pub tracker: ProgressTracker,
    pub fulfillment: PurchaseFulfillment,
}

pub fn harness() -> TestHarness {
    let catalog = Arc::new(MemoryCatalog::new());
    let enrollments = Arc::new(MemoryEnrollments::new());
    let progress = Arc::new(MemoryProgress::new());
    let purchases = Arc::new(MemoryPurchases::new());

    let ledger = Arc::new(EnrollmentLedger::new(catalog.clone(), enrollments.clone()));
    let tracker = ProgressTracker::new(catalog.clone(), progress.clone());
    let fulfillment = PurchaseFulfillment::new(catalog.clone(), purchases.clone(), ledger.clone());

    TestHarness {
        catalog,
        enrollments,
        progress,
        purchases,
        ledger,
        tracker,
        fulfillment,
    }
}

/// A published course with `lectures` freshly-minted lecture ids.
pub fn course(price: f64, lectures: usize) -> Course {
    Course {
        id: Uuid::new_v4(),
        price,
        lecture_ids: (0..lectures).map(|_| Uuid::new_v4()).collect(),
        is_published: true,
    }
}
