//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the storage ports from the `lms_core` crate. It handles all interactions
//! with MongoDB using the `mongodb` driver.
//!
//! Concurrency discipline: every write the core depends on is expressed as a
//! single conditional update (`$setOnInsert` upserts, positional array updates,
//! status-guarded transitions), never as read-modify-write across a round trip.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc, Document};
use mongodb::options::{IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, IndexModel};
use uuid::Uuid;

use lms_core::completion::Rollup;
use lms_core::domain::{Course, CourseProgress, LectureProgress, Purchase, PurchaseStatus};
use lms_core::ports::{
    CourseCatalog, EnrollmentStore, PortError, PortResult, ProgressStore, PurchaseStore,
};

const COURSES_COLLECTION: &str = "courses";
const LECTURES_COLLECTION: &str = "lectures";
const ENROLLMENTS_COLLECTION: &str = "enrollments";
const PROGRESS_COLLECTION: &str = "course_progress";
const PURCHASES_COLLECTION: &str = "purchases";

/// Duplicate-key error code from the server; used to translate unique-index
/// violations into domain conflicts.
const DUPLICATE_KEY: i32 = 11000;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A MongoDB adapter that implements the core's storage ports.
#[derive(Clone)]
pub struct MongoAdapter {
    courses: Collection<CourseRecord>,
    lectures: Collection<Document>,
    enrollments: Collection<EnrollmentRecord>,
    progress: Collection<CourseProgressRecord>,
    purchases: Collection<PurchaseRecord>,
}

impl MongoAdapter {
    /// Creates a new `MongoAdapter` over the named database.
    pub fn new(client: &Client, database_name: &str) -> Self {
        let database = client.database(database_name);
        Self {
            courses: database.collection(COURSES_COLLECTION),
            lectures: database.collection(LECTURES_COLLECTION),
            enrollments: database.collection(ENROLLMENTS_COLLECTION),
            progress: database.collection(PROGRESS_COLLECTION),
            purchases: database.collection(PURCHASES_COLLECTION),
        }
    }

    /// Initializes the unique indexes the port contracts rely on. Run at
    /// startup, before the first request.
    pub async fn init_indexes(&self) -> Result<(), mongodb::error::Error> {
        // At most one enrollment per (user, course) pair.
        let index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "course_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.enrollments.create_index(index).await?;

        // At most one progress record per (user, course) pair.
        let index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "course_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.progress.create_index(index).await?;

        // Purchase references are globally unique.
        let index = IndexModel::builder()
            .keys(doc! { "payment_reference": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.purchases.create_index(index).await?;

        // Purchase-status lookups by pair.
        let index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "course_id": 1, "status": 1 })
            .build();
        self.purchases.create_index(index).await?;

        Ok(())
    }
}

fn parse_uuid(field: &str, value: &str) -> PortResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| PortError::Unexpected(format!("malformed {} '{}': {}", field, value, e)))
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
        ref write_err,
    )) = *e.kind
    {
        return write_err.code == DUPLICATE_KEY;
    }
    false
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(serde::Serialize, serde::Deserialize)]
struct CourseRecord {
    #[serde(rename = "_id")]
    id: String,
    price: f64,
    lecture_ids: Vec<String>,
    is_published: bool,
}
impl CourseRecord {
    fn to_domain(self) -> PortResult<Course> {
        Ok(Course {
            id: parse_uuid("course id", &self.id)?,
            price: self.price,
            lecture_ids: self
                .lecture_ids
                .iter()
                .map(|id| parse_uuid("lecture id", id))
                .collect::<PortResult<Vec<_>>>()?,
            is_published: self.is_published,
        })
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct EnrollmentRecord {
    user_id: String,
    course_id: String,
    created_at: bson::DateTime,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct LectureProgressRecord {
    lecture_id: String,
    is_completed: bool,
    watch_time_secs: f64,
    last_watched: bson::DateTime,
}
impl LectureProgressRecord {
    fn to_domain(self) -> PortResult<LectureProgress> {
        Ok(LectureProgress {
            lecture_id: parse_uuid("lecture id", &self.lecture_id)?,
            is_completed: self.is_completed,
            watch_time_secs: self.watch_time_secs,
            last_watched: self.last_watched.to_chrono(),
        })
    }

    fn to_bson(entry: &LectureProgress) -> Document {
        doc! {
            "lecture_id": entry.lecture_id.to_string(),
            "is_completed": entry.is_completed,
            "watch_time_secs": entry.watch_time_secs,
            "last_watched": bson::DateTime::from_chrono(entry.last_watched),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CourseProgressRecord {
    user_id: String,
    course_id: String,
    lecture_progress: Vec<LectureProgressRecord>,
    completion_percentage: i32,
    is_completed: bool,
    last_accessed: bson::DateTime,
    created_at: bson::DateTime,
}
impl CourseProgressRecord {
    fn to_domain(self) -> PortResult<CourseProgress> {
        Ok(CourseProgress {
            user_id: parse_uuid("user id", &self.user_id)?,
            course_id: parse_uuid("course id", &self.course_id)?,
            lectures: self
                .lecture_progress
                .into_iter()
                .map(LectureProgressRecord::to_domain)
                .collect::<PortResult<Vec<_>>>()?,
            completion_percentage: self.completion_percentage.clamp(0, 100) as u8,
            is_completed: self.is_completed,
            last_accessed: self.last_accessed.to_chrono(),
            created_at: self.created_at.to_chrono(),
        })
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PurchaseRecord {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    course_id: String,
    amount: f64,
    status: String,
    payment_reference: String,
    failure_reason: Option<String>,
    created_at: bson::DateTime,
    updated_at: bson::DateTime,
}
impl PurchaseRecord {
    fn to_domain(self) -> PortResult<Purchase> {
        Ok(Purchase {
            id: parse_uuid("purchase id", &self.id)?,
            user_id: parse_uuid("user id", &self.user_id)?,
            course_id: parse_uuid("course id", &self.course_id)?,
            amount: self.amount,
            status: self
                .status
                .parse::<PurchaseStatus>()
                .map_err(PortError::Unexpected)?,
            payment_reference: self.payment_reference,
            failure_reason: self.failure_reason,
            created_at: self.created_at.to_chrono(),
            updated_at: self.updated_at.to_chrono(),
        })
    }

    fn from_domain(purchase: &Purchase) -> Self {
        Self {
            id: purchase.id.to_string(),
            user_id: purchase.user_id.to_string(),
            course_id: purchase.course_id.to_string(),
            amount: purchase.amount,
            status: purchase.status.as_str().to_string(),
            payment_reference: purchase.payment_reference.clone(),
            failure_reason: purchase.failure_reason.clone(),
            created_at: bson::DateTime::from_chrono(purchase.created_at),
            updated_at: bson::DateTime::from_chrono(purchase.updated_at),
        }
    }
}

//=========================================================================================
// `CourseCatalog` Trait Implementation
//=========================================================================================

#[async_trait]
impl CourseCatalog for MongoAdapter {
    async fn get_course(&self, course_id: Uuid) -> PortResult<Course> {
        let record = self
            .courses
            .find_one(doc! { "_id": course_id.to_string() })
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))?;
        record.to_domain()
    }

    async fn lecture_belongs_to_course(
        &self,
        course_id: Uuid,
        lecture_id: Uuid,
    ) -> PortResult<bool> {
        let found = self
            .courses
            .find_one(doc! {
                "_id": course_id.to_string(),
                "lecture_ids": lecture_id.to_string(),
            })
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(found.is_some())
    }

    async fn unlock_lectures(&self, course_id: Uuid) -> PortResult<()> {
        let course = self.get_course(course_id).await?;
        let ids: Vec<String> = course.lecture_ids.iter().map(Uuid::to_string).collect();
        if ids.is_empty() {
            return Ok(());
        }
        self.lectures
            .update_many(
                doc! { "_id": { "$in": ids } },
                doc! { "$set": { "is_preview": true } },
            )
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}

//=========================================================================================
// `EnrollmentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl EnrollmentStore for MongoAdapter {
    async fn insert_if_absent(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let filter = doc! {
            "user_id": user_id.to_string(),
            "course_id": course_id.to_string(),
        };
        let update = doc! {
            "$setOnInsert": {
                "user_id": user_id.to_string(),
                "course_id": course_id.to_string(),
                "created_at": bson::DateTime::from_chrono(created_at),
            }
        };
        let options = UpdateOptions::builder().upsert(true).build();

        match self
            .enrollments
            .update_one(filter, update)
            .with_options(options)
            .await
        {
            Ok(outcome) => Ok(outcome.upserted_id.is_some()),
            // Two concurrent upserts for a brand-new pair can race into the
            // unique index; the loser simply did not create it.
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        }
    }

    async fn exists(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool> {
        let found = self
            .enrollments
            .find_one(doc! {
                "user_id": user_id.to_string(),
                "course_id": course_id.to_string(),
            })
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(found.is_some())
    }

    async fn enrolled_courses(&self, user_id: Uuid) -> PortResult<Vec<Uuid>> {
        let mut cursor = self
            .enrollments
            .find(doc! { "user_id": user_id.to_string() })
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let mut courses = Vec::new();
        while cursor
            .advance()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
        {
            let record = cursor
                .deserialize_current()
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
            courses.push(parse_uuid("course id", &record.course_id)?);
        }
        Ok(courses)
    }
}

//=========================================================================================
// `ProgressStore` Trait Implementation
//=========================================================================================

impl MongoAdapter {
    async fn find_progress_record(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<Option<CourseProgressRecord>> {
        self.progress
            .find_one(doc! {
                "user_id": user_id.to_string(),
                "course_id": course_id.to_string(),
            })
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }

    async fn require_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> PortResult<CourseProgress> {
        self.find_progress_record(user_id, course_id)
            .await?
            .ok_or_else(|| {
                PortError::NotFound(format!(
                    "No course progress for user {} in course {}",
                    user_id, course_id
                ))
            })?
            .to_domain()
    }

    /// Conditional `$set` on the positional entry for `lecture_id`.
    /// Matches nothing when the entry does not exist yet.
    async fn set_existing_lecture_entry(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        lecture_id: Uuid,
        completed: bool,
        watch_time_secs: Option<f64>,
        now: bson::DateTime,
    ) -> PortResult<u64> {
        let filter = doc! {
            "user_id": user_id.to_string(),
            "course_id": course_id.to_string(),
            "lecture_progress.lecture_id": lecture_id.to_string(),
        };
        let mut update = doc! {
            "$set": {
                "lecture_progress.$.is_completed": completed,
                "lecture_progress.$.last_watched": now,
                "last_accessed": now,
            }
        };
        if let Some(wt) = watch_time_secs {
            // $max keeps watch time monotonic without a read round trip.
            update.insert("$max", doc! { "lecture_progress.$.watch_time_secs": wt });
        }
        let result = self
            .progress
            .update_one(filter, update)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(result.matched_count)
    }
}

#[async_trait]
impl ProgressStore for MongoAdapter {
    async fn find(&self, user_id: Uuid, course_id: Uuid) -> PortResult<Option<CourseProgress>> {
        match self.find_progress_record(user_id, course_id).await? {
            Some(record) => Ok(Some(record.to_domain()?)),
            None => Ok(None),
        }
    }

    async fn create_if_absent(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<CourseProgress> {
        let now_bson = bson::DateTime::from_chrono(now);
        let filter = doc! {
            "user_id": user_id.to_string(),
            "course_id": course_id.to_string(),
        };
        let update = doc! {
            "$setOnInsert": {
                "user_id": user_id.to_string(),
                "course_id": course_id.to_string(),
                "lecture_progress": [],
                "completion_percentage": 0,
                "is_completed": false,
                "last_accessed": now_bson,
                "created_at": now_bson,
            }
        };
        let options = UpdateOptions::builder().upsert(true).build();
        if let Err(e) = self
            .progress
            .update_one(filter, update)
            .with_options(options)
            .await
        {
            // A duplicate-key failure means we lost an upsert race and the
            // record exists now, which is exactly what we wanted.
            if !is_duplicate_key(&e) {
                return Err(PortError::Unexpected(e.to_string()));
            }
        }

        self.require_progress(user_id, course_id).await
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
        let now_bson = bson::DateTime::from_chrono(now);

        let matched = self
            .set_existing_lecture_entry(user_id, course_id, lecture_id, completed, watch_time_secs, now_bson)
            .await?;

        if matched == 0 {
            // No entry for this lecture yet: push one, guarded so a
            // concurrent push for the same lecture cannot duplicate it.
            let entry = LectureProgress::new(
                lecture_id,
                completed,
                watch_time_secs.unwrap_or(0.0),
                now,
            );
            let filter = doc! {
                "user_id": user_id.to_string(),
                "course_id": course_id.to_string(),
                "lecture_progress.lecture_id": { "$ne": lecture_id.to_string() },
            };
            let update = doc! {
                "$push": { "lecture_progress": LectureProgressRecord::to_bson(&entry) },
                "$set": { "last_accessed": now_bson },
            };
            let result = self
                .progress
                .update_one(filter, update)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;

            if result.matched_count == 0 {
                // Either the record is missing or another writer pushed the
                // entry first; the positional update disambiguates.
                let matched = self
                    .set_existing_lecture_entry(
                        user_id, course_id, lecture_id, completed, watch_time_secs, now_bson,
                    )
                    .await?;
                if matched == 0 {
                    return Err(PortError::NotFound(format!(
                        "No course progress for user {} in course {}",
                        user_id, course_id
                    )));
                }
            }
        }

        self.require_progress(user_id, course_id).await
    }

    async fn write_rollup(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        rollup: Rollup,
        now: DateTime<Utc>,
    ) -> PortResult<()> {
        self.progress
            .update_one(
                doc! {
                    "user_id": user_id.to_string(),
                    "course_id": course_id.to_string(),
                },
                doc! {
                    "$set": {
                        "completion_percentage": rollup.completion_percentage as i32,
                        "is_completed": rollup.is_completed,
                        "last_accessed": bson::DateTime::from_chrono(now),
                    }
                },
            )
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
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
        let entry_docs: Vec<Document> =
            entries.iter().map(LectureProgressRecord::to_bson).collect();
        let result = self
            .progress
            .update_one(
                doc! {
                    "user_id": user_id.to_string(),
                    "course_id": course_id.to_string(),
                },
                doc! {
                    "$set": {
                        "lecture_progress": entry_docs,
                        "completion_percentage": rollup.completion_percentage as i32,
                        "is_completed": rollup.is_completed,
                        "last_accessed": bson::DateTime::from_chrono(now),
                    }
                },
            )
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(result.matched_count > 0)
    }
}

//=========================================================================================
// `PurchaseStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl PurchaseStore for MongoAdapter {
    async fn insert(&self, purchase: &Purchase) -> PortResult<()> {
        self.purchases
            .insert_one(PurchaseRecord::from_domain(purchase))
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    return PortError::Conflict(format!(
                        "Purchase reference {} already exists",
                        purchase.payment_reference
                    ));
                }
                PortError::Unexpected(e.to_string())
            })?;
        Ok(())
    }

    async fn find_by_reference(&self, reference: &str) -> PortResult<Option<Purchase>> {
        let record = self
            .purchases
            .find_one(doc! { "payment_reference": reference })
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        match record {
            Some(record) => Ok(Some(record.to_domain()?)),
            None => Ok(None),
        }
    }

    async fn complete_if_pending(
        &self,
        reference: &str,
        settled_amount: f64,
        now: DateTime<Utc>,
    ) -> PortResult<bool> {
        // The status guard makes pending -> completed a single atomic
        // conditional write; only one concurrent caller can win it.
        let result = self
            .purchases
            .update_one(
                doc! {
                    "payment_reference": reference,
                    "status": PurchaseStatus::Pending.as_str(),
                },
                doc! {
                    "$set": {
                        "status": PurchaseStatus::Completed.as_str(),
                        "amount": settled_amount,
                        "updated_at": bson::DateTime::from_chrono(now),
                    }
                },
            )
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(result.modified_count > 0)
    }

    async fn fail_if_pending(
        &self,
        reference: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> PortResult<bool> {
        let result = self
            .purchases
            .update_one(
                doc! {
                    "payment_reference": reference,
                    "status": PurchaseStatus::Pending.as_str(),
                },
                doc! {
                    "$set": {
                        "status": PurchaseStatus::Failed.as_str(),
                        "failure_reason": reason,
                        "updated_at": bson::DateTime::from_chrono(now),
                    }
                },
            )
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(result.modified_count > 0)
    }

    async fn completed_exists(&self, user_id: Uuid, course_id: Uuid) -> PortResult<bool> {
        let found = self
            .purchases
            .find_one(doc! {
                "user_id": user_id.to_string(),
                "course_id": course_id.to_string(),
                "status": PurchaseStatus::Completed.as_str(),
            })
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(found.is_some())
    }

    async fn completed_course_ids(&self, user_id: Uuid) -> PortResult<Vec<Uuid>> {
        let mut cursor = self
            .purchases
            .find(doc! {
                "user_id": user_id.to_string(),
                "status": PurchaseStatus::Completed.as_str(),
            })
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let mut courses = Vec::new();
        while cursor
            .advance()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
        {
            let record = cursor
                .deserialize_current()
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
            courses.push(parse_uuid("course id", &record.course_id)?);
        }
        Ok(courses)
    }
}
