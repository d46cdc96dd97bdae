pub mod completion;
pub mod domain;
pub mod enrollment;
pub mod ports;
pub mod progress;
pub mod purchase;

pub use completion::Rollup;
pub use domain::{
    Course, CourseProgress, EnrollOutcome, Enrollment, FulfillmentResult, LectureProgress,
    Purchase, PurchaseStatus,
};
pub use enrollment::EnrollmentLedger;
pub use ports::{CourseCatalog, EnrollmentStore, PortError, PortResult, ProgressStore, PurchaseStore};
pub use progress::{ProgressTracker, ProgressView};
pub use purchase::PurchaseFulfillment;
