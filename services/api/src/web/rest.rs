//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::middleware::AuthedUser;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use lms_core::domain::{CourseProgress, LectureProgress, Purchase};
use lms_core::ports::PortError;
use lms_core::progress::ProgressView;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        get_progress_handler,
        mark_lecture_handler,
        complete_course_handler,
        reset_progress_handler,
        initiate_purchase_handler,
        purchase_status_handler,
        list_purchases_handler,
        list_enrollments_handler,
        payment_webhook_handler,
    ),
    components(
        schemas(
            ProgressResponse,
            LectureProgressPayload,
            MarkLectureRequest,
            InitiatePurchaseRequest,
            PurchaseResponse,
            PurchaseStatusResponse,
            PurchasedCoursesResponse,
            EnrolledCoursesResponse,
            PaymentEventPayload,
            WebhookAck,
        )
    ),
    tags(
        (name = "LMS API", description = "Enrollment, lecture progress and purchase endpoints.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct LectureProgressPayload {
    lecture_id: Uuid,
    is_completed: bool,
    watch_time_secs: f64,
    last_watched: DateTime<Utc>,
}

impl LectureProgressPayload {
    fn from_domain(entry: &LectureProgress) -> Self {
        Self {
            lecture_id: entry.lecture_id,
            is_completed: entry.is_completed,
            watch_time_secs: entry.watch_time_secs,
            last_watched: entry.last_watched,
        }
    }
}

/// A user's progress through one course.
#[derive(Serialize, ToSchema)]
pub struct ProgressResponse {
    course_id: Uuid,
    lectures: Vec<LectureProgressPayload>,
    completion_percentage: u8,
    is_completed: bool,
}

impl ProgressResponse {
    fn from_record(record: &CourseProgress) -> Self {
        Self {
            course_id: record.course_id,
            lectures: record.lectures.iter().map(LectureProgressPayload::from_domain).collect(),
            completion_percentage: record.completion_percentage,
            is_completed: record.is_completed,
        }
    }

    fn from_view(view: &ProgressView) -> Self {
        Self {
            course_id: view.course.id,
            lectures: view.lectures.iter().map(LectureProgressPayload::from_domain).collect(),
            completion_percentage: view.completion_percentage,
            is_completed: view.is_completed,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct MarkLectureRequest {
    pub completed: bool,
    /// Seconds watched so far; only ever moves the stored value up.
    pub watch_time_secs: Option<f64>,
}

#[derive(Deserialize, ToSchema)]
pub struct InitiatePurchaseRequest {
    pub course_id: Uuid,
    /// Provider-side reference for the transaction (e.g. a checkout session
    /// id) when the payments edge has already created one. A local
    /// reference is minted otherwise.
    pub payment_reference: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct PurchaseResponse {
    purchase_id: Uuid,
    course_id: Uuid,
    amount: f64,
    status: String,
    payment_reference: String,
}

impl PurchaseResponse {
    fn from_domain(purchase: &Purchase) -> Self {
        Self {
            purchase_id: purchase.id,
            course_id: purchase.course_id,
            amount: purchase.amount,
            status: purchase.status.as_str().to_string(),
            payment_reference: purchase.payment_reference.clone(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PurchaseStatusResponse {
    is_purchased: bool,
}

#[derive(Serialize, ToSchema)]
pub struct PurchasedCoursesResponse {
    course_ids: Vec<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct EnrolledCoursesResponse {
    course_ids: Vec<Uuid>,
}

/// A fulfillment event as delivered by the payment provider. Signature
/// verification happens upstream, before this payload reaches the service;
/// duplicate delivery is expected and handled idempotently.
#[derive(Deserialize, ToSchema)]
pub struct PaymentEventPayload {
    pub reference: String,
    pub amount: f64,
    pub succeeded: bool,
    pub failure_reason: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct WebhookAck {
    received: bool,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn error_response(context: &str, e: PortError) -> (StatusCode, String) {
    let status = match &e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Conflict(_) | PortError::InvalidState(_) => StatusCode::CONFLICT,
        PortError::Validation(_) => StatusCode::BAD_REQUEST,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!("{}: {:?}", context, e);
    (status, e.to_string())
}

//=========================================================================================
// Progress Handlers
//=========================================================================================

/// Get the authenticated user's progress for a course.
///
/// Users who never touched the course get an empty progress set; nothing
/// is created by reading.
#[utoipa::path(
    get,
    path = "/courses/{course_id}/progress",
    responses(
        (status = 200, description = "Current progress", body = ProgressResponse),
        (status = 404, description = "Course not found"),
        (status = 401, description = "Missing or invalid identity header")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course to report progress for.")
    )
)]
pub async fn get_progress_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let view = app_state
        .tracker
        .view(user_id, course_id)
        .await
        .map_err(|e| error_response("Failed to load course progress", e))?;
    Ok(Json(ProgressResponse::from_view(&view)))
}

/// Record progress on a single lecture.
#[utoipa::path(
    post,
    path = "/courses/{course_id}/lectures/{lecture_id}/progress",
    request_body = MarkLectureRequest,
    responses(
        (status = 200, description = "Updated progress", body = ProgressResponse),
        (status = 400, description = "Invalid watch time"),
        (status = 404, description = "Course or lecture not found"),
        (status = 401, description = "Missing or invalid identity header")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course being watched."),
        ("lecture_id" = Uuid, Path, description = "The lecture within the course.")
    )
)]
pub async fn mark_lecture_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path((course_id, lecture_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<MarkLectureRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let record = app_state
        .tracker
        .mark_lecture(
            user_id,
            course_id,
            lecture_id,
            payload.completed,
            payload.watch_time_secs,
            Utc::now(),
        )
        .await
        .map_err(|e| error_response("Failed to update lecture progress", e))?;
    Ok(Json(ProgressResponse::from_record(&record)))
}

/// Mark the whole course as completed.
#[utoipa::path(
    post,
    path = "/courses/{course_id}/progress/complete",
    responses(
        (status = 200, description = "Course marked completed", body = ProgressResponse),
        (status = 404, description = "Course or progress record not found"),
        (status = 401, description = "Missing or invalid identity header")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course to complete.")
    )
)]
pub async fn complete_course_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let record = app_state
        .tracker
        .mark_all_completed(user_id, course_id, Utc::now())
        .await
        .map_err(|e| error_response("Failed to mark course completed", e))?;
    Ok(Json(ProgressResponse::from_record(&record)))
}

/// Reset all progress for a course.
#[utoipa::path(
    post,
    path = "/courses/{course_id}/progress/reset",
    responses(
        (status = 200, description = "Progress reset", body = ProgressResponse),
        (status = 404, description = "Progress record not found"),
        (status = 401, description = "Missing or invalid identity header")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course to reset.")
    )
)]
pub async fn reset_progress_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let record = app_state
        .tracker
        .reset(user_id, course_id, Utc::now())
        .await
        .map_err(|e| error_response("Failed to reset course progress", e))?;
    Ok(Json(ProgressResponse::from_record(&record)))
}

//=========================================================================================
// Purchase Handlers
//=========================================================================================

/// Open a pending purchase for a course at its current price.
#[utoipa::path(
    post,
    path = "/purchases",
    request_body = InitiatePurchaseRequest,
    responses(
        (status = 201, description = "Pending purchase created", body = PurchaseResponse),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Course already purchased"),
        (status = 401, description = "Missing or invalid identity header")
    )
)]
pub async fn initiate_purchase_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(payload): Json<InitiatePurchaseRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let reference = payload
        .payment_reference
        .unwrap_or_else(|| format!("po_{}", Uuid::new_v4().simple()));

    let purchase = app_state
        .fulfillment
        .initiate(user_id, payload.course_id, reference, Utc::now())
        .await
        .map_err(|e| error_response("Failed to initiate purchase", e))?;
    Ok((StatusCode::CREATED, Json(PurchaseResponse::from_domain(&purchase))))
}

/// Whether the authenticated user has a completed purchase for the course.
#[utoipa::path(
    get,
    path = "/courses/{course_id}/purchase-status",
    responses(
        (status = 200, description = "Purchase status", body = PurchaseStatusResponse),
        (status = 401, description = "Missing or invalid identity header")
    ),
    params(
        ("course_id" = Uuid, Path, description = "The course to check.")
    )
)]
pub async fn purchase_status_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let is_purchased = app_state
        .fulfillment
        .is_purchased(user_id, course_id)
        .await
        .map_err(|e| error_response("Failed to check purchase status", e))?;
    Ok(Json(PurchaseStatusResponse { is_purchased }))
}

/// Courses from the authenticated user's completed purchases.
#[utoipa::path(
    get,
    path = "/purchases",
    responses(
        (status = 200, description = "Purchased courses", body = PurchasedCoursesResponse),
        (status = 401, description = "Missing or invalid identity header")
    )
)]
pub async fn list_purchases_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let course_ids = app_state
        .fulfillment
        .purchased_courses(user_id)
        .await
        .map_err(|e| error_response("Failed to list purchased courses", e))?;
    Ok(Json(PurchasedCoursesResponse { course_ids }))
}

/// Courses the authenticated user is enrolled in.
#[utoipa::path(
    get,
    path = "/enrollments",
    responses(
        (status = 200, description = "Enrolled courses", body = EnrolledCoursesResponse),
        (status = 401, description = "Missing or invalid identity header")
    )
)]
pub async fn list_enrollments_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let course_ids = app_state
        .ledger
        .enrolled_courses(user_id)
        .await
        .map_err(|e| error_response("Failed to list enrollments", e))?;
    Ok(Json(EnrolledCoursesResponse { course_ids }))
}

/// Payment-provider fulfillment webhook.
///
/// The provider redelivers events until acknowledged, so the same event can
/// arrive more than once; fulfillment is idempotent end-to-end and a replay
/// is acknowledged exactly like the first delivery.
#[utoipa::path(
    post,
    path = "/payments/webhook",
    request_body = PaymentEventPayload,
    responses(
        (status = 200, description = "Event processed", body = WebhookAck),
        (status = 404, description = "Unknown purchase reference"),
        (status = 409, description = "Purchase in a terminal state that contradicts the event")
    )
)]
pub async fn payment_webhook_handler(
    State(app_state): State<Arc<AppState>>,
    Json(event): Json<PaymentEventPayload>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let now = Utc::now();
    if event.succeeded {
        let result = app_state
            .fulfillment
            .fulfill(&event.reference, event.amount, now)
            .await
            .map_err(|e| error_response("Failed to fulfill purchase", e))?;
        info!(
            reference = %event.reference,
            newly_fulfilled = result.newly_fulfilled,
            "payment event fulfilled"
        );
    } else {
        let reason = event.failure_reason.as_deref().unwrap_or("payment failed");
        app_state
            .fulfillment
            .fail(&event.reference, reason, now)
            .await
            .map_err(|e| error_response("Failed to record payment failure", e))?;
        info!(reference = %event.reference, "payment event recorded as failed");
    }
    Ok(Json(WebhookAck { received: true }))
}
