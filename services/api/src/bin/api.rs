//! services/api/src/bin/api.rs

use api_lib::{
    adapters::db::MongoAdapter,
    config::Config,
    error::ApiError,
    web::{
        complete_course_handler, get_progress_handler, initiate_purchase_handler,
        list_enrollments_handler, list_purchases_handler, mark_lecture_handler,
        payment_webhook_handler, purchase_status_handler, require_user,
        reset_progress_handler, rest::ApiDoc, state::AppState,
    },
};
use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use lms_core::{EnrollmentLedger, ProgressTracker, PurchaseFulfillment};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to MongoDB & Create Indexes ---
    info!("Connecting to database...");
    let client = mongodb::Client::with_uri_str(&config.mongodb_uri).await?;
    let adapter = Arc::new(MongoAdapter::new(&client, &config.database_name));
    info!("Creating database indexes...");
    adapter.init_indexes().await?;
    info!("Database indexes ready.");

    // --- 3. Wire the Core Services ---
    let ledger = Arc::new(EnrollmentLedger::new(adapter.clone(), adapter.clone()));
    let tracker = Arc::new(ProgressTracker::new(adapter.clone(), adapter.clone()));
    let fulfillment = Arc::new(PurchaseFulfillment::new(
        adapter.clone(),
        adapter.clone(),
        ledger.clone(),
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        ledger,
        tracker,
        fulfillment,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // The webhook is called by the payment provider, not a logged-in user;
    // its payload is verified upstream by the payments edge.
    let webhook_routes = Router::new().route("/payments/webhook", post(payment_webhook_handler));

    // User-facing routes (trusted identity header required)
    let user_routes = Router::new()
        .route("/courses/{course_id}/progress", get(get_progress_handler))
        .route(
            "/courses/{course_id}/lectures/{lecture_id}/progress",
            post(mark_lecture_handler),
        )
        .route(
            "/courses/{course_id}/progress/complete",
            post(complete_course_handler),
        )
        .route(
            "/courses/{course_id}/progress/reset",
            post(reset_progress_handler),
        )
        .route(
            "/purchases",
            get(list_purchases_handler).post(initiate_purchase_handler),
        )
        .route("/enrollments", get(list_enrollments_handler))
        .route(
            "/courses/{course_id}/purchase-status",
            get(purchase_status_handler),
        )
        .layer(axum_middleware::from_fn(require_user));

    // Combine API routes
    let api_router = Router::new()
        .merge(webhook_routes)
        .merge(user_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
