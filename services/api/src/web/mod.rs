pub mod middleware;
pub mod rest;
pub mod state;

// Re-export the handlers to make them easily accessible to the binary
// that will build the web server router.
pub use middleware::require_user;
pub use rest::{
    complete_course_handler, get_progress_handler, initiate_purchase_handler,
    list_enrollments_handler, list_purchases_handler, mark_lecture_handler,
    payment_webhook_handler, purchase_status_handler, reset_progress_handler,
};
