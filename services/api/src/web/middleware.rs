//! services/api/src/web/middleware.rs
//!
//! Identity middleware for the user-facing routes.
//!
//! Authentication itself is a collaborator of this service: the identity
//! layer in front of it (gateway/session service) verifies credentials and
//! forwards the authenticated user id in the `x-user-id` header. This
//! middleware only consumes that trusted identifier.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// The authenticated user for the current request, pulled from extensions
/// by handlers.
#[derive(Debug, Clone, Copy)]
pub struct AuthedUser(pub Uuid);

/// Middleware that extracts the authenticated user id from the
/// `x-user-id` header.
///
/// If present and well-formed, inserts an `AuthedUser` into request
/// extensions for handlers to use. Otherwise returns 401 Unauthorized.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    // 1. Extract the forwarded identity header
    let user_id_str = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Parse it as a user id
    let user_id = Uuid::parse_str(user_id_str).map_err(|_| StatusCode::UNAUTHORIZED)?;

    // 3. Insert it into request extensions
    req.extensions_mut().insert(AuthedUser(user_id));

    // 4. Continue to the handler
    Ok(next.run(req).await)
}
