//! Route handlers.
//!
//! Gate extractors come first in every signature so a rejected caller never
//! gets as far as reading the body.

pub mod health;
pub mod records;
pub mod tokens;
pub mod users;

use axum::http::Method;

use super::ApiError;

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

pub async fn method_not_allowed(method: Method) -> ApiError {
    ApiError::MethodNotAllowed(method)
}
