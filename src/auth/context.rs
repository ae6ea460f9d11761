//! Per-request identity access.

use anyhow::anyhow;
use axum::{extract::FromRequestParts, http::request::Parts};

use super::CurrentIdentity;
use crate::api::ApiError;

impl<S: Send + Sync> FromRequestParts<S> for CurrentIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // The router wraps every route in the authentication middleware, so a
        // missing value means a route was mounted outside of it.
        parts.extensions.get::<Self>().cloned().ok_or_else(|| {
            ApiError::fault(anyhow!(
                "request identity missing: authentication middleware did not run"
            ))
        })
    }
}
