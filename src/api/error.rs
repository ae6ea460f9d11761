//! Error responses.
//!
//! Every failure leaves the server as `{"error": ...}` with a fixed message per
//! kind. Server faults are logged in the request span and never echo detail.

use axum::{
    Json,
    http::{HeaderValue, Method, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::error;

use crate::{
    auth::TokenError,
    store::{ConflictKind, StoreError},
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Header or token has the wrong shape; raised before any store access.
    #[error("invalid authentication credentials")]
    MalformedCredential,
    /// Login with an unknown email or a wrong password.
    #[error("invalid authentication credentials")]
    InvalidCredential,
    #[error("invalid or missing authentication token")]
    InvalidAuthenticationToken,
    #[error("you must be authenticated to access this resource")]
    AuthorizationRequired,
    #[error("your user account must be activated to access this resource")]
    AccountNotActivated,
    #[error("your user account doesn't have the necessary permissions to access this resource")]
    PermissionDenied,
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("a record with this {0} already exists")]
    DuplicateUnique(&'static str),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("the requested resource could not be found")]
    NotFound,
    #[error("the {0} method is not supported for this resource")]
    MethodNotAllowed(Method),
    #[error("{0}")]
    BadRequest(String),
    #[error("failed validation")]
    Validation(BTreeMap<String, String>),
    #[error("the server encountered a problem and could not process your request")]
    ServerFault(#[source] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedCredential
            | Self::InvalidCredential
            | Self::InvalidAuthenticationToken
            | Self::AuthorizationRequired => StatusCode::UNAUTHORIZED,
            Self::AccountNotActivated | Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::EditConflict => StatusCode::CONFLICT,
            Self::DuplicateUnique(_) | Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServerFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wrap any unexpected failure.
    pub fn fault(err: impl Into<anyhow::Error>) -> Self {
        Self::ServerFault(err.into())
    }

    /// Single-field validation failure.
    pub fn invalid(field: &str, message: &str) -> Self {
        Self::Validation(BTreeMap::from([(field.to_string(), message.to_string())]))
    }

    fn body(&self) -> Value {
        match self {
            Self::Validation(errors) => json!({ "error": errors }),
            Self::DuplicateUnique(field) => json!({ "error": { field.to_string(): self.to_string() } }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::ServerFault(err) = &self {
            error!("{err:#}");
        }

        let mut response = (self.status(), Json(self.body())).into_response();

        if matches!(
            self,
            Self::MalformedCredential | Self::InvalidAuthenticationToken
        ) {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::Conflict(ConflictKind::Edit) => Self::EditConflict,
            StoreError::Conflict(ConflictKind::Duplicate(field)) => Self::DuplicateUnique(field),
            StoreError::Timeout(_) | StoreError::Fault(_) => Self::ServerFault(err.into()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        Self::ServerFault(err.into())
    }
}
