//! Login and logout.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;

use crate::{
    api::{
        ApiError, JsonBody, SharedState,
        validation::{Validator, normalize_email, validate_email, validate_password},
    },
    auth::{RequireAuthenticated, Scope, password},
    store::StoreError,
};

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    email: String,
    #[schema(value_type = String, format = Password)]
    password: SecretString,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct IssuedToken {
    /// Shown once; only its hash is stored.
    token: String,
    expiry: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LoginResponse {
    authentication_token: IssuedToken,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct MessageResponse {
    message: String,
}

#[utoipa::path(
    post,
    path= "/v1/tokens/authentication",
    request_body = LoginRequest,
    responses (
        (status = 201, description = "Authentication token issued", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 422, description = "Validation failed"),
    ),
    tag= "tokens"
)]
#[instrument(skip_all)]
pub async fn login(
    State(state): State<SharedState>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&request.email);

    let mut v = Validator::new();
    validate_email(&mut v, &email);
    validate_password(&mut v, request.password.expose_secret());
    v.finish()?;

    let identity = match state.credentials.find_identity_by_email(&email).await {
        Ok(identity) => identity,
        Err(StoreError::NotFound) => {
            // Same argon2 cost as a wrong password.
            password::verify_decoy(request.password)
                .await
                .map_err(ApiError::fault)?;
            debug!("login for unknown email");
            return Err(ApiError::InvalidCredential);
        }
        Err(err) => return Err(err.into()),
    };

    let matches = password::verify(request.password, identity.password_hash.clone())
        .await
        .map_err(ApiError::fault)?;

    if !matches {
        debug!(user_id = identity.id, "login with wrong password");
        return Err(ApiError::InvalidCredential);
    }

    let token = state
        .tokens
        .issue(identity.id, state.config.token_ttl, Scope::Authentication)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            authentication_token: IssuedToken {
                token: token.plaintext.expose_secret().to_string(),
                expiry: token.expiry,
            },
        }),
    ))
}

#[utoipa::path(
    delete,
    path= "/v1/tokens/authentication",
    responses (
        (status = 200, description = "All authentication tokens of the caller revoked", body = MessageResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearer" = [])),
    tag= "tokens"
)]
pub async fn logout(
    RequireAuthenticated(identity): RequireAuthenticated,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .tokens
        .revoke_all(Scope::Authentication, identity.id)
        .await?;

    Ok(Json(MessageResponse {
        message: "all authentication tokens revoked".to_string(),
    }))
}
