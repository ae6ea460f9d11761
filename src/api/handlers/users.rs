//! Registration, activation and the caller's own account.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use crate::{
    api::{
        ApiError, JsonBody, SharedState,
        validation::{
            Validator, normalize_email, validate_email, validate_name, validate_password,
            validate_token_plaintext,
        },
    },
    auth::{
        Identity, NewIdentity, RequireActivated, RequireAuthenticated, Scope, password,
        permissions::DEFAULT_PERMISSIONS, token::hash_token,
    },
    concurrency::apply_update,
    store::StoreError,
};

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    name: String,
    email: String,
    #[schema(value_type = String, format = Password)]
    password: SecretString,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ActivateRequest {
    #[schema(value_type = String)]
    token: SecretString,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct UpdateMeRequest {
    name: Option<String>,
    email: Option<String>,
    #[schema(value_type = Option<String>, format = Password)]
    password: Option<SecretString>,
    /// Version the caller last saw; a stale value is rejected with 409.
    version: Option<i32>,
}

#[derive(ToSchema, Serialize)]
pub struct UserEnvelope {
    user: Identity,
}

#[utoipa::path(
    post,
    path= "/v1/users",
    request_body = RegisterRequest,
    responses (
        (status = 201, description = "Account created, activation token sent", body = UserEnvelope),
        (status = 400, description = "Malformed body"),
        (status = 422, description = "Validation failed or email already registered"),
    ),
    tag= "users"
)]
#[instrument(skip_all)]
pub async fn register(
    State(state): State<SharedState>,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&request.email);

    let mut v = Validator::new();
    validate_name(&mut v, &request.name);
    validate_email(&mut v, &email);
    validate_password(&mut v, request.password.expose_secret());
    v.finish()?;

    let password_hash = password::hash(request.password)
        .await
        .map_err(ApiError::fault)?;

    let identity = state
        .credentials
        .insert_identity(&NewIdentity {
            name: request.name.trim().to_string(),
            email,
            password_hash,
            activated: false,
        })
        .await?;

    state
        .credentials
        .grant_permissions(identity.id, &DEFAULT_PERMISSIONS)
        .await?;

    let token = state
        .tokens
        .issue(identity.id, state.config.activation_ttl, Scope::Activation)
        .await?;

    // The account exists either way; a failed delivery is for the operator.
    if let Err(err) = state.notifier.send_activation(&identity, &token).await {
        error!(user_id = identity.id, "Failed to deliver activation token: {err:#}");
    }

    info!(user_id = identity.id, "user registered");

    Ok((StatusCode::CREATED, Json(UserEnvelope { user: identity })))
}

#[utoipa::path(
    put,
    path= "/v1/users/activated",
    request_body = ActivateRequest,
    responses (
        (status = 200, description = "Account activated", body = UserEnvelope),
        (status = 409, description = "Edit conflict"),
        (status = 422, description = "Invalid or expired activation token"),
    ),
    tag= "users"
)]
#[instrument(skip_all)]
pub async fn activate(
    State(state): State<SharedState>,
    JsonBody(request): JsonBody<ActivateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let plaintext = request.token.expose_secret();

    let mut v = Validator::new();
    validate_token_plaintext(&mut v, plaintext);
    v.finish()?;

    let identity = match state
        .credentials
        .find_identity_by_token(&hash_token(plaintext), Scope::Activation, Utc::now())
        .await
    {
        Ok(identity) => identity,
        Err(StoreError::NotFound) => {
            return Err(ApiError::invalid(
                "token",
                "invalid or expired activation token",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    let user: Identity = apply_update(
        state.credentials.as_ref(),
        identity.id,
        Some(identity.version),
        |user: &mut Identity| {
            user.activated = true;
            Ok(())
        },
    )
    .await?;

    state.tokens.revoke_all(Scope::Activation, user.id).await?;

    info!(user_id = user.id, "user activated");

    Ok(Json(UserEnvelope { user }))
}

#[utoipa::path(
    get,
    path= "/v1/users/me",
    responses (
        (status = 200, description = "The authenticated user", body = UserEnvelope),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearer" = [])),
    tag= "users"
)]
pub async fn me(RequireAuthenticated(identity): RequireAuthenticated) -> impl IntoResponse {
    Json(UserEnvelope {
        user: Identity::clone(&identity),
    })
}

#[utoipa::path(
    patch,
    path= "/v1/users/me",
    request_body = UpdateMeRequest,
    responses (
        (status = 200, description = "Account updated", body = UserEnvelope),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Account not activated"),
        (status = 409, description = "Edit conflict"),
        (status = 422, description = "Validation failed or email already registered"),
    ),
    security(("bearer" = [])),
    tag= "users"
)]
pub async fn update_me(
    RequireActivated(identity): RequireActivated,
    State(state): State<SharedState>,
    JsonBody(request): JsonBody<UpdateMeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = request.email.as_deref().map(normalize_email);

    let mut v = Validator::new();
    if let Some(name) = &request.name {
        validate_name(&mut v, name);
    }
    if let Some(email) = &email {
        validate_email(&mut v, email);
    }
    if let Some(password) = &request.password {
        validate_password(&mut v, password.expose_secret());
    }
    v.finish()?;

    let password_hash = match request.password {
        Some(password) => Some(password::hash(password).await.map_err(ApiError::fault)?),
        None => None,
    };
    let password_changed = password_hash.is_some();

    let user: Identity = apply_update(
        state.credentials.as_ref(),
        identity.id,
        request.version,
        |user: &mut Identity| {
            if let Some(name) = request.name {
                user.name = name.trim().to_string();
            }
            if let Some(email) = email {
                user.email = email;
            }
            if let Some(password_hash) = password_hash {
                user.password_hash = password_hash;
            }
            Ok(())
        },
    )
    .await?;

    if password_changed {
        state
            .tokens
            .revoke_all(Scope::Authentication, user.id)
            .await?;
    }

    Ok(Json(UserEnvelope { user }))
}
