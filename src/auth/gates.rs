//! Authorization gates.
//!
//! Both gates are extractors: put them first in a handler's argument list and
//! the request is rejected before any body is read. [`RequireActivated`] is
//! built on [`RequireAuthenticated`], so an anonymous caller always gets
//! `AuthorizationRequired`, never `AccountNotActivated`.
//! [`RequirePermission`] sits on top of [`RequireActivated`] and needs the
//! application state to look up the identity's permission codes.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::{marker::PhantomData, sync::Arc};

use super::{CurrentIdentity, Identity, Permission, Permissions};
use crate::api::{ApiError, SharedState};

/// Pass only known identities.
///
/// # Errors
/// `AuthorizationRequired` for the anonymous identity.
pub fn require_authenticated(current: &CurrentIdentity) -> Result<Arc<Identity>, ApiError> {
    current.user().cloned().ok_or(ApiError::AuthorizationRequired)
}

/// Pass only known identities whose account is activated.
///
/// # Errors
/// `AuthorizationRequired` for the anonymous identity, `AccountNotActivated`
/// for an inactive one.
pub fn require_activated(current: &CurrentIdentity) -> Result<Arc<Identity>, ApiError> {
    let identity = require_authenticated(current)?;
    if !identity.activated {
        return Err(ApiError::AccountNotActivated);
    }
    Ok(identity)
}

/// Pass only holders of `code`.
///
/// # Errors
/// `PermissionDenied` when `code` is not among `held`.
pub fn require_permission(held: &Permissions, code: &str) -> Result<(), ApiError> {
    if held.include(code) {
        Ok(())
    } else {
        Err(ApiError::PermissionDenied)
    }
}

#[derive(Clone, Debug)]
pub struct RequireAuthenticated(pub Arc<Identity>);

impl<S: Send + Sync> FromRequestParts<S> for RequireAuthenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let current = CurrentIdentity::from_request_parts(parts, state).await?;
        require_authenticated(&current).map(Self)
    }
}

#[derive(Clone, Debug)]
pub struct RequireActivated(pub Arc<Identity>);

impl<S: Send + Sync> FromRequestParts<S> for RequireActivated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RequireAuthenticated(identity) =
            RequireAuthenticated::from_request_parts(parts, state).await?;
        require_activated(&CurrentIdentity::User(identity)).map(Self)
    }
}

/// Activated identity holding the permission `P`.
#[derive(Clone, Debug)]
pub struct RequirePermission<P>(pub Arc<Identity>, PhantomData<P>);

impl<P> RequirePermission<P> {
    #[must_use]
    pub fn identity(&self) -> &Arc<Identity> {
        &self.0
    }
}

impl<P: Permission> FromRequestParts<SharedState> for RequirePermission<P> {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let RequireActivated(identity) = RequireActivated::from_request_parts(parts, state).await?;
        let held = state.credentials.permissions_for_user(identity.id).await?;
        require_permission(&held, P::CODE)?;
        Ok(Self(identity, PhantomData))
    }
}
