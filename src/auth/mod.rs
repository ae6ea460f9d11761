//! Bearer-token authentication and authorization gates.
//!
//! Flow Overview: [`middleware::authenticate`] resolves the `Authorization`
//! header into a [`CurrentIdentity`] and stores it on the request. Handlers
//! read it back through the [`CurrentIdentity`] extractor, or through the
//! [`RequireAuthenticated`] / [`RequireActivated`] gates which reject the
//! request before the handler body runs. [`RequirePermission`] additionally
//! looks up the identity's [`Permissions`].

mod context;
mod gates;
mod identity;
pub mod middleware;
pub mod password;
pub mod permissions;
pub mod token;

pub use gates::{
    RequireActivated, RequireAuthenticated, RequirePermission, require_activated,
    require_authenticated, require_permission,
};
pub use identity::{CurrentIdentity, Identity, NewIdentity};
pub use middleware::resolve_identity;
pub use permissions::{Permission, Permissions, RecordsWrite};
pub use token::{AuthToken, Scope, TokenError, TokenManager, TokenRecord};
