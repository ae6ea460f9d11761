use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// A user account as stored by the credential store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Identity {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub activated: bool,
    pub version: i32,
}

/// Fields needed to create an identity; the store assigns id, timestamp and version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewIdentity {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub activated: bool,
}

/// Who is making the current request.
///
/// Set exactly once per request by the authentication middleware. There is
/// a single anonymous value, so a check never confuses a real user with it.
#[derive(Clone, Debug, Default)]
pub enum CurrentIdentity {
    #[default]
    Anonymous,
    User(Arc<Identity>),
}

impl CurrentIdentity {
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    #[must_use]
    pub fn user(&self) -> Option<&Arc<Identity>> {
        match self {
            Self::Anonymous => None,
            Self::User(identity) => Some(identity),
        }
    }
}

impl From<Identity> for CurrentIdentity {
    fn from(identity: Identity) -> Self {
        Self::User(Arc::new(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            id: 7,
            created_at: Utc::now(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "$argon2id$v=19$secret".to_string(),
            activated: false,
            version: 1,
        }
    }

    #[test]
    fn anonymous_is_default() {
        let current = CurrentIdentity::default();
        assert!(current.is_anonymous());
        assert!(current.user().is_none());
    }

    #[test]
    fn user_is_not_anonymous() {
        let current = CurrentIdentity::from(identity());
        assert!(!current.is_anonymous());
        assert_eq!(current.user().map(|user| user.id), Some(7));
    }

    #[test]
    fn password_hash_never_serialized() {
        let json = serde_json::to_value(identity()).unwrap_or_default();
        assert_eq!(json["email"], "alice@example.com");
        assert!(json.get("password_hash").is_none());
    }
}
