//! Named permission codes held by an identity.
//!
//! Codes live in the `permissions` table and are linked to users through
//! `users_permissions`. A code the backend does not know is ignored on grant.

/// Create, update and delete records.
pub const RECORDS_WRITE: &str = "records:write";

/// Every code the backends know about.
pub const PERMISSION_CODES: [&str; 1] = [RECORDS_WRITE];

/// Granted to each account at registration.
pub const DEFAULT_PERMISSIONS: [&str; 1] = [RECORDS_WRITE];

/// The permission codes of one identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Permissions(Vec<String>);

impl Permissions {
    #[must_use]
    pub fn include(&self, code: &str) -> bool {
        self.0.iter().any(|held| held == code)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for Permissions {
    fn from(codes: Vec<String>) -> Self {
        Self(codes)
    }
}

impl<'a> FromIterator<&'a str> for Permissions {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

/// A permission a gate can demand, named at the type level.
pub trait Permission: Send + Sync + 'static {
    const CODE: &'static str;
}

/// Marker for [`RECORDS_WRITE`].
#[derive(Clone, Copy, Debug)]
pub struct RecordsWrite;

impl Permission for RecordsWrite {
    const CODE: &'static str = RECORDS_WRITE;
}
