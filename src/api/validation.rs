//! Input checks shared by the handlers.
//!
//! A [`Validator`] collects one message per field; the first failure for a
//! field wins.

use regex::Regex;
use std::collections::BTreeMap;

use super::ApiError;
use crate::auth::token::TOKEN_LENGTH;

pub const MAX_TEXT_BYTES: usize = 500;
pub const MIN_PASSWORD_BYTES: usize = 8;
pub const MAX_PASSWORD_BYTES: usize = 72;
pub const MAX_PAGE: u32 = 10_000;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Default)]
pub struct Validator {
    errors: BTreeMap<String, String>,
}

impl Validator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` for `key` unless `ok` holds.
    pub fn check(&mut self, ok: bool, key: &str, message: &str) {
        if !ok {
            self.add(key, message);
        }
    }

    pub fn add(&mut self, key: &str, message: &str) {
        self.errors
            .entry(key.to_string())
            .or_insert_with(|| message.to_string());
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// # Errors
    /// `Validation` with every collected message.
    pub fn finish(self) -> Result<(), ApiError> {
        if self.valid() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.errors))
        }
    }
}

/// Lightweight email sanity check.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Emails are compared case-insensitively.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(valid_email(email), "email", "must be a valid email address");
}

pub fn validate_password(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(
        password.len() >= MIN_PASSWORD_BYTES,
        "password",
        "must be at least 8 bytes long",
    );
    v.check(
        password.len() <= MAX_PASSWORD_BYTES,
        "password",
        "must not be more than 72 bytes long",
    );
}

pub fn validate_name(v: &mut Validator, name: &str) {
    validate_text(v, "name", name);
}

/// Required text field of at most 500 bytes.
pub fn validate_text(v: &mut Validator, key: &str, value: &str) {
    v.check(!value.trim().is_empty(), key, "must be provided");
    v.check(
        value.len() <= MAX_TEXT_BYTES,
        key,
        "must not be more than 500 bytes long",
    );
}

pub fn validate_token_plaintext(v: &mut Validator, token: &str) {
    v.check(!token.is_empty(), "token", "must be provided");
    v.check(
        token.len() == TOKEN_LENGTH,
        "token",
        "must be 26 bytes long",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors(v: Validator) -> BTreeMap<String, String> {
        match v.finish() {
            Ok(()) => BTreeMap::new(),
            Err(ApiError::Validation(errors)) => errors,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn first_message_per_field_wins() {
        let mut v = Validator::new();
        v.check(false, "email", "must be provided");
        v.check(false, "email", "must be a valid email address");
        let errors = errors(v);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["email"], "must be provided");
    }

    #[test]
    fn emails() {
        assert!(valid_email("alice@example.com"));
        assert!(!valid_email("alice@example"));
        assert!(!valid_email("alice example@x.io"));
        assert!(!valid_email(""));
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn password_bounds() {
        let mut v = Validator::new();
        validate_password(&mut v, "short");
        assert_eq!(errors(v)["password"], "must be at least 8 bytes long");

        let mut v = Validator::new();
        validate_password(&mut v, &"x".repeat(73));
        assert_eq!(errors(v)["password"], "must not be more than 72 bytes long");

        let mut v = Validator::new();
        validate_password(&mut v, "pa55word");
        assert!(v.valid());
    }

    #[test]
    fn text_fields() {
        let mut v = Validator::new();
        validate_text(&mut v, "title", "   ");
        validate_text(&mut v, "body", &"b".repeat(501));
        validate_name(&mut v, "Alice");
        let errors = errors(v);
        assert_eq!(errors["title"], "must be provided");
        assert_eq!(errors["body"], "must not be more than 500 bytes long");
        assert!(!errors.contains_key("name"));
    }

    #[test]
    fn token_length() {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, "TOOSHORT");
        assert_eq!(errors(v)["token"], "must be 26 bytes long");

        let mut v = Validator::new();
        validate_token_plaintext(&mut v, &"A".repeat(26));
        assert!(v.valid());
    }
}
