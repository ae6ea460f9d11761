//! # Vouch (request authentication and optimistic concurrency)
//!
//! `vouch` is an HTTP API server whose interesting parts sit in front of the
//! handlers: opaque bearer tokens, per-request identity, authorization gates,
//! per-client rate limiting and version-checked updates.
//!
//! ## Request pipeline
//!
//! ```text
//! rate limiter -> authentication -> route -> gate(s) -> handler -> concurrency controller -> store
//! ```
//!
//! - **Tokens:** 16 random bytes, base-32 encoded (26 characters). Only the
//!   SHA-256 of the plaintext is stored; the plaintext is returned once.
//! - **Identity:** every request carries a [`auth::CurrentIdentity`], either a
//!   resolved user or the anonymous sentinel. Handlers never see a request
//!   without one.
//! - **Gates:** [`auth::RequireAuthenticated`] and [`auth::RequireActivated`]
//!   are extractors; activation is only checked once authentication passed.
//!   [`auth::RequirePermission`] adds a permission-code lookup after both.
//! - **Rate limiting:** token bucket per client IP, swept once a minute.
//! - **Concurrency:** updates are conditioned on the observed `version`. A
//!   lost race is an edit conflict, never a silent overwrite.

pub mod api;
pub mod auth;
pub mod cli;
pub mod concurrency;
pub mod limiter;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
