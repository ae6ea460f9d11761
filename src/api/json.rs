//! JSON request bodies with client-facing error messages.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use super::{ApiError, MAX_BODY_BYTES};

/// Like `axum::Json`, but rejections are `400 {"error": ...}` envelopes.
///
/// Request structs should carry `#[serde(deny_unknown_fields)]`.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::BadRequest(format!(
                    "body must not be larger than {MAX_BODY_BYTES} bytes"
                ))
            } else {
                ApiError::BadRequest("body could not be read".to_string())
            }
        })?;

        decode(&bytes).map(Self)
    }
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("body must not be empty".to_string()));
    }

    serde_json::from_slice(bytes).map_err(|err| {
        let message = match err.classify() {
            Category::Syntax => format!(
                "body contains badly-formed JSON (at line {} column {})",
                err.line(),
                err.column()
            ),
            Category::Eof => "body contains badly-formed JSON".to_string(),
            Category::Data => describe_data_error(&err),
            Category::Io => "body could not be read".to_string(),
        };
        ApiError::BadRequest(message)
    })
}

fn describe_data_error(err: &serde_json::Error) -> String {
    let detail = err.to_string();
    // serde appends " at line L column C"; keep the message short.
    let detail = detail
        .rsplit_once(" at line ")
        .map_or(detail.as_str(), |(head, _)| head);

    if let Some(field) = detail.strip_prefix("unknown field ") {
        let field = field.split(',').next().unwrap_or(field);
        format!("body contains unknown key {field}")
    } else {
        format!("body contains incorrect JSON: {detail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Login {
        email: String,
        #[allow(dead_code)]
        password: String,
    }

    fn message(result: Result<Login, ApiError>) -> String {
        match result {
            Err(ApiError::BadRequest(message)) => message,
            other => format!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_valid_body() {
        let login: Result<Login, _> = decode(br#"{"email":"a@b.co","password":"secret"}"#);
        assert_eq!(login.map(|l| l.email).ok().as_deref(), Some("a@b.co"));
    }

    #[test]
    fn empty_body() {
        assert_eq!(message(decode(b"")), "body must not be empty");
        assert_eq!(message(decode(b"  \n")), "body must not be empty");
    }

    #[test]
    fn syntax_error() {
        assert!(message(decode(br#"{"email": }"#)).starts_with("body contains badly-formed JSON"));
    }

    #[test]
    fn truncated_body() {
        assert_eq!(
            message(decode(br#"{"email": "a@b.co""#)),
            "body contains badly-formed JSON"
        );
    }

    #[test]
    fn unknown_field() {
        let msg = message(decode(
            br#"{"email":"a@b.co","password":"x","admin":true}"#,
        ));
        assert_eq!(msg, "body contains unknown key `admin`");
    }

    #[test]
    fn wrong_type() {
        let msg = message(decode(br#"{"email":7,"password":"x"}"#));
        assert!(msg.starts_with("body contains incorrect JSON"), "{msg}");
    }
}
