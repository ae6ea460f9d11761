//! HTTP surface: shared state, router and server loop.

use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONNECTION, CONTENT_TYPE},
    },
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
};
use std::{any::Any, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any as AnyOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{TokenManager, middleware::authenticate},
    limiter::{RateLimiter, rate_limit},
    store::{CredentialStore, RecordStore, Store},
};

mod config;
mod error;
pub(crate) mod handlers;
mod json;
mod notifier;
mod openapi;
pub(crate) mod validation;

pub use config::{ApiConfig, Environment};
pub use error::ApiError;
pub use json::JsonBody;
pub use notifier::{ActivationNotifier, LogActivationNotifier, NotifyFuture};
pub use openapi::openapi;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1_048_576;

const REQUEST_ID: &str = "x-request-id";

/// Everything a handler may reach.
pub struct AppState {
    pub credentials: Arc<dyn CredentialStore>,
    pub records: Arc<dyn RecordStore>,
    pub tokens: TokenManager,
    pub limiter: Arc<RateLimiter>,
    pub notifier: Arc<dyn ActivationNotifier>,
    pub config: ApiConfig,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Both store handles point at the same backend.
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        limiter: Arc<RateLimiter>,
        notifier: Arc<dyn ActivationNotifier>,
        config: ApiConfig,
    ) -> Self {
        let credentials: Arc<dyn CredentialStore> = store.clone();
        let records: Arc<dyn RecordStore> = store;

        Self {
            tokens: TokenManager::new(Arc::clone(&credentials)),
            credentials,
            records,
            limiter,
            notifier,
            config,
        }
    }
}

/// Build the full application router.
///
/// Requests pass rate limiting, then authentication, then reach the route.
/// The edge layers wrap everything.
///
/// # Errors
/// Returns an error if a trusted CORS origin is not a valid URL.
pub fn router(state: SharedState) -> Result<Router> {
    let cors = cors_layer(&state.config.cors_trusted_origins)?;
    let (routes, spec) = openapi::api_router().split_for_parts();

    let app = routes
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", spec))
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .layer(from_fn_with_state(state.clone(), authenticate))
        .layer(from_fn_with_state(state.clone(), rate_limit));

    Ok(edge_layers(app, cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state))
}

/// Request ids, tracing, panic recovery and CORS, outermost first.
///
/// Panics are caught inside the request span so the fault log carries the
/// method, URL and request id.
fn edge_layers<S>(app: Router<S>, cors: CorsLayer) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(REQUEST_ID),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                REQUEST_ID,
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(cors),
    )
}

/// Serve until Ctrl-C or SIGTERM.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(port: u16, state: SharedState) -> Result<()> {
    let sweeper = state.limiter.spawn_sweeper();
    let app = router(state)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!("Failed to listen for SIGTERM: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.url = %request.uri(),
        http.route = matched_path,
        request_id
    )
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    let mut response = ApiError::fault(anyhow!("handler panicked: {detail}")).into_response();
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

fn cors_layer(trusted_origins: &[String]) -> Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ]);

    if trusted_origins.is_empty() {
        return Ok(cors.allow_origin(AnyOrigin));
    }

    let origins = trusted_origins
        .iter()
        .map(|origin| origin_header(origin))
        .collect::<Result<Vec<_>>>()?;

    Ok(cors.allow_origin(AllowOrigin::list(origins)))
}

fn origin_header(trusted_origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(trusted_origin)
        .with_context(|| format!("Invalid trusted origin: {trusted_origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Trusted origin must include a valid host: {trusted_origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build trusted origin header")
}
