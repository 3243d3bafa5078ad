use crate::message::parameter::ParameterList;
use crate::server::{response_status, ServerConfig, ServerManager};
use crate::GIT_COMMIT_HASH;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::Form,
    http::{header, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{set_header::SetRequestHeaderLayer, trace::TraceLayer};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub op_endpoint: String,
    pub user_setup_url: Option<String>,
    pub assoc_expire: u64,
}

impl Args {
    /// Provider settings for this endpoint.
    #[must_use]
    pub fn config(&self) -> ServerConfig {
        let config = ServerConfig::new()
            .with_op_endpoint_url(self.op_endpoint.clone())
            .with_expire_in(self.assoc_expire);
        match &self.user_setup_url {
            Some(url) => config.with_user_setup_url(url.clone()),
            None => config,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
}

async fn health() -> impl IntoResponse {
    Json(Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Direct communication endpoint: `associate` and `check_authentication`.
async fn direct(
    Extension(server): Extension<Arc<ServerManager>>,
    Form(fields): Form<Vec<(String, String)>>,
) -> impl IntoResponse {
    let params: ParameterList = fields.into_iter().collect();
    let message = server.process(params);
    let status =
        StatusCode::from_u16(response_status(&message)).unwrap_or(StatusCode::BAD_REQUEST);
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        message.key_value_form_encoding(),
    )
}

fn make_span(request: &Request<Body>) -> Span {
    let path = request.uri().path();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, request_id)
}

/// Provider routes, shared by the binary and tests.
#[must_use]
pub fn router(server: Arc<ServerManager>) -> Router {
    Router::new()
        .route("/openid", post(direct))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(server)),
        )
}

/// Execute the server action.
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    let server = Arc::new(ServerManager::new(args.config()));

    let listener = TcpListener::bind(format!("::0:{}", args.port))
        .await
        .with_context(|| format!("failed to bind port {}", args.port))?;

    info!(
        op_endpoint = args.op_endpoint,
        commit = GIT_COMMIT_HASH,
        "Listening on [::]:{}",
        args.port
    );

    axum::serve(listener, router(server).into_make_service()).await?;

    Ok(())
}
