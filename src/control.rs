//! HTTP command interface.
//!
//! Every command is a `POST /{command}` whose body is handed to
//! [`Command::parse`]:
//!
//! * `POST /send` with `{"pid": "...", "content": "..."}`
//! * `POST /spread` with the raw content as body
//! * `POST /join` with `{"address": "host:port"}`
//!
//! Failures come back as `{"error": "..."}` with a status derived from
//! the error kind.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use log::{info, warn};
use serde_json::json;
use tokio::net::TcpListener;

use crate::command::{Command, CommandOutcome};
use crate::error::Error;
use crate::gossip::Peer;

pub fn router(peer: Arc<Peer>) -> Router {
    Router::new()
        .route("/{command}", post(handle_command))
        .with_state(peer)
}

/// Serve the command interface until `shutdown` resolves.
pub async fn run_control_server<F>(
    bind: SocketAddr,
    peer: Arc<Peer>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind).await?;
    info!("HTTP command server started on {}", listener.local_addr()?);

    axum::serve(listener, router(peer))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP command server terminated");
    Ok(())
}

async fn handle_command(
    State(peer): State<Arc<Peer>>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Response {
    let result = match Command::parse(&kind, &body) {
        Ok(command) => peer.execute(command).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(CommandOutcome::Spread(reports)) => (StatusCode::OK, Json(reports)).into_response(),
        Ok(CommandOutcome::Sent) | Ok(CommandOutcome::JoinSent) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!("Command `{}` failed: {}", kind, e);
            ApiError(e).into_response()
        }
    }
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidCommand(_) | Error::AddressResolution { .. } => StatusCode::BAD_REQUEST,
        Error::PeerUnknown(_) | Error::NotFound(_) | Error::UnsupportedCommand(_) => {
            StatusCode::NOT_FOUND
        }
        Error::Transport { .. } => StatusCode::BAD_GATEWAY,
        Error::ViewClosed => StatusCode::SERVICE_UNAVAILABLE,
        Error::Encode(_) => StatusCode::PAYLOAD_TOO_LARGE,
        Error::Decode(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.0.to_string() }));
        (status_for(&self.0), body).into_response()
    }
}
