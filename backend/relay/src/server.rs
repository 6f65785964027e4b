//! Reference relay server: a [`MemoryRelay`] behind HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{post, put},
    Router,
};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use codepair_core::{ChannelId, ChannelTransport, ClientId, EntityTag, Fetched, TransportError};

use crate::http::CLIENT_ID_HEADER;
use crate::memory::MemoryRelay;
use crate::reporter::{REPORT_CID_HEADER, REPORT_LOG_HEADER};

/// Blobs above this size are refused.
pub const MAX_BLOB_BYTES: usize = 64 * 1024;

/// Routes: `PUT`/`GET /{channel}` and `POST /report`.
pub fn relay_router(relay: Arc<MemoryRelay>) -> Router {
    Router::new()
        .route("/report", post(report))
        .route("/:channel", put(put_channel).get(get_channel))
        .with_state(relay)
}

/// Serve a fresh relay on `addr` until the task is dropped.
#[instrument]
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Relay listening on {}", listener.local_addr()?);
    axum::serve(listener, relay_router(Arc::new(MemoryRelay::new()))).await?;
    Ok(())
}

fn valid_channel(channel: &str) -> bool {
    !channel.is_empty() && channel.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn client_id(headers: &HeaderMap) -> Option<ClientId> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ClientId::from)
}

/// `If-None-Match: *` on a PUT: only write when the channel is empty.
fn create_only(headers: &HeaderMap) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "*")
}

/// `"v3"` on the wire, `v3` in the store.
fn quoted(etag: &EntityTag) -> String {
    format!("\"{etag}\"")
}

fn unquoted(raw: &str) -> EntityTag {
    EntityTag::new(raw.trim().trim_start_matches("W/").trim_matches('"'))
}

fn error_response(err: TransportError) -> Response {
    match err {
        TransportError::NotFound => StatusCode::NOT_FOUND.into_response(),
        TransportError::Conflict => (StatusCode::PRECONDITION_FAILED, "channel already in use").into_response(),
        TransportError::Network(message) => (StatusCode::SERVICE_UNAVAILABLE, message).into_response(),
        TransportError::Rejected { status, message } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
            (status, message).into_response()
        }
    }
}

async fn put_channel(
    State(relay): State<Arc<MemoryRelay>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !valid_channel(&channel) {
        return (StatusCode::BAD_REQUEST, "invalid channel").into_response();
    }
    let Some(sender) = client_id(&headers) else {
        return (StatusCode::BAD_REQUEST, format!("missing {CLIENT_ID_HEADER}")).into_response();
    };
    if body.len() > MAX_BLOB_BYTES {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    let channel = ChannelId::new(channel);
    let written = if create_only(&headers) {
        relay.create(&channel, &sender, body.to_vec()).await
    } else {
        relay.put(&channel, &sender, body.to_vec()).await
    };
    match written {
        Ok(etag) => (StatusCode::OK, [(header::ETAG, quoted(&etag))]).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_channel(
    State(relay): State<Arc<MemoryRelay>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !valid_channel(&channel) {
        return (StatusCode::BAD_REQUEST, "invalid channel").into_response();
    }
    let Some(sender) = client_id(&headers) else {
        return (StatusCode::BAD_REQUEST, format!("missing {CLIENT_ID_HEADER}")).into_response();
    };
    let known = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(unquoted);

    match relay.get(&ChannelId::new(channel), &sender, known.as_ref()).await {
        Ok(Fetched::Unchanged) => StatusCode::NOT_MODIFIED.into_response(),
        Ok(Fetched::Modified(blob)) => (
            StatusCode::OK,
            [
                (header::ETAG, quoted(&blob.etag)),
                (header::CONTENT_TYPE, "application/json".to_string()),
            ],
            blob.body,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn report(headers: HeaderMap, body: Bytes) -> StatusCode {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("-").to_string();
    warn!(
        client = %header_str(REPORT_CID_HEADER),
        log = %header_str(REPORT_LOG_HEADER),
        body = %String::from_utf8_lossy(&body),
        "Pairing failure reported"
    );
    StatusCode::NO_CONTENT
}
