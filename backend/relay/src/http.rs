//! HTTP client for a remote relay.
//!
//! `PUT {base}/{channel}` overwrites the blob, or with `If-None-Match: *`
//! only creates it. `GET {base}/{channel}` reads it back with
//! `If-None-Match`. Every request names its client in [`CLIENT_ID_HEADER`].

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use tracing::{debug, warn};

use codepair_core::{ChannelBlob, ChannelId, ChannelTransport, ClientId, EntityTag, Fetched, TransportError};

pub const CLIENT_ID_HEADER: &str = "X-KeyExchange-Id";

pub struct HttpRelay {
    base_url: String,
    http: Client,
}

impl HttpRelay {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string(), http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn channel_url(&self, channel: &ChannelId) -> String {
        format!("{}/{}", self.base_url, channel)
    }

    async fn write(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        body: Vec<u8>,
        create_only: bool,
    ) -> Result<EntityTag, TransportError> {
        let url = self.channel_url(channel);
        debug!(%url, bytes = body.len(), create_only, "PUT channel");
        let mut request = self
            .http
            .put(&url)
            .header(CLIENT_ID_HEADER, sender.as_str())
            .header(header::CONTENT_TYPE, "application/json");
        if create_only {
            request = request.header(header::IF_NONE_MATCH, "*");
        }
        let response = request.body(body).send().await.map_err(network)?;

        if !response.status().is_success() {
            return Err(classify(response).await);
        }
        etag_of(&response).ok_or_else(|| {
            warn!(%url, "relay accepted a write without an ETag");
            TransportError::Rejected { status: response.status().as_u16(), message: "missing ETag".into() }
        })
    }
}

fn network(err: reqwest::Error) -> TransportError {
    TransportError::Network(err.to_string())
}

/// Map a non-success status onto the transport taxonomy.
async fn classify(response: Response) -> TransportError {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return TransportError::NotFound;
    }
    if status == StatusCode::PRECONDITION_FAILED {
        return TransportError::Conflict;
    }
    let message = response.text().await.unwrap_or_default();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        TransportError::Network(format!("relay answered {status}: {message}"))
    } else {
        TransportError::Rejected { status: status.as_u16(), message }
    }
}

fn etag_of(response: &Response) -> Option<EntityTag> {
    response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(EntityTag::new)
}

#[async_trait]
impl ChannelTransport for HttpRelay {
    async fn put(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        body: Vec<u8>,
    ) -> Result<EntityTag, TransportError> {
        self.write(channel, sender, body, false).await
    }

    async fn create(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        body: Vec<u8>,
    ) -> Result<EntityTag, TransportError> {
        self.write(channel, sender, body, true).await
    }

    async fn get(
        &self,
        channel: &ChannelId,
        sender: &ClientId,
        known: Option<&EntityTag>,
    ) -> Result<Fetched, TransportError> {
        let url = self.channel_url(channel);
        let mut request = self.http.get(&url).header(CLIENT_ID_HEADER, sender.as_str());
        if let Some(etag) = known {
            request = request.header(header::IF_NONE_MATCH, etag.as_str());
        }
        let response = request.send().await.map_err(network)?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::Unchanged);
        }
        if !status.is_success() {
            return Err(classify(response).await);
        }

        let etag = etag_of(&response).ok_or_else(|| TransportError::Rejected {
            status: status.as_u16(),
            message: "missing ETag".into(),
        })?;
        let body = response.bytes().await.map_err(network)?.to_vec();
        debug!(%url, %etag, bytes = body.len(), "GET channel");
        Ok(Fetched::Modified(ChannelBlob { body, etag }))
    }
}
