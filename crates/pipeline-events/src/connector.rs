//! Push channel transport.
//!
//! The client talks to the push channel through [`Connector`], which turns a
//! [`ConnectRequest`] into a raw byte stream. [`HttpConnector`] is the
//! production implementation over `reqwest`.

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::TryStreamExt;
use http::{HeaderMap, HeaderValue, header};
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::{
    config::StreamConfig,
    error::{StreamError, StreamResult},
    types::StreamIdentifier,
};

/// Body of an open push channel.
pub type ByteStream = Pin<Box<dyn Stream<Item = StreamResult<Bytes>> + Send>>;

/// Everything needed to open the push channel once.
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    pub url: Url,
    pub stream: StreamIdentifier,
    /// Id of the last frame seen, for resumption.
    pub last_event_id: Option<String>,
}

/// Opens push channel connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake and return the body stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails; the client treats it as a
    /// transport error.
    async fn open(&self, request: &ConnectRequest) -> StreamResult<ByteStream>;
}

/// Opens the push channel as a Server-Sent Events HTTP request.
#[derive(Clone, Debug)]
pub struct HttpConnector {
    client: reqwest::Client,
    headers: HeaderMap,
    bearer_token: Option<String>,
    connect_timeout: Duration,
}

impl HttpConnector {
    /// Build a connector from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &StreamConfig) -> StreamResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            headers: config.headers.clone(),
            bearer_token: config.bearer_token.clone(),
            connect_timeout: config.connect_timeout,
        })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn open(&self, request: &ConnectRequest) -> StreamResult<ByteStream> {
        let mut headers = self.headers.clone();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if let Some(id) = request.last_event_id.as_deref()
            && let Ok(value) = HeaderValue::from_str(id)
        {
            headers.insert(header::HeaderName::from_static("last-event-id"), value);
        }

        let mut req = self.client.get(request.url.clone()).headers(headers);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }

        let resp = timeout(self.connect_timeout, req.send())
            .await
            .map_err(|_| StreamError::timeout(self.connect_timeout))??;

        let status = resp.status();
        if !status.is_success() {
            return Err(StreamError::InvalidStatus { status });
        }

        if let Some(ct) = resp.headers().get(header::CONTENT_TYPE) {
            let ct = ct.to_str().unwrap_or("");
            if !ct.contains("text/event-stream") {
                return Err(StreamError::InvalidContentType {
                    content_type: ct.to_string(),
                });
            }
        }

        debug!(url = %request.url, stream = %request.stream, "Push channel handshake complete");
        Ok(Box::pin(resp.bytes_stream().map_err(StreamError::Http)))
    }
}
