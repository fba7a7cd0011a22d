//! Message channel transport.
//!
//! Messages travel over a request/response channel that is independent of the
//! push channel: a failure here is reported but never affects connection state.

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::{
    config::StreamConfig,
    error::{StreamError, StreamResult},
    types::{DispatchResponse, MessageRequest, ProcessAcknowledgement},
};

/// Sends client messages and returns the server's acknowledgement.
#[async_trait]
pub trait MessageDispatcher: Send + Sync + 'static {
    /// Deliver `request` to `url`.
    ///
    /// `Ok(None)` means the server accepted the message without an
    /// acknowledgement payload.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures, non-success statuses and
    /// structured error bodies.
    async fn dispatch(
        &self,
        url: &Url,
        request: &MessageRequest,
    ) -> StreamResult<Option<ProcessAcknowledgement>>;
}

/// Dispatches messages as JSON `POST` requests.
#[derive(Clone, Debug)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    headers: http::HeaderMap,
    bearer_token: Option<String>,
}

impl HttpDispatcher {
    /// Build a dispatcher from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: &StreamConfig) -> StreamResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StreamError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            headers: config.headers.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl MessageDispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        url: &Url,
        request: &MessageRequest,
    ) -> StreamResult<Option<ProcessAcknowledgement>> {
        let mut req = self
            .client
            .post(url.clone())
            .headers(self.headers.clone())
            .json(request);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        debug!(%status, request = %request.message_request_uuid, "Message dispatched");

        parse_dispatch_response(status, &body)
    }
}

/// Interpret a message endpoint response.
///
/// A structured error body wins over the status code, since the server reports
/// some rejections with `200 OK`.
fn parse_dispatch_response(
    status: http::StatusCode,
    body: &[u8],
) -> StreamResult<Option<ProcessAcknowledgement>> {
    match serde_json::from_slice::<DispatchResponse>(body) {
        Ok(DispatchResponse {
            error: Some(error), ..
        }) => Err(StreamError::Dispatch {
            code: error.code,
            messages: error.messages,
        }),
        _ if !status.is_success() => Err(StreamError::api(
            status,
            String::from_utf8_lossy(body).into_owned(),
        )),
        Ok(response) => Ok(response.server_sent_event),
        Err(e) => Err(e.into()),
    }
}
