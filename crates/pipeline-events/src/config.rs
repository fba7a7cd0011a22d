//! Event-stream client configuration.

use std::time::Duration;

use url::Url;

use crate::{frame::DEFAULT_MAX_LINE_LENGTH, types::StreamIdentifier};

/// Placeholder substituted with the stream identifier in endpoint paths.
pub const STREAM_PLACEHOLDER: &str = "{uuid}";

/// Configuration for an [`EventStreamClient`](crate::EventStreamClient).
///
/// Provides sensible defaults and chainable setter methods. Endpoint paths are
/// templates: every `{uuid}` is replaced with the percent-encoded stream
/// identifier when the client mounts.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Base URL of the pipeline server (scheme, host, optional prefix).
    pub base_url: String,
    /// Path template of the push channel.
    pub stream_path: String,
    /// Path template of the message (request/response) channel.
    pub message_path: String,
    /// Additional HTTP headers sent on both channels.
    pub headers: http::HeaderMap,
    /// Optional bearer token sent as `Authorization` on both channels.
    pub bearer_token: Option<String>,
    /// Push channel handshake timeout.
    pub connect_timeout: Duration,
    /// Timeout of a single message dispatch.
    pub request_timeout: Duration,
    /// Reconnection attempts allowed within one failure streak.
    pub max_connection_attempts: u32,
    /// Base reconnection delay; the Nth retry waits `N * base`.
    pub reconnect_base_delay: Duration,
    /// Capacity of the command channel.
    pub command_channel_capacity: usize,
    /// Longest push-channel line accepted, in bytes.
    pub max_line_length: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            stream_path: "/api/event_streams/{uuid}".to_string(),
            message_path: "/api/event_streams/{uuid}/messages".to_string(),
            headers: http::HeaderMap::new(),
            bearer_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_connection_attempts: 5,
            reconnect_base_delay: Duration::from_millis(1000),
            command_channel_capacity: 64,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl StreamConfig {
    /// Create a new configuration for the given server base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the push channel path template.
    #[must_use]
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Set the message channel path template.
    #[must_use]
    pub fn message_path(mut self, path: impl Into<String>) -> Self {
        self.message_path = path.into();
        self
    }

    /// Set additional HTTP headers.
    #[must_use]
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the bearer token.
    #[must_use]
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set the push channel handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the message dispatch timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the maximum number of reconnection attempts.
    #[must_use]
    pub fn max_connection_attempts(mut self, attempts: u32) -> Self {
        self.max_connection_attempts = attempts;
        self
    }

    /// Set the base reconnection delay.
    #[must_use]
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the command channel capacity.
    #[must_use]
    pub fn command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Set the longest push-channel line accepted before the stream is
    /// treated as malformed.
    #[must_use]
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Resolve the push channel URL for a stream.
    ///
    /// # Errors
    ///
    /// Returns an error message if the base URL or path cannot be parsed.
    pub fn stream_url(&self, stream: &StreamIdentifier) -> Result<Url, String> {
        self.resolve(&self.stream_path, stream)
    }

    /// Resolve the message channel URL for a stream.
    ///
    /// # Errors
    ///
    /// Returns an error message if the base URL or path cannot be parsed.
    pub fn message_url(&self, stream: &StreamIdentifier) -> Result<Url, String> {
        self.resolve(&self.message_path, stream)
    }

    fn resolve(&self, template: &str, stream: &StreamIdentifier) -> Result<Url, String> {
        let mut base =
            Url::parse(&self.base_url).map_err(|e| format!("Invalid base URL: {e}"))?;
        if base.cannot_be_a_base() {
            return Err("Base URL cannot be a base".to_string());
        }

        let mut segments: Vec<String> = base
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        for seg in template.split('/').filter(|seg| !seg.is_empty()) {
            segments.push(seg.replace(STREAM_PLACEHOLDER, stream.as_str()));
        }

        // `extend` percent-encodes each segment, so identifiers containing
        // `/` or `?` stay inside their own segment.
        base.path_segments_mut()
            .map_err(|()| "Base URL cannot be a base".to_string())?
            .clear()
            .extend(segments.iter());
        Ok(base)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Base URL cannot be empty".to_string());
        }
        let base = Url::parse(&self.base_url).map_err(|e| format!("Invalid base URL: {e}"))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(format!("Unsupported URL scheme: {}", base.scheme()));
        }
        if !self.stream_path.contains(STREAM_PLACEHOLDER) {
            return Err("Stream path must contain {uuid}".to_string());
        }
        if self.reconnect_base_delay.is_zero() {
            return Err("Reconnect base delay must be > 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("Request timeout must be > 0".to_string());
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        if self.max_line_length == 0 {
            return Err("Max line length must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: &str) -> StreamIdentifier {
        StreamIdentifier::new(id).expect("valid identifier")
    }

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert!(config.base_url.is_empty());
        assert_eq!(config.stream_path, "/api/event_streams/{uuid}");
        assert_eq!(config.message_path, "/api/event_streams/{uuid}/messages");
        assert!(config.headers.is_empty());
        assert!(config.bearer_token.is_none());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_connection_attempts, 5);
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(1000));
        assert_eq!(config.command_channel_capacity, 64);
        assert_eq!(config.max_line_length, 1024 * 1024);
    }

    #[test]
    fn test_builder_pattern() {
        let mut headers = http::HeaderMap::new();
        headers.insert("X-Api-Key", "key".parse().expect("valid header value"));

        let config = StreamConfig::new("http://localhost:6789")
            .stream_path("/events/{uuid}")
            .message_path("/events/{uuid}/send")
            .headers(headers)
            .bearer_token("token")
            .connect_timeout(Duration::from_secs(3))
            .request_timeout(Duration::from_secs(4))
            .max_connection_attempts(3)
            .reconnect_base_delay(Duration::from_millis(250))
            .command_channel_capacity(8)
            .max_line_length(4096);

        assert_eq!(config.base_url, "http://localhost:6789");
        assert_eq!(config.stream_path, "/events/{uuid}");
        assert_eq!(config.message_path, "/events/{uuid}/send");
        assert_eq!(
            config
                .headers
                .get("X-Api-Key")
                .map(|v| v.to_str().expect("valid str")),
            Some("key")
        );
        assert_eq!(config.bearer_token.as_deref(), Some("token"));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_secs(4));
        assert_eq!(config.max_connection_attempts, 3);
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(250));
        assert_eq!(config.command_channel_capacity, 8);
        assert_eq!(config.max_line_length, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_urls() {
        let config = StreamConfig::new("http://localhost:6789/prefix/");
        let id = stream("abc");
        assert_eq!(
            config.stream_url(&id).expect("url").as_str(),
            "http://localhost:6789/prefix/api/event_streams/abc"
        );
        assert_eq!(
            config.message_url(&id).expect("url").as_str(),
            "http://localhost:6789/prefix/api/event_streams/abc/messages"
        );
    }

    #[test]
    fn test_resolve_encodes_identifier() {
        let config = StreamConfig::new("http://localhost:6789");
        let url = config.stream_url(&stream("a/b c")).expect("url");
        assert_eq!(url.path(), "/api/event_streams/a%2Fb%20c");
    }

    #[test]
    fn test_validation_empty_url() {
        let result = StreamConfig::default().validate();
        assert_eq!(result.expect_err("should fail"), "Base URL cannot be empty");
    }

    #[test]
    fn test_validation_bad_scheme() {
        let result = StreamConfig::new("ws://localhost").validate();
        assert_eq!(result.expect_err("should fail"), "Unsupported URL scheme: ws");
    }

    #[test]
    fn test_validation_missing_placeholder() {
        let result = StreamConfig::new("http://localhost")
            .stream_path("/events")
            .validate();
        assert_eq!(
            result.expect_err("should fail"),
            "Stream path must contain {uuid}"
        );
    }

    #[test]
    fn test_validation_zero_delay() {
        let result = StreamConfig::new("http://localhost")
            .reconnect_base_delay(Duration::ZERO)
            .validate();
        assert_eq!(
            result.expect_err("should fail"),
            "Reconnect base delay must be > 0"
        );
    }

    #[test]
    fn test_validation_zero_command_channel() {
        let result = StreamConfig::new("http://localhost")
            .command_channel_capacity(0)
            .validate();
        assert_eq!(
            result.expect_err("should fail"),
            "Command channel capacity must be > 0"
        );
    }

    #[test]
    fn test_validation_zero_line_length() {
        let result = StreamConfig::new("http://localhost")
            .max_line_length(0)
            .validate();
        assert_eq!(result.expect_err("should fail"), "Max line length must be > 0");
    }

    #[test]
    fn test_zero_attempts_is_valid() {
        let config = StreamConfig::new("http://localhost").max_connection_attempts(0);
        assert!(config.validate().is_ok());
    }
}
