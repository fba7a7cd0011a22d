//! Incremental decoding of `text/event-stream` bodies into [`Frame`]s.
//!
//! Follows the event stream interpretation rules of the
//! [HTML Living Standard](https://html.spec.whatwg.org/multipage/server-sent-events.html):
//! LF, CR and CRLF line endings, an optional leading BOM, `:` comments, and
//! the `event`, `data`, `id` and `retry` fields. A frame is dispatched on a
//! blank line and only if it carried at least one `data` line. Invalid UTF-8
//! is replaced with U+FFFD rather than rejected.

use std::{
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};

use bytes::{Buf, Bytes, BytesMut};
use futures_core::Stream;

use crate::error::{StreamError, StreamResult};

const LF: u8 = b'\n';
const CR: u8 = b'\r';
const BOM: &[u8; 3] = b"\xEF\xBB\xBF";
const DEFAULT_EVENT: &str = "message";

/// Default upper bound on the length of a single line, terminator excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// One frame received over the push channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Event type (`"message"` when the server sent none).
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Last event id in effect when the frame was dispatched.
    pub id: String,
    /// Reconnection hint carried by the frame.
    pub retry: Option<Duration>,
}

/// Push-based decoder; feed chunks with [`push`](Self::push) and drain
/// frames with [`next_frame`](Self::next_frame).
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_line_length: usize,
    bom_checked: bool,
    event: Option<String>,
    data: Option<String>,
    retry: Option<Duration>,
    last_event_id: String,
    retry_hint: Option<Duration>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            bom_checked: false,
            event: None,
            data: None,
            retry: None,
            last_event_id: String::new(),
            retry_hint: None,
        }
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject lines longer than `max` bytes instead of buffering them.
    #[must_use]
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Append a chunk of the body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Decode buffered lines until a frame is complete.
    ///
    /// Returns `Ok(None)` when more input is needed.
    ///
    /// # Errors
    ///
    /// Returns a decode error if a line exceeds the maximum line length. The
    /// buffered input is discarded.
    pub fn next_frame(&mut self) -> StreamResult<Option<Frame>> {
        if !self.bom_checked {
            let n = self.buffer.len().min(BOM.len());
            if self.buffer[..n] != BOM[..n] {
                self.bom_checked = true;
            } else if n == BOM.len() {
                self.buffer.advance(BOM.len());
                self.bom_checked = true;
            } else {
                return Ok(None);
            }
        }

        while let Some(line) = self.take_line()? {
            let line = String::from_utf8_lossy(&line);
            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    return Ok(Some(frame));
                }
                continue;
            }
            self.apply_line(&line);
        }
        Ok(None)
    }

    /// The id that should be sent as `Last-Event-ID` on reconnection.
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// The most recent `retry:` value seen, even on frames without data.
    pub fn retry_hint(&self) -> Option<Duration> {
        self.retry_hint
    }

    /// Split the next complete line off the buffer, without its terminator.
    fn take_line(&mut self) -> StreamResult<Option<Bytes>> {
        let Some(pos) = memchr::memchr2(LF, CR, &self.buffer) else {
            if self.buffer.len() > self.max_line_length {
                return Err(self.line_too_long());
            }
            return Ok(None);
        };
        if pos > self.max_line_length {
            return Err(self.line_too_long());
        }
        let terminator = if self.buffer[pos] == CR {
            // A trailing CR may be the first half of CRLF.
            if pos + 1 == self.buffer.len() {
                return Ok(None);
            }
            if self.buffer[pos + 1] == LF { 2 } else { 1 }
        } else {
            1
        };
        let line = self.buffer.split_to(pos).freeze();
        self.buffer.advance(terminator);
        Ok(Some(line))
    }

    fn line_too_long(&mut self) -> StreamError {
        self.buffer.clear();
        StreamError::decode(format!(
            "line exceeds maximum length of {} bytes",
            self.max_line_length
        ))
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" if !value.contains('\0') => self.last_event_id = value.to_string(),
            "retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                if let Ok(ms) = value.parse() {
                    let retry = Duration::from_millis(ms);
                    self.retry = Some(retry);
                    self.retry_hint = Some(retry);
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let retry = self.retry.take();
        let data = self.data.take()?;
        Some(Frame {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id: self.last_event_id.clone(),
            retry,
        })
    }
}

pin_project_lite::pin_project! {
    /// A [`Stream`] of [`Frame`]s decoded from a stream of byte chunks.
    #[derive(Debug)]
    pub struct FrameStream<S> {
        #[pin]
        inner: S,
        decoder: FrameDecoder,
        finished: bool,
    }
}

impl<S> FrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_last_event_id(inner, String::new())
    }

    /// Start decoding with a known last event id, e.g. after a reconnection.
    pub fn with_last_event_id(inner: S, last_event_id: String) -> Self {
        let decoder = FrameDecoder {
            last_event_id,
            ..FrameDecoder::default()
        };
        Self {
            inner,
            decoder,
            finished: false,
        }
    }

    /// Reject lines longer than `max` bytes.
    #[must_use]
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.decoder.max_line_length = max;
        self
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }
}

impl<S> Stream for FrameStream<S>
where
    S: Stream<Item = StreamResult<Bytes>>,
{
    type Item = StreamResult<Frame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match this.decoder.next_frame() {
                Ok(Some(frame)) => return Poll::Ready(Some(Ok(frame))),
                Err(e) => return Poll::Ready(Some(Err(e))),
                Ok(None) if *this.finished => return Poll::Ready(None),
                Ok(None) => {}
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.decoder.push(&chunk),
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                // A partial frame at EOF is discarded.
                None => *this.finished = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    fn decode_all(input: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        decoder.push(input);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().expect("valid input") {
            frames.push(frame);
        }
        frames
    }

    async fn collect(chunks: Vec<&'static [u8]>) -> Vec<Frame> {
        let stream = futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, StreamError>(Bytes::from_static(c))),
        );
        FrameStream::new(stream)
            .map(|f| f.expect("valid frame"))
            .collect()
            .await
    }

    #[test]
    fn test_single_frame() {
        let frames = decode_all(b"data: {\"uuid\":\"abc\"}\n\n");
        assert_eq!(
            frames,
            vec![Frame {
                event: "message".to_string(),
                data: "{\"uuid\":\"abc\"}".to_string(),
                id: String::new(),
                retry: None,
            }]
        );
    }

    #[test]
    fn test_multi_line_data_and_named_event() {
        let frames = decode_all(b"event: stdout\ndata: line one\ndata: line two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "stdout");
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn test_line_endings() {
        let frames = decode_all(b"data: a\r\n\r\ndata: b\r\rdata: c\n\n");
        let data: Vec<_> = frames.iter().map(|f| f.data.as_str()).collect();
        assert_eq!(data, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_comments_and_unknown_fields_ignored() {
        let frames = decode_all(b": keep-alive\nfoo: bar\ndata:x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn test_frame_without_data_is_dropped() {
        let frames = decode_all(b"event: ping\n\nretry: 1500\n\ndata: y\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].retry, None);
    }

    #[test]
    fn test_retry_hint_kept() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"retry: 1500\n\nretry: soon\n\n");
        assert!(decoder.next_frame().expect("valid").is_none());
        assert_eq!(decoder.retry_hint(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_id_persists_and_rejects_nul() {
        let frames = decode_all(b"id: 7\ndata: a\n\ndata: b\n\nid: x\0y\ndata: c\n\n");
        let ids: Vec<_> = frames.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["7", "7", "7"]);
    }

    #[test]
    fn test_bom_is_stripped() {
        let frames = decode_all(b"\xEF\xBB\xBFdata: a\n\n");
        assert_eq!(frames[0].data, "a");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let frames = decode_all(b"data: caf\xFF\n\ndata: ok\n\n");
        let data: Vec<_> = frames.iter().map(|f| f.data.as_str()).collect();
        assert_eq!(data, vec!["caf\u{FFFD}", "ok"]);
    }

    #[test]
    fn test_unterminated_line_over_limit() {
        let mut decoder = FrameDecoder::new().with_max_line_length(8);
        decoder.push(b"data: 12");
        assert!(decoder.next_frame().expect("within limit").is_none());

        decoder.push(b"345");
        let err = decoder.next_frame().expect_err("over limit");
        assert!(matches!(err, StreamError::Decode { .. }));
        assert!(err.to_string().contains("8 bytes"));

        // The oversized input is dropped; decoding continues afterwards.
        decoder.push(b"data: ok\n\n");
        let frame = decoder.next_frame().expect("valid").expect("frame");
        assert_eq!(frame.data, "ok");
    }

    #[test]
    fn test_terminated_line_over_limit() {
        let mut decoder = FrameDecoder::new().with_max_line_length(4);
        decoder.push(b"data: long\n\n");
        assert!(matches!(
            decoder.next_frame(),
            Err(StreamError::Decode { .. })
        ));
    }

    #[test]
    fn test_default_line_limit() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&vec![b'x'; DEFAULT_MAX_LINE_LENGTH]);
        assert!(decoder.next_frame().expect("at limit").is_none());
        decoder.push(b"x");
        assert!(decoder.next_frame().is_err());
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let frames = collect(vec![
            &b"\xEF\xBB"[..],
            &b"\xBFda"[..],
            &b"ta: hel"[..],
            &b"lo\r"[..],
            &b"\n\r\n"[..],
        ])
        .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "hello");
    }

    #[tokio::test]
    async fn test_partial_frame_at_eof_is_discarded() {
        let frames = collect(vec![&b"data: complete\n\n"[..], &b"data: partial\n"[..]]).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "complete");
    }

    #[tokio::test]
    async fn test_resume_id_is_used() {
        let stream = futures_util::stream::iter(vec![Ok::<_, StreamError>(Bytes::from_static(
            b"data: a\n\n",
        ))]);
        let mut frames = FrameStream::with_last_event_id(stream, "41".to_string());
        let frame = frames.next().await.expect("frame").expect("valid");
        assert_eq!(frame.id, "41");
    }

    #[tokio::test]
    async fn test_transport_error_is_forwarded() {
        let stream = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err(StreamError::StreamEnded),
        ]);
        let results: Vec<_> = FrameStream::new(stream).collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(StreamError::StreamEnded)));
    }
}
