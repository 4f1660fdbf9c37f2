//! Join stream framing.
//!
//! The session service writes one JSON event per line, optionally prefixed
//! with `data:`. Bytes are buffered until a newline completes a line; a line
//! is never parsed before that, so decoding does not depend on where the
//! transport splits chunks.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use qbit_protocol::StreamEvent;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::error::{EventParseError, StreamReadError};

pub const DATA_PREFIX: &str = "data:";

/// Decoded events in arrival order. Ends when the response body ends or the
/// transport fails (the failure is yielded as the final item).
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, StreamReadError>> + Send>>;

/// Incremental newline-delimited event decoder.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known to contain no newline
    scanned: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, decoded.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, EventParseError>> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(rel) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + rel;
            let line = self.buffer.split_to(end);
            self.buffer.advance(1);
            self.scanned = 0;
            if let Some(result) = decode_line(&line) {
                out.push(result);
            }
        }
        self.scanned = self.buffer.len();
        out
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// End of input. An unterminated trailing fragment is discarded and
    /// returned for logging.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Decode one complete line. `None` for lines that carry no event.
pub fn decode_line(raw: &[u8]) -> Option<Result<StreamEvent, EventParseError>> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    // SSE comment / keep-alive
    if line.starts_with(':') {
        trace!(component = "decoder", "Skipping comment line");
        return None;
    }

    let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line).trim();
    if payload.is_empty() {
        return None;
    }

    Some(
        serde_json::from_str::<StreamEvent>(payload).map_err(|source| EventParseError {
            line: line.to_string(),
            source,
        }),
    )
}

/// Longest allowed gap between byte chunks. Any chunk resets the timer,
/// including keep-alive comments that decode to nothing.
#[derive(Debug, Clone)]
pub struct IdleLimit {
    limit: Duration,
    /// `false` suspends the limit until it flips back.
    armed: Option<watch::Receiver<bool>>,
}

impl IdleLimit {
    pub fn new(limit: Duration) -> Self {
        Self { limit, armed: None }
    }

    /// A limit that only runs while `armed` holds `true`. The timer restarts
    /// whenever the flag changes.
    pub fn pausable(limit: Duration, armed: watch::Receiver<bool>) -> Self {
        Self {
            limit,
            armed: Some(armed),
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

async fn armed_changed(armed: Option<&mut watch::Receiver<bool>>) {
    if let Some(rx) = armed {
        if rx.changed().await.is_ok() {
            return;
        }
    }
    // Fixed flag: nothing will ever change.
    std::future::pending::<()>().await
}

/// Next raw chunk, or `Err(limit)` once the idle limit runs out.
async fn next_chunk<S>(
    inner: &mut Pin<Box<S>>,
    idle: &mut Option<IdleLimit>,
) -> Result<Option<S::Item>, Duration>
where
    S: Stream,
{
    let Some(idle) = idle else {
        return Ok(inner.next().await);
    };
    let limit = idle.limit;

    loop {
        let armed = idle
            .armed
            .as_mut()
            .map_or(true, |rx| *rx.borrow_and_update());
        if armed {
            tokio::select! {
                next = inner.next() => return Ok(next),
                _ = tokio::time::sleep(limit) => return Err(limit),
                _ = armed_changed(idle.armed.as_mut()) => {}
            }
        } else {
            tokio::select! {
                next = inner.next() => return Ok(next),
                _ = armed_changed(idle.armed.as_mut()) => {}
            }
        }
    }
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    idle: Option<IdleLimit>,
    decoder: LineDecoder,
    ready: VecDeque<StreamEvent>,
    done: bool,
}

/// Adapt a raw byte stream into decoded events. Malformed lines are logged
/// and dropped; they never end the stream. With an `idle` limit, a gap
/// between chunks longer than the limit ends the stream with
/// [`StreamReadError::Idle`].
pub fn decode_stream<S, E>(bytes: S, idle: Option<IdleLimit>) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        inner: Box::pin(bytes),
        idle,
        decoder: LineDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }

            let next = match next_chunk(&mut state.inner, &mut state.idle).await {
                Ok(next) => next,
                Err(limit) => {
                    warn!(
                        component = "decoder",
                        event = "decoder.idle",
                        idle_secs = limit.as_secs_f64(),
                        pending_bytes = state.decoder.pending(),
                        "No stream data within idle limit"
                    );
                    state.done = true;
                    return Some((Err(StreamReadError::Idle(limit.as_secs())), state));
                }
            };

            match next {
                Some(Ok(chunk)) => {
                    for result in state.decoder.feed(&chunk) {
                        match result {
                            Ok(event) => state.ready.push_back(event),
                            Err(e) => warn!(
                                component = "decoder",
                                event = "decoder.line_dropped",
                                error = %e,
                                "Dropping malformed stream line"
                            ),
                        }
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(StreamReadError::Transport(e.to_string())), state));
                }
                None => {
                    if let Some(rest) = state.decoder.finish() {
                        warn!(
                            component = "decoder",
                            event = "decoder.unterminated_line",
                            bytes = rest.len(),
                            "Stream ended mid-line; discarding fragment"
                        );
                    }
                    debug!(component = "decoder", "Byte stream finished");
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbit_protocol::EventKind;

    const BODY: &str = "data:{\"event\":9,\"offset\":1,\"data\":\"explain dos attack\"}\n\
                        \n\
                        data: {\"event\":10,\"offset\":2}\r\n\
                        {\"event\":5,\"offset\":3,\"data\":\"Understanding DoS Attacks – Überblick\"}\n\
                        data:{\"event\":3,\"offset\":4,\"data\":{\"data\":{\"content\":\"A DoS attack is...\"}}}\n";

    fn decode_all(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = LineDecoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.feed(chunk).into_iter().map(|r| r.unwrap()));
        }
        assert_eq!(decoder.finish(), None);
        out
    }

    #[test]
    fn decodes_prefixed_and_bare_lines() {
        let events = decode_all(&[BODY.as_bytes()]);
        let kinds: Vec<_> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::PromptEcho,
                EventKind::Analyzing,
                EventKind::TitleChanged,
                EventKind::Answer
            ]
        );
        assert_eq!(events[3].content(), Some("A DoS attack is..."));
    }

    #[test]
    fn every_two_way_split_decodes_identically() {
        let bytes = BODY.as_bytes();
        let expected = decode_all(&[bytes]);
        // Includes splits inside multi-byte UTF-8 characters.
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_all(&[a, b]), expected, "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time_decodes_identically() {
        let bytes = BODY.as_bytes();
        let expected = decode_all(&[bytes]);
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&chunks), expected);
    }

    #[test]
    fn partial_line_waits_for_newline() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b"data:{\"event\":5,\"data\":\"Fo").is_empty());
        assert!(decoder.pending() > 0);
        let events = decoder.feed(b"o\"}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().title(), Some("Foo"));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn malformed_line_is_reported_not_fatal() {
        let mut decoder = LineDecoder::new();
        let results = decoder.feed(b"{\"event\":10}\nnot-json\n{\"event\":17}\n");
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.line, "not-json");
        assert_eq!(results[2].as_ref().unwrap().kind(), EventKind::Summarizing);
    }

    #[test]
    fn sentinel_only_and_comment_lines_are_skipped() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b"data:\n: keep-alive\ndata:   \n\n").is_empty());
    }

    #[test]
    fn unterminated_tail_is_discarded_at_end() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b"{\"event\":10}").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("{\"event\":10}"));
        assert_eq!(decoder.pending(), 0);
    }

    #[tokio::test]
    async fn decode_stream_skips_bad_lines_and_keeps_order() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data:{\"event\":10}\nnot-")),
            Ok(Bytes::from_static(b"json\ndata:{\"event\":5,\"data\":\"T\"}\n")),
            Ok(Bytes::from_static(b"{\"event\":17}\n")),
        ];
        let events: Vec<_> = decode_stream(futures::stream::iter(chunks), None)
            .map(|r| r.unwrap().event)
            .collect()
            .await;
        assert_eq!(events, vec![10, 5, 17]);
    }

    #[tokio::test]
    async fn transport_error_is_final_item() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"event\":10}\n")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from_static(b"{\"event\":17}\n")),
        ];
        let items: Vec<_> = decode_stream(futures::stream::iter(chunks), None).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1]
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("connection reset"));
    }

    fn paced(
        chunks: Vec<(u64, &'static str)>,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        futures::stream::iter(chunks).then(|(delay_ms, chunk)| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(Bytes::from_static(chunk.as_bytes()))
        })
    }

    #[tokio::test]
    async fn keep_alive_comments_reset_idle_limit() {
        let mut chunks: Vec<(u64, &'static str)> = (0..8).map(|_| (60, ": keep-alive\n")).collect();
        chunks.push((60, "{\"event\":17}\n"));
        let idle = IdleLimit::new(Duration::from_millis(200));

        let items: Vec<_> = decode_stream(paced(chunks), Some(idle)).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().kind(), EventKind::Summarizing);
    }

    #[tokio::test]
    async fn silent_stream_ends_with_idle_error() {
        let chunks = vec![(0, "{\"event\":10}\n"), (600, "{\"event\":17}\n")];
        let idle = IdleLimit::new(Duration::from_millis(100));

        let items: Vec<_> = decode_stream(paced(chunks), Some(idle)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(StreamReadError::Idle(_))));
    }

    #[tokio::test]
    async fn paused_idle_limit_waits_for_data() {
        let (armed_tx, armed_rx) = watch::channel(false);
        let chunks = vec![(300, "{\"event\":10}\n"), (300, "{\"event\":17}\n")];
        let idle = IdleLimit::pausable(Duration::from_millis(100), armed_rx);
        let mut stream = decode_stream(paced(chunks), Some(idle));

        assert_eq!(stream.next().await.unwrap().unwrap().event, 10);
        armed_tx.send_replace(true);
        assert!(matches!(
            stream.next().await,
            Some(Err(StreamReadError::Idle(_)))
        ));
    }
}
