//! Push-channel client.
//!
//! One long-lived connection per client, read on a dedicated thread. The thread
//! only frames the byte stream into server-sent-event payloads; decoding and
//! everything downstream happens on the owning thread when it calls
//! [`StreamClient::poll`] or [`StreamClient::wait_timeout`], so all state stays
//! single-owner.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──open──▶ Open ──(frames)*──▶ Error ──connect──▶ …
//!                                          └──────close──────▶ Closed
//! ```
//!
//! Reconnect policy lives with the caller (see [`crate::backoff`]).

use std::io::{BufRead, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::error::{ApiError, SyncError};
use incident_protocol::{parse_stream_payload, Incident, StreamMessage};

/// Opens the push channel and hands back a line reader over its body.
///
/// While the connection is idle the reader should fail reads with
/// [`ErrorKind::TimedOut`] or [`ErrorKind::WouldBlock`] at a bounded interval.
/// The reader thread treats those as "nothing yet", checks for teardown and
/// keeps reading; a reader that blocks indefinitely keeps its connection open
/// until the server sends something.
pub trait StreamTransport: Send + Sync {
    fn open(&self) -> Result<Box<dyn BufRead + Send>, ApiError>;

    /// Human-readable endpoint for logs.
    fn describe(&self) -> String {
        "incident stream".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Open,
    Error,
    Closed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::Connecting => "connecting",
            StreamState::Open => "open",
            StreamState::Error => "error",
            StreamState::Closed => "closed",
        }
    }
}

/// What the owning thread learns from one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The connection is up; no message has necessarily arrived yet.
    Ready,
    /// Incidents extracted from one message, in array order. Never empty.
    Incidents(Vec<Incident>),
    /// The connection failed or the server ended it. The client is back to
    /// a reconnectable state.
    Disconnected(SyncError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Event-stream framing
// ─────────────────────────────────────────────────────────────────────────────

/// Line-oriented server-sent-event framer. Only `data:` fields matter here.
#[derive(Debug, Default)]
pub struct SseDecoder {
    data: Vec<String>,
}

impl SseDecoder {
    /// Feeds one line (with or without its terminator). Returns the joined
    /// payload when the line completes an event.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches(['\n', '\r']);

        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let payload = self.data.join("\n");
            self.data.clear();
            return Some(payload);
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

enum StreamSignal {
    Opened,
    Frame(String),
    Failed(String),
    Ended,
}

pub struct StreamClient {
    transport: Arc<dyn StreamTransport>,
    state: StreamState,
    receiver: Option<Receiver<StreamSignal>>,
    shutdown: Option<Arc<AtomicBool>>,
    reader: Option<JoinHandle<()>>,
    last_event_at: Option<DateTime<Utc>>,
    malformed: u64,
}

impl StreamClient {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            transport,
            state: StreamState::Idle,
            receiver: None,
            shutdown: None,
            reader: None,
            last_event_at: None,
            malformed: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    /// Payloads that failed to decode since the client was created.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    /// Starts the connection. While one is already connecting or open this is
    /// a no-op that returns the current state.
    pub fn connect(&mut self) -> StreamState {
        if matches!(self.state, StreamState::Connecting | StreamState::Open) {
            return self.state;
        }

        let (sender, receiver) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let transport = Arc::clone(&self.transport);
        let thread_shutdown = Arc::clone(&shutdown);

        let spawned = thread::Builder::new()
            .name("incident-stream".to_string())
            .spawn(move || read_stream(transport.as_ref(), &sender, &thread_shutdown));

        match spawned {
            Ok(handle) => {
                debug!(endpoint = %self.transport.describe(), "Connecting to incident stream");
                self.receiver = Some(receiver);
                self.shutdown = Some(shutdown);
                self.reader = Some(handle);
                self.state = StreamState::Connecting;
            }
            Err(err) => {
                warn!(error = %err, "Failed to spawn stream reader");
                self.state = StreamState::Error;
            }
        }
        self.state
    }

    /// Drains whatever the reader thread has delivered without blocking.
    pub fn poll(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        loop {
            let Some(receiver) = self.receiver.as_ref() else {
                break;
            };
            match receiver.try_recv() {
                Ok(signal) => self.handle_signal(signal, &mut events),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.handle_signal(
                        StreamSignal::Failed("reader stopped".to_string()),
                        &mut events,
                    );
                    break;
                }
            }
        }
        events
    }

    /// Blocks up to `timeout` for the first signal, then drains the rest.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let first = match self.receiver.as_ref() {
            Some(receiver) => receiver.recv_timeout(timeout),
            None => return events,
        };
        match first {
            Ok(signal) => self.handle_signal(signal, &mut events),
            Err(RecvTimeoutError::Timeout) => return events,
            Err(RecvTimeoutError::Disconnected) => {
                self.handle_signal(
                    StreamSignal::Failed("reader stopped".to_string()),
                    &mut events,
                );
                return events;
            }
        }
        events.extend(self.poll());
        events
    }

    /// Tears the connection down and waits for the reader thread to release
    /// it. Nothing is delivered afterwards.
    pub fn close(&mut self) {
        self.stop_reader();
        if self.state != StreamState::Closed {
            debug!("Incident stream closed");
        }
        self.state = StreamState::Closed;
    }

    fn handle_signal(&mut self, signal: StreamSignal, events: &mut Vec<StreamEvent>) {
        if self.state == StreamState::Closed {
            return;
        }
        match signal {
            StreamSignal::Opened => {
                info!(endpoint = %self.transport.describe(), "Incident stream open");
                self.state = StreamState::Open;
                events.push(StreamEvent::Ready);
            }
            StreamSignal::Frame(payload) => {
                self.last_event_at = Some(Utc::now());
                if let Some(incidents) = self.decode(&payload) {
                    events.push(StreamEvent::Incidents(incidents));
                }
            }
            StreamSignal::Failed(reason) => {
                self.disconnect(reason, events);
            }
            StreamSignal::Ended => {
                self.disconnect("server closed the stream".to_string(), events);
            }
        }
    }

    fn disconnect(&mut self, reason: String, events: &mut Vec<StreamEvent>) {
        warn!(reason = %reason, "Incident stream disconnected");
        self.stop_reader();
        self.state = StreamState::Error;
        events.push(StreamEvent::Disconnected(SyncError::StreamDisconnected(
            reason,
        )));
    }

    /// Signals the reader thread, drops the channel and joins the thread, which
    /// drops the transport's reader and with it the connection.
    fn stop_reader(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.store(true, Ordering::SeqCst);
        }
        self.receiver = None;
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("Stream reader thread panicked");
            }
        }
    }

    fn decode(&mut self, payload: &str) -> Option<Vec<Incident>> {
        match parse_stream_payload(payload) {
            Ok(StreamMessage::Connected { message }) => {
                debug!(message = ?message, "Stream handshake");
                None
            }
            Ok(StreamMessage::ServerError { message }) => {
                warn!(message = ?message, "Stream reported a server-side error");
                None
            }
            Ok(StreamMessage::Unknown { kind }) => {
                debug!(kind = %kind, "Ignoring unknown stream message");
                None
            }
            Ok(StreamMessage::NewIncidents {
                incidents,
                rejected,
            }) => {
                for err in rejected {
                    self.malformed += 1;
                    let err = SyncError::MalformedStreamEvent(err.to_string());
                    warn!(error = %err, "Skipping malformed incident in stream batch");
                }
                (!incidents.is_empty()).then_some(incidents)
            }
            Ok(message) => {
                let incidents = message.into_incidents();
                (!incidents.is_empty()).then_some(incidents)
            }
            Err(err) => {
                self.malformed += 1;
                let err = SyncError::MalformedStreamEvent(err.to_string());
                warn!(error = %err, "Skipping malformed stream event");
                None
            }
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_stream(
    transport: &dyn StreamTransport,
    sender: &Sender<StreamSignal>,
    shutdown: &AtomicBool,
) {
    let mut reader = match transport.open() {
        Ok(reader) => reader,
        Err(err) => {
            let _ = sender.send(StreamSignal::Failed(err.to_string()));
            return;
        }
    };
    if sender.send(StreamSignal::Opened).is_err() {
        return;
    }

    // Bytes of a partial line survive idle timeouts, including a split UTF-8
    // sequence; the buffer is only cleared once the line is framed.
    let mut decoder = SseDecoder::default();
    let mut line = Vec::new();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                let _ = sender.send(StreamSignal::Ended);
                return;
            }
            Ok(_) => {
                let framed = decoder.push_line(&String::from_utf8_lossy(&line));
                line.clear();
                if let Some(payload) = framed {
                    if sender.send(StreamSignal::Frame(payload)).is_err() {
                        return;
                    }
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(err) => {
                let _ = sender.send(StreamSignal::Failed(err.to_string()));
                return;
            }
        }
    }
}

/// Hands each streamed incident to `handler`, then merges it into every cached
/// list that lacks it. Returns `true` when the active base query should be
/// refetched.
pub fn fan_out<F>(incidents: &[Incident], cache: &mut QueryCache, mut handler: F) -> bool
where
    F: FnMut(&Incident),
{
    for incident in incidents {
        handler(incident);
        cache.merge_streamed(incident);
    }
    !incidents.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct CannedTransport {
        body: String,
    }

    impl StreamTransport for CannedTransport {
        fn open(&self) -> Result<Box<dyn BufRead + Send>, ApiError> {
            Ok(Box::new(Cursor::new(self.body.clone().into_bytes())))
        }
    }

    struct RefusingTransport;

    impl StreamTransport for RefusingTransport {
        fn open(&self) -> Result<Box<dyn BufRead + Send>, ApiError> {
            Err(ApiError::Transport("connection refused".to_string()))
        }
    }

    fn incident_json(id: &str) -> String {
        format!(
            r#"{{"id":"{id}","severity":"High","title":"t","account":"a","source":"s","timestamp":"2026-02-01T00:00:00Z","status":"Open","tags":[]}}"#
        )
    }

    fn collect_until_disconnect(client: &mut StreamClient) -> Vec<StreamEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            let batch = client.wait_timeout(Duration::from_millis(100));
            let done = batch
                .iter()
                .any(|event| matches!(event, StreamEvent::Disconnected(_)));
            events.extend(batch);
            if done {
                break;
            }
        }
        events
    }

    #[test]
    fn sse_decoder_joins_data_lines_and_skips_other_fields() {
        let mut decoder = SseDecoder::default();
        assert_eq!(decoder.push_line(": keep-alive\n"), None);
        assert_eq!(decoder.push_line("event: message\n"), None);
        assert_eq!(decoder.push_line("id: 7\n"), None);
        assert_eq!(decoder.push_line("data: {\"a\":\n"), None);
        assert_eq!(decoder.push_line("data:1}\r\n"), None);
        assert_eq!(decoder.push_line("\n"), Some("{\"a\":\n1}".to_string()));
        assert_eq!(decoder.push_line("\n"), None);
    }

    #[test]
    fn decodes_messages_and_skips_malformed_payloads() {
        let body = format!(
            "data: {{\"type\":\"connected\",\"message\":\"hi\"}}\n\n\
             data: not json\n\n\
             data: {{\"type\":\"new_incidents\",\"incidents\":[{a},{b}]}}\n\n\
             data: {c}\n\n",
            a = incident_json("a"),
            b = incident_json("b"),
            c = incident_json("c"),
        );
        let mut client = StreamClient::new(Arc::new(CannedTransport { body }));
        assert_eq!(client.connect(), StreamState::Connecting);

        let events = collect_until_disconnect(&mut client);
        assert_eq!(events.first(), Some(&StreamEvent::Ready));

        let batches: Vec<Vec<String>> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Incidents(items) => {
                    Some(items.iter().map(|i| i.id.clone()).collect())
                }
                _ => None,
            })
            .collect();
        assert_eq!(batches, vec![vec!["a", "b"], vec!["c"]]);
        assert_eq!(client.malformed_count(), 1);
        assert!(client.last_event_at().is_some());

        // EOF is a disconnect, not a teardown.
        assert_eq!(client.state(), StreamState::Error);
    }

    #[test]
    fn bad_element_in_batch_keeps_the_rest() {
        let body = format!(
            "data: {{\"type\":\"new_incidents\",\"incidents\":[{a},{{\"id\":\"bad\",\"severity\":\"Bogus\"}},{b}]}}\n\n",
            a = incident_json("a"),
            b = incident_json("b"),
        );
        let mut client = StreamClient::new(Arc::new(CannedTransport { body }));
        client.connect();

        let events = collect_until_disconnect(&mut client);
        let batches: Vec<Vec<String>> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Incidents(items) => {
                    Some(items.iter().map(|i| i.id.clone()).collect())
                }
                _ => None,
            })
            .collect();
        assert_eq!(batches, vec![vec!["a", "b"]]);
        assert_eq!(client.malformed_count(), 1);
    }

    #[test]
    fn open_failure_surfaces_as_disconnect() {
        let mut client = StreamClient::new(Arc::new(RefusingTransport));
        client.connect();
        let events = collect_until_disconnect(&mut client);
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Disconnected(SyncError::StreamDisconnected(_))]
        ));
        assert_eq!(client.state(), StreamState::Error);
    }

    #[test]
    fn closed_client_delivers_nothing() {
        let body = format!("data: {}\n\n", incident_json("a"));
        let mut client = StreamClient::new(Arc::new(CannedTransport { body }));
        client.connect();
        client.close();
        assert!(client.poll().is_empty());
        assert!(client.wait_timeout(Duration::from_millis(50)).is_empty());
        assert_eq!(client.state(), StreamState::Closed);
    }

    /// Never delivers a byte; every read times out like an idle socket.
    struct IdleTransport {
        live: Arc<AtomicUsize>,
    }

    struct IdleReader {
        live: Arc<AtomicUsize>,
    }

    impl Read for IdleReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            thread::sleep(Duration::from_millis(10));
            Err(std::io::Error::new(ErrorKind::TimedOut, "idle"))
        }
    }

    impl Drop for IdleReader {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl StreamTransport for IdleTransport {
        fn open(&self) -> Result<Box<dyn BufRead + Send>, ApiError> {
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(BufReader::new(IdleReader {
                live: Arc::clone(&self.live),
            })))
        }
    }

    fn wait_for_ready(client: &mut StreamClient) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if client
                .wait_timeout(Duration::from_millis(20))
                .contains(&StreamEvent::Ready)
            {
                return;
            }
        }
        panic!("stream never opened");
    }

    #[test]
    fn close_releases_an_idle_connection() {
        let live = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(IdleTransport {
            live: Arc::clone(&live),
        });
        let mut client = StreamClient::new(transport.clone());
        client.connect();
        wait_for_ready(&mut client);
        assert_eq!(live.load(Ordering::SeqCst), 1);

        client.close();
        assert_eq!(live.load(Ordering::SeqCst), 0);

        let mut second = StreamClient::new(transport);
        second.connect();
        wait_for_ready(&mut second);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        drop(second);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn partial_line_survives_idle_timeouts_mid_character() {
        struct Stuttering {
            chunks: Vec<Vec<u8>>,
        }

        impl Read for Stuttering {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.chunks.is_empty() {
                    return Ok(0);
                }
                let chunk = self.chunks.remove(0);
                if chunk.is_empty() {
                    return Err(std::io::Error::new(ErrorKind::TimedOut, "idle"));
                }
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
        }

        struct StutteringTransport;

        impl StreamTransport for StutteringTransport {
            fn open(&self) -> Result<Box<dyn BufRead + Send>, ApiError> {
                Ok(Box::new(BufReader::new(Stuttering {
                    chunks: vec![
                        b"data: {\"id\":\"a\",\"severity\":\"High\",".to_vec(),
                        Vec::new(),
                        b"\"title\":\"t\xe2\x80".to_vec(),
                        Vec::new(),
                        b"\xa6\",\"account\":\"a\",\"source\":\"s\",".to_vec(),
                        Vec::new(),
                        b"\"timestamp\":\"2026-02-01T00:00:00Z\",\"status\":\"Open\"}\n\n"
                            .to_vec(),
                    ],
                })))
            }
        }

        let mut client = StreamClient::new(Arc::new(StutteringTransport));
        client.connect();
        let events = collect_until_disconnect(&mut client);
        assert!(events
            .iter()
            .any(|event| matches!(event, StreamEvent::Incidents(items) if items[0].title == "t…")));
        assert_eq!(client.malformed_count(), 0);
    }

    #[test]
    fn second_connect_while_connecting_is_noop() {
        let mut client = StreamClient::new(Arc::new(CannedTransport {
            body: String::new(),
        }));
        assert_eq!(client.connect(), StreamState::Connecting);
        assert_eq!(client.connect(), StreamState::Connecting);
    }

    #[test]
    fn fan_out_runs_handler_before_cache_merge() {
        use incident_protocol::{IncidentsResponse, ListQuery};

        let incidents: Vec<Incident> = ["x", "y"]
            .iter()
            .map(|id| serde_json::from_str(&incident_json(id)).unwrap())
            .collect();
        let mut cache = QueryCache::new();
        cache.set_list(ListQuery::default(), IncidentsResponse::default());

        let mut seen = Vec::new();
        let refetch = fan_out(&incidents, &mut cache, |incident| {
            seen.push(incident.id.clone());
        });

        assert!(refetch);
        assert_eq!(seen, vec!["x", "y"]);
        let list = cache.list(&ListQuery::default()).unwrap();
        assert_eq!(list.total, 2);
        assert_eq!(list.incidents[0].id, "y");

        assert!(!fan_out(&[], &mut cache, |_| {}));
    }
}
