//! Integration tests for the HTTP client and the event-stream transport
//! against a minimal local HTTP server.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use incident_core::{
    ApiError, HttpIncidentApi, HttpStreamTransport, IncidentApi, StreamClient, StreamEvent,
    StreamState,
};
use incident_protocol::{IncidentPatch, ListQuery, Status};

struct Canned {
    status: &'static str,
    content_type: &'static str,
    body: String,
}

impl Canned {
    fn json(status: &'static str, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }
}

/// Serves one canned response per connection and reports each request
/// (head plus body) back to the test.
fn serve(responses: Vec<Canned>) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (sender, receiver) = mpsc::channel();

    thread::spawn(move || {
        for canned in responses {
            let Ok((mut socket, _)) = listener.accept() else {
                return;
            };
            let request = read_request(&mut socket);
            let _ = sender.send(request);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                canned.status,
                canned.content_type,
                canned.body.len(),
                canned.body
            );
            let _ = socket.write_all(response.as_bytes());
            let _ = socket.flush();
        }
    });

    (format!("http://{}/api/incidents", addr), receiver)
}

fn read_request(socket: &mut TcpStream) -> String {
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let head_end = find(&buffer, b"\r\n\r\n");
        if let Some(end) = head_end {
            let head = String::from_utf8_lossy(&buffer[..end]).to_string();
            let length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buffer.len() >= end + 4 + length {
                return String::from_utf8_lossy(&buffer).to_string();
            }
        }
        match socket.read(&mut chunk) {
            Ok(0) | Err(_) => return String::from_utf8_lossy(&buffer).to_string(),
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn api(base_url: &str) -> HttpIncidentApi {
    HttpIncidentApi::new(base_url, Duration::from_secs(5)).unwrap()
}

const INCIDENT: &str = r#"{"id":"inc-1","severity":"Critical","title":"Ransomware beacon","account":"acme-corp","source":"EDR","timestamp":"2026-02-14T09:30:00Z","status":"Open","tags":["malware"],"createdAt":"2026-02-14T09:30:01Z","updatedAt":"2026-02-14T09:30:01Z"}"#;

#[test]
fn test_list_sends_filters_and_decodes_page() {
    let body = format!(r#"{{"incidents":[{}],"total":41,"limit":200,"offset":0}}"#, INCIDENT);
    let (base_url, requests) = serve(vec![Canned::json("200 OK", &body)]);

    let response = api(&base_url).list_incidents(&ListQuery::default()).unwrap();
    assert_eq!(response.total, 41);
    assert_eq!(response.incidents[0].id, "inc-1");

    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    let request_line = request.lines().next().unwrap();
    assert!(request_line.starts_with("GET /api/incidents?"));
    assert!(request_line.contains("sortBy=timestamp"));
    assert!(request_line.contains("sortOrder=DESC"));
    assert!(request_line.contains("limit=200"));
    assert!(request_line.contains("offset=0"));
}

#[test]
fn test_not_found_and_status_errors_are_distinguished() {
    let (base_url, _requests) = serve(vec![
        Canned::json("404 Not Found", r#"{"error":"Incident not found"}"#),
        Canned::json("500 Internal Server Error", r#"{"error":"boom"}"#),
    ]);
    let client = api(&base_url);

    assert_eq!(
        client.get_incident("missing").unwrap_err(),
        ApiError::NotFound("missing".to_string())
    );
    assert_eq!(
        client.delete_incident("inc-1").unwrap_err(),
        ApiError::Status {
            status: 500,
            message: "boom".to_string()
        }
    );
}

#[test]
fn test_malformed_body_is_decode_error() {
    let (base_url, _requests) = serve(vec![Canned::json("200 OK", "{\"related\": 3")]);
    let err = api(&base_url).related_incidents("inc-1").unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

#[test]
fn test_unreachable_server_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = api(&format!("http://{}/api/incidents", addr))
        .get_incident("inc-1")
        .unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
}

#[test]
fn test_patch_sends_only_set_fields() {
    let (base_url, requests) = serve(vec![Canned::json(
        "200 OK",
        r#"{"id":"inc-1","status":"Resolved"}"#,
    )]);

    let record = api(&base_url)
        .patch_incident("inc-1", &IncidentPatch::status(Status::Resolved))
        .unwrap();
    assert_eq!(record.id(), Some("inc-1"));

    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(request.starts_with("PATCH /api/incidents/inc-1 "));
    assert!(request.ends_with(r#"{"status":"Resolved"}"#));
}

#[test]
fn test_event_stream_over_http() {
    let body = format!(
        ": hello\n\ndata: {{\"type\":\"connected\",\"message\":\"Stream connected\"}}\n\n\
         data: {{\"type\":\"new_incidents\",\"incidents\":[{}]}}\n\n",
        INCIDENT
    );
    let (base_url, requests) = serve(vec![Canned {
        status: "200 OK",
        content_type: "text/event-stream",
        body,
    }]);

    let transport = HttpIncidentApi::stream_transport(&format!("{}/stream", base_url));
    let mut client = StreamClient::new(Arc::new(transport));
    client.connect();

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

    assert_eq!(events.first(), Some(&StreamEvent::Ready));
    let incidents: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Incidents(items) => Some(items.len()),
            _ => None,
        })
        .collect();
    assert_eq!(incidents, vec![1]);
    assert_eq!(client.state(), StreamState::Error);

    let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(request.starts_with("GET /api/incidents/stream "));
    assert!(request.to_ascii_lowercase().contains("accept: text/event-stream"));
}

#[test]
fn test_ids_with_reserved_characters_stay_in_one_segment() {
    let (base_url, requests) = serve(vec![
        Canned::json("404 Not Found", r#"{"error":"Incident not found"}"#),
        Canned::json("200 OK", r#"{"related":[]}"#),
    ]);
    let client = api(&base_url);

    assert_eq!(
        client.get_incident("a/b").unwrap_err(),
        ApiError::NotFound("a/b".to_string())
    );
    assert!(client.related_incidents("x?y#z").unwrap().is_empty());

    let first = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(first.starts_with("GET /api/incidents/a%2Fb "));
    let second = requests.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(second.starts_with("GET /api/incidents/x%3Fy%23z/related "));
}

#[test]
fn test_close_releases_an_idle_event_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (released, released_rx) = mpsc::channel();

    // Sends headers, then nothing, until the client hangs up.
    thread::spawn(move || {
        let Ok((mut socket, _)) = listener.accept() else {
            return;
        };
        read_request(&mut socket);
        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n: hello\n\n";
        let _ = socket.write_all(head.as_bytes());
        let _ = socket.flush();
        socket
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let mut byte = [0u8; 1];
        let hung_up = matches!(socket.read(&mut byte), Ok(0));
        let _ = released.send(hung_up);
    });

    let transport = HttpStreamTransport::with_idle_poll(
        &format!("http://{}/api/incidents/stream", addr),
        Duration::from_millis(100),
    );
    let mut client = StreamClient::new(Arc::new(transport));
    client.connect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while client.state() != StreamState::Open && Instant::now() < deadline {
        client.wait_timeout(Duration::from_millis(50));
    }
    assert_eq!(client.state(), StreamState::Open);

    // Several idle polls pass without a disconnect.
    thread::sleep(Duration::from_millis(350));
    assert!(client.poll().is_empty());
    assert_eq!(client.state(), StreamState::Open);

    let started = Instant::now();
    client.close();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(client.state(), StreamState::Closed);
    assert_eq!(released_rx.recv_timeout(Duration::from_secs(5)), Ok(true));
}
