//! HTTP client for the incident API.
//!
//! [`IncidentApi`] is the seam between the engine and the server; tests swap in
//! in-memory fakes. [`HttpIncidentApi`] talks to the real endpoints with a
//! blocking `reqwest` client and a fixed per-request timeout.
//!
//! Bodies are read as text and decoded with `serde_json` so that a malformed
//! body is reported as [`ApiError::Decode`] rather than a transport failure.

use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::DashConfig;
use crate::error::ApiError;
use crate::stream::StreamTransport;
use incident_protocol::{
    DeleteResponse, Incident, IncidentPatch, IncidentRecord, IncidentsResponse, ListQuery,
    RelatedResponse,
};

/// The five operations the engine needs from the persistence layer.
pub trait IncidentApi: Send + Sync {
    fn list_incidents(&self, query: &ListQuery) -> Result<IncidentsResponse, ApiError>;

    fn get_incident(&self, id: &str) -> Result<Incident, ApiError>;

    fn related_incidents(&self, id: &str) -> Result<Vec<Incident>, ApiError>;

    /// Returns the record as the server echoed it; it may be partial.
    fn patch_incident(&self, id: &str, patch: &IncidentPatch) -> Result<IncidentRecord, ApiError>;

    fn delete_incident(&self, id: &str) -> Result<String, ApiError>;
}

/// Longest a stream read may sit idle before the reader thread gets to check
/// for teardown. The stream endpoint must also answer within this window.
pub const STREAM_IDLE_POLL: Duration = Duration::from_secs(1);

pub struct HttpIncidentApi {
    client: Client,
    base: Url,
}

impl HttpIncidentApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let mut base = Url::parse(base_url)
            .map_err(|err| ApiError::Transport(format!("invalid API URL {}: {}", base_url, err)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::Transport(format!("invalid API URL: {}", base_url)));
        }
        if let Ok(mut segments) = base.path_segments_mut() {
            segments.pop_if_empty();
        }
        Ok(Self { client, base })
    }

    pub fn from_config(config: &DashConfig) -> Result<Self, ApiError> {
        Self::new(
            &config.api.base_url,
            Duration::from_secs(config.api.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// Transport for the push channel at `stream_url`. It shares nothing with
    /// the request client; its reads time out every [`STREAM_IDLE_POLL`]
    /// instead of after the request timeout.
    pub fn stream_transport(stream_url: &str) -> HttpStreamTransport {
        HttpStreamTransport::new(stream_url)
    }

    /// Appends `segments` to the base path, percent-encoding each one. Dot
    /// segments would be normalized away, so they are refused.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        if let Some(bad) = segments
            .iter()
            .find(|segment| matches!(**segment, "" | "." | ".."))
        {
            return Err(ApiError::NotFound(bad.to_string()));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("invalid API URL: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl IncidentApi for HttpIncidentApi {
    fn list_incidents(&self, query: &ListQuery) -> Result<IncidentsResponse, ApiError> {
        let pairs = query.to_query_pairs();
        debug!(params = pairs.len(), "GET incidents");
        let response = self
            .client
            .get(self.endpoint(&[])?)
            .query(&pairs)
            .send()
            .map_err(transport_error)?;
        decode(response, "incidents")
    }

    fn get_incident(&self, id: &str) -> Result<Incident, ApiError> {
        let response = self
            .client
            .get(self.endpoint(&[id])?)
            .send()
            .map_err(transport_error)?;
        decode(response, id)
    }

    fn related_incidents(&self, id: &str) -> Result<Vec<Incident>, ApiError> {
        let response = self
            .client
            .get(self.endpoint(&[id, "related"])?)
            .send()
            .map_err(transport_error)?;
        decode::<RelatedResponse>(response, id).map(|body| body.related)
    }

    fn patch_incident(&self, id: &str, patch: &IncidentPatch) -> Result<IncidentRecord, ApiError> {
        let response = self
            .client
            .patch(self.endpoint(&[id])?)
            .json(patch)
            .send()
            .map_err(transport_error)?;
        decode(response, id)
    }

    fn delete_incident(&self, id: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .delete(self.endpoint(&[id])?)
            .send()
            .map_err(transport_error)?;
        decode::<DeleteResponse>(response, id).map(|body| body.id)
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Transport(format!("request timed out: {}", err))
    } else {
        ApiError::Transport(err.to_string())
    }
}

fn decode<T: DeserializeOwned>(response: Response, subject: &str) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().map_err(transport_error)?;

    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound(subject.to_string()));
    }
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            }),
        });
    }

    serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))
}

/// Pulls `{"error": "..."}` out of an error body when the server sent one.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Push channel transport
// ─────────────────────────────────────────────────────────────────────────────

/// Opens `GET {base}/stream` as a server-sent-event body.
pub struct HttpStreamTransport {
    client: Option<Client>,
    url: String,
}

impl HttpStreamTransport {
    pub fn new(url: &str) -> Self {
        Self::with_idle_poll(url, STREAM_IDLE_POLL)
    }

    /// The blocking client applies its timeout to connecting and to each body
    /// read, so an idle connection surfaces a timeout every `idle_poll`.
    pub fn with_idle_poll(url: &str, idle_poll: Duration) -> Self {
        // A builder failure is reported on the first `open` instead.
        let client = Client::builder().timeout(idle_poll).build().ok();
        Self {
            client,
            url: url.to_string(),
        }
    }
}

impl StreamTransport for HttpStreamTransport {
    fn open(&self) -> Result<Box<dyn BufRead + Send>, ApiError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ApiError::Transport("stream client unavailable".to_string()))?;
        let response = client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: "stream rejected".to_string(),
            });
        }

        Ok(Box::new(BufReader::new(IdleReader { response })))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Reports the client's per-read timeout as [`ErrorKind::TimedOut`] so the
/// stream reader can tell an idle connection from a broken one.
struct IdleReader {
    response: Response,
}

impl Read for IdleReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.response.read(buf).map_err(|err| {
            if is_read_timeout(&err) {
                io::Error::new(ErrorKind::TimedOut, "stream idle")
            } else {
                err
            }
        })
    }
}

fn is_read_timeout(err: &io::Error) -> bool {
    err.kind() == ErrorKind::TimedOut
        || err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
            .is_some_and(reqwest::Error::is_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_error_field() {
        assert_eq!(
            error_message(r#"{"error":"Incident not found"}"#).as_deref(),
            Some("Incident not found")
        );
        assert_eq!(
            error_message(r#"{"message":"bad"}"#).as_deref(),
            Some("bad")
        );
        assert_eq!(error_message("<html>"), None);
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let api = HttpIncidentApi::new("http://localhost:3000/api/incidents/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(api.base_url(), "http://localhost:3000/api/incidents");
        assert_eq!(
            api.endpoint(&["abc"]).unwrap().as_str(),
            "http://localhost:3000/api/incidents/abc"
        );
        assert_eq!(
            api.endpoint(&[]).unwrap().as_str(),
            "http://localhost:3000/api/incidents"
        );
    }

    #[test]
    fn ids_are_encoded_as_single_path_segments() {
        let api = HttpIncidentApi::new("http://localhost:3000/api/incidents", Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            api.endpoint(&["a/b?c#d", "related"]).unwrap().as_str(),
            "http://localhost:3000/api/incidents/a%2Fb%3Fc%23d/related"
        );
        assert_eq!(
            api.endpoint(&["inc 7"]).unwrap().as_str(),
            "http://localhost:3000/api/incidents/inc%207"
        );
        assert_eq!(
            api.endpoint(&[".."]).unwrap_err(),
            ApiError::NotFound("..".to_string())
        );
        assert!(api.endpoint(&[""]).is_err());
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(
            HttpIncidentApi::new("not a url", Duration::from_secs(1)),
            Err(ApiError::Transport(_))
        ));
        assert!(matches!(
            HttpIncidentApi::new("mailto:ops@example.com", Duration::from_secs(1)),
            Err(ApiError::Transport(_))
        ));
    }

    #[test]
    fn reqwest_style_timeouts_count_as_idle() {
        assert!(is_read_timeout(&io::Error::new(ErrorKind::TimedOut, "x")));
        assert!(!is_read_timeout(&io::Error::new(ErrorKind::ConnectionReset, "x")));
    }
}
