//! Wire types for the incident API and its push channel.
//!
//! This crate is shared by the sync engine and any API client so the JSON
//! shapes cannot drift between them. The server remains the authority on
//! validation; clients reuse these types to build requests and to decode
//! responses and stream payloads.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PAGE_LIMIT: u32 = 200;
pub const MAX_PAGE_LIMIT: u32 = 500;
pub const MAX_RELATED: usize = 10;

const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

// ═══════════════════════════════════════════════════════════════════════════════
// Enumerations
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Med,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Med,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Med => "Med",
            Severity::Low => "Low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                ProtocolError::new("invalid_severity", format!("unknown severity: {}", value))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Open,
    Investigating,
    Resolved,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Open, Status::Investigating, Status::Resolved];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "Open",
            Status::Investigating => "Investigating",
            Status::Resolved => "Resolved",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                ProtocolError::new("invalid_status", format!("unknown status: {}", value))
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Timestamp,
    Severity,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Timestamp => "timestamp",
            SortBy::Severity => "severity",
        }
    }
}

impl FromStr for SortBy {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "timestamp" => Ok(SortBy::Timestamp),
            "severity" => Ok(SortBy::Severity),
            other => Err(ProtocolError::new(
                "invalid_sort_by",
                format!("unknown sort field: {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortOrder::Asc),
            "DESC" => Ok(SortOrder::Desc),
            other => Err(ProtocolError::new(
                "invalid_sort_order",
                format!("unknown sort order: {}", other),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Incident
// ═══════════════════════════════════════════════════════════════════════════════

/// An incident record as the API serves it.
///
/// `timestamp` is the detection time and is kept exactly as the server sent
/// it; use [`Incident::detected_at`] to interpret it. `created_at` and
/// `updated_at` belong to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub account: String,
    pub source: String,
    pub timestamp: String,
    pub status: Status,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Incident {
    pub fn detected_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// Parses a timestamp the way a browser `Date` would for the shapes the API
/// emits: RFC 3339 with offset, naive date-times as local time, bare dates as
/// UTC midnight.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc));
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Trims tags, drops empties and removes duplicates while keeping the order
/// the user typed them in.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let trimmed = tag.as_ref().trim();
        if trimmed.is_empty() || normalized.iter().any(|existing| existing == trimmed) {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}

/// Parses comma-separated tag input (`"urgent, malware"`).
pub fn parse_tag_input(input: &str) -> Vec<String> {
    normalize_tags(input.split(','))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queries
// ═══════════════════════════════════════════════════════════════════════════════

/// Filter criteria for the incident list. An unset field means no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl IncidentFilters {
    /// Clicking a column header: the active field flips direction, a new
    /// field starts ascending.
    pub fn toggle_sort(&mut self, field: SortBy) {
        let was_ascending = self.sort_by == field && self.sort_order == SortOrder::Asc;
        self.sort_by = field;
        self.sort_order = if was_ascending {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        };
    }

    /// Returns a copy with blank text fields collapsed to `None`, so `""` and
    /// unset produce the same cache key.
    pub fn normalized(&self) -> Self {
        fn clean(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        }

        Self {
            search: clean(&self.search),
            severity: self.severity,
            status: self.status,
            account: clean(&self.account),
            source: clean(&self.source),
            start_date: clean(&self.start_date),
            end_date: clean(&self.end_date),
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableState {
    pub limit: u32,
    pub offset: u32,
}

impl Default for TableState {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

pub fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}

/// A list request: filters plus pagination, normalized so it can key a cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ListQuery {
    pub filters: IncidentFilters,
    pub table: TableState,
}

impl ListQuery {
    pub fn new(filters: &IncidentFilters, table: TableState) -> Self {
        Self {
            filters: filters.normalized(),
            table: TableState {
                limit: clamp_limit(table.limit),
                offset: table.offset,
            },
        }
    }

    /// Query-string pairs for `GET /incidents`.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let filters = &self.filters;
        let mut pairs = Vec::new();
        if let Some(search) = &filters.search {
            pairs.push(("search", search.clone()));
        }
        if let Some(severity) = filters.severity {
            pairs.push(("severity", severity.as_str().to_string()));
        }
        if let Some(status) = filters.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(account) = &filters.account {
            pairs.push(("account", account.clone()));
        }
        if let Some(source) = &filters.source {
            pairs.push(("source", source.clone()));
        }
        if let Some(start_date) = &filters.start_date {
            pairs.push(("startDate", start_date.clone()));
        }
        if let Some(end_date) = &filters.end_date {
            pairs.push(("endDate", end_date.clone()));
        }
        pairs.push(("sortBy", filters.sort_by.as_str().to_string()));
        pairs.push(("sortOrder", filters.sort_order.as_str().to_string()));
        pairs.push(("limit", self.table.limit.to_string()));
        pairs.push(("offset", self.table.offset.to_string()));
        pairs
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Responses and Requests
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentsResponse {
    pub incidents: Vec<Incident>,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl IncidentsResponse {
    pub fn contains(&self, id: &str) -> bool {
        self.incidents.iter().any(|incident| incident.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedResponse {
    pub related: Vec<Incident>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub id: String,
}

/// Partial update body for `PATCH /incidents/:id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl IncidentPatch {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies the set fields over `incident`; unset fields keep their value.
    pub fn apply_to(&self, incident: &Incident) -> Incident {
        let mut next = incident.clone();
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(owner) = &self.owner {
            next.owner = Some(owner.clone());
        }
        if let Some(tags) = &self.tags {
            next.tags = tags.clone();
        }
        if let Some(severity) = self.severity {
            next.severity = severity;
        }
        if let Some(title) = &self.title {
            next.title = title.clone();
        }
        if let Some(account) = &self.account {
            next.account = account.clone();
        }
        if let Some(source) = &self.source {
            next.source = source.clone();
        }
        next
    }
}

/// The record a `PATCH` echoes back, kept as raw fields so that a partial
/// body can be merged over a cached copy instead of replacing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentRecord(pub Map<String, Value>);

impl IncidentRecord {
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Field-level merge: every field the server returned wins, every field
    /// it left out keeps the cached value. Returns `None` when the merged
    /// record no longer decodes (e.g. the server sent an unknown status).
    pub fn merge_over(&self, base: &Incident) -> Option<Incident> {
        let mut merged = match serde_json::to_value(base).ok()? {
            Value::Object(map) => map,
            _ => return None,
        };
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(merged)).ok()
    }

    pub fn to_incident(&self) -> Option<Incident> {
        serde_json::from_value(Value::Object(self.0.clone())).ok()
    }
}

impl From<&Incident> for IncidentRecord {
    fn from(incident: &Incident) -> Self {
        match serde_json::to_value(incident) {
            Ok(Value::Object(map)) => IncidentRecord(map),
            _ => IncidentRecord::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stream Payloads
// ═══════════════════════════════════════════════════════════════════════════════

/// A decoded push-channel payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// `{type: "connected"}`; informational only.
    Connected { message: Option<String> },
    /// `{type: "new_incidents", incidents: [...]}`. Each element decodes on
    /// its own; elements that fail land in `rejected` in array order.
    NewIncidents {
        incidents: Vec<Incident>,
        rejected: Vec<ProtocolError>,
    },
    /// A bare incident object (has `id`, no `type`).
    Incident(Box<Incident>),
    /// `{type: "error"}`; the server keeps the connection open.
    ServerError { message: Option<String> },
    /// A typed payload this client does not understand.
    Unknown { kind: String },
}

impl StreamMessage {
    pub fn into_incidents(self) -> Vec<Incident> {
        match self {
            StreamMessage::NewIncidents { incidents, .. } => incidents,
            StreamMessage::Incident(incident) => vec![*incident],
            _ => Vec::new(),
        }
    }
}

pub fn parse_stream_payload(data: &str) -> Result<StreamMessage, ProtocolError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|err| ProtocolError::new("invalid_json", err.to_string()))?;

    let Value::Object(object) = value else {
        return Err(ProtocolError::new(
            "invalid_payload",
            "stream payload must be a JSON object",
        ));
    };

    let message = object
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);

    match object.get("type").and_then(Value::as_str) {
        Some("connected") => Ok(StreamMessage::Connected { message }),
        Some("error") => Ok(StreamMessage::ServerError { message }),
        Some("new_incidents") => {
            let items = match object.get("incidents") {
                Some(Value::Array(items)) => items.as_slice(),
                Some(Value::Null) | None => &[],
                Some(_) => {
                    return Err(ProtocolError::new(
                        "invalid_incidents",
                        "incidents must be an array",
                    ))
                }
            };
            let mut incidents = Vec::with_capacity(items.len());
            let mut rejected = Vec::new();
            for (index, item) in items.iter().enumerate() {
                match Incident::deserialize(item) {
                    Ok(incident) => incidents.push(incident),
                    Err(err) => rejected.push(ProtocolError::new(
                        "invalid_incident",
                        format!("incidents[{}]: {}", index, err),
                    )),
                }
            }
            Ok(StreamMessage::NewIncidents {
                incidents,
                rejected,
            })
        }
        Some(other) => Ok(StreamMessage::Unknown {
            kind: other.to_string(),
        }),
        None if object.contains_key("id") => {
            let incident: Incident = serde_json::from_value(Value::Object(object))
                .map_err(|err| ProtocolError::new("invalid_incident", err.to_string()))?;
            Ok(StreamMessage::Incident(Box::new(incident)))
        }
        None => Err(ProtocolError::new(
            "invalid_payload",
            "payload has neither a type nor an id",
        )),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: String,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}
