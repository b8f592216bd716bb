//! Client-side filter evaluation.
//!
//! [`matches`] decides whether an incident belongs to the current filter
//! criteria. It is pure and never fails: unset criteria are no-ops and an
//! unparsable date bound is ignored. All rules are ANDed:
//!
//! - severity / status / account / source: exact equality when set
//! - date range: the incident's detection time must parse and fall inside
//!   `[startDate 00:00:00.000, endDate 23:59:59.999]` in local time
//! - search: case-insensitive substring of `"{title} {account} {source}"`
//!
//! [`FilterMatcher`] caches the lowered search term and the resolved date
//! bounds, recomputing them only when the criteria actually change.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::warn;

use crate::storage::{StorageConfig, FILTERS_KEY};
use incident_protocol::{Incident, IncidentFilters};

pub fn matches(criteria: &IncidentFilters, incident: &Incident) -> bool {
    CompiledFilters::compile(criteria).matches(criteria, incident)
}

/// Memoized predicate keyed by criteria equality.
#[derive(Debug, Clone)]
pub struct FilterMatcher {
    criteria: IncidentFilters,
    compiled: CompiledFilters,
}

impl FilterMatcher {
    pub fn new(criteria: IncidentFilters) -> Self {
        let criteria = criteria.normalized();
        let compiled = CompiledFilters::compile(&criteria);
        Self { criteria, compiled }
    }

    pub fn criteria(&self) -> &IncidentFilters {
        &self.criteria
    }

    /// Swaps in new criteria. Returns `false` (and keeps the cached state)
    /// when they are equal to the current ones.
    pub fn update(&mut self, criteria: &IncidentFilters) -> bool {
        let criteria = criteria.normalized();
        if criteria == self.criteria {
            return false;
        }
        self.compiled = CompiledFilters::compile(&criteria);
        self.criteria = criteria;
        true
    }

    pub fn matches(&self, incident: &Incident) -> bool {
        self.compiled.matches(&self.criteria, incident)
    }
}

impl Default for FilterMatcher {
    fn default() -> Self {
        Self::new(IncidentFilters::default())
    }
}

#[derive(Debug, Clone, Default)]
struct CompiledFilters {
    search: Option<String>,
    has_range: bool,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl CompiledFilters {
    fn compile(criteria: &IncidentFilters) -> Self {
        let start_date = non_blank(&criteria.start_date);
        let end_date = non_blank(&criteria.end_date);
        Self {
            search: non_blank(&criteria.search).map(str::to_lowercase),
            has_range: start_date.is_some() || end_date.is_some(),
            start: start_date.and_then(|date| {
                NaiveTime::from_hms_opt(0, 0, 0).and_then(|time| local_bound(date, time))
            }),
            end: end_date.and_then(|date| {
                NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
                    .and_then(|time| local_bound(date, time))
            }),
        }
    }

    fn matches(&self, criteria: &IncidentFilters, incident: &Incident) -> bool {
        if criteria
            .severity
            .is_some_and(|severity| severity != incident.severity)
        {
            return false;
        }
        if criteria.status.is_some_and(|status| status != incident.status) {
            return false;
        }
        if non_blank(&criteria.account).is_some_and(|account| account != incident.account) {
            return false;
        }
        if non_blank(&criteria.source).is_some_and(|source| source != incident.source) {
            return false;
        }

        if self.has_range {
            let Some(detected_at) = incident.detected_at() else {
                return false;
            };
            if self.start.is_some_and(|start| detected_at < start) {
                return false;
            }
            if self.end.is_some_and(|end| detected_at > end) {
                return false;
            }
        }

        if let Some(term) = &self.search {
            let haystack = format!(
                "{} {} {}",
                incident.title, incident.account, incident.source
            )
            .to_lowercase();
            if !haystack.contains(term.as_str()) {
                return false;
            }
        }

        true
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn local_bound(date: &str, time: NaiveTime) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Local
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Loads persisted filter criteria, merged over the defaults
/// (`sortBy=timestamp`, `sortOrder=DESC`).
pub fn load_persisted_filters(storage: &StorageConfig) -> IncidentFilters {
    storage
        .load_key::<IncidentFilters>(FILTERS_KEY)
        .unwrap_or_default()
}

/// Persists filter criteria. Failures are logged; the in-memory criteria
/// stay authoritative for the session.
pub fn persist_filters(storage: &StorageConfig, filters: &IncidentFilters) {
    if let Err(err) = storage.save_key(FILTERS_KEY, filters) {
        warn!(error = %err, "Failed to persist incident filters");
    }
}
