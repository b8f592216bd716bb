//! Plain-text rendering of incidents for the terminal.

use chrono::Local;

use incident_core::{ErrorRegion, IncidentApi, IncidentEngine, StreamState, TimelineEntry};
use incident_protocol::{parse_timestamp, Incident};

const TITLE_WIDTH: usize = 48;

pub fn header() -> String {
    format!(
        "  {:<10} {:<8} {:<13} {:<16} {:<10} {:<16} {}",
        "ID", "SEVERITY", "STATUS", "ACCOUNT", "SOURCE", "DETECTED", "TITLE"
    )
}

/// One table row. New arrivals get a `*` marker, selected rows a `+`.
pub fn row(incident: &Incident, is_new: bool, selected: bool) -> String {
    let marker = match (is_new, selected) {
        (_, true) => '+',
        (true, false) => '*',
        (false, false) => ' ',
    };
    format!(
        "{} {:<10} {:<8} {:<13} {:<16} {:<10} {:<16} {}",
        marker,
        truncate(&incident.id, 10),
        incident.severity.as_str(),
        incident.status.as_str(),
        truncate(&incident.account, 16),
        truncate(&incident.source, 10),
        detected(incident),
        truncate(&incident.title, TITLE_WIDTH),
    )
}

pub fn table<A: IncidentApi>(engine: &IncidentEngine<A>) -> String {
    let mut lines = vec![header()];
    for incident in engine.visible() {
        lines.push(row(
            incident,
            engine.is_new(&incident.id),
            engine.selection().contains(&incident.id),
        ));
    }
    lines.push(format!(
        "{} shown of {} total",
        engine.visible().len(),
        engine.total()
    ));
    lines.join("\n")
}

pub fn detail(incident: &Incident, timeline: &[TimelineEntry], related: &[Incident]) -> String {
    let mut lines = vec![
        format!("{}  [{}] {}", incident.id, incident.severity, incident.title),
        format!("  status   {}", incident.status),
        format!("  owner    {}", incident.owner.as_deref().unwrap_or("unassigned")),
        format!("  account  {}", incident.account),
        format!("  source   {}", incident.source),
        format!(
            "  tags     {}",
            if incident.tags.is_empty() {
                "-".to_string()
            } else {
                incident.tags.join(", ")
            }
        ),
    ];

    lines.push("Timeline".to_string());
    if timeline.is_empty() {
        lines.push("  No timeline data available.".to_string());
    }
    for entry in timeline {
        lines.push(format!(
            "  {:<8} {}  {}",
            entry.label,
            format_timestamp(&entry.timestamp),
            entry.description
        ));
    }

    lines.push("Related".to_string());
    if related.is_empty() {
        lines.push("  No related incidents.".to_string());
    }
    for incident in related {
        lines.push(format!(
            "  {} [{}] {} ({})",
            incident.id, incident.severity, incident.title, incident.status
        ));
    }
    lines.join("\n")
}

/// Status line for `watch`: stream state, counters, toast and errors.
pub fn status_line<A: IncidentApi>(engine: &IncidentEngine<A>) -> String {
    let mut parts = vec![format!("stream: {}", stream_label(engine.stream_state()))];
    if engine.paused() {
        parts.push(format!("paused ({} queued)", engine.pending_count()));
    }
    if engine.mute_low() {
        parts.push("low muted".to_string());
    }
    parts.push(format!(
        "applied {} / filtered {}",
        engine.applied_count(),
        engine.dropped_count()
    ));
    if let Some(at) = engine.last_event_at() {
        parts.push(format!("last event {}", at.with_timezone(&Local).format("%H:%M:%S")));
    }
    if engine.toast_visible() {
        parts.push(format!("{} new incident(s) above, type `top`", engine.toast_count()));
    }
    parts.join(" | ")
}

pub const ERROR_REGIONS: [ErrorRegion; 4] = [
    ErrorRegion::List,
    ErrorRegion::Drawer,
    ErrorRegion::BulkActions,
    ErrorRegion::Connectivity,
];

pub fn errors<A: IncidentApi>(engine: &IncidentEngine<A>) -> Vec<String> {
    ERROR_REGIONS
        .into_iter()
        .filter_map(|region| engine.error(region).map(|err| format!("! {}", err)))
        .collect()
}

fn stream_label(state: StreamState) -> &'static str {
    match state {
        StreamState::Error => "reconnecting",
        other => other.as_str(),
    }
}

fn detected(incident: &Incident) -> String {
    format_timestamp(&incident.timestamp)
}

fn format_timestamp(value: &str) -> String {
    parse_timestamp(value)
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| value.to_string())
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(width.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_protocol::{Severity, Status};

    fn incident() -> Incident {
        Incident {
            id: "inc-42".to_string(),
            severity: Severity::Critical,
            title: "Data exfiltration over DNS to an unregistered domain in a foreign region".to_string(),
            account: "acme-corp".to_string(),
            source: "DNS".to_string(),
            timestamp: "not a date".to_string(),
            status: Status::Open,
            tags: vec![],
            owner: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn row_marks_new_and_truncates_title() {
        let line = row(&incident(), true, false);
        assert!(line.starts_with("* inc-42"));
        assert!(line.contains("Critical"));
        assert!(line.contains("not a date"));
        assert!(line.ends_with('…'));
    }

    #[test]
    fn selection_marker_wins() {
        assert!(row(&incident(), true, true).starts_with('+'));
    }

    #[test]
    fn detail_shows_placeholders() {
        let text = detail(&incident(), &[], &[]);
        assert!(text.contains("owner    unassigned"));
        assert!(text.contains("No timeline data available."));
        assert!(text.contains("No related incidents."));
    }
}
