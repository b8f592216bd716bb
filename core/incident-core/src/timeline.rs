//! Drawer timeline for a single incident.

use incident_protocol::Incident;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub label: &'static str,
    pub timestamp: String,
    pub description: String,
}

/// Detection, creation and last update, in that order. Entries whose
/// timestamp is empty are left out.
pub fn build_timeline(incident: &Incident) -> Vec<TimelineEntry> {
    [
        TimelineEntry {
            label: "Detected",
            timestamp: incident.timestamp.clone(),
            description: format!("Detected via {}", incident.source),
        },
        TimelineEntry {
            label: "Created",
            timestamp: incident.created_at.clone(),
            description: format!("Record created for {}", incident.account),
        },
        TimelineEntry {
            label: "Updated",
            timestamp: incident.updated_at.clone(),
            description: format!("Status is {}", incident.status),
        },
    ]
    .into_iter()
    .filter(|entry| !entry.timestamp.trim().is_empty())
    .collect()
}
