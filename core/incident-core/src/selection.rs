//! Row selection for bulk actions.
//!
//! A plain ID set. Select-all works against the rows currently visible, never
//! the server-side total. IDs deleted elsewhere stay selected until the next
//! explicit clear or successful bulk action.

use std::collections::BTreeSet;

use incident_protocol::{Incident, Status};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: &str) {
        self.ids.insert(id.to_string());
    }

    pub fn remove(&mut self, id: &str) {
        self.ids.remove(id);
    }

    pub fn toggle(&mut self, id: &str) {
        if !self.ids.remove(id) {
            self.ids.insert(id.to_string());
        }
    }

    pub fn set(&mut self, id: &str, selected: bool) {
        if selected {
            self.add(id);
        } else {
            self.remove(id);
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn select_all(&mut self, visible: &[Incident]) {
        self.ids = visible.iter().map(|incident| incident.id.clone()).collect();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Header checkbox fully checked.
    pub fn is_all_selected(&self, visible: &[Incident]) -> bool {
        !visible.is_empty() && visible.iter().all(|incident| self.contains(&incident.id))
    }

    /// Header checkbox indeterminate.
    pub fn is_some_selected(&self, visible: &[Incident]) -> bool {
        visible.iter().any(|incident| self.contains(&incident.id)) && !self.is_all_selected(visible)
    }

    /// Bulk resolve is pointless when every selected visible row is resolved.
    pub fn has_unresolved_selection(&self, visible: &[Incident]) -> bool {
        visible
            .iter()
            .any(|incident| self.contains(&incident.id) && incident.status != Status::Resolved)
    }
}
