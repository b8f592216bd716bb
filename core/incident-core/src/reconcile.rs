//! Reconciliation of the authoritative list with streamed arrivals.
//!
//! The visible list is two segments:
//!
//! 1. ledger incidents, most recent arrival first, pinned to the top;
//! 2. base-query incidents not in the ledger, in server order.
//!
//! The ledger only ever holds IDs that are currently visible. It grows when a
//! streamed incident is accepted and shrinks when a base result no longer
//! contains the ID (paged out, deleted, filtered out server-side) or when the
//! incident is deleted locally.
//!
//! ## Invariants
//!
//! - No ID appears twice in `visible`.
//! - Ledger order is arrival order, never timestamp or severity order.
//! - `reconcile_with_base` is idempotent for identical inputs.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::filter::FilterMatcher;
use crate::prefs::PreferenceStore;
use crate::queue::PendingQueue;
use incident_protocol::{Incident, Severity};

/// What happened to one streamed incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Low severity while mute-low is on. Not queued, not counted.
    Muted,
    /// Stream is paused; the incident waits in the pending queue.
    Queued,
    /// Did not match the active filters.
    FilteredOut,
    /// Pinned to the top of the list. `was_visible` means it re-arrived.
    Applied { was_visible: bool },
}

#[derive(Debug, Default)]
pub struct Reconciler {
    ledger: Vec<String>,
    visible: Vec<Incident>,
    total: u64,
    new_ids: HashSet<String>,
    applied: u64,
    dropped: u64,
}

/// Rollback copy of the local list state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerSnapshot {
    ledger: Vec<String>,
    visible: Vec<Incident>,
    total: u64,
    new_ids: HashSet<String>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Streamed arrivals
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn accept_stream_incident(
        &mut self,
        incident: Incident,
        prefs: &PreferenceStore,
        queue: &mut PendingQueue,
        matcher: &FilterMatcher,
    ) -> AcceptOutcome {
        if prefs.mute_low() && incident.severity == Severity::Low {
            return AcceptOutcome::Muted;
        }
        if prefs.paused() {
            queue.enqueue(incident);
            return AcceptOutcome::Queued;
        }
        if !matcher.matches(&incident) {
            self.dropped += 1;
            debug!(id = %incident.id, "Streamed incident outside active filters");
            return AcceptOutcome::FilteredOut;
        }

        let id = incident.id.clone();
        let was_visible = self.visible.iter().any(|row| row.id == id);

        self.ledger.retain(|existing| existing != &id);
        self.ledger.insert(0, id.clone());
        self.visible.retain(|row| row.id != id);
        self.visible.insert(0, incident);
        if !was_visible {
            self.total = self.total.saturating_add(1);
        }
        self.new_ids.insert(id);
        self.applied += 1;

        AcceptOutcome::Applied { was_visible }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Base results
    // ─────────────────────────────────────────────────────────────────────────────

    /// Rebuilds the visible list from a base result.
    ///
    /// Kept ledger entries take the server's copy of the record. Base rows must
    /// also match the active filters to be shown. The total is the server's:
    /// stream fan-out has already counted every arrival in the cached base
    /// total, so kept ledger rows are never counted twice.
    pub fn reconcile_with_base(&mut self, base: &[Incident], base_total: u64, matcher: &FilterMatcher) {
        let lookup: HashMap<&str, &Incident> = base
            .iter()
            .map(|incident| (incident.id.as_str(), incident))
            .collect();

        let before = self.ledger.len();
        self.ledger.retain(|id| {
            lookup
                .get(id.as_str())
                .is_some_and(|incident| matcher.matches(incident))
        });
        if self.ledger.len() != before {
            debug!(
                dropped = before - self.ledger.len(),
                "Ledger entries left the base result"
            );
        }

        let pinned: HashSet<&str> = self.ledger.iter().map(String::as_str).collect();
        let mut visible: Vec<Incident> = self
            .ledger
            .iter()
            .filter_map(|id| lookup.get(id.as_str()).map(|incident| (*incident).clone()))
            .collect();

        let mut seen: HashSet<&str> = pinned.clone();
        for incident in base {
            if seen.contains(incident.id.as_str()) || !matcher.matches(incident) {
                continue;
            }
            seen.insert(incident.id.as_str());
            visible.push(incident.clone());
        }

        self.visible = visible;
        self.total = base_total;
        self.new_ids.retain(|id| pinned.contains(id.as_str()));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Optimistic edits
    // ─────────────────────────────────────────────────────────────────────────────

    /// Replaces the visible row for `id` with `f(row)`. Returns whether a row
    /// was found.
    pub fn replace_visible<F>(&mut self, id: &str, f: F) -> bool
    where
        F: Fn(&Incident) -> Incident,
    {
        match self.visible.iter_mut().find(|row| row.id == id) {
            Some(row) => {
                *row = f(row);
                true
            }
            None => false,
        }
    }

    /// Removes rows by ID from the visible list and the ledger. The total
    /// drops by the number of rows actually removed.
    pub fn remove_visible(&mut self, ids: &HashSet<String>) -> usize {
        let before = self.visible.len();
        self.visible.retain(|row| !ids.contains(&row.id));
        let removed = before - self.visible.len();
        self.ledger.retain(|id| !ids.contains(id));
        self.new_ids.retain(|id| !ids.contains(id));
        self.total = self.total.saturating_sub(removed as u64);
        removed
    }

    pub fn snapshot(&self) -> ReconcilerSnapshot {
        ReconcilerSnapshot {
            ledger: self.ledger.clone(),
            visible: self.visible.clone(),
            total: self.total,
            new_ids: self.new_ids.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: ReconcilerSnapshot) {
        self.ledger = snapshot.ledger;
        self.visible = snapshot.visible;
        self.total = snapshot.total;
        self.new_ids = snapshot.new_ids;
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Read-only view
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn ledger(&self) -> &[String] {
        &self.ledger
    }

    pub fn visible(&self) -> &[Incident] {
        &self.visible
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_new(&self, id: &str) -> bool {
        self.new_ids.contains(id)
    }

    pub fn new_count(&self) -> usize {
        self.new_ids.len()
    }

    pub fn clear_new_ids(&mut self) {
        self.new_ids.clear();
    }

    pub fn applied_count(&self) -> u64 {
        self.applied
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}
