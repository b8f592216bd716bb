//! Query cache for list, detail and related results.
//!
//! List entries are keyed by the normalized [`ListQuery`] (filters plus table
//! state), so every distinct page/filter combination the client has fetched
//! lives side by side. Cross-cutting edits go through [`QueryCache::update_lists`]
//! with an explicit predicate instead of key-prefix matching.
//!
//! A stale entry is still served; it only means the next `sync()` should ask the
//! server again.

use std::collections::{HashMap, HashSet};

use incident_protocol::{clamp_limit, Incident, IncidentsResponse, ListQuery};

#[derive(Debug, Default)]
pub struct QueryCache {
    lists: HashMap<ListQuery, IncidentsResponse>,
    details: HashMap<String, Incident>,
    related: HashMap<String, Vec<Incident>>,
    stale_lists: HashSet<ListQuery>,
    stale_details: HashSet<String>,
}

/// Point-in-time copy of every list and detail entry, used for rollback.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    lists: HashMap<ListQuery, IncidentsResponse>,
    details: HashMap<String, Incident>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Lists
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn list(&self, query: &ListQuery) -> Option<&IncidentsResponse> {
        self.lists.get(query)
    }

    pub fn set_list(&mut self, query: ListQuery, response: IncidentsResponse) {
        self.stale_lists.remove(&query);
        self.lists.insert(query, response);
    }

    /// Applies `f` to every list entry whose key satisfies `predicate`.
    /// Returns how many entries were visited.
    pub fn update_lists<P, F>(&mut self, predicate: P, mut f: F) -> usize
    where
        P: Fn(&ListQuery) -> bool,
        F: FnMut(&mut IncidentsResponse),
    {
        let mut visited = 0;
        for (query, response) in self.lists.iter_mut() {
            if predicate(query) {
                f(response);
                visited += 1;
            }
        }
        visited
    }

    /// Inserts a streamed incident at the head of every cached list that does
    /// not already contain its ID, bumping that list's total. Each page keeps
    /// at most its query's limit of rows; the tail falls off. Returns how many
    /// lists were changed. Calling it twice for the same incident is a no-op.
    pub fn merge_streamed(&mut self, incident: &Incident) -> usize {
        let mut inserted = 0;
        for (query, response) in self.lists.iter_mut() {
            if response.contains(&incident.id) {
                continue;
            }
            response.incidents.insert(0, incident.clone());
            response
                .incidents
                .truncate(clamp_limit(query.table.limit) as usize);
            response.total = response.total.saturating_add(1);
            inserted += 1;
        }
        inserted
    }

    /// Drops every list entry except `active`. Returns how many were dropped.
    pub fn evict_inactive_lists(&mut self, active: &ListQuery) -> usize {
        let before = self.lists.len();
        self.lists.retain(|query, _| query == active);
        self.stale_lists.retain(|query| query == active);
        before - self.lists.len()
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    /// Replaces every cached copy of an incident with `f(copy)`.
    pub fn replace_everywhere<F>(&mut self, id: &str, f: F)
    where
        F: Fn(&Incident) -> Incident,
    {
        self.update_lists(
            |_| true,
            |response| {
                for incident in response.incidents.iter_mut() {
                    if incident.id == id {
                        *incident = f(incident);
                    }
                }
            },
        );
        if let Some(detail) = self.details.get_mut(id) {
            *detail = f(detail);
        }
    }

    /// Drops every row whose ID is in `ids` from every list, decrementing each
    /// list's total by the rows it actually lost.
    pub fn remove_from_lists(&mut self, ids: &HashSet<String>) -> usize {
        let mut removed_total = 0;
        self.update_lists(
            |_| true,
            |response| {
                let before = response.incidents.len();
                response.incidents.retain(|incident| !ids.contains(&incident.id));
                let removed = before - response.incidents.len();
                response.total = response.total.saturating_sub(removed as u64);
                removed_total += removed;
            },
        );
        removed_total
    }

    pub fn invalidate_lists(&mut self) {
        self.stale_lists.extend(self.lists.keys().cloned());
    }

    pub fn is_stale(&self, query: &ListQuery) -> bool {
        self.stale_lists.contains(query)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Details
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn detail(&self, id: &str) -> Option<&Incident> {
        self.details.get(id)
    }

    pub fn set_detail(&mut self, incident: Incident) {
        self.stale_details.remove(&incident.id);
        self.details.insert(incident.id.clone(), incident);
    }

    pub fn remove_detail(&mut self, id: &str) -> Option<Incident> {
        self.related.remove(id);
        self.details.remove(id)
    }

    pub fn invalidate_detail(&mut self, id: &str) {
        if self.details.contains_key(id) {
            self.stale_details.insert(id.to_string());
        }
    }

    pub fn is_detail_stale(&self, id: &str) -> bool {
        self.stale_details.contains(id)
    }

    pub fn related(&self, id: &str) -> Option<&[Incident]> {
        self.related.get(id).map(Vec::as_slice)
    }

    pub fn set_related(&mut self, id: &str, related: Vec<Incident>) {
        self.related.insert(id.to_string(), related);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Rollback
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            lists: self.lists.clone(),
            details: self.details.clone(),
        }
    }

    /// Puts back every list and detail entry exactly as captured. Staleness
    /// marks are left alone; the caller invalidates after settling anyway.
    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        self.lists = snapshot.lists;
        self.details = snapshot.details;
    }
}
