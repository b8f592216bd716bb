//! IncidentEngine - the single owner of all dashboard sync state.
//!
//! Every piece of mutable state (filters, preferences, pending queue, ledger,
//! caches, selection, notification flags) lives here and changes only through
//! the methods below. The engine is:
//!
//! - **Synchronous**: network calls block the caller; the stream is read on
//!   its own thread but delivered here through [`IncidentEngine::pump_stream`].
//! - **Not thread-safe**: wrap it in a `Mutex` if more than one thread drives it.
//! - **Region-scoped on failure**: errors are recorded against the part of the
//!   screen they belong to and never clear unrelated data.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use incident_core::{HttpIncidentApi, IncidentEngine, load_config, StorageConfig};
//!
//! let storage = StorageConfig::default();
//! let config = load_config(&storage.config_file())?;
//! let api = HttpIncidentApi::from_config(&config)?;
//! let mut engine = IncidentEngine::with_storage(api, storage, config);
//! engine.refresh()?;
//! for incident in engine.visible() {
//!     println!("{} {}", incident.id, incident.title);
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::api::IncidentApi;
use crate::backoff::RetryBackoff;
use crate::cache::QueryCache;
use crate::config::DashConfig;
use crate::error::{ApiError, ErrorRegion, FetchTarget, MutationScope, Result, SyncError};
use crate::filter::{load_persisted_filters, persist_filters, FilterMatcher};
use crate::mutation::{BulkAction, MutationCoordinator, MutationRequest, MutationResult, PendingMutation};
use crate::notify::ViewportNotifier;
use crate::prefs::PreferenceStore;
use crate::queue::PendingQueue;
use crate::reconcile::{AcceptOutcome, Reconciler};
use crate::selection::Selection;
use crate::storage::StorageConfig;
use crate::stream::{fan_out, StreamClient, StreamEvent, StreamState, StreamTransport};
use crate::timeline::{build_timeline, TimelineEntry};
use incident_protocol::{
    clamp_limit, normalize_tags, parse_tag_input, Incident, IncidentFilters, IncidentPatch,
    IncidentsResponse, ListQuery, SortBy, Status, TableState, MAX_RELATED,
};

/// Handle for one base-query fetch. A ticket from before the latest
/// filter or table change is stale and its result is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    query: ListQuery,
}

impl FetchTicket {
    pub fn query(&self) -> &ListQuery {
        &self.query
    }
}

/// Tally of one [`IncidentEngine::pump_stream`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamActivity {
    pub opened: bool,
    pub disconnected: bool,
    pub received: usize,
    pub applied: usize,
    pub queued: usize,
    pub muted: usize,
    pub filtered: usize,
}

impl StreamActivity {
    fn record(&mut self, outcome: AcceptOutcome) {
        self.received += 1;
        match outcome {
            AcceptOutcome::Applied { .. } => self.applied += 1,
            AcceptOutcome::Queued => self.queued += 1,
            AcceptOutcome::Muted => self.muted += 1,
            AcceptOutcome::FilteredOut => self.filtered += 1,
        }
    }
}

pub struct IncidentEngine<A: IncidentApi> {
    api: A,
    storage: StorageConfig,
    config: DashConfig,
    matcher: FilterMatcher,
    table: TableState,
    prefs: PreferenceStore,
    queue: PendingQueue,
    cache: QueryCache,
    reconciler: Reconciler,
    notifier: ViewportNotifier,
    selection: Selection,
    mutations: MutationCoordinator,
    stream: Option<StreamClient>,
    backoff: RetryBackoff,
    reconnect_at: Option<Instant>,
    generation: u64,
    refetch_pending: bool,
    loading: bool,
    open_incident: Option<String>,
    errors: HashMap<ErrorRegion, SyncError>,
}

impl<A: IncidentApi> IncidentEngine<A> {
    /// Creates an engine over the default storage root (`~/.incident-dash`).
    pub fn new(api: A, config: DashConfig) -> Self {
        Self::with_storage(api, StorageConfig::default(), config)
    }

    /// Creates an engine with a custom storage root.
    ///
    /// Filters are restored from disk; stream preferences always start off.
    pub fn with_storage(api: A, storage: StorageConfig, config: DashConfig) -> Self {
        let matcher = FilterMatcher::new(load_persisted_filters(&storage));
        let prefs = PreferenceStore::load(storage.clone());
        let table = TableState {
            limit: config.page_limit(),
            offset: 0,
        };

        Self {
            api,
            matcher,
            table,
            prefs,
            queue: PendingQueue::new(),
            cache: QueryCache::new(),
            reconciler: Reconciler::new(),
            notifier: ViewportNotifier::new(config.viewport.top_threshold_px),
            selection: Selection::new(),
            mutations: MutationCoordinator::new(),
            stream: None,
            backoff: RetryBackoff::from_config(&config.stream),
            reconnect_at: None,
            generation: 0,
            refetch_pending: true,
            loading: false,
            open_incident: None,
            errors: HashMap::new(),
            storage,
            config,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn config(&self) -> &DashConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Base query
    // ─────────────────────────────────────────────────────────────────────────────

    /// The list request for the current filters and table state.
    pub fn active_query(&self) -> ListQuery {
        ListQuery::new(self.matcher.criteria(), self.table)
    }

    pub fn begin_base_fetch(&mut self) -> FetchTicket {
        self.loading = true;
        self.refetch_pending = false;
        FetchTicket {
            generation: self.generation,
            query: self.active_query(),
        }
    }

    /// Applies a fetched base result. Returns `Ok(false)` when the ticket is
    /// stale and the result was dropped.
    pub fn complete_base_fetch(
        &mut self,
        ticket: FetchTicket,
        result: std::result::Result<IncidentsResponse, ApiError>,
    ) -> Result<bool> {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "Discarding stale base result"
            );
            return Ok(false);
        }
        self.loading = false;

        match result {
            Ok(response) => {
                self.cache.set_list(ticket.query, response);
                self.errors.remove(&ErrorRegion::List);
                self.reconcile_active();
                Ok(true)
            }
            Err(source) => {
                // The next sync() retries.
                self.request_refetch();
                let err = SyncError::FetchFailed {
                    target: FetchTarget::Incidents,
                    source,
                };
                self.record_error(err.clone());
                Err(err)
            }
        }
    }

    /// Fetches the active base query now.
    pub fn refresh(&mut self) -> Result<()> {
        let ticket = self.begin_base_fetch();
        let result = self.api.list_incidents(ticket.query());
        self.complete_base_fetch(ticket, result).map(|_| ())
    }

    /// Services pending refetches: the active list when it is missing, stale
    /// or flagged by the stream, and the open drawer's detail when stale.
    /// Returns whether the base query was fetched.
    pub fn sync(&mut self) -> Result<bool> {
        if let Some(id) = self.open_incident.clone() {
            if self.cache.is_detail_stale(&id) {
                // Failures are recorded against the drawer.
                let _ = self.fetch_detail(&id);
            }
        }

        let active = self.active_query();
        let needed = self.refetch_pending
            || self.cache.list(&active).is_none()
            || self.cache.is_stale(&active);
        if !needed {
            return Ok(false);
        }

        debug!(generation = self.generation, "Refetching base query");
        self.refresh()?;
        Ok(true)
    }

    fn request_refetch(&mut self) {
        self.refetch_pending = true;
    }

    fn reconcile_active(&mut self) {
        let active = self.active_query();
        if let Some(list) = self.cache.list(&active) {
            self.reconciler
                .reconcile_with_base(&list.incidents, list.total, &self.matcher);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Filters and table state
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn filters(&self) -> &IncidentFilters {
        self.matcher.criteria()
    }

    pub fn table(&self) -> TableState {
        self.table
    }

    /// Replaces the filter criteria. Unchanged criteria are a no-op;
    /// otherwise the criteria are persisted, paging restarts at the first
    /// page and in-flight base fetches become stale.
    pub fn set_filters(&mut self, filters: IncidentFilters) -> bool {
        if !self.matcher.update(&filters) {
            return false;
        }
        persist_filters(&self.storage, self.matcher.criteria());
        self.table.offset = 0;
        self.query_changed();
        true
    }

    pub fn toggle_sort(&mut self, field: SortBy) {
        let mut filters = self.matcher.criteria().clone();
        filters.toggle_sort(field);
        self.set_filters(filters);
    }

    pub fn set_table(&mut self, table: TableState) -> bool {
        let table = TableState {
            limit: clamp_limit(table.limit),
            offset: table.offset,
        };
        if table == self.table {
            return false;
        }
        self.table = table;
        self.query_changed();
        true
    }

    fn query_changed(&mut self) {
        let active = self.active_query();
        let evicted = self.cache.evict_inactive_lists(&active);
        if evicted > 0 {
            debug!(evicted, "Evicted inactive list queries");
        }
        self.generation += 1;
        self.request_refetch();
        self.reconcile_active();
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Stream
    // ─────────────────────────────────────────────────────────────────────────────

    /// Opens the push channel. A second call while connected is a no-op.
    pub fn connect_stream(&mut self, transport: Arc<dyn StreamTransport>) -> StreamState {
        self.stream
            .get_or_insert_with(|| StreamClient::new(transport))
            .connect()
    }

    /// Closes the push channel for good.
    pub fn disconnect_stream(&mut self) {
        if let Some(client) = self.stream.as_mut() {
            client.close();
        }
        self.reconnect_at = None;
    }

    /// Processes everything the stream delivered, waiting up to `wait` for the
    /// first signal (`Duration::ZERO` never blocks).
    pub fn pump_stream(&mut self, wait: Duration) -> StreamActivity {
        let mut activity = StreamActivity::default();
        let events = match self.stream.as_mut() {
            Some(client) if wait.is_zero() => client.poll(),
            Some(client) => client.wait_timeout(wait),
            None => return activity,
        };

        for event in events {
            match event {
                StreamEvent::Ready => {
                    activity.opened = true;
                    self.backoff.reset();
                    self.reconnect_at = None;
                    self.errors.remove(&ErrorRegion::Connectivity);
                }
                StreamEvent::Incidents(incidents) => {
                    let Self {
                        reconciler,
                        prefs,
                        queue,
                        matcher,
                        notifier,
                        cache,
                        ..
                    } = self;
                    let refetch = fan_out(&incidents, cache, |incident| {
                        let outcome =
                            accept_one(reconciler, prefs, queue, matcher, notifier, incident.clone());
                        activity.record(outcome);
                    });
                    if refetch {
                        self.request_refetch();
                    }
                }
                StreamEvent::Disconnected(err) => {
                    activity.disconnected = true;
                    self.record_error(err);
                    let now = Instant::now();
                    let at = self.backoff.ready_at(now);
                    self.reconnect_at = Some(at);
                    info!(
                        delay_ms = at.duration_since(now).as_millis() as u64,
                        attempt = self.backoff.attempts(),
                        "Stream reconnect scheduled"
                    );
                }
            }
        }
        activity
    }

    /// Reconnects a failed stream once its backoff delay has passed.
    /// Returns whether a reconnect was started.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.reconnect_at {
            Some(at) if now >= at => {}
            _ => return false,
        }
        self.reconnect_at = None;

        match self.stream.as_mut() {
            Some(client) if client.state() == StreamState::Error => {
                info!(attempt = self.backoff.attempts(), "Reconnecting incident stream");
                client.connect();
                true
            }
            _ => false,
        }
    }

    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Feeds one incident through the acceptance path as if it had streamed.
    pub fn accept_stream_incident(&mut self, incident: Incident) -> AcceptOutcome {
        accept_one(
            &mut self.reconciler,
            &self.prefs,
            &mut self.queue,
            &self.matcher,
            &mut self.notifier,
            incident,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Preferences
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn paused(&self) -> bool {
        self.prefs.paused()
    }

    pub fn mute_low(&self) -> bool {
        self.prefs.mute_low()
    }

    /// Pauses or resumes. Resuming replays the pending queue in arrival order
    /// through the normal acceptance path; returns how many were replayed.
    pub fn set_paused(&mut self, paused: bool) -> usize {
        if !self.prefs.set_paused(paused) || paused {
            return 0;
        }

        let drained = self.queue.drain_all();
        let replayed = drained.len();
        for incident in drained {
            self.accept_stream_incident(incident);
        }
        if replayed > 0 {
            debug!(replayed, "Replayed paused incidents");
        }
        replayed
    }

    pub fn set_mute_low(&mut self, mute_low: bool) -> bool {
        self.prefs.set_mute_low(mute_low)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Viewport
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn on_scroll(&mut self, scroll_top_px: f64) {
        if self.notifier.on_scroll(scroll_top_px).is_some() {
            self.reconciler.clear_new_ids();
        }
    }

    pub fn click_toast(&mut self) {
        self.notifier.click_toast();
        self.reconciler.clear_new_ids();
    }

    pub fn toast_visible(&self) -> bool {
        self.notifier.toast_visible()
    }

    /// Number shown on the toast.
    pub fn toast_count(&self) -> usize {
        self.reconciler.new_count()
    }

    pub fn at_top(&self) -> bool {
        self.notifier.at_top()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Drawer
    // ─────────────────────────────────────────────────────────────────────────────

    /// Opens the drawer: fetches the incident and its related incidents. A
    /// related-fetch failure is recorded but does not fail the open.
    pub fn open_incident(&mut self, id: &str) -> Result<Incident> {
        self.open_incident = Some(id.to_string());
        self.errors.remove(&ErrorRegion::Drawer);
        let incident = self.fetch_detail(id)?;
        if let Err(err) = self.fetch_related(id) {
            debug!(error = %err, id, "Related incidents unavailable");
        }
        Ok(incident)
    }

    pub fn close_incident(&mut self) {
        self.open_incident = None;
        self.errors.remove(&ErrorRegion::Drawer);
    }

    pub fn open_incident_id(&self) -> Option<&str> {
        self.open_incident.as_deref()
    }

    pub fn fetch_detail(&mut self, id: &str) -> Result<Incident> {
        match self.api.get_incident(id) {
            Ok(incident) => {
                self.cache.set_detail(incident.clone());
                Ok(incident)
            }
            Err(source) => {
                let err = SyncError::FetchFailed {
                    target: FetchTarget::Incident,
                    source,
                };
                self.record_error(err.clone());
                Err(err)
            }
        }
    }

    pub fn fetch_related(&mut self, id: &str) -> Result<Vec<Incident>> {
        match self.api.related_incidents(id) {
            Ok(mut related) => {
                related.retain(|incident| incident.id != id);
                related.truncate(MAX_RELATED);
                self.cache.set_related(id, related.clone());
                Ok(related)
            }
            Err(source) => {
                let err = SyncError::FetchFailed {
                    target: FetchTarget::Related,
                    source,
                };
                self.record_error(err.clone());
                Err(err)
            }
        }
    }

    pub fn detail(&self, id: &str) -> Option<&Incident> {
        self.cache.detail(id)
    }

    pub fn related(&self, id: &str) -> &[Incident] {
        self.cache.related(id).unwrap_or_default()
    }

    pub fn timeline(&self, id: &str) -> Vec<TimelineEntry> {
        self.current_incident(id)
            .map(build_timeline)
            .unwrap_or_default()
    }

    /// Best local copy: the detail cache, then the visible list.
    pub fn current_incident(&self, id: &str) -> Option<&Incident> {
        self.cache
            .detail(id)
            .or_else(|| self.reconciler.visible().iter().find(|incident| incident.id == id))
    }

    /// Sends a partial update for one incident. An empty patch sends nothing.
    pub fn update_incident(&mut self, id: &str, patch: IncidentPatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(false);
        }
        self.run_mutation(
            MutationScope::Single,
            vec![MutationRequest::Patch {
                id: id.to_string(),
                patch,
            }],
        )?;
        Ok(true)
    }

    /// Assigns an owner. A blank or unchanged owner sends nothing.
    pub fn assign_owner(&mut self, id: &str, owner: &str) -> Result<bool> {
        let owner = owner.trim();
        let current = self
            .current_incident(id)
            .and_then(|incident| incident.owner.as_deref());
        if owner.is_empty() || current == Some(owner) {
            return Ok(false);
        }
        self.update_incident(
            id,
            IncidentPatch {
                owner: Some(owner.to_string()),
                ..IncidentPatch::default()
            },
        )
    }

    /// Replaces the tag list. Tags are trimmed and de-duplicated in typed
    /// order; an unchanged list sends nothing.
    pub fn update_tags<S: AsRef<str>>(&mut self, id: &str, tags: &[S]) -> Result<bool> {
        let tags = normalize_tags(tags.iter().map(AsRef::as_ref));
        if self
            .current_incident(id)
            .is_some_and(|incident| incident.tags == tags)
        {
            return Ok(false);
        }
        self.update_incident(
            id,
            IncidentPatch {
                tags: Some(tags),
                ..IncidentPatch::default()
            },
        )
    }

    /// Comma-separated tag input (`"urgent, malware"`).
    pub fn update_tags_from_input(&mut self, id: &str, input: &str) -> Result<bool> {
        self.update_tags(id, &parse_tag_input(input))
    }

    /// Resolving an already-resolved incident sends nothing.
    pub fn resolve_incident(&mut self, id: &str) -> Result<bool> {
        if self
            .current_incident(id)
            .is_some_and(|incident| incident.status == Status::Resolved)
        {
            return Ok(false);
        }
        self.update_incident(id, IncidentPatch::status(Status::Resolved))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Selection and bulk actions
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn toggle_selected(&mut self, id: &str) {
        self.selection.toggle(id);
    }

    pub fn set_selected(&mut self, id: &str, selected: bool) {
        self.selection.set(id, selected);
    }

    pub fn select_all(&mut self) {
        self.selection.select_all(self.reconciler.visible());
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn is_all_selected(&self) -> bool {
        self.selection.is_all_selected(self.reconciler.visible())
    }

    pub fn is_some_selected(&self) -> bool {
        self.selection.is_some_selected(self.reconciler.visible())
    }

    pub fn can_bulk_resolve(&self) -> bool {
        self.selection
            .has_unresolved_selection(self.reconciler.visible())
    }

    /// Runs `action` over every selected ID. Returns how many requests were
    /// issued; the selection is cleared on success.
    pub fn bulk_action(&mut self, action: BulkAction) -> Result<usize> {
        let ids = self.selection.ids();
        if ids.is_empty() {
            return Ok(0);
        }
        let requests = ids.iter().map(|id| action.request_for(id)).collect();
        self.run_mutation(MutationScope::Bulk, requests)?;
        Ok(ids.len())
    }

    /// First half of a mutation: reserves the IDs and applies the optimistic
    /// change. Execute the returned batch anywhere, then hand the results to
    /// [`IncidentEngine::settle_mutation`].
    pub fn begin_mutation(
        &mut self,
        scope: MutationScope,
        requests: Vec<MutationRequest>,
    ) -> Result<PendingMutation> {
        let result = self
            .mutations
            .begin(scope, requests, &mut self.cache, &mut self.reconciler);
        if let Err(err) = &result {
            self.record_error(err.clone());
        }
        result
    }

    pub fn settle_mutation(
        &mut self,
        pending: PendingMutation,
        results: Vec<MutationResult>,
    ) -> Result<()> {
        let scope = pending.scope();
        let deleted: HashSet<String> = pending
            .requests()
            .iter()
            .filter(|request| matches!(request, MutationRequest::Delete { .. }))
            .map(|request| request.id().to_string())
            .collect();

        let outcome = self
            .mutations
            .settle(pending, results, &mut self.cache, &mut self.reconciler);
        self.request_refetch();

        match &outcome {
            Ok(()) => {
                let region = match scope {
                    MutationScope::Single => ErrorRegion::Drawer,
                    MutationScope::Bulk => ErrorRegion::BulkActions,
                };
                self.errors.remove(&region);
                if scope == MutationScope::Bulk {
                    self.selection.clear();
                }
                if self
                    .open_incident
                    .as_ref()
                    .is_some_and(|id| deleted.contains(id))
                {
                    self.open_incident = None;
                }
            }
            Err(err) => self.record_error(err.clone()),
        }
        outcome
    }

    fn run_mutation(&mut self, scope: MutationScope, requests: Vec<MutationRequest>) -> Result<()> {
        let pending = self.begin_mutation(scope, requests)?;
        let results = pending.execute(&self.api);
        self.settle_mutation(pending, results)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Read-only view
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn visible(&self) -> &[Incident] {
        self.reconciler.visible()
    }

    pub fn total(&self) -> u64 {
        self.reconciler.total()
    }

    pub fn ledger(&self) -> &[String] {
        self.reconciler.ledger()
    }

    pub fn is_new(&self, id: &str) -> bool {
        self.reconciler.is_new(id)
    }

    pub fn applied_count(&self) -> u64 {
        self.reconciler.applied_count()
    }

    pub fn dropped_count(&self) -> u64 {
        self.reconciler.dropped_count()
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream
            .as_ref()
            .map(StreamClient::state)
            .unwrap_or(StreamState::Idle)
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.stream.as_ref().and_then(StreamClient::last_event_at)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self, region: ErrorRegion) -> Option<&SyncError> {
        self.errors.get(&region)
    }

    pub fn dismiss_error(&mut self, region: ErrorRegion) {
        self.errors.remove(&region);
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn record_error(&mut self, err: SyncError) {
        if err.is_user_facing() {
            self.errors.insert(err.region(), err);
        } else {
            warn!(error = %err, "Recovered locally");
        }
    }
}

fn accept_one(
    reconciler: &mut Reconciler,
    prefs: &PreferenceStore,
    queue: &mut PendingQueue,
    matcher: &FilterMatcher,
    notifier: &mut ViewportNotifier,
    incident: Incident,
) -> AcceptOutcome {
    let outcome = reconciler.accept_stream_incident(incident, prefs, queue, matcher);
    if matches!(outcome, AcceptOutcome::Applied { .. }) {
        notifier.on_incident_applied();
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_protocol::{IncidentRecord, Severity};
    use std::sync::Mutex;

    struct StaticApi {
        list: Mutex<IncidentsResponse>,
    }

    impl IncidentApi for StaticApi {
        fn list_incidents(
            &self,
            _query: &ListQuery,
        ) -> std::result::Result<IncidentsResponse, ApiError> {
            Ok(self.list.lock().unwrap().clone())
        }

        fn get_incident(&self, id: &str) -> std::result::Result<Incident, ApiError> {
            Err(ApiError::NotFound(id.to_string()))
        }

        fn related_incidents(&self, _id: &str) -> std::result::Result<Vec<Incident>, ApiError> {
            Ok(Vec::new())
        }

        fn patch_incident(
            &self,
            id: &str,
            _patch: &IncidentPatch,
        ) -> std::result::Result<IncidentRecord, ApiError> {
            Err(ApiError::NotFound(id.to_string()))
        }

        fn delete_incident(&self, id: &str) -> std::result::Result<String, ApiError> {
            Ok(id.to_string())
        }
    }

    fn incident(id: &str) -> Incident {
        Incident {
            id: id.to_string(),
            severity: Severity::High,
            title: "Impossible travel".to_string(),
            account: "acme-corp".to_string(),
            source: "Identity".to_string(),
            timestamp: "2026-02-01T00:00:00Z".to_string(),
            status: Status::Open,
            tags: vec![],
            owner: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn build_engine(temp: &tempfile::TempDir) -> IncidentEngine<StaticApi> {
        let api = StaticApi {
            list: Mutex::new(IncidentsResponse {
                incidents: vec![incident("a")],
                total: 1,
                limit: Some(200),
                offset: Some(0),
            }),
        };
        IncidentEngine::with_storage(
            api,
            StorageConfig::with_root(temp.path().to_path_buf()),
            DashConfig::default(),
        )
    }

    #[test]
    fn stale_ticket_is_discarded_after_filter_change() {
        let temp = tempfile::tempdir().unwrap();
        let mut engine = build_engine(&temp);

        let ticket = engine.begin_base_fetch();
        engine.set_filters(IncidentFilters {
            severity: Some(Severity::Critical),
            ..IncidentFilters::default()
        });

        let applied = engine
            .complete_base_fetch(
                ticket,
                Ok(IncidentsResponse {
                    incidents: vec![incident("old")],
                    total: 1,
                    limit: None,
                    offset: None,
                }),
            )
            .unwrap();
        assert!(!applied);
        assert!(engine.visible().is_empty());
    }

    #[test]
    fn sync_only_fetches_when_needed() {
        let temp = tempfile::tempdir().unwrap();
        let mut engine = build_engine(&temp);

        assert!(engine.sync().unwrap());
        assert!(!engine.sync().unwrap());
        assert_eq!(engine.total(), 1);

        engine.set_table(TableState {
            limit: 50,
            offset: 50,
        });
        assert_eq!(engine.cache().list_count(), 0);
        assert!(engine.sync().unwrap());
        assert_eq!(engine.cache().list_count(), 1);
    }

    #[test]
    fn filter_changes_persist_and_reset_offset() {
        let temp = tempfile::tempdir().unwrap();
        let mut engine = build_engine(&temp);
        engine.set_table(TableState {
            limit: 200,
            offset: 200,
        });

        engine.toggle_sort(SortBy::Severity);
        assert_eq!(engine.table().offset, 0);

        let reloaded = build_engine(&temp);
        assert_eq!(reloaded.filters().sort_by, SortBy::Severity);
    }

    #[test]
    fn failed_list_fetch_is_scoped_to_list_region() {
        let temp = tempfile::tempdir().unwrap();
        let mut engine = build_engine(&temp);
        let ticket = engine.begin_base_fetch();
        let err = engine
            .complete_base_fetch(ticket, Err(ApiError::Transport("timeout".to_string())))
            .unwrap_err();

        assert_eq!(err.region(), ErrorRegion::List);
        assert!(engine.error(ErrorRegion::List).is_some());
        assert!(engine.error(ErrorRegion::Drawer).is_none());
    }

    #[test]
    fn open_incident_failure_records_drawer_error() {
        let temp = tempfile::tempdir().unwrap();
        let mut engine = build_engine(&temp);
        engine.refresh().unwrap();

        assert!(engine.open_incident("a").is_err());
        assert!(engine.error(ErrorRegion::Drawer).is_some());
        assert_eq!(engine.visible().len(), 1);
    }
}
