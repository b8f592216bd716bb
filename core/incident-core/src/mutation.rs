//! Optimistic mutations with full-batch rollback.
//!
//! A mutation runs in three steps so a UI can keep the request work off its
//! own thread:
//!
//! 1. [`MutationCoordinator::begin`] reserves the IDs, snapshots every cache
//!    and the local list, and applies the optimistic change.
//! 2. [`PendingMutation::execute`] issues one request per ID, in parallel.
//! 3. [`MutationCoordinator::settle`] either restores the snapshot (any
//!    failure rolls back the whole batch) or merges the server's records into
//!    the detail cache. Lists are invalidated either way.
//!
//! An ID can only be part of one pending mutation at a time; overlapping
//! requests are rejected with [`SyncError::MutationInFlight`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::thread;

use tracing::{debug, warn};

use crate::api::IncidentApi;
use crate::cache::{CacheSnapshot, QueryCache};
use crate::error::{ApiError, MutationScope, Result, SyncError};
use crate::reconcile::{Reconciler, ReconcilerSnapshot};
use incident_protocol::{IncidentPatch, IncidentRecord, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Resolve,
    Investigate,
    Delete,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Resolve => "resolve",
            BulkAction::Investigate => "investigate",
            BulkAction::Delete => "delete",
        }
    }

    /// Status a patching action sets; `None` for delete.
    pub fn target_status(&self) -> Option<Status> {
        match self {
            BulkAction::Resolve => Some(Status::Resolved),
            BulkAction::Investigate => Some(Status::Investigating),
            BulkAction::Delete => None,
        }
    }

    pub fn request_for(&self, id: &str) -> MutationRequest {
        match self.target_status() {
            Some(status) => MutationRequest::Patch {
                id: id.to_string(),
                patch: IncidentPatch::status(status),
            },
            None => MutationRequest::Delete { id: id.to_string() },
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulkAction {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resolve" => Ok(BulkAction::Resolve),
            "investigate" => Ok(BulkAction::Investigate),
            "delete" => Ok(BulkAction::Delete),
            other => Err(format!("unknown bulk action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationRequest {
    Patch { id: String, patch: IncidentPatch },
    Delete { id: String },
}

impl MutationRequest {
    pub fn id(&self) -> &str {
        match self {
            MutationRequest::Patch { id, .. } | MutationRequest::Delete { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationResponse {
    Patched(IncidentRecord),
    Deleted(String),
}

pub type MutationResult = std::result::Result<MutationResponse, ApiError>;

/// A batch whose optimistic change is applied and whose requests are not yet
/// settled.
#[derive(Debug)]
pub struct PendingMutation {
    scope: MutationScope,
    requests: Vec<MutationRequest>,
    cache_snapshot: CacheSnapshot,
    list_snapshot: ReconcilerSnapshot,
}

impl PendingMutation {
    pub fn scope(&self) -> MutationScope {
        self.scope
    }

    pub fn requests(&self) -> &[MutationRequest] {
        &self.requests
    }

    /// Issues every request, one worker per ID. Results keep request order.
    pub fn execute<A: IncidentApi + ?Sized>(&self, api: &A) -> Vec<MutationResult> {
        if let [request] = self.requests.as_slice() {
            return vec![run_request(api, request)];
        }

        thread::scope(|scope| {
            let handles: Vec<_> = self
                .requests
                .iter()
                .map(|request| scope.spawn(move || run_request(api, request)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(ApiError::Transport("request worker panicked".to_string()))
                    })
                })
                .collect()
        })
    }
}

fn run_request<A: IncidentApi + ?Sized>(api: &A, request: &MutationRequest) -> MutationResult {
    match request {
        MutationRequest::Patch { id, patch } => {
            api.patch_incident(id, patch).map(MutationResponse::Patched)
        }
        MutationRequest::Delete { id } => api.delete_incident(id).map(MutationResponse::Deleted),
    }
}

#[derive(Debug, Default)]
pub struct MutationCoordinator {
    in_flight: HashSet<String>,
}

impl MutationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    pub fn begin(
        &mut self,
        scope: MutationScope,
        requests: Vec<MutationRequest>,
        cache: &mut QueryCache,
        reconciler: &mut Reconciler,
    ) -> Result<PendingMutation> {
        if let Some(busy) = requests
            .iter()
            .find(|request| self.in_flight.contains(request.id()))
        {
            return Err(SyncError::MutationInFlight(busy.id().to_string()));
        }
        self.in_flight
            .extend(requests.iter().map(|request| request.id().to_string()));

        let pending = PendingMutation {
            scope,
            cache_snapshot: cache.snapshot(),
            list_snapshot: reconciler.snapshot(),
            requests,
        };
        apply_optimistic(&pending.requests, cache, reconciler);
        debug!(count = pending.requests.len(), scope = ?scope, "Applied optimistic mutation");
        Ok(pending)
    }

    /// Settles a batch. On failure everything returns to the snapshot and the
    /// first failure is reported; on success each detail entry absorbs the
    /// server's record field by field.
    pub fn settle(
        &mut self,
        pending: PendingMutation,
        results: Vec<MutationResult>,
        cache: &mut QueryCache,
        reconciler: &mut Reconciler,
    ) -> Result<()> {
        for request in &pending.requests {
            self.in_flight.remove(request.id());
        }

        let failure = pending
            .requests
            .iter()
            .zip(results.iter())
            .find_map(|(request, result)| result.as_ref().err().map(|err| (request, err.clone())))
            .or_else(|| {
                // A short result list means some requests never reported back.
                pending.requests.get(results.len()).map(|request| {
                    (
                        request,
                        ApiError::Transport("request was not issued".to_string()),
                    )
                })
            });

        let outcome = match failure {
            Some((request, source)) => {
                let err = match request {
                    MutationRequest::Patch { id, .. } => SyncError::UpdateFailed {
                        id: id.clone(),
                        scope: pending.scope,
                        source,
                    },
                    MutationRequest::Delete { id } => SyncError::DeleteFailed {
                        id: id.clone(),
                        source,
                    },
                };
                warn!(
                    error = %err,
                    count = pending.requests.len(),
                    "Rolling back optimistic mutation"
                );
                cache.restore(pending.cache_snapshot);
                reconciler.restore(pending.list_snapshot);
                Err(err)
            }
            None => {
                for result in results.into_iter().flatten() {
                    if let MutationResponse::Patched(record) = result {
                        merge_detail(cache, &record);
                    }
                }
                Ok(())
            }
        };

        cache.invalidate_lists();
        outcome
    }
}

fn apply_optimistic(requests: &[MutationRequest], cache: &mut QueryCache, reconciler: &mut Reconciler) {
    let mut deleted = HashSet::new();
    for request in requests {
        match request {
            MutationRequest::Patch { id, patch } => {
                cache.replace_everywhere(id, |incident| patch.apply_to(incident));
                reconciler.replace_visible(id, |incident| patch.apply_to(incident));
            }
            MutationRequest::Delete { id } => {
                deleted.insert(id.clone());
            }
        }
    }

    if !deleted.is_empty() {
        cache.remove_from_lists(&deleted);
        for id in &deleted {
            cache.remove_detail(id);
        }
        reconciler.remove_visible(&deleted);
    }
}

fn merge_detail(cache: &mut QueryCache, record: &IncidentRecord) {
    let Some(id) = record.id() else {
        return;
    };
    let merged = match cache.detail(id) {
        Some(current) => record.merge_over(current),
        None => record.to_incident(),
    };
    match merged {
        Some(incident) => cache.set_detail(incident),
        None => {
            debug!(id, "Server record did not merge; refetching detail");
            cache.invalidate_detail(id);
        }
    }
}
