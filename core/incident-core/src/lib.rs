//! # incident-core
//!
//! Real-time incident synchronization engine shared by every dashboard client.
//! It reconciles the paginated, filtered list the API serves with the
//! incidents pushed over the live stream.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The stream is read on a
//!   background thread and handed to the owner over a channel.
//! - **Single owner**: [`IncidentEngine`] holds all mutable state; nothing else
//!   writes the ledger, preferences, selection or caches.
//! - **Graceful degradation**: Corrupt persisted state falls back to defaults,
//!   malformed stream events are skipped, and no failure is fatal.
//! - **Testable seams**: [`IncidentApi`] and [`StreamTransport`] are traits so
//!   tests can run the full engine without a server.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use incident_core::{HttpIncidentApi, IncidentEngine, load_config, StorageConfig};
//!
//! let storage = StorageConfig::default();
//! let config = load_config(&storage.config_file())?;
//! let transport = HttpIncidentApi::stream_transport(&config.stream_url());
//! let mut engine = IncidentEngine::with_storage(HttpIncidentApi::from_config(&config)?, storage, config);
//! engine.connect_stream(std::sync::Arc::new(transport));
//! loop {
//!     engine.pump_stream(std::time::Duration::from_millis(250));
//!     engine.sync()?;
//! }
//! ```

pub mod api;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod mutation;
pub mod notify;
pub mod prefs;
pub mod queue;
pub mod reconcile;
pub mod selection;
pub mod storage;
pub mod stream;
pub mod timeline;

pub use api::{HttpIncidentApi, HttpStreamTransport, IncidentApi};
pub use backoff::RetryBackoff;
pub use cache::{CacheSnapshot, QueryCache};
pub use config::{load_config, DashConfig};
pub use engine::{FetchTicket, IncidentEngine, StreamActivity};
pub use error::{ApiError, ErrorRegion, FetchTarget, MutationScope, Result, SyncError};
pub use filter::{matches, FilterMatcher};
pub use mutation::{BulkAction, MutationCoordinator, MutationRequest, MutationResponse, PendingMutation};
pub use notify::ViewportNotifier;
pub use prefs::{PreferenceStore, StreamPreferences};
pub use queue::PendingQueue;
pub use reconcile::{AcceptOutcome, Reconciler};
pub use selection::Selection;
pub use storage::StorageConfig;
pub use stream::{SseDecoder, StreamClient, StreamEvent, StreamState, StreamTransport};
pub use timeline::{build_timeline, TimelineEntry};
