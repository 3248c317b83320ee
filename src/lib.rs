//! Fetch orchestration core for client-side data synchronization.
//!
//! Coordinates concurrent fetches, mutations, invalidations, and realtime
//! updates over independently keyed remote resources: redundant work is
//! throttled away, stale fetch results never overwrite newer ones, and
//! in-flight fetches cooperate with user-initiated mutations.
//!
//! Three resource stores are built atop the same per-resource
//! [`orchestrator`]: [`document_store`] for a single entity,
//! [`collection_store`] for a keyed map of entities, and
//! [`list_query_store`] for named, paginated queries over a shared entity
//! pool. The network transport, UI subscription primitive, and error
//! normalization are all supplied by the embedding application; this
//! crate only implements the scheduling, abort, and invalidation
//! discipline sitting between them.

pub mod collection_orchestrator;
pub mod collection_store;
pub mod config;
pub mod document_store;
pub mod ensure_loaded;
pub mod equality;
pub mod error;
pub mod focus;
pub mod key;
pub mod list_query_store;
pub mod orchestrator;
pub mod status;

pub use collection_orchestrator::CollectionOrchestrator;
pub use collection_store::CollectionStore;
pub use config::StoreConfig;
pub use document_store::DocumentStore;
pub use ensure_loaded::EnsureLoaded;
pub use equality::reuse_prev_if_equal;
pub use error::{ErrorNormalizer, FetchError, OrchestrationError};
pub use focus::{FocusInvalidatable, FocusInvalidator};
pub use key::{key_from_value, serialize_key};
pub use list_query_store::ListQueryStore;
pub use orchestrator::{FetchContext, FetchOrchestrator, MutationGuard, OrchestratorConfig, OrchestratorEvent};
pub use status::{strengthen_refetch_on_mount, FetchType, RefetchOnMount, ScheduleResult, Status};
