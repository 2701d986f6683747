//! Core domain logic for Linkdo, a task-graph backend.
//!
//! Tasks are graph nodes placed on a 2D plot from their text embeddings;
//! edges are inferred from shared tags; offline clients reconcile through
//! last-write-wins batch sync. This crate is the single source of truth for
//! those invariants.

pub mod config;
pub mod db;
pub mod embedding;
pub mod layout;
pub mod linker;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig};
pub use embedding::{EmbeddingError, EmbeddingProvider, MockEmbeddingProvider};
pub use layout::pca::recompute_positions;
pub use layout::placement::incremental_placement;
pub use linker::{plan_links, tag_overlap_weight, LinkPlan};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::edge::{pair_edge_id, Edge, EdgeId, EdgeOrigin};
pub use model::task::{Position, Priority, TagSet, Task, TaskId, TaskStatus};
pub use model::{ValidationError, WorkspaceId};
pub use repo::edge_repo::{EdgeListQuery, EdgeRepository, SqliteEdgeRepository};
pub use repo::task_repo::{
    CascadeDelete, SqliteTaskRepository, TaskListQuery, TaskMerge, TaskRepository,
};
pub use repo::{RepoError, RepoResult, WriteOutcome};
pub use service::layout_service::LayoutService;
pub use service::sync_service::{
    RecordResult, SyncOutcome, SyncReport, SyncRequest, SyncService, SyncStats,
};
pub use service::task_service::{BackfillReport, TaskDraft, TaskGraph, TaskPatch, TaskService};
pub use service::{ServiceError, ServiceResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
