//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate embedding, layout, linking and persistence into task-graph
//!   operations.
//! - Keep hosts decoupled from storage details.
//! - Translate repository/provider failures into one caller-facing error.

pub mod layout_service;
pub mod sync_service;
pub mod task_service;

use crate::embedding::EmbeddingError;
use crate::model::ValidationError;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by task-graph services.
#[derive(Debug)]
pub enum ServiceError {
    /// Input violates a record invariant.
    Validation(ValidationError),
    /// Target record does not exist in the workspace.
    NotFound { entity: &'static str, id: String },
    /// Duplicate id on create or duplicate live edge pair.
    Conflict { entity: &'static str, id: String },
    /// Embedding provider failed where no deferred fallback applies.
    UpstreamUnavailable(EmbeddingError),
    /// Repository-level failure.
    Repo(RepoError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Conflict { entity, id } => write!(f, "{entity} already exists: {id}"),
            Self::UpstreamUnavailable(err) => write!(f, "upstream unavailable: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::UpstreamUnavailable(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<EmbeddingError> for ServiceError {
    fn from(value: EmbeddingError) -> Self {
        Self::UpstreamUnavailable(value)
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::NotFound { entity, id, .. } => Self::NotFound { entity, id },
            RepoError::Conflict { entity, id, .. } => Self::Conflict { entity, id },
            RepoError::MissingReference { entity, id, .. } => Self::NotFound {
                entity: "task",
                id: format!("endpoint of {entity} {id}"),
            },
            other => Self::Repo(other),
        }
    }
}
