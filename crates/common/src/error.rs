//! Error types shared by fetchers and actuators

use thiserror::Error;

use crate::types::EntityId;

/// Errors raised while reading a collection snapshot.
///
/// Neither variant is retried by the fetcher itself; retry policy belongs to
/// the reconciler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch of {collection} failed: {reason}")]
    FetchFailed { collection: String, reason: String },

    #[error("unexpected payload shape for {collection}: {reason}")]
    SchemaMismatch { collection: String, reason: String },
}

impl FetchError {
    pub fn failed(collection: &str, reason: impl Into<String>) -> Self {
        FetchError::FetchFailed {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }

    pub fn schema(collection: &str, reason: impl Into<String>) -> Self {
        FetchError::SchemaMismatch {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while issuing a single state-changing action
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuationError {
    #[error("target not found: {target}")]
    TargetNotFound { target: String },

    #[error("ambiguous target {target}: matches ids {}", join_ids(.candidates))]
    AmbiguousTarget {
        target: String,
        candidates: Vec<EntityId>,
    },

    #[error("action rejected by backend: {reason}")]
    ActionRejected { status: Option<u16>, reason: String },

    /// The request never produced a verdict (connection error, timeout,
    /// driver crash). The mutation may or may not have been applied.
    #[error("transport error: {0}")]
    Transport(String),
}

fn join_ids(ids: &[EntityId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
