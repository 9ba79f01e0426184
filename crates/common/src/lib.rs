//! driftcheck common library
//!
//! Data model shared by the reconciliation harness: entities and snapshots,
//! expectations, actions, collection descriptors and target resolution.

pub mod collection;
pub mod error;
pub mod resolve;
pub mod types;

// Re-export commonly used types
pub use collection::CollectionSpec;
pub use error::{ActuationError, FetchError};
pub use resolve::{locate, resolve_target};
pub use types::*;

/// driftcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
