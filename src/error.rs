//! Error types for contentflow
//!
//! A single library-level error enum covering the boundaries a caller can
//! hit: URI validation at the backend managers, storage misses and
//! integrity violations, plugin resolution, and configuration problems.
//!
//! Library code returns [`Error`] and never panics on these paths; stage
//! hooks propagate errors to the pipeline, which hands them to the caller
//! untouched.

use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Library-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A URI is missing parts required by the operation it was passed to.
    ///
    /// Raised at the backend manager boundary, before any backend call.
    #[error("invalid URI \"{uri}\"; must contain {required}")]
    InvalidUri { uri: String, required: String },

    /// The addressed node is not present in storage.
    #[error("node for URI \"{0}\" does not exist")]
    NodeDoesNotExist(String),

    /// Content equal to none can not be persisted; deletes go through
    /// `delete`, not `set`.
    #[error("can not persist content equal to none for URI \"{0}\"")]
    NoneContent(String),

    /// Storage integrity violation, e.g. a duplicate `(key, version)` row
    /// or a row missing its extension or version.
    #[error("failed to persist node for URI \"{uri}\": {reason}")]
    Persistence { uri: String, reason: String },

    /// No plugin is registered for the extension.
    #[error("unknown plugin \"{0}\"")]
    UnknownPlugin(String),

    /// The configured backend name or URL does not resolve to a registered
    /// backend constructor.
    #[error("invalid backend \"{0}\"")]
    InvalidBackend(String),

    /// Configuration is structurally broken: unknown pipe or plugin name,
    /// missing settings key, malformed environment scope.
    #[error("improperly configured: {0}")]
    ImproperlyConfigured(String),

    /// The environment stack always keeps its bottom state.
    #[error("unable to pop last environment state")]
    EnvironmentUnderflow,
}

impl Error {
    /// True for storage misses, which several call sites handle locally
    /// (version-chain walks in `load`, dropped URIs in `publish`).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NodeDoesNotExist(_))
    }
}
