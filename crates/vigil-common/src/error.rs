//! Unified error types for the Vigil workspace.
//!
//! Every lifecycle verb reports failures through [`VigilError`]. The
//! dispatcher flattens these into `{success: false, error}` response shapes,
//! so the `Display` text of each variant is what callers ultimately see.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum VigilError {
    /// An unknown container or volume identifier.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A lifecycle verb was applied in a state that does not allow it.
    #[error("container {id} {reason}")]
    InvalidTransition {
        /// Container the verb targeted.
        id: String,
        /// Why the transition is not allowed, e.g. "already running".
        reason: &'static str,
    },

    /// The selected backend cannot serve requests on this host.
    #[error("backend unavailable: {message}")]
    BackendUnavailable {
        /// Description of why the backend is unavailable.
        message: String,
    },

    /// Counter snapshots could not be acquired for a container.
    #[error("stats unavailable: {message}")]
    TransientStatsFailure {
        /// Description of the failed acquisition.
        message: String,
    },

    /// Container metadata could not be written to stable storage.
    #[error("failed to persist {path}: {source}")]
    PersistenceFailure {
        /// Path of the record being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A requested image does not exist on the engine.
    #[error("Image '{image}' not found")]
    ImageNotFound {
        /// Image reference that could not be resolved.
        image: String,
    },

    /// A container name is already taken within the backend.
    #[error("container name already in use: {name}")]
    NameConflict {
        /// The conflicting name.
        name: String,
    },

    /// The container engine rejected a request.
    #[error("engine error: {message}")]
    Engine {
        /// Message returned by the engine.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl VigilError {
    /// Builds a [`VigilError::NotFound`] for a container id.
    #[must_use]
    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "container",
            id: id.into(),
        }
    }

    /// Returns `true` if this error means the backend itself is unusable.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_reads_naturally() {
        let err = VigilError::InvalidTransition {
            id: "abc".into(),
            reason: "already running",
        };
        assert_eq!(err.to_string(), "container abc already running");
    }

    #[test]
    fn image_not_found_message_quotes_image() {
        let err = VigilError::ImageNotFound {
            image: "nginx:nope".into(),
        };
        assert_eq!(err.to_string(), "Image 'nginx:nope' not found");
    }

    #[test]
    fn unavailable_is_detected() {
        let err = VigilError::BackendUnavailable {
            message: "no engine".into(),
        };
        assert!(err.is_unavailable());
        assert!(!VigilError::container_not_found("x").is_unavailable());
    }
}
