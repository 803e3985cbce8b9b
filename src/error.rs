//! Error types for Convoy
//!
//! All modules use `ConvoyResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Convoy operations
pub type ConvoyResult<T> = Result<T, ConvoyError>;

/// All errors that can occur in Convoy
#[derive(Error, Debug)]
pub enum ConvoyError {
    // Configuration errors (fatal, raised before any execution)
    #[error("Component '{component}' depends on unknown component '{dependency}'")]
    UnknownDependency {
        component: String,
        dependency: String,
    },

    #[error("Dependency cycle detected among components: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    #[error("Component declared more than once: {0}")]
    DuplicateComponent(String),

    #[error("Invalid component name '{name}': {reason}")]
    InvalidComponentName { name: String, reason: String },

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid duration '{0}': expected a number followed by s, m, h or d (e.g. 7d)")]
    InvalidDuration(String),

    // Cache errors
    #[error("Cache object not found: {0}")]
    ObjectNotFound(String),

    #[error("No cached object for source {0}")]
    ReferenceNotFound(String),

    #[error("Cache index at {path} is corrupt: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("Insufficient space: {context}")]
    InsufficientSpace {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source {reference} is bound to {bound}, refusing to rebind to {attempted}")]
    ReferenceConflict {
        reference: String,
        bound: String,
        attempted: String,
    },

    #[error("No provider can fetch source {0}")]
    UnsupportedSource(String),

    #[error("Invalid path in file set: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // Workspace errors
    #[error("Failed to create workspace {path}: {source}")]
    WorkspaceCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    User(String),
}

impl ConvoyError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an error for a failed write, distinguishing a full disk
    pub fn write(context: impl Into<String>, source: std::io::Error) -> Self {
        if is_out_of_space(&source) {
            Self::InsufficientSpace {
                context: context.into(),
                source,
            }
        } else {
            Self::io(context, source)
        }
    }

    /// Errors in the component set itself; nothing is executed when these occur
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownDependency { .. }
                | Self::CycleDetected(_)
                | Self::DuplicateComponent(_)
                | Self::InvalidComponentName { .. }
                | Self::ConfigInvalid { .. }
                | Self::InvalidDuration(_)
                | Self::InvalidPattern { .. }
        )
    }

    /// Errors raised by the content-addressable store
    pub fn is_cache(&self) -> bool {
        matches!(
            self,
            Self::ObjectNotFound(_)
                | Self::ReferenceNotFound(_)
                | Self::StoreCorrupt { .. }
                | Self::InsufficientSpace { .. }
                | Self::ReferenceConflict { .. }
                | Self::UnsupportedSource(_)
                | Self::InvalidPath { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::StoreCorrupt { .. } => {
                Some("Inspect or remove the cache index; objects are re-fetched on next use")
            }
            Self::InsufficientSpace { .. } => Some("Run: convoy cache gc"),
            Self::ReferenceConflict { .. } => {
                Some("Pinned versions are immutable; publish a new version instead")
            }
            Self::CycleDetected(_) => Some("Remove one of the dependencies listed above"),
            Self::InvalidPattern { .. } => {
                Some("Patterns use glob syntax: *, ?, [abc] and ** for nested directories")
            }
            _ => None,
        }
    }
}

#[cfg(unix)]
fn is_out_of_space(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::ENOSPC || code == libc::EDQUOT)
}

#[cfg(not(unix))]
fn is_out_of_space(_err: &std::io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ConvoyError::CycleDetected(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected among components: a, b"
        );

        let err = ConvoyError::UnknownDependency {
            component: "api".to_string(),
            dependency: "db".to_string(),
        };
        assert!(err.to_string().contains("unknown component 'db'"));
    }

    #[test]
    fn error_hint() {
        let err = ConvoyError::ObjectNotFound("abc".to_string());
        assert_eq!(err.hint(), None);
        let err = ConvoyError::CycleDetected(vec![]);
        assert!(err.hint().is_some());
    }

    #[test]
    fn error_classification() {
        assert!(ConvoyError::DuplicateComponent("a".into()).is_configuration());
        assert!(!ConvoyError::DuplicateComponent("a".into()).is_cache());
        assert!(ConvoyError::ObjectNotFound("a".into()).is_cache());
        assert!(!ConvoyError::User("x".into()).is_cache());
        let pattern = ConvoyError::InvalidPattern {
            pattern: "[".into(),
            reason: "unclosed".into(),
        };
        assert!(pattern.is_configuration());
        assert!(pattern.hint().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn write_maps_enospc() {
        let full = std::io::Error::from_raw_os_error(libc::ENOSPC);
        assert!(matches!(
            ConvoyError::write("writing object", full),
            ConvoyError::InsufficientSpace { .. }
        ));

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            ConvoyError::write("writing object", denied),
            ConvoyError::Io { .. }
        ));
    }
}
