//! Error types for vanlink
//!
//! Platform conditions the core branches on (not-found, already-exists) are
//! first-class variants so they survive being wrapped with operation context.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pki::PkiError;

/// Main error type for vanlink operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error that is neither a 404 nor a 409
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The named object does not exist on the platform
    #[error("{kind} {namespace}/{name} does not exist")]
    NotFound {
        /// Object kind (Secret, Namespace, ...)
        kind: String,
        /// Object name
        name: String,
        /// Namespace the lookup ran in
        namespace: String,
    },

    /// The named object already exists on the platform
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Object kind (Secret, Namespace, ...)
        kind: String,
        /// Object name
        name: String,
        /// Namespace the create ran in
        namespace: String,
    },

    /// A certificate authority operation failed
    #[error("failed to {action} CA {name}: {source}")]
    CertAuthority {
        /// CA secret name
        name: String,
        /// What was being attempted (check, create, retrieve)
        action: &'static str,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// A credential operation failed
    #[error("failed to {action} credential {name}: {source}")]
    Credential {
        /// Credential secret name
        name: String,
        /// What was being attempted (create, delete)
        action: &'static str,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Certificate generation or parsing failed
    #[error("pki error: {0}")]
    Pki(#[from] PkiError),

    /// A connection token artifact is malformed
    #[error("invalid connection token: {0}")]
    Token(String),

    /// A topology description is inconsistent
    #[error("invalid topology: {0}")]
    Topology(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem error on a token or configuration file
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// A site did not converge before the deadline
    #[error("timeout after {waited:?} waiting for site {site} to converge")]
    Timeout {
        /// Site being checked when the deadline passed
        site: String,
        /// Time spent waiting on this site
        waited: Duration,
    },

    /// The verification run was canceled before a site converged
    #[error("canceled while waiting for site {site} to converge")]
    Canceled {
        /// Site being checked when cancellation fired
        site: String,
    },
}

impl Error {
    /// Create a not-found error for a namespaced object
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create an already-exists error for a namespaced object
    pub fn already_exists(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Wrap an error with CA context
    pub fn cert_authority(name: impl Into<String>, action: &'static str, source: Error) -> Self {
        Self::CertAuthority {
            name: name.into(),
            action,
            source: Box::new(source),
        }
    }

    /// Wrap an error with credential context
    pub fn credential(name: impl Into<String>, action: &'static str, source: Error) -> Self {
        Self::Credential {
            name: name.into(),
            action,
            source: Box::new(source),
        }
    }

    /// Create a token error with the given message
    pub fn token(msg: impl Into<String>) -> Self {
        Self::Token(msg.into())
    }

    /// Create a topology error with the given message
    pub fn topology(msg: impl Into<String>) -> Self {
        Self::Topology(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an I/O error bound to a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error, or the error it wraps, is a not-found condition
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::CertAuthority { source, .. } | Self::Credential { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }

    /// Whether this error, or the error it wraps, is an already-exists condition
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::CertAuthority { source, .. } | Self::Credential { source, .. } => {
                source.is_already_exists()
            }
            _ => false,
        }
    }

    /// Map a kube error onto the platform conditions the core branches on
    pub fn from_kube(
        err: kube::Error,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => {
                Self::not_found(kind, namespace, name)
            }
            kube::Error::Api(ref resp) if resp.code == 409 => {
                Self::already_exists(kind, namespace, name)
            }
            other => Self::Kube(other),
        }
    }
}
