//! Error types for olmrun
//!
//! Errors carry the package, object kind and object name they concern so a
//! failed install or uninstall can be diagnosed from the message alone.
//! Variants fall into four classes: precondition violations (never preceded
//! by a mutation), mutation failures, watcher timeouts/cancellation, and
//! read failures surfaced while polling.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for olmrun operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid or missing input detected before any mutation
    #[error("precondition failed for package {package}: {message}")]
    Precondition {
        /// Package the operation targeted
        package: String,
        /// Description of what's invalid
        message: String,
    },

    /// The package already has an installation record
    #[error("package {package} is already installed")]
    AlreadyInstalled {
        /// Package the install targeted
        package: String,
    },

    /// No installation record existed for the package
    #[error("package {package} is not installed")]
    NotInstalled {
        /// Package the uninstall targeted
        package: String,
    },

    /// A package directory could not be loaded
    #[error("invalid package manifests at {path}: {message}")]
    Manifest {
        /// File or directory that failed to load
        path: String,
        /// Description of what failed
        message: String,
    },

    /// The requested install mode is not supported by the CSV or is malformed
    #[error("install mode {mode} is not usable for {csv}: {message}")]
    InstallMode {
        /// Name of the ClusterServiceVersion
        csv: String,
        /// Textual install mode
        mode: String,
        /// Why the mode was rejected
        message: String,
    },

    /// The cluster rejected a create or delete
    #[error("failed to {action} {kind} {name}: {message}")]
    Mutation {
        /// Verb that failed (create, delete)
        action: String,
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Underlying cause
        message: String,
    },

    /// A ClusterServiceVersion reported the Failed phase
    #[error("ClusterServiceVersion {csv} failed ({reason}): {message}")]
    CsvFailed {
        /// Name of the ClusterServiceVersion
        csv: String,
        /// Machine-readable reason from the CSV status
        reason: String,
        /// Human-readable message from the CSV status
        message: String,
    },

    /// The run deadline elapsed before the operation converged
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// Budget that elapsed
        timeout: Duration,
    },

    /// The run was cancelled by the caller
    #[error("cancelled while waiting for {operation}")]
    Cancelled {
        /// What was being waited on
        operation: String,
    },

    /// A read performed while polling failed
    #[error("failed to read {kind}: {message}")]
    Read {
        /// Resource kind being read
        kind: String,
        /// Underlying cause
        message: String,
    },

    /// Connection configuration could not be loaded
    #[error("configuration error: {message}")]
    Config {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a precondition error for a package
    pub fn precondition(package: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Precondition {
            package: package.into(),
            message: msg.into(),
        }
    }

    /// Create an "already installed" error
    pub fn already_installed(package: impl Into<String>) -> Self {
        Self::AlreadyInstalled {
            package: package.into(),
        }
    }

    /// Create a "not installed" error
    pub fn not_installed(package: impl Into<String>) -> Self {
        Self::NotInstalled {
            package: package.into(),
        }
    }

    /// Create a manifest loading error for a path
    pub fn manifest(path: impl AsRef<std::path::Path>, msg: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.as_ref().display().to_string(),
            message: msg.into(),
        }
    }

    /// Create an install mode error
    pub fn install_mode(
        csv: impl Into<String>,
        mode: impl std::fmt::Display,
        msg: impl Into<String>,
    ) -> Self {
        Self::InstallMode {
            csv: csv.into(),
            mode: mode.to_string(),
            message: msg.into(),
        }
    }

    /// Create a mutation error for a rejected create/delete
    pub fn mutation(
        action: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        Self::Mutation {
            action: action.into(),
            kind: kind.into(),
            name: name.into(),
            message: cause.to_string(),
        }
    }

    /// Create a failed-CSV error
    pub fn csv_failed(
        csv: impl Into<String>,
        reason: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::CsvFailed {
            csv: csv.into(),
            reason: reason.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a read error
    pub fn read(kind: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Read {
            kind: kind.into(),
            message: cause.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error was raised before any mutation because the
    /// input or the cluster state made the operation invalid
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::Precondition { .. }
                | Error::AlreadyInstalled { .. }
                | Error::NotInstalled { .. }
                | Error::Manifest { .. }
                | Error::InstallMode { .. }
        )
    }

    /// Check if the run ended because its deadline elapsed or it was cancelled
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Cancelled { .. })
    }

    /// Check if this error is retryable
    ///
    /// Precondition and serialization errors need an input or cluster fix.
    /// Timeouts and read failures are worth retrying, usually after an
    /// uninstall to clear partial state.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Timeout { .. } | Error::Cancelled { .. } | Error::Read { .. } => true,
            Error::Mutation { .. } | Error::Internal { .. } => true,
            Error::Precondition { .. }
            | Error::AlreadyInstalled { .. }
            | Error::NotInstalled { .. }
            | Error::Manifest { .. }
            | Error::InstallMode { .. }
            | Error::CsvFailed { .. }
            | Error::Config { .. }
            | Error::Serialization { .. } => false,
        }
    }

    /// Get the package name if this error is associated with a specific package
    pub fn package(&self) -> Option<&str> {
        match self {
            Error::Precondition { package, .. }
            | Error::AlreadyInstalled { package }
            | Error::NotInstalled { package } => Some(package),
            _ => None,
        }
    }

    /// Get the resource kind if this error concerns one
    pub fn kind(&self) -> Option<&str> {
        match self {
            Error::Mutation { kind, .. } | Error::Read { kind, .. } => Some(kind),
            Error::Serialization { kind, .. } => kind.as_deref(),
            _ => None,
        }
    }
}
