//! Error types for the TKE convergence engine
//!
//! Errors are structured with fields so a failed run can be diagnosed from the
//! error alone: which step failed, which phase the remote object was last seen
//! in, and which field of the desired state was rejected.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error returned by the remote control plane.
///
/// This is the only error shape the RPC collaborator is allowed to surface.
/// Transport failures are reported with a `ClientError.*` code so they flow
/// through the same classification table as API errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteError {
    /// Provider error code, e.g. `InternalError.ClusterNotFound`
    pub code: String,
    /// Human-readable message returned with the code
    pub message: String,
    /// Request ID for correlating with provider-side logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RemoteError {
    /// Create a remote error from a code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    /// Whether the error reports that the addressed object does not exist.
    ///
    /// Node-pool deletes report absence as `InternalError.Param` with a
    /// "Not Found" message instead of a dedicated code.
    pub fn is_not_found(&self) -> bool {
        self.code.ends_with("NotFound")
            || self.code.starts_with("ResourceNotFound")
            || (self.code == "InternalError.Param" && self.message.contains("Not Found"))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref id) = self.request_id {
            write!(f, " (request {})", id)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

/// Main error type for convergence operations
#[derive(Debug, Error)]
pub enum Error {
    /// Desired state document is malformed or internally inconsistent
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "network.clusterCidr")
        field: Option<String>,
    },

    /// A field that cannot change after creation differs from the observed value
    #[error("field {field} is immutable (observed {observed}, desired {desired})")]
    Immutable {
        /// Field path
        field: String,
        /// Value on the remote object
        observed: String,
        /// Value requested by the caller
        desired: String,
    },

    /// Remote control plane rejected a call
    #[error("remote error during {step}: {source}")]
    Remote {
        /// Step that issued the call
        step: String,
        /// The provider error
        #[source]
        source: RemoteError,
    },

    /// A step did not reach a terminal phase within its budget
    #[error("timed out after {elapsed:?} during {step} (last phase: {})", .last_phase.as_deref().unwrap_or("none"))]
    Timeout {
        /// Step that was waiting
        step: String,
        /// Last non-terminal phase observed before the budget ran out
        last_phase: Option<String>,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// A remote object reached a terminal failure phase
    #[error("{step} ended in phase {phase}: {message}")]
    TerminalPhase {
        /// Step that was waiting
        step: String,
        /// Terminal failure phase
        phase: String,
        /// Reason reported by the remote system
        message: String,
    },

    /// The caller cancelled the run
    #[error("cancelled during {step}")]
    Cancelled {
        /// Step that was in flight
        step: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being processed (if known)
        kind: Option<String>,
    },

    /// Engine configuration error
    #[error("configuration error: {message}")]
    Config {
        /// Description of what failed
        message: String,
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
    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an immutable-field error
    pub fn immutable(
        field: impl Into<String>,
        observed: impl fmt::Display,
        desired: impl fmt::Display,
    ) -> Self {
        Self::Immutable {
            field: field.into(),
            observed: observed.to_string(),
            desired: desired.to_string(),
        }
    }

    /// Wrap a remote error with the step that issued the call
    pub fn remote(step: impl Into<String>, source: RemoteError) -> Self {
        Self::Remote {
            step: step.into(),
            source,
        }
    }

    /// Create a terminal-phase error
    pub fn terminal_phase(
        step: impl Into<String>,
        phase: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::TerminalPhase {
            step: step.into(),
            phase: phase.to_string(),
            message: message.into(),
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable by re-invoking convergence
    ///
    /// Validation, immutability, and configuration errors need a fix to the
    /// input. Timeouts and cancellations leave the run resumable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Validation { .. } => false,
            Error::Immutable { .. } => false,
            Error::Remote { .. } => true,
            Error::Timeout { .. } => true,
            Error::TerminalPhase { .. } => false,
            Error::Cancelled { .. } => true,
            Error::Serialization { .. } => false,
            Error::Config { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether the error was raised before any remote call could be made
    pub fn is_planning_error(&self) -> bool {
        matches!(self, Error::Validation { .. } | Error::Immutable { .. })
    }

    /// Last phase observed, for timeout and terminal-phase errors
    pub fn last_phase(&self) -> Option<&str> {
        match self {
            Error::Timeout { last_phase, .. } => last_phase.as_deref(),
            Error::TerminalPhase { phase, .. } => Some(phase),
            _ => None,
        }
    }
}
