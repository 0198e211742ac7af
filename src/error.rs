//! Error types for the PowerVS Block CSI Driver Operator
//!
//! Provides structured error types for the manifest hooks, the
//! typed/dynamic state bridge, manifest rendering, and the controllers.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Informer cache not synced: {0}")]
    CacheNotSynced(String),

    // =========================================================================
    // State Bridge Errors
    // =========================================================================
    #[error("unable to convert to {kind}: {reason}")]
    Conversion { kind: String, reason: String },

    #[error("unable to extract fields for {field_manager:?}: {reason}")]
    Extraction { field_manager: String, reason: String },

    // =========================================================================
    // Manifest Errors
    // =========================================================================
    #[error("Failed to render manifest {asset}: {reason}")]
    ManifestRender { asset: String, reason: String },

    #[error("Management state {state} is not supported")]
    UnsupportedManagementState { state: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Shorthand for a missing object in an informer cache
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::CacheNotSynced(_) => ErrorAction::RequeueWithBackoff,

            // Dependent objects may show up later
            Error::ResourceNotFound { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Schema mismatch between the live object and our types
            Error::Conversion { .. } | Error::Extraction { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Configuration errors - don't retry automatically
            Error::Configuration(_)
            | Error::ManifestRender { .. }
            | Error::UnsupportedManagementState { .. } => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409 || resp.code >= 500,
            Error::Kube(_) | Error::CacheNotSynced(_) => true,
            _ => false,
        }
    }

    /// Check if this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Short label for the `error` metric dimension
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal",
            Error::Configuration(_) => "configuration",
            Error::Kube(_) => "kube",
            Error::ResourceNotFound { .. } => "not_found",
            Error::CacheNotSynced(_) => "cache_not_synced",
            Error::Conversion { .. } => "conversion",
            Error::Extraction { .. } => "extraction",
            Error::ManifestRender { .. } => "manifest_render",
            Error::UnsupportedManagementState { .. } => "management_state",
            Error::JsonParse(_) => "parse",
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
