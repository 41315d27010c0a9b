//! Error types for the gateway core.
//!
//! Follows the same three-tier shape used throughout the surrounding MCP
//! tooling: a stable `code` + human `message` + structured `context`,
//! with constructor helpers and a `sanitize()` escape hatch for
//! client-visible messages.

use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Error taxonomy for the gateway core (spec §7).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// Namespaced identifier not present in the registry.
    #[error("not found: {kind} '{id}'")]
    NotFound { kind: String, id: String },

    /// The transport pool could not establish a connection to a backend.
    #[error("backend '{backend_id}' unavailable: {reason}")]
    BackendUnavailable { backend_id: String, reason: String },

    /// A backend returned an MCP-level error; its code and message are
    /// preserved verbatim.
    #[error("backend '{backend_id}' error {code}: {message}")]
    BackendError {
        backend_id: String,
        code: i64,
        message: String,
    },

    /// A backend call exceeded its configured timeout.
    #[error("backend '{backend_id}' operation '{operation}' timed out after {timeout_ms}ms")]
    TimeoutExceeded {
        backend_id: String,
        operation: String,
        timeout_ms: u64,
    },

    /// A backend response exceeded the configured output size limit.
    #[error("backend '{backend_id}' response of {size} bytes exceeds the output size limit")]
    PayloadTooLarge { backend_id: String, size: usize },

    /// A catalog sync (full or targeted) failed partway through paging or
    /// commit. The prior snapshot is retained; this is logged, never
    /// surfaced to a client.
    #[error("sync of '{kind}' for backend '{backend_id}' failed: {reason}")]
    SyncFailed {
        backend_id: String,
        kind: String,
        reason: String,
    },

    /// A backend sent a malformed message. Fatal for that backend's
    /// session.
    #[error("protocol error on backend '{backend_id}': {reason}")]
    ProtocolError { backend_id: String, reason: String },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {message}")]
    Configuration { message: String, key: Option<String> },

    /// Serialization/deserialization of a JSON-RPC payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying I/O failure (child process spawn, socket, file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn backend_unavailable(backend_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend_id: backend_id.into(),
            reason: reason.into(),
        }
    }

    pub fn backend_error(
        backend_id: impl Into<String>,
        code: i64,
        message: impl Into<String>,
    ) -> Self {
        Self::BackendError {
            backend_id: backend_id.into(),
            code,
            message: message.into(),
        }
    }

    pub fn timeout(
        backend_id: impl Into<String>,
        operation: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self::TimeoutExceeded {
            backend_id: backend_id.into(),
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn payload_too_large(backend_id: impl Into<String>, size: usize) -> Self {
        Self::PayloadTooLarge {
            backend_id: backend_id.into(),
            size,
        }
    }

    pub fn sync_failed(
        backend_id: impl Into<String>,
        kind: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SyncFailed {
            backend_id: backend_id.into(),
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(backend_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProtocolError {
            backend_id: backend_id.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: None,
        }
    }

    pub fn configuration_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Stable numeric code for the MCP wire error envelope. Reuses the
    /// JSON-RPC server-error range (-32000..-32099) except for
    /// `BackendError`, which preserves the backend's own code verbatim.
    pub fn wire_code(&self) -> i64 {
        match self {
            Self::NotFound { .. } => -32001,
            Self::BackendUnavailable { .. } => -32002,
            Self::BackendError { code, .. } => *code,
            Self::TimeoutExceeded { .. } => -32003,
            Self::PayloadTooLarge { .. } => -32004,
            Self::SyncFailed { .. } => -32005,
            Self::ProtocolError { .. } => -32006,
            Self::Configuration { .. } => -32007,
            Self::Serialization(_) => -32700,
            Self::Io(_) => -32008,
        }
    }

    /// Client-safe message, scrubbed of internal detail for kinds that
    /// shouldn't leak backend process/transport internals.
    pub fn sanitize(&self) -> String {
        match self {
            Self::NotFound { kind, id } => format!("{kind} '{id}' not found"),
            Self::BackendUnavailable { backend_id, .. } => {
                format!("backend '{backend_id}' is unavailable")
            }
            Self::BackendError { message, .. } => message.clone(),
            Self::TimeoutExceeded { operation, .. } => format!("'{operation}' timed out"),
            Self::PayloadTooLarge { .. } => "response exceeded the size limit".to_string(),
            Self::SyncFailed { .. } => "catalog sync failed".to_string(),
            Self::ProtocolError { .. } => "backend protocol error".to_string(),
            Self::Configuration { .. } => "configuration error".to_string(),
            Self::Serialization(_) => "malformed message".to_string(),
            Self::Io(_) => "io error".to_string(),
        }
    }

    /// Whether a caller may reasonably retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::TimeoutExceeded { .. } | Self::Io(_)
        )
    }
}

/// Extension trait mirroring the corpus's `*ErrorExt` pattern: attach
/// gateway context to an arbitrary fallible result.
pub trait GatewayErrorExt<T> {
    fn backend_context(self, backend_id: impl Into<String>) -> GatewayResult<T>;
    fn config_context(self, key: impl Into<String>) -> GatewayResult<T>;
}

impl<T, E> GatewayErrorExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn backend_context(self, backend_id: impl Into<String>) -> GatewayResult<T> {
        self.map_err(|e| GatewayError::backend_unavailable(backend_id, e.to_string()))
    }

    fn config_context(self, key: impl Into<String>) -> GatewayResult<T> {
        self.map_err(|e| GatewayError::configuration_with_key(e.to_string(), key))
    }
}
