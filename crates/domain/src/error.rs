/// Failure kind reported by a remote provider (embedding / reranker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Timeout,
    Provider5xx,
    Provider4xx,
    Schema,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Provider5xx => "provider_5xx",
            ProviderErrorKind::Provider4xx => "provider_4xx",
            ProviderErrorKind::Schema => "schema",
        };
        f.write_str(label)
    }
}

/// Shared error type used across all sage crates.
///
/// Variants map to the service-level error taxonomy: what is retried,
/// what is fatal, and what is translated into a user-facing tool
/// error at the server boundary.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed request, schema violation, oversize content.
    /// Reported to the caller, never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing environment, dimension mismatch, corrupt config.
    /// Fatal at startup.
    #[error("config: {0}")]
    Config(String),

    /// Embedding / reranker HTTP failure after retries.
    #[error("provider {kind}: {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    /// Database connection, serialization or deadlock failure —
    /// retryable.
    #[error("storage: {0}")]
    StorageTransient(String),

    /// Schema missing or non-transient constraint violation — not
    /// retryable.
    #[error("storage: {0}")]
    StorageFatal(String),

    /// Wall-clock timeout; in-flight sub-operations were cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a caller-side retry loop may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StorageTransient(_)
                | Error::Provider {
                    kind: ProviderErrorKind::Timeout | ProviderErrorKind::Provider5xx,
                    ..
                }
        )
    }

    /// Short stable label for structured log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::InvalidInput(_) => "input_invalid",
            Error::Config(_) => "config_missing",
            Error::Provider { .. } => "provider_unavailable",
            Error::StorageTransient(_) => "storage_transient",
            Error::StorageFatal(_) => "storage_fatal",
            Error::Cancelled(_) => "cancelled",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::StorageTransient("deadlock".into()).is_retryable());
        assert!(Error::Provider {
            kind: ProviderErrorKind::Provider5xx,
            message: "503".into()
        }
        .is_retryable());
        assert!(!Error::Provider {
            kind: ProviderErrorKind::Provider4xx,
            message: "401".into()
        }
        .is_retryable());
        assert!(!Error::InvalidInput("too long".into()).is_retryable());
        assert!(!Error::StorageFatal("missing table".into()).is_retryable());
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(Error::Cancelled("30s".into()).kind(), "cancelled");
        assert_eq!(
            Error::Provider {
                kind: ProviderErrorKind::Timeout,
                message: "".into()
            }
            .kind(),
            "provider_unavailable"
        );
    }
}
