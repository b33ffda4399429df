/// How a provider failure should be handled by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Transient: busy database, interrupted IO. Worth retrying.
    Retryable,
    /// Corruption, malformed data, invalid input. Retrying won't help.
    Permanent,
    /// `create_instance` found the id already taken.
    AlreadyExists,
    /// The instance does not exist.
    NotFound,
}

/// History log error with retry classification.
///
/// The runtime uses [`ProviderError::is_retryable`] to decide whether a tick
/// should back off and try again.
///
/// ```rust
/// use durable_fanout::providers::ProviderError;
///
/// let busy = ProviderError::retryable("append", "database is locked");
/// assert!(busy.is_retryable());
///
/// let corrupt = ProviderError::permanent("read", "invalid JSON on line 3");
/// assert!(!corrupt.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Operation that failed (e.g. "append", "create_instance")
    pub operation: String,
    pub message: String,
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_kind(ProviderErrorKind::Retryable, operation, message)
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_kind(ProviderErrorKind::Permanent, operation, message)
    }

    pub fn already_exists(operation: impl Into<String>, instance: &str) -> Self {
        Self::with_kind(
            ProviderErrorKind::AlreadyExists,
            operation,
            format!("instance '{instance}' already exists"),
        )
    }

    pub fn not_found(operation: impl Into<String>, instance: &str) -> Self {
        Self::with_kind(
            ProviderErrorKind::NotFound,
            operation,
            format!("instance '{instance}' not found"),
        )
    }

    fn with_kind(kind: ProviderErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            kind,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ProviderErrorKind::Retryable
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => Self::retryable("io", e.to_string()),
            _ => Self::permanent("io", e.to_string()),
        }
    }
}
