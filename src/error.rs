//! Error types for the snippet sandbox.

use thiserror::Error;

/// Errors that can occur while validating or executing a snippet.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The code was empty or otherwise unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The code exceeded the maximum accepted length.
    #[error("code too long: {actual} characters exceeds the maximum of {max}")]
    TooLong {
        /// Maximum accepted length in characters.
        max: usize,
        /// Length of the rejected code in characters.
        actual: usize,
    },

    /// The static validator matched a forbidden lexical pattern.
    #[error("code contains blocked pattern: {0}")]
    BlockedPattern(String),

    /// The execution exceeded its time budget (in milliseconds).
    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    /// The execution exceeded the memory ceiling (in megabytes).
    #[error("memory limit of {0}MB exceeded")]
    MemoryExceeded(u32),

    /// The script failed to compile or threw at runtime.
    #[error("execution failed: {0}")]
    ExecutionError(String),

    /// Configuration was changed while an isolate exists.
    #[error("sandbox is already initialized; configuration is immutable until disposed")]
    AlreadyInitialized,

    /// The operation needs a live isolate and none exists.
    #[error("sandbox is not initialized")]
    NotInitialized,

    /// The isolate could not be started.
    #[error("failed to start isolate: {0}")]
    RuntimeInit(#[source] anyhow::Error),
}

/// Discriminant of a [`SandboxError`], for callers that decide policy per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorKind {
    InvalidInput,
    TooLong,
    BlockedPattern,
    Timeout,
    MemoryExceeded,
    ExecutionError,
    AlreadyInitialized,
    NotInitialized,
    RuntimeInit,
}

impl SandboxError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::InvalidInput(_) => ErrorKind::InvalidInput,
            SandboxError::TooLong { .. } => ErrorKind::TooLong,
            SandboxError::BlockedPattern(_) => ErrorKind::BlockedPattern,
            SandboxError::Timeout(_) => ErrorKind::Timeout,
            SandboxError::MemoryExceeded(_) => ErrorKind::MemoryExceeded,
            SandboxError::ExecutionError(_) => ErrorKind::ExecutionError,
            SandboxError::AlreadyInitialized => ErrorKind::AlreadyInitialized,
            SandboxError::NotInitialized => ErrorKind::NotInitialized,
            SandboxError::RuntimeInit(_) => ErrorKind::RuntimeInit,
        }
    }

    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }

    /// Check if this error represents a memory limit exceeded.
    pub fn is_memory_limit(&self) -> bool {
        matches!(self, SandboxError::MemoryExceeded(_))
    }

    /// Check if the code was rejected before reaching the isolate.
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            SandboxError::InvalidInput(_)
                | SandboxError::TooLong { .. }
                | SandboxError::BlockedPattern(_)
        )
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_helpers() {
        let timeout = SandboxError::Timeout(5000);
        assert!(timeout.is_timeout());
        assert!(!timeout.is_memory_limit());
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let memory = SandboxError::MemoryExceeded(128);
        assert!(memory.is_memory_limit());
        assert!(!memory.is_rejected());

        let blocked = SandboxError::BlockedPattern("eval(".to_string());
        assert!(blocked.is_rejected());
        assert_eq!(blocked.kind(), ErrorKind::BlockedPattern);
    }

    #[test]
    fn test_messages_name_limits() {
        assert_eq!(
            SandboxError::Timeout(250).to_string(),
            "execution timed out after 250ms"
        );
        assert_eq!(
            SandboxError::MemoryExceeded(64).to_string(),
            "memory limit of 64MB exceeded"
        );
        assert!(SandboxError::BlockedPattern("process.".into())
            .to_string()
            .contains("process."));
        assert!(SandboxError::TooLong {
            max: 10_000,
            actual: 10_001
        }
        .to_string()
        .contains("10000"));
    }
}
