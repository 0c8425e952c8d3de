// Domain error kinds surfaced to callers
// These travel inside anyhow chains and are recovered with downcast_ref at
// the CLI edge, where each kind maps to a one-line message and exit status.

use thiserror::Error;

/// Error kinds every store operation may surface.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity does not exist. Not fatal; the CLI prints a friendly message.
    #[error("not found: {0}")]
    NotFound(String),

    /// Task claim lost the race. The caller may retry with a different task.
    #[error("task already claimed")]
    AlreadyClaimed,

    /// Malformed input: bad numeric flag, unknown enumerated value, missing
    /// required field.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Index/KV mismatch detected during hydration. The row is dropped; a
    /// full `memory reindex` repairs.
    #[error("store corrupt: {0}")]
    StoreCorrupt(String),

    /// The operation has no remote method on the IPC surface.
    #[error("operation not supported over IPC: {0} (stop the daemon or use direct mode)")]
    UnsupportedOverIpc(String),

    /// Another process holds the database lock.
    #[error("database is locked by another process: {0}")]
    Locked(String),
}

impl StoreError {
    /// Process exit code for the CLI edge.
    pub fn exit_code(&self) -> i32 {
        match self {
            StoreError::NotFound(_) => 1,
            StoreError::AlreadyClaimed => 2,
            StoreError::Invalid(_) => 2,
            StoreError::StoreCorrupt(_) => 3,
            StoreError::UnsupportedOverIpc(_) => 4,
            StoreError::Locked(_) => 5,
        }
    }
}

/// Look for a `StoreError` anywhere in an anyhow chain.
pub fn as_store_error(err: &anyhow::Error) -> Option<&StoreError> {
    err.chain().find_map(|cause| cause.downcast_ref::<StoreError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn downcast_through_context_chain() {
        let err = anyhow::Error::new(StoreError::AlreadyClaimed);
        let wrapped: anyhow::Error = Err::<(), _>(err)
            .context("claiming task t-1")
            .unwrap_err();
        assert!(matches!(
            as_store_error(&wrapped),
            Some(StoreError::AlreadyClaimed)
        ));
    }

    #[test]
    fn not_found_is_not_fatal_exit() {
        assert_eq!(StoreError::NotFound("memory x".into()).exit_code(), 1);
        assert_eq!(StoreError::Invalid("bad ttl".into()).exit_code(), 2);
    }
}
