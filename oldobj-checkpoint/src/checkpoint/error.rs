use std::collections::TryReserveError;
use std::fmt;
use thiserror::Error;

/// The pass that was running when an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Rotation,
    TypeSet,
    Write,
    Mark,
    Clear,
    ThreadExit,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pass::Rotation => "rotation",
            Pass::TypeSet => "type-set",
            Pass::Write => "write",
            Pass::Mark => "mark",
            Pass::Clear => "clear",
            Pass::ThreadExit => "thread-exit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("allocation failed while growing pass-scoped storage: {0}")]
    Alloc(String),

    /// The resolution/emission protocol was broken. Never recoverable at this layer.
    #[error("invariant violated during {pass} pass: {detail}")]
    Invariant { pass: Pass, detail: String },

    #[error("malformed checkpoint stream: {0}")]
    Format(String),

    #[error("invalid leak profiler options: {0}")]
    Options(#[from] serde_json::Error),
}

impl CheckpointError {
    /// Build an invariant violation and report it on the error log.
    pub(crate) fn invariant(pass: Pass, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::error!(target: "oldobj_checkpoint", %pass, %detail, "fatal invariant violation");
        CheckpointError::Invariant { pass, detail }
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, CheckpointError::Invariant { .. })
    }
}

impl From<TryReserveError> for CheckpointError {
    fn from(e: TryReserveError) -> Self {
        CheckpointError::Alloc(e.to_string())
    }
}

impl From<smallvec::CollectionAllocErr> for CheckpointError {
    fn from(e: smallvec::CollectionAllocErr) -> Self {
        CheckpointError::Alloc(format!("{e:?}"))
    }
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_message_carries_pass() {
        let err = CheckpointError::invariant(Pass::Write, "count mismatch");
        assert!(err.is_invariant());
        assert_eq!(
            err.to_string(),
            "invariant violated during write pass: count mismatch"
        );
    }

    #[test]
    fn test_try_reserve_failure_maps_to_alloc() {
        let mut v: Vec<u64> = Vec::new();
        let err: CheckpointError = v.try_reserve(usize::MAX).unwrap_err().into();
        assert!(matches!(err, CheckpointError::Alloc(_)));
    }

    #[test]
    fn test_io_is_transparent() {
        let err: CheckpointError =
            std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert_eq!(err.to_string(), "disk gone");
        assert!(!err.is_invariant());
    }
}
