//! Structured error types for ustack
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! None of these errors is fatal to a trace session: the visitor turns
//! [`UnwindError`] into a counter increment and keeps going.

use thiserror::Error;

/// Why a single sample could not be unwound
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnwindError {
    #[error("instruction pointer 0x{0:x} is not in an executable mapping")]
    UnmappedInstructionPointer(u64),

    #[error("stack snapshot is empty")]
    EmptyStack,

    #[error("callchain holds no user-space frames")]
    EmptyCallchain,
}

/// A line of `/proc/<pid>/maps` text that could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapsParseError {
    #[error("line {line}: expected at least 5 fields, found {found}")]
    MissingFields { line: usize, found: usize },

    #[error("line {line}: invalid address range {range:?}")]
    InvalidRange { line: usize, range: String },

    #[error("line {line}: invalid permissions {perms:?}")]
    InvalidPermissions { line: usize, perms: String },

    #[error("line {line}: invalid offset {offset:?}")]
    InvalidOffset { line: usize, offset: String },

    #[error("line {line}: region 0x{start:x}-0x{end:x} overlaps the previous region")]
    Overlapping { line: usize, start: u64, end: u64 },
}

/// Failure while loading a recorded event stream
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("line {line}: invalid event: {source}")]
    InvalidEvent {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwind_error_display() {
        let err = UnwindError::UnmappedInstructionPointer(0xdead);
        assert_eq!(
            err.to_string(),
            "instruction pointer 0xdead is not in an executable mapping"
        );
    }

    #[test]
    fn test_maps_error_carries_line() {
        let err = MapsParseError::InvalidPermissions {
            line: 3,
            perms: "rwz".to_string(),
        };
        assert!(err.to_string().starts_with("line 3:"));
        assert!(err.to_string().contains("rwz"));
    }

    #[test]
    fn test_replay_error_from_json() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ReplayError::InvalidEvent { line: 12, source };
        assert!(err.to_string().contains("line 12"));
    }
}
