//! Host error taxonomy.
//!
//! Every fallible host call returns [`HostResult`]. Plugin actions report a
//! protocol [`Status`]; the node wraps a failing status together with its own
//! name and the lifecycle phase into [`HostError::Status`].

use std::fmt;

use crate::entities::plugin::Status;

pub type HostResult<T> = Result<T, HostError>;

/// Lifecycle phase of a node render, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Begin,
    PreProcessFinish,
    PreProcessInitialize,
    Process,
    PostProcess,
    End,
    InstanceChanged,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Begin => "begin",
            Phase::PreProcessFinish => "preProcess_finish",
            Phase::PreProcessInitialize => "preProcess_initialize",
            Phase::Process => "process",
            Phase::PostProcess => "postProcess",
            Phase::End => "end",
            Phase::InstanceChanged => "instanceChanged",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HostError {
    /// A required clip has no upstream producer, or the graph is malformed.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("unsupported operation on {kind} node: {op}")]
    Unsupported { kind: &'static str, op: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("node `{node}` {phase}: {action} returned {status:?}")]
    Status {
        node: String,
        phase: Phase,
        action: &'static str,
        status: Status,
    },

    #[error("render cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("numeric error: {0}")]
    Numeric(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HostError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn unsupported(kind: &'static str, op: impl Into<String>) -> Self {
        Self::Unsupported {
            kind,
            op: op.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn numeric(msg: impl Into<String>) -> Self {
        Self::Numeric(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, HostError::Cancelled)
    }

    /// Errors that indicate a malformed graph or a programming error rather
    /// than a transient condition.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            HostError::Connection(_) | HostError::Unsupported { .. } | HostError::TypeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(HostError::connection("x").to_string().starts_with("connection error:"));
        assert!(HostError::not_found("x").to_string().starts_with("not found:"));
        assert!(HostError::numeric("x").to_string().starts_with("numeric error:"));
        assert_eq!(HostError::Cancelled.to_string(), "render cancelled");
        let e = HostError::unsupported("InputBuffer", "param");
        assert_eq!(e.to_string(), "unsupported operation on InputBuffer node: param");
    }

    #[test]
    fn status_error_names_node_and_phase() {
        let e = HostError::Status {
            node: "blur1".into(),
            phase: Phase::Process,
            action: "render",
            status: Status::Failed,
        };
        let s = e.to_string();
        assert!(s.contains("blur1"));
        assert!(s.contains("process"));
        assert!(s.contains("Failed"));
    }

    #[test]
    fn classification() {
        assert!(HostError::Cancelled.is_cancelled());
        assert!(HostError::connection("x").is_structural());
        assert!(!HostError::Cancelled.is_structural());
        let other = HostError::Other(anyhow::anyhow!("boom"));
        assert!(other.to_string().contains("boom"));
    }
}
