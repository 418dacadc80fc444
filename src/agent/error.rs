use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::db::registry::Backend;

/// Why the validator refused a candidate query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    Syntax(String),
    UnknownTable(String),
    UnknownColumn(String),
    MutatingOperation(String),
    ResultTooLarge { estimated: u64, ceiling: u64 },
}

impl RejectReason {
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::Syntax(_) => "syntax",
            RejectReason::UnknownTable(_) => "unknown_table",
            RejectReason::UnknownColumn(_) => "unknown_column",
            RejectReason::MutatingOperation(_) => "mutating_operation",
            RejectReason::ResultTooLarge { .. } => "result_too_large",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Syntax(msg) => write!(f, "syntax error: {}", msg),
            RejectReason::UnknownTable(name) => write!(f, "unknown table: {}", name),
            RejectReason::UnknownColumn(name) => write!(f, "unknown column: {}", name),
            RejectReason::MutatingOperation(op) => write!(f, "mutating operation not allowed: {}", op),
            RejectReason::ResultTooLarge { estimated, ceiling } => write!(
                f,
                "estimated result of {} rows exceeds the ceiling of {} rows",
                estimated, ceiling
            ),
        }
    }
}

/// Terminal and recoverable failures of a query cycle.
#[derive(Debug, Clone)]
pub enum AgentError {
    GenerationTimeout { backend: Backend, budget: Duration },
    GenerationMalformed { backend: Backend, reason: String },
    ValidationRejected { backend: Backend, reason: RejectReason },
    ExecutionTimeout { backend: Backend, budget: Duration },
    ExecutionFailed { backend: Backend, message: String },
    SessionBusy { session_id: String },
    AllBackendsExhausted { attempts: Vec<AgentError> },
    UnknownDataset(String),
    EmptyQuestion,
}

impl AgentError {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::GenerationTimeout { .. } => "generation_timeout",
            AgentError::GenerationMalformed { .. } => "generation_malformed",
            AgentError::ValidationRejected { .. } => "validation_rejected",
            AgentError::ExecutionTimeout { .. } => "execution_timeout",
            AgentError::ExecutionFailed { .. } => "execution_failed",
            AgentError::SessionBusy { .. } => "session_busy",
            AgentError::AllBackendsExhausted { .. } => "all_backends_exhausted",
            AgentError::UnknownDataset(_) => "unknown_dataset",
            AgentError::EmptyQuestion => "empty_question",
        }
    }

    pub fn backend(&self) -> Option<Backend> {
        match self {
            AgentError::GenerationTimeout { backend, .. }
            | AgentError::GenerationMalformed { backend, .. }
            | AgentError::ValidationRejected { backend, .. }
            | AgentError::ExecutionTimeout { backend, .. }
            | AgentError::ExecutionFailed { backend, .. } => Some(*backend),
            _ => None,
        }
    }

    /// Failures the router answers with its single retry on the other backend.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            AgentError::GenerationMalformed { .. }
                | AgentError::ValidationRejected { .. }
                | AgentError::ExecutionTimeout { .. }
                | AgentError::ExecutionFailed { .. }
        )
    }

    /// Structured form handed to callers for rendering.
    pub fn to_detail(&self) -> ErrorDetail {
        let attempts = match self {
            AgentError::AllBackendsExhausted { attempts } => {
                attempts.iter().map(AgentError::to_detail).collect()
            }
            _ => Vec::new(),
        };

        ErrorDetail {
            kind: self.kind(),
            backend: self.backend(),
            reason: match self {
                AgentError::ValidationRejected { reason, .. } => Some(reason.kind()),
                _ => None,
            },
            message: self.to_string(),
            attempts,
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::GenerationTimeout { backend, budget } => write!(
                f,
                "{} query generation timed out after {}ms",
                backend,
                budget.as_millis()
            ),
            AgentError::GenerationMalformed { backend, reason } => {
                write!(f, "{} query generation produced unusable output: {}", backend, reason)
            }
            AgentError::ValidationRejected { backend, reason } => {
                write!(f, "{} query rejected: {}", backend, reason)
            }
            AgentError::ExecutionTimeout { backend, budget } => write!(
                f,
                "{} query execution exceeded its {}ms budget",
                backend,
                budget.as_millis()
            ),
            AgentError::ExecutionFailed { backend, message } => {
                write!(f, "{} query execution failed: {}", backend, message)
            }
            AgentError::SessionBusy { session_id } => write!(
                f,
                "session {} already has a question in flight, retry once it completes",
                session_id
            ),
            AgentError::AllBackendsExhausted { attempts } => {
                write!(f, "all backends failed")?;
                for attempt in attempts {
                    write!(f, "; {}", attempt)?;
                }
                Ok(())
            }
            AgentError::UnknownDataset(name) => write!(f, "unknown dataset: {}", name),
            AgentError::EmptyQuestion => write!(f, "please provide a valid question"),
        }
    }
}

impl Error for AgentError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<ErrorDetail>,
}
