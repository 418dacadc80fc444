pub mod conversation;
pub mod error;
pub mod executor;
pub mod generator;
pub mod planner;
pub mod result;
pub mod router;
pub mod tabular;
pub mod validator;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use crate::db::registry::{Backend, SourceKind};
pub use conversation::{ChatAnswer, ConversationManager, HealthStatus, SessionState};
pub use error::{AgentError, RejectReason};
pub use planner::{ChartKind, ChartPlan, ChartSpec};
pub use result::{ExecutionResult, ResultSummary};
pub use tabular::TabularOp;

/// A question as submitted by a caller.
#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub text: String,
    pub session_id: String,
    pub asked_at: DateTime<Utc>,
}

impl Question {
    pub fn new(session_id: &str, text: &str) -> Self {
        Self {
            text: text.trim().to_string(),
            session_id: session_id.to_string(),
            asked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum QueryBody {
    Sql(String),
    Ops(Vec<TabularOp>),
}

impl QueryBody {
    /// Text form shown to callers and replayed as prompt history.
    pub fn render(&self) -> String {
        match self {
            QueryBody::Sql(sql) => sql.clone(),
            QueryBody::Ops(ops) => tabular::render_pipeline(ops),
        }
    }
}

/// Untrusted query text produced by a generator, consumed once by the validator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateQuery {
    pub backend: Backend,
    pub body: QueryBody,
    /// How well-formed the model response was, in [0, 1].
    pub confidence: f32,
}
