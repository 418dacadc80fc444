use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agent::executor::{ExecutionLimits, QueryExecutor};
use crate::agent::generator::QueryGenerator;
use crate::agent::planner::{ChartPlan, VisualizationPlanner};
use crate::agent::result::{ExecutionResult, ResultSummary};
use crate::agent::router::{AgentRouter, RouteRequest, RoutingPolicy};
use crate::agent::validator::QueryValidator;
use crate::agent::{AgentError, Backend, Question};
use crate::config::AgentConfig;
use crate::db::registry::DataSourceRegistry;
use crate::llm::prompts::PromptTurn;
use crate::llm::{LlmError, LlmManager};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Generating,
    Validating,
    Executing,
    Visualizing,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Answered,
    AnsweredAfterFallback,
}

/// One completed question. Never modified after it is stored.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub question: Question,
    pub dataset: String,
    pub generated_query: String,
    pub backend_used: Backend,
    pub result_summary: ResultSummary,
    pub chart: ChartPlan,
    pub status: TurnStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub session_id: String,
    pub question: String,
    pub dataset: String,
    pub answer_text: String,
    pub result_summary: ResultSummary,
    pub chart: ChartPlan,
    pub backend_used: Backend,
    pub generated_query: String,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub registry_ready: bool,
    pub llm_reachable: bool,
    pub healthy: bool,
}

struct SessionSlot {
    state: SessionState,
    turns: VecDeque<ConversationTurn>,
    last_failure: Option<String>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            turns: VecDeque::new(),
            last_failure: None,
        }
    }
}

type SessionMap = HashMap<String, Arc<Mutex<SessionSlot>>>;

fn lock(slot: &Mutex<SessionSlot>) -> MutexGuard<'_, SessionSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_sessions(sessions: &Mutex<SessionMap>) -> MutexGuard<'_, SessionMap> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a session for one cycle and returns it to Idle when dropped,
/// including when the caller's future is cancelled. A session left with
/// no turns is removed from the map at that point.
///
/// Lock order is always the session map, then the slot.
struct CycleGuard {
    sessions: Arc<Mutex<SessionMap>>,
    session_id: String,
    slot: Arc<Mutex<SessionSlot>>,
}

impl CycleGuard {
    fn begin(sessions: &Arc<Mutex<SessionMap>>, session_id: &str) -> Result<Self, AgentError> {
        let mut map = lock_sessions(sessions);
        let slot = Arc::clone(
            map.entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SessionSlot::new()))),
        );

        {
            let mut guarded = lock(&slot);
            if !matches!(guarded.state, SessionState::Idle | SessionState::Failed) {
                return Err(AgentError::SessionBusy {
                    session_id: session_id.to_string(),
                });
            }
            guarded.state = SessionState::Generating;
        }

        Ok(Self {
            sessions: Arc::clone(sessions),
            session_id: session_id.to_string(),
            slot,
        })
    }

    fn set(&self, state: SessionState) {
        lock(&self.slot).state = state;
    }

    fn fail(&self, error: &AgentError) {
        let mut guarded = lock(&self.slot);
        guarded.state = SessionState::Failed;
        guarded.last_failure = Some(error.to_string());
    }

    fn complete(&self, turn: ConversationTurn, retention: usize) {
        let mut guarded = lock(&self.slot);
        guarded.turns.push_back(turn);
        while guarded.turns.len() > retention {
            guarded.turns.pop_front();
        }
        guarded.last_failure = None;
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        let mut sessions = lock_sessions(&self.sessions);
        let mut guarded = lock(&self.slot);
        guarded.state = SessionState::Idle;

        let current = sessions
            .get(&self.session_id)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot));
        if guarded.turns.is_empty() && current {
            drop(guarded);
            sessions.remove(&self.session_id);
            debug!("Evicted session {} with no turns", self.session_id);
        }
    }
}

/// Entry point for questions. Keeps per-session history and enforces one cycle per session.
pub struct ConversationManager {
    registry: Arc<DataSourceRegistry>,
    llm: Arc<LlmManager>,
    router: AgentRouter,
    planner: VisualizationPlanner,
    retention: usize,
    sessions: Arc<Mutex<SessionMap>>,
}

impl ConversationManager {
    pub fn new(
        registry: Arc<DataSourceRegistry>,
        llm: Arc<LlmManager>,
        config: &AgentConfig,
        generation_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let generator = QueryGenerator::new(Arc::clone(&llm), generation_timeout)?;
        let executor = QueryExecutor::new(
            Arc::clone(&registry),
            ExecutionLimits {
                row_cap: config.row_cap,
                timeout: Duration::from_millis(config.execution_timeout_ms),
            },
        );
        let router = AgentRouter::new(
            RoutingPolicy::new(&config.routing),
            generator,
            QueryValidator::new(config.max_result_rows),
            executor,
        );

        Ok(Self {
            registry,
            llm,
            router,
            planner: VisualizationPlanner::new(),
            retention: config.retention_turns,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn registry(&self) -> &Arc<DataSourceRegistry> {
        &self.registry
    }

    /// Asks a question against the default dataset.
    pub async fn submit_question(&self, session_id: &str, text: &str) -> Result<ChatAnswer, AgentError> {
        self.submit_question_to(session_id, None, text).await
    }

    pub async fn submit_question_to(
        &self,
        session_id: &str,
        dataset: Option<&str>,
        text: &str,
    ) -> Result<ChatAnswer, AgentError> {
        let question = Question::new(session_id, text);
        if question.text.is_empty() {
            return Err(AgentError::EmptyQuestion);
        }

        let source = match dataset {
            Some(name) => self.registry.source(name),
            None => self.registry.default_source(),
        }
        .ok_or_else(|| AgentError::UnknownDataset(dataset.unwrap_or("<none registered>").to_string()))?;

        let guard = CycleGuard::begin(&self.sessions, session_id)?;
        info!("Session {} asked about {}: {}", session_id, source.name, question.text);

        let history = self.prompt_history(&guard.slot);
        let request = RouteRequest {
            question: &question.text,
            schema: &source.schema,
            kind: source.kind,
            history,
        };
        let progress = |state: SessionState| guard.set(state);

        let outcome = match self.router.route(&request, &progress).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Session {} failed: {}", session_id, e);
                guard.fail(&e);
                return Err(e);
            }
        };

        guard.set(SessionState::Visualizing);
        let chart = self.planner.plan(&outcome.result, &question.text);
        let summary = outcome.result.summary();
        let generated_query = outcome.query.body.render();

        let answer = ChatAnswer {
            session_id: session_id.to_string(),
            question: question.text.clone(),
            dataset: source.name.clone(),
            answer_text: describe(&outcome.result, self.router.row_cap()),
            result_summary: summary.clone(),
            chart: chart.clone(),
            backend_used: outcome.backend,
            generated_query: generated_query.clone(),
            fallback_used: outcome.fallback_used,
        };

        guard.complete(
            ConversationTurn {
                question,
                dataset: source.name,
                generated_query,
                backend_used: outcome.backend,
                result_summary: summary,
                chart,
                status: if outcome.fallback_used {
                    TurnStatus::AnsweredAfterFallback
                } else {
                    TurnStatus::Answered
                },
            },
            self.retention,
        );
        debug!("Session {} stored turn, back to idle", session_id);

        Ok(answer)
    }

    /// Stored turns, oldest first.
    pub fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.existing(session_id)
            .map(|slot| lock(&slot).turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn state(&self, session_id: &str) -> SessionState {
        self.existing(session_id)
            .map(|slot| lock(&slot).state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn last_failure(&self, session_id: &str) -> Option<String> {
        self.existing(session_id).and_then(|slot| lock(&slot).last_failure.clone())
    }

    /// Forgets a session. Returns false if the session is not known.
    pub fn reset_session(&self, session_id: &str) -> bool {
        let mut sessions = lock_sessions(&self.sessions);
        let slot = match sessions.get(session_id) {
            Some(slot) => Arc::clone(slot),
            None => return false,
        };

        let mut guarded = lock(&slot);
        if guarded.state == SessionState::Idle {
            drop(guarded);
            sessions.remove(session_id);
        } else {
            // a running cycle keeps the slot; its guard evicts it if it stores nothing
            guarded.turns.clear();
            guarded.last_failure = None;
        }
        info!("Reset session {}", session_id);
        true
    }

    pub fn session_count(&self) -> usize {
        lock_sessions(&self.sessions).len()
    }

    pub async fn health(&self) -> HealthStatus {
        let registry = Arc::clone(&self.registry);
        let registry_ready = tokio::task::spawn_blocking(move || registry.is_ready())
            .await
            .unwrap_or(false);

        let llm_reachable = match tokio::time::timeout(PING_TIMEOUT, self.llm.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Language model {} unreachable: {}", self.llm.model_name(), e);
                false
            }
            Err(_) => {
                warn!("Language model {} ping timed out", self.llm.model_name());
                false
            }
        };

        HealthStatus {
            registry_ready,
            llm_reachable,
            healthy: registry_ready && llm_reachable,
        }
    }

    fn existing(&self, session_id: &str) -> Option<Arc<Mutex<SessionSlot>>> {
        lock_sessions(&self.sessions).get(session_id).cloned()
    }

    fn prompt_history(&self, slot: &Mutex<SessionSlot>) -> Vec<PromptTurn> {
        let guarded = lock(slot);
        let skip = guarded.turns.len().saturating_sub(self.retention);
        guarded
            .turns
            .iter()
            .skip(skip)
            .map(|turn| PromptTurn {
                question: turn.question.text.clone(),
                backend: turn.backend_used.to_string(),
                query: turn.generated_query.clone(),
            })
            .collect()
    }
}

/// Plain-language answer built only from the returned rows.
fn describe(result: &ExecutionResult, row_cap: usize) -> String {
    if result.row_count() == 0 {
        return "No rows matched the question.".to_string();
    }

    if let (Some(value), Some(column)) = (result.scalar(), result.columns().first()) {
        return format!("The result is {} ({}).", value, column.name);
    }

    let columns: Vec<&str> = result.columns().iter().map(|c| c.name.as_str()).collect();
    let mut text = format!(
        "Found {} row{} with columns {}.",
        result.row_count(),
        if result.row_count() == 1 { "" } else { "s" },
        columns.join(", ")
    );
    if result.truncated() {
        text.push_str(&format!(" Only the first {} rows are shown.", row_cap));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::result::{CellValue, ResultColumn};
    use crate::ingest::schema::DataType;

    fn result(rows: usize, cap: usize) -> ExecutionResult {
        ExecutionResult::new(
            vec![
                ResultColumn {
                    name: "region".to_string(),
                    data_type: DataType::String,
                },
                ResultColumn {
                    name: "revenue".to_string(),
                    data_type: DataType::Double,
                },
            ],
            (0..rows)
                .map(|i| vec![CellValue::Text(format!("r{}", i)), CellValue::Float(i as f64)])
                .collect(),
            cap,
            Duration::ZERO,
        )
    }

    #[test]
    fn describes_results_without_inventing_values() {
        assert_eq!(describe(&result(0, 10), 10), "No rows matched the question.");
        assert_eq!(describe(&result(3, 10), 10), "Found 3 rows with columns region, revenue.");
        assert_eq!(
            describe(&result(12, 10), 10),
            "Found 10 rows with columns region, revenue. Only the first 10 rows are shown."
        );

        let scalar = ExecutionResult::new(
            vec![ResultColumn {
                name: "avg_revenue".to_string(),
                data_type: DataType::Double,
            }],
            vec![vec![CellValue::Float(112.5)]],
            10,
            Duration::ZERO,
        );
        assert_eq!(describe(&scalar, 10), "The result is 112.5 (avg_revenue).");
    }

    fn turn() -> ConversationTurn {
        ConversationTurn {
            question: Question::new("s1", "How much revenue?"),
            dataset: "sales".to_string(),
            generated_query: "SELECT SUM(revenue) FROM sales".to_string(),
            backend_used: Backend::Structured,
            result_summary: result(1, 10).summary(),
            chart: ChartPlan::NoChart,
            status: TurnStatus::Answered,
        }
    }

    #[test]
    fn guard_rejects_a_second_cycle_and_resets_on_drop() {
        let sessions = Arc::new(Mutex::new(SessionMap::new()));

        let guard = CycleGuard::begin(&sessions, "s1").unwrap();
        guard.set(SessionState::Executing);
        assert!(matches!(
            CycleGuard::begin(&sessions, "s1"),
            Err(AgentError::SessionBusy { .. })
        ));

        guard.complete(turn(), 5);
        let slot = Arc::clone(&guard.slot);
        drop(guard);
        assert_eq!(lock(&slot).state, SessionState::Idle);
        assert!(CycleGuard::begin(&sessions, "s1").is_ok());
    }

    #[test]
    fn sessions_without_turns_are_evicted_on_drop() {
        let sessions = Arc::new(Mutex::new(SessionMap::new()));

        let guard = CycleGuard::begin(&sessions, "s1").unwrap();
        guard.fail(&AgentError::EmptyQuestion);
        assert_eq!(lock_sessions(&sessions).len(), 1);
        drop(guard);
        assert!(lock_sessions(&sessions).is_empty());

        let guard = CycleGuard::begin(&sessions, "s2").unwrap();
        guard.complete(turn(), 5);
        drop(guard);
        assert!(lock_sessions(&sessions).contains_key("s2"));
    }
}
