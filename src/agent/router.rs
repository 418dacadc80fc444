use tracing::{debug, info, warn};

use crate::agent::conversation::SessionState;
use crate::agent::executor::QueryExecutor;
use crate::agent::generator::{GenerationRequest, QueryGenerator};
use crate::agent::result::ExecutionResult;
use crate::agent::validator::QueryValidator;
use crate::agent::{AgentError, Backend, CandidateQuery, SourceKind};
use crate::config::RoutingConfig;
use crate::ingest::schema::TableSchema;
use crate::llm::prompts::PromptTurn;
use crate::util::keywords::KeywordMatcher;

/// Keyword heuristic for datasets registered under both backends.
pub struct RoutingPolicy {
    structured: KeywordMatcher,
    tabular: KeywordMatcher,
}

impl RoutingPolicy {
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            structured: KeywordMatcher::new(&config.structured_keywords),
            tabular: KeywordMatcher::new(&config.tabular_keywords),
        }
    }

    pub fn choose(&self, kind: SourceKind, question: &str) -> Backend {
        match kind {
            SourceKind::Structured => Backend::Structured,
            SourceKind::Tabular => Backend::Tabular,
            SourceKind::Both => {
                let structured = self.structured.count(question);
                let tabular = self.tabular.count(question);
                debug!("Routing scores: structured={} tabular={}", structured, tabular);
                if tabular > structured {
                    Backend::Tabular
                } else {
                    Backend::Structured
                }
            }
        }
    }
}

/// A question that made it through generation, validation and execution.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub backend: Backend,
    pub query: CandidateQuery,
    pub result: ExecutionResult,
    pub fallback_used: bool,
}

pub struct RouteRequest<'a> {
    pub question: &'a str,
    pub schema: &'a TableSchema,
    pub kind: SourceKind,
    pub history: Vec<PromptTurn>,
}

pub struct AgentRouter {
    policy: RoutingPolicy,
    generator: QueryGenerator,
    validator: QueryValidator,
    executor: QueryExecutor,
}

impl AgentRouter {
    pub fn new(
        policy: RoutingPolicy,
        generator: QueryGenerator,
        validator: QueryValidator,
        executor: QueryExecutor,
    ) -> Self {
        Self {
            policy,
            generator,
            validator,
            executor,
        }
    }

    pub fn row_cap(&self) -> usize {
        self.executor.limits().row_cap
    }

    /// Runs the cycle on the chosen backend and, for recoverable failures,
    /// once more on the other backend if the dataset supports it. Once the
    /// second attempt has run, any failure reports both attempts.
    pub async fn route(
        &self,
        request: &RouteRequest<'_>,
        progress: &(dyn Fn(SessionState) + Sync),
    ) -> Result<RouteOutcome, AgentError> {
        let primary = self.policy.choose(request.kind, request.question);
        info!("Routing question to the {} backend", primary);

        let first = match self.attempt(primary, request, progress).await {
            Ok((query, result)) => {
                return Ok(RouteOutcome {
                    backend: primary,
                    query,
                    result,
                    fallback_used: false,
                });
            }
            Err(e) if !e.triggers_fallback() => return Err(e),
            Err(e) => e,
        };

        let secondary = primary.other();
        if !request.kind.supports(secondary) {
            warn!("{} failed and {} has no {} backend: {}", primary, request.schema.name, secondary, first);
            return Err(AgentError::AllBackendsExhausted { attempts: vec![first] });
        }

        info!("{} failed ({}), falling back to {}", primary, first.kind(), secondary);
        match self.attempt(secondary, request, progress).await {
            Ok((query, result)) => Ok(RouteOutcome {
                backend: secondary,
                query,
                result,
                fallback_used: true,
            }),
            Err(second) => {
                warn!("{} fallback failed too: {}", secondary, second);
                Err(AgentError::AllBackendsExhausted {
                    attempts: vec![first, second],
                })
            }
        }
    }

    async fn attempt(
        &self,
        backend: Backend,
        request: &RouteRequest<'_>,
        progress: &(dyn Fn(SessionState) + Sync),
    ) -> Result<(CandidateQuery, ExecutionResult), AgentError> {
        progress(SessionState::Generating);
        let generation = GenerationRequest {
            question: request.question,
            schema: request.schema,
            history: request.history.clone(),
            row_cap: self.row_cap(),
        };
        let candidate = self.generator.generate(backend, &generation).await?;

        progress(SessionState::Validating);
        let validated = self
            .validator
            .approve(candidate, request.schema)
            .map_err(|reason| AgentError::ValidationRejected { backend, reason })?;

        progress(SessionState::Executing);
        let query = validated.candidate().clone();
        let result = self.executor.execute(validated).await?;
        Ok((query, result))
    }
}
