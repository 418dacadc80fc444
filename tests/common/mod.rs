#![allow(dead_code)]

use async_trait::async_trait;
use polars::df;
use polars::prelude::DataFrame;
use r2d2::Pool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sql_agent::agent::{ConversationManager, SourceKind};
use sql_agent::config::AgentConfig;
use sql_agent::db::db_pool::DuckDBConnectionManager;
use sql_agent::db::registry::DataSourceRegistry;
use sql_agent::llm::{LanguageModel, LlmError, LlmManager, PromptContext};

pub const GROUPED_SQL: &str =
    "```sql\nSELECT region, SUM(revenue) AS revenue FROM sales GROUP BY region ORDER BY region\n```";
pub const AVERAGE_SQL: &str = "```sql\nSELECT AVG(revenue) AS avg_revenue FROM sales\n```";
pub const GROUPED_OPS: &str = r#"```json
[
  {"op": "group_by", "by": ["region"], "aggregations": [{"column": "revenue", "func": "sum"}]},
  {"op": "sort", "by": ["region"]}
]
```"#;

/// Plays back canned model responses in order and records every prompt it saw.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    stall: Option<(usize, Duration)>,
}

impl ScriptedModel {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            prompts: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
            stall: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleeps for `duration` on the given 1-based call only.
    pub fn stall_on_call(mut self, call: usize, duration: Duration) -> Self {
        self.stall = Some((call, duration));
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str, _context: &PromptContext) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().unwrap().push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((stalled, duration)) = self.stall {
            if stalled == call {
                tokio::time::sleep(duration).await;
            }
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::ResponseError("script exhausted".to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn call_count(calls: &Arc<AtomicUsize>) -> usize {
    calls.load(Ordering::SeqCst)
}

pub fn empty_registry() -> Arc<DataSourceRegistry> {
    let pool = Pool::builder()
        .max_size(4)
        .build(DuckDBConnectionManager::in_memory().unwrap())
        .unwrap();
    Arc::new(DataSourceRegistry::new(pool))
}

pub fn sales_frame() -> DataFrame {
    df!(
        "region" => ["east", "east", "east", "north", "north", "south", "west", "west", "west"],
        "revenue" => [100.0, 150.0, 250.0, 80.0, 20.0, 300.0, 50.0, 75.0, 125.0]
    )
    .unwrap()
}

/// The `sales` dataset, loaded into DuckDB and/or as a frame depending on `kind`.
pub fn sales_registry(kind: SourceKind) -> Arc<DataSourceRegistry> {
    let registry = empty_registry();

    if kind != SourceKind::Tabular {
        let conn = registry.connection().unwrap();
        conn.execute_batch(
            "CREATE TABLE sales (region VARCHAR, revenue DOUBLE);
             INSERT INTO sales VALUES
               ('east', 100.0), ('east', 150.0), ('east', 250.0),
               ('north', 80.0), ('north', 20.0),
               ('south', 300.0),
               ('west', 50.0), ('west', 75.0), ('west', 125.0);",
        )
        .unwrap();
        drop(conn);
        registry.register_table("sales").unwrap();
    }

    if kind != SourceKind::Structured {
        registry.register_frame("sales", sales_frame()).unwrap();
    }

    registry
}

pub fn manager_with(
    registry: Arc<DataSourceRegistry>,
    model: ScriptedModel,
    config: &AgentConfig,
) -> ConversationManager {
    manager_with_budget(registry, model, config, Duration::from_secs(5))
}

pub fn manager_with_budget(
    registry: Arc<DataSourceRegistry>,
    model: ScriptedModel,
    config: &AgentConfig,
    generation_timeout: Duration,
) -> ConversationManager {
    let llm = Arc::new(LlmManager::with_model(Box::new(model)));
    ConversationManager::new(registry, llm, config, generation_timeout).unwrap()
}

pub fn manager(registry: Arc<DataSourceRegistry>, model: ScriptedModel) -> ConversationManager {
    manager_with(registry, model, &AgentConfig::default())
}
