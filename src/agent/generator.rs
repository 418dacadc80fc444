use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agent::tabular::{self, TabularOp};
use crate::agent::{AgentError, Backend, CandidateQuery, QueryBody};
use crate::ingest::schema::TableSchema;
use crate::llm::prompts::{
    PromptBuilder, PromptColumn, PromptInput, PromptTurn, STRUCTURED_SYSTEM, STRUCTURED_TEMPLATE,
    TABULAR_SYSTEM, TABULAR_TEMPLATE,
};
use crate::llm::{LlmError, LlmManager};

const SQL_DIALECT: &str = "duckdb";

// Leading keywords that mark a line as SQL. Mutating verbs are included so
// the validator sees them instead of a silently dropped statement.
const SQL_KEYWORDS: [&str; 8] = ["SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP"];

pub struct GenerationRequest<'a> {
    pub question: &'a str,
    pub schema: &'a TableSchema,
    pub history: Vec<PromptTurn>,
    pub row_cap: usize,
}

/// Turns a question into an untrusted candidate query. Never touches data.
pub struct QueryGenerator {
    llm: Arc<LlmManager>,
    prompts: PromptBuilder,
    timeout: Duration,
}

impl QueryGenerator {
    pub fn new(llm: Arc<LlmManager>, timeout: Duration) -> Result<Self, LlmError> {
        Ok(Self {
            llm,
            prompts: PromptBuilder::new()?,
            timeout,
        })
    }

    pub async fn generate(
        &self,
        backend: Backend,
        request: &GenerationRequest<'_>,
    ) -> Result<CandidateQuery, AgentError> {
        let (template, system) = match backend {
            Backend::Structured => (STRUCTURED_TEMPLATE, STRUCTURED_SYSTEM),
            Backend::Tabular => (TABULAR_TEMPLATE, TABULAR_SYSTEM),
        };

        let prompt = self
            .prompts
            .render(template, &prompt_input(backend, request))
            .map_err(|e| AgentError::GenerationMalformed {
                backend,
                reason: e.to_string(),
            })?;
        debug!("Rendered {} prompt ({} chars)", backend, prompt.len());

        let context = self.llm.context(system);
        let response = match tokio::time::timeout(self.timeout, self.llm.generate(&prompt, &context)).await {
            Err(_) => {
                warn!("{} generation timed out after {:?}", backend, self.timeout);
                return Err(AgentError::GenerationTimeout {
                    backend,
                    budget: self.timeout,
                });
            }
            Ok(Err(e)) => {
                warn!("{} generation failed: {}", backend, e);
                return Err(AgentError::GenerationMalformed {
                    backend,
                    reason: e.to_string(),
                });
            }
            Ok(Ok(response)) => response,
        };

        let candidate = match backend {
            Backend::Structured => extract_sql(&response).map(|(sql, confidence)| CandidateQuery {
                backend,
                body: QueryBody::Sql(sql),
                confidence,
            }),
            Backend::Tabular => extract_ops(&response).map(|(ops, confidence)| CandidateQuery {
                backend,
                body: QueryBody::Ops(ops),
                confidence,
            }),
        }
        .map_err(|reason| AgentError::GenerationMalformed { backend, reason })?;

        info!(
            "Generated {} candidate with confidence {:.1}",
            backend, candidate.confidence
        );
        debug!("Candidate: {}", candidate.body.render());
        Ok(candidate)
    }
}

fn prompt_input(backend: Backend, request: &GenerationRequest<'_>) -> PromptInput {
    PromptInput {
        question: request.question.to_string(),
        table: request.schema.name.clone(),
        row_count: request.schema.row_count,
        top_k: request.row_cap,
        dialect: SQL_DIALECT.to_string(),
        ddl: request.schema.to_ddl(),
        columns: request
            .schema
            .columns
            .iter()
            .map(|c| PromptColumn {
                name: c.name.clone(),
                data_type: c.data_type.to_sql_type(),
            })
            .collect(),
        allowed_ops: match backend {
            Backend::Structured => Vec::new(),
            Backend::Tabular => tabular::allowed_ops(),
        },
        history: request.history.clone(),
    }
}

/// Pulls SQL out of a model response, scoring how cleanly it was delimited.
pub fn extract_sql(content: &str) -> Result<(String, f32), String> {
    if let Some(start) = content.find("```sql") {
        let after = &content[start + 6..];
        if let Some(end) = after.find("```") {
            let sql = after[..end].trim();
            if !sql.is_empty() {
                debug!("Extracted SQL from sql code block");
                return Ok((sql.to_string(), 1.0));
            }
        }
    }

    if let Some(block) = fenced_block(content) {
        if !block.is_empty() {
            debug!("Extracted SQL from plain code block");
            return Ok((block.to_string(), 0.9));
        }
    }

    let lines: Vec<&str> = content.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim().to_uppercase();
        if !SQL_KEYWORDS.iter().any(|kw| trimmed.starts_with(kw)) {
            continue;
        }

        let mut sql = line.trim().to_string();
        if !sql.ends_with(';') {
            for next_line in lines.iter().skip(i + 1).map(|l| l.trim()) {
                if next_line.starts_with("```") || next_line.is_empty() {
                    break;
                }
                sql.push(' ');
                sql.push_str(next_line);
                if next_line.ends_with(';') {
                    break;
                }
            }
        }

        debug!("Extracted SQL using line scanning");
        return Ok((sql, 0.7));
    }

    let raw = content.trim().trim_matches('`').trim();
    if raw.is_empty() {
        return Err("response contained no SQL".to_string());
    }
    debug!("No SQL markers found, using the raw response");
    Ok((raw.to_string(), 0.4))
}

#[derive(Deserialize)]
struct WrappedPipeline {
    ops: Vec<TabularOp>,
}

/// Pulls an op pipeline out of a model response.
pub fn extract_ops(content: &str) -> Result<(Vec<TabularOp>, f32), String> {
    if let Some(start) = content.find("```json") {
        let after = &content[start + 7..];
        if let Some(end) = after.find("```") {
            return parse_pipeline(after[..end].trim()).map(|ops| (ops, 1.0));
        }
    }

    if let Some(block) = fenced_block(content) {
        return parse_pipeline(block).map(|ops| (ops, 0.9));
    }

    let bare = match (content.find('['), content.rfind(']')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => match (content.find('{'), content.rfind('}')) {
            (Some(start), Some(end)) if start < end => &content[start..=end],
            _ => return Err("response contained no operation pipeline".to_string()),
        },
    };
    parse_pipeline(bare).map(|ops| (ops, 0.6))
}

fn parse_pipeline(text: &str) -> Result<Vec<TabularOp>, String> {
    let ops = if text.starts_with('{') {
        serde_json::from_str::<WrappedPipeline>(text).map(|p| p.ops)
    } else {
        serde_json::from_str::<Vec<TabularOp>>(text)
    }
    .map_err(|e| format!("invalid operation pipeline: {}", e))?;

    if ops.is_empty() {
        return Err("operation pipeline is empty".to_string());
    }
    Ok(ops)
}

// Body of the first ``` block, minus a one-word language tag.
fn fenced_block(content: &str) -> Option<&str> {
    let start = content.find("```")?;
    let after = &content[start + 3..];
    let end = after.find("```")?;
    let block = &after[..end];

    let block = match block.split_once('\n') {
        Some((tag, rest))
            if !tag.trim().is_empty()
                && tag.trim().chars().all(|c| c.is_ascii_alphanumeric())
                && !SQL_KEYWORDS.contains(&tag.trim().to_uppercase().as_str()) =>
        {
            rest
        }
        _ => block,
    };
    Some(block.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::schema::{ColumnSchema, DataType};
    use crate::llm::{LanguageModel, PromptContext};
    use async_trait::async_trait;

    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn generate(&self, _prompt: &str, _context: &PromptContext) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("SELECT 1".to_string())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn generate(&self, _prompt: &str, _context: &PromptContext) -> Result<String, LlmError> {
            Err(LlmError::ConnectionError("connection refused".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn schema() -> TableSchema {
        TableSchema {
            name: "sales".to_string(),
            columns: vec![ColumnSchema {
                name: "revenue".to_string(),
                data_type: DataType::Double,
                nullable: true,
            }],
            row_count: 10,
        }
    }

    #[test]
    fn prefers_sql_code_blocks() {
        let response = "Here you go:\n```sql\nSELECT region FROM sales\n```\nand ```other```";
        assert_eq!(
            extract_sql(response).unwrap(),
            ("SELECT region FROM sales".to_string(), 1.0)
        );
    }

    #[test]
    fn strips_language_tag_from_plain_blocks() {
        let (sql, confidence) = extract_sql("```duckdb\nSELECT 1\n```").unwrap();
        assert_eq!(sql, "SELECT 1");
        assert_eq!(confidence, 0.9);

        let (sql, _) = extract_sql("```\nSELECT 2\n```").unwrap();
        assert_eq!(sql, "SELECT 2");
    }

    #[test]
    fn scans_lines_and_keeps_mutating_statements() {
        let (sql, confidence) = extract_sql("Sure.\nDELETE FROM sales\nWHERE 1=1;\nDone").unwrap();
        assert_eq!(sql, "DELETE FROM sales WHERE 1=1;");
        assert_eq!(confidence, 0.7);
    }

    #[test]
    fn raw_text_scores_lowest_and_empty_is_malformed() {
        assert_eq!(extract_sql("sales please").unwrap().1, 0.4);
        assert!(extract_sql("   ").is_err());
    }

    #[test]
    fn extracts_fenced_and_bare_pipelines() {
        let (ops, confidence) = extract_ops("```json\n[{\"op\": \"limit\", \"n\": 3}]\n```").unwrap();
        assert_eq!(ops, vec![TabularOp::Limit { n: 3 }]);
        assert_eq!(confidence, 1.0);

        let (ops, confidence) = extract_ops("ops: {\"ops\": [{\"op\": \"limit\", \"n\": 1}]}").unwrap();
        assert_eq!(ops.len(), 1);
        assert!(confidence < 1.0);
    }

    #[test]
    fn unknown_ops_are_malformed() {
        assert!(extract_ops("[{\"op\": \"exec\", \"code\": \"rm -rf\"}]").is_err());
        assert!(extract_ops("[]").is_err());
        assert!(extract_ops("no json here").is_err());
    }

    #[tokio::test]
    async fn times_out_slow_models() {
        let llm = Arc::new(LlmManager::with_model(Box::new(SlowModel)));
        let generator = QueryGenerator::new(llm, Duration::from_millis(20)).unwrap();
        let schema = schema();
        let request = GenerationRequest {
            question: "total revenue",
            schema: &schema,
            history: Vec::new(),
            row_cap: 100,
        };

        let err = generator.generate(Backend::Structured, &request).await.unwrap_err();
        assert!(matches!(err, AgentError::GenerationTimeout { backend: Backend::Structured, .. }));
    }

    #[tokio::test]
    async fn provider_errors_are_malformed_generations() {
        let llm = Arc::new(LlmManager::with_model(Box::new(FailingModel)));
        let generator = QueryGenerator::new(llm, Duration::from_secs(1)).unwrap();
        let schema = schema();
        let request = GenerationRequest {
            question: "total revenue",
            schema: &schema,
            history: Vec::new(),
            row_cap: 100,
        };

        match generator.generate(Backend::Tabular, &request).await.unwrap_err() {
            AgentError::GenerationMalformed { backend, reason } => {
                assert_eq!(backend, Backend::Tabular);
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
