use minijinja::Environment;
use serde::Serialize;

use crate::llm::LlmError;

pub const STRUCTURED_TEMPLATE: &str = "structured_sql.txt";
pub const TABULAR_TEMPLATE: &str = "tabular_ops.txt";

pub const STRUCTURED_SYSTEM: &str = "You are an agent that writes read-only SQL queries against a single analytical table. \
ONLY respond with the query in the requested format. Do not explain, apologise or add conversation. \
DO NOT make up data or use prior knowledge.";

pub const TABULAR_SYSTEM: &str = "You are an agent that answers questions about an in-memory table by emitting a JSON pipeline of dataframe operations. \
ONLY respond with the pipeline in the requested format. Do not explain, apologise or add conversation. \
Never emit operations that modify the table.";

const STRUCTURED_SQL: &str = r#"### Instructions:
Your task is to convert a question into a single read-only SQL query for {{ dialect }}, given a table definition.
Adhere to these rules:
- **Use the exact spelling of column names as provided in the schema**
- **Deliberately go through the question and the schema word by word** to appropriately answer the question
- Only query the table "{{ table }}"
- Never modify data: no INSERT, UPDATE, DELETE, DROP, CREATE or ALTER statements
- Never select all columns, only the columns relevant to the question
- Unless the question asks for a specific number of results, return at most {{ top_k }} rows
- When creating a ratio, always cast the numerator as float
{% if history %}
### Earlier in this conversation:
{% for turn in history %}
Question: {{ turn.question }}
Answered with the {{ turn.backend }} backend using: {{ turn.query }}
{% endfor %}
{% endif %}
### Input:
Generate a SQL query that answers the question `{{ question }}`.
The table has {{ row_count }} rows and this definition:

{{ ddl }}

### Response:
Return only the SQL query inside a ```sql code block.
"#;

const TABULAR_OPS: &str = r#"### Instructions:
Your task is to answer a question about the in-memory table "{{ table }}" with a pipeline of dataframe operations.
The pipeline is a JSON array of objects. Each object has an "op" field and runs on the output of the previous one.
Allowed operations:
{% for op in allowed_ops %}- {{ op }}
{% endfor %}
Adhere to these rules:
- Column names are case sensitive, use them exactly as listed
- Never modify the table
- Unless the question asks for a specific number of results, end with a limit of at most {{ top_k }} rows
{% if history %}
### Earlier in this conversation:
{% for turn in history %}
Question: {{ turn.question }}
Answered with the {{ turn.backend }} backend using: {{ turn.query }}
{% endfor %}
{% endif %}
### Input:
Question: `{{ question }}`
The table has {{ row_count }} rows and these columns: {{ columns | json }}

### Response:
Return only the JSON array inside a ```json code block.
"#;

#[derive(Debug, Serialize)]
pub struct PromptColumn {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptTurn {
    pub question: String,
    pub backend: String,
    pub query: String,
}

/// Everything a generation template can refer to.
#[derive(Debug, Serialize)]
pub struct PromptInput {
    pub question: String,
    pub table: String,
    pub row_count: u64,
    pub top_k: usize,
    pub dialect: String,
    pub ddl: String,
    pub columns: Vec<PromptColumn>,
    pub allowed_ops: Vec<String>,
    pub history: Vec<PromptTurn>,
}

pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, LlmError> {
        let mut env = Environment::new();

        env.add_filter("json", |value: minijinja::value::Value| {
            serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())
        });

        for (name, source) in [(STRUCTURED_TEMPLATE, STRUCTURED_SQL), (TABULAR_TEMPLATE, TABULAR_OPS)] {
            env.add_template(name, source)
                .map_err(|e| LlmError::ConfigError(format!("Invalid prompt template {}: {}", name, e)))?;
        }

        Ok(Self { env })
    }

    pub fn render(&self, template_name: &str, input: &PromptInput) -> Result<String, LlmError> {
        let template = self
            .env
            .get_template(template_name)
            .map_err(|e| LlmError::ConfigError(format!("Template not found: {} ({})", template_name, e)))?;

        template
            .render(input)
            .map_err(|e| LlmError::ConfigError(format!("Template render error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> PromptInput {
        PromptInput {
            question: "Show me total revenue by region".to_string(),
            table: "sales".to_string(),
            row_count: 4,
            top_k: 1000,
            dialect: "duckdb".to_string(),
            ddl: "CREATE TABLE \"sales\" (\"region\" VARCHAR, \"revenue\" DOUBLE);".to_string(),
            columns: vec![PromptColumn {
                name: "region".to_string(),
                data_type: "VARCHAR".to_string(),
            }],
            allowed_ops: vec!["{\"op\": \"limit\", \"n\": 10}".to_string()],
            history: vec![PromptTurn {
                question: "How many regions are there?".to_string(),
                backend: "structured".to_string(),
                query: "SELECT COUNT(DISTINCT region) FROM sales".to_string(),
            }],
        }
    }

    #[test]
    fn renders_structured_prompt_with_history() {
        let builder = PromptBuilder::new().unwrap();
        let prompt = builder.render(STRUCTURED_TEMPLATE, &input()).unwrap();

        assert!(prompt.contains("`Show me total revenue by region`"));
        assert!(prompt.contains("CREATE TABLE \"sales\""));
        assert!(prompt.contains("How many regions are there?"));
        assert!(prompt.contains("at most 1000 rows"));
    }

    #[test]
    fn renders_tabular_prompt_with_json_columns() {
        let builder = PromptBuilder::new().unwrap();
        let prompt = builder.render(TABULAR_TEMPLATE, &input()).unwrap();

        assert!(prompt.contains("\"data_type\":\"VARCHAR\""));
        assert!(prompt.contains("- {\"op\": \"limit\", \"n\": 10}"));
    }
}
