use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::db::registry::SourceKind;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Path of the DuckDB file, or ":memory:".
    pub connection_string: String,
    pub pool_size: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "anthropic", "remote", or "ollama"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Keywords that pull a question toward one backend when a dataset supports both.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoutingConfig {
    pub structured_keywords: Vec<String>,
    pub tabular_keywords: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    /// Rows returned to the caller before truncation.
    pub row_cap: usize,
    /// Estimated cardinality above which the validator refuses a query.
    pub max_result_rows: u64,
    pub execution_timeout_ms: u64,
    /// Turns kept per session, also the amount of history sent to the model.
    pub retention_turns: usize,
    pub routing: RoutingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub json: bool,
    pub filter: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatasetConfig {
    pub name: String,
    /// CSV or Parquet file. Without a path the dataset must already be a table in the database.
    pub path: Option<String>,
    pub kind: SourceKind,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    pub data_dir: String,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory that relative dataset paths are resolved against
    #[arg(long)]
    pub data_dir: Option<String>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Defaults first so a partial file still deserializes
        let mut config_builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/sql-agent/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("SQL_AGENT")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            config.data_dir = data_dir.clone();
        }

        Ok(config)
    }

    /// Resolves a dataset path against `data_dir` unless it is absolute.
    pub fn dataset_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.data_dir).join(path)
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|w| w.to_string()).collect();

        Self {
            structured_keywords: words(&[
                "total", "sum", "average", "avg", "count", "how many", "group", "per", "by",
                "join", "top", "maximum", "minimum", "distinct",
            ]),
            tabular_keywords: words(&[
                "pivot", "reshape", "transform", "rolling", "cumulative", "percent change",
                "rank", "sample", "clean", "shift", "explode",
            ]),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            row_cap: 1000,
            max_result_rows: 1_000_000,
            execution_timeout_ms: 15_000,
            retention_turns: 1,
            routing: RoutingConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                connection_string: ":memory:".to_string(),
                pool_size: 5,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            llm: LlmConfig {
                backend: "anthropic".to_string(),
                model: "claude-3-haiku-20240307".to_string(),
                api_key: None,
                api_url: None,
                timeout_ms: 30_000,
                temperature: 0.0,
                max_tokens: 2000,
            },
            agent: AgentConfig::default(),
            logging: LoggingConfig::default(),
            datasets: Vec::new(),
            data_dir: "data".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_args() -> CliArgs {
        CliArgs {
            config: Some(PathBuf::from("/nonexistent/sql-agent.toml")),
            host: None,
            port: None,
            data_dir: None,
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.agent.row_cap, 1000);
        assert_eq!(config.agent.retention_turns, 1);
        assert_eq!(config.llm.backend, "anthropic");
        assert!(config.datasets.is_empty());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(AppConfig::new(&no_args()).is_err());
    }

    #[test]
    fn cli_overrides_win() {
        let args = CliArgs {
            config: None,
            host: Some("0.0.0.0".to_string()),
            port: Some(8088),
            data_dir: Some("/srv/data".to_string()),
        };
        let config = AppConfig::new(&args).unwrap();

        assert_eq!(config.web.host, "0.0.0.0");
        assert_eq!(config.web.port, 8088);
        assert_eq!(config.dataset_path("sales.csv"), PathBuf::from("/srv/data/sales.csv"));
        assert_eq!(config.dataset_path("/tmp/x.csv"), PathBuf::from("/tmp/x.csv"));
    }
}
