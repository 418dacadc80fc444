use clap::Parser;
use r2d2::Pool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use sql_agent::agent::{ConversationManager, SourceKind};
use sql_agent::config::{AppConfig, CliArgs, LoggingConfig};
use sql_agent::db::db_pool::DuckDBConnectionManager;
use sql_agent::db::registry::DataSourceRegistry;
use sql_agent::llm::LlmManager;
use sql_agent::util::logging::init_tracing;
use sql_agent::web;
use sql_agent::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_tracing(&config.logging);

    info!("Initializing DuckDB connection pool on {}", config.database.connection_string);
    let db_manager = DuckDBConnectionManager::new(&config.database.connection_string)?;
    let pool = Pool::builder()
        .max_size(config.database.pool_size)
        .build(db_manager)?;
    let registry = Arc::new(DataSourceRegistry::new(pool));

    // Register configured datasets, carrying on past bad entries
    for dataset in &config.datasets {
        let registered = match &dataset.path {
            Some(path) => registry.register_file(&dataset.name, &config.dataset_path(path), dataset.kind),
            None => {
                if dataset.kind != SourceKind::Structured {
                    warn!("Dataset {} has no path, registering it as an existing table only", dataset.name);
                }
                registry.register_table(&dataset.name)
            }
        };

        match registered {
            Ok(source) => info!(
                "Registered dataset {} ({:?}, {} rows, {} columns)",
                source.name,
                source.kind,
                source.schema.row_count,
                source.schema.columns.len()
            ),
            Err(e) => error!("Failed to register dataset {}: {}", dataset.name, e),
        }
    }

    if registry.list_sources().is_empty() {
        warn!("No datasets registered, the health check will report not ready");
    }

    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm = Arc::new(LlmManager::new(&config.llm)?);

    let agent = Arc::new(ConversationManager::new(
        registry,
        llm,
        &config.agent,
        Duration::from_millis(config.llm.timeout_ms),
    )?);
    let app_state = Arc::new(AppState::new(config.clone(), agent));

    info!("Starting sql-agent on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
