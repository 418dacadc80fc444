use std::sync::Arc;

use crate::agent::ConversationManager;
use crate::config::AppConfig;
use crate::db::registry::DataSourceRegistry;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub agent: Arc<ConversationManager>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, agent: Arc<ConversationManager>) -> Self {
        Self {
            config,
            agent,
            startup_time: chrono::Utc::now(),
        }
    }

    pub fn registry(&self) -> &DataSourceRegistry {
        self.agent.registry()
    }
}
