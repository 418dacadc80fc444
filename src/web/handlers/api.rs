use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::conversation::ConversationTurn;
use crate::agent::error::ErrorDetail;
use crate::agent::{AgentError, ChatAnswer, HealthStatus, SessionState};
use crate::db::registry::{RegistryError, SourceInfo, SourceKind};
use crate::web::state::AppState;

const UPLOAD_EXTENSIONS: &[&str] = &["csv", "parquet"];

#[derive(Debug, Deserialize, Clone)]
pub struct ChatRequest {
    pub session_id: String,
    pub question: String,
    #[serde(default)]
    pub dataset: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct SessionHistory {
    pub session_id: String,
    pub state: SessionState,
    pub turns: Vec<ConversationTurn>,
    pub last_failure: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub source_count: usize,
    pub session_count: usize,
    pub llm_provider: String,
    pub llm_model: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn status_for(error: &AgentError) -> StatusCode {
    match error {
        AgentError::SessionBusy { .. } => StatusCode::CONFLICT,
        AgentError::GenerationTimeout { .. } | AgentError::ExecutionTimeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        AgentError::UnknownDataset(_) | AgentError::EmptyQuestion => StatusCode::BAD_REQUEST,
        AgentError::AllBackendsExhausted { .. }
        | AgentError::GenerationMalformed { .. }
        | AgentError::ValidationRejected { .. }
        | AgentError::ExecutionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn api_error(error: AgentError) -> ApiError {
    (
        status_for(&error),
        Json(ErrorBody {
            error: error.to_detail(),
        }),
    )
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, ApiError> {
    debug!("Chat request for session {}: {}", payload.session_id, payload.question);

    let answer = state
        .agent
        .submit_question_to(&payload.session_id, payload.dataset.as_deref(), &payload.question)
        .await
        .map_err(|e| {
            warn!("Chat request failed: {}", e);
            api_error(e)
        })?;

    info!(
        "Answered session {} with the {} backend{}",
        answer.session_id,
        answer.backend_used,
        if answer.fallback_used { " after fallback" } else { "" }
    );
    Ok(Json(answer))
}

pub async fn session_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<SessionHistory> {
    Json(SessionHistory {
        state: state.agent.state(&session_id),
        turns: state.agent.history(&session_id),
        last_failure: state.agent.last_failure(&session_id),
        session_id,
    })
}

pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> StatusCode {
    if state.agent.reset_session(&session_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn list_sources(State(state): State<Arc<AppState>>) -> Json<Vec<SourceInfo>> {
    Json(state.registry().list_sources())
}

fn upload_error(status: StatusCode, kind: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: ErrorDetail {
                kind,
                backend: None,
                reason: None,
                message: message.into(),
                attempts: Vec::new(),
            },
        }),
    )
}

fn bad_upload(message: impl Into<String>) -> ApiError {
    upload_error(StatusCode::BAD_REQUEST, "bad_upload", message)
}

/// Last path component of a client-supplied file name, reduced to `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Dataset names must be plain SQL identifiers.
fn is_dataset_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn dataset_name_for(file_name: &str) -> String {
    let stem = file_name.split('.').next().unwrap_or_default();
    let name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if is_dataset_name(&name) {
        name
    } else {
        format!("t_{}", name)
    }
}

fn upload_status(error: &RegistryError) -> StatusCode {
    match error {
        RegistryError::Ingest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RegistryError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::UnknownSource(_) | RegistryError::UnsupportedBackend { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Saves a CSV or Parquet upload under `data_dir` and registers it, replacing
/// any dataset of the same name. Fields: `file`, optional `name` and `kind`.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SourceInfo>), ApiError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut name: Option<String> = None;
    let mut kind: Option<SourceKind> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| bad_upload(e.to_string()))? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .and_then(sanitize_file_name)
                    .ok_or_else(|| bad_upload("the file field needs a file name"))?;
                let bytes = field.bytes().await.map_err(|e| bad_upload(e.to_string()))?;
                file = Some((file_name, bytes));
            }
            "name" => {
                let text = field.text().await.map_err(|e| bad_upload(e.to_string()))?;
                name = Some(text.trim().to_string()).filter(|n| !n.is_empty());
            }
            "kind" => {
                let text = field.text().await.map_err(|e| bad_upload(e.to_string()))?;
                let value = serde_json::Value::String(text.trim().to_lowercase());
                kind = Some(
                    serde_json::from_value(value)
                        .map_err(|_| bad_upload(format!("unknown kind {}", text.trim())))?,
                );
            }
            other => debug!("Ignoring upload field {}", other),
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| bad_upload("missing file field"))?;
    let extension = file_name.rsplit('.').next().unwrap_or_default().to_lowercase();
    if !file_name.contains('.') || !UPLOAD_EXTENSIONS.contains(&extension.as_str()) {
        return Err(upload_error(
            StatusCode::BAD_REQUEST,
            "unsupported_file",
            format!("{} is not a CSV or Parquet file", file_name),
        ));
    }

    let name = name.unwrap_or_else(|| dataset_name_for(&file_name));
    if !is_dataset_name(&name) {
        return Err(bad_upload(format!("{} is not a valid dataset name", name)));
    }
    let kind = kind.unwrap_or(if extension == "csv" {
        SourceKind::Both
    } else {
        SourceKind::Structured
    });

    let dir = PathBuf::from(&state.config.data_dir);
    let path = dir.join(&file_name);
    let saved = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&path, &bytes).await
    };
    saved.await.map_err(|e| {
        warn!("Could not save upload {}: {}", path.display(), e);
        upload_error(StatusCode::INTERNAL_SERVER_ERROR, "upload_failed", e.to_string())
    })?;
    info!("Saved upload {} ({} bytes) as dataset {}", path.display(), bytes.len(), name);

    let agent = Arc::clone(&state.agent);
    let registered = tokio::task::spawn_blocking(move || agent.registry().register_file(&name, &path, kind))
        .await
        .map_err(|e| upload_error(StatusCode::INTERNAL_SERVER_ERROR, "upload_failed", e.to_string()))?;

    match registered {
        Ok(source) => Ok((StatusCode::CREATED, Json(source))),
        Err(e) => {
            warn!("Upload {} was not registered: {}", file_name, e);
            Err(upload_error(upload_status(&e), "upload_rejected", e.to_string()))
        }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthStatus>) {
    let health = state.agent.health().await;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        source_count: state.registry().list_sources().len(),
        session_count: state.agent.session_count(),
        llm_provider: state.config.llm.backend.clone(),
        llm_model: state.config.llm.model.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::error::RejectReason;
    use crate::agent::Backend;
    use std::time::Duration;

    #[test]
    fn upload_file_names_stay_inside_the_data_dir() {
        assert_eq!(sanitize_file_name("../../etc/sales.csv").as_deref(), Some("sales.csv"));
        assert_eq!(sanitize_file_name("C:\\tmp\\q1 sales.csv").as_deref(), Some("q1sales.csv"));
        assert_eq!(sanitize_file_name("..").as_deref(), None);
        assert_eq!(sanitize_file_name("").as_deref(), None);
    }

    #[test]
    fn derives_dataset_names_from_files() {
        assert_eq!(dataset_name_for("Q1-sales.csv"), "q1_sales");
        assert_eq!(dataset_name_for("2024.csv"), "t_2024");
        assert!(is_dataset_name("sales_2024"));
        assert!(!is_dataset_name("sales; drop"));
        assert!(!is_dataset_name(""));
    }

    #[test]
    fn maps_errors_to_status_codes() {
        assert_eq!(
            status_for(&AgentError::SessionBusy {
                session_id: "s".to_string()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&AgentError::ExecutionTimeout {
                backend: Backend::Structured,
                budget: Duration::from_secs(1)
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status_for(&AgentError::EmptyQuestion), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&AgentError::AllBackendsExhausted {
                attempts: vec![AgentError::ValidationRejected {
                    backend: Backend::Tabular,
                    reason: RejectReason::MutatingOperation("drop_columns".to_string()),
                }]
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
