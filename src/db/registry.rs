use polars::prelude::{DataFrame, DataType as FrameType};
use r2d2::{Pool, PooledConnection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::db::db_pool::DuckDBConnectionManager;
use crate::ingest::schema::{ColumnSchema, DataType, TableSchema};
use crate::ingest::{describe_table, IngestError, IngestManager};

/// The two execution strategies a question can be answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Structured,
    Tabular,
}

impl Backend {
    pub fn other(self) -> Backend {
        match self {
            Backend::Structured => Backend::Tabular,
            Backend::Tabular => Backend::Structured,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Structured => write!(f, "structured"),
            Backend::Tabular => write!(f, "tabular"),
        }
    }
}

/// How a dataset was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Structured,
    Tabular,
    Both,
}

impl SourceKind {
    pub fn supports(self, backend: Backend) -> bool {
        matches!(
            (self, backend),
            (SourceKind::Both, _)
                | (SourceKind::Structured, Backend::Structured)
                | (SourceKind::Tabular, Backend::Tabular)
        )
    }

    fn with(self, backend: Backend) -> SourceKind {
        if self.supports(backend) {
            self
        } else {
            SourceKind::Both
        }
    }
}

impl From<Backend> for SourceKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Structured => SourceKind::Structured,
            Backend::Tabular => SourceKind::Tabular,
        }
    }
}

#[derive(Debug)]
pub enum RegistryError {
    UnknownSource(String),
    UnsupportedBackend { source: String, backend: Backend },
    Pool(String),
    Ingest(IngestError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownSource(name) => write!(f, "Unknown data source: {}", name),
            RegistryError::UnsupportedBackend { source, backend } => {
                write!(f, "Data source {} is not registered for the {} backend", source, backend)
            }
            RegistryError::Pool(msg) => write!(f, "Connection pool error: {}", msg),
            RegistryError::Ingest(err) => write!(f, "Ingest error: {}", err),
        }
    }
}

impl Error for RegistryError {}

impl From<IngestError> for RegistryError {
    fn from(err: IngestError) -> Self {
        RegistryError::Ingest(err)
    }
}

impl From<r2d2::Error> for RegistryError {
    fn from(err: r2d2::Error) -> Self {
        RegistryError::Pool(err.to_string())
    }
}

/// Public description of a registered dataset.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub kind: SourceKind,
    pub schema: TableSchema,
}

/// Scoped access to a dataset for a single execution. Dropping it releases the
/// pooled connection or the frame reference.
pub enum DataHandle {
    Structured(PooledConnection<DuckDBConnectionManager>),
    Tabular(DataFrame),
}

struct DataSource {
    kind: SourceKind,
    schema: Arc<TableSchema>,
    frame: Option<DataFrame>,
}

/// Read-only catalogue of datasets shared by every session.
pub struct DataSourceRegistry {
    pool: Pool<DuckDBConnectionManager>,
    ingest: IngestManager,
    sources: RwLock<HashMap<String, Arc<DataSource>>>,
}

impl DataSourceRegistry {
    pub fn new(pool: Pool<DuckDBConnectionManager>) -> Self {
        Self {
            pool,
            ingest: IngestManager::new(),
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Pooled connection on the shared DuckDB instance.
    pub fn connection(&self) -> Result<PooledConnection<DuckDBConnectionManager>, RegistryError> {
        Ok(self.pool.get()?)
    }

    /// Loads a CSV or Parquet file and registers it under `name`, replacing
    /// whatever was registered under that name before.
    pub fn register_file(&self, name: &str, path: &Path, kind: SourceKind) -> Result<SourceInfo, RegistryError> {
        info!("Registering {} from {} as {:?}", name, path.display(), kind);

        // parse the frame before the DuckDB table is replaced
        let (schema, frame) = match kind {
            SourceKind::Structured => (self.ingest_table(name, path)?, None),
            SourceKind::Tabular => {
                let frame = self.ingest.load_frame(path)?;
                (frame_schema(name, &frame), Some(frame))
            }
            SourceKind::Both => {
                let frame = self.ingest.load_frame(path)?;
                (self.ingest_table(name, path)?, Some(frame))
            }
        };

        let source = Arc::new(DataSource {
            kind,
            schema: Arc::new(schema),
            frame,
        });
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        if sources.insert(name.to_string(), Arc::clone(&source)).is_some() {
            info!("Replaced data source {}", name);
        }

        Ok(describe(name, &source))
    }

    fn ingest_table(&self, name: &str, path: &Path) -> Result<TableSchema, RegistryError> {
        let conn = self.connection()?;
        Ok(self.ingest.ingest_file(&conn, path, name)?)
    }

    /// Registers a table that already exists in the DuckDB database.
    pub fn register_table(&self, name: &str) -> Result<SourceInfo, RegistryError> {
        let schema = {
            let conn = self.connection()?;
            describe_table(&conn, name)?
        };

        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        let (kind, frame) = match sources.get(name) {
            Some(existing) if existing.frame.is_some() => {
                (existing.kind.with(Backend::Structured), existing.frame.clone())
            }
            _ => (SourceKind::Structured, None),
        };

        let source = Arc::new(DataSource {
            kind,
            schema: Arc::new(schema),
            frame,
        });
        sources.insert(name.to_string(), Arc::clone(&source));
        debug!("Registered table {} ({:?})", name, kind);

        Ok(describe(name, &source))
    }

    /// Registers an in-memory frame. If `name` is already a structured source
    /// the two are merged and the DuckDB schema snapshot is kept.
    pub fn register_frame(&self, name: &str, frame: DataFrame) -> Result<SourceInfo, RegistryError> {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);

        let (kind, schema) = match sources.get(name) {
            Some(existing) if existing.kind.supports(Backend::Structured) => (
                existing.kind.with(Backend::Tabular),
                Arc::clone(&existing.schema),
            ),
            _ => (SourceKind::Tabular, Arc::new(frame_schema(name, &frame))),
        };

        let source = Arc::new(DataSource {
            kind,
            schema,
            frame: Some(frame),
        });
        sources.insert(name.to_string(), Arc::clone(&source));
        debug!("Registered frame {} ({:?})", name, kind);

        Ok(describe(name, &source))
    }

    pub fn list_sources(&self) -> Vec<SourceInfo> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        let mut listed: Vec<SourceInfo> = sources
            .iter()
            .map(|(name, source)| describe(name, source))
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        listed
    }

    pub fn source(&self, name: &str) -> Option<SourceInfo> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        sources.get(name).map(|source| describe(name, source))
    }

    /// The alphabetically first dataset, used when a question names none.
    pub fn default_source(&self) -> Option<SourceInfo> {
        self.list_sources().into_iter().next()
    }

    pub fn schema(&self, name: &str) -> Option<Arc<TableSchema>> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        sources.get(name).map(|source| Arc::clone(&source.schema))
    }

    pub fn acquire_handle(&self, name: &str, backend: Backend) -> Result<DataHandle, RegistryError> {
        let source = {
            let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
            sources
                .get(name)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownSource(name.to_string()))?
        };

        if !source.kind.supports(backend) {
            return Err(RegistryError::UnsupportedBackend {
                source: name.to_string(),
                backend,
            });
        }

        match backend {
            Backend::Structured => Ok(DataHandle::Structured(self.connection()?)),
            Backend::Tabular => source
                .frame
                .clone()
                .map(DataHandle::Tabular)
                .ok_or_else(|| RegistryError::UnsupportedBackend {
                    source: name.to_string(),
                    backend,
                }),
        }
    }

    /// Readiness: at least one dataset is registered and the pool hands out a live connection.
    pub fn is_ready(&self) -> bool {
        let has_sources = !self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();

        has_sources
            && self
                .pool
                .get()
                .map(|conn| conn.execute("SELECT 1", []).is_ok())
                .unwrap_or(false)
    }
}

fn describe(name: &str, source: &DataSource) -> SourceInfo {
    SourceInfo {
        name: name.to_string(),
        kind: source.kind,
        schema: source.schema.as_ref().clone(),
    }
}

/// Schema snapshot of a frame registered without a DuckDB counterpart.
pub fn frame_schema(name: &str, frame: &DataFrame) -> TableSchema {
    let columns = frame
        .get_columns()
        .iter()
        .map(|series| ColumnSchema {
            name: series.name().to_string(),
            data_type: frame_type(series.dtype()),
            nullable: series.null_count() > 0,
        })
        .collect();

    TableSchema {
        name: name.to_string(),
        columns,
        row_count: frame.height() as u64,
    }
}

pub(crate) fn frame_type(dtype: &FrameType) -> DataType {
    if dtype.is_float() {
        return DataType::Double;
    }
    if dtype.is_numeric() {
        return DataType::BigInt;
    }

    match dtype {
        FrameType::Boolean => DataType::Boolean,
        FrameType::String => DataType::String,
        other => {
            let name = other.to_string();
            if name == "date" {
                DataType::Date
            } else if name.starts_with("datetime") {
                DataType::Timestamp
            } else {
                DataType::Unknown(name)
            }
        }
    }
}
