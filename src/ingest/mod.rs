// Dataset loading. Structured sources land in DuckDB through its own readers,
// tabular sources are parsed into polars frames.
pub mod csv;
pub mod parquet;
pub mod schema;

use duckdb::Connection;
use polars::prelude::DataFrame;
use std::error::Error;
use std::fmt;
use std::path::Path;

use crate::ingest::schema::{ColumnSchema, DataType, TableSchema};

#[derive(Debug)]
pub enum IngestError {
    IoError(std::io::Error),
    ParsingError(String),
    DatabaseError(String),
    UnsupportedFileType(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::IoError(err) => write!(f, "IO error: {}", err),
            IngestError::ParsingError(msg) => write!(f, "Parsing error: {}", msg),
            IngestError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            IngestError::UnsupportedFileType(ext) => write!(f, "Unsupported file type: {}", ext),
        }
    }
}

impl Error for IngestError {}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::IoError(err)
    }
}

impl From<duckdb::Error> for IngestError {
    fn from(err: duckdb::Error) -> Self {
        IngestError::DatabaseError(err.to_string())
    }
}

pub trait FileIngestor: Send + Sync {
    /// Loads `path` into `table_name` on the given connection, replacing any previous table.
    fn ingest(&self, conn: &Connection, path: &Path, table_name: &str) -> Result<TableSchema, IngestError>;
}

pub struct IngestManager {
    csv_ingestor: csv::CsvIngestor,
    parquet_ingestor: parquet::ParquetIngestor,
}

impl IngestManager {
    pub fn new() -> Self {
        Self {
            csv_ingestor: csv::CsvIngestor::new(),
            parquet_ingestor: parquet::ParquetIngestor::new(),
        }
    }

    pub fn ingest_file(&self, conn: &Connection, path: &Path, table_name: &str) -> Result<TableSchema, IngestError> {
        let extension = file_extension(path)?;

        match extension.as_str() {
            "csv" => self.csv_ingestor.ingest(conn, path, table_name),
            "parquet" => self.parquet_ingestor.ingest(conn, path, table_name),
            _ => Err(IngestError::UnsupportedFileType(extension)),
        }
    }

    /// Parses a file into an in-memory frame. Only CSV is supported for frames.
    pub fn load_frame(&self, path: &Path) -> Result<DataFrame, IngestError> {
        let extension = file_extension(path)?;

        match extension.as_str() {
            "csv" => self.csv_ingestor.load_frame(path),
            _ => Err(IngestError::UnsupportedFileType(extension)),
        }
    }
}

impl Default for IngestManager {
    fn default() -> Self {
        Self::new()
    }
}

fn file_extension(path: &Path) -> Result<String, IngestError> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .ok_or_else(|| IngestError::UnsupportedFileType("No extension".to_string()))
}

/// Double-quotes an identifier for DuckDB.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quotes a string literal for DuckDB.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Reads the column layout and row count of an existing DuckDB table.
pub fn describe_table(conn: &Connection, table_name: &str) -> Result<TableSchema, IngestError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_literal(table_name)))?;

    let column_iter = stmt.query_map([], |row| {
        // notnull is reported as bool or int depending on the DuckDB version
        let is_not_null = match row.get::<_, bool>(3) {
            Ok(value) => value,
            Err(_) => row.get::<_, i32>(3)? != 0,
        };

        Ok(ColumnSchema {
            name: row.get(1)?,
            data_type: DataType::from_duckdb(&row.get::<_, String>(2)?),
            nullable: !is_not_null,
        })
    })?;

    let columns = column_iter
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| IngestError::DatabaseError(e.to_string()))?;
    drop(stmt);

    if columns.is_empty() {
        return Err(IngestError::DatabaseError(format!(
            "Table {} does not exist or has no columns",
            table_name
        )));
    }

    let row_count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table_name)),
        [],
        |row| row.get(0),
    )?;

    tracing::debug!(
        "Described table {} with {} columns and {} rows",
        table_name,
        columns.len(),
        row_count
    );

    Ok(TableSchema {
        name: table_name.to_string(),
        columns,
        row_count: row_count.max(0) as u64,
    })
}
