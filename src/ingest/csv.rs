use std::path::Path;

use duckdb::Connection;
use polars::prelude::{DataFrame, LazyCsvReader, LazyFileListReader};
use tracing::info;

use crate::ingest::schema::TableSchema;
use crate::ingest::{describe_table, quote_ident, quote_literal, FileIngestor, IngestError};

pub struct CsvIngestor {
    sample_size: usize,
}

impl CsvIngestor {
    pub fn new() -> Self {
        Self {
            sample_size: 1000, // Default sample size for schema inference
        }
    }

    pub fn with_sample_size(sample_size: usize) -> Self {
        Self { sample_size }
    }

    /// Parses a CSV file into a frame. Column types, dates included, are inferred by polars.
    pub fn load_frame(&self, path: &Path) -> Result<DataFrame, IngestError> {
        let frame = LazyCsvReader::new(path)
            .with_has_header(true)
            .with_try_parse_dates(true)
            .with_infer_schema_length(Some(self.sample_size))
            .finish()
            .and_then(|plan| plan.collect())
            .map_err(|e| IngestError::ParsingError(format!("Failed to read CSV {}: {}", path.display(), e)))?;

        info!(
            "Loaded {} rows and {} columns from {}",
            frame.height(),
            frame.width(),
            path.display()
        );
        Ok(frame)
    }
}

impl Default for CsvIngestor {
    fn default() -> Self {
        Self::new()
    }
}

impl FileIngestor for CsvIngestor {
    fn ingest(&self, conn: &Connection, path: &Path, table_name: &str) -> Result<TableSchema, IngestError> {
        // Use DuckDB's schema inference capabilities
        conn.execute(
            &format!(
                "CREATE OR REPLACE TABLE {} AS SELECT * FROM read_csv_auto({}, SAMPLE_SIZE={})",
                quote_ident(table_name),
                quote_literal(&path.to_string_lossy()),
                self.sample_size
            ),
            [],
        )?;

        info!("Ingested CSV {} into table {}", path.display(), table_name);
        describe_table(conn, table_name)
    }
}
