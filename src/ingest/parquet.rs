use std::path::Path;

use duckdb::Connection;
use tracing::info;

use crate::ingest::schema::TableSchema;
use crate::ingest::{describe_table, quote_ident, quote_literal, FileIngestor, IngestError};

pub struct ParquetIngestor {}

impl ParquetIngestor {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for ParquetIngestor {
    fn default() -> Self {
        Self::new()
    }
}

impl FileIngestor for ParquetIngestor {
    fn ingest(&self, conn: &Connection, path: &Path, table_name: &str) -> Result<TableSchema, IngestError> {
        conn.execute(
            &format!(
                "CREATE OR REPLACE TABLE {} AS SELECT * FROM read_parquet({})",
                quote_ident(table_name),
                quote_literal(&path.to_string_lossy())
            ),
            [],
        )?;

        info!("Ingested Parquet {} into table {}", path.display(), table_name);
        describe_table(conn, table_name)
    }
}
