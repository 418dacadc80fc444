use duckdb::Connection;
use r2d2::ManageConnection;
use std::sync::{Mutex, PoisonError};

/// Hands out connections that all share one DuckDB database instance.
///
/// Every pooled connection is a clone of a root connection, so an in-memory
/// database is visible to the whole pool, not only to the connection that
/// created it.
pub struct DuckDBConnectionManager {
    root: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: &str) -> Result<Self, duckdb::Error> {
        let root = if connection_string.is_empty() || connection_string == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(connection_string)?
        };

        Ok(Self {
            root: Mutex::new(root),
        })
    }

    pub fn in_memory() -> Result<Self, duckdb::Error> {
        Self::new(":memory:")
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        root.try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
