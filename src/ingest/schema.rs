use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    BigInt,
    Double,
    String,
    Boolean,
    Date,
    Timestamp,
    Unknown(String),
}

impl DataType {
    pub fn to_sql_type(&self) -> String {
        match self {
            DataType::Integer => "INTEGER".to_string(),
            DataType::BigInt => "BIGINT".to_string(),
            DataType::Double => "DOUBLE".to_string(),
            DataType::String => "VARCHAR".to_string(),
            DataType::Boolean => "BOOLEAN".to_string(),
            DataType::Date => "DATE".to_string(),
            DataType::Timestamp => "TIMESTAMP".to_string(),
            DataType::Unknown(t) => t.clone(),
        }
    }

    /// Maps a DuckDB type name as reported by `PRAGMA table_info`.
    pub fn from_duckdb(type_name: &str) -> Self {
        let lowered = type_name.to_lowercase();
        match lowered.as_str() {
            "integer" | "int" | "int4" | "smallint" | "tinyint" | "usmallint" | "utinyint" => {
                DataType::Integer
            }
            "bigint" | "int8" | "hugeint" | "uinteger" | "ubigint" => DataType::BigInt,
            "double" | "float" | "real" | "float8" => DataType::Double,
            "varchar" | "text" | "string" => DataType::String,
            "boolean" | "bool" => DataType::Boolean,
            "date" => DataType::Date,
            "timestamp" | "datetime" | "timestamp with time zone" | "timestamptz" => {
                DataType::Timestamp
            }
            other if other.starts_with("decimal") => DataType::Double,
            other => DataType::Unknown(other.to_string()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::BigInt | DataType::Double)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Integer | DataType::BigInt)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn to_sql_definition(&self) -> String {
        let nullable_str = if self.nullable { "" } else { " NOT NULL" };
        format!(
            "\"{}\" {}{}",
            self.name,
            self.data_type.to_sql_type(),
            nullable_str
        )
    }
}

/// Immutable snapshot of one registered dataset, taken at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub row_count: u64,
}

impl TableSchema {
    pub fn to_create_table_sql(&self) -> String {
        let columns_sql: Vec<String> = self
            .columns
            .iter()
            .map(|col| col.to_sql_definition())
            .collect();

        format!(
            "CREATE TABLE \"{}\" (\n    {}\n);",
            self.name,
            columns_sql.join(",\n    ")
        )
    }

    // DDL string used as LLM context
    pub fn to_ddl(&self) -> String {
        self.to_create_table_sql()
    }

    /// Case-insensitive lookup, matching how DuckDB resolves identifiers.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Exact lookup, matching how polars resolves column names.
    pub fn column_exact(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_duckdb_type_names() {
        assert_eq!(DataType::from_duckdb("VARCHAR"), DataType::String);
        assert_eq!(DataType::from_duckdb("HUGEINT"), DataType::BigInt);
        assert_eq!(DataType::from_duckdb("DECIMAL(18,3)"), DataType::Double);
        assert_eq!(
            DataType::from_duckdb("INTERVAL"),
            DataType::Unknown("interval".to_string())
        );
    }

    #[test]
    fn renders_ddl_with_quoted_columns() {
        let schema = TableSchema {
            name: "sales".to_string(),
            columns: vec![
                ColumnSchema {
                    name: "region".to_string(),
                    data_type: DataType::String,
                    nullable: true,
                },
                ColumnSchema {
                    name: "revenue".to_string(),
                    data_type: DataType::Double,
                    nullable: false,
                },
            ],
            row_count: 3,
        };

        let ddl = schema.to_ddl();
        assert!(ddl.starts_with("CREATE TABLE \"sales\""));
        assert!(ddl.contains("\"revenue\" DOUBLE NOT NULL"));
        assert!(schema.column("REGION").is_some());
        assert!(schema.column_exact("REGION").is_none());
    }
}
