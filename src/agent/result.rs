use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::ingest::schema::DataType;

/// Rows kept in a summary preview.
pub const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(x) => write!(f, "{}", (x * 10_000.0).round() / 10_000.0),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultColumn {
    pub name: String,
    pub data_type: DataType,
}

/// Typed output of one execution. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    columns: Vec<ResultColumn>,
    rows: Vec<Vec<CellValue>>,
    row_count: usize,
    truncated: bool,
    elapsed: Duration,
}

impl ExecutionResult {
    /// Builds a result from everything the backend returned, keeping at most `row_cap` rows.
    pub fn new(
        columns: Vec<ResultColumn>,
        mut rows: Vec<Vec<CellValue>>,
        row_cap: usize,
        elapsed: Duration,
    ) -> Self {
        let truncated = rows.len() > row_cap;
        rows.truncate(row_cap);

        Self {
            columns,
            row_count: rows.len(),
            rows,
            truncated,
            elapsed,
        }
    }

    pub fn columns(&self) -> &[ResultColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The single value of a one-row, one-column result.
    pub fn scalar(&self) -> Option<&CellValue> {
        match (self.columns.len(), self.rows.as_slice()) {
            (1, [row]) => row.first(),
            _ => None,
        }
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            columns: self.columns.clone(),
            row_count: self.row_count,
            truncated: self.truncated,
            preview: self.rows.iter().take(PREVIEW_ROWS).cloned().collect(),
            elapsed_ms: self.elapsed.as_millis() as u64,
        }
    }
}

/// What a turn stores and what callers receive in place of the full result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub columns: Vec<ResultColumn>,
    pub row_count: usize,
    pub truncated: bool,
    pub preview: Vec<Vec<CellValue>>,
    pub elapsed_ms: u64,
}

impl ResultSummary {
    /// Column names and types only, without values or timing.
    pub fn shape(&self) -> (Vec<(String, DataType)>, usize, bool) {
        (
            self.columns
                .iter()
                .map(|c| (c.name.clone(), c.data_type.clone()))
                .collect(),
            self.row_count,
            self.truncated,
        )
    }
}
