use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType as ArrowType, Float64Type, Int64Type};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use duckdb::{Connection, InterruptHandle};
use polars::prelude::{AnyValue, DataFrame, IdxSize, IntoLazy};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::result::{CellValue, ExecutionResult, ResultColumn};
use crate::agent::tabular::TabularOp;
use crate::agent::validator::ValidatedQuery;
use crate::agent::{AgentError, Backend, QueryBody};
use crate::db::registry::{frame_type, DataHandle, DataSourceRegistry};
use crate::ingest::schema::DataType;

// How long to wait for an interrupted statement, per interrupt sent.
const INTERRUPT_GRACE: Duration = Duration::from_millis(50);
const INTERRUPT_ATTEMPTS: usize = 40;

type Outcome = Result<ExecutionResult, String>;

/// Lets the async side stop a statement running on the blocking thread.
#[derive(Default)]
struct Interrupt {
    cancelled: bool,
    handle: Option<Arc<InterruptHandle>>,
}

/// Bounds applied to every execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub row_cap: usize,
    pub timeout: Duration,
}

/// Runs validated queries on a blocking thread under a wall-clock budget.
pub struct QueryExecutor {
    registry: Arc<DataSourceRegistry>,
    limits: ExecutionLimits,
}

impl QueryExecutor {
    pub fn new(registry: Arc<DataSourceRegistry>, limits: ExecutionLimits) -> Self {
        Self { registry, limits }
    }

    pub fn limits(&self) -> ExecutionLimits {
        self.limits
    }

    pub async fn execute(&self, query: ValidatedQuery) -> Result<ExecutionResult, AgentError> {
        let backend = query.backend();
        let registry = Arc::clone(&self.registry);
        let row_cap = self.limits.row_cap;
        let interrupt = Arc::new(Mutex::new(Interrupt::default()));

        // The handle lives inside the blocking task and is released when it returns.
        let mut task = tokio::task::spawn_blocking({
            let interrupt = Arc::clone(&interrupt);
            move || run(&registry, &query, row_cap, &interrupt)
        });

        let finished = tokio::time::timeout(self.limits.timeout, &mut task).await;
        match finished {
            Err(_) => {
                warn!("{} execution exceeded {:?}", backend, self.limits.timeout);
                if backend == Backend::Structured {
                    stop(&interrupt, task).await;
                }
                Err(AgentError::ExecutionTimeout {
                    backend,
                    budget: self.limits.timeout,
                })
            }
            Ok(Err(join_error)) => Err(AgentError::ExecutionFailed {
                backend,
                message: join_error.to_string(),
            }),
            Ok(Ok(Err(message))) => {
                warn!("{} execution failed: {}", backend, message);
                Err(AgentError::ExecutionFailed { backend, message })
            }
            Ok(Ok(Ok(result))) => {
                info!(
                    "{} query returned {} rows{} in {}ms",
                    backend,
                    result.row_count(),
                    if result.truncated() { " (truncated)" } else { "" },
                    result.elapsed().as_millis()
                );
                Ok(result)
            }
        }
    }
}

/// Interrupts the running statement and waits for the task to give its
/// connection back to the pool. An interrupt sent before the statement
/// starts can be missed, so it is repeated.
async fn stop(interrupt: &Mutex<Interrupt>, mut task: JoinHandle<Outcome>) {
    for _ in 0..INTERRUPT_ATTEMPTS {
        {
            let mut state = interrupt.lock().unwrap_or_else(PoisonError::into_inner);
            state.cancelled = true;
            if let Some(handle) = &state.handle {
                handle.interrupt();
            }
        }

        if tokio::time::timeout(INTERRUPT_GRACE, &mut task).await.is_ok() {
            debug!("Interrupted statement released its connection");
            return;
        }
    }

    warn!(
        "Statement ignored {} interrupts; its connection returns to the pool when it finishes",
        INTERRUPT_ATTEMPTS
    );
}

fn run(registry: &DataSourceRegistry, query: &ValidatedQuery, row_cap: usize, interrupt: &Mutex<Interrupt>) -> Outcome {
    let started = Instant::now();
    let handle = registry
        .acquire_handle(query.dataset(), query.backend())
        .map_err(|e| e.to_string())?;

    match (handle, query.body()) {
        (DataHandle::Structured(conn), QueryBody::Sql(sql)) => {
            {
                let mut state = interrupt.lock().unwrap_or_else(PoisonError::into_inner);
                if state.cancelled {
                    return Err("cancelled before the statement started".to_string());
                }
                state.handle = Some(conn.interrupt_handle());
            }
            run_sql(&conn, sql, row_cap, started)
        }
        (DataHandle::Tabular(frame), QueryBody::Ops(ops)) => run_ops(frame, ops, row_cap, started),
        _ => Err(format!("query body does not match the {} backend", query.backend())),
    }
}

/// Wraps the statement so DuckDB never materialises more than `row_cap + 1` rows.
pub fn bounded_sql(sql: &str, row_cap: usize) -> String {
    let inner = sql.trim().trim_end_matches(';').trim_end();
    format!("SELECT * FROM ({}) AS bounded_result LIMIT {}", inner, row_cap.saturating_add(1))
}

fn run_sql(conn: &Connection, sql: &str, row_cap: usize, started: Instant) -> Outcome {
    let bounded = bounded_sql(sql, row_cap);
    debug!("Executing: {}", bounded);

    let mut stmt = conn.prepare(&bounded).map_err(|e| format!("SQL error: {}", e))?;
    let arrow = stmt.query_arrow([]).map_err(|e| format!("SQL error: {}", e))?;
    let schema = arrow.get_schema();
    let batches: Vec<RecordBatch> = arrow.collect();

    let columns: Vec<ResultColumn> = schema
        .fields()
        .iter()
        .map(|field| ResultColumn {
            name: field.name().clone(),
            data_type: arrow_type(field.data_type()),
        })
        .collect();

    let mut rows = Vec::new();
    for batch in &batches {
        let cells = batch
            .columns()
            .iter()
            .zip(&columns)
            .map(|(array, column)| arrow_cells(array, &column.data_type))
            .collect::<Result<Vec<_>, _>>()?;

        for i in 0..batch.num_rows() {
            rows.push(cells.iter().map(|column| column[i].clone()).collect());
        }
    }

    Ok(ExecutionResult::new(columns, rows, row_cap, started.elapsed()))
}

fn arrow_type(data_type: &ArrowType) -> DataType {
    match data_type {
        ArrowType::Int8 | ArrowType::Int16 | ArrowType::Int32 | ArrowType::UInt8 | ArrowType::UInt16 => {
            DataType::Integer
        }
        ArrowType::Int64 | ArrowType::UInt32 | ArrowType::UInt64 => DataType::BigInt,
        ArrowType::Float16
        | ArrowType::Float32
        | ArrowType::Float64
        | ArrowType::Decimal128(_, _)
        | ArrowType::Decimal256(_, _) => DataType::Double,
        ArrowType::Utf8 | ArrowType::LargeUtf8 => DataType::String,
        ArrowType::Boolean => DataType::Boolean,
        ArrowType::Date32 | ArrowType::Date64 => DataType::Date,
        ArrowType::Timestamp(_, _) => DataType::Timestamp,
        other => DataType::Unknown(other.to_string()),
    }
}

fn arrow_cells(array: &ArrayRef, data_type: &DataType) -> Result<Vec<CellValue>, String> {
    let len = array.len();

    let cells = match data_type {
        DataType::Integer | DataType::BigInt => {
            let ints = cast(array, &ArrowType::Int64).map_err(|e| e.to_string())?;
            let ints = ints.as_primitive::<Int64Type>();
            (0..len)
                .map(|i| if ints.is_null(i) { CellValue::Null } else { CellValue::Int(ints.value(i)) })
                .collect()
        }
        DataType::Double => {
            let floats = cast(array, &ArrowType::Float64).map_err(|e| e.to_string())?;
            let floats = floats.as_primitive::<Float64Type>();
            (0..len)
                .map(|i| if floats.is_null(i) { CellValue::Null } else { CellValue::Float(floats.value(i)) })
                .collect()
        }
        DataType::Boolean => {
            let bools = array.as_boolean();
            (0..len)
                .map(|i| if bools.is_null(i) { CellValue::Null } else { CellValue::Bool(bools.value(i)) })
                .collect()
        }
        _ => (0..len)
            .map(|i| {
                if array.is_null(i) {
                    Ok(CellValue::Null)
                } else {
                    array_value_to_string(array, i)
                        .map(CellValue::Text)
                        .map_err(|e| e.to_string())
                }
            })
            .collect::<Result<Vec<_>, String>>()?,
    };

    Ok(cells)
}

fn run_ops(frame: DataFrame, ops: &[TabularOp], row_cap: usize, started: Instant) -> Outcome {
    let mut plan = frame.lazy();
    for op in ops {
        plan = op.apply(plan).map_err(|e| e.to_string())?;
    }

    let output = plan
        .limit(IdxSize::try_from(row_cap.saturating_add(1)).unwrap_or(IdxSize::MAX))
        .collect()
        .map_err(|e| format!("Dataframe error: {}", e))?;

    let series = output.get_columns();
    let columns = series
        .iter()
        .map(|s| ResultColumn {
            name: s.name().to_string(),
            data_type: frame_type(s.dtype()),
        })
        .collect();

    let mut rows = Vec::with_capacity(output.height());
    for i in 0..output.height() {
        let row = series
            .iter()
            .map(|s| s.get(i).map(frame_cell).map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }

    Ok(ExecutionResult::new(columns, rows, row_cap, started.elapsed()))
}

fn frame_cell(value: AnyValue<'_>) -> CellValue {
    match value {
        AnyValue::Null => CellValue::Null,
        AnyValue::Boolean(b) => CellValue::Bool(b),
        AnyValue::Int8(v) => CellValue::Int(v as i64),
        AnyValue::Int16(v) => CellValue::Int(v as i64),
        AnyValue::Int32(v) => CellValue::Int(v as i64),
        AnyValue::Int64(v) => CellValue::Int(v),
        AnyValue::UInt8(v) => CellValue::Int(v as i64),
        AnyValue::UInt16(v) => CellValue::Int(v as i64),
        AnyValue::UInt32(v) => CellValue::Int(v as i64),
        AnyValue::UInt64(v) => CellValue::Int(v as i64),
        AnyValue::Float32(v) => CellValue::Float(v as f64),
        AnyValue::Float64(v) => CellValue::Float(v),
        AnyValue::String(s) => CellValue::Text(s.to_string()),
        other => CellValue::Text(other.to_string()),
    }
}
