use polars::prelude::{col, lit, Expr, IdxSize, LazyFrame, SortMultipleOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One step of a dataframe pipeline emitted by the tabular generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TabularOp {
    Select {
        columns: Vec<String>,
    },
    Filter {
        column: String,
        cmp: Comparison,
        #[serde(default)]
        value: Value,
    },
    GroupBy {
        by: Vec<String>,
        aggregations: Vec<Aggregation>,
    },
    Aggregate {
        aggregations: Vec<Aggregation>,
    },
    Sort {
        by: Vec<String>,
        #[serde(default)]
        descending: bool,
    },
    Limit {
        n: usize,
    },
    // Mutating ops are parsed so the validator can name them, never executed.
    DropColumns {
        columns: Vec<String>,
    },
    DeleteRows {
        column: String,
        cmp: Comparison,
        #[serde(default)]
        value: Value,
    },
    Assign {
        column: String,
        #[serde(default)]
        value: Value,
    },
    InsertRows {
        rows: Vec<Map<String, Value>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[serde(alias = "==", alias = "=")]
    Eq,
    #[serde(alias = "!=", alias = "<>")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Ge,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Le,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Sum,
    #[serde(alias = "avg", alias = "average")]
    Mean,
    Min,
    Max,
    Count,
    NUnique,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub column: String,
    pub func: AggFunc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Aggregation {
    /// Name of the column this aggregation produces.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }

    fn to_expr(&self) -> Expr {
        let base = col(&self.column);
        let expr = match self.func {
            AggFunc::Sum => base.sum(),
            AggFunc::Mean => base.mean(),
            AggFunc::Min => base.min(),
            AggFunc::Max => base.max(),
            AggFunc::Count => base.count(),
            AggFunc::NUnique => base.n_unique(),
        };
        expr.alias(self.output_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularError(pub String);

impl fmt::Display for TabularError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TabularError {}

impl TabularOp {
    pub fn name(&self) -> &'static str {
        match self {
            TabularOp::Select { .. } => "select",
            TabularOp::Filter { .. } => "filter",
            TabularOp::GroupBy { .. } => "group_by",
            TabularOp::Aggregate { .. } => "aggregate",
            TabularOp::Sort { .. } => "sort",
            TabularOp::Limit { .. } => "limit",
            TabularOp::DropColumns { .. } => "drop_columns",
            TabularOp::DeleteRows { .. } => "delete_rows",
            TabularOp::Assign { .. } => "assign",
            TabularOp::InsertRows { .. } => "insert_rows",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            TabularOp::DropColumns { .. }
                | TabularOp::DeleteRows { .. }
                | TabularOp::Assign { .. }
                | TabularOp::InsertRows { .. }
        )
    }

    /// Appends this op to a lazy plan. Mutating ops are refused.
    pub fn apply(&self, frame: LazyFrame) -> Result<LazyFrame, TabularError> {
        match self {
            TabularOp::Select { columns } => Ok(frame.select(columns.iter().map(|c| col(c)).collect::<Vec<_>>())),
            TabularOp::Filter { column, cmp, value } => Ok(frame.filter(predicate(column, *cmp, value)?)),
            TabularOp::GroupBy { by, aggregations } => Ok(frame
                .group_by_stable(by.iter().map(|c| col(c)).collect::<Vec<_>>())
                .agg(aggregations.iter().map(Aggregation::to_expr).collect::<Vec<_>>())),
            TabularOp::Aggregate { aggregations } => {
                Ok(frame.select(aggregations.iter().map(Aggregation::to_expr).collect::<Vec<_>>()))
            }
            TabularOp::Sort { by, descending } => Ok(frame.sort_by_exprs(
                by.iter().map(|c| col(c)).collect::<Vec<_>>(),
                SortMultipleOptions::default().with_order_descending(*descending),
            )),
            TabularOp::Limit { n } => IdxSize::try_from(*n)
                .map(|n| frame.limit(n))
                .map_err(|_| TabularError(format!("limit {} is out of range", n))),
            other => Err(TabularError(format!("{} modifies the table", other.name()))),
        }
    }
}

fn predicate(column: &str, cmp: Comparison, value: &Value) -> Result<Expr, TabularError> {
    let target = col(column);

    Ok(match cmp {
        Comparison::IsNull => target.is_null(),
        Comparison::NotNull => target.is_not_null(),
        Comparison::Eq => target.eq(literal(value)?),
        Comparison::Ne => target.neq(literal(value)?),
        Comparison::Gt => target.gt(literal(value)?),
        Comparison::Ge => target.gt_eq(literal(value)?),
        Comparison::Lt => target.lt(literal(value)?),
        Comparison::Le => target.lt_eq(literal(value)?),
    })
}

fn literal(value: &Value) -> Result<Expr, TabularError> {
    match value {
        Value::Bool(b) => Ok(lit(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(lit(i)),
            None => n
                .as_f64()
                .map(lit)
                .ok_or_else(|| TabularError(format!("unsupported number {}", n))),
        },
        Value::String(s) => Ok(lit(s.clone())),
        other => Err(TabularError(format!("unsupported comparison value {}", other))),
    }
}

/// Pipeline text shown to callers and fed back into prompts as history.
pub fn render_pipeline(ops: &[TabularOp]) -> String {
    serde_json::to_string(ops).unwrap_or_default()
}

/// The op vocabulary offered to the model.
pub fn allowed_ops() -> Vec<String> {
    [
        r#"{"op": "select", "columns": ["<column>", ...]}"#,
        r#"{"op": "filter", "column": "<column>", "cmp": "eq|ne|gt|ge|lt|le|is_null|not_null", "value": <literal>}"#,
        r#"{"op": "group_by", "by": ["<column>", ...], "aggregations": [{"column": "<column>", "func": "sum|mean|min|max|count|n_unique", "alias": "<name>"}]}"#,
        r#"{"op": "aggregate", "aggregations": [{"column": "<column>", "func": "sum|mean|min|max|count|n_unique", "alias": "<name>"}]}"#,
        r#"{"op": "sort", "by": ["<column>", ...], "descending": true|false}"#,
        r#"{"op": "limit", "n": <positive integer>}"#,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;
    use polars::prelude::IntoLazy;

    fn sales() -> polars::prelude::DataFrame {
        df!(
            "region" => &["east", "west", "east", "north"],
            "revenue" => &[100.0, 250.0, 50.0, 75.0],
            "units" => &[1i64, 5, 2, 3]
        )
        .unwrap()
    }

    fn run(ops: &[TabularOp]) -> polars::prelude::DataFrame {
        let mut frame = sales().lazy();
        for op in ops {
            frame = op.apply(frame).unwrap();
        }
        frame.collect().unwrap()
    }

    #[test]
    fn parses_pipeline_with_aliases() {
        let ops: Vec<TabularOp> = serde_json::from_str(
            r#"[
                {"op": "filter", "column": "units", "cmp": ">=", "value": 2},
                {"op": "group_by", "by": ["region"], "aggregations": [{"column": "revenue", "func": "avg"}]},
                {"op": "limit", "n": 5}
            ]"#,
        )
        .unwrap();

        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], TabularOp::Filter { cmp: Comparison::Ge, .. }));
        match &ops[1] {
            TabularOp::GroupBy { aggregations, .. } => assert_eq!(aggregations[0].func, AggFunc::Mean),
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn group_by_keeps_first_seen_order() {
        let out = run(&[TabularOp::GroupBy {
            by: vec!["region".to_string()],
            aggregations: vec![Aggregation {
                column: "revenue".to_string(),
                func: AggFunc::Sum,
                alias: None,
            }],
        }]);

        assert_eq!(out.height(), 3);
        assert_eq!(out.get_column_names(), vec!["region", "revenue"]);
        let regions = out.column("region").unwrap();
        assert_eq!(regions.str().unwrap().get(0), Some("east"));
        assert_eq!(out.column("revenue").unwrap().f64().unwrap().get(0), Some(150.0));
    }

    #[test]
    fn filter_sort_and_limit() {
        let out = run(&[
            TabularOp::Filter {
                column: "region".to_string(),
                cmp: Comparison::Ne,
                value: Value::String("north".to_string()),
            },
            TabularOp::Sort {
                by: vec!["revenue".to_string()],
                descending: true,
            },
            TabularOp::Limit { n: 2 },
        ]);

        assert_eq!(out.height(), 2);
        assert_eq!(out.column("revenue").unwrap().f64().unwrap().get(0), Some(250.0));
    }

    #[test]
    fn mutating_ops_never_apply() {
        let op = TabularOp::DropColumns {
            columns: vec!["revenue".to_string()],
        };
        assert!(op.is_mutating());
        assert!(op.apply(sales().lazy()).is_err());
    }

    #[test]
    fn limits_past_the_index_range_are_refused() {
        let op: TabularOp = serde_json::from_str(r#"{"op": "limit", "n": 4294967297}"#).unwrap();
        assert!(op.apply(sales().lazy()).is_err());
    }
}
