use polars::prelude::IdxSize;
use sqlparser::ast::{
    Expr, GroupByExpr, JoinOperator, ObjectName, Query, Select, SelectItem, SetExpr, Statement,
    TableFactor, Value, Visit, Visitor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;
use tracing::{debug, warn};

use crate::agent::tabular::{Aggregation, Comparison, TabularOp};
use crate::agent::{Backend, CandidateQuery, QueryBody, RejectReason};
use crate::ingest::schema::TableSchema;

const MUTATING_VERBS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "MERGE", "COPY", "ATTACH",
    "DETACH", "REPLACE", "GRANT", "REVOKE", "INSTALL", "LOAD", "VACUUM", "SET", "CALL", "EXPORT",
    "IMPORT", "PRAGMA", "UPSERT",
];

const AGGREGATES: &[&str] = &[
    "count", "sum", "avg", "mean", "min", "max", "median", "mode", "any_value", "first", "last",
    "string_agg", "array_agg", "list", "stddev", "stddev_samp", "variance", "var_samp",
    "approx_count_distinct", "quantile",
];

// Bare words the parser reports as identifiers that are not columns.
const BUILTIN_IDENTIFIERS: &[&str] = &["current_date", "current_timestamp", "current_time", "true", "false", "null"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass { estimated_rows: u64 },
    Reject(RejectReason),
}

/// A candidate that passed every check. Only the validator can build one.
#[derive(Debug, Clone)]
pub struct ValidatedQuery {
    candidate: CandidateQuery,
    dataset: String,
    estimated_rows: u64,
}

impl ValidatedQuery {
    pub(crate) fn new(candidate: CandidateQuery, dataset: &str, estimated_rows: u64) -> Self {
        Self {
            candidate,
            dataset: dataset.to_string(),
            estimated_rows,
        }
    }

    pub fn backend(&self) -> Backend {
        self.candidate.backend
    }

    pub fn body(&self) -> &QueryBody {
        &self.candidate.body
    }

    pub fn candidate(&self) -> &CandidateQuery {
        &self.candidate
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn estimated_rows(&self) -> u64 {
        self.estimated_rows
    }
}

/// Static safety and schema gate between generation and execution.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    max_result_rows: u64,
}

impl QueryValidator {
    pub fn new(max_result_rows: u64) -> Self {
        Self { max_result_rows }
    }

    pub fn validate(&self, candidate: &CandidateQuery, schema: &TableSchema) -> Verdict {
        let outcome = match &candidate.body {
            QueryBody::Sql(sql) => check_sql(sql, schema),
            QueryBody::Ops(ops) => check_ops(ops, schema),
        };

        match outcome {
            Ok(estimated) if estimated > self.max_result_rows => Verdict::Reject(RejectReason::ResultTooLarge {
                estimated,
                ceiling: self.max_result_rows,
            }),
            Ok(estimated_rows) => Verdict::Pass { estimated_rows },
            Err(reason) => Verdict::Reject(reason),
        }
    }

    /// Consumes a candidate and returns it as executable if it passes.
    pub fn approve(&self, candidate: CandidateQuery, schema: &TableSchema) -> Result<ValidatedQuery, RejectReason> {
        match self.validate(&candidate, schema) {
            Verdict::Pass { estimated_rows } => {
                debug!("{} candidate passed, estimated {} rows", candidate.backend, estimated_rows);
                Ok(ValidatedQuery::new(candidate, &schema.name, estimated_rows))
            }
            Verdict::Reject(reason) => {
                warn!("{} candidate rejected: {}", candidate.backend, reason);
                Err(reason)
            }
        }
    }
}

fn check_sql(sql: &str, schema: &TableSchema) -> Result<u64, RejectReason> {
    let statements = match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => statements,
        Err(e) => {
            return Err(match leading_mutation(sql) {
                Some(verb) => RejectReason::MutatingOperation(verb),
                None => RejectReason::Syntax(e.to_string()),
            });
        }
    };

    let mut refs = References::default();
    for statement in &statements {
        let _ = statement.visit(&mut refs);
    }
    if let Some(op) = refs.mutation {
        return Err(RejectReason::MutatingOperation(op));
    }

    let query = match statements.as_slice() {
        [Statement::Query(query)] => query,
        [] => return Err(RejectReason::Syntax("empty query".to_string())),
        [_] => return Err(RejectReason::Syntax("only SELECT queries are allowed".to_string())),
        _ => {
            return Err(RejectReason::Syntax(format!(
                "expected exactly one statement, found {}",
                statements.len()
            )))
        }
    };

    for relation in &refs.relations {
        if !relation.eq_ignore_ascii_case(&schema.name) && !refs.ctes.contains(&relation.to_lowercase()) {
            return Err(RejectReason::UnknownTable(relation.clone()));
        }
    }

    for column in &refs.columns {
        let lowered = column.to_lowercase();
        if schema.column(column).is_none()
            && !refs.known.contains(&lowered)
            && !BUILTIN_IDENTIFIERS.contains(&lowered.as_str())
        {
            return Err(RejectReason::UnknownColumn(column.clone()));
        }
    }

    Ok(estimate_query(query, schema.row_count))
}

// First mutating verb at the start of any `;` separated segment.
fn leading_mutation(sql: &str) -> Option<String> {
    sql.split(';').find_map(|segment| {
        let word = segment.split_whitespace().next()?.to_uppercase();
        MUTATING_VERBS.contains(&word.as_str()).then_some(word)
    })
}

fn statement_verb(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

#[derive(Default)]
struct References {
    relations: Vec<String>,
    columns: Vec<String>,
    // lowercased names that are not schema columns but may be referenced
    known: HashSet<String>,
    ctes: HashSet<String>,
    mutation: Option<String>,
}

impl References {
    fn flag(&mut self, op: String) {
        if self.mutation.is_none() {
            self.mutation = Some(op);
        }
    }

    // The visitor has no query hook, so every nested query is walked from
    // the statement, expression or table factor that holds it.
    fn collect_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let name = cte.alias.name.value.to_lowercase();
                self.known.insert(name.clone());
                self.ctes.insert(name);
                for column in &cte.alias.columns {
                    self.known.insert(column.value.to_lowercase());
                }
                self.collect_query(&cte.query);
            }
        }
        self.collect_set_expr(&query.body);
    }

    fn collect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    self.flag("SELECT INTO".to_string());
                }
                for item in &select.projection {
                    if let SelectItem::ExprWithAlias { alias, .. } = item {
                        self.known.insert(alias.value.to_lowercase());
                    }
                }
            }
            SetExpr::Query(query) => self.collect_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left);
                self.collect_set_expr(right);
            }
            // nested INSERT bodies reach pre_visit_statement
            _ => {}
        }
    }
}

impl Visitor for References {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<()> {
        match statement {
            Statement::Query(query) => self.collect_query(query),
            other => {
                let verb = statement_verb(other);
                if MUTATING_VERBS.contains(&verb.as_str()) {
                    self.flag(verb);
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        if let Some(last) = relation.0.last() {
            self.relations.push(last.value.clone());
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        if let TableFactor::Derived { subquery, .. } = factor {
            self.collect_query(subquery);
        }
        let alias = match factor {
            TableFactor::Table { alias, .. } | TableFactor::Derived { alias, .. } => alias.as_ref(),
            _ => None,
        };
        if let Some(alias) = alias {
            self.known.insert(alias.name.value.to_lowercase());
            for column in &alias.columns {
                self.known.insert(column.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        if let Some(query) = subquery(expr) {
            self.collect_query(query);
        }
        match expr {
            Expr::Identifier(ident) => self.columns.push(ident.value.clone()),
            Expr::CompoundIdentifier(parts) => {
                if let Some(last) = parts.last() {
                    self.columns.push(last.value.clone());
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn subquery(expr: &Expr) -> Option<&Query> {
    match expr {
        Expr::Subquery(query) | Expr::ArraySubquery(query) => Some(&**query),
        Expr::InSubquery { subquery, .. } | Expr::Exists { subquery, .. } => Some(&**subquery),
        _ => None,
    }
}

fn estimate_query(query: &Query, table_rows: u64) -> u64 {
    let rows = estimate_set_expr(&query.body, table_rows);
    match query.limit.as_ref().and_then(literal_u64) {
        Some(limit) => rows.min(limit),
        None => rows,
    }
}

fn estimate_set_expr(body: &SetExpr, table_rows: u64) -> u64 {
    match body {
        SetExpr::Select(select) => estimate_select(select, table_rows),
        SetExpr::Query(query) => estimate_query(query, table_rows),
        SetExpr::SetOperation { left, right, .. } => {
            estimate_set_expr(left, table_rows).saturating_add(estimate_set_expr(right, table_rows))
        }
        SetExpr::Values(values) => values.rows.len() as u64,
        _ => table_rows,
    }
}

fn estimate_select(select: &Select, table_rows: u64) -> u64 {
    if select.from.is_empty() {
        return 1;
    }

    let grouped = match &select.group_by {
        GroupByExpr::All => true,
        GroupByExpr::Expressions(exprs) => !exprs.is_empty(),
    };
    let input = select
        .from
        .iter()
        .map(|table| {
            table
                .joins
                .iter()
                .fold(factor_rows(&table.relation, table_rows), |acc, join| {
                    let joined = factor_rows(&join.relation, table_rows);
                    match join.join_operator {
                        JoinOperator::CrossJoin => acc.saturating_mul(joined),
                        _ => acc.max(joined),
                    }
                })
        })
        .fold(1u64, |acc, rows| acc.saturating_mul(rows));

    // ungrouped aggregates over a join product are charged the product
    if !grouped && select.projection.iter().any(projects_aggregate) && input <= table_rows {
        return 1;
    }
    input
}

fn factor_rows(factor: &TableFactor, table_rows: u64) -> u64 {
    match factor {
        TableFactor::Derived { subquery, .. } => estimate_query(subquery, table_rows),
        _ => table_rows,
    }
}

fn projects_aggregate(item: &SelectItem) -> bool {
    let expr = match item {
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => expr,
        _ => return false,
    };

    // depth counts enclosing subqueries; theirs aggregate their own rows
    #[derive(Default)]
    struct AggregateFinder {
        found: bool,
        depth: usize,
    }

    impl Visitor for AggregateFinder {
        type Break = ();

        fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
            if subquery(expr).is_some() {
                self.depth += 1;
                return ControlFlow::Continue(());
            }
            if self.depth > 0 {
                return ControlFlow::Continue(());
            }
            if let Expr::Function(function) = expr {
                let name = function
                    .name
                    .0
                    .last()
                    .map(|ident| ident.value.to_lowercase())
                    .unwrap_or_default();
                if function.over.is_none() && AGGREGATES.contains(&name.as_str()) {
                    self.found = true;
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        }

        fn post_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
            if subquery(expr).is_some() {
                self.depth -= 1;
            }
            ControlFlow::Continue(())
        }
    }

    let mut finder = AggregateFinder::default();
    let _ = expr.visit(&mut finder);
    finder.found
}

fn literal_u64(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(Value::Number(n, _)) => n.parse().ok(),
        _ => None,
    }
}

fn check_ops(ops: &[TabularOp], schema: &TableSchema) -> Result<u64, RejectReason> {
    if let Some(op) = ops.iter().find(|op| op.is_mutating()) {
        return Err(RejectReason::MutatingOperation(op.name().to_string()));
    }

    if ops.is_empty() {
        return Err(RejectReason::Syntax("empty operation pipeline".to_string()));
    }
    for op in ops {
        check_op_shape(op)?;
    }

    let mut columns = schema.column_names();
    let mut rows = schema.row_count;

    for op in ops {
        let require = |name: &String| -> Result<(), RejectReason> {
            if columns.iter().any(|c| c == name) {
                Ok(())
            } else {
                Err(RejectReason::UnknownColumn(name.clone()))
            }
        };

        match op {
            TabularOp::Select { columns: selected } => {
                selected.iter().try_for_each(require)?;
                columns = selected.clone();
            }
            TabularOp::Filter { column, .. } => require(column)?,
            TabularOp::GroupBy { by, aggregations } => {
                by.iter().try_for_each(require)?;
                aggregations.iter().map(|a| &a.column).try_for_each(require)?;
                columns = by
                    .iter()
                    .cloned()
                    .chain(aggregations.iter().map(|a| a.output_name().to_string()))
                    .collect();
            }
            TabularOp::Aggregate { aggregations } => {
                aggregations.iter().map(|a| &a.column).try_for_each(require)?;
                columns = aggregations.iter().map(|a| a.output_name().to_string()).collect();
                rows = 1;
            }
            TabularOp::Sort { by, .. } => by.iter().try_for_each(require)?,
            TabularOp::Limit { n } => rows = rows.min(*n as u64),
            TabularOp::DropColumns { .. }
            | TabularOp::DeleteRows { .. }
            | TabularOp::Assign { .. }
            | TabularOp::InsertRows { .. } => {}
        }
    }

    Ok(rows)
}

fn check_op_shape(op: &TabularOp) -> Result<(), RejectReason> {
    let syntax = |msg: &str| Err(RejectReason::Syntax(format!("{}: {}", op.name(), msg)));

    match op {
        TabularOp::Select { columns } if columns.is_empty() => syntax("no columns"),
        TabularOp::GroupBy { by, .. } if by.is_empty() => syntax("no grouping columns"),
        TabularOp::GroupBy { aggregations, .. } | TabularOp::Aggregate { aggregations } => {
            if aggregations.is_empty() {
                return syntax("no aggregations");
            }
            if has_duplicate_outputs(op, aggregations) {
                return syntax("duplicate output column");
            }
            Ok(())
        }
        TabularOp::Sort { by, .. } if by.is_empty() => syntax("no sort keys"),
        TabularOp::Limit { n: 0 } => syntax("limit must be positive"),
        TabularOp::Limit { n } if IdxSize::try_from(*n).is_err() => syntax("limit is out of range"),
        TabularOp::Filter { cmp, value, .. }
            if !matches!(cmp, Comparison::IsNull | Comparison::NotNull) && value.is_null() =>
        {
            syntax("comparison needs a value")
        }
        _ => Ok(()),
    }
}

fn has_duplicate_outputs(op: &TabularOp, aggregations: &[Aggregation]) -> bool {
    let mut seen = HashSet::new();
    let keys = match op {
        TabularOp::GroupBy { by, .. } => by.as_slice(),
        _ => &[],
    };
    keys.iter()
        .map(String::as_str)
        .chain(aggregations.iter().map(Aggregation::output_name))
        .any(|name| !seen.insert(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tabular::AggFunc;
    use crate::ingest::schema::{ColumnSchema, DataType};

    fn schema(row_count: u64) -> TableSchema {
        let column = |name: &str, data_type| ColumnSchema {
            name: name.to_string(),
            data_type,
            nullable: true,
        };
        TableSchema {
            name: "sales".to_string(),
            columns: vec![
                column("region", DataType::String),
                column("revenue", DataType::Double),
                column("order_date", DataType::Date),
            ],
            row_count,
        }
    }

    fn sql(text: &str) -> CandidateQuery {
        CandidateQuery {
            backend: Backend::Structured,
            body: QueryBody::Sql(text.to_string()),
            confidence: 1.0,
        }
    }

    fn ops(ops: Vec<TabularOp>) -> CandidateQuery {
        CandidateQuery {
            backend: Backend::Tabular,
            body: QueryBody::Ops(ops),
            confidence: 1.0,
        }
    }

    fn verdict(candidate: CandidateQuery) -> Verdict {
        QueryValidator::new(1_000_000).validate(&candidate, &schema(2000))
    }

    fn rejected(candidate: CandidateQuery) -> RejectReason {
        match verdict(candidate) {
            Verdict::Reject(reason) => reason,
            pass => panic!("expected a rejection, got {:?}", pass),
        }
    }

    #[test]
    fn passes_grouped_query() {
        assert_eq!(
            verdict(sql("SELECT region, SUM(revenue) AS total FROM sales GROUP BY region ORDER BY total DESC")),
            Verdict::Pass { estimated_rows: 2000 }
        );
    }

    #[test]
    fn rejects_every_mutating_statement() {
        for statement in [
            "DELETE FROM sales",
            "DROP TABLE sales",
            "INSERT INTO sales VALUES ('x', 1, DATE '2024-01-01')",
            "UPDATE sales SET revenue = 0",
            "CREATE TABLE copy AS SELECT * FROM sales",
            "ALTER TABLE sales ADD COLUMN x INT",
            "SELECT * INTO backup FROM sales",
            "SELECT region FROM sales; DROP TABLE sales",
            "TRUNCATE sales",
        ] {
            assert!(
                matches!(rejected(sql(statement)), RejectReason::MutatingOperation(_)),
                "{} was not flagged",
                statement
            );
        }
    }

    #[test]
    fn unparseable_mutations_are_still_mutations() {
        assert_eq!(
            rejected(sql("VACUUM ANALYZE sales FULL PLEASE (")),
            RejectReason::MutatingOperation("VACUUM".to_string())
        );
        assert!(matches!(rejected(sql("SELEC region FRM sales")), RejectReason::Syntax(_)));
    }

    #[test]
    fn requires_exactly_one_statement() {
        assert!(matches!(
            rejected(sql("SELECT region FROM sales; SELECT revenue FROM sales")),
            RejectReason::Syntax(_)
        ));
        assert!(matches!(rejected(sql("")), RejectReason::Syntax(_)));
    }

    #[test]
    fn checks_tables_and_columns() {
        assert_eq!(
            rejected(sql("SELECT region FROM customers")),
            RejectReason::UnknownTable("customers".to_string())
        );
        assert_eq!(
            rejected(sql("SELECT margin FROM sales")),
            RejectReason::UnknownColumn("margin".to_string())
        );
        assert_eq!(
            rejected(sql("SELECT * FROM read_csv_auto('/etc/passwd')")),
            RejectReason::UnknownTable("read_csv_auto".to_string())
        );
    }

    #[test]
    fn accepts_aliases_ctes_and_case_differences() {
        let query = "WITH totals AS (SELECT Region, SUM(REVENUE) AS total FROM SALES s GROUP BY s.region) \
                     SELECT t.region, t.total FROM totals t WHERE t.total > 10 AND current_date IS NOT NULL";
        assert!(matches!(verdict(sql(query)), Verdict::Pass { .. }));
    }

    #[test]
    fn estimates_cardinality() {
        assert_eq!(verdict(sql("SELECT AVG(revenue) FROM sales")), Verdict::Pass { estimated_rows: 1 });
        assert_eq!(verdict(sql("SELECT 1")), Verdict::Pass { estimated_rows: 1 });
        assert_eq!(
            verdict(sql("SELECT region FROM sales LIMIT 10")),
            Verdict::Pass { estimated_rows: 10 }
        );
        assert_eq!(
            rejected(sql("SELECT a.region FROM sales a CROSS JOIN sales b")),
            RejectReason::ResultTooLarge {
                estimated: 4_000_000,
                ceiling: 1_000_000
            }
        );
        assert!(matches!(
            rejected(sql("SELECT a.region FROM sales a, sales b")),
            RejectReason::ResultTooLarge { .. }
        ));
        assert_eq!(
            verdict(sql("SELECT a.region FROM sales a CROSS JOIN sales b LIMIT 5")),
            Verdict::Pass { estimated_rows: 5 }
        );
    }

    #[test]
    fn select_into_is_caught_in_nested_queries() {
        for statement in [
            "WITH staged AS (SELECT * INTO backup FROM sales) SELECT region FROM staged",
            "SELECT s.region FROM (SELECT * INTO backup FROM sales) s",
            "SELECT region FROM sales WHERE revenue > (SELECT MAX(revenue) INTO peak FROM sales)",
            "SELECT region FROM sales UNION ALL (SELECT region INTO backup FROM sales)",
        ] {
            assert_eq!(
                rejected(sql(statement)),
                RejectReason::MutatingOperation("SELECT INTO".to_string()),
                "{}",
                statement
            );
        }
    }

    #[test]
    fn derived_table_aliases_are_known() {
        let query = "SELECT d.region, d.total FROM \
                     (SELECT region, SUM(revenue) AS total FROM sales GROUP BY region) d \
                     WHERE d.total > (SELECT AVG(revenue) AS mean FROM sales) ORDER BY total";
        assert_eq!(verdict(sql(query)), Verdict::Pass { estimated_rows: 2000 });
    }

    #[test]
    fn subquery_aggregates_do_not_collapse_the_outer_estimate() {
        assert_eq!(
            verdict(sql("SELECT region, (SELECT MAX(revenue) FROM sales) AS top FROM sales")),
            Verdict::Pass { estimated_rows: 2000 }
        );
        assert_eq!(
            verdict(sql("SELECT region FROM sales WHERE EXISTS (SELECT COUNT(*) FROM sales)")),
            Verdict::Pass { estimated_rows: 2000 }
        );
    }

    #[test]
    fn aggregates_over_join_products_are_charged_the_product() {
        assert_eq!(
            rejected(sql("SELECT SUM(a.revenue * b.revenue) FROM sales a, sales b")),
            RejectReason::ResultTooLarge {
                estimated: 4_000_000,
                ceiling: 1_000_000
            }
        );
        assert_eq!(
            verdict(sql("SELECT COUNT(*) FROM sales a JOIN sales b ON a.region = b.region")),
            Verdict::Pass { estimated_rows: 1 }
        );
    }

    #[test]
    fn window_functions_are_not_aggregates() {
        assert_eq!(
            verdict(sql("SELECT region, SUM(revenue) OVER (PARTITION BY region) FROM sales")),
            Verdict::Pass { estimated_rows: 2000 }
        );
    }

    #[test]
    fn rejects_mutating_ops_before_anything_else() {
        let reason = rejected(ops(vec![
            TabularOp::Select {
                columns: vec!["nope".to_string()],
            },
            TabularOp::DropColumns {
                columns: vec!["revenue".to_string()],
            },
        ]));
        assert_eq!(reason, RejectReason::MutatingOperation("drop_columns".to_string()));
    }

    #[test]
    fn tracks_columns_through_the_pipeline() {
        let grouped = TabularOp::GroupBy {
            by: vec!["region".to_string()],
            aggregations: vec![Aggregation {
                column: "revenue".to_string(),
                func: AggFunc::Sum,
                alias: Some("total".to_string()),
            }],
        };

        assert_eq!(
            verdict(ops(vec![
                grouped.clone(),
                TabularOp::Sort {
                    by: vec!["total".to_string()],
                    descending: true
                },
                TabularOp::Limit { n: 3 },
            ])),
            Verdict::Pass { estimated_rows: 3 }
        );
        assert_eq!(
            rejected(ops(vec![
                grouped,
                TabularOp::Filter {
                    column: "order_date".to_string(),
                    cmp: Comparison::NotNull,
                    value: serde_json::Value::Null,
                },
            ])),
            RejectReason::UnknownColumn("order_date".to_string())
        );
    }

    #[test]
    fn tabular_columns_are_case_sensitive() {
        assert_eq!(
            rejected(ops(vec![TabularOp::Select {
                columns: vec!["Revenue".to_string()]
            }])),
            RejectReason::UnknownColumn("Revenue".to_string())
        );
    }

    #[test]
    fn rejects_malformed_ops() {
        assert!(matches!(rejected(ops(vec![])), RejectReason::Syntax(_)));
        assert!(matches!(rejected(ops(vec![TabularOp::Limit { n: 0 }])), RejectReason::Syntax(_)));
        assert!(matches!(
            rejected(ops(vec![TabularOp::Limit {
                n: IdxSize::MAX as usize + 1
            }])),
            RejectReason::Syntax(_)
        ));
        assert!(matches!(
            rejected(ops(vec![TabularOp::Aggregate { aggregations: vec![] }])),
            RejectReason::Syntax(_)
        ));
    }

    #[test]
    fn only_passing_candidates_are_approved() {
        let validator = QueryValidator::new(1_000_000);
        let approved = validator
            .approve(sql("SELECT region FROM sales LIMIT 2"), &schema(10))
            .unwrap();
        assert_eq!(approved.dataset(), "sales");
        assert_eq!(approved.estimated_rows(), 2);

        assert!(validator.approve(sql("DROP TABLE sales"), &schema(10)).is_err());
    }
}
