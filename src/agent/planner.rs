use serde::Serialize;

use crate::agent::result::{ExecutionResult, ResultColumn};
use crate::ingest::schema::DataType;
use crate::util::keywords::KeywordMatcher;

const PERIOD_NAMES: &[&str] = &["year", "month", "quarter", "week", "day", "hour"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
    Scatter,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartAggregation {
    Sum,
    Avg,
    Count,
    Max,
    Min,
}

/// Declarative chart recommendation. Rendering is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartSpec {
    pub chart_kind: ChartKind,
    pub x_field: Option<String>,
    pub y_fields: Vec<String>,
    pub aggregation: Option<ChartAggregation>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "spec", rename_all = "snake_case")]
pub enum ChartPlan {
    Chart(ChartSpec),
    NoChart,
}

/// Picks a chart from the result's column types and names plus question keywords.
/// Cell values are never inspected.
pub struct VisualizationPlanner {
    trend_hint: KeywordMatcher,
    correlation_hint: KeywordMatcher,
    aggregations: Vec<(ChartAggregation, KeywordMatcher)>,
}

impl Default for VisualizationPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualizationPlanner {
    pub fn new() -> Self {
        Self {
            trend_hint: KeywordMatcher::new(&["trend", "trends", "over time", "timeline", "growth", "evolution"]),
            correlation_hint: KeywordMatcher::new(&["correlation", "correlate", "relationship", "versus", "vs"]),
            aggregations: vec![
                (ChartAggregation::Sum, KeywordMatcher::new(&["total", "sum"])),
                (ChartAggregation::Avg, KeywordMatcher::new(&["average", "avg", "mean"])),
                (ChartAggregation::Count, KeywordMatcher::new(&["count", "how many", "number of"])),
                (ChartAggregation::Max, KeywordMatcher::new(&["max", "maximum", "highest"])),
                (ChartAggregation::Min, KeywordMatcher::new(&["min", "minimum", "lowest"])),
            ],
        }
    }

    pub fn plan(&self, result: &ExecutionResult, question: &str) -> ChartPlan {
        let columns = result.columns();
        if result.row_count() == 0 || (result.row_count() == 1 && columns.len() == 1) {
            return ChartPlan::NoChart;
        }

        let temporal: Vec<&ResultColumn> = columns.iter().filter(|c| is_temporal_dimension(c)).collect();
        let categorical: Vec<&ResultColumn> = columns
            .iter()
            .filter(|c| !c.data_type.is_numeric() && !c.data_type.is_temporal())
            .collect();
        let measures: Vec<&ResultColumn> = columns
            .iter()
            .filter(|c| c.data_type.is_numeric() && !is_temporal_dimension(c))
            .collect();

        let dimension = temporal.first().or(categorical.first()).copied();
        let has_measure = !measures.is_empty();

        let mut candidates = vec![ChartKind::Table];
        if !temporal.is_empty() && has_measure {
            candidates.push(ChartKind::Line);
        }
        if !categorical.is_empty() && has_measure {
            candidates.push(ChartKind::Bar);
        }
        if dimension.is_none() && measures.len() >= 2 && result.row_count() > 1 {
            candidates.push(ChartKind::Scatter);
        }
        if self.trend_hint.matches(question) && dimension.is_some() && has_measure {
            candidates.push(ChartKind::Line);
        }
        if self.correlation_hint.matches(question) && measures.len() >= 2 {
            candidates.push(ChartKind::Scatter);
        }

        let chart_kind = [ChartKind::Line, ChartKind::Bar, ChartKind::Scatter, ChartKind::Table]
            .into_iter()
            .find(|kind| candidates.contains(kind))
            .unwrap_or(ChartKind::Table);

        let names = |cols: &[&ResultColumn]| cols.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
        let (x_field, y_fields) = match chart_kind {
            ChartKind::Line => (dimension.map(|c| c.name.clone()), names(&measures)),
            ChartKind::Bar => (categorical.first().map(|c| c.name.clone()), names(&measures)),
            ChartKind::Scatter => (measures.first().map(|c| c.name.clone()), names(&measures[1..])),
            ChartKind::Table => (None, Vec::new()),
        };

        ChartPlan::Chart(ChartSpec {
            chart_kind,
            x_field,
            y_fields,
            aggregation: self
                .aggregations
                .iter()
                .find(|(_, matcher)| matcher.matches(question))
                .map(|(aggregation, _)| *aggregation),
            title: question.trim().to_string(),
        })
    }
}

fn is_temporal_dimension(column: &ResultColumn) -> bool {
    match column.data_type {
        DataType::Date | DataType::Timestamp => true,
        DataType::Integer | DataType::BigInt => {
            let name = column.name.to_lowercase();
            PERIOD_NAMES.iter().any(|period| {
                name == *period
                    || name.ends_with(&format!("_{}", period))
                    || name.starts_with(&format!("{}_", period))
            })
        }
        _ => false,
    }
}
