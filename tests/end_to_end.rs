mod common;

use common::*;
use sql_agent::agent::result::CellValue;
use sql_agent::agent::{Backend, ChartKind, ChartPlan, SessionState, SourceKind};
use sql_agent::ingest::schema::DataType;

#[tokio::test]
async fn grouped_question_yields_a_bar_chart() {
    let model = ScriptedModel::new(&[GROUPED_SQL]);
    let calls = model.calls();
    let agent = manager(sales_registry(SourceKind::Both), model);

    let answer = agent
        .submit_question("s1", "Show me total revenue by region")
        .await
        .unwrap();

    assert_eq!(answer.backend_used, Backend::Structured);
    assert!(!answer.fallback_used);
    assert_eq!(answer.dataset, "sales");
    assert_eq!(call_count(&calls), 1);

    let summary = &answer.result_summary;
    assert_eq!(summary.row_count, 4);
    assert!(!summary.truncated);
    assert_eq!(summary.columns[0].name, "region");
    assert_eq!(summary.columns[0].data_type, DataType::String);
    assert!(summary.columns[1].data_type.is_numeric());
    assert_eq!(summary.preview[0][0], CellValue::Text("east".to_string()));
    assert_eq!(summary.preview[0][1].as_f64(), Some(500.0));

    match answer.chart {
        ChartPlan::Chart(spec) => {
            assert_eq!(spec.chart_kind, ChartKind::Bar);
            assert_eq!(spec.x_field.as_deref(), Some("region"));
            assert_eq!(spec.y_fields, vec!["revenue".to_string()]);
        }
        ChartPlan::NoChart => panic!("expected a bar chart"),
    }

    assert_eq!(answer.answer_text, "Found 4 rows with columns region, revenue.");
    assert!(answer.generated_query.contains("GROUP BY region"));
    assert_eq!(agent.state("s1"), SessionState::Idle);
}

#[tokio::test]
async fn scalar_question_yields_no_chart() {
    let agent = manager(sales_registry(SourceKind::Both), ScriptedModel::new(&[AVERAGE_SQL]));

    let answer = agent.submit_question("s1", "What is the average revenue?").await.unwrap();

    assert_eq!(answer.chart, ChartPlan::NoChart);
    assert_eq!(answer.result_summary.row_count, 1);
    assert!(answer.answer_text.starts_with("The result is "));
    assert!(answer.answer_text.ends_with("(avg_revenue)."));
}

#[tokio::test]
async fn repeated_question_gives_the_same_shape_and_chart() {
    let agent = manager(
        sales_registry(SourceKind::Both),
        ScriptedModel::new(&[GROUPED_SQL, GROUPED_SQL]),
    );

    let first = agent.submit_question("a", "Show me total revenue by region").await.unwrap();
    let second = agent.submit_question("b", "Show me total revenue by region").await.unwrap();

    assert_eq!(first.chart, second.chart);
    assert_eq!(first.result_summary.shape(), second.result_summary.shape());
    assert_eq!(first.result_summary.preview, second.result_summary.preview);
}

#[tokio::test]
async fn tabular_only_dataset_answers_with_a_pipeline() {
    let agent = manager(sales_registry(SourceKind::Tabular), ScriptedModel::new(&[GROUPED_OPS]));

    let answer = agent
        .submit_question("s1", "Show me total revenue by region")
        .await
        .unwrap();

    assert_eq!(answer.backend_used, Backend::Tabular);
    assert!(!answer.fallback_used);
    assert_eq!(answer.result_summary.row_count, 4);
    assert!(answer.generated_query.contains("group_by"));

    match answer.chart {
        ChartPlan::Chart(spec) => {
            assert_eq!(spec.chart_kind, ChartKind::Bar);
            assert_eq!(spec.x_field.as_deref(), Some("region"));
        }
        ChartPlan::NoChart => panic!("expected a bar chart"),
    }
}

#[tokio::test]
async fn turn_records_what_was_answered() {
    let agent = manager(sales_registry(SourceKind::Both), ScriptedModel::new(&[GROUPED_SQL]));

    agent.submit_question("s1", "  Show me total revenue by region  ").await.unwrap();

    let history = agent.history("s1");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].question.text, "Show me total revenue by region");
    assert_eq!(history[0].backend_used, Backend::Structured);
    assert_eq!(history[0].dataset, "sales");
}
