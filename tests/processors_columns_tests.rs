mod shared;

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use fraud_pipeline::exceptions::{PipelineError, PipelineResult};
use fraud_pipeline::pipeline::Processor;
use fraud_pipeline::processors::columns::DropColumns;
use fraud_pipeline::processors::documents::DocumentsProcessor;
use shared::{collect, column_names, f64_column, i64_column, mem_df, text_df};

fn small_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("score_1", DataType::Float64, true),
        Field::new("produto", DataType::Utf8, true),
        Field::new("score_8", DataType::Float64, true),
        Field::new("valor_compra", DataType::Float64, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from(vec![Some(1.0), None, Some(3.0)])),
        Arc::new(StringArray::from(vec![Some("a"), Some("b"), None])),
        Arc::new(Float64Array::from(vec![Some(0.1), Some(0.2), Some(0.3)])),
        Arc::new(Float64Array::from(vec![Some(10.0), Some(20.0), None])),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

#[tokio::test]
async fn test_drop_columns_removes_only_configured_columns() -> PipelineResult<()> {
    let df = mem_df(small_batch()).await;
    let mut dropper = DropColumns::new(vec!["produto".to_string(), "score_8".to_string()]);
    dropper.fit(&df, None).await?;
    let batch = collect(dropper.transform(df).await?).await;

    assert_eq!(column_names(&batch), vec!["score_1", "valor_compra"]);
    assert_eq!(f64_column(&batch, "score_1"), vec![Some(1.0), None, Some(3.0)]);
    assert_eq!(
        f64_column(&batch, "valor_compra"),
        vec![Some(10.0), Some(20.0), None]
    );
    assert!(!Processor::is_stateful(&dropper));
    Ok(())
}

#[tokio::test]
async fn test_drop_columns_fails_on_missing_column() {
    let df = mem_df(small_batch()).await;
    let dropper = DropColumns::new(vec!["score_fraude_modelo".to_string()]);
    let err = dropper.transform(df).await.unwrap_err();
    assert!(matches!(err, PipelineError::MissingColumn(msg) if msg.contains("score_fraude_modelo")));
}

#[tokio::test]
async fn test_drop_columns_refuses_to_drop_everything() {
    let df = mem_df(small_batch()).await;
    let dropper = DropColumns::new(
        ["score_1", "produto", "score_8", "valor_compra"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    let err = dropper.transform(df).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidParameter(_)));
}

#[tokio::test]
async fn test_documents_map_flags_to_integers() -> PipelineResult<()> {
    let df = text_df(
        "entrega_doc_1",
        vec![None, Some("Y"), Some("N"), Some("1"), Some("y")],
    )
    .await;
    let processor = DocumentsProcessor::new(vec!["entrega_doc_1".to_string()]);
    let batch = collect(processor.transform(df).await?).await;

    assert_eq!(
        batch.schema().field(0).data_type(),
        &DataType::Int64,
        "document flags must be integers"
    );
    assert_eq!(
        i64_column(&batch, "entrega_doc_1"),
        vec![Some(0), Some(1), Some(0), Some(0), Some(0)]
    );
    Ok(())
}

#[tokio::test]
async fn test_documents_tolerate_numeric_flags_and_reapplication() -> PipelineResult<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("entrega_doc_2", DataType::Int64, true),
        Field::new("other", DataType::Utf8, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(vec![Some(1), Some(0), None])),
        Arc::new(StringArray::from(vec![Some("Y"), Some("Y"), Some("Y")])),
    ];
    let df = mem_df(RecordBatch::try_new(schema, columns).unwrap()).await;
    let processor = DocumentsProcessor::new(vec!["entrega_doc_2".to_string()]);

    let once = processor.transform(df).await?;
    let twice = collect(processor.transform(once).await?).await;

    assert_eq!(
        i64_column(&twice, "entrega_doc_2"),
        vec![Some(1), Some(0), Some(0)]
    );
    // Columns that are not document flags pass through.
    assert_eq!(column_names(&twice), vec!["entrega_doc_2", "other"]);
    Ok(())
}
