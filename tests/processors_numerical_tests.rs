mod shared;

use std::sync::Arc;

use approx::assert_relative_eq;
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use fraud_pipeline::exceptions::{PipelineError, PipelineResult};
use fraud_pipeline::processors::numerical::{coerce_numeric, TransformColumns};
use shared::{collect, column_names, f64_column, i64_column, mem_df};

fn amounts_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("valor_compra", DataType::Float64, true),
        Field::new("score_3", DataType::Int64, true),
        Field::new("score_6", DataType::Float64, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from(vec![Some(0.0), Some(std::f64::consts::E - 1.0), Some(-2.0), None])),
        Arc::new(Int64Array::from(vec![Some(9), Some(0), Some(1), Some(3)])),
        Arc::new(Float64Array::from(vec![Some(27.0), Some(-8.0), Some(0.0), None])),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

#[tokio::test]
async fn test_log1p_replaces_columns() -> PipelineResult<()> {
    let df = mem_df(amounts_batch()).await;
    let mut transform =
        TransformColumns::new(vec!["valor_compra".to_string(), "score_3".to_string()]);
    transform.fit(&df, None).await?;
    let batch = collect(transform.transform(df).await?).await;

    assert_eq!(
        column_names(&batch),
        vec!["score_6", "log_valor_compra", "log_score_3"]
    );
    let log_valor = f64_column(&batch, "log_valor_compra");
    assert_relative_eq!(log_valor[0].unwrap(), 0.0);
    assert_relative_eq!(log_valor[1].unwrap(), 1.0, epsilon = 1e-12);
    // Below the domain of log1p, and missing input.
    assert_eq!(log_valor[2], None);
    assert_eq!(log_valor[3], None);

    let log_score = f64_column(&batch, "log_score_3");
    assert_relative_eq!(log_score[0].unwrap(), 10f64.ln(), epsilon = 1e-12);
    Ok(())
}

#[tokio::test]
async fn test_optional_cube_root_columns() -> PipelineResult<()> {
    let df = mem_df(amounts_batch()).await;
    let transform = TransformColumns::new(vec!["valor_compra".to_string()])
        .with_cbrt_columns(vec!["score_6".to_string()]);
    let batch = collect(transform.transform(df).await?).await;

    assert_eq!(
        column_names(&batch),
        vec!["score_3", "log_valor_compra", "cbrt_score_6"]
    );
    let cbrt = f64_column(&batch, "cbrt_score_6");
    assert_relative_eq!(cbrt[0].unwrap(), 3.0, epsilon = 1e-12);
    assert_relative_eq!(cbrt[1].unwrap(), -2.0, epsilon = 1e-12);
    assert_eq!(cbrt[3], None);
    Ok(())
}

#[tokio::test]
async fn test_missing_column_is_reported() {
    let df = mem_df(amounts_batch()).await;
    let transform = TransformColumns::new(vec!["score_99".to_string()]);
    let err = transform.transform(df).await.unwrap_err();
    assert!(matches!(err, PipelineError::MissingColumn(_)));
}

#[tokio::test]
async fn test_coerce_numeric_degrades_unparseable_values() -> PipelineResult<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("n", DataType::Int64, true),
        Field::new("s", DataType::Utf8, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(vec![Some(1), Some(2), Some(3)])),
        Arc::new(StringArray::from(vec![Some("1.5"), Some("abc"), None])),
    ];
    let df = mem_df(RecordBatch::try_new(schema, columns).unwrap()).await;
    let batch = collect(coerce_numeric(df)?).await;

    assert_eq!(i64_column(&batch, "n"), vec![Some(1), Some(2), Some(3)]);
    assert_eq!(f64_column(&batch, "s"), vec![Some(1.5), None, None]);
    Ok(())
}
