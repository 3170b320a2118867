mod shared;

use arrow::array::{Array, Int64Array};
use arrow::record_batch::RecordBatch;
use fraud_pipeline::dataset::{FieldValue, Record, Target};
use fraud_pipeline::exceptions::{PipelineError, PipelineResult};
use fraud_pipeline::pipeline::Pipeline;
use fraud_pipeline::prediction::{Prediction, PredictionPipeline, Scorer};
use fraud_pipeline::settings::PipelineConfig;
use fraud_pipeline::transformation::build_pipeline;
use shared::{column_names, mem_df, raw_feature_batch, raw_labels, TARGET};

/// Flags late-night purchases.
struct NightOwlScorer;

impl Scorer for NightOwlScorer {
    fn score(&self, features: &RecordBatch) -> PipelineResult<Vec<Prediction>> {
        let idx = features.schema().index_of("hora_compra")?;
        let hours = features
            .column(idx)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| PipelineError::InvalidParameter("hora_compra".to_string()))?;
        Ok((0..hours.len())
            .map(|i| {
                if hours.value(i) >= 22 {
                    Prediction { label: 1, probability: 0.9 }
                } else {
                    Prediction { label: 0, probability: 0.1 }
                }
            })
            .collect())
    }
}

async fn fitted_pipeline() -> Pipeline {
    let df = mem_df(raw_feature_batch(32)).await;
    let target = Target::new(TARGET, raw_labels(32)).unwrap();
    let mut pipeline = build_pipeline(&PipelineConfig::default());
    pipeline.fit(&df, Some(&target)).await.unwrap();
    pipeline
}

fn full_record() -> Record {
    let mut record = Record::new();
    for (i, name) in ["score_2", "score_3", "score_4", "score_5", "score_6"].iter().enumerate() {
        record.insert(name.to_string(), FieldValue::Float(i as f64 + 0.5));
    }
    record.insert("score_1".into(), FieldValue::Int(2));
    record.insert("score_7".into(), FieldValue::Text("3".into()));
    record.insert("score_8".into(), FieldValue::Float(0.5));
    record.insert("score_9".into(), FieldValue::Float(12.0));
    record.insert("score_10".into(), FieldValue::Null);
    record.insert("score_fraude_modelo".into(), FieldValue::Int(50));
    record.insert("valor_compra".into(), FieldValue::Float(99.9));
    record.insert("pais".into(), FieldValue::Text("BR".into()));
    record.insert("produto".into(), FieldValue::Text("Celular".into()));
    record.insert("categoria_produto".into(), FieldValue::Text("cat_a".into()));
    record.insert("data_compra".into(), FieldValue::Text("2025-01-03 23:45:00".into()));
    record.insert("entrega_doc_1".into(), FieldValue::Text("Y".into()));
    record.insert("entrega_doc_2".into(), FieldValue::Text("N".into()));
    record
}

#[tokio::test]
async fn test_predict_single_record() -> PipelineResult<()> {
    let serving = PredictionPipeline::new(fitted_pipeline().await, NightOwlScorer)?;

    let features = serving.transform_record(&full_record()).await?;
    assert_eq!(features.num_rows(), 1);
    assert_eq!(
        column_names(&features).as_slice(),
        serving.pipeline().output_columns().unwrap()
    );

    let prediction = serving.predict(&full_record()).await?;
    assert_eq!(prediction, Prediction { label: 1, probability: 0.9 });
    Ok(())
}

#[tokio::test]
async fn test_sparse_record_is_imputed() -> PipelineResult<()> {
    let serving = PredictionPipeline::new(fitted_pipeline().await, NightOwlScorer)?;
    let mut record = Record::new();
    record.insert("data_compra".into(), FieldValue::Text("2025-01-03 10:00:00".into()));

    let features = serving.transform_record(&record).await?;
    for column in features.columns() {
        assert_eq!(column.null_count(), 0);
    }
    let prediction = serving.predict(&record).await?;
    assert_eq!(prediction.label, 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_field_is_ignored() -> PipelineResult<()> {
    let serving = PredictionPipeline::new(fitted_pipeline().await, NightOwlScorer)?;
    let expected = serving.transform_record(&full_record()).await?;

    let mut record = full_record();
    record.insert("cvv".into(), FieldValue::Int(123));
    let features = serving.transform_record(&record).await?;
    assert_eq!(column_names(&features), column_names(&expected));
    assert_eq!(features, expected);

    let prediction = serving.predict(&record).await?;
    assert_eq!(prediction, Prediction { label: 1, probability: 0.9 });
    Ok(())
}

#[tokio::test]
async fn test_unfitted_pipeline_is_refused() {
    let pipeline = build_pipeline(&PipelineConfig::default());
    let result = PredictionPipeline::new(pipeline, NightOwlScorer);
    assert!(matches!(result, Err(PipelineError::NotFitted(_))));
}

#[tokio::test]
async fn test_load_from_saved_artifact() -> PipelineResult<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pipeline.bin");
    fitted_pipeline().await.save(&path)?;

    let serving = PredictionPipeline::load(&path, NightOwlScorer)?;
    let prediction = serving.predict(&full_record()).await?;
    assert_eq!(prediction.label, 1);
    Ok(())
}
