//! ## Single-Record Prediction
//!
//! The serving path: a fitted [`Pipeline`] loaded once, applied to one raw [`Record`] at a time,
//! and a [`Scorer`] turning the resulting feature row into a [`Prediction`].
//!
//! ```rust,no_run
//! use fraud_pipeline::dataset::{FieldValue, Record};
//! use fraud_pipeline::exceptions::PipelineResult;
//! use fraud_pipeline::prediction::{Prediction, PredictionPipeline, Scorer};
//! use arrow::record_batch::RecordBatch;
//!
//! struct AlwaysLegit;
//!
//! impl Scorer for AlwaysLegit {
//!     fn score(&self, _features: &RecordBatch) -> PipelineResult<Vec<Prediction>> {
//!         Ok(vec![Prediction { label: 0, probability: 0.0 }])
//!     }
//! }
//!
//! # async fn run() -> PipelineResult<()> {
//! let serving = PredictionPipeline::load("artifacts/pipeline.bin", AlwaysLegit)?;
//! let mut record = Record::new();
//! record.insert("pais".into(), FieldValue::Text("BR".into()));
//! let prediction = serving.predict(&record).await?;
//! # Ok(())
//! # }
//! ```

use crate::dataset::{collect_batch, raw_input_schema, record_to_batch, session_context, Record};
use crate::exceptions::{PipelineError, PipelineResult};
use crate::pipeline::Pipeline;
use crate::processors::numerical::coerce_numeric;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error};

/// Class label and fraud probability of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: i64,
    /// Probability of the fraud class.
    pub probability: f64,
}

/// A trained classifier. Opaque to this crate: it receives rows of the pipeline's output schema
/// and returns one prediction per row.
pub trait Scorer: Send + Sync {
    fn score(&self, features: &RecordBatch) -> PipelineResult<Vec<Prediction>>;
}

/// A fitted pipeline and a scorer, loaded once and reused for every request.
pub struct PredictionPipeline<S: Scorer> {
    pipeline: Pipeline,
    scorer: S,
}

impl<S: Scorer> PredictionPipeline<S> {
    /// Wraps a fitted pipeline. An unfitted one is refused.
    pub fn new(pipeline: Pipeline, scorer: S) -> PipelineResult<Self> {
        if !pipeline.is_fitted() {
            error!("Refusing to serve with a pipeline that was never fitted");
            return Err(PipelineError::NotFitted("Pipeline".to_string()));
        }
        Ok(Self { pipeline, scorer })
    }

    /// Loads the pipeline persisted by the preprocessing run.
    pub fn load(path: impl AsRef<Path>, scorer: S) -> PipelineResult<Self> {
        Self::new(Pipeline::load(path.as_ref())?, scorer)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Applies the fitted pipeline to one raw record and returns its feature row.
    pub async fn transform_record(&self, record: &Record) -> PipelineResult<RecordBatch> {
        let batch = record_to_batch(record, raw_input_schema())?;
        let ctx = session_context();
        let df = self.pipeline.transform(ctx.read_batch(batch)?).await?;
        let features = collect_batch(coerce_numeric(df)?).await?;
        debug!("Transformed record into {} features", features.num_columns());
        Ok(features)
    }

    /// Scores one raw record.
    pub async fn predict(&self, record: &Record) -> PipelineResult<Prediction> {
        let features = self.transform_record(record).await?;
        self.scorer
            .score(&features)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                PipelineError::InvalidParameter("Scorer returned no prediction".to_string())
            })
    }
}
