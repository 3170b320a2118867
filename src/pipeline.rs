//! ## Feature Pipeline
//!
//! This module provides the core abstractions for fitting and applying the chain of processors
//! that turns raw transactions into the numeric feature vector expected by the scorer.
//!
//! ### Overview
//!
//! - The [`Processor`] trait is the capability every step implements: `fit` learns statistics from
//!   training data (identity by default, for stateless processors) and `transform` applies them.
//! - The [`Pipeline`] struct chains named processors. It has two states, unfit and fitted: `fit`
//!   (or `fit_transform`) is the only transition, after which `transform` may be called any number
//!   of times without touching processor state.
//! - [`ProcessorSnapshot`] and [`PipelineArtifact`] make a fitted pipeline persistable, so the
//!   serving path replays exactly the statistics learned at training time.
//! - Macros [`crate::impl_processor`] and [`crate::make_pipeline`] cut the boilerplate of
//!   implementing processors and assembling pipelines.

use crate::dataset::{column_names, Target};
use crate::exceptions::{PipelineError, PipelineResult};
use crate::processors::categorical_encoding::{
    NonFrequentAggregator, OneHotEncoderProcessor, TargetEncoderTransformer,
};
use crate::processors::columns::DropColumns;
use crate::processors::country::CountryProcessor;
use crate::processors::datetime::DateProcessor;
use crate::processors::documents::DocumentsProcessor;
use crate::processors::imputation::ImputeValuesProcessor;
use crate::processors::numerical::TransformColumns;
use async_trait::async_trait;
use datafusion::logical_expr::{ident, Expr};
use datafusion::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Version of the persisted pipeline layout. Bump when processor state changes shape.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Trait for the steps of the feature pipeline.
///
/// `transform` must be pure given the processor's fitted state: no hidden global state, no
/// randomness and no scratch state mutated per call, which makes a fitted processor safe to share
/// between concurrent serving requests.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Learn whatever the processor needs from the training data.
    ///
    /// `target` carries the training labels aligned with `df` by row index; only target-aware
    /// processors read it. The default implementation learns nothing.
    async fn fit(&mut self, _df: &DataFrame, _target: Option<&Target>) -> PipelineResult<()> {
        Ok(())
    }

    /// Return a new DataFrame with the processor applied.
    ///
    /// Stateful processors return [`PipelineError::NotFitted`] when called before `fit`.
    async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame>;

    /// Returns true if the processor must be fitted before `transform` can be called.
    fn is_stateful(&self) -> bool;

    /// A serializable copy of the processor's configuration and fitted state.
    fn snapshot(&self) -> ProcessorSnapshot;
}

/// Macro to implement the [`Processor`] trait for the crate's processors.
///
/// The type must derive `Clone`, have a [`ProcessorSnapshot`] variant of the same name, and
/// provide inherent methods:
/// - `async fn fit(&mut self, &DataFrame, Option<&Target>) -> PipelineResult<()>`
/// - `async fn transform(&self, DataFrame) -> PipelineResult<DataFrame>`
/// - `fn inherent_is_stateful(&self) -> bool`
#[macro_export]
macro_rules! impl_processor {
    ($ty:ident) => {
        #[async_trait::async_trait]
        impl $crate::pipeline::Processor for $ty {
            async fn fit(
                &mut self,
                df: &datafusion::prelude::DataFrame,
                target: Option<&$crate::dataset::Target>,
            ) -> $crate::exceptions::PipelineResult<()> {
                <$ty>::fit(self, df, target).await
            }
            async fn transform(
                &self,
                df: datafusion::prelude::DataFrame,
            ) -> $crate::exceptions::PipelineResult<datafusion::prelude::DataFrame> {
                <$ty>::transform(self, df).await
            }
            fn is_stateful(&self) -> bool {
                <$ty>::inherent_is_stateful(self)
            }
            fn snapshot(&self) -> $crate::pipeline::ProcessorSnapshot {
                $crate::pipeline::ProcessorSnapshot::$ty(self.clone())
            }
        }
    };
}

/// Serializable form of every processor the crate provides, configuration and fitted state included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessorSnapshot {
    DropColumns(DropColumns),
    ImputeValuesProcessor(ImputeValuesProcessor),
    DocumentsProcessor(DocumentsProcessor),
    CountryProcessor(CountryProcessor),
    DateProcessor(DateProcessor),
    OneHotEncoderProcessor(OneHotEncoderProcessor),
    TransformColumns(TransformColumns),
    NonFrequentAggregator(NonFrequentAggregator),
    TargetEncoderTransformer(TargetEncoderTransformer),
}

impl ProcessorSnapshot {
    /// Rebuilds the live processor.
    pub fn into_processor(self) -> Box<dyn Processor> {
        match self {
            ProcessorSnapshot::DropColumns(p) => Box::new(p),
            ProcessorSnapshot::ImputeValuesProcessor(p) => Box::new(p),
            ProcessorSnapshot::DocumentsProcessor(p) => Box::new(p),
            ProcessorSnapshot::CountryProcessor(p) => Box::new(p),
            ProcessorSnapshot::DateProcessor(p) => Box::new(p),
            ProcessorSnapshot::OneHotEncoderProcessor(p) => Box::new(p),
            ProcessorSnapshot::TransformColumns(p) => Box::new(p),
            ProcessorSnapshot::NonFrequentAggregator(p) => Box::new(p),
            ProcessorSnapshot::TargetEncoderTransformer(p) => Box::new(p),
        }
    }
}

/// The persisted form of a [`Pipeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineArtifact {
    pub format_version: u32,
    pub steps: Vec<(String, ProcessorSnapshot)>,
    pub output_columns: Option<Vec<String>>,
}

/// An ordered chain of named processors.
///
/// Each processor's output (a new logical plan) is passed as input to the next one; nothing is
/// executed until the caller collects the final DataFrame, except for the statistics that `fit`
/// (and a few data-dependent transforms) materialize.
pub struct Pipeline {
    steps: Vec<(String, Box<dyn Processor>)>,
    output_columns: Option<Vec<String>>,
}

impl Pipeline {
    /// Creates a new, unfitted pipeline from (name, processor) pairs.
    pub fn new(steps: Vec<(String, Box<dyn Processor>)>) -> Self {
        Self {
            steps,
            output_columns: None,
        }
    }

    /// Names of the steps, in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// True once `fit` has completed successfully.
    pub fn is_fitted(&self) -> bool {
        self.output_columns.is_some()
    }

    /// Output columns recorded at fit time, in order.
    pub fn output_columns(&self) -> Option<&[String]> {
        self.output_columns.as_deref()
    }

    fn ensure_not_empty(&self) -> PipelineResult<()> {
        if self.steps.is_empty() {
            return Err(PipelineError::InvalidParameter(
                "Pipeline must have at least one processor.".to_string(),
            ));
        }
        Ok(())
    }

    /// Fits each processor in order on the output of the previous ones and returns the
    /// transformed training data.
    ///
    /// The first failing step aborts the fit; its error is returned tagged with the step's name.
    pub async fn fit(&mut self, df: &DataFrame, target: Option<&Target>) -> PipelineResult<DataFrame> {
        self.ensure_not_empty()?;
        self.output_columns = None;
        let mut current_df = df.clone();
        for (name, step) in self.steps.iter_mut() {
            let start = Instant::now();
            step.fit(&current_df, target)
                .await
                .map_err(|e| e.in_stage(name))?;
            current_df = step
                .transform(current_df)
                .await
                .map_err(|e| e.in_stage(name))?;
            debug!("Fitted step '{}' in {:?}", name, start.elapsed());
        }
        let columns = column_names(&current_df);
        info!("Pipeline fitted with {} output columns", columns.len());
        self.output_columns = Some(columns);
        Ok(current_df)
    }

    /// Convenience method matching the usual `fit_transform` naming.
    pub async fn fit_transform(
        &mut self,
        df: &DataFrame,
        target: Option<&Target>,
    ) -> PipelineResult<DataFrame> {
        self.fit(df, target).await
    }

    /// Applies every processor (without fitting) and projects the result onto the columns
    /// recorded at fit time, in the same order.
    pub async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        self.ensure_not_empty()?;
        let mut current_df = df;
        for (name, step) in self.steps.iter() {
            let start = Instant::now();
            current_df = step
                .transform(current_df)
                .await
                .map_err(|e| e.in_stage(name))?;
            debug!("Applied step '{}' in {:?}", name, start.elapsed());
        }
        match &self.output_columns {
            Some(expected) => align_columns(current_df, expected),
            None => Ok(current_df),
        }
    }

    /// Captures configuration and fitted state of every step.
    pub fn to_artifact(&self) -> PipelineArtifact {
        PipelineArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            steps: self
                .steps
                .iter()
                .map(|(name, step)| (name.clone(), step.snapshot()))
                .collect(),
            output_columns: self.output_columns.clone(),
        }
    }

    /// Rebuilds a pipeline from its persisted form.
    pub fn from_artifact(artifact: PipelineArtifact) -> PipelineResult<Self> {
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(PipelineError::Serialization(format!(
                "Unsupported pipeline artifact version {} (expected {})",
                artifact.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        Ok(Self {
            steps: artifact
                .steps
                .into_iter()
                .map(|(name, snapshot)| (name, snapshot.into_processor()))
                .collect(),
            output_columns: artifact.output_columns,
        })
    }

    /// Encodes the pipeline as an opaque binary blob.
    pub fn to_bytes(&self) -> PipelineResult<Vec<u8>> {
        Ok(bincode::serialize(&self.to_artifact())?)
    }

    /// Decodes a pipeline encoded with [`Pipeline::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> PipelineResult<Self> {
        let artifact: PipelineArtifact = bincode::deserialize(bytes)?;
        Self::from_artifact(artifact)
    }

    /// Writes the pipeline to `path`, replacing any previous file only once fully written.
    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        let bytes = self.to_bytes()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.persist(path).map_err(|e| PipelineError::IoError(e.error))?;
        info!("Saved pipeline ({} bytes) to {}", bytes.len(), path.display());
        Ok(())
    }

    /// Loads a pipeline written with [`Pipeline::save`].
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.step_names())
            .field("output_columns", &self.output_columns)
            .finish()
    }
}

/// Projects `df` onto `expected`, failing if any expected column is absent.
fn align_columns(df: DataFrame, expected: &[String]) -> PipelineResult<DataFrame> {
    let actual = column_names(&df);
    if let Some(missing) = expected.iter().find(|c| !actual.contains(c)) {
        return Err(PipelineError::MissingColumn(format!(
            "Column '{}' produced at fit time is missing from the transformed data",
            missing
        )));
    }
    let extra: Vec<&String> = actual.iter().filter(|c| !expected.contains(c)).collect();
    if !extra.is_empty() {
        warn!("Discarding columns not produced at fit time: {:?}", extra);
    }
    let exprs: Vec<Expr> = expected.iter().map(|name| ident(name)).collect();
    Ok(df.select(exprs)?)
}

/// Macro to simplify pipeline creation by automatically boxing processors.
///
/// # Example
///
/// ```rust,no_run
/// use fraud_pipeline::make_pipeline;
/// use fraud_pipeline::processors::columns::DropColumns;
///
/// let pipeline = make_pipeline!(
///     ("dropper", DropColumns::new(vec!["produto".to_string()])),
/// );
/// ```
#[macro_export]
macro_rules! make_pipeline {
    ($(($name:expr, $processor:expr)),+ $(,)?) => {
        {
            let steps: Vec<(String, Box<dyn $crate::pipeline::Processor>)> = vec![
                $(
                    ($name.to_string(), Box::new($processor)),
                )+
            ];
            $crate::pipeline::Pipeline::new(steps)
        }
    };
}
