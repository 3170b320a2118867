//! ## Custom Errors for the Fraud Pipeline
//!
//! This module defines the error type shared by every processor, the pipeline and the
//! orchestration layer. It uses the `thiserror` crate to derive the `Error` trait.
//!
//! Processor failures surface unchanged from `Processor::fit`/`Processor::transform`; the
//! [`Pipeline`](crate::pipeline::Pipeline) wraps the first one it sees in
//! [`PipelineError::Stage`] so a failure can always be attributed to one named step.
//!
//! ### Example
//!
//! ```rust
//! use fraud_pipeline::exceptions::{PipelineError, PipelineResult};
//!
//! fn lookup(name: &str) -> PipelineResult<()> {
//!     Err(PipelineError::MissingColumn(format!("Column '{}' not found", name)))
//! }
//! ```

use thiserror::Error;

/// Errors raised while fitting, applying or persisting the feature pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Wraps underlying I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Wraps errors from DataFusion.
    #[error("DataFusion error: {0}")]
    DataFusionError(#[from] datafusion::error::DataFusionError),

    /// Wraps errors from Arrow.
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// An invalid parameter or an input that violates a processor's preconditions.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// An expected column is absent from the input dataset.
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// A stateful processor was asked to transform before being fitted.
    #[error("Processor '{0}' has not been fitted")]
    NotFitted(String),

    /// A value could not be parsed and the column does not allow degrading to a missing value.
    #[error("Failed to parse column '{column}' at row {row}: {value:?}")]
    Parse {
        column: String,
        row: usize,
        value: Option<String>,
    },

    /// The fitted pipeline artifact could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The first error raised by a pipeline step, tagged with the step's name.
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Tags this error with the pipeline step that produced it.
    pub fn in_stage(self, stage: &str) -> Self {
        PipelineError::Stage {
            stage: stage.to_string(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, looking through any stage tags.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<bincode::Error> for PipelineError {
    fn from(err: bincode::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

/// A convenient result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test io error");
        let err: PipelineError = io_err.into();
        let err_msg = format!("{}", err);
        assert!(err_msg.contains("I/O error:"));
        assert!(err_msg.contains("test io error"));
    }

    #[test]
    fn test_datafusion_error() {
        let df_err = datafusion::error::DataFusionError::Plan("test plan error".into());
        let err: PipelineError = df_err.into();
        let err_msg = format!("{}", err);
        assert!(err_msg.contains("DataFusion error:"));
        assert!(err_msg.contains("test plan error"));
    }

    #[test]
    fn test_arrow_error() {
        let arrow_err = arrow::error::ArrowError::ComputeError("test compute error".into());
        let err: PipelineError = arrow_err.into();
        assert!(format!("{}", err).contains("Arrow error:"));
    }

    #[test]
    fn test_not_fitted_names_processor() {
        let err = PipelineError::NotFitted("OneHotEncoderProcessor".into());
        assert_eq!(
            format!("{}", err),
            "Processor 'OneHotEncoderProcessor' has not been fitted"
        );
    }

    #[test]
    fn test_parse_error_identifies_record() {
        let err = PipelineError::Parse {
            column: "data_compra".into(),
            row: 3,
            value: Some("not a date".into()),
        };
        let err_msg = format!("{}", err);
        assert!(err_msg.contains("data_compra"));
        assert!(err_msg.contains("row 3"));
        assert!(err_msg.contains("not a date"));
    }

    #[test]
    fn test_stage_tag_and_root() {
        let err = PipelineError::NotFitted("ImputeValuesProcessor".into()).in_stage("imputer");
        let err_msg = format!("{}", err);
        assert!(err_msg.starts_with("Stage 'imputer' failed:"));
        assert!(matches!(err.root(), PipelineError::NotFitted(name) if name == "ImputeValuesProcessor"));
    }

    #[test]
    fn test_missing_column_error() {
        let err = PipelineError::MissingColumn("missing column".into());
        let err_msg = format!("{}", err);
        assert!(err_msg.contains("Missing column:"));
        assert!(err_msg.contains("missing column"));
    }
}
