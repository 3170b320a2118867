//! ## Column Removal
//!
//! - [`DropColumns`]: removes a fixed set of columns deemed non-predictive.

use crate::dataset::Target;
use crate::exceptions::{PipelineError, PipelineResult};
use crate::impl_processor;
use crate::processors::{columns_except, validate_columns};
use datafusion::prelude::DataFrame;
use serde::{Deserialize, Serialize};

/// Removes the configured columns from the DataFrame.
///
/// Every configured column must be present: a missing one is reported as
/// [`PipelineError::MissingColumn`] rather than silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropColumns {
    pub columns: Vec<String>,
}

impl DropColumns {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Stateless processor: fit only checks that the columns exist.
    pub async fn fit(&mut self, df: &DataFrame, _target: Option<&Target>) -> PipelineResult<()> {
        validate_columns(df, &self.columns)
    }

    pub async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        validate_columns(&df, &self.columns)?;
        let kept = columns_except(&df, &self.columns);
        if kept.is_empty() {
            return Err(PipelineError::InvalidParameter(
                "Dropping these columns would result in an empty DataFrame.".to_string(),
            ));
        }
        df.select(kept).map_err(PipelineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_processor!(DropColumns);
