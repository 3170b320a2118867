//! # Processor Implementations
//!
//! The submodules contain the processors of the fraud feature pipeline, in the order the default
//! pipeline runs them:
//!
//! 1. [`columns::DropColumns`]: drops non-predictive columns.
//! 2. [`imputation::ImputeValuesProcessor`]: fills missing scores with training mode/median.
//! 3. [`documents::DocumentsProcessor`]: turns document-delivery flags into 0/1.
//! 4. [`country::CountryProcessor`]: maps the country code to a continent code.
//! 5. [`datetime::DateProcessor`]: derives hour, weekday and daypart from the purchase time.
//! 6. [`categorical_encoding::OneHotEncoderProcessor`]: one-hot encodes low-cardinality columns.
//! 7. [`numerical::TransformColumns`]: log1p (and optional cube-root) re-expressions.
//! 8. [`categorical_encoding::NonFrequentAggregator`]: collapses rare categories into "Other".
//! 9. [`categorical_encoding::TargetEncoderTransformer`]: replaces categories by their fraud rate.

pub mod categorical_encoding;
pub mod columns;
pub mod country;
pub mod datetime;
pub mod documents;
pub mod imputation;
pub mod numerical;

use crate::exceptions::{PipelineError, PipelineResult};
use datafusion::arrow::datatypes::DataType;
use datafusion::logical_expr::{ident, Expr};
use datafusion::prelude::DataFrame;

/// Validates that every column in `target_cols` exists in the DataFrame.
pub(crate) fn validate_columns(df: &DataFrame, target_cols: &[String]) -> PipelineResult<()> {
    for col_name in target_cols {
        data_type_of(df, col_name)?;
    }
    Ok(())
}

/// Returns the type of a column, or a missing-column error.
pub(crate) fn data_type_of(df: &DataFrame, col_name: &str) -> PipelineResult<DataType> {
    df.schema()
        .field_with_unqualified_name(col_name)
        .map(|field| field.data_type().clone())
        .map_err(|_| PipelineError::MissingColumn(format!("Column '{}' not found", col_name)))
}

/// Expressions selecting every column of `df` except those listed in `dropped`, in order.
pub(crate) fn columns_except(df: &DataFrame, dropped: &[String]) -> Vec<Expr> {
    df.schema()
        .fields()
        .iter()
        .filter(|field| !dropped.contains(field.name()))
        .map(|field| ident(field.name()))
        .collect()
}

/// True for the Arrow string types.
pub(crate) fn is_text(dt: &DataType) -> bool {
    matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View)
}
