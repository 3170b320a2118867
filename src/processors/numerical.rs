//! ## Numerical Re-expressions
//!
//! - [`TransformColumns`]: log1p (and optionally cube-root) of skewed continuous columns.
//! - [`coerce_numeric`]: final coercion of any residual non-numeric column.

use crate::dataset::Target;
use crate::exceptions::{PipelineError, PipelineResult};
use crate::impl_processor;
use crate::processors::{columns_except, validate_columns};
use datafusion::arrow::datatypes::DataType;
use datafusion::prelude::DataFrame;
use datafusion_expr::{cast, ident, lit, try_cast, Case as DFCase, Expr};
use datafusion_functions::math;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Wrapper function wrapping math's natural logarithm UDF.
fn ln_expr(e: Expr) -> Expr {
    math::ln().call(vec![e])
}

/// Wrapper function wrapping math's cube root UDF.
fn cbrt_expr(e: Expr) -> Expr {
    math::cbrt().call(vec![e])
}

/// `ln(1 + x)` for `x >= -1`, missing otherwise.
fn log1p_expr(col_name: &str) -> Expr {
    let value = cast(ident(col_name), DataType::Float64);
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(
            Box::new(value.clone().gt_eq(lit(-1.0_f64))),
            Box::new(ln_expr(value + lit(1.0_f64))),
        )],
        else_expr: None,
    })
}

/// Replaces each configured column by its re-expression.
///
/// Every column of `log_columns` becomes `log_{column}` and every column of `cbrt_columns`
/// becomes `cbrt_{column}`. The new columns are appended, the originals dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformColumns {
    pub log_columns: Vec<String>,
    pub cbrt_columns: Vec<String>,
}

impl TransformColumns {
    pub fn new(log_columns: Vec<String>) -> Self {
        Self {
            log_columns,
            cbrt_columns: Vec::new(),
        }
    }

    pub fn with_cbrt_columns(mut self, cbrt_columns: Vec<String>) -> Self {
        self.cbrt_columns = cbrt_columns;
        self
    }

    fn all_columns(&self) -> Vec<String> {
        let mut columns = self.log_columns.clone();
        for c in &self.cbrt_columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
        columns
    }

    pub async fn fit(&mut self, df: &DataFrame, _target: Option<&Target>) -> PipelineResult<()> {
        validate_columns(df, &self.all_columns())
    }

    pub async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        let columns = self.all_columns();
        validate_columns(&df, &columns)?;
        let mut exprs = columns_except(&df, &columns);
        for c in &self.log_columns {
            exprs.push(log1p_expr(c).alias(format!("log_{}", c)));
        }
        for c in &self.cbrt_columns {
            exprs.push(cbrt_expr(cast(ident(c), DataType::Float64)).alias(format!("cbrt_{}", c)));
        }
        df.select(exprs).map_err(PipelineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_processor!(TransformColumns);

/// Casts every non-numeric column to Float64. Values that do not parse become missing.
pub fn coerce_numeric(df: DataFrame) -> PipelineResult<DataFrame> {
    let mut coerced = Vec::new();
    let exprs: Vec<Expr> = df
        .schema()
        .fields()
        .iter()
        .map(|field| {
            let name = field.name();
            if field.data_type().is_numeric() {
                ident(name)
            } else {
                coerced.push(name.clone());
                try_cast(ident(name), DataType::Float64).alias(name)
            }
        })
        .collect();
    if !coerced.is_empty() {
        debug!("Coerced non-numeric columns to Float64: {:?}", coerced);
    }
    df.select(exprs).map_err(PipelineError::from)
}
