//! ## Document Delivery Flags
//!
//! [`DocumentsProcessor`] normalizes the `entrega_doc_*` columns into 0/1 integers.

use crate::dataset::Target;
use crate::exceptions::{PipelineError, PipelineResult};
use crate::impl_processor;
use crate::processors::{data_type_of, is_text, validate_columns};
use datafusion::arrow::datatypes::DataType;
use datafusion::logical_expr::{cast, ident, lit, Case as DFCase, Expr};
use datafusion::prelude::DataFrame;
use serde::{Deserialize, Serialize};

/// Maps `"Y"` to 1 and anything else (including missing) to 0.
///
/// Columns that are already numeric keep 1 as 1 and turn everything else into 0, so applying the
/// processor twice gives the same result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentsProcessor {
    pub columns: Vec<String>,
}

impl DocumentsProcessor {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub async fn fit(&mut self, df: &DataFrame, _target: Option<&Target>) -> PipelineResult<()> {
        validate_columns(df, &self.columns)
    }

    fn flag_expr(col_name: &str, dt: &DataType) -> Expr {
        let delivered = if is_text(dt) {
            cast(ident(col_name), DataType::Utf8).eq(lit("Y"))
        } else {
            cast(ident(col_name), DataType::Float64).eq(lit(1.0_f64))
        };
        Expr::Case(DFCase {
            expr: None,
            when_then_expr: vec![(Box::new(delivered), Box::new(lit(1_i64)))],
            else_expr: Some(Box::new(lit(0_i64))),
        })
    }

    pub async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        validate_columns(&df, &self.columns)?;
        let mut exprs = Vec::with_capacity(df.schema().fields().len());
        for field in df.schema().fields() {
            let name = field.name();
            if self.columns.contains(name) {
                let dt = data_type_of(&df, name)?;
                exprs.push(Self::flag_expr(name, &dt).alias(name));
            } else {
                exprs.push(ident(name));
            }
        }
        df.select(exprs).map_err(PipelineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_processor!(DocumentsProcessor);
