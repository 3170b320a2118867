//! ## Imputation of Missing Scores
//!
//! [`ImputeValuesProcessor`] fills missing values in two groups of numeric columns, using
//! statistics learned from the training data only:
//!
//! - **discrete** columns get the training mode. Ties are broken by taking the lowest value, so
//!   the mode of `[1, 1, 2, 2]` is `1`.
//! - **continuous** columns get the training median (or mean, see [`ImputeStrategy`]).
//!
//! Imputed columns are emitted as Float64 in their original position. Every other column passes
//! through unchanged, including non-numeric ones.

use crate::dataset::Target;
use crate::exceptions::{PipelineError, PipelineResult};
use crate::impl_processor;
use crate::processors::validate_columns;
pub use crate::settings::ImputeStrategy;
use datafusion::arrow::datatypes::DataType;
use datafusion::functions_aggregate::expr_fn::{avg, count, median};
use datafusion::logical_expr::{cast, ident, lit, not, Case as DFCase, Expr};
use datafusion::prelude::DataFrame;
use datafusion::scalar::ScalarValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Constructs an expression equivalent to SQL COALESCE(col, fallback), cast to Float64.
fn coalesce_expr_for(name: &str, fallback: f64) -> Expr {
    let value = cast(ident(name), DataType::Float64);
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(Box::new(not(value.clone().is_null())), Box::new(value))],
        else_expr: Some(Box::new(lit(fallback))),
    })
}

/// Reads the single Float64 produced by a one-row aggregate.
async fn scalar_f64(df: DataFrame, col_name: &str, what: &str) -> PipelineResult<f64> {
    let batches = df.collect().await?;
    let batch = batches
        .iter()
        .find(|b| b.num_rows() > 0)
        .ok_or_else(|| no_values(col_name, what))?;
    match ScalarValue::try_from_array(batch.column(0), 0)? {
        ScalarValue::Float64(Some(v)) => Ok(v),
        _ => Err(no_values(col_name, what)),
    }
}

fn no_values(col_name: &str, what: &str) -> PipelineError {
    PipelineError::InvalidParameter(format!(
        "Cannot compute the {} of column '{}': it has no non-missing values",
        what, col_name
    ))
}

/// Statistics learned at fit time: the fill value of each declared column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputeState {
    pub impute_values: BTreeMap<String, f64>,
}

/// Fills missing discrete values with the training mode and continuous ones with the training
/// median (or mean).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputeValuesProcessor {
    pub discrete_columns: Vec<String>,
    pub continuous_columns: Vec<String>,
    pub strategy: ImputeStrategy,
    pub state: Option<ImputeState>,
}

impl ImputeValuesProcessor {
    /// Create a new imputer for the given columns, using the median for continuous columns.
    pub fn new(discrete_columns: Vec<String>, continuous_columns: Vec<String>) -> Self {
        Self::with_strategy(discrete_columns, continuous_columns, ImputeStrategy::Median)
    }

    pub fn with_strategy(
        discrete_columns: Vec<String>,
        continuous_columns: Vec<String>,
        strategy: ImputeStrategy,
    ) -> Self {
        Self {
            discrete_columns,
            continuous_columns,
            strategy,
            state: None,
        }
    }

    fn declared_columns(&self) -> Vec<String> {
        self.discrete_columns
            .iter()
            .chain(self.continuous_columns.iter())
            .cloned()
            .collect()
    }

    /// Most frequent non-missing value; ties go to the lowest value.
    async fn compute_mode(df: &DataFrame, col_name: &str) -> PipelineResult<f64> {
        let grouped = df
            .clone()
            .select(vec![cast(ident(col_name), DataType::Float64).alias(col_name)])?
            .filter(ident(col_name).is_not_null())?
            .aggregate(vec![ident(col_name)], vec![count(lit(1)).alias("cnt")])?
            .sort(vec![
                ident("cnt").sort(false, false),
                ident(col_name).sort(true, false),
            ])?
            .limit(0, Some(1))?;
        scalar_f64(grouped, col_name, "mode").await
    }

    async fn compute_center(&self, df: &DataFrame, col_name: &str) -> PipelineResult<f64> {
        let value = cast(ident(col_name), DataType::Float64);
        let (aggregate, what) = match self.strategy {
            ImputeStrategy::Median => (median(value), "median"),
            ImputeStrategy::Mean => (avg(value), "mean"),
        };
        let agg_df = df
            .clone()
            .aggregate(vec![], vec![aggregate.alias("center")])?;
        scalar_f64(agg_df, col_name, what).await
    }

    /// Learns the fill value of each declared column.
    pub async fn fit(&mut self, df: &DataFrame, _target: Option<&Target>) -> PipelineResult<()> {
        validate_columns(df, &self.declared_columns())?;
        let mut impute_values = BTreeMap::new();
        for col_name in &self.discrete_columns {
            let mode = Self::compute_mode(df, col_name).await?;
            impute_values.insert(col_name.clone(), mode);
        }
        for col_name in &self.continuous_columns {
            let center = self.compute_center(df, col_name).await?;
            impute_values.insert(col_name.clone(), center);
        }
        self.state = Some(ImputeState { impute_values });
        Ok(())
    }

    /// Returns a new DataFrame where missing values of each declared column are replaced with
    /// the learned statistic.
    pub async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| PipelineError::NotFitted("ImputeValuesProcessor".to_string()))?;
        validate_columns(&df, &self.declared_columns())?;
        let exprs: Vec<Expr> = df
            .schema()
            .fields()
            .iter()
            .map(|field| {
                let name = field.name();
                match state.impute_values.get(name) {
                    Some(&fallback) => coalesce_expr_for(name, fallback).alias(name),
                    None => ident(name),
                }
            })
            .collect();
        df.select(exprs).map_err(PipelineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_processor!(ImputeValuesProcessor);
