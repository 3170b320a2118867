//! # Categorical Encoding Processors
//!
//! This module provides the processors that turn categorical columns into numeric features:
//!
//! - **OneHotEncoderProcessor:** Expands each configured column into one 0/1 column per category
//!   seen in training. Unseen categories encode as all zeros.
//! - **NonFrequentAggregator:** Collapses categories seen at most `threshold` times in training
//!   into a single `"Other"` bucket.
//! - **TargetEncoderTransformer:** Replaces each category with the fraud rate observed for it in
//!   training, falling back to the overall rate for categories it has never seen.
//!
//! Categories are compared as text, whatever the column's type, so the same vocabulary works on
//! a training set read from CSV and on a serving record built from typed values.

use crate::dataset::{int_values, string_values, Target};
use crate::exceptions::{PipelineError, PipelineResult};
use crate::impl_processor;
use crate::processors::{columns_except, validate_columns};
use datafusion::arrow::datatypes::DataType;
use datafusion::functions_aggregate::expr_fn::count;
use datafusion::logical_expr::{cast, ident, in_list, lit, Case as DFCase, Expr};
use datafusion::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Label given to the categories collapsed by [`NonFrequentAggregator`].
pub const OTHER_CATEGORY: &str = "Other";

/// The column rendered as text.
fn as_text(col_name: &str) -> Expr {
    cast(ident(col_name), DataType::Utf8)
}

/// Distinct non-missing values of a column, ordered by their original value and rendered as text.
async fn extract_distinct_values(df: &DataFrame, col_name: &str) -> PipelineResult<Vec<String>> {
    let distinct_df = df
        .clone()
        .select(vec![ident(col_name)])?
        .filter(ident(col_name).is_not_null())?
        .distinct()?
        .sort(vec![ident(col_name).sort(true, false)])?;
    let mut values = Vec::new();
    for batch in distinct_df.collect().await? {
        values.extend(string_values(batch.column(0))?.into_iter().flatten());
    }
    Ok(values)
}

/// Count of each non-missing category of a column.
async fn extract_count_mapping(
    df: &DataFrame,
    col_name: &str,
) -> PipelineResult<BTreeMap<String, u64>> {
    let grouped = df
        .clone()
        .select(vec![as_text(col_name).alias(col_name)])?
        .filter(ident(col_name).is_not_null())?
        .aggregate(vec![ident(col_name)], vec![count(lit(1)).alias("cnt")])?;
    let mut map = BTreeMap::new();
    for batch in grouped.collect().await? {
        let categories = string_values(batch.column(0))?;
        let counts = int_values(batch.column(1))?;
        for (category, cnt) in categories.into_iter().zip(counts) {
            if let (Some(category), Some(cnt)) = (category, cnt) {
                map.insert(category, cnt.max(0) as u64);
            }
        }
    }
    Ok(map)
}

/// Binary indicator of `col_name == value`, compared as text.
fn indicator_expr(col_name: &str, value: &str) -> Expr {
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(
            Box::new(as_text(col_name).eq(lit(value.to_string()))),
            Box::new(lit(1_i64)),
        )],
        else_expr: Some(Box::new(lit(0_i64))),
    })
}

/// ------------------------- OneHotEncoderProcessor -------------------------
///
/// Replaces each configured column by one Int64 column per category seen in training, named
/// `"{column}_{category}"`. Output columns are appended in configured-column order, then in
/// category order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoderProcessor {
    pub columns: Vec<String>,
    /// Vocabulary of each column, learned at fit.
    pub categories: Option<BTreeMap<String, Vec<String>>>,
}

impl OneHotEncoderProcessor {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            categories: None,
        }
    }

    /// Learn the distinct categories of each configured column.
    pub async fn fit(&mut self, df: &DataFrame, _target: Option<&Target>) -> PipelineResult<()> {
        validate_columns(df, &self.columns)?;
        let mut categories = BTreeMap::new();
        for col_name in &self.columns {
            let values = extract_distinct_values(df, col_name).await?;
            debug!("One-hot vocabulary of '{}': {:?}", col_name, values);
            categories.insert(col_name.clone(), values);
        }
        self.categories = Some(categories);
        Ok(())
    }

    /// Names of the generated columns, in output order.
    pub fn output_columns(&self) -> PipelineResult<Vec<String>> {
        let categories = self.fitted()?;
        Ok(self
            .columns
            .iter()
            .flat_map(|c| {
                categories
                    .get(c)
                    .into_iter()
                    .flatten()
                    .map(move |v| format!("{}_{}", c, v))
            })
            .collect())
    }

    fn fitted(&self) -> PipelineResult<&BTreeMap<String, Vec<String>>> {
        self.categories
            .as_ref()
            .ok_or_else(|| PipelineError::NotFitted("OneHotEncoderProcessor".to_string()))
    }

    pub async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        let categories = self.fitted()?;
        validate_columns(&df, &self.columns)?;
        let mut exprs = columns_except(&df, &self.columns);
        for col_name in &self.columns {
            for value in categories.get(col_name).into_iter().flatten() {
                exprs.push(indicator_expr(col_name, value).alias(format!("{}_{}", col_name, value)));
            }
        }
        df.select(exprs).map_err(PipelineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_processor!(OneHotEncoderProcessor);

/// ------------------------- NonFrequentAggregator -------------------------
///
/// Keeps the categories of `column` seen strictly more than `threshold` times in training and
/// maps every other value (missing included) to [`OTHER_CATEGORY`]. The result is appended as
/// `"{column}_reduced"` and the original column is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonFrequentAggregator {
    pub column: String,
    pub threshold: u64,
    /// Categories kept as-is, learned at fit.
    pub valid_categories: Option<Vec<String>>,
}

impl NonFrequentAggregator {
    pub fn new(column: impl Into<String>, threshold: u64) -> Self {
        Self {
            column: column.into(),
            threshold,
            valid_categories: None,
        }
    }

    pub fn reduced_column(&self) -> String {
        format!("{}_reduced", self.column)
    }

    pub async fn fit(&mut self, df: &DataFrame, _target: Option<&Target>) -> PipelineResult<()> {
        validate_columns(df, &[self.column.clone()])?;
        let counts = extract_count_mapping(df, &self.column).await?;
        let valid: Vec<String> = counts
            .into_iter()
            .filter(|(_, cnt)| *cnt > self.threshold)
            .map(|(category, _)| category)
            .collect();
        debug!(
            "Kept {} frequent categories of '{}'",
            valid.len(),
            self.column
        );
        self.valid_categories = Some(valid);
        Ok(())
    }

    pub async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        let valid = self
            .valid_categories
            .as_ref()
            .ok_or_else(|| PipelineError::NotFitted("NonFrequentAggregator".to_string()))?;
        validate_columns(&df, &[self.column.clone()])?;
        let reduced = if valid.is_empty() {
            lit(OTHER_CATEGORY)
        } else {
            let list: Vec<Expr> = valid.iter().map(|v| lit(v.clone())).collect();
            Expr::Case(DFCase {
                expr: None,
                when_then_expr: vec![(
                    Box::new(in_list(as_text(&self.column), list, false)),
                    Box::new(as_text(&self.column)),
                )],
                else_expr: Some(Box::new(lit(OTHER_CATEGORY))),
            })
        };
        let mut exprs = columns_except(&df, &[self.column.clone()]);
        exprs.push(reduced.alias(self.reduced_column()));
        df.select(exprs).map_err(PipelineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_processor!(NonFrequentAggregator);

/// Encoding table learned by [`TargetEncoderTransformer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEncoding {
    pub rates: BTreeMap<String, f64>,
    /// Overall fraud rate of the training data.
    pub prior: f64,
}

/// ------------------------- TargetEncoderTransformer -------------------------
///
/// Replaces `column` in place with the (optionally smoothed) fraud rate of each category:
/// `(sum + m * prior) / (count + m)`, where `m` is `smoothing`. Missing and unseen categories
/// get the prior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEncoderTransformer {
    pub column: String,
    pub smoothing: f64,
    pub encoding: Option<TargetEncoding>,
}

impl TargetEncoderTransformer {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            smoothing: 0.0,
            encoding: None,
        }
    }

    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Learns the rate of each category from the training labels.
    pub async fn fit(&mut self, df: &DataFrame, target: Option<&Target>) -> PipelineResult<()> {
        let target = target.ok_or_else(|| {
            PipelineError::InvalidParameter(
                "TargetEncoderTransformer requires the training target".to_string(),
            )
        })?;
        if self.smoothing.is_nan() || self.smoothing < 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "Smoothing must be non-negative, got {}",
                self.smoothing
            )));
        }
        validate_columns(df, &[self.column.clone()])?;
        let prior = target.mean().ok_or_else(|| {
            PipelineError::InvalidParameter("Cannot fit on an empty target".to_string())
        })?;

        let mut categories = Vec::with_capacity(target.len());
        for batch in df.clone().select(vec![as_text(&self.column)])?.collect().await? {
            categories.extend(string_values(batch.column(0))?);
        }
        if categories.len() != target.len() {
            return Err(PipelineError::InvalidParameter(format!(
                "Target '{}' has {} labels but the data has {} rows",
                target.name(),
                target.len(),
                categories.len()
            )));
        }

        let mut stats: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        for (category, label) in categories.into_iter().zip(target.values()) {
            if let Some(category) = category {
                let entry = stats.entry(category).or_insert((0.0, 0.0));
                entry.0 += *label as f64;
                entry.1 += 1.0;
            }
        }
        let m = self.smoothing;
        let rates = stats
            .into_iter()
            .map(|(category, (sum, cnt))| (category, (sum + m * prior) / (cnt + m)))
            .collect();
        self.encoding = Some(TargetEncoding { rates, prior });
        Ok(())
    }

    pub async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        let encoding = self
            .encoding
            .as_ref()
            .ok_or_else(|| PipelineError::NotFitted("TargetEncoderTransformer".to_string()))?;
        validate_columns(&df, &[self.column.clone()])?;
        let encoded = if encoding.rates.is_empty() {
            lit(encoding.prior)
        } else {
            Expr::Case(DFCase {
                expr: Some(Box::new(as_text(&self.column))),
                when_then_expr: encoding
                    .rates
                    .iter()
                    .map(|(category, rate)| (Box::new(lit(category.clone())), Box::new(lit(*rate))))
                    .collect(),
                else_expr: Some(Box::new(lit(encoding.prior))),
            })
        };
        let exprs: Vec<Expr> = df
            .schema()
            .fields()
            .iter()
            .map(|field| {
                let name = field.name();
                if *name == self.column {
                    encoded.clone().alias(name)
                } else {
                    ident(name)
                }
            })
            .collect();
        df.select(exprs).map_err(PipelineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }
}

impl_processor!(TargetEncoderTransformer);
