//! ## Pipeline Settings
//!
//! Typed configuration for the feature pipeline and the preprocessing run.
//!
//! Configuration only names *which* columns each processor works on and how; it never holds
//! anything learned from data. Fitted statistics live in each processor's own state so the two
//! can be inspected, compared and serialized independently.
//!
//! The [`Default`] implementations describe the credit-card transaction dataset: scores
//! `score_1`..`score_10`, the purchase amount `valor_compra`, the country `pais`, the product
//! and its category, the purchase timestamp `data_compra` and three document-delivery flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Strategy used to fill missing values in continuous columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImputeStrategy {
    Mean,
    #[default]
    Median,
}

/// Where the country processor takes the replacement for a missing country code from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CountryImputation {
    /// Most frequent code of the data passed to each `transform` call.
    #[default]
    CallTime,
    /// Most frequent code of the training data, frozen at `fit`.
    FitTime,
}

/// Per-processor column lists and knobs for the feature pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub drop_columns: Vec<String>,
    pub discrete_columns: Vec<String>,
    pub continuous_columns: Vec<String>,
    pub continuous_strategy: ImputeStrategy,
    pub document_columns: Vec<String>,
    pub country_column: String,
    pub continent_column: String,
    pub country_imputation: CountryImputation,
    pub unknown_continent: String,
    pub date_column: String,
    pub one_hot_columns: Vec<String>,
    pub log_columns: Vec<String>,
    pub cbrt_columns: Vec<String>,
    pub rare_category_column: String,
    pub rare_threshold: u64,
    /// Column replaced by its target rate. This is the output of the rare-category aggregation.
    pub target_encoded_column: String,
    pub target_smoothing: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            drop_columns: strings(&["score_fraude_modelo", "produto", "score_8"]),
            discrete_columns: strings(&["score_4", "score_7"]),
            continuous_columns: strings(&[
                "score_2",
                "score_3",
                "score_5",
                "score_6",
                "score_9",
                "score_10",
                "valor_compra",
            ]),
            continuous_strategy: ImputeStrategy::Median,
            document_columns: strings(&["entrega_doc_1", "entrega_doc_2", "entrega_doc_3"]),
            country_column: "pais".to_string(),
            continent_column: "continente".to_string(),
            country_imputation: CountryImputation::CallTime,
            unknown_continent: "unknown".to_string(),
            date_column: "data_compra".to_string(),
            one_hot_columns: strings(&["score_1", "continente"]),
            log_columns: strings(&["score_3", "valor_compra"]),
            cbrt_columns: Vec::new(),
            rare_category_column: "categoria_produto".to_string(),
            rare_threshold: 2,
            target_encoded_column: "categoria_produto_reduced".to_string(),
            target_smoothing: 0.0,
        }
    }
}

/// Drops rows whose value in `column` is strictly above `ceiling`. Missing values are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierRule {
    pub column: String,
    pub ceiling: f64,
}

/// Settings for one preprocessing run of [`DataTransformation`](crate::transformation::DataTransformation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationConfig {
    /// Raw transactions, CSV or Parquet (detected by extension).
    pub raw_data_path: PathBuf,
    /// Directory receiving the split datasets, the transformed datasets and the fitted pipeline.
    pub artifacts_dir: PathBuf,
    pub target_column: String,
    pub test_ratio: f64,
    pub seed: u64,
    pub outlier_rules: Vec<OutlierRule>,
    pub pipeline: PipelineConfig,
}

impl TransformationConfig {
    pub fn new(raw_data_path: impl Into<PathBuf>, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_data_path: raw_data_path.into(),
            artifacts_dir: artifacts_dir.into(),
            target_column: "fraude".to_string(),
            test_ratio: 0.2,
            seed: 42,
            outlier_rules: vec![
                OutlierRule {
                    column: "score_6".to_string(),
                    ceiling: 800.0,
                },
                OutlierRule {
                    column: "score_9".to_string(),
                    ceiling: 800.0,
                },
            ],
            pipeline: PipelineConfig::default(),
        }
    }

    /// Path of the serialized fitted pipeline inside the artifact directory.
    pub fn pipeline_path(&self) -> PathBuf {
        self.artifacts_dir.join(crate::transformation::PIPELINE_FILE)
    }
}
