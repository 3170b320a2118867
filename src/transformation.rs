//! ## Preprocessing Run
//!
//! [`DataTransformation`] turns the raw transaction file into the datasets the scorer is trained
//! and evaluated on, plus the fitted pipeline the serving path reuses. The steps, in order:
//!
//! 1. validate the raw header against the declared input schema and write `status.txt`;
//! 2. load the raw data and give every column its declared type;
//! 3. drop outlier rows;
//! 4. split into train and test partitions with a seeded shuffle;
//! 5. fit the pipeline on train and apply it to test;
//! 6. coerce residual non-numeric columns to numbers;
//! 7. persist the raw splits, the transformed splits and the fitted pipeline.
//!
//! Outputs, the status report included, are staged in a temporary directory next to the artifact
//! directory. Once every one of them has been written the staging directory replaces the artifact
//! directory as a whole, so readers see either the previous run or this one, never a mix. A run
//! that fails header validation publishes only its status report.

use crate::dataset::{
    collect_batch, column_names, conform_to_schema, int_values, load_data, raw_input_schema,
    raw_training_schema, session_context, write_csv, Target,
};
use crate::exceptions::{PipelineError, PipelineResult};
use crate::make_pipeline;
use crate::pipeline::Pipeline;
use crate::processors::categorical_encoding::{
    NonFrequentAggregator, OneHotEncoderProcessor, TargetEncoderTransformer,
};
use crate::processors::columns::DropColumns;
use crate::processors::country::CountryProcessor;
use crate::processors::datetime::DateProcessor;
use crate::processors::documents::DocumentsProcessor;
use crate::processors::imputation::ImputeValuesProcessor;
use crate::processors::numerical::{coerce_numeric, TransformColumns};
use crate::settings::{PipelineConfig, TransformationConfig};
use arrow::array::UInt64Array;
use arrow::compute::take_record_batch;
use arrow::record_batch::RecordBatch;
use datafusion::arrow::datatypes::DataType;
use datafusion::logical_expr::{cast, ident, lit, Expr};
use datafusion::prelude::{DataFrame, SessionContext};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// File name of the serialized fitted pipeline.
pub const PIPELINE_FILE: &str = "pipeline.bin";
/// File name of the column validation report.
pub const STATUS_FILE: &str = "status.txt";
pub const X_TRAIN_FILE: &str = "X_train.csv";
pub const X_TEST_FILE: &str = "X_test.csv";
pub const Y_TRAIN_FILE: &str = "y_train.csv";
pub const Y_TEST_FILE: &str = "y_test.csv";
pub const X_TRAIN_TRANSFORMED_FILE: &str = "X_train_transformed.csv";
pub const X_TEST_TRANSFORMED_FILE: &str = "X_test_transformed.csv";

/// Builds the unfitted feature pipeline:
/// dropper, imputer, docs, country, date, encoder, transform, aggregator, target_encoder.
pub fn build_pipeline(config: &PipelineConfig) -> Pipeline {
    make_pipeline!(
        ("dropper", DropColumns::new(config.drop_columns.clone())),
        (
            "imputer",
            ImputeValuesProcessor::with_strategy(
                config.discrete_columns.clone(),
                config.continuous_columns.clone(),
                config.continuous_strategy,
            )
        ),
        ("docs", DocumentsProcessor::new(config.document_columns.clone())),
        (
            "country",
            CountryProcessor::new(&config.country_column, &config.continent_column)
                .with_imputation(config.country_imputation)
                .with_unknown_continent(&config.unknown_continent)
        ),
        ("date", DateProcessor::new(&config.date_column)),
        ("encoder", OneHotEncoderProcessor::new(config.one_hot_columns.clone())),
        (
            "transform",
            TransformColumns::new(config.log_columns.clone())
                .with_cbrt_columns(config.cbrt_columns.clone())
        ),
        (
            "aggregator",
            NonFrequentAggregator::new(&config.rare_category_column, config.rare_threshold)
        ),
        (
            "target_encoder",
            TargetEncoderTransformer::new(&config.target_encoded_column)
                .with_smoothing(config.target_smoothing)
        ),
    )
}

/// Seeded permutation of `0..n` split into `(train, test)` row indices.
///
/// The test partition holds the first `ceil(test_ratio * n)` indices of the permutation.
pub fn split_indices(n: usize, test_ratio: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let n_test = ((test_ratio * n as f64).ceil() as usize).min(n);
    let train = indices.split_off(n_test);
    (train, indices)
}

/// Per-column validation status of a raw header, in header order.
pub fn column_statuses(header: &[String], target_column: &str) -> Vec<(String, bool)> {
    let schema = raw_input_schema();
    header
        .iter()
        .map(|c| {
            let known = c == target_column || schema.field_with_name(c).is_ok();
            (c.clone(), known)
        })
        .collect()
}

/// Features and labels of one side of the split.
pub type Partition = (RecordBatch, Target);

/// Summary of a completed run.
#[derive(Debug)]
pub struct TransformationReport {
    pub pipeline: Pipeline,
    pub rows_after_outliers: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub feature_columns: Vec<String>,
}

/// Orchestrates one preprocessing run.
pub struct DataTransformation {
    config: TransformationConfig,
}

impl DataTransformation {
    pub fn new(config: TransformationConfig) -> PipelineResult<Self> {
        if config.test_ratio.is_nan() || config.test_ratio <= 0.0 || config.test_ratio >= 1.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "test_ratio must be in (0, 1), got {}",
                config.test_ratio
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &TransformationConfig {
        &self.config
    }

    /// Compares the raw header with the declared schema and writes the status report to `dir`.
    ///
    /// Fails if the header has a column the schema does not declare, or lacks a declared one.
    pub fn validate_header(&self, header: &[String], dir: &Path) -> PipelineResult<()> {
        let statuses = column_statuses(header, &self.config.target_column);
        let report: String = statuses
            .iter()
            .map(|(c, ok)| format!("{} validation status: {}\n", c, ok))
            .collect();
        fs::write(dir.join(STATUS_FILE), report)?;

        if let Some((unknown, _)) = statuses.iter().find(|(_, ok)| !ok) {
            return Err(PipelineError::InvalidParameter(format!(
                "Column '{}' is not part of the input schema",
                unknown
            )));
        }
        let schema = raw_training_schema(&self.config.target_column);
        if let Some(missing) = schema
            .fields()
            .iter()
            .find(|f| !header.contains(f.name()))
        {
            return Err(PipelineError::MissingColumn(format!(
                "Column '{}' not found",
                missing.name()
            )));
        }
        info!("Validated {} raw columns", header.len());
        Ok(())
    }

    /// Loads the raw file, validates its header (reporting to `status_dir`) and casts every column
    /// to its declared type.
    pub async fn load(&self, ctx: &SessionContext, status_dir: &Path) -> PipelineResult<DataFrame> {
        let raw = load_data(ctx, &self.config.raw_data_path).await?;
        self.validate_header(&column_names(&raw), status_dir)?;
        conform_to_schema(raw, &raw_training_schema(&self.config.target_column))
    }

    /// Drops rows above any configured ceiling. Missing values are kept.
    pub fn remove_outliers(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        let mut df = df;
        for rule in &self.config.outlier_rules {
            if df.schema().field_with_unqualified_name(&rule.column).is_err() {
                return Err(PipelineError::MissingColumn(format!(
                    "Column '{}' not found",
                    rule.column
                )));
            }
            let keep: Expr = ident(&rule.column).is_null().or(cast(
                ident(&rule.column),
                DataType::Float64,
            )
            .lt_eq(lit(rule.ceiling)));
            df = df.filter(keep)?;
        }
        Ok(df)
    }

    /// Splits the data into `(features, target)` pairs for train and test.
    pub fn split(&self, batch: &RecordBatch) -> PipelineResult<(Partition, Partition)> {
        let n = batch.num_rows();
        let (train_idx, test_idx) = split_indices(n, self.config.test_ratio, self.config.seed);
        if train_idx.is_empty() || test_idx.is_empty() {
            return Err(PipelineError::InvalidParameter(format!(
                "Cannot split {} rows into non-empty train and test partitions",
                n
            )));
        }
        let schema = batch.schema();
        let target_idx = schema.index_of(&self.config.target_column)?;
        let feature_idx: Vec<usize> = (0..schema.fields().len())
            .filter(|i| *i != target_idx)
            .collect();

        let partition = |indices: &[usize]| -> PipelineResult<Partition> {
            let rows = UInt64Array::from(indices.iter().map(|&i| i as u64).collect::<Vec<u64>>());
            let taken = take_record_batch(batch, &rows)?;
            let labels = int_values(taken.column(target_idx))?
                .into_iter()
                .enumerate()
                .map(|(row, v)| {
                    v.ok_or_else(|| {
                        PipelineError::InvalidParameter(format!(
                            "Target column '{}' is missing a label at row {}",
                            self.config.target_column, indices[row]
                        ))
                    })
                })
                .collect::<PipelineResult<Vec<i64>>>()?;
            let target = Target::new(&self.config.target_column, labels)?;
            Ok((taken.project(&feature_idx)?, target))
        };
        Ok((partition(&train_idx)?, partition(&test_idx)?))
    }

    /// Runs every step and persists the artifacts.
    pub async fn run(&self) -> PipelineResult<TransformationReport> {
        let dir = &self.config.artifacts_dir;
        let parent = artifacts_parent(dir);
        fs::create_dir_all(&parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".fraud-pipeline-staging-")
            .tempdir_in(&parent)?;
        let stage = staging.path();
        let ctx = session_context();

        let raw = match self.load(&ctx, stage).await {
            Ok(raw) => raw,
            Err(err) => {
                publish_status(stage, dir)?;
                return Err(err);
            }
        };
        let filtered = collect_batch(self.remove_outliers(raw)?).await?;
        let rows_after_outliers = filtered.num_rows();
        info!("{} rows left after outlier removal", rows_after_outliers);

        let ((x_train, y_train), (x_test, y_test)) = self.split(&filtered)?;
        info!(
            "Split data into {} train and {} test rows",
            x_train.num_rows(),
            x_test.num_rows()
        );

        write_csv(&x_train, &stage.join(X_TRAIN_FILE))?;
        write_csv(&x_test, &stage.join(X_TEST_FILE))?;
        write_csv(&y_train.to_record_batch()?, &stage.join(Y_TRAIN_FILE))?;
        write_csv(&y_test.to_record_batch()?, &stage.join(Y_TEST_FILE))?;

        let mut pipeline = build_pipeline(&self.config.pipeline);
        let train_df = pipeline
            .fit_transform(&ctx.read_batch(x_train)?, Some(&y_train))
            .await?;
        let train_out = collect_batch(coerce_numeric(train_df)?).await?;
        let test_df = pipeline.transform(ctx.read_batch(x_test)?).await?;
        let test_out = collect_batch(coerce_numeric(test_df)?).await?;
        info!(
            "Transformed train {:?} and test {:?}",
            (train_out.num_rows(), train_out.num_columns()),
            (test_out.num_rows(), test_out.num_columns())
        );

        write_csv(&train_out, &stage.join(X_TRAIN_TRANSFORMED_FILE))?;
        write_csv(&test_out, &stage.join(X_TEST_TRANSFORMED_FILE))?;
        pipeline.save(&stage.join(PIPELINE_FILE))?;

        publish(&staging, dir, &parent)?;
        info!("Artifacts written to {}", dir.display());

        let feature_columns = pipeline
            .output_columns()
            .map(|c| c.to_vec())
            .unwrap_or_default();
        Ok(TransformationReport {
            pipeline,
            rows_after_outliers,
            train_rows: y_train.len(),
            test_rows: y_test.len(),
            feature_columns,
        })
    }
}

/// The directory that holds `dir`; staging happens there so the final swap is a rename.
fn artifacts_parent(dir: &Path) -> PathBuf {
    match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Copies the status report of a failed run, if one was written, into the artifact directory.
fn publish_status(stage: &Path, dir: &Path) -> PipelineResult<()> {
    let status = stage.join(STATUS_FILE);
    if status.exists() {
        fs::create_dir_all(dir)?;
        fs::copy(&status, dir.join(STATUS_FILE))?;
    }
    Ok(())
}

/// Replaces `dir` with the staging directory. The previous artifacts are restored if the swap
/// fails and deleted once it succeeds.
fn publish(staging: &TempDir, dir: &Path, parent: &Path) -> PipelineResult<()> {
    let had_previous = dir.exists();
    let template = if had_previous { dir } else { parent };
    fs::set_permissions(staging.path(), fs::metadata(template)?.permissions())?;
    let previous = tempfile::Builder::new()
        .prefix(".fraud-pipeline-previous-")
        .tempdir_in(parent)?;
    let backup = previous.path().join("artifacts");
    if had_previous {
        fs::rename(dir, &backup)?;
    }
    if let Err(err) = fs::rename(staging.path(), dir) {
        if had_previous {
            fs::rename(&backup, dir)?;
        }
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_indices_is_a_seeded_partition() {
        let (train, test) = split_indices(10, 0.2, 42);
        assert_eq!(test.len(), 2);
        assert_eq!(train.len(), 8);
        let mut all: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
        assert_eq!(split_indices(10, 0.2, 42), (train, test));
    }

    #[test]
    fn test_split_rounds_test_size_up() {
        let (train, test) = split_indices(11, 0.2, 7);
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 8);
    }

    #[test]
    fn test_column_statuses_flag_unknown_columns() {
        let header = vec!["score_1".to_string(), "fraude".to_string(), "extra".to_string()];
        let statuses = column_statuses(&header, "fraude");
        assert_eq!(
            statuses,
            vec![
                ("score_1".to_string(), true),
                ("fraude".to_string(), true),
                ("extra".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_invalid_test_ratio_is_rejected() {
        let mut config = TransformationConfig::new("raw.csv", "out");
        config.test_ratio = 1.0;
        assert!(matches!(
            DataTransformation::new(config),
            Err(PipelineError::InvalidParameter(_))
        ));
    }
}
