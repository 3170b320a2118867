//! ## Datasets, Targets and Records
//!
//! A dataset is a DataFusion [`DataFrame`]; every processor receives one and returns a new one.
//! This module holds the pieces around that representation:
//!
//! - [`session_context`]: the single-partition session every dataset is created in, which keeps
//!   row order stable so a [`Target`] stays aligned with its features by row index.
//! - [`Target`]: the binary fraud label of each training row.
//! - [`Record`] / [`FieldValue`]: one raw transaction as received at serving time, and
//!   [`record_to_batch`] to turn it into a one-row dataset of the declared input schema.
//! - The declared raw input schema, raw-file loading and CSV writing.

use crate::exceptions::{PipelineError, PipelineResult};
use arrow::array::{Array, ArrayRef, Float64Builder, Int64Array, Int64Builder, StringArray, StringBuilder};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use datafusion::logical_expr::{ident, lit, try_cast, Case as DFCase, Expr};
use datafusion::prelude::{CsvReadOptions, DataFrame, ParquetReadOptions, SessionConfig, SessionContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Numeric scores of the raw transaction data and their declared types.
const SCORE_FIELDS: [(&str, DataType); 10] = [
    ("score_1", DataType::Int64),
    ("score_2", DataType::Float64),
    ("score_3", DataType::Float64),
    ("score_4", DataType::Float64),
    ("score_5", DataType::Float64),
    ("score_6", DataType::Float64),
    ("score_7", DataType::Int64),
    ("score_8", DataType::Float64),
    ("score_9", DataType::Float64),
    ("score_10", DataType::Float64),
];

/// Creates the session used for every dataset of the pipeline.
///
/// A single target partition keeps the output of each plan in input order.
pub fn session_context() -> SessionContext {
    SessionContext::new_with_config(SessionConfig::new().with_target_partitions(1))
}

/// The declared raw input schema (features only, no label).
pub fn raw_input_schema() -> SchemaRef {
    let mut fields: Vec<Field> = SCORE_FIELDS
        .iter()
        .map(|(name, dt)| Field::new(*name, dt.clone(), true))
        .collect();
    fields.push(Field::new("score_fraude_modelo", DataType::Float64, true));
    fields.push(Field::new("valor_compra", DataType::Float64, true));
    for name in [
        "pais",
        "produto",
        "categoria_produto",
        "data_compra",
        "entrega_doc_1",
        "entrega_doc_2",
        "entrega_doc_3",
    ] {
        fields.push(Field::new(name, DataType::Utf8, true));
    }
    Arc::new(Schema::new(fields))
}

/// The declared raw input schema followed by the binary label column.
pub fn raw_training_schema(target_column: &str) -> SchemaRef {
    let input = raw_input_schema();
    let mut fields: Vec<Field> = input.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new(target_column, DataType::Int64, true));
    Arc::new(Schema::new(fields))
}

/// Names of the columns of a DataFrame, in order.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.schema()
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect()
}

/// Executes the plan and concatenates its output into a single batch.
pub async fn collect_batch(df: DataFrame) -> PipelineResult<RecordBatch> {
    let planned_schema: SchemaRef = Arc::clone(df.schema().inner());
    let batches = df.collect().await?;
    let schema = batches
        .first()
        .map(|b| b.schema())
        .unwrap_or(planned_schema);
    Ok(concat_batches(&schema, &batches)?)
}

/// Reads any Arrow array as optional strings, using Arrow's cast kernel for the rendering.
pub fn string_values(array: &ArrayRef) -> PipelineResult<Vec<Option<String>>> {
    let casted = cast(array, &DataType::Utf8)?;
    let strings = casted
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| PipelineError::InvalidParameter("Expected Utf8 array after cast".into()))?;
    Ok(strings.iter().map(|v| v.map(str::to_string)).collect())
}

/// Reads any numeric Arrow array as optional integers.
pub fn int_values(array: &ArrayRef) -> PipelineResult<Vec<Option<i64>>> {
    let casted = cast(array, &DataType::Int64)?;
    let ints = casted
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| PipelineError::InvalidParameter("Expected Int64 array after cast".into()))?;
    Ok(ints.iter().collect())
}

/// Binary fraud label of each training row, aligned by row index with its dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    name: String,
    values: Vec<i64>,
}

impl Target {
    /// Creates a target, rejecting labels other than 0 and 1.
    pub fn new(name: impl Into<String>, values: Vec<i64>) -> PipelineResult<Self> {
        let name = name.into();
        if let Some((row, v)) = values.iter().enumerate().find(|(_, v)| **v != 0 && **v != 1) {
            return Err(PipelineError::InvalidParameter(format!(
                "Target '{}' must be binary, found {} at row {}",
                name, v, row
            )));
        }
        Ok(Self { name, values })
    }

    /// Reads the label column of a dataset. Missing labels are rejected.
    pub async fn from_dataframe(df: DataFrame, column: &str) -> PipelineResult<Self> {
        if df.schema().field_with_unqualified_name(column).is_err() {
            return Err(PipelineError::MissingColumn(format!(
                "Target column '{}' not found",
                column
            )));
        }
        let batch = collect_batch(df.select(vec![ident(column)])?).await?;
        let values = int_values(batch.column(0))?
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                v.ok_or_else(|| {
                    PipelineError::InvalidParameter(format!(
                        "Target column '{}' is missing a label at row {}",
                        column, row
                    ))
                })
            })
            .collect::<PipelineResult<Vec<i64>>>()?;
        Self::new(column, values)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overall positive rate, or `None` for an empty target.
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<i64>() as f64 / self.values.len() as f64)
    }

    /// Selects the labels at the given row indices, in that order.
    pub fn take(&self, indices: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            values: indices.iter().map(|&i| self.values[i]).collect(),
        }
    }

    /// Single-column batch of the labels, for persistence.
    pub fn to_record_batch(&self) -> PipelineResult<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![Field::new(
            &self.name,
            DataType::Int64,
            false,
        )]));
        let array: ArrayRef = Arc::new(Int64Array::from(self.values.clone()));
        Ok(RecordBatch::try_new(schema, vec![array])?)
    }
}

/// One raw field value as received by the serving path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl FieldValue {
    fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            FieldValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite() && v.fract() == 0.0)
                        .map(|v| v as i64)
                })
            }
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
            FieldValue::Null => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) if s.is_empty() => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Int(v) => Some(v.to_string()),
            FieldValue::Float(v) => Some(v.to_string()),
            FieldValue::Null => None,
        }
    }
}

/// One raw transaction: field name to value.
pub type Record = BTreeMap<String, FieldValue>;

/// Builds a one-row batch of `schema` from a record.
///
/// Fields absent from the record become missing values, and values that cannot be read as the
/// declared type degrade to missing. Fields the schema does not declare are ignored.
pub fn record_to_batch(record: &Record, schema: SchemaRef) -> PipelineResult<RecordBatch> {
    let unknown: Vec<&String> = record
        .keys()
        .filter(|k| schema.field_with_name(k).is_err())
        .collect();
    if !unknown.is_empty() {
        warn!("Ignoring fields outside the input schema: {:?}", unknown);
    }
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let value = record.get(field.name()).unwrap_or(&FieldValue::Null);
        let array: ArrayRef = match field.data_type() {
            DataType::Int64 => {
                let mut builder = Int64Builder::new();
                builder.append_option(value.as_i64());
                Arc::new(builder.finish())
            }
            DataType::Float64 => {
                let mut builder = Float64Builder::new();
                builder.append_option(value.as_f64());
                Arc::new(builder.finish())
            }
            DataType::Utf8 => {
                let mut builder = StringBuilder::new();
                builder.append_option(value.as_text());
                Arc::new(builder.finish())
            }
            dt => {
                return Err(PipelineError::InvalidParameter(format!(
                    "Unsupported input type {:?} for field '{}'",
                    dt,
                    field.name()
                )))
            }
        };
        columns.push(array);
    }
    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Loads a raw dataset, detecting the format (CSV or Parquet) from the file extension.
///
/// CSV columns are all read as text; [`conform_to_schema`] gives them their declared types.
pub async fn load_data(ctx: &SessionContext, path: &Path) -> PipelineResult<DataFrame> {
    let location = path.to_string_lossy().to_string();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("parquet") => Ok(ctx
            .read_parquet(location, ParquetReadOptions::default())
            .await?),
        Some("csv") => {
            let inferred = ctx.read_csv(location.clone(), CsvReadOptions::new()).await?;
            let text_schema = Schema::new(
                column_names(&inferred)
                    .into_iter()
                    .map(|name| Field::new(name, DataType::Utf8, true))
                    .collect::<Vec<Field>>(),
            );
            Ok(ctx
                .read_csv(location, CsvReadOptions::new().schema(&text_schema))
                .await?)
        }
        _ => Err(PipelineError::InvalidParameter(format!(
            "Unsupported file format for '{}'. Please provide a CSV or Parquet file.",
            location
        ))),
    }
}

/// Projects a dataset onto `schema`: declared columns in declared order, each cast to its type.
///
/// Values that do not parse as the declared type become missing, as do empty strings.
pub fn conform_to_schema(df: DataFrame, schema: &Schema) -> PipelineResult<DataFrame> {
    let mut exprs: Vec<Expr> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let name = field.name();
        if df.schema().field_with_unqualified_name(name).is_err() {
            return Err(PipelineError::MissingColumn(format!(
                "Column '{}' not found",
                name
            )));
        }
        let expr = match field.data_type() {
            DataType::Utf8 => {
                let text = try_cast(ident(name), DataType::Utf8);
                Expr::Case(DFCase {
                    expr: None,
                    when_then_expr: vec![(
                        Box::new(text.clone().not_eq(lit(""))),
                        Box::new(text),
                    )],
                    else_expr: None,
                })
            }
            dt => try_cast(ident(name), dt.clone()),
        };
        exprs.push(expr.alias(name));
    }
    Ok(df.select(exprs)?)
}

/// Writes a batch to a CSV file with a header row.
pub fn write_csv(batch: &RecordBatch, path: &Path) -> PipelineResult<()> {
    let file = File::create(path)?;
    let mut writer = arrow::csv::WriterBuilder::new()
        .with_header(true)
        .build(file);
    writer.write(batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_rejects_non_binary_labels() {
        let err = Target::new("fraude", vec![0, 1, 2]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter(msg) if msg.contains("row 2")));
    }

    #[test]
    fn test_target_mean_and_take() {
        let target = Target::new("fraude", vec![1, 0, 1, 1]).unwrap();
        assert_eq!(target.mean(), Some(0.75));
        assert_eq!(target.take(&[3, 1]).values(), &[1, 0]);
        assert_eq!(Target::new("fraude", vec![]).unwrap().mean(), None);
    }

    #[test]
    fn test_record_to_batch_coerces_and_fills_missing() {
        let mut record = Record::new();
        record.insert("score_1".into(), FieldValue::Text("4".into()));
        record.insert("score_2".into(), FieldValue::Int(3));
        record.insert("valor_compra".into(), FieldValue::Text("abc".into()));
        record.insert("pais".into(), FieldValue::Text("BR".into()));

        let batch = record_to_batch(&record, raw_input_schema()).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.num_columns(), raw_input_schema().fields().len());

        let schema = batch.schema();
        let score_1 = int_values(batch.column(schema.index_of("score_1").unwrap())).unwrap();
        assert_eq!(score_1, vec![Some(4)]);
        let valor = batch.column(schema.index_of("valor_compra").unwrap());
        assert!(valor.is_null(0));
        let docs = batch.column(schema.index_of("entrega_doc_1").unwrap());
        assert!(docs.is_null(0));
    }

    #[test]
    fn test_record_to_batch_ignores_unknown_fields() {
        let mut record = Record::new();
        record.insert("not_a_field".into(), FieldValue::Int(1));
        record.insert("score_1".into(), FieldValue::Int(2));
        let batch = record_to_batch(&record, raw_input_schema()).unwrap();
        assert_eq!(batch.schema(), raw_input_schema());
        let score_1 = int_values(batch.column(batch.schema().index_of("score_1").unwrap())).unwrap();
        assert_eq!(score_1, vec![Some(2)]);
    }
}
