//! ## Purchase Time Features
//!
//! [`DateProcessor`] decomposes the purchase timestamp into:
//!
//! - the hour of day, in `[0, 23]`;
//! - the day of week, in `[0, 6]` with Monday as 0;
//! - a daypart bucket: morning `[6, 12)` is 0, afternoon `[12, 18)` is 1, evening `[18, 24)` is 2
//!   and night `[0, 6)` is 3.
//!
//! Text timestamps are read as wall-clock time: a trailing UTC offset (`Z`, `-03:00`, `+0530`) is
//! stripped, never applied, so a purchase at 23:45 local time stays in the evening bucket.
//!
//! The timestamp column itself is dropped. Unlike numeric coercion, a timestamp that cannot be
//! parsed does not degrade to a missing value: the whole call fails with a
//! [`PipelineError::Parse`] naming the offending row.

use crate::dataset::{collect_batch, session_context, string_values, Target};
use crate::exceptions::{PipelineError, PipelineResult};
use crate::impl_processor;
use crate::processors::{columns_except, data_type_of, is_text};
use arrow::array::{Array, ArrayRef};
use arrow::record_batch::RecordBatch;
use datafusion::arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use datafusion::prelude::DataFrame;
use datafusion_expr::{cast, ident, lit, Case as DFCase, Expr};
use datafusion_functions::datetime::date_part;
use datafusion_functions::regex::regexp_replace;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A time of day followed by a UTC offset; the replacement keeps only the time.
const UTC_OFFSET_PATTERN: &str =
    r"(\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?)\s*(?:[Zz]|[+-]\d{2}(?::?\d{2})?)$";

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, None)
}

/// The column as text without its UTC offset, or unchanged if it is already temporal.
fn wall_clock_expr(column: &str, data_type: &DataType) -> Expr {
    if is_text(data_type) {
        regexp_replace().call(vec![
            cast(ident(column), DataType::Utf8),
            lit(UTC_OFFSET_PATTERN),
            lit("${1}"),
        ])
    } else {
        ident(column)
    }
}

/// Derives hour, weekday and daypart from a timestamp column, then drops it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateProcessor {
    pub column: String,
    pub hour_column: String,
    pub weekday_column: String,
    pub daypart_column: String,
}

impl DateProcessor {
    /// Create a processor for `column` with the default output names
    /// `hora_compra`, `dia_compra` and `turno_compra`.
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            hour_column: "hora_compra".to_string(),
            weekday_column: "dia_compra".to_string(),
            daypart_column: "turno_compra".to_string(),
        }
    }

    fn check_type(&self, df: &DataFrame) -> PipelineResult<DataType> {
        let dt = data_type_of(df, &self.column)?;
        match dt {
            DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => Ok(dt),
            ref t if is_text(t) => Ok(dt),
            other => Err(PipelineError::InvalidParameter(format!(
                "Column '{}' must be a timestamp or text, but found {:?}",
                self.column, other
            ))),
        }
    }

    /// Stateless processor: fit only checks the column.
    pub async fn fit(&mut self, df: &DataFrame, _target: Option<&Target>) -> PipelineResult<()> {
        self.check_type(df).map(|_| ())
    }

    /// Replaces the timestamp column of `batch` by its parsed values.
    ///
    /// Fails on the first value that is missing or does not parse as a timestamp.
    fn parse_timestamps(&self, batch: RecordBatch) -> PipelineResult<RecordBatch> {
        let idx = batch.schema().index_of(&self.column)?;
        let raw = batch.column(idx);
        let parsed = arrow::compute::cast(raw, &timestamp_type())?;
        if let Some(row) = (0..parsed.len()).find(|&i| parsed.is_null(i)) {
            let value = if raw.is_null(row) {
                None
            } else {
                string_values(&raw.slice(row, 1))?.into_iter().next().flatten()
            };
            return Err(PipelineError::Parse {
                column: self.column.clone(),
                row,
                value,
            });
        }

        let schema = batch.schema();
        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        fields[idx] = Field::new(&self.column, timestamp_type(), true);
        let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
        columns[idx] = parsed;
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }

    pub async fn transform(&self, df: DataFrame) -> PipelineResult<DataFrame> {
        let data_type = self.check_type(&df)?;

        // Collected once; the parse check and the features read the same rows.
        let mut normalized = columns_except(&df, &[self.column.clone()]);
        normalized.push(wall_clock_expr(&self.column, &data_type).alias(&self.column));
        let batch = self.parse_timestamps(collect_batch(df.select(normalized)?).await?)?;
        let df = session_context().read_batch(batch)?;

        let ts = ident(&self.column);
        let hour = cast(
            date_part().call(vec![lit("hour"), ts.clone()]),
            DataType::Int64,
        );
        let dow = cast(date_part().call(vec![lit("dow"), ts]), DataType::Int64);
        // date_part counts from Sunday.
        let weekday = (dow + lit(6_i64)) % lit(7_i64);
        let in_range = |lo: i64, hi: i64| {
            Box::new(
                hour.clone()
                    .gt_eq(lit(lo))
                    .and(hour.clone().lt(lit(hi))),
            )
        };
        let daypart = Expr::Case(DFCase {
            expr: None,
            when_then_expr: vec![
                (in_range(6, 12), Box::new(lit(0_i64))),
                (in_range(12, 18), Box::new(lit(1_i64))),
                (in_range(18, 24), Box::new(lit(2_i64))),
            ],
            else_expr: Some(Box::new(lit(3_i64))),
        });

        let mut exprs = columns_except(&df, &[self.column.clone()]);
        exprs.push(hour.clone().alias(&self.hour_column));
        exprs.push(weekday.alias(&self.weekday_column));
        exprs.push(daypart.alias(&self.daypart_column));
        df.select(exprs).map_err(PipelineError::from)
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_processor!(DateProcessor);
