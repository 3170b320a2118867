#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float64Array, Float64Builder, Int64Array, Int64Builder, StringArray,
    StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::memory::MemTable;
use datafusion::prelude::*;
use fraud_pipeline::dataset::{raw_training_schema, session_context};

pub const TARGET: &str = "fraude";

/// Registers a batch as an in-memory table and returns it as a DataFrame.
pub async fn mem_df(batch: RecordBatch) -> DataFrame {
    let ctx = session_context();
    let mem_table = MemTable::try_new(batch.schema(), vec![vec![batch]]).unwrap();
    ctx.register_table("t", Arc::new(mem_table)).unwrap();
    ctx.table("t").await.unwrap()
}

/// One-column text DataFrame.
pub async fn text_df(name: &str, values: Vec<Option<&str>>) -> DataFrame {
    let schema = Arc::new(Schema::new(vec![Field::new(name, DataType::Utf8, true)]));
    let array: ArrayRef = Arc::new(StringArray::from(values));
    mem_df(RecordBatch::try_new(schema, vec![array]).unwrap()).await
}

/// Executes a DataFrame into a single batch.
pub async fn collect(df: DataFrame) -> RecordBatch {
    fraud_pipeline::dataset::collect_batch(df).await.unwrap()
}

pub fn column<'a>(batch: &'a RecordBatch, name: &str) -> &'a ArrayRef {
    batch.column(batch.schema().index_of(name).unwrap())
}

pub fn f64_column(batch: &RecordBatch, name: &str) -> Vec<Option<f64>> {
    let array = column(batch, name)
        .as_any()
        .downcast_ref::<Float64Array>()
        .expect("Expected Float64Array");
    array.iter().collect()
}

pub fn i64_column(batch: &RecordBatch, name: &str) -> Vec<Option<i64>> {
    let array = column(batch, name)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("Expected Int64Array");
    array.iter().collect()
}

pub fn str_column(batch: &RecordBatch, name: &str) -> Vec<Option<String>> {
    let array = column(batch, name)
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("Expected StringArray");
    array.iter().map(|v| v.map(str::to_string)).collect()
}

pub fn column_names(batch: &RecordBatch) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect()
}

const COUNTRIES: [Option<&str>; 7] = [
    Some("BR"),
    Some("BR"),
    Some("US"),
    Some("AR"),
    None,
    Some("FR"),
    Some("ZZ"),
];

const CATEGORIES: [Option<&str>; 10] = [
    Some("cat_a"),
    Some("cat_a"),
    Some("cat_a"),
    Some("cat_b"),
    Some("cat_b"),
    Some("cat_c"),
    Some("cat_a"),
    Some("cat_b"),
    Some("cat_d"),
    None,
];

/// Deterministic raw transactions with the declared training schema.
///
/// Row 5 has `score_6 = 900` and row 9 has `score_9 = 1000`, both above the default outlier
/// ceilings. Every fourth row is fraudulent.
pub fn raw_training_batch(n: usize) -> RecordBatch {
    let schema = raw_training_schema(TARGET);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let array: ArrayRef = match field.name().as_str() {
            "score_1" => ints(n, |i| Some((i % 4 + 1) as i64)),
            "score_2" => floats(n, |i| (i % 7 != 0).then(|| 0.1 * i as f64)),
            "score_3" => floats(n, |i| Some(i as f64 * 10.0)),
            "score_4" => floats(n, |i| (i % 5 != 0).then(|| (i % 3) as f64)),
            "score_5" => floats(n, |i| Some(i as f64 / 2.0)),
            "score_6" => floats(n, |i| Some(if i == 5 { 900.0 } else { 100.0 + i as f64 })),
            "score_7" => ints(n, |i| (i % 6 != 0).then(|| (i % 4) as i64)),
            "score_8" => floats(n, |_| Some(0.5)),
            "score_9" => floats(n, |i| match i {
                9 => Some(1000.0),
                i if i % 8 == 0 => None,
                i => Some(i as f64),
            }),
            "score_10" => floats(n, |i| Some(i as f64 * 3.0)),
            "score_fraude_modelo" => floats(n, |i| Some(i as f64)),
            "valor_compra" => floats(n, |i| (i % 9 != 0).then(|| 10.0 + i as f64 * 2.5)),
            "pais" => texts(n, |i| COUNTRIES[i % COUNTRIES.len()].map(str::to_string)),
            "produto" => texts(n, |i| Some(format!("produto {}", i))),
            "categoria_produto" => texts(n, |i| {
                if i == 13 {
                    Some("cat_rare".to_string())
                } else {
                    CATEGORIES[i % CATEGORIES.len()].map(str::to_string)
                }
            }),
            "data_compra" => texts(n, |i| {
                Some(format!(
                    "2025-01-{:02} {:02}:{:02}:00",
                    1 + i % 28,
                    (i * 5) % 24,
                    (i * 7) % 60
                ))
            }),
            "entrega_doc_1" => texts(n, |i| [Some("Y"), Some("N"), None][i % 3].map(str::to_string)),
            "entrega_doc_2" => texts(n, |i| (i % 2 == 0).then(|| "Y".to_string())),
            "entrega_doc_3" => texts(n, |i| Some(if i % 4 == 0 { "N" } else { "Y" }.to_string())),
            TARGET => ints(n, |i| Some(if i % 4 == 0 { 1 } else { 0 })),
            other => panic!("unexpected column {}", other),
        };
        columns.push(array);
    }
    RecordBatch::try_new(schema, columns).unwrap()
}

/// The raw transactions without the label column.
pub fn raw_feature_batch(n: usize) -> RecordBatch {
    let batch = raw_training_batch(n);
    let target_idx = batch.schema().index_of(TARGET).unwrap();
    let keep: Vec<usize> = (0..batch.num_columns()).filter(|i| *i != target_idx).collect();
    batch.project(&keep).unwrap()
}

/// Labels of [`raw_training_batch`].
pub fn raw_labels(n: usize) -> Vec<i64> {
    (0..n).map(|i| if i % 4 == 0 { 1 } else { 0 }).collect()
}

fn ints(n: usize, f: impl Fn(usize) -> Option<i64>) -> ArrayRef {
    let mut builder = Int64Builder::new();
    for i in 0..n {
        builder.append_option(f(i));
    }
    Arc::new(builder.finish())
}

fn floats(n: usize, f: impl Fn(usize) -> Option<f64>) -> ArrayRef {
    let mut builder = Float64Builder::new();
    for i in 0..n {
        builder.append_option(f(i));
    }
    Arc::new(builder.finish())
}

fn texts(n: usize, f: impl Fn(usize) -> Option<String>) -> ArrayRef {
    let mut builder = StringBuilder::new();
    for i in 0..n {
        builder.append_option(f(i));
    }
    Arc::new(builder.finish())
}
