//! # Fraud Pipeline
//!
//! Feature-transformation pipeline for credit-card fraud risk scoring, built on
//! [Apache DataFusion](https://datafusion.apache.org/).
//!
//! Raw transactions go through an ordered chain of processors (column dropping, imputation,
//! document flags, country to continent, purchase-time features, one-hot encoding, log
//! re-expression, rare-category aggregation and target encoding). The chain is fitted once on
//! training data, persisted, and replayed unchanged on test data and on single serving records.
//!
//! - [`pipeline`]: the `Processor` trait, the `Pipeline` and its persisted form.
//! - [`processors`]: the concrete processors.
//! - [`transformation`]: the preprocessing run (validation, outliers, split, artifacts).
//! - [`prediction`]: single-record serving against an opaque scorer.

pub mod dataset;
pub mod exceptions;
pub mod logging;
pub mod pipeline;
pub mod prediction;
pub mod processors;
pub mod settings;
pub mod transformation;
