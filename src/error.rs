//! Error taxonomy for the segmentation and recommendation pipeline

use thiserror::Error;

/// Data validation failures. Fatal to a pipeline run.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("transaction frame error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),

    #[error("missing required column `{0}`")]
    MissingColumn(String),

    #[error("row {row}: required field `{column}` is empty")]
    EmptyField { row: usize, column: &'static str },

    #[error("row {row}: unparseable purchase date `{value}`")]
    InvalidDate { row: usize, value: String },

    #[error("row {row}: invalid {column} value `{value}`")]
    InvalidNumber {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("no transactions to analyze")]
    NoTransactions,

    #[error("product `{product}` is listed under several categories: {}", categories.join(", "))]
    CategoryConflict {
        product: String,
        categories: Vec<String>,
    },
}

/// Parameter and clustering failures raised by the segmenter.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("cannot form {clusters} clusters from {customers} customers")]
    TooManyClusters { clusters: usize, customers: usize },

    #[error(transparent)]
    Clustering(#[from] linfa_clustering::KMeansError),
}

/// Any failure that aborts a full pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Segment(#[from] SegmentError),
}
