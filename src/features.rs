//! Per-customer behavioral features: Recency, Frequency, Monetary, Product Diversity

use chrono::{Duration, NaiveDateTime};
use ndarray::Array2;
use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::data::{
    transactions_frame, TransactionLine, CUSTOMER_ID, PRICE, PRODUCT_ID, PURCHASE_DATE,
    TRANSACTION_ID,
};
use crate::error::DataError;

/// Number of columns in the feature matrix
pub const N_FEATURES: usize = 4;

/// Feature column labels, in matrix order
pub const FEATURE_NAMES: [&str; N_FEATURES] =
    ["Recency", "Frequency", "Monetary", "Product_Diversity"];

/// Behavioral summary of one customer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerFeatures {
    pub customer_id: String,
    /// Days between the reference date and the customer's last purchase
    pub recency: i64,
    /// Distinct transactions
    pub frequency: usize,
    /// Sum of the line price over all of the customer's lines
    pub monetary: f64,
    /// Distinct products bought
    pub product_diversity: usize,
}

impl CustomerFeatures {
    pub fn as_row(&self) -> [f64; N_FEATURES] {
        [
            self.recency as f64,
            self.frequency as f64,
            self.monetary,
            self.product_diversity as f64,
        ]
    }
}

const LAST_PURCHASE: &str = "Last_Purchase";
const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Reference date for recency: one day after the latest purchase in the data
pub fn reference_date(lines: &[TransactionLine]) -> Option<NaiveDateTime> {
    lines
        .iter()
        .map(|line| line.purchase_date)
        .max()
        .map(|latest| latest + Duration::days(1))
}

/// Build one feature vector per distinct customer, ordered by customer id
///
/// Monetary sums the recorded line price without multiplying by quantity.
pub fn build_customer_features(
    lines: &[TransactionLine],
) -> Result<Vec<CustomerFeatures>, DataError> {
    let reference = reference_date(lines).ok_or(DataError::NoTransactions)?;
    let reference_micros = reference.and_utc().timestamp_micros();

    let [_, frequency_col, monetary_col, diversity_col] = FEATURE_NAMES;
    let grouped = transactions_frame(lines)?
        .lazy()
        .group_by([col(CUSTOMER_ID)])
        .agg([
            col(PURCHASE_DATE).max().alias(LAST_PURCHASE),
            col(TRANSACTION_ID).n_unique().cast(DataType::UInt64).alias(frequency_col),
            col(PRICE).sum().alias(monetary_col),
            col(PRODUCT_ID).n_unique().cast(DataType::UInt64).alias(diversity_col),
        ])
        .sort_by_exprs([col(CUSTOMER_ID)], SortMultipleOptions::default())
        .collect()?;

    let customers = grouped.column(CUSTOMER_ID)?.str()?;
    let last_purchase = grouped.column(LAST_PURCHASE)?.i64()?;
    let frequencies = grouped.column(frequency_col)?.u64()?;
    let spend = grouped.column(monetary_col)?.f64()?;
    let diversities = grouped.column(diversity_col)?.u64()?;

    let features: Vec<CustomerFeatures> = customers
        .into_no_null_iter()
        .zip(last_purchase.into_no_null_iter())
        .zip(frequencies.into_no_null_iter())
        .zip(spend.into_no_null_iter())
        .zip(diversities.into_no_null_iter())
        .map(|((((customer_id, last), frequency), monetary), diversity)| CustomerFeatures {
            customer_id: customer_id.to_string(),
            recency: (reference_micros - last) / MICROS_PER_DAY,
            frequency: frequency as usize,
            monetary,
            product_diversity: diversity as usize,
        })
        .collect();

    info!(customers = features.len(), reference = %reference, "customer features built");
    Ok(features)
}

/// Stack feature vectors into an `(n_customers, 4)` matrix
pub fn feature_matrix(features: &[CustomerFeatures]) -> Array2<f64> {
    let mut matrix = Array2::zeros((features.len(), N_FEATURES));
    for (mut row, customer) in matrix.outer_iter_mut().zip(features) {
        for (cell, value) in row.iter_mut().zip(customer.as_row()) {
            *cell = value;
        }
    }
    matrix
}
