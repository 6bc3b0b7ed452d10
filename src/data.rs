//! Transaction loading and validation using Polars

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::DataError;

pub const CUSTOMER_ID: &str = "Customer ID";
pub const TRANSACTION_ID: &str = "Transaction ID";
pub const PRODUCT_ID: &str = "Product ID";
pub const PRODUCT_CATEGORY: &str = "Product Category";
pub const PRODUCT_NAME: &str = "Product Name";
pub const QUANTITY: &str = "Quantity";
pub const PRICE: &str = "Price";
pub const PURCHASE_DATE: &str = "Date of Purchase";

/// One product line of a checkout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionLine {
    pub customer_id: String,
    pub transaction_id: String,
    pub product_id: String,
    pub product_category: String,
    pub product_name: String,
    pub quantity: i64,
    /// Unit price as recorded on the line
    pub price: f64,
    pub purchase_date: NaiveDateTime,
}

/// Load every transaction line from a CSV file
///
/// All columns are read as text and parsed here so that a malformed cell is
/// reported with its row number instead of becoming a null.
///
/// # Arguments
/// * `file_path` - Path to the CSV file
///
/// # Returns
/// * One `TransactionLine` per data row, in file order
pub fn load_transactions(file_path: impl AsRef<Path>) -> Result<Vec<TransactionLine>, DataError> {
    let file_path = file_path.as_ref();
    debug!(path = %file_path.display(), "reading transactions");

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()?;

    let lines = lines_from_frame(&df)?;
    info!(rows = lines.len(), "transactions loaded");
    Ok(lines)
}

/// Convert a text-typed frame into validated transaction lines
fn lines_from_frame(df: &DataFrame) -> Result<Vec<TransactionLine>, DataError> {
    let customers = string_column(df, CUSTOMER_ID)?;
    let transactions = string_column(df, TRANSACTION_ID)?;
    let product_ids = string_column(df, PRODUCT_ID)?;
    let categories = string_column(df, PRODUCT_CATEGORY)?;
    let names = string_column(df, PRODUCT_NAME)?;
    let quantities = string_column(df, QUANTITY)?;
    let prices = string_column(df, PRICE)?;
    let dates = string_column(df, PURCHASE_DATE)?;

    if df.height() == 0 {
        return Err(DataError::NoTransactions);
    }

    (0..df.height())
        .map(|i| {
            // 1-based, counting the header line
            let row = i + 2;
            let quantity = required(quantities[i], row, QUANTITY)?;
            let price = required(prices[i], row, PRICE)?;
            let date = required(dates[i], row, PURCHASE_DATE)?;

            Ok(TransactionLine {
                customer_id: required(customers[i], row, CUSTOMER_ID)?.to_string(),
                transaction_id: required(transactions[i], row, TRANSACTION_ID)?.to_string(),
                product_id: required(product_ids[i], row, PRODUCT_ID)?.to_string(),
                product_category: required(categories[i], row, PRODUCT_CATEGORY)?.to_string(),
                product_name: required(names[i], row, PRODUCT_NAME)?.to_string(),
                quantity: quantity.parse().map_err(|_| DataError::InvalidNumber {
                    row,
                    column: QUANTITY,
                    value: quantity.to_string(),
                })?,
                price: price
                    .parse::<f64>()
                    .ok()
                    .filter(|p| p.is_finite())
                    .ok_or_else(|| DataError::InvalidNumber {
                        row,
                        column: PRICE,
                        value: price.to_string(),
                    })?,
                purchase_date: parse_purchase_date(date).ok_or_else(|| {
                    DataError::InvalidDate {
                        row,
                        value: date.to_string(),
                    }
                })?,
            })
        })
        .collect()
}

/// Typed frame over transaction lines, used for the grouped aggregations
///
/// Purchase dates are stored as microseconds since the Unix epoch.
pub fn transactions_frame<'a>(
    lines: impl IntoIterator<Item = &'a TransactionLine>,
) -> PolarsResult<DataFrame> {
    let lines: Vec<&TransactionLine> = lines.into_iter().collect();

    DataFrame::new(vec![
        text_series(CUSTOMER_ID, &lines, |l| l.customer_id.as_str()),
        text_series(TRANSACTION_ID, &lines, |l| l.transaction_id.as_str()),
        text_series(PRODUCT_ID, &lines, |l| l.product_id.as_str()),
        text_series(PRODUCT_CATEGORY, &lines, |l| l.product_category.as_str()),
        text_series(PRODUCT_NAME, &lines, |l| l.product_name.as_str()),
        Series::new(QUANTITY, lines.iter().map(|l| l.quantity).collect::<Vec<i64>>()),
        Series::new(PRICE, lines.iter().map(|l| l.price).collect::<Vec<f64>>()),
        Series::new(
            PURCHASE_DATE,
            lines
                .iter()
                .map(|l| l.purchase_date.and_utc().timestamp_micros())
                .collect::<Vec<i64>>(),
        ),
    ])
}

fn text_series(
    name: &str,
    lines: &[&TransactionLine],
    field: impl Fn(&TransactionLine) -> &str,
) -> Series {
    Series::new(name, lines.iter().map(|l| field(l)).collect::<Vec<&str>>())
}

fn string_column<'a>(df: &'a DataFrame, name: &str) -> Result<Vec<Option<&'a str>>, DataError> {
    let column = df
        .column(name)
        .map_err(|_| DataError::MissingColumn(name.to_string()))?;
    Ok(column.str()?.into_iter().collect())
}

fn required<'a>(
    value: Option<&'a str>,
    row: usize,
    column: &'static str,
) -> Result<&'a str, DataError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DataError::EmptyField { row, column }),
    }
}

/// Parse a purchase date, accepting plain dates and ISO-style timestamps
pub fn parse_purchase_date(value: &str) -> Option<NaiveDateTime> {
    const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"];
    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];

    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        })
}
