//! Cluster–product affinity and the product category lookup

use std::collections::{BTreeMap, HashMap};

use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::data::{transactions_frame, PRODUCT_CATEGORY, PRODUCT_NAME, QUANTITY, TRANSACTION_ID};
use crate::error::DataError;
use crate::model::SegmentedTransaction;

const CLUSTER: &str = "Cluster";
const CATEGORY_COUNT: &str = "Category_Count";

/// Total quantity of one product bought within a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductAffinity {
    pub product_name: String,
    pub quantity: i64,
}

/// Per-cluster product quantities, heaviest first
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AffinityTable {
    clusters: BTreeMap<usize, Vec<ProductAffinity>>,
}

impl AffinityTable {
    /// Sum quantity by (cluster, product); lines without a cluster are skipped
    ///
    /// Within a cluster, products are ordered by quantity descending and then
    /// by name.
    pub fn from_transactions(lines: &[SegmentedTransaction]) -> Result<Self, DataError> {
        let totals = segmented_frame(lines)?
            .lazy()
            .filter(col(CLUSTER).is_not_null())
            .group_by([col(CLUSTER), col(PRODUCT_NAME)])
            .agg([col(QUANTITY).sum().alias(QUANTITY)])
            .sort_by_exprs(
                [col(CLUSTER), col(QUANTITY), col(PRODUCT_NAME)],
                SortMultipleOptions::default().with_order_descending_multi([false, true, false]),
            )
            .collect()?;

        let clusters_col = totals.column(CLUSTER)?.u64()?;
        let names = totals.column(PRODUCT_NAME)?.str()?;
        let quantities = totals.column(QUANTITY)?.i64()?;

        let mut clusters: BTreeMap<usize, Vec<ProductAffinity>> = BTreeMap::new();
        for ((cluster, name), quantity) in clusters_col
            .into_no_null_iter()
            .zip(names.into_no_null_iter())
            .zip(quantities.into_no_null_iter())
        {
            clusters
                .entry(cluster as usize)
                .or_default()
                .push(ProductAffinity {
                    product_name: name.to_string(),
                    quantity,
                });
        }

        Ok(Self { clusters })
    }

    pub fn clusters(&self) -> impl Iterator<Item = usize> + '_ {
        self.clusters.keys().copied()
    }

    /// Full ranked slice for a cluster; empty for an unknown cluster
    pub fn products(&self, cluster: usize) -> &[ProductAffinity] {
        self.clusters.get(&cluster).map(Vec::as_slice).unwrap_or_default()
    }

    /// The `n` heaviest products of a cluster
    pub fn top(&self, cluster: usize, n: usize) -> &[ProductAffinity] {
        let products = self.products(cluster);
        &products[..n.min(products.len())]
    }

    /// Quantity of a product within a cluster; 0 when never bought there
    pub fn quantity(&self, cluster: usize, product: &str) -> i64 {
        self.products(cluster)
            .iter()
            .find(|p| p.product_name == product)
            .map_or(0, |p| p.quantity)
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// A product name seen with more than one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryConflict {
    pub product_name: String,
    /// Every category observed, in first-seen order
    pub categories: Vec<String>,
}

/// Product name to product category
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryMap {
    categories: BTreeMap<String, String>,
    conflicts: Vec<CategoryConflict>,
}

impl CategoryMap {
    /// Build from (product name, category) pairs; on a collision the last
    /// pair seen wins and the collision is recorded
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut seen: Vec<(&str, Vec<&str>)> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut categories = BTreeMap::new();

        for (name, category) in pairs {
            let slot = *index.entry(name).or_insert_with(|| {
                seen.push((name, Vec::new()));
                seen.len() - 1
            });
            let observed = &mut seen[slot].1;
            if !observed.contains(&category) {
                observed.push(category);
            }
            categories.insert(name.to_string(), category.to_string());
        }

        let conflicts: Vec<CategoryConflict> = seen
            .into_iter()
            .filter(|(_, observed)| observed.len() > 1)
            .map(|(name, observed)| CategoryConflict {
                product_name: name.to_string(),
                categories: observed.into_iter().map(str::to_string).collect(),
            })
            .collect();

        for conflict in &conflicts {
            warn!(
                product = %conflict.product_name,
                categories = ?conflict.categories,
                "product has inconsistent categories; keeping the last one"
            );
        }

        Self {
            categories,
            conflicts,
        }
    }

    pub fn from_transactions(lines: &[SegmentedTransaction]) -> Self {
        let map = Self::from_pairs(
            lines
                .iter()
                .map(|t| (t.line.product_name.as_str(), t.line.product_category.as_str())),
        );
        info!(products = map.len(), conflicts = map.conflicts.len(), "category map built");
        map
    }

    pub fn get(&self, product: &str) -> Option<&str> {
        self.categories.get(product).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Sorted product names, for query pickers
    pub fn product_names(&self) -> Vec<&str> {
        self.categories.keys().map(String::as_str).collect()
    }

    pub fn conflicts(&self) -> &[CategoryConflict] {
        &self.conflicts
    }

    /// Reject the map when any product carries more than one category
    pub fn validate(&self) -> Result<(), DataError> {
        match self.conflicts.first() {
            Some(conflict) => Err(DataError::CategoryConflict {
                product: conflict.product_name.clone(),
                categories: conflict.categories.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Transaction ids whose lines span more than one product category
pub fn mixed_category_transactions(lines: &[SegmentedTransaction]) -> Result<Vec<String>, DataError> {
    let grouped = segmented_frame(lines)?
        .lazy()
        .group_by([col(TRANSACTION_ID)])
        .agg([col(PRODUCT_CATEGORY).n_unique().alias(CATEGORY_COUNT)])
        .filter(col(CATEGORY_COUNT).gt(lit(1)))
        .sort_by_exprs([col(TRANSACTION_ID)], SortMultipleOptions::default())
        .collect()?;

    let mixed: Vec<String> = grouped
        .column(TRANSACTION_ID)?
        .str()?
        .into_no_null_iter()
        .map(str::to_string)
        .collect();
    if !mixed.is_empty() {
        warn!(
            transactions = mixed.len(),
            "transactions mix product categories"
        );
    }
    Ok(mixed)
}

/// Transaction frame with the purchaser's cluster as an extra column
fn segmented_frame(lines: &[SegmentedTransaction]) -> PolarsResult<DataFrame> {
    let mut df = transactions_frame(lines.iter().map(|t| &t.line))?;
    let clusters: Vec<Option<u64>> = lines.iter().map(|t| t.cluster.map(|c| c as u64)).collect();
    df.with_column(Series::new(CLUSTER, clusters))?;
    Ok(df)
}
