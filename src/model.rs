//! Customer segmentation: standardized features clustered with K-Means

use std::collections::{BTreeMap, BTreeSet};

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::data::TransactionLine;
use crate::error::SegmentError;
use crate::features::{feature_matrix, CustomerFeatures, N_FEATURES};

/// K-Means parameters for segmentation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentParams {
    pub n_clusters: usize,
    pub max_iters: u64,
    pub tolerance: f64,
    /// Independent initializations; the lowest-inertia run is kept
    pub n_runs: usize,
    pub seed: u64,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            n_clusters: 4,
            max_iters: 300,
            tolerance: 1e-4,
            n_runs: 10,
            seed: 42,
        }
    }
}

/// Per-feature standardization fitted on the whole customer population
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    pub mean: Array1<f64>,
    /// Population standard deviation; constant columns keep a scale of 1
    pub scale: Array1<f64>,
}

impl Standardizer {
    pub fn fit(features: &Array2<f64>) -> Self {
        let n = features.ncols();
        let mean = features
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n));
        let scale = if features.nrows() == 0 {
            Array1::ones(n)
        } else {
            features
                .std_axis(Axis(0), 0.0)
                .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 })
        };
        Self { mean, scale }
    }

    pub fn transform(&self, features: &Array2<f64>) -> Array2<f64> {
        (features - &self.mean) / &self.scale
    }

    /// Map standardized rows back to feature units
    pub fn inverse_transform(&self, scaled: &Array2<f64>) -> Array2<f64> {
        scaled * &self.scale + &self.mean
    }
}

/// A customer's features together with the cluster it was assigned to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentedCustomer {
    #[serde(flatten)]
    pub features: CustomerFeatures,
    pub cluster: usize,
}

/// Outcome of one segmentation run
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub n_clusters: usize,
    /// Customers in id order, each with exactly one label
    pub customers: Vec<SegmentedCustomer>,
    /// Cluster centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
    pub standardizer: Standardizer,
}

/// Transaction line joined with the purchaser's cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentedTransaction {
    #[serde(flatten)]
    pub line: TransactionLine,
    /// `None` when the purchaser has no feature vector
    pub cluster: Option<usize>,
}

/// Cluster center expressed in raw feature units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterCentroid {
    pub cluster: usize,
    pub recency: f64,
    pub frequency: f64,
    pub monetary: f64,
    pub product_diversity: f64,
}

/// Summary row of one cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub count: usize,
    /// Share of all customers, in percent
    pub share: f64,
    pub avg_recency: f64,
    pub avg_frequency: f64,
    pub avg_monetary: f64,
    pub avg_diversity: f64,
}

impl Segmentation {
    /// Customer id to cluster label
    pub fn assignments(&self) -> BTreeMap<&str, usize> {
        self.customers
            .iter()
            .map(|c| (c.features.customer_id.as_str(), c.cluster))
            .collect()
    }

    /// Distinct labels in use, ascending
    pub fn labels(&self) -> BTreeSet<usize> {
        self.customers.iter().map(|c| c.cluster).collect()
    }

    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for customer in &self.customers {
            if customer.cluster < self.n_clusters {
                sizes[customer.cluster] += 1;
            }
        }
        sizes
    }

    /// Count, share and mean features of every non-empty cluster
    pub fn profiles(&self) -> Vec<ClusterProfile> {
        let total = self.customers.len();
        let mut sums: BTreeMap<usize, (usize, [f64; N_FEATURES])> = BTreeMap::new();
        for customer in &self.customers {
            let (count, acc) = sums.entry(customer.cluster).or_default();
            *count += 1;
            for (sum, value) in acc.iter_mut().zip(customer.features.as_row()) {
                *sum += value;
            }
        }

        sums.into_iter()
            .map(|(cluster, (count, acc))| {
                let n = count as f64;
                ClusterProfile {
                    cluster,
                    count,
                    share: (n / total as f64 * 1000.0).round() / 10.0,
                    avg_recency: acc[0] / n,
                    avg_frequency: acc[1] / n,
                    avg_monetary: acc[2] / n,
                    avg_diversity: acc[3] / n,
                }
            })
            .collect()
    }

    /// K-Means centers mapped back through the standardizer
    pub fn feature_centroids(&self) -> Vec<ClusterCentroid> {
        self.standardizer
            .inverse_transform(&self.centroids)
            .outer_iter()
            .enumerate()
            .map(|(cluster, row)| ClusterCentroid {
                cluster,
                recency: row[0],
                frequency: row[1],
                monetary: row[2],
                product_diversity: row[3],
            })
            .collect()
    }

    /// Left-join cluster labels onto transaction lines by customer id
    pub fn segment_transactions(&self, lines: &[TransactionLine]) -> Vec<SegmentedTransaction> {
        let assignments = self.assignments();
        lines
            .iter()
            .map(|line| SegmentedTransaction {
                line: line.clone(),
                cluster: assignments.get(line.customer_id.as_str()).copied(),
            })
            .collect()
    }
}

/// Standardize customer features and cluster them with seeded K-Means
///
/// # Arguments
/// * `features` - One vector per customer
/// * `params` - Cluster count, iteration cap, tolerance and seed
///
/// # Returns
/// * `Segmentation` with one label per input customer
pub fn segment_customers(
    features: &[CustomerFeatures],
    params: &SegmentParams,
) -> Result<Segmentation, SegmentError> {
    if params.n_clusters > features.len() {
        return Err(SegmentError::TooManyClusters {
            clusters: params.n_clusters,
            customers: features.len(),
        });
    }

    debug!(
        clusters = params.n_clusters,
        max_iters = params.max_iters,
        tolerance = params.tolerance,
        seed = params.seed,
        "fitting k-means"
    );

    let raw = feature_matrix(features);
    let standardizer = Standardizer::fit(&raw);
    let scaled = standardizer.transform(&raw);

    let dataset = DatasetBase::from(scaled.clone());
    let rng = StdRng::seed_from_u64(params.seed);
    let model = KMeans::params_with(params.n_clusters, rng, L2Dist)
        .n_runs(params.n_runs.max(1))
        .max_n_iterations(params.max_iters)
        .tolerance(params.tolerance)
        .fit(&dataset)?;

    let labels: Array1<usize> = model.predict(&scaled);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(&scaled, &labels, &centroids);

    let customers: Vec<SegmentedCustomer> = features
        .iter()
        .cloned()
        .zip(labels.iter().copied())
        .map(|(features, cluster)| SegmentedCustomer { features, cluster })
        .collect();

    info!(
        customers = customers.len(),
        clusters = params.n_clusters,
        inertia,
        "customers segmented"
    );

    Ok(Segmentation {
        n_clusters: params.n_clusters,
        customers,
        centroids,
        inertia,
        standardizer,
    })
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| {
            features
                .row(i)
                .iter()
                .zip(centroids.row(cluster).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        })
        .sum()
}
