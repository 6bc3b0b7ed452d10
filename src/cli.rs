//! Command-line interface definitions and argument parsing

use clap::{Parser, ValueEnum};

use crate::basket::MiningParams;
use crate::model::SegmentParams;
use crate::pipeline::PipelineConfig;

/// Output format for the pipeline report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Customer segmentation and product recommendations from transaction logs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, env = "SEGMENTFORGE_INPUT", default_value = "customer_purchase_data.csv")]
    pub input: String,

    /// Number of customer segments for K-Means
    #[arg(short = 'k', long, env = "SEGMENTFORGE_CLUSTERS", default_value = "4")]
    pub clusters: usize,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value = "300")]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Independent K-Means initializations
    #[arg(long, default_value = "10")]
    pub n_runs: usize,

    /// Seed for K-Means initialization
    #[arg(long, env = "SEGMENTFORGE_SEED", default_value = "42")]
    pub seed: u64,

    /// Minimum itemset support, as a fraction of transactions
    #[arg(long, default_value = "0.01")]
    pub min_support: f64,

    /// Minimum lift for association rules
    #[arg(long, default_value = "1.0")]
    pub min_lift: f64,

    /// Recommendations returned per query
    #[arg(long, default_value = "5")]
    pub top_k: usize,

    /// Products listed per cluster in the affinity report
    #[arg(long, default_value = "3")]
    pub top_products: usize,

    /// Association rules listed in the report
    #[arg(long, default_value = "10")]
    pub rules: usize,

    /// Recommendation query as "cluster,product name"; may be repeated
    /// Example: --recommend "2,Organic Apples"
    #[arg(short, long)]
    pub recommend: Vec<String>,

    /// Read "cluster,product name" queries from standard input
    #[arg(long)]
    pub interactive: bool,

    /// Reject data where a product name appears under several categories
    #[arg(long)]
    pub strict_categories: bool,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Check numeric parameters that clap cannot range-check
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.tolerance > 0.0) {
            anyhow::bail!("Tolerance must be positive, got {}", self.tolerance);
        }
        if !(self.min_support > 0.0 && self.min_support <= 1.0) {
            anyhow::bail!("Minimum support must be in (0, 1], got {}", self.min_support);
        }
        if !(self.min_lift >= 0.0) {
            anyhow::bail!("Minimum lift must be non-negative, got {}", self.min_lift);
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            segment: SegmentParams {
                n_clusters: self.clusters,
                max_iters: self.max_iters,
                tolerance: self.tolerance,
                n_runs: self.n_runs,
                seed: self.seed,
            },
            mining: MiningParams {
                min_support: self.min_support,
                min_lift: self.min_lift,
                max_len: None,
            },
            strict_categories: self.strict_categories,
        }
    }
}

/// Parse a "cluster,product name" query
///
/// Only the first comma separates the fields, so product names may contain
/// commas.
pub fn parse_query(query: &str) -> crate::Result<(usize, String)> {
    let Some((cluster, product)) = query.split_once(',') else {
        anyhow::bail!("Query must be in format 'cluster,product name': {query}");
    };

    let cluster: usize = cluster
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid cluster value: {}", cluster.trim()))?;
    let product = product.trim();
    if product.is_empty() {
        anyhow::bail!("Query is missing a product name: {query}");
    }

    Ok((cluster, product.to_string()))
}
