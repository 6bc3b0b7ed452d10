//! SegmentForge: customer segmentation and market basket recommendations
//!
//! This library derives RFM and product-diversity features from retail
//! transaction lines, segments customers with K-Means, mines association
//! rules with Apriori, and fuses both into same-category product
//! recommendations for a (cluster, purchased product) query.

pub mod affinity;
pub mod basket;
pub mod cli;
pub mod data;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod recommend;
pub mod report;

// Re-export public items for easier access
pub use affinity::{AffinityTable, CategoryMap};
pub use basket::{mine_rules, AssociationRule, Itemset, MiningParams};
pub use cli::Args;
pub use data::{load_transactions, TransactionLine};
pub use error::{DataError, PipelineError, SegmentError};
pub use features::{build_customer_features, CustomerFeatures};
pub use model::{segment_customers, SegmentParams, Segmentation, SegmentedTransaction};
pub use pipeline::{run_pipeline, PipelineConfig, PipelineSnapshot, SnapshotStore};
pub use recommend::{recommend, DEFAULT_TOP_K};

/// Common result type used by the command-line layer
pub type Result<T> = anyhow::Result<T>;
