//! End-to-end pipeline run and the versioned snapshot it produces

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::affinity::{mixed_category_transactions, AffinityTable, CategoryMap};
use crate::basket::{mine_rules, AssociationRule, MiningParams};
use crate::data::TransactionLine;
use crate::error::PipelineError;
use crate::features::build_customer_features;
use crate::model::{
    segment_customers, ClusterCentroid, ClusterProfile, SegmentParams, SegmentedCustomer,
    SegmentedTransaction,
};
use crate::recommend::recommend;

/// Parameters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineConfig {
    pub segment: SegmentParams,
    pub mining: MiningParams,
    /// Fail the run when a product name carries several categories
    pub strict_categories: bool,
}

/// Immutable result of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    pub transactions: Vec<SegmentedTransaction>,
    pub customers: Vec<SegmentedCustomer>,
    pub profiles: Vec<ClusterProfile>,
    /// Cluster centers in raw feature units
    pub centroids: Vec<ClusterCentroid>,
    pub inertia: f64,
    pub rules: Vec<AssociationRule>,
    pub affinity: AffinityTable,
    pub category_map: CategoryMap,
    /// Transactions whose lines span several categories
    pub mixed_transactions: Vec<String>,
}

impl PipelineSnapshot {
    /// Ranked same-category recommendations; see [`recommend`]
    pub fn recommend(&self, cluster_id: usize, purchased_product: &str, top_k: usize) -> Vec<String> {
        recommend(
            cluster_id,
            purchased_product,
            &self.rules,
            &self.affinity,
            &self.category_map,
            top_k,
        )
    }

    /// Cluster labels present in the segmentation, ascending
    pub fn clusters(&self) -> Vec<usize> {
        self.profiles.iter().map(|p| p.cluster).collect()
    }
}

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Run every stage from raw lines to a snapshot
///
/// Any validation or parameter error aborts the run; nothing partial is
/// returned.
pub fn run_pipeline(
    lines: &[TransactionLine],
    config: &PipelineConfig,
) -> Result<PipelineSnapshot, PipelineError> {
    let features = build_customer_features(lines)?;
    let segmentation = segment_customers(&features, &config.segment)?;
    let transactions = segmentation.segment_transactions(lines);

    let category_map = CategoryMap::from_transactions(&transactions);
    if config.strict_categories {
        category_map.validate()?;
    }
    let mixed_transactions = mixed_category_transactions(&transactions)?;

    let rules = mine_rules(&transactions, &config.mining);
    let affinity = AffinityTable::from_transactions(&transactions)?;

    let snapshot = PipelineSnapshot {
        version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
        built_at: Utc::now(),
        profiles: segmentation.profiles(),
        centroids: segmentation.feature_centroids(),
        inertia: segmentation.inertia,
        customers: segmentation.customers,
        transactions,
        rules,
        affinity,
        category_map,
        mixed_transactions,
    };
    info!(version = snapshot.version, "pipeline snapshot built");
    Ok(snapshot)
}

/// Shared holder of the current snapshot
///
/// Readers get an `Arc` to one consistent snapshot; a rebuild replaces it in
/// a single swap and never mutates a published snapshot.
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<PipelineSnapshot>>,
}

impl SnapshotStore {
    pub fn new(snapshot: PipelineSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot queries should read
    pub fn load(&self) -> Arc<PipelineSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Publish `snapshot`, returning the one it replaced
    pub fn swap(&self, snapshot: PipelineSnapshot) -> Arc<PipelineSnapshot> {
        self.publish(Arc::new(snapshot))
    }

    fn publish(&self, snapshot: Arc<PipelineSnapshot>) -> Arc<PipelineSnapshot> {
        std::mem::replace(&mut *self.current.write(), snapshot)
    }

    /// Run the pipeline and publish the result; on failure the current
    /// snapshot stays in place
    pub fn rebuild(
        &self,
        lines: &[TransactionLine],
        config: &PipelineConfig,
    ) -> Result<Arc<PipelineSnapshot>, PipelineError> {
        let snapshot = Arc::new(run_pipeline(lines, config)?);
        self.publish(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DataError, SegmentError};
    use chrono::NaiveDate;

    fn line(customer: &str, txn: &str, product: &str, category: &str, qty: i64, day: u32) -> TransactionLine {
        TransactionLine {
            customer_id: customer.to_string(),
            transaction_id: txn.to_string(),
            product_id: product.to_string(),
            product_category: category.to_string(),
            product_name: product.to_string(),
            quantity: qty,
            price: 2.0,
            purchase_date: NaiveDate::from_ymd_opt(2024, 2, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    fn create_test_lines() -> Vec<TransactionLine> {
        vec![
            line("C1", "T1", "Apples", "Food", 2, 1),
            line("C1", "T1", "Bread", "Food", 1, 1),
            line("C1", "T2", "Apples", "Food", 3, 20),
            line("C1", "T2", "Bread", "Food", 1, 20),
            line("C2", "T3", "Apples", "Food", 1, 2),
            line("C2", "T3", "Coffee", "Food", 1, 2),
            line("C3", "T4", "Scarf", "Apparel", 1, 25),
            line("C3", "T4", "Jeans", "Apparel", 2, 25),
            line("C4", "T5", "Scarf", "Apparel", 1, 3),
        ]
    }

    fn config(k: usize) -> PipelineConfig {
        PipelineConfig {
            segment: SegmentParams {
                n_clusters: k,
                ..SegmentParams::default()
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_run_pipeline() {
        let snapshot = run_pipeline(&create_test_lines(), &config(2)).unwrap();

        assert_eq!(snapshot.customers.len(), 4);
        assert_eq!(snapshot.transactions.len(), 9);
        assert!(snapshot.transactions.iter().all(|t| t.cluster.is_some()));
        assert_eq!(snapshot.category_map.len(), 5);
        assert!(snapshot.mixed_transactions.is_empty());
        assert!(!snapshot.rules.is_empty());
        assert!(snapshot.clusters().len() <= 2);

        let cluster = snapshot
            .customers
            .iter()
            .find(|c| c.features.customer_id == "C1")
            .map(|c| c.cluster)
            .unwrap();
        let recs = snapshot.recommend(cluster, "Apples", 5);
        assert!(recs.contains(&"Bread".to_string()));
        assert!(!recs.contains(&"Apples".to_string()));
        assert!(recs.iter().all(|r| snapshot.category_map.get(r) == Some("Food")));
    }

    #[test]
    fn test_strict_categories() {
        let mut lines = create_test_lines();
        lines.push(line("C4", "T6", "Apples", "Produce", 1, 4));

        let mut strict = config(2);
        assert!(run_pipeline(&lines, &strict).is_ok());

        strict.strict_categories = true;
        assert!(matches!(
            run_pipeline(&lines, &strict),
            Err(PipelineError::Data(DataError::CategoryConflict { .. }))
        ));
    }

    #[test]
    fn test_too_many_clusters_aborts_run() {
        assert!(matches!(
            run_pipeline(&create_test_lines(), &config(5)),
            Err(PipelineError::Segment(SegmentError::TooManyClusters { .. }))
        ));
    }

    #[test]
    fn test_snapshot_store_swaps_atomically() {
        let lines = create_test_lines();
        let store = SnapshotStore::new(run_pipeline(&lines, &config(2)).unwrap());

        let before = store.load();
        let after = store.rebuild(&lines, &config(3)).unwrap();
        assert!(after.version > before.version);
        assert_eq!(store.load().version, after.version);
        // readers holding the old snapshot keep a consistent view
        assert_eq!(before.customers.len(), 4);

        assert!(store.rebuild(&lines, &config(9)).is_err());
        assert_eq!(store.load().version, after.version);
    }

    #[test]
    fn test_rebuild_returns_the_snapshot_it_published() {
        let lines = create_test_lines();
        let store = Arc::new(SnapshotStore::new(run_pipeline(&lines, &config(2)).unwrap()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                let lines = lines.clone();
                let k = 2 + i % 2;
                std::thread::spawn(move || {
                    let built: Vec<_> = (0..5)
                        .map(|_| store.rebuild(&lines, &config(k)).unwrap())
                        .collect();
                    (k, built)
                })
            })
            .collect();

        for handle in handles {
            let (k, built) = handle.join().unwrap();
            let mut previous = 0;
            for snapshot in built {
                // each call gets back its own build, never a concurrent one
                assert_eq!(snapshot.centroids.len(), k);
                assert!(snapshot.version > previous);
                previous = snapshot.version;
            }
        }
    }

    #[test]
    fn test_snapshot_is_shared_across_threads() {
        let store = Arc::new(SnapshotStore::new(
            run_pipeline(&create_test_lines(), &config(2)).unwrap(),
        ));
        let expected = store.load().recommend(0, "Apples", 5);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.load().recommend(0, "Apples", 5))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }
}
