//! Integration tests for SegmentForge

use segmentforge::{
    build_customer_features, load_transactions, mine_rules, recommend, run_pipeline, segment_customers,
    DataError, MiningParams, PipelineConfig, PipelineError, SegmentError, SegmentParams,
    DEFAULT_TOP_K,
};
use std::io::Write;
use tempfile::NamedTempFile;

const HEADER: &str = "Customer ID,Transaction ID,Product ID,Product Category,Product Name,Quantity,Price,Date of Purchase";

/// Create a test CSV file with sample data
fn create_test_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();

    let rows = [
        // C0001 - frequent food buyer
        "C0001,T00001,F01,Food,Organic Apples,2,3.50,2024-01-05",
        "C0001,T00001,F02,Food,Whole Wheat Bread,1,4.99,2024-01-05",
        "C0001,T00002,F01,Food,Organic Apples,3,3.50,2024-03-10",
        "C0001,T00002,F02,Food,Whole Wheat Bread,2,4.99,2024-03-10",
        "C0001,T00003,F03,Food,Premium Coffee Beans,1,12.50,2024-06-01",
        "C0001,T00004,F01,Food,Organic Apples,4,3.50,2024-06-20",
        "C0001,T00004,F02,Food,Whole Wheat Bread,1,4.99,2024-06-20",
        // C0002 - food buyer
        "C0002,T00005,F01,Food,Organic Apples,1,3.50,2024-02-14",
        "C0002,T00005,F03,Food,Premium Coffee Beans,2,12.50,2024-02-14",
        "C0002,T00006,F02,Food,Whole Wheat Bread,1,4.99,2024-05-02",
        "C0002,T00006,F01,Food,Organic Apples,1,3.50,2024-05-02",
        // C0003 - occasional apparel buyer
        "C0003,T00007,C03,Apparel,Casual Sneakers,1,55.00,2023-09-01",
        "C0003,T00007,C04,Apparel,Winter Wool Scarf,1,35.00,2023-09-01",
        // C0004 - big-ticket apparel buyer
        "C0004,T00008,C06,Apparel,Business Suit Jacket,1,199.99,2024-06-25",
        "C0004,T00008,C09,Apparel,Dress Socks (Pack of 5),3,12.00,2024-06-25",
        "C0004,T00009,C06,Apparel,Business Suit Jacket,1,199.99,2024-06-28",
        // C0005 - electronics
        "C0005,T00010,E01,Electronics,Noise-Cancelling Headphones,1,199.99,2023-11-11",
        "C0005,T00010,E02,Electronics,Wireless Charging Pad,2,39.99,2023-11-11",
        // C0006 - one-off food buyer
        "C0006,T00011,F03,Food,Premium Coffee Beans,1,12.50,2023-08-15",
    ];
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }

    file
}

fn config(k: usize) -> PipelineConfig {
    PipelineConfig {
        segment: SegmentParams {
            n_clusters: k,
            max_iters: 100,
            ..SegmentParams::default()
        },
        ..PipelineConfig::default()
    }
}

#[test]
fn test_end_to_end_pipeline() {
    let test_file = create_test_csv();
    let lines = load_transactions(test_file.path()).unwrap();
    assert_eq!(lines.len(), 19);

    let snapshot = run_pipeline(&lines, &config(3)).unwrap();

    // Every customer has exactly one label
    assert_eq!(snapshot.customers.len(), 6);
    assert!(snapshot.customers.iter().all(|c| c.cluster < 3));
    assert!(snapshot.clusters().len() <= 3);
    assert_eq!(snapshot.profiles.iter().map(|p| p.count).sum::<usize>(), 6);

    // Every line is joined to its customer's cluster
    assert_eq!(snapshot.transactions.len(), 19);
    for t in &snapshot.transactions {
        let customer = snapshot
            .customers
            .iter()
            .find(|c| c.features.customer_id == t.line.customer_id)
            .unwrap();
        assert_eq!(t.cluster, Some(customer.cluster));
    }

    // Rules are bounded and ordered
    assert!(!snapshot.rules.is_empty());
    assert!(snapshot.rules.windows(2).all(|w| w[0].lift >= w[1].lift));
    for rule in &snapshot.rules {
        assert!((0.0..=1.0).contains(&rule.support));
        assert!((0.0..=1.0).contains(&rule.confidence));
        assert!(rule.lift >= 0.0);
    }

    assert!(snapshot.mixed_transactions.is_empty());
    assert!(snapshot.category_map.conflicts().is_empty());
}

#[test]
fn test_feature_computation() {
    let test_file = create_test_csv();
    let lines = load_transactions(test_file.path()).unwrap();
    let features = build_customer_features(&lines).unwrap();

    assert_eq!(features.len(), 6);
    assert!(features.iter().all(|f| f.recency >= 0));

    let c1 = &features[0];
    assert_eq!(c1.customer_id, "C0001");
    // latest purchase overall is 2024-06-28, reference 2024-06-29
    assert_eq!(c1.recency, 9);
    assert_eq!(c1.frequency, 4);
    assert_eq!(c1.product_diversity, 3);
    let expected_monetary = 3.50 * 3.0 + 4.99 * 3.0 + 12.50;
    assert!((c1.monetary - expected_monetary).abs() < 1e-9);

    let c4 = &features[3];
    assert_eq!(c4.recency, 1);
}

#[test]
fn test_segmentation_is_reproducible() {
    let test_file = create_test_csv();
    let lines = load_transactions(test_file.path()).unwrap();
    let features = build_customer_features(&lines).unwrap();
    let params = SegmentParams {
        n_clusters: 3,
        ..SegmentParams::default()
    };

    let first = segment_customers(&features, &params).unwrap();
    let second = segment_customers(&features, &params).unwrap();
    assert_eq!(first.assignments(), second.assignments());
}

#[test]
fn test_recommendations() {
    let test_file = create_test_csv();
    let lines = load_transactions(test_file.path()).unwrap();
    let snapshot = run_pipeline(&lines, &config(3)).unwrap();

    let cluster = snapshot
        .customers
        .iter()
        .find(|c| c.features.customer_id == "C0001")
        .map(|c| c.cluster)
        .unwrap();

    let recs = snapshot.recommend(cluster, "Organic Apples", DEFAULT_TOP_K);
    assert!(recs.contains(&"Whole Wheat Bread".to_string()));
    assert!(!recs.contains(&"Organic Apples".to_string()));
    assert!(recs.len() <= DEFAULT_TOP_K);
    assert!(recs
        .iter()
        .all(|r| snapshot.category_map.get(r) == Some("Food")));

    // the free function answers identically
    let direct = recommend(
        cluster,
        "Organic Apples",
        &snapshot.rules,
        &snapshot.affinity,
        &snapshot.category_map,
        DEFAULT_TOP_K,
    );
    assert_eq!(recs, direct);

    assert!(snapshot.recommend(cluster, "Flux Capacitor", DEFAULT_TOP_K).is_empty());
}

#[test]
fn test_high_support_threshold_yields_no_rules() {
    let test_file = create_test_csv();
    let lines = load_transactions(test_file.path()).unwrap();
    let mut config = config(2);
    config.mining = MiningParams {
        min_support: 0.9,
        ..MiningParams::default()
    };

    let snapshot = run_pipeline(&lines, &config).unwrap();
    assert!(snapshot.rules.is_empty());

    // the affinity signal still answers
    let cluster = snapshot.customers[0].cluster;
    let recs = snapshot.recommend(cluster, "Organic Apples", DEFAULT_TOP_K);
    assert!(recs
        .iter()
        .all(|r| snapshot.category_map.get(r) == Some("Food")));

    let segmented: Vec<_> = snapshot.transactions.clone();
    assert!(mine_rules(&segmented, &config.mining).is_empty());
}

#[test]
fn test_error_handling_invalid_clusters() {
    let test_file = create_test_csv();
    let lines = load_transactions(test_file.path()).unwrap();

    let result = run_pipeline(&lines, &config(7));
    assert!(matches!(
        result,
        Err(PipelineError::Segment(SegmentError::TooManyClusters {
            clusters: 7,
            customers: 6
        }))
    ));
}

#[test]
fn test_error_handling_invalid_date() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    writeln!(file, "C0001,T00001,F01,Food,Organic Apples,2,3.50,2024-01-05").unwrap();
    writeln!(file, "C0001,T00002,F01,Food,Organic Apples,2,3.50,sometime").unwrap();

    assert!(matches!(
        load_transactions(file.path()),
        Err(DataError::InvalidDate { row: 3, .. })
    ));
}

#[test]
fn test_error_handling_non_finite_price() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    writeln!(file, "C0001,T00001,F01,Food,Organic Apples,2,NaN,2024-01-05").unwrap();

    assert!(matches!(
        load_transactions(file.path()),
        Err(DataError::InvalidNumber { row: 2, column: "Price", .. })
    ));
}

#[test]
fn test_json_export_keeps_centroids_and_conviction() {
    let test_file = create_test_csv();
    let lines = load_transactions(test_file.path()).unwrap();
    let snapshot = run_pipeline(&lines, &config(3)).unwrap();
    let json = serde_json::to_value(&snapshot).unwrap();

    assert_eq!(json["centroids"].as_array().unwrap().len(), 3);
    assert!(json["centroids"][0]["monetary"].is_f64());

    // every conviction is either a number or the explicit "inf" marker
    for rule in json["rules"].as_array().unwrap() {
        let conviction = &rule["conviction"];
        assert!(conviction.is_f64() || conviction == "inf");
    }

    let names: Vec<&String> = json["category_map"]["categories"]
        .as_object()
        .unwrap()
        .keys()
        .collect();
    assert!(names.windows(2).all(|w| w[0] < w[1]));
}
