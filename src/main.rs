//! SegmentForge: customer segmentation and market basket recommendations
//!
//! This is the main entrypoint that orchestrates data loading, segmentation,
//! rule mining, reporting and recommendation queries.

use std::io::BufRead;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use segmentforge::cli::{parse_query, OutputFormat};
use segmentforge::{load_transactions, report, run_pipeline, Args, PipelineSnapshot, SnapshotStore};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(args.verbose);
    args.validate()?;

    let start_time = Instant::now();
    let lines = load_transactions(&args.input)
        .with_context(|| format!("failed to load transactions from {}", args.input))?;
    let snapshot = run_pipeline(&lines, &args.pipeline_config())?;
    tracing::info!(
        elapsed_secs = start_time.elapsed().as_secs_f64(),
        "pipeline complete"
    );

    let store = SnapshotStore::new(snapshot);
    let queries = args
        .recommend
        .iter()
        .map(String::as_str)
        .map(parse_query)
        .collect::<Result<Vec<_>>>()?;

    match args.format {
        OutputFormat::Text => print_text_report(&args, &store.load()),
        OutputFormat::Json => print_json_report(&args, &store.load(), &queries)?,
    }

    if args.format == OutputFormat::Text {
        for (cluster, product) in &queries {
            run_query(&args, &store.load(), *cluster, product);
        }
    }

    if args.interactive {
        run_interactive(&args, &store)?;
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_text_report(args: &Args, snapshot: &PipelineSnapshot) {
    println!("=== Customer Segmentation ===");
    println!(
        "Segmentation of {} customers based on Recency, Frequency, Monetary, and Product Diversity.\n",
        snapshot.customers.len()
    );
    print!("{}", report::profile_table(&snapshot.profiles));
    println!("Within-cluster sum of squares: {:.2}", snapshot.inertia);

    println!("\n=== Top Product Affinity ===");
    print!(
        "{}",
        report::top_products_table(&snapshot.affinity, args.top_products)
    );

    println!("\n=== Association Rules (Apriori) ===");
    if snapshot.rules.is_empty() {
        println!("No itemset reached the minimum support of {}.", args.min_support);
    } else {
        println!("{} rules, top {} by lift:", snapshot.rules.len(), args.rules.min(snapshot.rules.len()));
        print!("{}", report::rules_table(&snapshot.rules, args.rules));
    }

    if !snapshot.category_map.conflicts().is_empty() {
        println!(
            "\nWarning: {} product(s) listed under more than one category.",
            snapshot.category_map.conflicts().len()
        );
    }
    if !snapshot.mixed_transactions.is_empty() {
        println!(
            "Warning: {} transaction(s) mix product categories.",
            snapshot.mixed_transactions.len()
        );
    }
}

fn print_json_report(
    args: &Args,
    snapshot: &PipelineSnapshot,
    queries: &[(usize, String)],
) -> Result<()> {
    let recommendations: Vec<_> = queries
        .iter()
        .map(|(cluster, product)| {
            json!({
                "cluster": cluster,
                "product": product,
                "recommendations": snapshot.recommend(*cluster, product, args.top_k),
            })
        })
        .collect();

    let output = json!({
        "snapshot": serde_json::to_value(snapshot)?,
        "queries": recommendations,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_query(args: &Args, snapshot: &PipelineSnapshot, cluster: usize, product: &str) {
    let recs = snapshot.recommend(cluster, product, args.top_k);
    println!("\n=== Recommendations ===");
    print!("{}", report::recommendation_list(cluster, product, &recs));
}

/// Answer "cluster,product" lines from stdin until EOF or an empty line
fn run_interactive(args: &Args, store: &SnapshotStore) -> Result<()> {
    let snapshot = store.load();
    println!("\nClusters: {:?}", snapshot.clusters());
    println!("Products: {}", snapshot.category_map.product_names().join(", "));
    println!("Enter queries as \"cluster,product name\" (empty line to quit):");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            break;
        }
        match parse_query(&line) {
            Ok((cluster, product)) => run_query(args, &store.load(), cluster, &product),
            Err(e) => eprintln!("{e}"),
        }
    }
    Ok(())
}
