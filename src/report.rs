//! Text tables summarizing a pipeline snapshot

use std::fmt::Write;

use itertools::Itertools;

use crate::affinity::AffinityTable;
use crate::basket::{AssociationRule, Itemset};
use crate::features::FEATURE_NAMES;
use crate::model::ClusterProfile;

fn join(items: &Itemset) -> String {
    items.iter().join(", ")
}

/// Cluster size, share and mean features
pub fn profile_table(profiles: &[ClusterProfile]) -> String {
    let mut out = String::new();
    let [recency, frequency, monetary, diversity] =
        FEATURE_NAMES.map(|name| format!("Avg {}", name.replace('_', " ")));
    let _ = writeln!(
        out,
        "{:>7}  {:>6}  {:>9}  {:>11}  {:>13}  {:>12}  {:>21}",
        "Cluster", "Count", "Count (%)", recency, frequency, monetary, diversity
    );
    for p in profiles {
        let _ = writeln!(
            out,
            "{:>7}  {:>6}  {:>9.1}  {:>11.1}  {:>13.2}  {:>12.2}  {:>21.2}",
            p.cluster, p.count, p.share, p.avg_recency, p.avg_frequency, p.avg_monetary, p.avg_diversity
        );
    }
    out
}

/// The `n` heaviest products of every cluster
pub fn top_products_table(affinity: &AffinityTable, n: usize) -> String {
    let mut out = String::new();
    for cluster in affinity.clusters() {
        let _ = writeln!(out, "Cluster {cluster}:");
        for (rank, product) in affinity.top(cluster, n).iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. {} (qty {})",
                rank + 1,
                product.product_name,
                product.quantity
            );
        }
    }
    out
}

/// The first `n` rules, strongest lift first
pub fn rules_table(rules: &[AssociationRule], n: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<40}  {:<40}  {:>8}  {:>10}  {:>6}",
        "IF Product(s)", "THEN Product(s)", "support", "confidence", "lift"
    );
    for rule in rules.iter().take(n) {
        let _ = writeln!(
            out,
            "{:<40}  {:<40}  {:>8.3}  {:>10.3}  {:>6.2}",
            join(&rule.antecedent),
            join(&rule.consequent),
            rule.support,
            rule.confidence,
            rule.lift
        );
    }
    out
}

/// Numbered recommendation list, or a notice when there is none
pub fn recommendation_list(cluster: usize, product: &str, recommendations: &[String]) -> String {
    let mut out = format!("Based on cluster {cluster} and purchase of `{product}`:\n");
    if recommendations.is_empty() {
        out.push_str("  No strong intra-category association or cluster affinity found.\n");
    }
    for (i, item) in recommendations.iter().enumerate() {
        let _ = writeln!(out, "  {}. {item}", i + 1);
    }
    out
}
