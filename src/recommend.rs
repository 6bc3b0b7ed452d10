//! Recommendation fusion: association rules and cluster affinity, restricted to
//! the purchased product's category

use std::cmp::Reverse;

use crate::affinity::{AffinityTable, CategoryMap};
use crate::basket::AssociationRule;

/// Recommendations returned when the caller does not ask for a count
pub const DEFAULT_TOP_K: usize = 5;

/// Heaviest cluster products considered as affinity candidates
pub const AFFINITY_CANDIDATES: usize = 10;

/// Rank same-category products for a customer of `cluster_id` who bought
/// `purchased_product`
///
/// Candidates are the consequents of every rule whose antecedent contains the
/// purchased product, plus the cluster's ten heaviest products, both kept only
/// when they share the purchased product's category. They are ranked by their
/// quantity within the cluster (0 when never bought there), then by name, and
/// truncated to `top_k`.
///
/// An unknown product yields an empty list.
pub fn recommend(
    cluster_id: usize,
    purchased_product: &str,
    rules: &[AssociationRule],
    affinity: &AffinityTable,
    category_map: &CategoryMap,
    top_k: usize,
) -> Vec<String> {
    let Some(category) = category_map.get(purchased_product) else {
        return Vec::new();
    };
    let same_category = |product: &str| category_map.get(product) == Some(category);

    let collaborative = rules
        .iter()
        .filter(|rule| rule.antecedent_contains(purchased_product))
        .flat_map(|rule| rule.consequent.iter().map(String::as_str));
    let cluster_favourites = affinity
        .top(cluster_id, AFFINITY_CANDIDATES)
        .iter()
        .map(|p| p.product_name.as_str());

    let mut candidates: Vec<&str> = Vec::new();
    for product in collaborative.chain(cluster_favourites) {
        if product != purchased_product && same_category(product) && !candidates.contains(&product) {
            candidates.push(product);
        }
    }

    candidates.sort_by_cached_key(|&product| (Reverse(affinity.quantity(cluster_id, product)), product));
    candidates
        .into_iter()
        .take(top_k)
        .map(str::to_string)
        .collect()
}
