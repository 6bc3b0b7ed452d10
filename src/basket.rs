//! Market basket analysis: transaction incidence matrix, Apriori and association rules

use std::collections::{BTreeMap, BTreeSet, HashMap};

use itertools::Itertools;
use ndarray::Array2;
use serde::Serialize;
use tracing::{debug, info};

use crate::model::SegmentedTransaction;

/// Ordered set of product names
pub type Itemset = BTreeSet<String>;

/// Thresholds for itemset mining and rule filtering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiningParams {
    /// Minimum fraction of transactions containing an itemset
    pub min_support: f64,
    /// Minimum lift for a rule to be kept
    pub min_lift: f64,
    /// Longest itemset considered; unbounded when `None`
    pub max_len: Option<usize>,
}

impl Default for MiningParams {
    fn default() -> Self {
        Self {
            min_support: 0.01,
            min_lift: 1.0,
            max_len: None,
        }
    }
}

/// Boolean transaction × product matrix
#[derive(Debug, Clone)]
pub struct BasketMatrix {
    /// Row labels, ascending
    pub transactions: Vec<String>,
    /// Column labels, ascending
    pub items: Vec<String>,
    pub cells: Array2<bool>,
}

impl BasketMatrix {
    /// One row per transaction id; a cell is set when the summed quantity of
    /// that product in the transaction is positive
    pub fn from_transactions(lines: &[SegmentedTransaction]) -> Self {
        let mut quantities: BTreeMap<&str, BTreeMap<&str, i64>> = BTreeMap::new();
        let mut items: BTreeSet<&str> = BTreeSet::new();
        for SegmentedTransaction { line, .. } in lines {
            *quantities
                .entry(&line.transaction_id)
                .or_default()
                .entry(&line.product_name)
                .or_default() += line.quantity;
            items.insert(&line.product_name);
        }

        let items: Vec<&str> = items.into_iter().collect();
        let column: HashMap<&str, usize> = items.iter().enumerate().map(|(j, &i)| (i, j)).collect();

        let mut cells = Array2::from_elem((quantities.len(), items.len()), false);
        for (row, basket) in quantities.values().enumerate() {
            for (item, &qty) in basket {
                if qty > 0 {
                    cells[[row, column[item]]] = true;
                }
            }
        }

        Self {
            transactions: quantities.keys().map(|t| t.to_string()).collect(),
            items: items.into_iter().map(str::to_string).collect(),
            cells,
        }
    }

    pub fn n_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Fraction of transactions containing every column in `columns`
    pub fn support(&self, columns: &[usize]) -> f64 {
        if self.cells.nrows() == 0 {
            return 0.0;
        }
        let hits = self
            .cells
            .outer_iter()
            .filter(|row| columns.iter().all(|&j| row[j]))
            .count();
        hits as f64 / self.cells.nrows() as f64
    }

    fn names(&self, columns: &[usize]) -> Itemset {
        columns.iter().map(|&j| self.items[j].clone()).collect()
    }
}

/// Itemset whose support clears the mining threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequentItemset {
    pub items: Itemset,
    pub support: f64,
}

/// Frequent itemsets keyed by sorted column indices
#[derive(Debug, Clone, Default)]
pub struct FrequentItemsets {
    /// Per level, in lexicographic column order
    levels: Vec<Vec<(Vec<usize>, f64)>>,
    support: HashMap<Vec<usize>, f64>,
}

impl FrequentItemsets {
    pub fn len(&self) -> usize {
        self.support.len()
    }

    pub fn is_empty(&self) -> bool {
        self.support.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &(Vec<usize>, f64)> {
        self.levels.iter().flatten()
    }

    pub fn named(&self, matrix: &BasketMatrix) -> Vec<FrequentItemset> {
        self.iter()
            .map(|(columns, support)| FrequentItemset {
                items: matrix.names(columns),
                support: *support,
            })
            .collect()
    }
}

/// Level-wise Apriori search over the incidence matrix
pub fn frequent_itemsets(matrix: &BasketMatrix, params: &MiningParams) -> FrequentItemsets {
    let mut result = FrequentItemsets::default();
    if matrix.n_transactions() == 0 {
        return result;
    }

    let mut current: Vec<(Vec<usize>, f64)> = (0..matrix.items.len())
        .map(|j| (vec![j], matrix.support(&[j])))
        .filter(|(_, support)| *support >= params.min_support)
        .collect();

    let mut size = 1;
    while !current.is_empty() {
        for (columns, support) in &current {
            result.support.insert(columns.clone(), *support);
        }
        result.levels.push(current);
        if params.max_len.is_some_and(|max| size >= max) {
            break;
        }
        size += 1;

        let previous = result.levels.last().map(Vec::as_slice).unwrap_or_default();
        current = candidates(previous, &result.support)
            .into_iter()
            .map(|columns| {
                let support = matrix.support(&columns);
                (columns, support)
            })
            .filter(|(_, support)| *support >= params.min_support)
            .collect();
    }

    debug!(itemsets = result.len(), levels = result.levels.len(), "frequent itemsets mined");
    result
}

/// Join itemsets sharing all but their last column, then prune candidates
/// with an infrequent subset
fn candidates(previous: &[(Vec<usize>, f64)], frequent: &HashMap<Vec<usize>, f64>) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    for (i, (a, _)) in previous.iter().enumerate() {
        for (b, _) in &previous[i + 1..] {
            let k = a.len();
            if a[..k - 1] != b[..k - 1] {
                // sorted order: no later itemset shares this prefix
                break;
            }
            let mut joined = a.clone();
            joined.push(b[k - 1]);
            let all_subsets_frequent = (0..joined.len()).all(|skip| {
                let subset: Vec<usize> = joined
                    .iter()
                    .enumerate()
                    .filter(|&(idx, _)| idx != skip)
                    .map(|(_, &c)| c)
                    .collect();
                frequent.contains_key(&subset)
            });
            if all_subsets_frequent {
                out.push(joined);
            }
        }
    }
    out
}

/// `IF antecedent THEN consequent` with its interest metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationRule {
    pub antecedent: Itemset,
    pub consequent: Itemset,
    pub antecedent_support: f64,
    pub consequent_support: f64,
    pub support: f64,
    pub confidence: f64,
    pub lift: f64,
    pub leverage: f64,
    /// Infinite when confidence is 1; serialized as the string `"inf"`
    #[serde(serialize_with = "serialize_unbounded")]
    pub conviction: f64,
}

/// JSON has no infinity, so an unbounded metric is written as `"inf"`
fn serialize_unbounded<S: serde::Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if *value == f64::INFINITY {
        serializer.serialize_str("inf")
    } else {
        serializer.serialize_f64(*value)
    }
}

impl AssociationRule {
    pub fn antecedent_contains(&self, product: &str) -> bool {
        self.antecedent.contains(product)
    }
}

/// Split every frequent itemset into antecedent/consequent pairs and keep the
/// rules whose lift reaches `min_lift`, strongest lift first
pub fn association_rules(
    matrix: &BasketMatrix,
    itemsets: &FrequentItemsets,
    min_lift: f64,
) -> Vec<AssociationRule> {
    let mut rules = Vec::new();
    for (columns, support) in itemsets.iter().filter(|(c, _)| c.len() > 1) {
        for size in 1..columns.len() {
            for antecedent in columns.iter().copied().combinations(size) {
                let consequent: Vec<usize> = columns
                    .iter()
                    .copied()
                    .filter(|c| !antecedent.contains(c))
                    .collect();
                // every subset of a frequent itemset is itself frequent
                let (Some(&a_support), Some(&c_support)) = (
                    itemsets.support.get(&antecedent),
                    itemsets.support.get(&consequent),
                ) else {
                    continue;
                };

                let confidence = support / a_support;
                let lift = confidence / c_support;
                if lift < min_lift {
                    continue;
                }
                let conviction = if confidence >= 1.0 {
                    f64::INFINITY
                } else {
                    (1.0 - c_support) / (1.0 - confidence)
                };

                rules.push(AssociationRule {
                    antecedent: matrix.names(&antecedent),
                    consequent: matrix.names(&consequent),
                    antecedent_support: a_support,
                    consequent_support: c_support,
                    support: *support,
                    confidence,
                    lift,
                    leverage: support - a_support * c_support,
                    conviction,
                });
            }
        }
    }

    rules.sort_by(|a, b| b.lift.total_cmp(&a.lift));
    rules
}

/// Build the basket matrix, mine frequent itemsets and derive rules
pub fn mine_rules(lines: &[SegmentedTransaction], params: &MiningParams) -> Vec<AssociationRule> {
    let matrix = BasketMatrix::from_transactions(lines);
    let itemsets = frequent_itemsets(&matrix, params);
    let rules = association_rules(&matrix, &itemsets, params.min_lift);

    info!(
        transactions = matrix.n_transactions(),
        products = matrix.items.len(),
        itemsets = itemsets.len(),
        rules = rules.len(),
        "association rules mined"
    );
    rules
}
