//! Incremental storage of relevancy and redundancy estimates.
//!
//! Every table maps a key to a running weighted average. Merging a new batch
//! of observations into a table is equivalent to averaging over the whole
//! observation history, so repeated sampling rounds only ever sharpen the
//! estimates. All tables belong to one (dataset, target) session.
use std::collections::BTreeMap;

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::contrast::Subspace;
use crate::scored_slices::ScoredSlices;

/// Running weighted average.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WeightedEntry {
    pub value: f64,
    pub weight: f64,
}

impl WeightedEntry {
    pub fn new(value: f64, weight: f64) -> Self {
        Self { value, weight }
    }

    /// Fold `other` into `self`: weights add, values average by weight.
    pub fn merge(&mut self, other: WeightedEntry) {
        let total = self.weight + other.weight;
        if total > 0.0 {
            self.value = (self.weight * self.value + other.weight * other.value) / total;
        }
        self.weight = total;
    }
}

/// Serialize ordered maps as sequences of pairs so that structured keys
/// survive formats with string-only map keys.
mod pairs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Vec::<(K, V)>::deserialize(deserializer).map(|pairs| pairs.into_iter().collect())
    }
}

/// Key to running weighted average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize",
    deserialize = "K: Deserialize<'de> + Ord"
))]
pub struct WeightedTable<K: Ord> {
    #[serde(with = "pairs")]
    entries: BTreeMap<K, WeightedEntry>,
}

impl<K: Ord> Default for WeightedTable<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord> WeightedTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one observation; absent keys start from zero weight.
    pub fn merge(&mut self, key: K, entry: WeightedEntry) {
        self.entries.entry(key).or_default().merge(entry);
    }

    pub fn merge_table(&mut self, other: &WeightedTable<K>)
    where
        K: Clone,
    {
        for (key, entry) in &other.entries {
            self.merge(key.clone(), *entry);
        }
    }

    pub fn get(&self, key: &K) -> Option<&WeightedEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &WeightedEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Ord> FromIterator<(K, WeightedEntry)> for WeightedTable<K> {
    fn from_iter<I: IntoIterator<Item = (K, WeightedEntry)>>(iter: I) -> Self {
        let mut table = WeightedTable::new();
        for (key, entry) in iter {
            table.merge(key, entry);
        }
        table
    }
}

/// Subspace to contrast against the target.
pub type RelevancyTable = WeightedTable<Subspace>;

/// (Subspace, stand-in target feature) to contrast.
pub type RedundancyTable = WeightedTable<(Subspace, usize)>;

/// Symmetric feature-by-feature matrix of the least redundancy observed
/// between two features in any subspace containing one of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BivariateRedundancies {
    redundancy: Array2<f64>,
    weight: Array2<f64>,
}

impl BivariateRedundancies {
    pub fn new(n_features: usize) -> Self {
        Self {
            redundancy: Array2::zeros((n_features, n_features)),
            weight: Array2::zeros((n_features, n_features)),
        }
    }

    pub fn n_features(&self) -> usize {
        self.redundancy.nrows()
    }

    /// Stored redundancy, or +infinity while the cell has weight below 1.
    pub fn get(&self, a: usize, b: usize) -> f64 {
        if self.weight[[a, b]] < 1.0 {
            f64::INFINITY
        } else {
            self.redundancy[[a, b]]
        }
    }

    pub fn weight(&self, a: usize, b: usize) -> f64 {
        self.weight[[a, b]]
    }

    /// Per-pair minima and summed weights of a batch of redundancy
    /// observations, ready for [`BivariateRedundancies::update`]. Unobserved
    /// cells hold +infinity with weight 0.
    pub fn observations(n_features: usize, batch: &RedundancyTable) -> (Array2<f64>, Array2<f64>) {
        let mut redundancy = Array2::from_elem((n_features, n_features), f64::INFINITY);
        let mut weight = Array2::zeros((n_features, n_features));
        for ((subspace, target), entry) in batch.iter() {
            for &feature in subspace.features() {
                let value = redundancy[[feature, *target]].min(entry.value);
                redundancy[[feature, *target]] = value;
                redundancy[[*target, feature]] = value;
                weight[[feature, *target]] += entry.weight;
                weight[[*target, feature]] += entry.weight;
            }
        }
        (redundancy, weight)
    }

    /// Merge a batch: each cell keeps the smaller of its current and the new
    /// redundancy once weighted, and resets to 0 while still unweighted.
    pub fn update(&mut self, new_redundancy: &Array2<f64>, new_weight: &Array2<f64>) {
        Zip::from(&mut self.redundancy)
            .and(&mut self.weight)
            .and(new_redundancy)
            .and(new_weight)
            .for_each(|current, weight, &incoming, &incoming_weight| {
                let known = if *weight < 1.0 { f64::INFINITY } else { *current };
                *weight += incoming_weight;
                *current = if *weight < 1.0 { 0.0 } else { known.min(incoming) };
            });
    }
}

/// Tables of one (dataset, target) session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultStorage {
    relevancies: RelevancyTable,
    class_relevancies: BTreeMap<String, RelevancyTable>,
    redundancies: RedundancyTable,
    bivariate: BivariateRedundancies,
    #[serde(with = "pairs")]
    slices: BTreeMap<Subspace, ScoredSlices>,
}

impl ResultStorage {
    /// Empty storage for a dataset with `n_features` columns.
    pub fn new(n_features: usize) -> Self {
        Self {
            relevancies: RelevancyTable::new(),
            class_relevancies: BTreeMap::new(),
            redundancies: RedundancyTable::new(),
            bivariate: BivariateRedundancies::new(n_features),
            slices: BTreeMap::new(),
        }
    }

    pub fn update_relevancies(&mut self, new_relevancies: &RelevancyTable) {
        self.relevancies.merge_table(new_relevancies);
    }

    pub fn update_class_relevancies(&mut self, class: &str, new_relevancies: &RelevancyTable) {
        self.class_relevancies
            .entry(class.to_string())
            .or_default()
            .merge_table(new_relevancies);
    }

    pub fn update_redundancies(&mut self, new_redundancies: &RedundancyTable) {
        self.redundancies.merge_table(new_redundancies);
    }

    pub fn update_bivariate_redundancies(
        &mut self,
        new_redundancy: &Array2<f64>,
        new_weight: &Array2<f64>,
    ) {
        self.bivariate.update(new_redundancy, new_weight);
    }

    /// Merge new slices into each subspace's cache and reduce it.
    pub fn update_slices(&mut self, new_slices: BTreeMap<Subspace, ScoredSlices>) {
        for (subspace, incoming) in new_slices {
            match self.slices.get_mut(&subspace) {
                Some(current) => {
                    current.add_slices(incoming.slices().iter().cloned());
                    current.reduce_slices();
                }
                None => {
                    let mut incoming = incoming;
                    incoming.reduce_slices();
                    self.slices.insert(subspace, incoming);
                }
            }
        }
    }

    pub fn relevancies(&self) -> &RelevancyTable {
        &self.relevancies
    }

    pub fn class_relevancies(&self) -> &BTreeMap<String, RelevancyTable> {
        &self.class_relevancies
    }

    pub fn redundancies(&self) -> &RedundancyTable {
        &self.redundancies
    }

    pub fn bivariate_redundancies(&self) -> &BivariateRedundancies {
        &self.bivariate
    }

    pub fn slices(&self) -> &BTreeMap<Subspace, ScoredSlices> {
        &self.slices
    }

    /// Stored redundancy of `feature` given `subspace`; 0 for an empty or
    /// unobserved subspace.
    pub fn redundancy(&self, subspace: &Subspace, feature: usize) -> f64 {
        if subspace.is_empty() {
            return 0.0;
        }
        self.redundancies
            .get(&(subspace.clone(), feature))
            .map(|e| e.value)
            .unwrap_or(0.0)
    }
}
