//! Relevance and redundancy ranking of the candidate features of a session.
//!
//! Relevance comes from the single-feature normalizer over the sampled
//! subspace relevancies. Redundancy is estimated either against random
//! partitions of the less relevant features (batch) or against the already
//! selected features through the justification rule (greedy). Both combine
//! the two into an f-score; equal scores are ordered by ascending feature
//! index.
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::config::{RankingStrategy, SelectionConfig};
use crate::contrast::Subspace;
use crate::error::Result;
use crate::feature_selection::relevance_optimizer::{
    single_feature_relevance, weighted_single_feature_relevance, AugmentedLagrangianSolver,
    QpSolver,
};
use crate::incremental::IncrementalCorrelation;
use crate::result_storage::ResultStorage;

/// One position of a feature ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedFeature {
    pub feature: usize,
    pub name: String,
    pub relevance: f64,
    pub redundancy: f64,
    pub score: f64,
}

/// Harmonic mean of relevance and non-redundancy.
///
/// Redundancy is clamped to `[0, 1]` first, since divergences of
/// categorical stand-ins are unbounded. Returns 0 when both terms vanish.
pub fn f_score(relevance: f64, redundancy: f64) -> f64 {
    let novelty = 1.0 - redundancy.clamp(0.0, 1.0);
    let denominator = novelty + relevance;
    if denominator == 0.0 {
        return 0.0;
    }
    2.0 * novelty * relevance / denominator
}

/// Redundancy of `feature` given the `selected` set, justified by the stored
/// redundancy estimates.
///
/// Only entries for `feature` whose subspace overlaps `selected` are
/// admissible. Scanning them from the highest redundancy down, the first
/// entry whose overlap with `selected` is not contained in the overlap of a
/// lower-redundancy entry wins. 0 without admissible entries.
pub fn justified_redundancy(storage: &ResultStorage, selected: &Subspace, feature: usize) -> f64 {
    let mut admissible: Vec<(f64, Subspace)> = storage
        .redundancies()
        .iter()
        .filter(|((_, target), _)| *target == feature)
        .filter_map(|((subspace, _), entry)| {
            let overlap = subspace.intersection(selected);
            (!overlap.is_empty()).then_some((entry.value, overlap))
        })
        .collect();
    admissible.sort_by(|a, b| b.0.total_cmp(&a.0));

    admissible
        .iter()
        .enumerate()
        .find(|(i, (_, overlap))| {
            !admissible[i + 1..]
                .iter()
                .any(|(_, weaker)| overlap.is_subset(weaker))
        })
        .map(|(_, (value, _))| *value)
        .unwrap_or(0.0)
}

/// Descending by score, ascending feature index on ties.
pub fn rank_by_score(ranking: &mut [RankedFeature]) {
    ranking.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.feature.cmp(&b.feature),
        other => other,
    });
}

/// Split `features` into `ceil(len / k)` consecutive parts whose sizes differ
/// by at most one, none larger than `k`.
pub fn equal_partition(features: &[usize], k: usize) -> Vec<Subspace> {
    if features.is_empty() || k == 0 {
        return Vec::new();
    }
    let parts = (features.len() + k - 1) / k;
    let (base, extra) = (features.len() / parts, features.len() % parts);

    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let part = Subspace::new(features[start..start + size].iter().copied());
            start += size;
            part
        })
        .collect()
}

pub struct RarSearch<'a> {
    session: IncrementalCorrelation<'a>,
    config: SelectionConfig,
    solver: Box<dyn QpSolver>,
}

impl<'a> RarSearch<'a> {
    pub fn new(session: IncrementalCorrelation<'a>, config: SelectionConfig) -> Self {
        Self {
            session,
            config,
            solver: Box::new(AugmentedLagrangianSolver::default()),
        }
    }

    pub fn with_solver(mut self, solver: Box<dyn QpSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn session(&self) -> &IncrementalCorrelation<'a> {
        &self.session
    }

    pub fn into_session(self) -> IncrementalCorrelation<'a> {
        self.session
    }

    /// Sample relevancies and redundancies, then rank every candidate feature.
    pub fn select_features(&mut self) -> Result<Vec<RankedFeature>> {
        self.config.validate()?;
        let k = self.config.k;
        let dim = self.session.features().len();
        let runs = self.config.runs.runs(dim, k);
        log::info!(
            "Ranking {} features against {} with {} runs (k = {})",
            dim,
            self.session.data().name(self.session.target()),
            runs,
            k
        );

        self.session.update_multivariate_relevancies(&[], k, runs)?;
        self.session.update_redundancies(k, runs)?;

        let relevance = self.relevance()?;
        match self.config.strategy {
            RankingStrategy::Batch { split_iterations } => {
                self.rank_batch(&relevance, split_iterations)
            }
            RankingStrategy::Greedy => Ok(self.rank_greedy(&relevance)),
        }
    }

    /// Normalized single-feature relevance from the stored relevancies,
    /// cost weighted when the session has a cost matrix.
    pub fn relevance(&self) -> Result<BTreeMap<usize, f64>> {
        let features = self.session.features();
        let storage = self.session.storage();
        match self.session.cost_matrix() {
            Some(costs) => weighted_single_feature_relevance(
                features,
                storage.class_relevancies(),
                costs,
                self.solver.as_ref(),
            ),
            None => single_feature_relevance(
                features,
                storage.relevancies(),
                self.solver.as_ref(),
                "all",
            ),
        }
    }

    fn ranked(&self, feature: usize, relevance: f64, redundancy: f64) -> RankedFeature {
        RankedFeature {
            feature,
            name: self.session.data().name(feature).to_string(),
            relevance,
            redundancy,
            score: f_score(relevance, redundancy),
        }
    }

    /// Rank all features at once. Features are visited by ascending
    /// relevance; each one's redundancy is the highest contrast it shows
    /// against any part of up to `split_iterations` random partitions of the
    /// features visited before it.
    pub fn rank_batch(
        &mut self,
        relevance: &BTreeMap<usize, f64>,
        split_iterations: usize,
    ) -> Result<Vec<RankedFeature>> {
        let mut order: Vec<usize> = self.session.features().to_vec();
        order.sort_by(|a, b| match relevance[a].total_cmp(&relevance[b]) {
            Ordering::Equal => a.cmp(b),
            other => other,
        });

        let k = self.config.k;
        let mut ranking = Vec::with_capacity(order.len());
        for (i, &feature) in order.iter().enumerate() {
            let mut preceding = order[..i].to_vec();
            let mut parts = BTreeSet::new();
            for _ in 0..split_iterations {
                preceding.shuffle(self.session.rng());
                parts.extend(equal_partition(&preceding, k));
            }

            let redundancy = self
                .session
                .redundancy_contrasts(parts.into_iter().collect(), feature)?
                .into_iter()
                .map(|(_, score)| score)
                .fold(0.0f64, f64::max);
            log::debug!(
                "Batch: {} relevance {:.4} redundancy {:.4}",
                self.session.data().name(feature),
                relevance[&feature],
                redundancy
            );
            ranking.push(self.ranked(feature, relevance[&feature], redundancy));
        }

        rank_by_score(&mut ranking);
        Ok(ranking)
    }

    /// Forward selection: repeatedly take the unselected feature with the
    /// highest f-score, its redundancy justified against the selected set.
    pub fn rank_greedy(&self, relevance: &BTreeMap<usize, f64>) -> Vec<RankedFeature> {
        let storage = self.session.storage();
        let mut remaining: Vec<usize> = self.session.features().to_vec();
        let mut selected: Vec<usize> = Vec::with_capacity(remaining.len());
        let mut ranking = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let chosen = Subspace::new(selected.iter().copied());
            let mut candidates: Vec<RankedFeature> = remaining
                .iter()
                .map(|&feature| {
                    let redundancy = if chosen.is_empty() {
                        0.0
                    } else {
                        justified_redundancy(storage, &chosen, feature)
                    };
                    self.ranked(feature, relevance[&feature], redundancy)
                })
                .collect();
            rank_by_score(&mut candidates);

            let best = candidates.swap_remove(0);
            log::debug!(
                "Greedy: selected {} (score {:.4}, redundancy {:.4})",
                best.name,
                best.score,
                best.redundancy
            );
            remaining.retain(|&f| f != best.feature);
            selected.push(best.feature);
            ranking.push(best);
        }
        ranking
    }
}
