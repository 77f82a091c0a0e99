//! Sampling session for one (dataset, target) pair.
//!
//! Each `update_*` call runs another batch of contrast evaluations and merges
//! the results into the session's [`ResultStorage`], so callers can keep
//! refining estimates by calling them again.
use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::{CategoricalDivergence, CostMatrix, SelectionConfig};
use crate::contrast::{ContrastOutcome, Subspace, SubspaceContrast};
use crate::data_handling::DataSet;
use crate::error::{RarError, Result};
use crate::result_storage::{
    BivariateRedundancies, RedundancyTable, RelevancyTable, ResultStorage, WeightedEntry,
};
use crate::scored_slices::ScoredSlices;

pub struct IncrementalCorrelation<'a> {
    contrast: SubspaceContrast<'a>,
    target: usize,
    features: Vec<usize>,
    cost_matrix: Option<CostMatrix>,
    to_keep: usize,
    storage: ResultStorage,
    rng: StdRng,
}

impl<'a> IncrementalCorrelation<'a> {
    /// Start a session ranking every other column of `data` against `target`.
    ///
    /// # Errors
    ///
    /// Invalid configuration, an unknown target, storage sized for a different
    /// number of columns, or a cost matrix whose classes differ from the
    /// target's classes.
    pub fn new(
        data: &'a DataSet,
        target: &str,
        storage: ResultStorage,
        config: &SelectionConfig,
        cost_matrix: Option<CostMatrix>,
    ) -> Result<Self> {
        config.validate()?;
        let target = data.index_of(target)?;
        let stored = storage.bivariate_redundancies().n_features();
        if stored != data.n_columns() {
            return Err(RarError::InvalidConfig(format!(
                "result storage holds {} features, dataset has {} columns",
                stored,
                data.n_columns()
            )));
        }
        if let Some(costs) = &cost_matrix {
            let classes = data.domain(target).ok_or_else(|| {
                RarError::InvalidConfig(format!(
                    "cost matrix given for continuous target {}",
                    data.name(target)
                ))
            })?;
            costs.validate_against(classes)?;
            if config.contrast.categorical_divergence != CategoricalDivergence::Kld {
                return Err(RarError::InvalidConfig(
                    "cost-weighted contrast requires the KL divergence".into(),
                ));
            }
        }

        let features = (0..data.n_columns()).filter(|&f| f != target).collect();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            contrast: SubspaceContrast::new(data, config.contrast.clone())?,
            target,
            features,
            cost_matrix,
            to_keep: config.to_keep,
            storage,
            rng,
        })
    }

    pub fn data(&self) -> &'a DataSet {
        self.contrast.data()
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Candidate features, i.e. every column except the target.
    pub fn features(&self) -> &[usize] {
        &self.features
    }

    pub fn cost_matrix(&self) -> Option<&CostMatrix> {
        self.cost_matrix.as_ref()
    }

    pub fn storage(&self) -> &ResultStorage {
        &self.storage
    }

    pub fn into_storage(self) -> ResultStorage {
        self.storage
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Evaluate `(subspace, target)` tasks on the rayon pool. Each task gets a
    /// seed drawn from the session RNG so results do not depend on
    /// scheduling. Subspaces without any valid draw are logged and dropped.
    fn sample_contrasts(
        &mut self,
        tasks: Vec<(Subspace, usize)>,
        relevance: bool,
    ) -> Result<Vec<(Subspace, usize, ContrastOutcome)>> {
        let seeds: Vec<u64> = tasks.iter().map(|_| self.rng.gen()).collect();
        let contrast = &self.contrast;
        let cost_matrix = if relevance {
            self.cost_matrix.as_ref()
        } else {
            None
        };

        let outcomes: Vec<Result<ContrastOutcome>> = tasks
            .par_iter()
            .zip(seeds.par_iter())
            .map(|((subspace, target), &seed)| {
                let mut rng = StdRng::seed_from_u64(seed);
                contrast.contrast(subspace, *target, relevance, cost_matrix, &mut rng)
            })
            .collect();

        let mut sampled = Vec::with_capacity(tasks.len());
        for ((subspace, target), outcome) in tasks.into_iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => sampled.push((subspace, target, outcome)),
                Err(RarError::NoValidSample { subspace, iterations }) => {
                    log::debug!(
                        "No valid sample for subspace {} in {} iterations, skipping",
                        subspace,
                        iterations
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sampled)
    }

    fn merge_relevancies(&mut self, sampled: Vec<(Subspace, usize, ContrastOutcome)>) {
        let mut relevancies = RelevancyTable::new();
        let mut class_relevancies: BTreeMap<String, RelevancyTable> = BTreeMap::new();
        let mut slices: BTreeMap<Subspace, ScoredSlices> = BTreeMap::new();

        for (subspace, _, outcome) in sampled {
            relevancies.merge(subspace.clone(), WeightedEntry::new(outcome.score, 1.0));
            if let Some(class_scores) = &outcome.class_scores {
                for (class, &score) in class_scores {
                    class_relevancies
                        .entry(class.clone())
                        .or_default()
                        .merge(subspace.clone(), WeightedEntry::new(score, 1.0));
                }
            }
            let to_keep = self.to_keep;
            slices
                .entry(subspace.clone())
                .or_insert_with(|| ScoredSlices::for_subspace(&subspace, to_keep))
                .add_slices(outcome.slices);
        }

        log::debug!("Merging relevancies of {} subspaces", relevancies.len());
        self.storage.update_relevancies(&relevancies);
        for (class, table) in &class_relevancies {
            self.storage.update_class_relevancies(class, table);
        }
        self.storage.update_slices(slices);
    }

    /// Evaluate every single feature against the target `runs` times.
    pub fn update_bivariate_relevancies(&mut self, runs: usize) -> Result<()> {
        let (features, target) = (&self.features, self.target);
        let tasks: Vec<(Subspace, usize)> = (0..runs)
            .flat_map(move |_| features.iter().map(move |&f| (Subspace::new([f]), target)))
            .collect();
        let sampled = self.sample_contrasts(tasks, true)?;
        self.merge_relevancies(sampled);
        Ok(())
    }

    /// Evaluate `runs` random subspaces against the target.
    ///
    /// Every subspace contains `fixed_features`, which count towards `k`, plus
    /// between 1 and `k - fixed_features.len()` other random features.
    pub fn update_multivariate_relevancies(
        &mut self,
        fixed_features: &[usize],
        k: usize,
        runs: usize,
    ) -> Result<()> {
        let pool: Vec<usize> = self
            .features
            .iter()
            .copied()
            .filter(|f| !fixed_features.contains(f))
            .collect();
        let max_k = k.saturating_sub(fixed_features.len()).min(pool.len());

        let mut tasks = Vec::with_capacity(runs);
        for run in 0..runs {
            if run % (runs / 10).max(1) == 0 {
                log::debug!("Relevance: {:.2}%", 100.0 * run as f64 / runs as f64);
            }
            let mut subspace = fixed_features.to_vec();
            if max_k > 0 {
                let size = self.rng.gen_range(1..=max_k);
                subspace.extend(pool.choose_multiple(&mut self.rng, size).copied());
            }
            if subspace.is_empty() {
                continue;
            }
            tasks.push((Subspace::new(subspace), self.target));
        }

        let sampled = self.sample_contrasts(tasks, true)?;
        log::info!(
            "Relevance: sampled {} subspaces (k = {}, {} fixed)",
            sampled.len(),
            k,
            fixed_features.len()
        );
        self.merge_relevancies(sampled);
        Ok(())
    }

    /// Evaluate `runs` random subspaces of size `1..=k` against another random
    /// feature standing in for the target.
    pub fn update_redundancies(&mut self, k: usize, runs: usize) -> Result<()> {
        if self.features.len() < 2 {
            return Ok(());
        }
        let k = k.min(self.features.len() - 1).max(1);

        let mut tasks = Vec::with_capacity(runs);
        for _ in 0..runs {
            let size = self.rng.gen_range(1..=k);
            let mut chosen: Vec<usize> = self
                .features
                .choose_multiple(&mut self.rng, size + 1)
                .copied()
                .collect();
            let stand_in = chosen.pop().unwrap_or(self.features[0]);
            tasks.push((Subspace::new(chosen), stand_in));
        }

        let sampled = self.sample_contrasts(tasks, false)?;
        log::info!("Redundancy: sampled {} subspaces (k = {})", sampled.len(), k);
        self.merge_redundancies(&sampled);
        Ok(())
    }

    /// Contrast of `feature` given each subspace, merged into the redundancy
    /// tables. Returns the score per subspace; subspaces without a valid draw
    /// are left out.
    pub fn redundancy_contrasts(
        &mut self,
        subspaces: Vec<Subspace>,
        feature: usize,
    ) -> Result<Vec<(Subspace, f64)>> {
        let tasks = subspaces.into_iter().map(|s| (s, feature)).collect();
        let sampled = self.sample_contrasts(tasks, false)?;
        self.merge_redundancies(&sampled);
        Ok(sampled
            .into_iter()
            .map(|(subspace, _, outcome)| (subspace, outcome.score))
            .collect())
    }

    fn merge_redundancies(&mut self, sampled: &[(Subspace, usize, ContrastOutcome)]) {
        let batch: RedundancyTable = sampled
            .iter()
            .map(|(subspace, target, outcome)| {
                ((subspace.clone(), *target), WeightedEntry::new(outcome.score, 1.0))
            })
            .collect();
        let (redundancy, weight) =
            BivariateRedundancies::observations(self.data().n_columns(), &batch);
        self.storage.update_bivariate_redundancies(&redundancy, &weight);
        self.storage.update_redundancies(&batch);
    }
}
