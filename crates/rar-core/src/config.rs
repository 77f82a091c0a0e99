use serde::{Deserialize, Serialize};
use statrs::function::factorial::binomial;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{RarError, Result};

/// Divergence used for categorical targets.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalDivergence {
    /// Kullback-Leibler; required for cost-weighted contrast.
    #[default]
    Kld,
    /// Jensen-Shannon.
    Jsd,
}

/// Parameters of a single contrast evaluation.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ContrastConfig {
    /// Expected fraction of rows kept by a slice, in (0, 1].
    pub alpha: f64,
    /// Monte-Carlo draws per contrast evaluation.
    pub iterations: usize,
    /// Random cut points for the continuous divergence.
    pub cut_points: usize,
    pub categorical_divergence: CategoricalDivergence,
    /// `(min, max)` for min-max rescaling of the continuous divergence.
    pub ks_range: Option<(f64, f64)>,
}

impl Default for ContrastConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            iterations: 10,
            cut_points: crate::divergence::DEFAULT_CUT_POINTS,
            categorical_divergence: CategoricalDivergence::Kld,
            ks_range: None,
        }
    }
}

impl ContrastConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(RarError::InvalidConfig(format!(
                "alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        if self.iterations == 0 {
            return Err(RarError::InvalidConfig("iterations must be positive".into()));
        }
        if self.cut_points == 0 {
            return Err(RarError::InvalidConfig("cut_points must be positive".into()));
        }
        if let Some((min, max)) = self.ks_range {
            if !(min.is_finite() && max.is_finite() && max > min) {
                return Err(RarError::InvalidConfig(format!(
                    "ks_range must satisfy min < max, got ({}, {})",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

/// How many sampling runs a ranking performs.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RunCount {
    Fixed {
        runs: usize,
    },
    /// Enough runs that a fixed size-`m` feature combination is contained in
    /// at least one sampled size-`k` subspace with probability `1 - beta`.
    Adaptive {
        m: usize,
        beta: f64,
        min_runs: usize,
    },
}

impl Default for RunCount {
    fn default() -> Self {
        RunCount::Fixed { runs: 50 }
    }
}

impl RunCount {
    /// Number of runs for `dim` features and subspaces of at most `k` features.
    pub fn runs(&self, dim: usize, k: usize) -> usize {
        match *self {
            RunCount::Fixed { runs } => runs,
            RunCount::Adaptive { m, beta, min_runs } => {
                let k = k.min(dim);
                if m > k || dim == 0 {
                    return min_runs;
                }
                let hit = binomial((dim - m) as u64, (k - m) as u64) / binomial(dim as u64, k as u64);
                if hit >= 1.0 {
                    return min_runs;
                }
                let n = (beta.ln() / (1.0 - hit).ln()).ceil();
                if n.is_finite() && n > 0.0 {
                    (n as usize).max(min_runs)
                } else {
                    min_runs
                }
            }
        }
    }

    pub fn validate(&self, k: usize) -> Result<()> {
        match *self {
            RunCount::Fixed { runs } if runs == 0 => {
                Err(RarError::InvalidConfig("runs must be positive".into()))
            }
            RunCount::Adaptive { m, beta, .. } => {
                if !(beta > 0.0 && beta < 1.0) {
                    return Err(RarError::InvalidConfig(format!(
                        "beta must be in (0, 1), got {}",
                        beta
                    )));
                }
                if m == 0 || m > k {
                    return Err(RarError::InvalidConfig(format!(
                        "m must be in 1..={}, got {}",
                        k, m
                    )));
                }
                Ok(())
            }
            RunCount::Fixed { .. } => Ok(()),
        }
    }
}

/// Feature ranking strategies.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    /// Rank all features at once, each penalised by its redundancy against
    /// random partitions of the less relevant features.
    Batch { split_iterations: usize },
    /// Forward selection with redundancy justified against the selected set.
    Greedy,
}

impl Default for RankingStrategy {
    fn default() -> Self {
        RankingStrategy::Greedy
    }
}

impl FromStr for RankingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "batch" => Ok(RankingStrategy::Batch {
                split_iterations: 10,
            }),
            "greedy" => Ok(RankingStrategy::Greedy),
            _ => Err(format!(
                "Unknown ranking strategy: {}. Expected `batch` or `greedy`",
                s
            )),
        }
    }
}

/// Central configuration of a feature ranking session.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SelectionConfig {
    /// Largest subspace size sampled.
    pub k: usize,
    pub runs: RunCount,
    pub strategy: RankingStrategy,
    /// Slices retained per subspace in the scored-slice cache.
    pub to_keep: usize,
    /// Seed for the session RNG; `None` seeds from entropy.
    pub seed: Option<u64>,
    pub contrast: ContrastConfig,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            k: 5,
            runs: RunCount::default(),
            strategy: RankingStrategy::default(),
            to_keep: 5,
            seed: None,
            contrast: ContrastConfig::default(),
        }
    }
}

impl SelectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(RarError::InvalidConfig("k must be positive".into()));
        }
        if self.to_keep == 0 {
            return Err(RarError::InvalidConfig("to_keep must be positive".into()));
        }
        if let RankingStrategy::Batch { split_iterations: 0 } = self.strategy {
            return Err(RarError::InvalidConfig(
                "split_iterations must be positive".into(),
            ));
        }
        self.runs.validate(self.k)?;
        self.contrast.validate()
    }
}

/// Misclassification cost per target class, used to weight the per-class
/// divergences of a categorical target.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CostMatrix {
    costs: BTreeMap<String, f64>,
}

impl CostMatrix {
    pub fn new(costs: BTreeMap<String, f64>) -> Self {
        Self { costs }
    }

    /// Cost 1 for every class.
    pub fn uniform<S: AsRef<str>>(classes: &[S]) -> Self {
        Self {
            costs: classes
                .iter()
                .map(|c| (c.as_ref().to_string(), 1.0))
                .collect(),
        }
    }

    pub fn cost(&self, class: &str) -> Option<f64> {
        self.costs.get(class).copied()
    }

    pub fn total(&self) -> f64 {
        self.costs.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.costs.iter().map(|(c, &w)| (c.as_str(), w))
    }

    /// Check that the cost classes are exactly the target's classes and that
    /// the costs are non-negative with a positive total.
    pub fn validate_against(&self, target_classes: &[String]) -> Result<()> {
        let matches = self.costs.len() == target_classes.len()
            && target_classes.iter().all(|c| self.costs.contains_key(c));
        if !matches {
            return Err(RarError::CostMatrixMismatch {
                cost_classes: self.costs.keys().cloned().collect(),
                target_classes: target_classes.to_vec(),
            });
        }
        if let Some((class, cost)) = self.iter().find(|(_, c)| !(*c >= 0.0 && c.is_finite())) {
            return Err(RarError::InvalidConfig(format!(
                "cost of class {} must be a non-negative number, got {}",
                class, cost
            )));
        }
        if !(self.total() > 0.0) {
            return Err(RarError::InvalidConfig(
                "cost matrix total must be positive".into(),
            ));
        }
        Ok(())
    }
}
