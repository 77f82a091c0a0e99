//! rar-core: relevance and redundancy feature ranking via subspace contrast.
//!
//! This crate estimates how strongly random feature subspaces of a dataset
//! determine a target column (Monte-Carlo contrast over random slices),
//! accumulates those estimates incrementally, and turns them into a feature
//! ranking that rewards relevance and penalises redundancy.
//!
//! The modules build on each other bottom-up: `data_handling` and
//! `divergence` feed `contrast`, whose outcomes are merged by
//! `result_storage` inside an `incremental` session, which
//! `feature_selection` ranks.
pub mod config;
pub mod contrast;
pub mod data_handling;
pub mod divergence;
pub mod error;
pub mod feature_selection;
pub mod incremental;
pub mod result_storage;
pub mod scored_slices;

pub use config::{ContrastConfig, CostMatrix, RankingStrategy, RunCount, SelectionConfig};
pub use contrast::{Subspace, SubspaceContrast};
pub use data_handling::{Column, DataSet};
pub use error::{RarError, Result};
pub use feature_selection::rar_search::{RankedFeature, RarSearch};
pub use incremental::IncrementalCorrelation;
pub use result_storage::ResultStorage;
