//! Feature ranking.
//!
//! `relevance_optimizer` turns sampled subspace relevancies into
//! single-feature relevance; `rar_search` combines it with redundancy
//! estimates into a ranking.
pub mod rar_search;
pub mod relevance_optimizer;
