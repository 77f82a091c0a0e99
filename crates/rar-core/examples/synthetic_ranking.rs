use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rar_core::config::{RankingStrategy, RunCount, SelectionConfig};
use rar_core::data_handling::{Column, DataSet};
use rar_core::feature_selection::rar_search::RarSearch;
use rar_core::incremental::IncrementalCorrelation;
use rar_core::result_storage::ResultStorage;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let strategy = match std::env::args().nth(1) {
        Some(name) => name.parse::<RankingStrategy>().map_err(anyhow::Error::msg)?,
        None => RankingStrategy::Greedy,
    };

    // 500 rows: target depends on x0 and x1 jointly, x2 duplicates x0,
    // x3 and x4 are noise
    let n = 500;
    let mut rng = StdRng::seed_from_u64(2024);
    let x0: Vec<f64> = (0..n).map(|_| rng.gen()).collect();
    let x1: Vec<f64> = (0..n).map(|_| rng.gen()).collect();
    let x2: Vec<f64> = x0.iter().map(|v| v + 0.05 * rng.gen::<f64>()).collect();
    let target: Vec<f64> = x0
        .iter()
        .zip(&x1)
        .map(|(a, b)| a + b + 0.1 * rng.gen::<f64>())
        .collect();

    let data = DataSet::new(
        vec![
            "target".into(),
            "x0".into(),
            "x1".into(),
            "x2".into(),
            "x3".into(),
            "x4".into(),
        ],
        vec![
            Column::continuous(target),
            Column::continuous(x0),
            Column::continuous(x1),
            Column::continuous(x2),
            Column::continuous((0..n).map(|_| rng.gen()).collect()),
            Column::continuous((0..n).map(|_| rng.gen()).collect()),
        ],
    )?;
    println!("Synthetic data: {} rows, {} columns", data.n_rows(), data.n_columns());

    let config = SelectionConfig {
        k: 3,
        runs: RunCount::Adaptive {
            m: 2,
            beta: 0.01,
            min_runs: 100,
        },
        strategy,
        seed: Some(7),
        ..SelectionConfig::default()
    };
    let session = IncrementalCorrelation::new(
        &data,
        "target",
        ResultStorage::new(data.n_columns()),
        &config,
        None,
    )?;
    let mut search = RarSearch::new(session, config);

    for (rank, feature) in search.select_features()?.iter().enumerate() {
        println!(
            "{:>2}. {:<4} score={:.3} relevance={:.3} redundancy={:.3}",
            rank + 1,
            feature.name,
            feature.score,
            feature.relevance,
            feature.redundancy
        );
    }
    Ok(())
}
