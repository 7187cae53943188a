//! Parallel processing strategies

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Processing mode for per-item work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Single-threaded processing, items in input order
    Sequential,
    /// Parallel processing on the global Rayon pool
    #[default]
    Parallel,
    /// Parallel with a dedicated pool of the given number of threads
    ParallelWith(usize),
}

/// Strategy for executing independent items
pub trait ParallelStrategy {
    /// Map a function over items and collect results in input order
    fn map_items<I, T, F>(&self, items: &[I], f: F) -> Result<Vec<T>, rayon::ThreadPoolBuildError>
    where
        I: Sync,
        T: Send,
        F: Fn(usize, &I) -> T + Sync + Send;
}

impl ParallelStrategy for ProcessingMode {
    fn map_items<I, T, F>(&self, items: &[I], f: F) -> Result<Vec<T>, rayon::ThreadPoolBuildError>
    where
        I: Sync,
        T: Send,
        F: Fn(usize, &I) -> T + Sync + Send,
    {
        match self {
            ProcessingMode::Sequential => Ok(items.iter().enumerate().map(|(i, item)| f(i, item)).collect()),
            ProcessingMode::Parallel => Ok(items
                .par_iter()
                .enumerate()
                .map(|(i, item)| f(i, item))
                .collect()),
            ProcessingMode::ParallelWith(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(*threads)
                    .build()?;
                Ok(pool.install(|| {
                    items
                        .par_iter()
                        .enumerate()
                        .map(|(i, item)| f(i, item))
                        .collect()
                }))
            }
        }
    }
}

/// Get the number of threads of the global pool
pub fn num_cpus() -> usize {
    rayon::current_num_threads()
}
