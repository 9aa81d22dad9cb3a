//! Strided parallel-for runtime (spec §4.2).
//!
//! Distributes `2^stride_pow` consecutive indices to the same worker to
//! amortize synchronization, as specified. No ordering is guaranteed
//! between indices; callers must be independent across indices or
//! serialize through their own accumulator slot. Kernels run to
//! completion — cancellation is not offered, matching spec §5.

use crate::math::{N, R};

#[cfg(feature = "cpu")]
use std::sync::Arc;

/// Owns the worker pool (when the `cpu` feature is enabled) backing
/// every amplitude-level kernel an engine issues. `Arc`-shared (rather
/// than `Rc`) so engines built on top of it stay `Send`, which the
/// optional async dispatch queue (`engine::dispatch`) requires.
#[derive(Clone)]
pub struct ParallelFor {
    #[cfg(feature = "cpu")]
    pool: Arc<rayon::ThreadPool>,
}

impl std::fmt::Debug for ParallelFor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelFor").finish_non_exhaustive()
    }
}

impl Default for ParallelFor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ParallelFor {
    pub fn new(num_threads: Option<usize>) -> Self {
        #[cfg(feature = "cpu")]
        {
            let threads = num_threads.unwrap_or_else(rayon::current_num_threads);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("qstratum worker #{i}"))
                .build()
                .expect("failed to build rayon thread pool");
            Self { pool: Arc::new(pool) }
        }
        #[cfg(not(feature = "cpu"))]
        {
            let _ = num_threads;
            Self {}
        }
    }

    /// Invokes `kernel(idx)` for every `idx` in `[0, n)`. Indices are
    /// partitioned into runs of `2^stride_pow` so a single worker
    /// handles each run contiguously.
    pub fn for_each_strided<F>(&self, n: N, stride_pow: u32, kernel: F)
    where
        F: Fn(N) + Sync,
    {
        let stride = 1usize << stride_pow;

        #[cfg(feature = "cpu")]
        {
            use rayon::prelude::*;
            self.pool.install(|| {
                (0..n).into_par_iter().with_min_len(stride).for_each(|idx| kernel(idx));
            });
        }
        #[cfg(not(feature = "cpu"))]
        {
            for idx in 0..n {
                kernel(idx);
            }
        }
    }

    /// Like [`for_each_strided`](Self::for_each_strided), but accumulates
    /// one real value per worker and sums them into a final scalar.
    pub fn reduce_strided<F>(&self, n: N, stride_pow: u32, kernel: F) -> R
    where
        F: Fn(N) -> R + Sync,
    {
        let stride = 1usize << stride_pow;

        #[cfg(feature = "cpu")]
        {
            use rayon::prelude::*;
            self.pool.install(|| {
                (0..n)
                    .into_par_iter()
                    .with_min_len(stride)
                    .map(kernel)
                    .sum()
            })
        }
        #[cfg(not(feature = "cpu"))]
        {
            (0..n).map(kernel).sum()
        }
    }

    /// Like [`for_each_strided`](Self::for_each_strided), but collects one
    /// `T` per index instead of folding into a scalar — the shape an
    /// amplitude-level kernel needs when it computes new amplitudes from
    /// the old state before writing them anywhere (the old and new state
    /// can't alias the same store while a kernel is still reading it).
    pub fn map_strided<F, T>(&self, n: N, stride_pow: u32, kernel: F) -> Vec<T>
    where
        F: Fn(N) -> T + Sync,
        T: Send,
    {
        let stride = 1usize << stride_pow;

        #[cfg(feature = "cpu")]
        {
            use rayon::prelude::*;
            self.pool.install(|| {
                (0..n).into_par_iter().with_min_len(stride).map(kernel).collect()
            })
        }
        #[cfg(not(feature = "cpu"))]
        {
            (0..n).map(kernel).collect()
        }
    }

    pub fn num_threads(&self) -> N {
        #[cfg(feature = "cpu")]
        {
            self.pool.current_num_threads()
        }
        #[cfg(not(feature = "cpu"))]
        {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn visits_every_index_once() {
        let pf = ParallelFor::new(Some(2));
        let hits = (0..64).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>();
        pf.for_each_strided(64, 2, |idx| {
            hits[idx].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn reduce_sums_all_terms() {
        let pf = ParallelFor::new(Some(3));
        let sum = pf.reduce_strided(100, 1, |idx| idx as R);
        assert!((sum - (0..100).sum::<usize>() as R).abs() < 1e-9);
    }

    #[test]
    fn map_collects_one_result_per_index_in_order() {
        let pf = ParallelFor::new(Some(2));
        let doubled = pf.map_strided(32, 2, |idx| idx * 2);
        assert_eq!(doubled, (0..32).map(|idx| idx * 2).collect::<Vec<_>>());
    }
}
