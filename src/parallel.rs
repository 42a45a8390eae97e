//! Fixed worker pool & the three parallel dispatch patterns (§4.H, §5):
//! index fan-out, partition fan-out, and candidate fan-out. Workers block on
//! join; the driver thread is itself a worker (`nThreads - 1` pooled
//! threads), matching the "no suspension besides the driver's join" model.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::ThreadPool;

/// Owns the fixed-size pool. Constructed once per solver instance and
/// reused across iterations.
pub struct WorkerPool {
    pool: ThreadPool,
    num_threads: usize,
}

impl WorkerPool {
    /// `num_threads` is the total worker count including the driver
    /// (`max(1, num_threads) - 1` pooled background threads, per §4.H).
    pub fn new(num_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let background = num_threads.saturating_sub(1).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(background)
            .build()?;
        Ok(Self {
            pool,
            num_threads: num_threads.max(1),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Index fan-out (§4.H): `count` units of work, each processed exactly
    /// once via `f(index)`, results collected in index order. Used for LQ
    /// approximation and controller synthesis.
    pub fn fan_out_indices<T, F>(&self, count: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync,
    {
        let next = AtomicUsize::new(0);
        let mut results: Vec<Option<T>> = (0..count).map(|_| None).collect();
        let slots: Vec<_> = results.iter_mut().collect();
        let workers = self.num_threads;
        self.pool.scope(|scope| {
            let slots = std::sync::Mutex::new(slots);
            for _ in 0..workers {
                let next = &next;
                let f = &f;
                let slots = &slots;
                scope.spawn(move |_| loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    if idx >= count {
                        break;
                    }
                    let value = f(idx);
                    slots.lock().unwrap()[idx].replace(value);
                });
            }
        });
        results.into_iter().map(|o| o.expect("every index visited exactly once")).collect()
    }

    /// Partition fan-out (§4.H): split `n` nodes into up to `num_threads`
    /// contiguous, non-overlapping ranges and run `f(range)` on each,
    /// concurrently, returning each partition's range paired with its
    /// result. The backward pass within a partition is left strictly
    /// sequential by `f` itself; only partitions run in parallel. Used by
    /// `solver::backward_pass` for the partitioned Riccati sweep.
    pub fn fan_out_partitions<T, F>(&self, n: usize, f: F) -> Vec<(std::ops::Range<usize>, T)>
    where
        T: Send,
        F: Fn(std::ops::Range<usize>) -> T + Sync,
    {
        let parts = balanced_partitions(n, self.num_threads);
        let mut slots: Vec<Option<(std::ops::Range<usize>, T)>> =
            (0..parts.len()).map(|_| None).collect();
        let slot_refs: Vec<_> = slots.iter_mut().collect();
        self.pool.scope(|scope| {
            let slot_refs = std::sync::Mutex::new(slot_refs);
            for (i, range) in parts.into_iter().enumerate() {
                let f = &f;
                let slot_refs = &slot_refs;
                scope.spawn(move |_| {
                    let value = f(range.clone());
                    *slot_refs.lock().unwrap()[i] = Some((range, value));
                });
            }
        });
        slots
            .into_iter()
            .map(|o| o.expect("every partition visited exactly once"))
            .collect()
    }

    /// Candidate fan-out (§4.H): dispatch `candidates.len()` independent
    /// trial evaluations (e.g. line-search step sizes) across workers.
    pub fn fan_out_candidates<T, C, F>(&self, candidates: &[C], f: F) -> Vec<T>
    where
        T: Send,
        C: Sync,
        F: Fn(usize, &C) -> T + Sync,
    {
        self.fan_out_indices(candidates.len(), |i| f(i, &candidates[i]))
    }
}

/// Split `[0, n)` into at most `num_parts` contiguous ranges balanced by
/// node count (wall-time balancing is left to the caller via
/// `partitioning_hint`, §11).
pub fn balanced_partitions(n: usize, num_parts: usize) -> Vec<std::ops::Range<usize>> {
    if n == 0 {
        return vec![];
    }
    let num_parts = num_parts.max(1).min(n);
    let base = n / num_parts;
    let remainder = n % num_parts;
    let mut ranges = Vec::with_capacity(num_parts);
    let mut start = 0;
    for i in 0..num_parts {
        let size = base + if i < remainder { 1 } else { 0 };
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// RAII guard restoring the underlying dense-linear-algebra library's
/// thread count on drop (§5, §9 "exception-safe via a scoped guard").
/// `nalgebra` itself has no global thread pool to pin, so this simply
/// documents the lifetime during which external BLAS backends should be
/// pinned to one thread; callers wiring in a BLAS-backed `nalgebra` feature
/// do so here.
pub struct SingleThreadedBlasGuard;

impl SingleThreadedBlasGuard {
    pub fn acquire() -> Self {
        SingleThreadedBlasGuard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_cover_every_index_exactly_once() {
        for n in [0, 1, 5, 7, 100] {
            for parts in [1, 2, 3, 8] {
                let ranges = balanced_partitions(n, parts);
                let mut covered = vec![false; n];
                for r in ranges {
                    for i in r {
                        assert!(!covered[i], "index {i} covered twice");
                        covered[i] = true;
                    }
                }
                assert!(covered.iter().all(|&c| c), "n={n} parts={parts}");
            }
        }
    }

    #[test]
    fn fan_out_indices_visits_every_index() {
        let pool = WorkerPool::new(4).unwrap();
        let results = pool.fan_out_indices(50, |i| i * 2);
        for (i, v) in results.into_iter().enumerate() {
            assert_eq!(v, i * 2);
        }
    }

    #[test]
    fn fan_out_partitions_covers_every_index_with_its_range() {
        let pool = WorkerPool::new(4).unwrap();
        let outputs = pool.fan_out_partitions(23, |range| range.clone().sum::<usize>());
        let mut covered = vec![false; 23];
        let mut total = 0usize;
        for (range, sum) in outputs {
            assert_eq!(range.clone().sum::<usize>(), sum);
            for i in range {
                assert!(!covered[i], "index {i} covered twice");
                covered[i] = true;
            }
            total += sum;
        }
        assert!(covered.iter().all(|&c| c));
        assert_eq!(total, (0..23).sum::<usize>());
    }

    #[test]
    fn balanced_partitions_snapshot() {
        let ranges = balanced_partitions(10, 3);
        let debug: Vec<String> = ranges.iter().map(|r| format!("{}..{}", r.start, r.end)).collect();
        insta::assert_yaml_snapshot!(debug, @r###"
        ---
        - 0..4
        - 4..7
        - 7..10
        "###);
    }
}
