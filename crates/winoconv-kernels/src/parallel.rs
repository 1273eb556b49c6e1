//! Fork-join worker pool and the disjoint-write primitives stages share.
//!
//! Every stage of a convolution is a flat data-parallel loop over a window of
//! independent units. [`WorkerPool::run_partitioned`] forks one task per
//! partition and only returns once all of them finished, which is the barrier
//! between stages. Inside a stage, workers write to one shared buffer through
//! [`SharedMut`]; [`UnitClaims`] makes sure no unit, and therefore no region of
//! that buffer, is handed to two writers.

use rayon::prelude::*;
use std::marker::PhantomData;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use winoconv_common::{Result, WinogradError};

// ── Worker pool ──────────────────────────────────────────────────────

/// Configuration for [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads. Defaults to the number of available CPUs.
    pub num_threads: usize,
    /// Prefix for worker thread names.
    pub name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { num_threads: num_cpus::get().max(1), name_prefix: "winoconv".to_string() }
    }
}

/// Thin wrapper over [`rayon::ThreadPool`] exposing fork-join stage execution.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Result<Self> {
        let prefix = config.name_prefix.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads.max(1))
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
            .map_err(|e| WinogradError::WorkerPool { reason: e.to_string() })?;
        Ok(Self { pool, config })
    }

    /// Process-wide pool sized to the machine, created on first use.
    pub fn global() -> Result<&'static WorkerPool> {
        static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();
        if let Some(pool) = GLOBAL.get() {
            return Ok(pool);
        }
        let pool = WorkerPool::new(WorkerPoolConfig::default())?;
        tracing::debug!(threads = pool.num_threads(), "started winoconv worker pool");
        Ok(GLOBAL.get_or_init(|| pool))
    }

    pub fn num_threads(&self) -> usize {
        self.config.num_threads.max(1)
    }

    /// Run `f(partition)` for every partition in `0..n_partitions` and join.
    ///
    /// Returns the first error any partition reported. All partitions have
    /// finished when this returns, successful or not.
    pub fn run_tasks<F>(&self, n_partitions: usize, f: F) -> Result<()>
    where
        F: Fn(usize) -> Result<()> + Send + Sync,
    {
        match n_partitions {
            0 => Ok(()),
            1 => f(0),
            n => self.pool.install(|| (0..n).into_par_iter().map(&f).collect::<Result<()>>()),
        }
    }

    /// Like [`WorkerPool::run_tasks`], also handing each partition its own
    /// `scratch_per_partition`-element slice of `scratch`.
    pub fn run_partitioned<T, F>(
        &self,
        n_partitions: usize,
        scratch: &mut [T],
        scratch_per_partition: usize,
        f: F,
    ) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Send + Sync,
    {
        if n_partitions == 0 {
            return Ok(());
        }
        let needed = n_partitions * scratch_per_partition;
        if scratch.len() < needed {
            return Err(WinogradError::invalid_usage(format!(
                "{n_partitions} partitions need {needed} scratch elements, got {}",
                scratch.len()
            )));
        }
        if scratch_per_partition == 0 {
            return self.run_tasks(n_partitions, |p| f(p, &mut []));
        }
        let scratch = &mut scratch[..needed];
        if n_partitions == 1 {
            return f(0, scratch);
        }
        self.pool.install(|| {
            scratch
                .par_chunks_mut(scratch_per_partition)
                .enumerate()
                .map(|(p, chunk)| f(p, chunk))
                .collect::<Result<()>>()
        })
    }
}

/// The `part`-th of `parts` contiguous, balanced sub-ranges of `0..window`.
pub fn contiguous_range(window: usize, parts: usize, part: usize) -> Range<usize> {
    let parts = parts.max(1);
    let start = window * part / parts;
    let stop = window * (part + 1) / parts;
    start..stop
}

// ── Disjoint shared writes ───────────────────────────────────────────

/// A mutable buffer that several workers write to, each in its own region.
///
/// Created from an exclusive borrow, so nothing outside the stage can observe
/// the buffer while it lives. Access is `unsafe`: callers promise that the
/// regions they touch are not touched by anyone else at the same time.
pub struct SharedMut<'a, T> {
    ptr: NonNull<T>,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

impl<T> Clone for SharedMut<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SharedMut<'_, T> {}

// SAFETY: the wrapper is only a disjoint-access handle to a `&mut [T]`; every
// access goes through `unsafe` methods whose callers guarantee disjointness.
unsafe impl<T: Send> Send for SharedMut<'_, T> {}
unsafe impl<T: Send> Sync for SharedMut<'_, T> {}

impl<'a, T> SharedMut<'a, T> {
    pub fn new(slice: &'a mut [T]) -> Self {
        let len = slice.len();
        Self { ptr: NonNull::from(slice).cast::<T>(), len, _marker: PhantomData }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow `offset..offset + len` mutably.
    ///
    /// # Panics
    /// Panics if the range is out of bounds.
    ///
    /// # Safety
    /// No other live reference may overlap the returned range.
    pub unsafe fn slice_mut(&self, offset: usize, len: usize) -> &'a mut [T] {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "range {offset}+{len} exceeds shared buffer of {}",
            self.len
        );
        // SAFETY: in bounds (asserted); exclusivity is the caller's contract.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) }
    }

    /// Write one element.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    ///
    /// # Safety
    /// No other live reference may cover `index`.
    pub unsafe fn write(&self, index: usize, value: T) {
        assert!(index < self.len, "index {index} exceeds shared buffer of {}", self.len);
        // SAFETY: in bounds (asserted); exclusivity is the caller's contract.
        unsafe { self.ptr.as_ptr().add(index).write(value) }
    }
}

// ── Unit claims ──────────────────────────────────────────────────────

/// One flag per window unit; a unit can be claimed once per reset.
///
/// Drivers claim units before writing the regions those units own, so two
/// overlapping `run` calls fail with `InvalidUsage` instead of racing.
#[derive(Debug)]
pub struct UnitClaims {
    claimed: Box<[AtomicBool]>,
}

impl UnitClaims {
    pub fn new(n_units: usize) -> Self {
        Self { claimed: (0..n_units).map(|_| AtomicBool::new(false)).collect() }
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    pub fn claim(&self, unit: usize) -> Result<()> {
        let flag = self.claimed.get(unit).ok_or_else(|| {
            WinogradError::invalid_usage(format!("unit {unit} is outside a window of {}", self.claimed.len()))
        })?;
        if flag.swap(true, Ordering::AcqRel) {
            return Err(WinogradError::invalid_usage(format!("unit {unit} was already processed")));
        }
        Ok(())
    }

    /// Claim `start..stop`; fails on the first unit that is out of range or taken.
    pub fn claim_range(&self, start: usize, stop: usize) -> Result<()> {
        if start > stop || stop > self.claimed.len() {
            return Err(WinogradError::invalid_usage(format!(
                "range {start}..{stop} is not inside a window of {}",
                self.claimed.len()
            )));
        }
        (start..stop).try_for_each(|unit| self.claim(unit))
    }

    /// Forget all claims so the window can be processed again.
    pub fn reset(&mut self) {
        for flag in self.claimed.iter_mut() {
            *flag.get_mut() = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_pool(threads: usize) -> WorkerPool {
        WorkerPool::new(WorkerPoolConfig { num_threads: threads, name_prefix: "test".into() }).unwrap()
    }

    #[test]
    fn contiguous_ranges_tile_the_window() {
        for window in [0usize, 1, 7, 16, 33] {
            for parts in 1..6 {
                let mut next = 0;
                for p in 0..parts {
                    let r = contiguous_range(window, parts, p);
                    assert_eq!(r.start, next);
                    next = r.end;
                }
                assert_eq!(next, window);
            }
        }
    }

    #[test]
    fn run_tasks_visits_every_partition() {
        let pool = test_pool(3);
        let seen = AtomicUsize::new(0);
        pool.run_tasks(10, |p| {
            seen.fetch_add(1 << p, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), (1 << 10) - 1);
    }

    #[test]
    fn run_tasks_propagates_errors() {
        let pool = test_pool(2);
        let err = pool
            .run_tasks(4, |p| if p == 2 { Err(WinogradError::invalid_usage("boom")) } else { Ok(()) })
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn partitions_get_disjoint_scratch() {
        let pool = test_pool(4);
        let mut scratch = vec![0u32; 20];
        pool.run_partitioned(4, &mut scratch, 5, |p, s| {
            assert_eq!(s.len(), 5);
            s.fill(p as u32 + 1);
            Ok(())
        })
        .unwrap();
        assert_eq!(&scratch[..5], &[1; 5]);
        assert_eq!(&scratch[15..], &[4; 5]);
    }

    #[test]
    fn short_scratch_is_invalid_usage() {
        let pool = test_pool(2);
        let mut scratch = vec![0u8; 3];
        let err = pool.run_partitioned(2, &mut scratch, 2, |_, _| Ok(())).unwrap_err();
        assert!(err.is_invalid_usage());
    }

    #[test]
    fn shared_mut_disjoint_writes() {
        let pool = test_pool(4);
        let mut buf = vec![0usize; 64];
        let shared = SharedMut::new(&mut buf);
        pool.run_tasks(8, |p| {
            // SAFETY: partition p owns elements 8p..8p+8 only.
            let chunk = unsafe { shared.slice_mut(p * 8, 8) };
            chunk.fill(p);
            Ok(())
        })
        .unwrap();
        for (i, v) in buf.iter().enumerate() {
            assert_eq!(*v, i / 8);
        }
    }

    #[test]
    #[should_panic(expected = "exceeds shared buffer")]
    fn shared_mut_bounds_are_checked() {
        let mut buf = vec![0u8; 4];
        let shared = SharedMut::new(&mut buf);
        // SAFETY: single-threaded; the call panics before any access.
        let _ = unsafe { shared.slice_mut(2, 3) };
    }

    #[test]
    fn claims_reject_double_processing() {
        let mut claims = UnitClaims::new(4);
        claims.claim_range(0, 2).unwrap();
        assert!(claims.claim(1).unwrap_err().is_invalid_usage());
        assert!(claims.claim(4).is_err());
        assert!(claims.claim_range(3, 2).is_err());
        claims.reset();
        claims.claim_range(0, 4).unwrap();
    }
}
