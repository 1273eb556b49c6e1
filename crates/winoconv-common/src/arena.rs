//! Working-space arena layout.
//!
//! One flat buffer is carved into fixed, non-overlapping regions when a
//! convolution is planned. Regions are measured in elements and aligned to
//! [`ARENA_ALIGNMENT_BYTES`]. [`ArenaLayout::split`] hands each stage a plain
//! `&mut` slice so nothing downstream recomputes offsets.

use crate::error::{Result, WinogradError};
use bytemuck::Zeroable;

/// Byte alignment of every region start.
pub const ARENA_ALIGNMENT_BYTES: usize = 64;

// ── Regions ─────────────────────────────────────────────────────────

/// A `[offset, offset + len)` element range inside the arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaRegion {
    pub offset: usize,
    pub len: usize,
}

impl ArenaRegion {
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Element lengths requested for each region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaRequest {
    pub input_matrices: usize,
    pub output_matrices: usize,
    pub reorder: usize,
    /// Per-thread scratch, in elements, for each of `n_threads` threads.
    pub scratch_per_thread: usize,
    pub n_threads: usize,
}

// ── ArenaLayout ─────────────────────────────────────────────────────

/// Placement of the Winograd working-space regions for element type `T`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaLayout {
    pub input_matrices: ArenaRegion,
    pub output_matrices: ArenaRegion,
    pub reorder: ArenaRegion,
    pub thread_scratch: ArenaRegion,
    pub scratch_per_thread: usize,
    pub n_threads: usize,
    total_len: usize,
    element_size: usize,
}

impl ArenaLayout {
    /// Lay the requested regions out back to back for elements of `element_size` bytes.
    pub fn new(request: ArenaRequest, element_size: usize) -> Self {
        let align = (ARENA_ALIGNMENT_BYTES / element_size.max(1)).max(1);
        let mut cursor = 0usize;
        let mut place = |len: usize| {
            let offset = crate::math::round_up(cursor, align);
            cursor = offset + len;
            ArenaRegion { offset, len }
        };
        let input_matrices = place(request.input_matrices);
        let output_matrices = place(request.output_matrices);
        let reorder = place(request.reorder);
        let n_threads = request.n_threads.max(1);
        let scratch_per_thread = crate::math::round_up(request.scratch_per_thread, align);
        let thread_scratch = place(scratch_per_thread * n_threads);
        Self {
            input_matrices,
            output_matrices,
            reorder,
            thread_scratch,
            scratch_per_thread,
            n_threads,
            total_len: cursor,
            element_size,
        }
    }

    /// Total elements the arena must hold.
    pub const fn total_len(&self) -> usize {
        self.total_len
    }

    /// Total bytes the arena must hold.
    pub const fn total_bytes(&self) -> usize {
        self.total_len * self.element_size
    }

    fn regions(&self) -> [ArenaRegion; 4] {
        [self.input_matrices, self.output_matrices, self.reorder, self.thread_scratch]
    }

    /// Check that a buffer of `len` elements can host this layout.
    pub fn validate(&self, len: usize) -> Result<()> {
        if len < self.total_len {
            return Err(WinogradError::invalid_usage(format!(
                "working space holds {len} elements, layout needs {}",
                self.total_len
            )));
        }
        let regions = self.regions();
        for pair in regions.windows(2) {
            if pair[0].end() > pair[1].offset {
                return Err(WinogradError::invalid_usage(format!(
                    "arena regions overlap: {:?} and {:?}",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }

    /// Split `buffer` into one disjoint view per region.
    pub fn split<'a, T>(&self, buffer: &'a mut [T]) -> Result<ArenaViews<'a, T>> {
        self.validate(buffer.len())?;
        let (_, rest) = buffer.split_at_mut(self.input_matrices.offset);
        let (input_matrices, rest) = rest.split_at_mut(self.input_matrices.len);
        let (_, rest) = rest.split_at_mut(self.output_matrices.offset - self.input_matrices.end());
        let (output_matrices, rest) = rest.split_at_mut(self.output_matrices.len);
        let (_, rest) = rest.split_at_mut(self.reorder.offset - self.output_matrices.end());
        let (reorder, rest) = rest.split_at_mut(self.reorder.len);
        let (_, rest) = rest.split_at_mut(self.thread_scratch.offset - self.reorder.end());
        let (thread_scratch, _) = rest.split_at_mut(self.thread_scratch.len);
        Ok(ArenaViews {
            input_matrices,
            output_matrices,
            reorder,
            thread_scratch,
            scratch_per_thread: self.scratch_per_thread,
        })
    }
}

/// Mutable views over the regions of one arena.
#[derive(Debug)]
pub struct ArenaViews<'a, T> {
    pub input_matrices: &'a mut [T],
    pub output_matrices: &'a mut [T],
    pub reorder: &'a mut [T],
    pub thread_scratch: &'a mut [T],
    pub scratch_per_thread: usize,
}

// ── Allocation ──────────────────────────────────────────────────────

/// Allocate `len` zeroed elements, reporting failure instead of aborting.
pub fn try_alloc_zeroed<T: Zeroable + Clone>(len: usize) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| WinogradError::Allocation {
        bytes: len.saturating_mul(std::mem::size_of::<T>()),
    })?;
    buf.resize(len, T::zeroed());
    Ok(buf)
}

// ── Tests ───────────────────────────────────────────────────────────
