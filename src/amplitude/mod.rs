//! Amplitude store (spec §4.1): the lowest layer, owning either a dense
//! contiguous complex array or a sparse index->amplitude map.
//!
//! Contract: operations are data-race free when called from a single
//! logical owner; the store itself is not internally synchronized (the
//! parallel-for runtime provides the only concurrency, internal to a
//! single call). The sparse variant returns zero for missing keys and
//! drops entries whose magnitude falls below epsilon.

pub mod dense;
pub mod sparse;

pub use dense::DenseStore;
pub use sparse::SparseStore;

use crate::math::{C, R};
use std::ops::Range;

/// Common operational contract for a contiguous-index amplitude buffer.
///
/// Object-safe so the unit layer and pager can hold either
/// representation behind one trait object.
pub trait AmplitudeStore {
    /// Number of representable basis states (`2^n`).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, i: usize) -> C;

    fn write(&mut self, i: usize, c: C);

    /// Writes a `2x2`-update pair atomically from the caller's view:
    /// both indices observe either the old or the new values together,
    /// never a mix (relevant once amplitude-level kernels run
    /// concurrently across workers).
    fn write2(&mut self, i1: usize, c1: C, i2: usize, c2: C) {
        self.write(i1, c1);
        self.write(i2, c2);
    }

    fn clear(&mut self);

    fn copy_out(&self, range: Range<usize>) -> Vec<C> {
        range.map(|i| self.read(i)).collect()
    }

    fn copy_in(&mut self, range: Range<usize>, data: &[C]) {
        for (i, c) in range.zip(data.iter().copied()) {
            self.write(i, c);
        }
    }

    /// Swaps the upper half of `self` with the lower half of `other`.
    /// Used by the pager to bring an inter-page qubit's two halves
    /// into a contiguous layout before applying a gate, then back.
    fn shuffle(&mut self, other: &mut dyn AmplitudeStore) {
        let half = self.len() / 2;
        debug_assert_eq!(half, other.len() / 2);
        for i in 0..half {
            let a = self.read(half + i);
            let b = other.read(i);
            self.write(half + i, b);
            other.write(i, a);
        }
    }

    /// Fills `out` with `|amplitude|^2` for every basis state.
    fn get_probs(&self, out: &mut [R]) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.read(i).norm_sqr();
        }
    }

    fn norm_sqr_sum(&self) -> R {
        let mut probs = vec![0.0; self.len()];
        self.get_probs(&mut probs);
        probs.into_iter().sum()
    }

    fn is_sparse(&self) -> bool;
}
