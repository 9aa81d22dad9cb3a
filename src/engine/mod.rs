//! The operational contract shared by every engine layer (spec §2,
//! design note 9.2: "a tagged variant of concrete engines plus a single
//! operations trait/interface covering the gate, probability,
//! compose/decompose, and measurement surface").
//!
//! [`QuantumEngine`] is the object-safe subset (gates, probability
//! queries, measurement) that every concrete engine implements
//! directly. `compose`/`decompose` are *not* on the trait, since they
//! are `Self`-consuming/producing and therefore not object-safe; each
//! concrete engine (`state_vector::StateVectorEngine`,
//! `hybrid::HybridEngine`, ...) exposes them as inherent methods
//! instead. `hybrid::Promoted` is this crate's tagged-variant
//! implementation of the recommended strategy, wrapping the concrete
//! dense/sparse engines behind one enum for the hybrid layer's own
//! internal dispatch.

pub mod arithmetic;
pub mod dispatch;
pub mod hybrid;
pub mod pager;
pub mod stabilizer;
pub mod state_vector;
pub mod unit;

use crate::error::Result;
use crate::math::{Idx, M1, N, R, C};

/// The gate / probability / measurement surface common to every
/// concrete engine (dense state-vector, stabilizer, stabilizer-hybrid,
/// pager). The unit layer drives sub-engines exclusively through this
/// trait so it never needs to know which concrete kind it holds.
pub trait QuantumEngine {
    fn qubit_count(&self) -> N;

    /// Applies an arbitrary 2x2 unitary to `q`.
    fn apply_single_qubit(&mut self, m: &M1, q: N) -> Result<()>;

    /// Applies `m` to `t` only on basis states where every qubit in
    /// `controls` reads 1 and every qubit in `anti_controls` reads 0.
    fn apply_controlled(&mut self, m: &M1, controls: &[N], anti_controls: &[N], t: N) -> Result<()>;

    /// `diag(top_left, bottom_right)` on `q`.
    fn apply_phase(&mut self, top_left: C, bottom_right: C, q: N) -> Result<()> {
        self.apply_single_qubit(&[top_left, crate::math::C_ZERO, crate::math::C_ZERO, bottom_right], q)
    }

    /// Anti-diagonal `[[0, top_right], [bottom_left, 0]]` on `q`.
    fn apply_invert(&mut self, top_right: C, bottom_left: C, q: N) -> Result<()> {
        self.apply_single_qubit(&[crate::math::C_ZERO, top_right, bottom_left, crate::math::C_ZERO], q)
    }

    /// Applies `matrices[k]` to `t` when `controls` read as the integer
    /// `k` (little-endian over the `controls` list).
    fn uniformly_controlled(&mut self, controls: &[N], t: N, matrices: &[M1]) -> Result<()>;

    /// Multiplies each amplitude by `e^{+i angle}` or `e^{-i angle}`
    /// according to the parity of `index & mask`.
    fn uniform_parity_rz(&mut self, mask: Idx, angle: R) -> Result<()>;

    fn measure(&mut self, q: N) -> Result<bool>;

    fn force_measure(&mut self, q: N, value: bool) -> Result<()>;

    fn prob(&self, q: N) -> R;

    fn prob_all(&self, perm: usize) -> R;

    fn prob_reg(&self, start: N, len: N, value: usize) -> R;

    fn prob_mask(&self, mask: Idx, value: Idx) -> R;

    fn prob_parity(&self, mask: Idx) -> R;

    fn get_quantum_state(&self) -> Vec<C>;

    fn set_quantum_state(&mut self, state: &[C]) -> Result<()>;

    fn set_permutation(&mut self, perm: usize) -> Result<()>;

    /// Renormalizes in place; a no-op if already unit-length within the
    /// engine's configured threshold.
    fn normalize(&mut self) -> Result<()>;
}
