//! Dense/sparse amplitude state-vector engine (spec §4.3) — the
//! numerical kernel every other layer eventually bottoms out in.

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use crate::amplitude::{AmplitudeStore, DenseStore, SparseStore};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::math::{m1_apply, C, C_ONE, C_ZERO, Idx, M1, N, R};
use crate::parallel::ParallelFor;

use super::arithmetic;
use super::QuantumEngine;

/// Generic over the amplitude representation; see [`DenseEngine`] and
/// [`SparseEngine`] for the concrete aliases used elsewhere in the
/// crate.
#[derive(Clone)]
pub struct StateVectorEngine<S: AmplitudeStore + Clone> {
    store: S,
    /// Persistent write target for amplitude-level kernels, swapped with
    /// `store` after each gate instead of being cloned fresh every call
    /// (mirrors the teacher's `psi_main`/`psi_buffer` pair).
    scratch: S,
    n: N,
    parallel: ParallelFor,
    rng: StdRng,
    norm_threshold: R,
    do_auto_normalize: bool,
    norm_is_unit: bool,
    global_phase: C,
}

pub type DenseEngine = StateVectorEngine<DenseStore>;
pub type SparseEngine = StateVectorEngine<SparseStore>;

impl DenseEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let mut store = DenseStore::zeroed(config.qubit_count);
        let perm = config.initial_permutation & (store.len() - 1);
        store.write(perm, C_ONE);
        Self::from_store(store, config)
    }
}

impl SparseEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let mut store = SparseStore::zeroed(config.qubit_count, config.norm_threshold);
        let perm = config.initial_permutation & (store.len() - 1);
        store.write(perm, C_ONE);
        Self::from_store(store, config)
    }
}

impl<S: AmplitudeStore + Clone> StateVectorEngine<S> {
    fn from_store(store: S, config: &EngineConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let global_phase = if config.global_phase_is_random {
            let mut rng = rng.clone();
            crate::math::phase_from_rad(rng.gen_range(0.0..std::f64::consts::TAU))
        } else {
            C_ONE
        };
        let scratch = store.clone();
        Self {
            store,
            scratch,
            n: config.qubit_count,
            parallel: ParallelFor::default(),
            rng,
            norm_threshold: config.norm_threshold,
            do_auto_normalize: config.do_auto_normalize,
            norm_is_unit: true,
            global_phase,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable store access for the pager, which shuffles page halves
    /// directly (spec §4.7) rather than going through the gate surface.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn global_phase(&self) -> C {
        self.global_phase
    }

    fn require_qubit(&self, q: N) -> Result<()> {
        if q >= self.n {
            Err(Error::invalid_argument(format!(
                "qubit index {q} out of range for {}-qubit engine",
                self.n
            )))
        } else {
            Ok(())
        }
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    /// Inserts a zero bit at position `pos` into a value whose bits
    /// above `pos` have already had that slot removed — i.e. the
    /// inverse of deleting bit `pos` from a full index.
    #[inline]
    fn insert_zero_bit(compact: usize, pos: N) -> usize {
        let low_mask = (1usize << pos) - 1;
        let low = compact & low_mask;
        let high = (compact & !low_mask) << 1;
        high | low
    }

    fn mark_non_unitary(&mut self, m: &M1) {
        if !crate::math::matrix::is_unitary_m1(m) {
            self.norm_is_unit = false;
            if self.do_auto_normalize {
                let _ = self.normalize();
            }
        }
    }

    /// Generic pairwise single-qubit application: iterates the `2^(n-1)`
    /// index pairs that differ only in bit `q`, as specified.
    fn apply_pairs<F>(&mut self, q: N, f: F) -> Result<()>
    where
        F: Fn(C, C) -> (C, C) + Sync,
    {
        self.require_qubit(q)?;
        let bit = 1usize << q;
        let half = self.len() / 2;
        let StateVectorEngine { store, parallel, scratch, .. } = self;
        let store: &S = store;
        let updates = parallel.map_strided(half, 4, |low| {
            let i0 = Self::insert_zero_bit(low, q);
            let i1 = i0 | bit;
            let (b0, b1) = f(store.read(i0), store.read(i1));
            (i0, b0, i1, b1)
        });
        for (i0, b0, i1, b1) in updates {
            scratch.write2(i0, b0, i1, b1);
        }
        std::mem::swap(&mut self.store, &mut self.scratch);
        Ok(())
    }

    fn control_mask_ok(idx: usize, controls: &[N], anti_controls: &[N]) -> bool {
        controls.iter().all(|&c| idx & (1usize << c) != 0)
            && anti_controls.iter().all(|&c| idx & (1usize << c) == 0)
    }

    fn probs_vec(&self) -> Vec<R> {
        let mut probs = vec![0.0; self.len()];
        self.store.get_probs(&mut probs);
        probs
    }

    fn total_prob(&self) -> R {
        let probs = self.probs_vec();
        self.parallel.reduce_strided(probs.len(), 4, |i| probs[i])
    }

    /// §4.3 "Compose uses a length-preserving index interleave:
    /// `new[i] = a[i & startMask] * b[(i & endMask) >> n_a]`."
    pub fn compose(&mut self, other: Self) -> Result<()> {
        let na = self.n;
        let start_mask = (1usize << na) - 1;
        let new_n = na + other.n;
        let new_len = 1usize << new_n;

        let mut grown = self.store.clone();
        grown.clear();
        for i in 0..new_len {
            let a_idx = i & start_mask;
            let b_idx = i >> na;
            let amp = self.store.read(a_idx) * other.store.read(b_idx);
            grown.write(i, amp);
        }
        self.store = grown;
        self.n = new_n;
        self.global_phase *= other.global_phase;
        Ok(())
    }

    /// Factors qubits `[start, start+length)` out into a fresh engine,
    /// mutating `self` into the remaining (outer) state. Fails with
    /// `SeparabilityViolation` if the range is not separable to within
    /// `eps` — per spec §9's resolved open question, this crate raises
    /// rather than silently approximating.
    pub fn decompose(&mut self, start: N, length: N, eps: R) -> Result<Self> {
        if length == 0 || start + length > self.n {
            return Err(Error::invalid_argument("decompose range out of bounds"));
        }
        let outer_n = self.n - length;
        let inner_len = 1usize << length;
        let outer_len = 1usize << outer_n;

        let split = |idx: usize| -> (usize, usize) {
            let inner = (idx >> start) & (inner_len - 1);
            let low = idx & ((1usize << start) - 1);
            let high = idx >> (start + length);
            let outer = (high << start) | low;
            (outer, inner)
        };
        let join = |outer: usize, inner: usize| -> usize {
            let low = outer & ((1usize << start) - 1);
            let high = outer >> start;
            (high << (start + length)) | (inner << start) | low
        };

        let mut p_outer = vec![0.0; outer_len];
        let mut p_inner = vec![0.0; inner_len];
        for idx in 0..self.len() {
            let amp = self.store.read(idx);
            let p = amp.norm_sqr();
            if p <= eps * eps {
                continue;
            }
            let (o, i) = split(idx);
            p_outer[o] += p;
            p_inner[i] += p;
        }

        let o0 = p_outer.iter().position(|&p| p > eps * eps);
        let i0 = p_inner.iter().position(|&p| p > eps * eps);
        let (o0, i0) = match (o0, i0) {
            (Some(o0), Some(i0)) => (o0, i0),
            _ => {
                return Err(Error::degenerate_state(
                    "decompose called on a state with zero total probability",
                ))
            }
        };

        let anchor_outer_amp = p_outer[o0].sqrt();
        let mut inner_amp = vec![C_ZERO; inner_len];
        for i in 0..inner_len {
            inner_amp[i] = self.store.read(join(o0, i)) / anchor_outer_amp;
        }
        let anchor_inner_amp = inner_amp[i0];
        let mut outer_amp = vec![C_ZERO; outer_len];
        for o in 0..outer_len {
            outer_amp[o] = self.store.read(join(o, i0)) / anchor_inner_amp;
        }

        for idx in 0..self.len() {
            let (o, i) = split(idx);
            let predicted = outer_amp[o] * inner_amp[i];
            let actual = self.store.read(idx);
            if (predicted - actual).norm_sqr() > eps {
                return Err(Error::separability_violation(format!(
                    "range [{start}, {}) is not separable to within {eps}",
                    start + length
                )));
            }
        }

        let mut outer_store = self.store.clone();
        outer_store.clear();
        for (o, amp) in outer_amp.iter().enumerate() {
            outer_store.write(o, *amp);
        }
        let mut inner_store = self.store.clone();
        inner_store.clear();
        for (i, amp) in inner_amp.iter().enumerate() {
            inner_store.write(i, *amp);
        }

        self.store = outer_store;
        self.n = outer_n;

        let mut dest = self.clone_shape(inner_store, length);
        dest.global_phase = self.global_phase;
        Ok(dest)
    }

    pub fn dispose(&mut self, start: N, length: N, eps: R) -> Result<()> {
        self.decompose(start, length, eps).map(drop)
    }

    fn clone_shape(&self, store: S, n: N) -> Self {
        let scratch = store.clone();
        Self {
            store,
            scratch,
            n,
            parallel: self.parallel.clone(),
            rng: self.rng.clone(),
            norm_threshold: self.norm_threshold,
            do_auto_normalize: self.do_auto_normalize,
            norm_is_unit: true,
            global_phase: C_ONE,
        }
    }

    // ---- Arithmetic surface (spec §4.3 + SPEC_FULL supplement) ----

    pub fn apply_permutation(&mut self, perm: impl Fn(usize) -> usize) -> Result<()> {
        let mut buffer = self.store.clone();
        buffer.clear();
        for idx in 0..self.len() {
            let amp = self.store.read(idx);
            if amp == C_ZERO {
                continue;
            }
            buffer.write(perm(idx), amp);
        }
        self.store = buffer;
        Ok(())
    }

    pub fn inc(&mut self, start: N, len: N, delta: i64) -> Result<()> {
        arithmetic::validate_range(self.n, start, len)?;
        self.apply_permutation(|idx| arithmetic::add_range(idx, start, len, delta, None, 0, 0))
    }

    pub fn inc_controlled(&mut self, start: N, len: N, delta: i64, ctrl: Idx, anti: Idx) -> Result<()> {
        arithmetic::validate_range(self.n, start, len)?;
        self.apply_permutation(|idx| arithmetic::add_range(idx, start, len, delta, None, ctrl, anti))
    }

    pub fn inc_with_carry(&mut self, start: N, len: N, delta: i64, carry_qubit: N) -> Result<()> {
        arithmetic::validate_range(self.n, start, len)?;
        self.require_qubit(carry_qubit)?;
        self.apply_permutation(|idx| {
            arithmetic::add_range(idx, start, len, delta, Some(carry_qubit), 0, 0)
        })
    }

    pub fn mul(&mut self, start: N, len: N, factor: u64) -> Result<()> {
        arithmetic::validate_range(self.n, start, len)?;
        let inv = arithmetic::odd_inverse_pow2(factor, len)?;
        let _ = inv;
        self.apply_permutation(|idx| arithmetic::mul_range(idx, start, len, factor))
    }

    pub fn div(&mut self, start: N, len: N, factor: u64) -> Result<()> {
        arithmetic::validate_range(self.n, start, len)?;
        let inv = arithmetic::odd_inverse_pow2(factor, len)?;
        self.apply_permutation(|idx| arithmetic::mul_range(idx, start, len, inv))
    }

    pub fn mul_controlled(&mut self, start: N, len: N, factor: u64, ctrl: Idx, anti: Idx) -> Result<()> {
        arithmetic::validate_range(self.n, start, len)?;
        let _ = arithmetic::odd_inverse_pow2(factor, len)?;
        self.apply_permutation(|idx| arithmetic::mul_range_controlled(idx, start, len, factor, ctrl, anti))
    }

    pub fn div_controlled(&mut self, start: N, len: N, factor: u64, ctrl: Idx, anti: Idx) -> Result<()> {
        arithmetic::validate_range(self.n, start, len)?;
        let inv = arithmetic::odd_inverse_pow2(factor, len)?;
        self.apply_permutation(|idx| arithmetic::mul_range_controlled(idx, start, len, inv, ctrl, anti))
    }

    pub fn mul_mod_n_out(
        &mut self,
        in_start: N,
        in_len: N,
        out_start: N,
        out_len: N,
        a: u64,
        modulus: u64,
    ) -> Result<()> {
        arithmetic::validate_range(self.n, in_start, in_len)?;
        arithmetic::validate_range(self.n, out_start, out_len)?;
        if modulus == 0 {
            return Err(Error::invalid_argument("modulus must be nonzero"));
        }
        self.apply_permutation(|idx| {
            arithmetic::mul_mod_out(idx, in_start, in_len, out_start, out_len, a, modulus)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mul_mod_n_out_controlled(
        &mut self,
        in_start: N,
        in_len: N,
        out_start: N,
        out_len: N,
        a: u64,
        modulus: u64,
        ctrl: Idx,
        anti: Idx,
    ) -> Result<()> {
        arithmetic::validate_range(self.n, in_start, in_len)?;
        arithmetic::validate_range(self.n, out_start, out_len)?;
        if modulus == 0 {
            return Err(Error::invalid_argument("modulus must be nonzero"));
        }
        self.apply_permutation(|idx| {
            arithmetic::mul_mod_out_controlled(idx, in_start, in_len, out_start, out_len, a, modulus, ctrl, anti)
        })
    }

    /// Undoes [`Self::mul_mod_n_out`] with the same `a`: the out-register
    /// combine it performs is `out ^= (a*x) mod N`, which is its own
    /// inverse, so re-running it with the same `a` (not `a`'s modular
    /// inverse) is what restores `out` to its pre-state.
    pub fn imul_mod_n_out(
        &mut self,
        in_start: N,
        in_len: N,
        out_start: N,
        out_len: N,
        a: u64,
        modulus: u64,
    ) -> Result<()> {
        self.mul_mod_n_out(in_start, in_len, out_start, out_len, a, modulus)
    }

    pub fn pow_mod_n_out(
        &mut self,
        in_start: N,
        in_len: N,
        out_start: N,
        out_len: N,
        a: u64,
        modulus: u64,
    ) -> Result<()> {
        arithmetic::validate_range(self.n, in_start, in_len)?;
        arithmetic::validate_range(self.n, out_start, out_len)?;
        if modulus == 0 {
            return Err(Error::invalid_argument("modulus must be nonzero"));
        }
        self.apply_permutation(|idx| {
            arithmetic::pow_mod_out(idx, in_start, in_len, out_start, out_len, a, modulus)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn pow_mod_n_out_controlled(
        &mut self,
        in_start: N,
        in_len: N,
        out_start: N,
        out_len: N,
        a: u64,
        modulus: u64,
        ctrl: Idx,
        anti: Idx,
    ) -> Result<()> {
        arithmetic::validate_range(self.n, in_start, in_len)?;
        arithmetic::validate_range(self.n, out_start, out_len)?;
        if modulus == 0 {
            return Err(Error::invalid_argument("modulus must be nonzero"));
        }
        self.apply_permutation(|idx| {
            arithmetic::pow_mod_out_controlled(idx, in_start, in_len, out_start, out_len, a, modulus, ctrl, anti)
        })
    }

    pub fn indexed_lda(&mut self, in_start: N, in_len: N, out_start: N, out_len: N, table: &[u8]) -> Result<()> {
        arithmetic::validate_range(self.n, in_start, in_len)?;
        arithmetic::validate_range(self.n, out_start, out_len)?;
        self.apply_permutation(|idx| {
            arithmetic::indexed_xor(idx, in_start, in_len, out_start, out_len, table)
        })
    }

    pub fn indexed_adc(
        &mut self,
        in_start: N,
        in_len: N,
        out_start: N,
        out_len: N,
        carry_qubit: N,
        table: &[u8],
    ) -> Result<()> {
        arithmetic::validate_range(self.n, in_start, in_len)?;
        arithmetic::validate_range(self.n, out_start, out_len)?;
        self.require_qubit(carry_qubit)?;
        self.apply_permutation(|idx| {
            arithmetic::indexed_adc(idx, in_start, in_len, out_start, out_len, carry_qubit, table, true)
        })
    }

    pub fn indexed_sbc(
        &mut self,
        in_start: N,
        in_len: N,
        out_start: N,
        out_len: N,
        carry_qubit: N,
        table: &[u8],
    ) -> Result<()> {
        arithmetic::validate_range(self.n, in_start, in_len)?;
        arithmetic::validate_range(self.n, out_start, out_len)?;
        self.require_qubit(carry_qubit)?;
        self.apply_permutation(|idx| {
            arithmetic::indexed_adc(idx, in_start, in_len, out_start, out_len, carry_qubit, table, false)
        })
    }
}

impl<S: AmplitudeStore + Clone> QuantumEngine for StateVectorEngine<S> {
    fn qubit_count(&self) -> N {
        self.n
    }

    fn apply_single_qubit(&mut self, m: &M1, q: N) -> Result<()> {
        let m = *m;
        self.apply_pairs(q, move |a0, a1| m1_apply(&m, a0, a1))?;
        self.mark_non_unitary(&m);
        Ok(())
    }

    fn apply_controlled(&mut self, m: &M1, controls: &[N], anti_controls: &[N], t: N) -> Result<()> {
        self.require_qubit(t)?;
        for &c in controls.iter().chain(anti_controls.iter()) {
            self.require_qubit(c)?;
            if c == t {
                return Err(Error::invalid_argument("control qubit equals target qubit"));
            }
        }
        let m = *m;
        let bit = 1usize << t;
        let half = self.len() / 2;
        let StateVectorEngine { store, parallel, scratch, .. } = self;
        let store: &S = store;
        let updates = parallel.map_strided(half, 4, |low| {
            let i0 = Self::insert_zero_bit(low, t);
            let i1 = i0 | bit;
            if Self::control_mask_ok(i0, controls, anti_controls) {
                let (b0, b1) = m1_apply(&m, store.read(i0), store.read(i1));
                (i0, b0, i1, b1)
            } else {
                (i0, store.read(i0), i1, store.read(i1))
            }
        });
        for (i0, b0, i1, b1) in updates {
            scratch.write2(i0, b0, i1, b1);
        }
        std::mem::swap(&mut self.store, &mut self.scratch);
        self.mark_non_unitary(&m);
        Ok(())
    }

    fn uniformly_controlled(&mut self, controls: &[N], t: N, matrices: &[M1]) -> Result<()> {
        self.require_qubit(t)?;
        for &c in controls {
            self.require_qubit(c)?;
        }
        if matrices.len() != 1usize << controls.len() {
            return Err(Error::invalid_argument(
                "uniformly_controlled needs 2^|controls| matrices",
            ));
        }
        let bit = 1usize << t;
        let half = self.len() / 2;
        let StateVectorEngine { store, parallel, scratch, .. } = self;
        let store: &S = store;
        let updates = parallel.map_strided(half, 4, |low| {
            let i0 = Self::insert_zero_bit(low, t);
            let i1 = i0 | bit;
            let mut k = 0usize;
            for (bi, &c) in controls.iter().enumerate() {
                if i0 & (1usize << c) != 0 {
                    k |= 1 << bi;
                }
            }
            let m = matrices[k];
            let (b0, b1) = m1_apply(&m, store.read(i0), store.read(i1));
            (i0, b0, i1, b1)
        });
        let mut norm_acc = 0.0;
        for (i0, b0, i1, b1) in updates {
            norm_acc += b0.norm_sqr() + b1.norm_sqr();
            scratch.write2(i0, b0, i1, b1);
        }
        std::mem::swap(&mut self.store, &mut self.scratch);
        self.norm_is_unit = (norm_acc - 1.0).abs() <= self.norm_threshold;
        if !self.norm_is_unit && self.do_auto_normalize {
            self.normalize()?;
        }
        Ok(())
    }

    fn uniform_parity_rz(&mut self, mask: Idx, angle: R) -> Result<()> {
        let phase_even = crate::math::phase_from_rad(angle);
        let phase_odd = crate::math::phase_from_rad(-angle);
        let n = self.len();
        let StateVectorEngine { store, parallel, scratch, .. } = self;
        let store: &S = store;
        let updates = parallel.map_strided(n, 4, |idx| {
            let parity = (idx & mask).count_ones() % 2;
            let phase = if parity == 0 { phase_even } else { phase_odd };
            (idx, store.read(idx) * phase)
        });
        for (idx, val) in updates {
            scratch.write(idx, val);
        }
        std::mem::swap(&mut self.store, &mut self.scratch);
        Ok(())
    }

    fn measure(&mut self, q: N) -> Result<bool> {
        self.require_qubit(q)?;
        let p1 = self.prob(q);
        let total = self.total_prob();
        if total <= self.norm_threshold {
            return Err(Error::degenerate_state("measure on a collapsed-to-zero state"));
        }
        let roll: R = self.rng.gen_range(0.0..total);
        let outcome = roll < p1;
        self.collapse(q, outcome)?;
        Ok(outcome)
    }

    fn force_measure(&mut self, q: N, value: bool) -> Result<()> {
        self.require_qubit(q)?;
        let p = if value { self.prob(q) } else { 1.0 - self.prob(q) };
        if p <= self.norm_threshold {
            return Err(Error::invalid_argument(
                "force_measure: requested outcome has zero probability",
            ));
        }
        self.collapse(q, value)
    }

    fn prob(&self, q: N) -> R {
        if q >= self.n {
            return 0.0;
        }
        let bit = 1usize << q;
        let probs = self.probs_vec();
        self.parallel.reduce_strided(probs.len(), 4, |i| {
            if i & bit != 0 { probs[i] } else { 0.0 }
        })
    }

    fn prob_all(&self, perm: usize) -> R {
        if perm >= self.len() {
            0.0
        } else {
            self.store.read(perm).norm_sqr()
        }
    }

    fn prob_reg(&self, start: N, len: N, value: usize) -> R {
        let mask = ((1usize << len) - 1) << start;
        self.prob_mask(mask, value << start)
    }

    fn prob_mask(&self, mask: Idx, value: Idx) -> R {
        let probs = self.probs_vec();
        self.parallel
            .reduce_strided(probs.len(), 4, |i| if i & mask == value & mask { probs[i] } else { 0.0 })
    }

    fn prob_parity(&self, mask: Idx) -> R {
        let probs = self.probs_vec();
        self.parallel
            .reduce_strided(probs.len(), 4, |i| if (i & mask).count_ones() % 2 == 1 { probs[i] } else { 0.0 })
    }

    fn get_quantum_state(&self) -> Vec<C> {
        (0..self.len()).map(|i| self.store.read(i) * self.global_phase).collect()
    }

    fn set_quantum_state(&mut self, state: &[C]) -> Result<()> {
        if state.len() != self.len() {
            return Err(Error::invalid_argument("set_quantum_state: length mismatch"));
        }
        for (i, &amp) in state.iter().enumerate() {
            self.store.write(i, amp);
        }
        self.global_phase = C_ONE;
        self.norm_is_unit = false;
        if self.do_auto_normalize {
            self.normalize()?;
        } else {
            self.norm_is_unit = (self.total_prob() - 1.0).abs() <= self.norm_threshold;
        }
        Ok(())
    }

    fn set_permutation(&mut self, perm: usize) -> Result<()> {
        if perm >= self.len() {
            return Err(Error::invalid_argument("set_permutation: index out of range"));
        }
        self.store.clear();
        self.store.write(perm, C_ONE);
        self.norm_is_unit = true;
        Ok(())
    }

    fn normalize(&mut self) -> Result<()> {
        let total = self.total_prob();
        if total <= self.norm_threshold {
            return Err(Error::degenerate_state("normalize: total probability is zero"));
        }
        if (total - 1.0).abs() > self.norm_threshold {
            let inv = 1.0 / total.sqrt();
            let mut buffer = self.store.clone();
            for idx in 0..self.len() {
                buffer.write(idx, self.store.read(idx) * inv);
            }
            self.store = buffer;
        }
        self.norm_is_unit = true;
        Ok(())
    }
}

impl<S: AmplitudeStore + Clone> StateVectorEngine<S> {
    fn collapse(&mut self, q: N, value: bool) -> Result<()> {
        let bit = 1usize << q;
        let want_set = value;
        let mut buffer = self.store.clone();
        let mut abs_sqr = 0.0;
        for idx in 0..self.len() {
            let bit_set = idx & bit != 0;
            if bit_set == want_set {
                let amp = self.store.read(idx);
                abs_sqr += amp.norm_sqr();
                buffer.write(idx, amp);
            } else {
                buffer.write(idx, C_ZERO);
            }
        }
        if abs_sqr <= self.norm_threshold {
            return Err(Error::degenerate_state("collapse onto a zero-probability branch"));
        }
        let inv = 1.0 / abs_sqr.sqrt();
        for idx in 0..self.len() {
            let amp = buffer.read(idx);
            if amp != C_ZERO {
                buffer.write(idx, amp * inv);
            }
        }
        self.store = buffer;
        self.norm_is_unit = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::M1_ID;
    use std::f64::consts::FRAC_1_SQRT_2;

    fn hadamard() -> M1 {
        let f = FRAC_1_SQRT_2;
        [C::new(f, 0.0), C::new(f, 0.0), C::new(f, 0.0), C::new(-f, 0.0)]
    }

    fn xgate() -> M1 {
        [C_ZERO, C_ONE, C_ONE, C_ZERO]
    }

    #[test]
    fn identity_is_noop() {
        let mut e = DenseEngine::new(&EngineConfig::new(1));
        e.apply_single_qubit(&M1_ID, 0).unwrap();
        assert_eq!(e.get_quantum_state(), vec![C_ONE, C_ZERO]);
    }

    #[test]
    fn bell_pair() {
        let mut e = DenseEngine::new(&EngineConfig::new(2));
        e.apply_single_qubit(&hadamard(), 0).unwrap();
        e.apply_controlled(&xgate(), &[0], &[], 1).unwrap();
        let state = e.get_quantum_state();
        let f = FRAC_1_SQRT_2;
        assert!((state[0b00].re - f).abs() < 1e-9);
        assert!(state[0b01].norm_sqr() < 1e-18);
        assert!(state[0b10].norm_sqr() < 1e-18);
        assert!((state[0b11].re - f).abs() < 1e-9);
    }

    #[test]
    fn inc_wraps_mod_range() {
        let mut e = DenseEngine::new(&EngineConfig::new(2).with_initial_permutation(0b11));
        e.inc(0, 2, 1).unwrap();
        let state = e.get_quantum_state();
        assert!((state[0b00].norm_sqr() - 1.0).abs() < 1e-9);
    }
}
