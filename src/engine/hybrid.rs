//! Stabilizer-hybrid layer (spec §4.5, state machine in §4.8): holds
//! either a stabilizer engine plus per-qubit buffered non-Clifford
//! matrices ("Stabilizer" state), or a promoted state-vector engine
//! ("Engine" state). The Engine state is terminal: promotion is never
//! automatically undone.

use log::debug;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::math::{C, Idx, M1, N, R};

use super::state_vector::{DenseEngine, SparseEngine};
use super::stabilizer::StabilizerEngine;
use super::QuantumEngine;

/// The promoted backing engine, kept as a concrete enum (rather than a
/// trait object) so `compose`/`decompose` — not part of [`QuantumEngine`]
/// since they consume/produce `Self` — stay available.
#[derive(Clone)]
enum Promoted {
    Dense(DenseEngine),
    Sparse(SparseEngine),
}

impl Promoted {
    fn build(config: &EngineConfig) -> Self {
        if config.use_sparse {
            Promoted::Sparse(SparseEngine::new(config))
        } else {
            Promoted::Dense(DenseEngine::new(config))
        }
    }

    fn as_engine(&self) -> &dyn QuantumEngine {
        match self {
            Promoted::Dense(e) => e,
            Promoted::Sparse(e) => e,
        }
    }

    fn as_engine_mut(&mut self) -> &mut dyn QuantumEngine {
        match self {
            Promoted::Dense(e) => e,
            Promoted::Sparse(e) => e,
        }
    }

    fn compose(&mut self, other: Self) -> Result<()> {
        match (self, other) {
            (Promoted::Dense(a), Promoted::Dense(b)) => a.compose(b),
            (Promoted::Sparse(a), Promoted::Sparse(b)) => a.compose(b),
            _ => Err(Error::invalid_argument(
                "cannot compose a dense-backed and sparse-backed hybrid engine directly",
            )),
        }
    }

    fn decompose(&mut self, start: N, length: N, eps: R) -> Result<Self> {
        match self {
            Promoted::Dense(e) => e.decompose(start, length, eps).map(Promoted::Dense),
            Promoted::Sparse(e) => e.decompose(start, length, eps).map(Promoted::Sparse),
        }
    }
}

/// Either a stabilizer-backed register with pending per-qubit shard
/// matrices, or a fully promoted state-vector register. Exactly one of
/// `stabilizer` / `promoted` is `Some` at any time.
#[derive(Clone)]
pub struct HybridEngine {
    n: N,
    stabilizer: Option<StabilizerEngine>,
    promoted: Option<Promoted>,
    shard_buffers: Vec<Option<M1>>,
    config: EngineConfig,
}

impl HybridEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let n = config.qubit_count;
        match crate::device::select_device(config.device_id) {
            Ok(ctx) => debug!("hybrid engine: bound to device context {}", ctx.id()),
            Err(e) => debug!("hybrid engine: device selection failed ({e}), staying on host"),
        }
        Self {
            n,
            stabilizer: Some(StabilizerEngine::new(config)),
            promoted: None,
            shard_buffers: vec![None; n],
            config: config.clone(),
        }
    }

    fn require_qubit(&self, q: N) -> Result<()> {
        if q >= self.n {
            Err(Error::invalid_argument(format!(
                "qubit index {q} out of range for {}-qubit hybrid engine",
                self.n
            )))
        } else {
            Ok(())
        }
    }

    /// Materializes the stabilizer state into a state-vector engine and
    /// flushes every pending shard buffer. No-op once already promoted.
    fn promote(&mut self) -> Result<()> {
        if self.promoted.is_some() {
            return Ok(());
        }
        let stab = self
            .stabilizer
            .take()
            .expect("hybrid engine invariant: exactly one backing engine is live");
        let amps = stab.to_state_vector();
        let mut engine = Promoted::build(&self.config);
        engine.as_engine_mut().set_quantum_state(&amps)?;
        for q in 0..self.n {
            if let Some(m) = self.shard_buffers[q].take() {
                engine.as_engine_mut().apply_single_qubit(&m, q)?;
            }
        }
        self.promoted = Some(engine);
        Ok(())
    }

    /// Runs a read-only query against the state the register would
    /// present if every pending shard buffer were flushed, without
    /// mutating `self` (probability queries take `&self`, so an actual
    /// promotion can't be committed here; the next `&mut self` operation
    /// performs and persists it).
    fn with_effective_engine<T>(&self, f: impl FnOnce(&dyn QuantumEngine) -> T) -> T {
        if let Some(p) = &self.promoted {
            return f(p.as_engine());
        }
        let stab = self.stabilizer.as_ref().unwrap();
        if self.shard_buffers.iter().any(Option::is_some) {
            let amps = stab.to_state_vector();
            let mut tmp = Promoted::build(&self.config);
            tmp.as_engine_mut()
                .set_quantum_state(&amps)
                .expect("stabilizer-materialized state is already unit norm");
            for q in 0..self.n {
                if let Some(m) = &self.shard_buffers[q] {
                    tmp.as_engine_mut()
                        .apply_single_qubit(m, q)
                        .expect("buffered shard matrix is unitary by construction");
                }
            }
            f(tmp.as_engine())
        } else {
            f(stab)
        }
    }

    /// Eliminates controls the stabilizer already pins to a definite
    /// value via its Z-probe (spec §4.5's "controlled-gate
    /// optimizations"). `None` means the whole operation is a
    /// guaranteed no-op (some control read its excluded value).
    fn reduce_controls(&self, controls: &[N], anti_controls: &[N]) -> Option<(Vec<N>, Vec<N>)> {
        let stab = self.stabilizer.as_ref()?;
        let mut rc = Vec::new();
        for &c in controls {
            let p = stab.prob(c);
            if p <= 1e-12 {
                return None;
            }
            if p < 1.0 - 1e-12 {
                rc.push(c);
            }
        }
        let mut ra = Vec::new();
        for &c in anti_controls {
            let p = stab.prob(c);
            if p >= 1.0 - 1e-12 {
                return None;
            }
            if p > 1e-12 {
                ra.push(c);
            }
        }
        Some((rc, ra))
    }

    pub fn compose(&mut self, mut other: Self) -> Result<()> {
        if self.promoted.is_none() && other.promoted.is_none() {
            self.stabilizer
                .as_mut()
                .unwrap()
                .compose(other.stabilizer.take().unwrap())?;
        } else {
            self.promote()?;
            other.promote()?;
            self.promoted
                .as_mut()
                .unwrap()
                .compose(other.promoted.take().unwrap())?;
        }
        self.n += other.n;
        self.shard_buffers.append(&mut other.shard_buffers);
        Ok(())
    }

    pub fn decompose(&mut self, start: N, length: N, eps: R) -> Result<Self> {
        if length == 0 || start + length > self.n {
            return Err(Error::invalid_argument(format!(
                "range [{start}, {}) exceeds register width {}",
                start + length,
                self.n
            )));
        }
        if self.promoted.is_none() && length == 1 && self.shard_buffers[start].is_none() {
            let inner = self.stabilizer.as_mut().unwrap().decompose_qubit(start)?;
            self.n -= 1;
            self.shard_buffers.remove(start);
            return Ok(Self {
                n: 1,
                stabilizer: Some(inner),
                promoted: None,
                shard_buffers: vec![None],
                config: self.config.clone(),
            });
        }
        self.promote()?;
        let inner = self.promoted.as_mut().unwrap().decompose(start, length, eps)?;
        self.shard_buffers.drain(start..start + length);
        self.n -= length;
        Ok(Self {
            n: length,
            stabilizer: None,
            promoted: Some(inner),
            shard_buffers: vec![None; length],
            config: self.config.clone(),
        })
    }

    pub fn dispose(&mut self, start: N, length: N, eps: R) -> Result<()> {
        self.decompose(start, length, eps).map(drop)
    }
}

impl QuantumEngine for HybridEngine {
    fn qubit_count(&self) -> N {
        self.n
    }

    fn apply_single_qubit(&mut self, m: &M1, q: N) -> Result<()> {
        self.require_qubit(q)?;
        if let Some(p) = self.promoted.as_mut() {
            return p.as_engine_mut().apply_single_qubit(m, q);
        }
        if let Some(old) = self.shard_buffers[q].take() {
            self.shard_buffers[q] = Some(crate::math::m1_mul(m, &old));
            return Ok(());
        }
        match self.stabilizer.as_mut().unwrap().apply_single_qubit(m, q) {
            Ok(()) => Ok(()),
            Err(_) => {
                // Not a recognized Clifford gate: buffer it rather than
                // promoting immediately (spec §4.5).
                self.shard_buffers[q] = Some(*m);
                Ok(())
            }
        }
    }

    fn apply_controlled(&mut self, m: &M1, controls: &[N], anti_controls: &[N], t: N) -> Result<()> {
        self.require_qubit(t)?;
        for &c in controls.iter().chain(anti_controls.iter()) {
            self.require_qubit(c)?;
        }
        if let Some(p) = self.promoted.as_mut() {
            return p.as_engine_mut().apply_controlled(m, controls, anti_controls, t);
        }
        match self.reduce_controls(controls, anti_controls) {
            None => return Ok(()),
            Some((rc, ra)) => {
                if rc.is_empty() && ra.is_empty() {
                    return self.apply_single_qubit(m, t);
                }
                let buffers_clear = self.shard_buffers[t].is_none()
                    && rc.iter().chain(ra.iter()).all(|&q| self.shard_buffers[q].is_none());
                if buffers_clear {
                    let outcome = self
                        .stabilizer
                        .as_mut()
                        .unwrap()
                        .apply_controlled(m, &rc, &ra, t);
                    if outcome.is_ok() {
                        return outcome;
                    }
                }
            }
        }
        self.promote()?;
        self.promoted
            .as_mut()
            .unwrap()
            .as_engine_mut()
            .apply_controlled(m, controls, anti_controls, t)
    }

    fn uniformly_controlled(&mut self, controls: &[N], t: N, matrices: &[M1]) -> Result<()> {
        self.require_qubit(t)?;
        for &c in controls {
            self.require_qubit(c)?;
        }
        if let Some(p) = self.promoted.as_mut() {
            return p.as_engine_mut().uniformly_controlled(controls, t, matrices);
        }
        if controls.is_empty() {
            return self.apply_single_qubit(&matrices[0], t);
        }
        let buffers_clear =
            self.shard_buffers[t].is_none() && controls.iter().all(|&q| self.shard_buffers[q].is_none());
        if buffers_clear {
            let outcome = self
                .stabilizer
                .as_mut()
                .unwrap()
                .uniformly_controlled(controls, t, matrices);
            if outcome.is_ok() {
                return outcome;
            }
        }
        self.promote()?;
        self.promoted
            .as_mut()
            .unwrap()
            .as_engine_mut()
            .uniformly_controlled(controls, t, matrices)
    }

    fn uniform_parity_rz(&mut self, mask: Idx, angle: R) -> Result<()> {
        if let Some(p) = self.promoted.as_mut() {
            return p.as_engine_mut().uniform_parity_rz(mask, angle);
        }
        let qubits_clear = (0..self.n)
            .filter(|q| mask & (1 << q) != 0)
            .all(|q| self.shard_buffers[q].is_none());
        if qubits_clear {
            let outcome = self.stabilizer.as_mut().unwrap().uniform_parity_rz(mask, angle);
            if outcome.is_ok() {
                return outcome;
            }
        }
        self.promote()?;
        self.promoted.as_mut().unwrap().as_engine_mut().uniform_parity_rz(mask, angle)
    }

    fn measure(&mut self, q: N) -> Result<bool> {
        self.require_qubit(q)?;
        if let Some(p) = self.promoted.as_mut() {
            return p.as_engine_mut().measure(q);
        }
        if self.shard_buffers[q].is_some() {
            self.promote()?;
            return self.promoted.as_mut().unwrap().as_engine_mut().measure(q);
        }
        self.stabilizer.as_mut().unwrap().measure(q)
    }

    fn force_measure(&mut self, q: N, value: bool) -> Result<()> {
        self.require_qubit(q)?;
        if let Some(p) = self.promoted.as_mut() {
            return p.as_engine_mut().force_measure(q, value);
        }
        if self.shard_buffers[q].is_some() {
            self.promote()?;
            return self.promoted.as_mut().unwrap().as_engine_mut().force_measure(q, value);
        }
        self.stabilizer.as_mut().unwrap().force_measure(q, value)
    }

    fn prob(&self, q: N) -> R {
        self.with_effective_engine(|e| e.prob(q))
    }

    fn prob_all(&self, perm: usize) -> R {
        self.with_effective_engine(|e| e.prob_all(perm))
    }

    fn prob_reg(&self, start: N, len: N, value: usize) -> R {
        self.with_effective_engine(|e| e.prob_reg(start, len, value))
    }

    fn prob_mask(&self, mask: Idx, value: Idx) -> R {
        self.with_effective_engine(|e| e.prob_mask(mask, value))
    }

    fn prob_parity(&self, mask: Idx) -> R {
        self.with_effective_engine(|e| e.prob_parity(mask))
    }

    fn get_quantum_state(&self) -> Vec<C> {
        self.with_effective_engine(|e| e.get_quantum_state())
    }

    fn set_quantum_state(&mut self, state: &[C]) -> Result<()> {
        if let Some(p) = self.promoted.as_mut() {
            return p.as_engine_mut().set_quantum_state(state);
        }
        let nonzero: Vec<usize> = state
            .iter()
            .enumerate()
            .filter(|(_, c)| c.norm_sqr() > 1e-12)
            .map(|(i, _)| i)
            .collect();
        if nonzero.len() == 1 {
            self.stabilizer.as_mut().unwrap().set_quantum_state(state)?;
            for b in self.shard_buffers.iter_mut() {
                *b = None;
            }
            return Ok(());
        }
        // Non-basis amplitudes: Stabilizer -> Engine per spec §4.8.
        self.stabilizer = None;
        let mut engine = Promoted::build(&self.config);
        engine.as_engine_mut().set_quantum_state(state)?;
        self.promoted = Some(engine);
        for b in self.shard_buffers.iter_mut() {
            *b = None;
        }
        Ok(())
    }

    fn set_permutation(&mut self, perm: usize) -> Result<()> {
        for b in self.shard_buffers.iter_mut() {
            *b = None;
        }
        if let Some(p) = self.promoted.as_mut() {
            return p.as_engine_mut().set_permutation(perm);
        }
        self.stabilizer.as_mut().unwrap().set_permutation(perm)
    }

    fn normalize(&mut self) -> Result<()> {
        if let Some(p) = self.promoted.as_mut() {
            return p.as_engine_mut().normalize();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hadamard_m1() -> M1 {
        let f = std::f64::consts::FRAC_1_SQRT_2;
        [C::new(f, 0.0), C::new(f, 0.0), C::new(f, 0.0), C::new(-f, 0.0)]
    }

    fn x_m1() -> M1 {
        [crate::math::C_ZERO, crate::math::C_ONE, crate::math::C_ONE, crate::math::C_ZERO]
    }

    fn t_gate_m1() -> M1 {
        let phase = crate::math::phase_from_rad(std::f64::consts::FRAC_PI_4);
        [crate::math::C_ONE, crate::math::C_ZERO, crate::math::C_ZERO, phase]
    }

    #[test]
    fn clifford_only_circuit_never_promotes() {
        let mut e = HybridEngine::new(&EngineConfig::new(2));
        e.apply_single_qubit(&hadamard_m1(), 0).unwrap();
        e.apply_controlled(&x_m1(), &[0], &[], 1).unwrap();
        assert!(e.promoted.is_none());
        let v = e.get_quantum_state();
        let f = std::f64::consts::FRAC_1_SQRT_2;
        assert!((v[0].re - f).abs() < 1e-9);
        assert!((v[3].re - f).abs() < 1e-9);
    }

    #[test]
    fn non_clifford_single_qubit_gate_buffers_without_promoting() {
        let mut e = HybridEngine::new(&EngineConfig::new(1));
        e.apply_single_qubit(&t_gate_m1(), 0).unwrap();
        assert!(e.promoted.is_none());
        assert!(e.shard_buffers[0].is_some());
    }

    #[test]
    fn non_clifford_controlled_gate_promotes() {
        let mut e = HybridEngine::new(&EngineConfig::new(2));
        e.apply_single_qubit(&hadamard_m1(), 0).unwrap();
        e.apply_controlled(&t_gate_m1(), &[0], &[], 1).unwrap();
        assert!(e.promoted.is_some());
    }

    #[test]
    fn known_zero_control_eliminates_gate_as_noop() {
        let mut e = HybridEngine::new(&EngineConfig::new(2));
        e.apply_controlled(&x_m1(), &[0], &[], 1).unwrap();
        assert!(e.promoted.is_none());
        assert_eq!(e.prob(1), 0.0);
    }

    #[test]
    fn decompose_single_qubit_round_trips_without_promoting() {
        let mut e = HybridEngine::new(&EngineConfig::new(2));
        e.apply_single_qubit(&x_m1(), 1).unwrap();
        let inner = e.decompose(1, 1, 1e-9).unwrap();
        assert_eq!(e.qubit_count(), 1);
        assert_eq!(inner.qubit_count(), 1);
        assert_eq!(inner.prob(0), 1.0);
    }
}
