//! Unit (separability) layer (spec §4.6): keeps every qubit that is not
//! yet provably entangled with another as its own two-amplitude shard,
//! deferring single-qubit gates into a shard-local buffer and
//! controlled-phase/controlled-invert gates into a cross-shard buffer
//! attached to the pair of shards involved. Gates that cannot be
//! represented this way force an `Entangle`, which composes the
//! affected shards' state into one [`HybridEngine`] and forwards the
//! gate there; a later measurement or a probability collapsing to 0/1
//! may let a qubit separate back out via [`HybridEngine::decompose`].
//!
//! Shards live in a flat, index-stable arena (design note 9.1): shard
//! `i` always corresponds to qubit `i` of the layer's logical register,
//! and sub-engines live in a parallel arena of optional slots so that
//! freeing one (once every qubit referencing it has separated out)
//! leaves a hole rather than shifting every other shard's engine index.
//!
//! Basis tracking (the spec's separate Z/X shard flag) is folded into
//! the buffer itself here: a shard's pending gate is kept as a single
//! composed 2x2 matrix rather than a flag plus a residual matrix, so
//! e.g. two Hadamards in a row cancel for free via ordinary matrix
//! multiplication instead of needing a dedicated commutation rule.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::math::matrix::{classify, invert_matrix, is_antidiagonal_m1, phase_matrix, MatrixShape};
use crate::math::{m1_apply, m1_mul, C, Idx, M1, M1_ID, N, R};

use super::hybrid::HybridEngine;
use super::QuantumEngine;

/// A pending controlled-phase/controlled-invert link between two
/// still-separable shards (spec §4.6 "cross-shard phase/invert
/// buffers"). `theta0`/`theta1` are the phases applied when the
/// control/target pair reads `(0, 0)`/`(0, 1)` and `(1, 0)`/`(1, 1)`
/// respectively for a plain phase link, or the off-diagonal phases for
/// an invert link; see [`PhaseLink::matrix`].
#[derive(Clone, Copy, Debug)]
struct PhaseLink {
    theta0: R,
    theta1: R,
    is_invert: bool,
}

impl PhaseLink {
    fn identity() -> Self {
        Self { theta0: 0.0, theta1: 0.0, is_invert: false }
    }

    fn is_trivial(&self) -> bool {
        !self.is_invert && approx_zero(self.theta0) && approx_zero(self.theta1)
    }

    fn matrix(&self) -> M1 {
        if self.is_invert {
            invert_matrix(self.theta0, self.theta1)
        } else {
            phase_matrix(self.theta0, self.theta1)
        }
    }

    /// Folds another link of the same control/target pair into this
    /// one. Angles add mod `4*PI` (two full Pauli-group revolutions);
    /// `is_invert` differing forces the caller to flush the existing
    /// link before attaching the new one (can't be represented by a
    /// single diagonal-or-antidiagonal pair).
    fn fuse(&mut self, other: &PhaseLink) -> bool {
        if self.is_invert != other.is_invert {
            return false;
        }
        self.theta0 = wrap_4pi(self.theta0 + other.theta0);
        self.theta1 = wrap_4pi(self.theta1 + other.theta1);
        true
    }
}

fn wrap_4pi(theta: R) -> R {
    let four_pi = 4.0 * std::f64::consts::PI;
    theta.rem_euclid(four_pi)
}

fn approx_zero(theta: R) -> bool {
    wrap_4pi(theta).min(4.0 * std::f64::consts::PI - wrap_4pi(theta)) < 1e-9
}

/// One qubit's representation: either a free-standing amplitude pair
/// with a pending local buffer, or a reference into the sub-engine
/// arena.
#[derive(Clone, Copy)]
enum ShardState {
    Local { amp0: C, amp1: C, buffer: M1 },
    Shared { engine: usize, index: N },
}

#[derive(Clone)]
struct Shard {
    state: ShardState,
    /// Keyed by target shard index; present only while both ends are
    /// `Local`.
    controls: std::collections::BTreeMap<N, PhaseLink>,
    /// Keyed by control shard index; mirrors `controls` on the partner.
    targets: std::collections::BTreeMap<N, PhaseLink>,
}

impl Shard {
    fn isolated(amp0: C, amp1: C) -> Self {
        Self {
            state: ShardState::Local { amp0, amp1, buffer: M1_ID },
            controls: Default::default(),
            targets: Default::default(),
        }
    }

    fn is_local(&self) -> bool {
        matches!(self.state, ShardState::Local { .. })
    }

    fn has_cross_links(&self) -> bool {
        !self.controls.is_empty() || !self.targets.is_empty()
    }
}

/// The unit (separability) layer. Every externally visible operation is
/// expressed per-qubit, matching [`QuantumEngine`]; entangling and
/// separating are internal bookkeeping triggered by gates and
/// measurements the shard/buffer model can't represent on its own.
#[derive(Clone)]
pub struct UnitLayer {
    shards: Vec<Shard>,
    engines: Vec<Option<HybridEngine>>,
    config: EngineConfig,
    rng: StdRng,
}

impl UnitLayer {
    pub fn new(config: &EngineConfig) -> Self {
        let n = config.qubit_count;
        let mut shards = Vec::with_capacity(n);
        for q in 0..n {
            let bit = (config.initial_permutation >> q) & 1;
            if bit == 0 {
                shards.push(Shard::isolated(crate::math::C_ONE, crate::math::C_ZERO));
            } else {
                shards.push(Shard::isolated(crate::math::C_ZERO, crate::math::C_ONE));
            }
        }
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { shards, engines: Vec::new(), config: config.clone(), rng }
    }

    fn require_qubit(&self, q: N) -> Result<()> {
        if q >= self.shards.len() {
            Err(Error::invalid_argument(format!(
                "qubit index {q} out of range for {}-qubit unit layer",
                self.shards.len()
            )))
        } else {
            Ok(())
        }
    }

    // ---- buffer flushing ----

    /// Applies a `Local` shard's pending buffer to its amplitude pair
    /// and resets the buffer to identity. No-op on a `Shared` shard.
    fn flush_local(&mut self, q: N) {
        if let ShardState::Local { amp0, amp1, buffer } = &mut self.shards[q].state {
            let (b0, b1) = m1_apply(buffer, *amp0, *amp1);
            *amp0 = b0;
            *amp1 = b1;
            *buffer = M1_ID;
        }
    }

    /// Resolves a cross-shard link between `control` and `target` by
    /// entangling both shards and applying the link's matrix as an
    /// ordinary controlled gate, then removing the link.
    fn flush_link(&mut self, control: N, target: N) -> Result<()> {
        let link = match self.shards[control].controls.remove(&target) {
            Some(link) => link,
            None => return Ok(()),
        };
        self.shards[target].targets.remove(&control);
        let m = link.matrix();
        self.entangle(&[control, target])?;
        self.apply_controlled_shared(&m, &[control], &[], target)
    }

    /// Flushes every cross-shard link touching `q`, in either role.
    fn flush_cross_links(&mut self, q: N) -> Result<()> {
        loop {
            let next_control_target = self.shards[q].controls.keys().next().copied();
            if let Some(t) = next_control_target {
                self.flush_link(q, t)?;
                continue;
            }
            let next_target_control = self.shards[q].targets.keys().next().copied();
            if let Some(c) = next_target_control {
                self.flush_link(c, q)?;
                continue;
            }
            break;
        }
        Ok(())
    }

    // ---- entangling ----

    /// Merges the sub-engines (if any) backing `qubits`, plus any of
    /// `qubits` still `Local`, into a single shared [`HybridEngine`].
    /// Idempotent: qubits already sharing one engine are left alone.
    fn entangle(&mut self, qubits: &[N]) -> Result<()> {
        for &q in qubits {
            self.flush_local(q);
        }
        let mut slots: Vec<usize> = qubits
            .iter()
            .filter_map(|&q| match self.shards[q].state {
                ShardState::Shared { engine, .. } => Some(engine),
                ShardState::Local { .. } => None,
            })
            .collect();
        slots.sort_unstable();
        slots.dedup();

        let base_slot = match slots.first() {
            Some(&slot) => slot,
            None => self.alloc_engine_slot(HybridEngine::new(&self.one_qubit_config())),
        };

        for &slot in slots.iter().skip(1) {
            let other = self.engines[slot].take().expect("engine slot referenced by a shard must be occupied");
            let offset = self.engines[base_slot].as_ref().unwrap().qubit_count();
            self.engines[base_slot].as_mut().unwrap().compose(other)?;
            for shard in self.shards.iter_mut() {
                if let ShardState::Shared { engine, index } = &mut shard.state {
                    if *engine == slot {
                        *engine = base_slot;
                        *index += offset;
                    }
                }
            }
        }

        // If nothing was shared yet, the base engine is a throwaway
        // 1-qubit placeholder; fold the first touched qubit into it
        // below rather than composing an extra no-op register.
        let base_was_placeholder = slots.is_empty();
        let mut first_local = true;

        for &q in qubits {
            if let ShardState::Shared { engine, .. } = self.shards[q].state {
                if engine == base_slot {
                    continue;
                }
            }
            let (amp0, amp1) = match self.shards[q].state {
                ShardState::Local { amp0, amp1, .. } => (amp0, amp1),
                ShardState::Shared { .. } => unreachable!("non-base shared qubit already merged above"),
            };
            if base_was_placeholder && first_local {
                first_local = false;
                let mut cfg = self.one_qubit_config();
                cfg.initial_permutation = 0;
                let placeholder = self.engines[base_slot].as_mut().unwrap();
                placeholder.set_quantum_state(&[amp0, amp1])?;
                self.shards[q].state = ShardState::Shared { engine: base_slot, index: 0 };
                continue;
            }
            let offset = self.engines[base_slot].as_ref().unwrap().qubit_count();
            let mut single = HybridEngine::new(&self.one_qubit_config());
            single.set_quantum_state(&[amp0, amp1])?;
            self.engines[base_slot].as_mut().unwrap().compose(single)?;
            self.shards[q].state = ShardState::Shared { engine: base_slot, index: offset };
        }
        Ok(())
    }

    fn one_qubit_config(&self) -> EngineConfig {
        let mut cfg = self.config.clone();
        cfg.qubit_count = 1;
        cfg.initial_permutation = 0;
        cfg
    }

    fn alloc_engine_slot(&mut self, engine: HybridEngine) -> usize {
        for (i, slot) in self.engines.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(engine);
                return i;
            }
        }
        self.engines.push(Some(engine));
        self.engines.len() - 1
    }

    /// Attempts to factor `q` back out of its sub-engine into a `Local`
    /// shard. Silently leaves `q` `Shared` if it isn't (yet) separable.
    fn try_separate(&mut self, q: N) {
        let (slot, index) = match self.shards[q].state {
            ShardState::Shared { engine, index } => (engine, index),
            ShardState::Local { .. } => return,
        };
        let eps = self.config.separability_threshold;
        let before = self.engines[slot].as_ref().expect("shard engine reference must resolve").qubit_count();
        let result = self.engines[slot].as_mut().unwrap().decompose(index, 1, eps);
        match result {
            Ok(mut inner) => {
                let v = inner.get_quantum_state();
                self.shards[q].state = ShardState::Local { amp0: v[0], amp1: v[1], buffer: M1_ID };
                for shard in self.shards.iter_mut() {
                    if let ShardState::Shared { engine: e, index: i } = &mut shard.state {
                        if *e == slot && *i > index {
                            *i -= 1;
                        }
                    }
                }
                if before == 1 {
                    self.engines[slot] = None;
                }
            }
            Err(_) => {}
        }
    }

    // ---- gate dispatch helpers ----

    fn apply_single_shared(&mut self, m: &M1, q: N) -> Result<()> {
        if let ShardState::Shared { engine, index } = self.shards[q].state {
            self.engines[engine].as_mut().unwrap().apply_single_qubit(m, index)
        } else {
            unreachable!("apply_single_shared called on a Local shard")
        }
    }

    fn apply_controlled_shared(&mut self, m: &M1, controls: &[N], anti_controls: &[N], t: N) -> Result<()> {
        let resolve = |shards: &[Shard], q: N| match shards[q].state {
            ShardState::Shared { engine, index } => (engine, index),
            ShardState::Local { .. } => unreachable!("apply_controlled_shared requires all qubits entangled"),
        };
        let (engine_slot, target_index) = resolve(&self.shards, t);
        let control_idx: Vec<N> = controls.iter().map(|&c| resolve(&self.shards, c).1).collect();
        let anti_idx: Vec<N> = anti_controls.iter().map(|&c| resolve(&self.shards, c).1).collect();
        self.engines[engine_slot]
            .as_mut()
            .unwrap()
            .apply_controlled(m, &control_idx, &anti_idx, target_index)
    }

    /// Recognizes a pure Pauli X (no residual phase): antidiagonal with
    /// unit-magnitude, equal off-diagonal entries and no diagonal
    /// component — the shape the "FlipPhaseAnti" commutation rule
    /// applies to.
    fn is_pure_x(m: &M1) -> bool {
        is_antidiagonal_m1(m)
            && (m[1] - crate::math::C_ONE).norm_sqr() < 1e-12
            && (m[2] - crate::math::C_ONE).norm_sqr() < 1e-12
    }

    /// X applied to a qubit holding cross-shard links commutes through
    /// them by relabeling rather than flushing (spec §4.6 "FlipPhaseAnti
    /// rule"): as a control, swap which branch each phase belongs to;
    /// as a target, an invert link's two phases swap roles while a pure
    /// phase link is unaffected by conjugation through X on its target.
    fn flip_phase_anti(&mut self, q: N) {
        let controls: Vec<N> = self.shards[q].controls.keys().copied().collect();
        for t in controls {
            if let Some(link) = self.shards[q].controls.get_mut(&t) {
                std::mem::swap(&mut link.theta0, &mut link.theta1);
            }
            if let Some(link) = self.shards[t].targets.get_mut(&q) {
                std::mem::swap(&mut link.theta0, &mut link.theta1);
            }
        }
        let targets: Vec<N> = self.shards[q].targets.keys().copied().collect();
        for c in targets {
            if let Some(link) = self.shards[q].targets.get_mut(&c) {
                link.is_invert = !link.is_invert;
            }
            if let Some(link) = self.shards[c].controls.get_mut(&q) {
                link.is_invert = !link.is_invert;
            }
        }
    }

    /// Attaches (or fuses into an existing) cross-shard link between a
    /// control and a target shard, dropping it entirely if it fuses
    /// down to the identity.
    fn attach_link(&mut self, control: N, target: N, link: PhaseLink) -> Result<()> {
        self.flush_local(control);
        self.flush_local(target);
        let existing = self.shards[control].controls.get(&target).copied();
        let merged = match existing {
            None => link,
            Some(mut prior) => {
                if prior.fuse(&link) {
                    prior
                } else {
                    self.flush_link(control, target)?;
                    link
                }
            }
        };
        if merged.is_trivial() {
            self.shards[control].controls.remove(&target);
            self.shards[target].targets.remove(&control);
        } else {
            self.shards[control].controls.insert(target, merged);
            self.shards[target].targets.insert(control, merged);
        }
        Ok(())
    }
}

impl QuantumEngine for UnitLayer {
    fn qubit_count(&self) -> N {
        self.shards.len()
    }

    fn apply_single_qubit(&mut self, m: &M1, q: N) -> Result<()> {
        self.require_qubit(q)?;
        if !self.shards[q].is_local() {
            return self.apply_single_shared(m, q);
        }
        if Self::is_pure_x(m) {
            self.flip_phase_anti(q);
        } else if classify(m) == MatrixShape::General && self.shards[q].has_cross_links() {
            // A general (e.g. Hadamard-like) gate doesn't commute past
            // a cross-shard link unless the link is itself a global
            // phase or a sigma_x-like invert (theta0 == theta1); flush
            // anything stricter before changing basis.
            let stuck: Vec<(bool, N)> = self.shards[q]
                .controls
                .iter()
                .filter(|(_, link)| !approx_zero(link.theta0 - link.theta1))
                .map(|(&t, _)| (true, t))
                .chain(
                    self.shards[q]
                        .targets
                        .iter()
                        .filter(|(_, link)| !approx_zero(link.theta0 - link.theta1))
                        .map(|(&c, _)| (false, c)),
                )
                .collect();
            for (q_is_control, other) in stuck {
                if q_is_control {
                    self.flush_link(q, other)?;
                } else {
                    self.flush_link(other, q)?;
                }
            }
        }
        if let ShardState::Local { buffer, .. } = &mut self.shards[q].state {
            *buffer = m1_mul(m, buffer);
        }
        if !crate::math::matrix::is_unitary_m1(m) {
            self.flush_local(q);
            if self.config.do_auto_normalize {
                if let ShardState::Local { amp0, amp1, .. } = &mut self.shards[q].state {
                    let total = amp0.norm_sqr() + amp1.norm_sqr();
                    if total > self.config.norm_threshold {
                        let inv = 1.0 / total.sqrt();
                        *amp0 *= inv;
                        *amp1 *= inv;
                    }
                }
            }
        }
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
        let single_control = controls.len() + anti_controls.len() == 1;
        let shape = classify(m);
        let representable = matches!(shape, MatrixShape::Phase | MatrixShape::Invert)
            && single_control
            && self.shards[t].is_local()
            && controls.iter().chain(anti_controls).all(|&c| self.shards[c].is_local());

        if representable {
            let (control, is_anti) = match (controls.first(), anti_controls.first()) {
                (Some(&c), None) => (c, false),
                (None, Some(&c)) => (c, true),
                _ => unreachable!("single_control guarantees exactly one of the two lists is nonempty"),
            };
            let (mut theta0, mut theta1, is_invert) = match shape {
                MatrixShape::Phase => (m[0].arg() as R, m[3].arg() as R, false),
                MatrixShape::Invert => (m[1].arg() as R, m[2].arg() as R, true),
                _ => unreachable!(),
            };
            if is_anti {
                std::mem::swap(&mut theta0, &mut theta1);
            }
            return self.attach_link(control, t, PhaseLink { theta0, theta1, is_invert });
        }

        let mut all: Vec<N> = controls.iter().chain(anti_controls.iter()).copied().collect();
        all.push(t);
        for &q in &all {
            self.flush_cross_links(q)?;
        }
        self.entangle(&all)?;
        self.apply_controlled_shared(m, controls, anti_controls, t)
    }

    fn uniformly_controlled(&mut self, controls: &[N], t: N, matrices: &[M1]) -> Result<()> {
        self.require_qubit(t)?;
        for &c in controls {
            self.require_qubit(c)?;
        }
        if controls.is_empty() {
            return self.apply_single_qubit(&matrices[0], t);
        }
        let mut all: Vec<N> = controls.to_vec();
        all.push(t);
        for &q in &all {
            self.flush_cross_links(q)?;
        }
        self.entangle(&all)?;
        let control_idx: Vec<N> = controls
            .iter()
            .map(|&c| match self.shards[c].state {
                ShardState::Shared { index, .. } => index,
                ShardState::Local { .. } => unreachable!("entangle guarantees Shared"),
            })
            .collect();
        let target_idx = match self.shards[t].state {
            ShardState::Shared { index, .. } => index,
            ShardState::Local { .. } => unreachable!("entangle guarantees Shared"),
        };
        let engine_slot = match self.shards[t].state {
            ShardState::Shared { engine, .. } => engine,
            ShardState::Local { .. } => unreachable!(),
        };
        self.engines[engine_slot]
            .as_mut()
            .unwrap()
            .uniformly_controlled(&control_idx, target_idx, matrices)
    }

    fn uniform_parity_rz(&mut self, mask: Idx, angle: R) -> Result<()> {
        let qubits: Vec<N> = (0..self.shards.len()).filter(|q| mask & (1 << q) != 0).collect();
        if qubits.is_empty() {
            return Ok(());
        }
        for &q in &qubits {
            self.flush_cross_links(q)?;
        }
        self.entangle(&qubits)?;
        let engine_slot = match self.shards[qubits[0]].state {
            ShardState::Shared { engine, .. } => engine,
            ShardState::Local { .. } => unreachable!(),
        };
        let local_mask = qubits.iter().fold(0usize, |acc, &q| {
            let index = match self.shards[q].state {
                ShardState::Shared { index, .. } => index,
                ShardState::Local { .. } => unreachable!(),
            };
            acc | (1 << index)
        });
        self.engines[engine_slot].as_mut().unwrap().uniform_parity_rz(local_mask, angle)
    }

    fn measure(&mut self, q: N) -> Result<bool> {
        self.require_qubit(q)?;
        self.flush_cross_links(q)?;
        let outcome = match self.shards[q].state {
            ShardState::Local { .. } => {
                self.flush_local(q);
                let (amp0, amp1) = match self.shards[q].state {
                    ShardState::Local { amp0, amp1, .. } => (amp0, amp1),
                    _ => unreachable!(),
                };
                let p1 = amp1.norm_sqr() / (amp0.norm_sqr() + amp1.norm_sqr());
                let roll: R = self.rng.gen_range(0.0..1.0);
                let outcome = roll < p1;
                self.shards[q].state = if outcome {
                    ShardState::Local { amp0: crate::math::C_ZERO, amp1: crate::math::C_ONE, buffer: M1_ID }
                } else {
                    ShardState::Local { amp0: crate::math::C_ONE, amp1: crate::math::C_ZERO, buffer: M1_ID }
                };
                outcome
            }
            ShardState::Shared { engine, index } => {
                let outcome = self.engines[engine].as_mut().unwrap().measure(index)?;
                outcome
            }
        };
        self.try_separate(q);
        Ok(outcome)
    }

    fn force_measure(&mut self, q: N, value: bool) -> Result<()> {
        self.require_qubit(q)?;
        self.flush_cross_links(q)?;
        match self.shards[q].state {
            ShardState::Local { .. } => {
                self.flush_local(q);
                let (amp0, amp1) = match self.shards[q].state {
                    ShardState::Local { amp0, amp1, .. } => (amp0, amp1),
                    _ => unreachable!(),
                };
                let p = if value { amp1.norm_sqr() } else { amp0.norm_sqr() };
                if p <= self.config.norm_threshold {
                    return Err(Error::invalid_argument(
                        "force_measure: requested outcome has zero probability",
                    ));
                }
                self.shards[q].state = if value {
                    ShardState::Local { amp0: crate::math::C_ZERO, amp1: crate::math::C_ONE, buffer: M1_ID }
                } else {
                    ShardState::Local { amp0: crate::math::C_ONE, amp1: crate::math::C_ZERO, buffer: M1_ID }
                };
            }
            ShardState::Shared { engine, index } => {
                self.engines[engine].as_mut().unwrap().force_measure(index, value)?;
            }
        }
        self.try_separate(q);
        Ok(())
    }

    fn prob(&self, q: N) -> R {
        if q >= self.shards.len() {
            return 0.0;
        }
        match &self.shards[q].state {
            ShardState::Local { amp0, amp1, buffer } => {
                let (_, b1) = m1_apply(buffer, *amp0, *amp1);
                b1.norm_sqr()
            }
            ShardState::Shared { engine, index } => self.engines[*engine].as_ref().unwrap().prob(*index),
        }
    }

    fn prob_all(&self, perm: usize) -> R {
        let n = self.shards.len();
        if perm >= (1usize << n) {
            return 0.0;
        }
        let state = self.get_quantum_state();
        state[perm].norm_sqr()
    }

    fn prob_reg(&self, start: N, len: N, value: usize) -> R {
        let mask = ((1usize << len) - 1) << start;
        self.prob_mask(mask, value << start)
    }

    fn prob_mask(&self, mask: Idx, value: Idx) -> R {
        let state = self.get_quantum_state();
        state
            .iter()
            .enumerate()
            .filter(|(i, _)| i & mask == value & mask)
            .map(|(_, a)| a.norm_sqr())
            .sum()
    }

    fn prob_parity(&self, mask: Idx) -> R {
        let state = self.get_quantum_state();
        state
            .iter()
            .enumerate()
            .filter(|(i, _)| (i & mask).count_ones() % 2 == 1)
            .map(|(_, a)| a.norm_sqr())
            .sum()
    }

    fn get_quantum_state(&self) -> Vec<C> {
        let n = self.shards.len();
        if n == 0 {
            return vec![crate::math::C_ONE];
        }
        let mut scratch = self.clone();
        let all: Vec<N> = (0..n).collect();
        scratch.entangle(&all).expect("entangling every qubit of a well-formed layer cannot fail");
        let engine_slot = match scratch.shards[0].state {
            ShardState::Shared { engine, .. } => engine,
            ShardState::Local { .. } => unreachable!("entangle leaves every qubit Shared"),
        };
        let mapping: Vec<N> = (0..n)
            .map(|q| match scratch.shards[q].state {
                ShardState::Shared { index, .. } => index,
                ShardState::Local { .. } => unreachable!(),
            })
            .collect();
        let engine_state = scratch.engines[engine_slot].as_ref().unwrap().get_quantum_state();
        let mut out = vec![crate::math::C_ZERO; 1 << n];
        for (shard_idx, slot) in out.iter_mut().enumerate() {
            let mut engine_idx = 0usize;
            for (i, &target_bit) in mapping.iter().enumerate() {
                if shard_idx & (1 << i) != 0 {
                    engine_idx |= 1 << target_bit;
                }
            }
            *slot = engine_state[engine_idx];
        }
        out
    }

    fn set_quantum_state(&mut self, state: &[C]) -> Result<()> {
        let n = self.shards.len();
        if state.len() != 1usize << n {
            return Err(Error::invalid_argument("set_quantum_state: length mismatch"));
        }
        if n == 0 {
            return Ok(());
        }
        let all: Vec<N> = (0..n).collect();
        self.entangle(&all)?;
        let engine_slot = match self.shards[0].state {
            ShardState::Shared { engine, .. } => engine,
            ShardState::Local { .. } => unreachable!("entangle leaves every qubit Shared"),
        };
        let mapping: Vec<N> = (0..n)
            .map(|q| match self.shards[q].state {
                ShardState::Shared { index, .. } => index,
                ShardState::Local { .. } => unreachable!(),
            })
            .collect();
        let mut permuted = vec![crate::math::C_ZERO; 1 << n];
        for (shard_idx, amp) in state.iter().enumerate() {
            let mut engine_idx = 0usize;
            for (i, &target_bit) in mapping.iter().enumerate() {
                if shard_idx & (1 << i) != 0 {
                    engine_idx |= 1 << target_bit;
                }
            }
            permuted[engine_idx] = *amp;
        }
        self.engines[engine_slot].as_mut().unwrap().set_quantum_state(&permuted)?;
        for q in 0..n {
            self.try_separate(q);
        }
        Ok(())
    }

    fn set_permutation(&mut self, perm: usize) -> Result<()> {
        let n = self.shards.len();
        if perm >= (1usize << n).max(1) {
            return Err(Error::invalid_argument("set_permutation: index out of range"));
        }
        self.shards.clear();
        for q in 0..n {
            let bit = (perm >> q) & 1;
            self.shards.push(if bit == 0 {
                Shard::isolated(crate::math::C_ONE, crate::math::C_ZERO)
            } else {
                Shard::isolated(crate::math::C_ZERO, crate::math::C_ONE)
            });
        }
        self.engines.clear();
        Ok(())
    }

    fn normalize(&mut self) -> Result<()> {
        for slot in self.engines.iter_mut().flatten() {
            slot.normalize()?;
        }
        for shard in self.shards.iter_mut() {
            if let ShardState::Local { amp0, amp1, buffer } = &mut shard.state {
                let (b0, b1) = m1_apply(buffer, *amp0, *amp1);
                let total = b0.norm_sqr() + b1.norm_sqr();
                if total <= 1e-15 {
                    return Err(Error::degenerate_state("normalize: shard has zero probability"));
                }
                let inv = 1.0 / total.sqrt();
                *amp0 = b0 * inv;
                *amp1 = b1 * inv;
                *buffer = M1_ID;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hadamard() -> M1 {
        let f = std::f64::consts::FRAC_1_SQRT_2;
        [C::new(f, 0.0), C::new(f, 0.0), C::new(f, 0.0), C::new(-f, 0.0)]
    }

    fn cz_m1() -> M1 {
        crate::math::matrix::phase_matrix(0.0, std::f64::consts::PI)
    }

    #[test]
    fn isolated_qubits_never_allocate_an_engine() {
        let mut layer = UnitLayer::new(&EngineConfig::new(3));
        layer.apply_single_qubit(&hadamard(), 0).unwrap();
        layer.apply_single_qubit(&hadamard(), 1).unwrap();
        assert!(layer.engines.is_empty());
    }

    #[test]
    fn double_cz_returns_to_isolated_shards() {
        let mut layer = UnitLayer::new(&EngineConfig::new(2));
        layer.apply_controlled(&cz_m1(), &[0], &[], 1).unwrap();
        layer.apply_controlled(&cz_m1(), &[0], &[], 1).unwrap();
        assert!(layer.shards[0].is_local());
        assert!(layer.shards[1].is_local());
        assert!(layer.engines.iter().all(Option::is_none) || layer.engines.is_empty());
    }

    #[test]
    fn single_cz_entangles_both_shards() {
        let mut layer = UnitLayer::new(&EngineConfig::new(2));
        layer.apply_single_qubit(&hadamard(), 0).unwrap();
        layer.apply_controlled(&cz_m1(), &[0], &[], 1).unwrap();
        assert!(!layer.shards[0].is_local());
        assert!(!layer.shards[1].is_local());
    }

    #[test]
    fn bell_pair_matches_state_vector_engine() {
        let mut layer = UnitLayer::new(&EngineConfig::new(2));
        let xgate: M1 = [crate::math::C_ZERO, crate::math::C_ONE, crate::math::C_ONE, crate::math::C_ZERO];
        layer.apply_single_qubit(&hadamard(), 0).unwrap();
        layer.apply_controlled(&xgate, &[0], &[], 1).unwrap();
        let v = layer.get_quantum_state();
        let f = std::f64::consts::FRAC_1_SQRT_2;
        assert!((v[0b00].norm_sqr() - f * f).abs() < 1e-9);
        assert!(v[0b01].norm_sqr() < 1e-9);
        assert!(v[0b10].norm_sqr() < 1e-9);
        assert!((v[0b11].norm_sqr() - f * f).abs() < 1e-9);
    }

    #[test]
    fn measuring_one_half_of_a_product_state_separates_it_back_out() {
        let mut layer = UnitLayer::new(&EngineConfig::new(2));
        layer.apply_single_qubit(&hadamard(), 0).unwrap();
        let outcome = layer.measure(0).unwrap();
        assert_eq!(layer.prob(0), if outcome { 1.0 } else { 0.0 });
        assert!(layer.shards[0].is_local());
    }

    #[test]
    fn h_then_h_on_an_isolated_qubit_is_identity() {
        let mut layer = UnitLayer::new(&EngineConfig::new(1));
        layer.apply_single_qubit(&hadamard(), 0).unwrap();
        layer.apply_single_qubit(&hadamard(), 0).unwrap();
        assert!((layer.prob(0) - 0.0).abs() < 1e-9);
        assert!(layer.shards[0].is_local());
    }

    #[test]
    fn set_permutation_clears_entanglement() {
        let mut layer = UnitLayer::new(&EngineConfig::new(2));
        layer.apply_single_qubit(&hadamard(), 0).unwrap();
        let xgate: M1 = [crate::math::C_ZERO, crate::math::C_ONE, crate::math::C_ONE, crate::math::C_ZERO];
        layer.apply_controlled(&xgate, &[0], &[], 1).unwrap();
        layer.set_permutation(0b01).unwrap();
        assert!(layer.shards[0].is_local());
        assert!(layer.shards[1].is_local());
        assert_eq!(layer.prob(0), 1.0);
        assert_eq!(layer.prob(1), 0.0);
    }
}
