//! Universal invariants, round-trip laws, and boundary behaviors from
//! spec.md §8 that aren't tied to one of the seed end-to-end scenarios.

use qstratum::prelude::*;
use qstratum::math::{C_ONE, C_ZERO};

const EPS: f64 = 1e-9;

fn hadamard() -> M1 {
    let f = std::f64::consts::FRAC_1_SQRT_2;
    [C::new(f, 0.0), C::new(f, 0.0), C::new(f, 0.0), C::new(-f, 0.0)]
}

fn xgate() -> M1 {
    [C_ZERO, C_ONE, C_ONE, C_ZERO]
}

fn t_gate() -> M1 {
    let phase = qstratum::math::phase_from_rad(std::f64::consts::FRAC_PI_4);
    [C_ONE, C_ZERO, C_ZERO, phase]
}

/// `SetQuantumState(v); GetQuantumState(w)` => w == v.
#[test]
fn set_then_get_quantum_state_round_trips() {
    let n = 2;
    let mut amps = vec![C::new(0.1, 0.2), C::new(0.3, -0.1), C::new(-0.2, 0.4), C::new(0.4, 0.3)];
    let norm: f64 = amps.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    for a in amps.iter_mut() {
        *a /= norm;
    }
    let mut e = DenseEngine::new(&EngineConfig::new(n));
    e.set_quantum_state(&amps).unwrap();
    let back = e.get_quantum_state();
    for (a, b) in amps.iter().zip(back.iter()) {
        assert!((a - b).norm() < EPS);
    }
}

/// `INC(k); INC(-k)` is identity on every basis state.
#[test]
fn inc_then_negative_inc_is_identity() {
    for start in 0..8usize {
        let mut e = DenseEngine::new(&EngineConfig::new(3).with_initial_permutation(start));
        e.inc(0, 3, 5).unwrap();
        e.inc(0, 3, -5).unwrap();
        assert!((e.prob_all(start) - 1.0).abs() < EPS, "start={start}");
    }
}

/// `MULModNOut(a, N)` XORs its product into the output range, so
/// applying it twice with the same factor restores the output to its
/// prior value — the standard way an out-of-place arithmetic gate
/// uncomputes itself.
#[test]
fn mul_mod_n_out_applied_twice_is_identity() {
    let a = 7u64;
    let modulus = 15u64;
    let mut e = DenseEngine::new(&EngineConfig::new(8).with_initial_permutation(0b0000_0110));
    e.mul_mod_n_out(0, 4, 4, 4, a, modulus).unwrap();
    e.mul_mod_n_out(0, 4, 4, 4, a, modulus).unwrap();
    assert!((e.prob_all(0b0000_0110) - 1.0).abs() < EPS);
}

/// `MULModNOut(a, N); IMULModNOut(a, N)` is identity (spec.md's stated
/// round-trip law): the out-register combine is XOR-based and therefore
/// its own inverse, so `imul_mod_n_out` must restore the pre-state.
#[test]
fn mul_mod_n_out_then_imul_mod_n_out_is_identity() {
    let a = 7u64;
    let modulus = 15u64;
    let mut e = DenseEngine::new(&EngineConfig::new(8).with_initial_permutation(0b0000_0110));
    e.mul_mod_n_out(0, 4, 4, 4, a, modulus).unwrap();
    e.imul_mod_n_out(0, 4, 4, 4, a, modulus).unwrap();
    assert!((e.prob_all(0b0000_0110) - 1.0).abs() < EPS);
}

/// `Compose(A, B); Decompose(...)` recovers A and B when uncorrelated.
#[test]
fn compose_then_decompose_recovers_uncorrelated_parts() {
    let mut a = DenseEngine::new(&EngineConfig::new(1));
    a.apply_single_qubit(&hadamard(), 0).unwrap();
    let a_state = a.get_quantum_state();

    let mut b = DenseEngine::new(&EngineConfig::new(1).with_initial_permutation(1));
    let b_state = b.get_quantum_state();

    a.compose(b).unwrap();
    assert_eq!(a.qubit_count(), 2);

    let recovered_b = a.decompose(1, 1, 1e-6).unwrap();
    assert_eq!(a.qubit_count(), 1);
    let recovered_a_state = a.get_quantum_state();
    let recovered_b_state = recovered_b.get_quantum_state();

    for (x, y) in a_state.iter().zip(recovered_a_state.iter()) {
        assert!((x - y).norm() < 1e-6);
    }
    for (x, y) in b_state.iter().zip(recovered_b_state.iter()) {
        assert!((x - y).norm() < 1e-6);
    }
}

/// A gate with a zero-probability control is a no-op on any state.
#[test]
fn zero_probability_control_is_a_noop() {
    let mut e = DenseEngine::new(&EngineConfig::new(2));
    e.apply_single_qubit(&hadamard(), 1).unwrap();
    let before = e.get_quantum_state();
    // qubit 0 reads |0>, so a control on it is never satisfied.
    e.apply_controlled(&xgate(), &[0], &[], 1).unwrap();
    let after = e.get_quantum_state();
    for (x, y) in before.iter().zip(after.iter()) {
        assert!((x - y).norm() < EPS);
    }
}

/// A gate with a one-probability control reduces to the unconditional
/// gate.
#[test]
fn one_probability_control_reduces_to_unconditional() {
    let mut controlled = DenseEngine::new(&EngineConfig::new(2).with_initial_permutation(0b01));
    controlled.apply_controlled(&hadamard(), &[0], &[], 1).unwrap();

    let mut uncontrolled = DenseEngine::new(&EngineConfig::new(2).with_initial_permutation(0b01));
    uncontrolled.apply_single_qubit(&hadamard(), 1).unwrap();

    let a = controlled.get_quantum_state();
    let b = uncontrolled.get_quantum_state();
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).norm() < EPS);
    }
}

/// H applied twice to the same qubit is identity (no intervening op).
#[test]
fn h_then_h_is_identity() {
    let mut e = DenseEngine::new(&EngineConfig::new(1));
    e.apply_single_qubit(&hadamard(), 0).unwrap();
    e.apply_single_qubit(&hadamard(), 0).unwrap();
    let v = e.get_quantum_state();
    assert!((v[0] - C_ONE).norm() < EPS);
    assert!(v[1].norm_sqr() < EPS);
}

/// `UniformlyControlledSingleBit` with every matrix equal to `M`
/// reduces to an unconditional `M`.
#[test]
fn uniformly_controlled_with_equal_matrices_is_unconditional() {
    let mut uc = DenseEngine::new(&EngineConfig::new(2).with_initial_permutation(0b01));
    uc.uniformly_controlled(&[0], 1, &[t_gate(), t_gate()]).unwrap();

    let mut plain = DenseEngine::new(&EngineConfig::new(2).with_initial_permutation(0b01));
    plain.apply_single_qubit(&t_gate(), 1).unwrap();

    let a = uc.get_quantum_state();
    let b = plain.get_quantum_state();
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).norm() < EPS);
    }
}

/// A unitary gate preserves total probability exactly (within a few
/// epsilons of floating-point drift).
#[test]
fn unitary_gates_preserve_total_probability() {
    let mut e = DenseEngine::new(&EngineConfig::new(3));
    e.apply_single_qubit(&hadamard(), 0).unwrap();
    e.apply_controlled(&xgate(), &[0], &[], 1).unwrap();
    e.apply_single_qubit(&t_gate(), 2).unwrap();
    e.apply_controlled(&hadamard(), &[1], &[], 2).unwrap();
    let total: f64 = e.get_quantum_state().iter().map(|c| c.norm_sqr()).sum();
    assert!((total - 1.0).abs() < 1e-9);
}

/// Clifford circuits agree between the stabilizer engine (materialized)
/// and the dense state-vector engine.
#[test]
fn clifford_circuit_matches_across_stabilizer_and_dense_engines() {
    use qstratum::engine::stabilizer::StabilizerEngine;

    let mut stab = StabilizerEngine::new(&EngineConfig::new(3));
    let mut dense = DenseEngine::new(&EngineConfig::new(3));

    stab.apply_single_qubit(&hadamard(), 0).unwrap();
    dense.apply_single_qubit(&hadamard(), 0).unwrap();
    stab.apply_controlled(&xgate(), &[0], &[], 1).unwrap();
    dense.apply_controlled(&xgate(), &[0], &[], 1).unwrap();
    stab.apply_controlled(&xgate(), &[1], &[], 2).unwrap();
    dense.apply_controlled(&xgate(), &[1], &[], 2).unwrap();

    let v_stab = stab.get_quantum_state();
    let v_dense = dense.get_quantum_state();
    for (x, y) in v_stab.iter().zip(v_dense.iter()) {
        assert!((x - y).norm() < EPS);
    }
}
