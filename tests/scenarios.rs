//! End-to-end scenarios from spec.md §8, driven entirely through the
//! public `QuantumEngine` surface and the concrete engine types.

use qstratum::prelude::*;
use qstratum::math::{phase_from_rad, C_ONE, C_ZERO};

const EPS: f64 = 1e-9;

fn hadamard() -> M1 {
    let f = std::f64::consts::FRAC_1_SQRT_2;
    [C::new(f, 0.0), C::new(f, 0.0), C::new(f, 0.0), C::new(-f, 0.0)]
}

fn xgate() -> M1 {
    [C_ZERO, C_ONE, C_ONE, C_ZERO]
}

fn zgate() -> M1 {
    [C_ONE, C_ZERO, C_ZERO, -C_ONE]
}

/// Scenario 1: Bell pair, both through the dense engine and through the
/// separability (unit) layer, which must agree.
#[test]
fn bell_pair_dense_engine() {
    let mut e = DenseEngine::new(&EngineConfig::new(2));
    e.apply_single_qubit(&hadamard(), 0).unwrap();
    e.apply_controlled(&xgate(), &[0], &[], 1).unwrap();

    let v = e.get_quantum_state();
    let f = std::f64::consts::FRAC_1_SQRT_2;
    assert!((v[0b00] - C::new(f, 0.0)).norm() < EPS);
    assert!(v[0b01].norm_sqr() < EPS);
    assert!(v[0b10].norm_sqr() < EPS);
    assert!((v[0b11] - C::new(f, 0.0)).norm() < EPS);

    let outcome = e.measure(0).unwrap();
    let expect_index = if outcome { 0b11 } else { 0b00 };
    let collapsed = e.get_quantum_state();
    assert!((collapsed[expect_index].norm_sqr() - 1.0).abs() < EPS);
    assert_eq!(e.prob(1), if outcome { 1.0 } else { 0.0 });
}

#[test]
fn bell_pair_unit_layer_matches_dense_engine() {
    let mut u = UnitLayer::new(&EngineConfig::new(2));
    u.apply_single_qubit(&hadamard(), 0).unwrap();
    u.apply_controlled(&xgate(), &[0], &[], 1).unwrap();

    let mut d = DenseEngine::new(&EngineConfig::new(2));
    d.apply_single_qubit(&hadamard(), 0).unwrap();
    d.apply_controlled(&xgate(), &[0], &[], 1).unwrap();

    for perm in 0..4 {
        assert!((u.prob_all(perm) - d.prob_all(perm)).abs() < EPS);
    }
}

/// Scenario 2: GHZ on 3 qubits.
#[test]
fn ghz_three_qubits() {
    let mut e = DenseEngine::new(&EngineConfig::new(3));
    e.apply_single_qubit(&hadamard(), 0).unwrap();
    e.apply_controlled(&xgate(), &[0], &[], 1).unwrap();
    e.apply_controlled(&xgate(), &[1], &[], 2).unwrap();

    let v = e.get_quantum_state();
    let f = std::f64::consts::FRAC_1_SQRT_2;
    assert!((v[0b000] - C::new(f, 0.0)).norm() < EPS);
    assert!((v[0b111] - C::new(f, 0.0)).norm() < EPS);
    let middle: f64 = v[1..7].iter().map(|c| c.norm_sqr()).sum();
    assert!(middle < EPS);
}

/// Scenario 3: Grover step on 2 qubits, marked = 3 (both bits set).
#[test]
fn grover_step_amplifies_marked_state() {
    let mut e = DenseEngine::new(&EngineConfig::new(2));
    e.apply_single_qubit(&hadamard(), 0).unwrap();
    e.apply_single_qubit(&hadamard(), 1).unwrap();

    // Oracle: flip the phase of |11>.
    e.apply_controlled(&zgate(), &[0], &[], 1).unwrap();

    // Diffusion: H, X on each; CZ(0,1); X, H on each.
    e.apply_single_qubit(&hadamard(), 0).unwrap();
    e.apply_single_qubit(&hadamard(), 1).unwrap();
    e.apply_single_qubit(&xgate(), 0).unwrap();
    e.apply_single_qubit(&xgate(), 1).unwrap();
    e.apply_controlled(&zgate(), &[0], &[], 1).unwrap();
    e.apply_single_qubit(&xgate(), 0).unwrap();
    e.apply_single_qubit(&xgate(), 1).unwrap();
    e.apply_single_qubit(&hadamard(), 0).unwrap();
    e.apply_single_qubit(&hadamard(), 1).unwrap();

    assert!((e.prob_all(0b11) - 1.0).abs() < EPS);
}

fn qft_forward(e: &mut DenseEngine, n: usize) {
    for q in (0..n).rev() {
        e.apply_single_qubit(&hadamard(), q).unwrap();
        for k in 1..=q {
            let angle = std::f64::consts::PI / (1u64 << k) as f64;
            let phase = [C_ONE, C_ZERO, C_ZERO, phase_from_rad(angle)];
            e.apply_controlled(&phase, &[q - k], &[], q).unwrap();
        }
    }
}

fn qft_inverse(e: &mut DenseEngine, n: usize) {
    for q in 0..n {
        for k in (1..=q).rev() {
            let angle = -std::f64::consts::PI / (1u64 << k) as f64;
            let phase = [C_ONE, C_ZERO, C_ZERO, phase_from_rad(angle)];
            e.apply_controlled(&phase, &[q - k], &[], q).unwrap();
        }
        e.apply_single_qubit(&hadamard(), q).unwrap();
    }
}

/// Scenario 4: QFT then inverse QFT round-trips an arbitrary state.
#[test]
fn qft_round_trip() {
    let n = 3;
    let mut amps = vec![C_ZERO; 1 << n];
    amps[0] = C::new(0.2, 0.1);
    amps[1] = C::new(-0.3, 0.4);
    amps[2] = C::new(0.1, -0.2);
    amps[5] = C::new(0.5, 0.0);
    amps[7] = C::new(0.0, 0.6);
    let norm: f64 = amps.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    for a in amps.iter_mut() {
        *a /= norm;
    }

    let mut e = DenseEngine::new(&EngineConfig::new(n));
    e.set_quantum_state(&amps).unwrap();

    qft_forward(&mut e, n);
    qft_inverse(&mut e, n);

    let result = e.get_quantum_state();
    for (a, b) in amps.iter().zip(result.iter()) {
        assert!((a - b).norm() < 10.0 * EPS);
    }
}

fn mod_pow(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let mut result = 1u64 % modulus;
    base %= modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * base % modulus;
        }
        exp >>= 1;
        base = base * base % modulus;
    }
    result
}

/// Scenario 5: modular exponentiation, a = 2, N = 15, over a fully
/// superposed 4-qubit input register with a cleared 4-qubit output.
#[test]
fn modular_exponentiation_pow_mod_n_out() {
    let mut e = DenseEngine::new(&EngineConfig::new(8));
    for q in 0..4 {
        e.apply_single_qubit(&hadamard(), q).unwrap();
    }
    e.pow_mod_n_out(0, 4, 4, 4, 2, 15).unwrap();

    let v = e.get_quantum_state();
    for x in 0..16u64 {
        let expected_out = mod_pow(2, x, 15);
        for out in 0..16u64 {
            let idx = (x as usize) | ((out as usize) << 4);
            if out == expected_out {
                assert!((v[idx].norm_sqr() - 1.0 / 16.0).abs() < EPS, "x={x} out={out}");
            } else {
                assert!(v[idx].norm_sqr() < EPS, "x={x} out={out} should be empty");
            }
        }
    }
}

/// Scenario 6: two unentangling CZ gates return both qubits to
/// separable (product-state) form.
#[test]
fn double_cz_recovers_separability() {
    let mut u = UnitLayer::new(&EngineConfig::new(2));
    u.apply_single_qubit(&hadamard(), 0).unwrap();
    u.apply_single_qubit(&hadamard(), 1).unwrap();
    u.apply_controlled(&zgate(), &[0], &[], 1).unwrap();
    u.apply_controlled(&zgate(), &[0], &[], 1).unwrap();

    let v = u.get_quantum_state();
    let f = 0.5;
    for amp in v.iter() {
        assert!((amp.norm_sqr() - f).abs() < EPS);
    }
    assert!((u.prob(0) - 0.5).abs() < EPS);
    assert!((u.prob(1) - 0.5).abs() < EPS);
}
