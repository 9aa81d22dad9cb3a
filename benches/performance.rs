use criterion::*;

use qstratum::prelude::*;
use qstratum::math::{phase_from_rad, C_ONE, C_ZERO};

fn hadamard() -> M1 {
    let f = std::f64::consts::FRAC_1_SQRT_2;
    [C::new(f, 0.0), C::new(f, 0.0), C::new(f, 0.0), C::new(-f, 0.0)]
}

/// Textbook QFT over every qubit of `reg`, used here purely as a
/// workload shape (lots of single-qubit and controlled-phase gates)
/// rather than for its mathematical output.
fn qft(reg: &mut DenseEngine, n: usize) {
    for q in (0..n).rev() {
        reg.apply_single_qubit(&hadamard(), q).unwrap();
        for k in 1..=q {
            let angle = std::f64::consts::PI / (1u64 << k) as f64;
            let phase = [C_ONE, C_ZERO, C_ZERO, phase_from_rad(angle)];
            reg.apply_controlled(&phase, &[q - k], &[], q).unwrap();
        }
    }
}

fn perf_test(q_num: usize, t_num: usize) {
    let mut reg = DenseEngine::new(&EngineConfig::new(q_num));
    {
        let _ = qstratum::parallel::ParallelFor::new(Some(t_num));
    }
    qft(&mut reg, q_num);
    qft(&mut reg, q_num);

    let mask = 0b100;
    assert!(reg.prob_mask(mask, mask) <= 1.0);
}

fn performance(c: &mut Criterion) {
    env_logger::init();

    #[cfg(feature = "cpu")]
    let count = rayon::current_num_threads();
    #[cfg(not(feature = "cpu"))]
    let count = 1;

    for th_num in 1..=count {
        for qu_num in [14, 16, 18] {
            c.bench_function(format!("evaluate_qu{qu_num}_th{th_num}").as_str(), |b| {
                b.iter(|| perf_test(black_box(qu_num), black_box(th_num)))
            });
        }
    }
}

criterion_group!(benches, performance);
criterion_main!(benches);
