//! Scalar and small-matrix primitives shared by every engine layer.
//!
//! Real precision is a single build-time choice (`R = f64`); the spec
//! treats half/float/double as a build-time knob, but a library-only
//! crate fixes one to keep the public API monomorphic.

pub mod approx_cmp;
pub mod bits_iter;
pub mod matrix;

pub use approx_cmp::*;
pub use bits_iter::BitsIter;

/// Index / qubit-count integer type.
pub type N = usize;
/// Bitmask over qubit indices (a basis-state index, or a qubit selector).
pub type Idx = usize;

pub type R = f64;
pub type C = num_complex::Complex<R>;

/// Row-major 2x2 complex matrix: `[u00, u01, u10, u11]`.
pub type M1 = [C; 4];

pub const C_ONE: C = C { re: 1., im: 0. };
pub const C_ZERO: C = C { re: 0., im: 0. };
pub const C_IMAG: C = C { re: 0., im: 1. };

/// Default epsilon used for separability/normalization/unitarity checks
/// throughout the crate unless an `EngineConfig` overrides it.
pub const DEFAULT_EPSILON: R = 1e-10;

#[inline]
pub fn count_bits(n: N) -> N {
    n.count_ones() as N
}

#[inline]
pub fn phase_from_rad(rad: R) -> C {
    C::from_polar(1.0, rad)
}

/// `2x2` identity matrix.
pub const M1_ID: M1 = [C_ONE, C_ZERO, C_ZERO, C_ONE];

#[inline]
pub fn m1_mul(a: &M1, b: &M1) -> M1 {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
    ]
}

#[inline]
pub fn m1_dagger(a: &M1) -> M1 {
    [a[0].conj(), a[2].conj(), a[1].conj(), a[3].conj()]
}

#[inline]
pub fn m1_apply(m: &M1, a0: C, a1: C) -> (C, C) {
    (m[0] * a0 + m[1] * a1, m[2] * a0 + m[3] * a1)
}
