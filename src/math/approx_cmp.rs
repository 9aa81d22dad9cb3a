use float_cmp::approx_eq;

use super::{C, R};

const ULPS: i64 = 4;

/// ULP-based comparison for values that should be bit-identical up to
/// rounding (matrix classification, unitarity checks).
#[inline]
pub fn approx_cmp(x: R, y: R) -> bool {
    approx_eq!(R, x, y, ulps = ULPS)
}

#[inline]
pub fn approx_real(x: &C) -> bool {
    approx_eq!(R, x.im, 0.0, ulps = ULPS)
}

#[inline]
pub fn approx_eq_c(a: &C, b: &C) -> bool {
    approx_eq!(R, a.re, b.re, ulps = ULPS) && approx_eq!(R, a.im, b.im, ulps = ULPS)
}

#[inline]
pub fn approx_eq_conj(a: &C, b: &C) -> bool {
    approx_eq!(R, a.re, b.re, ulps = ULPS) && approx_eq!(R, a.im, -b.im, ulps = ULPS)
}

/// Epsilon-based comparison for quantities whose tolerance is a runtime
/// policy (`EngineConfig::separability_threshold`, `norm_threshold`)
/// rather than a fixed number of ULPs.
#[inline]
pub fn approx_eq_eps(x: R, y: R, eps: R) -> bool {
    (x - y).abs() <= eps
}

#[inline]
pub fn is_zero_eps(x: R, eps: R) -> bool {
    x.abs() <= eps
}
