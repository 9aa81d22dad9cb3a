//! Engine construction options (spec §6) and their environment overlay.

use crate::math::{N, R};

/// Construction-time options recognized by every engine layer.
///
/// Matches the option table in spec §6 one-to-one. Not every layer
/// consults every field (e.g. `page_qubits` only matters to the pager),
/// but a single struct keeps construction uniform across layers, which
/// is what lets the unit layer allocate sub-engines without knowing in
/// advance which concrete engine kind it will need.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub qubit_count: N,
    pub initial_permutation: usize,
    pub rng_seed: Option<u64>,
    pub global_phase_is_random: bool,
    pub do_auto_normalize: bool,
    pub norm_threshold: R,
    pub host_memory: bool,
    pub device_id: i64,
    pub use_sparse: bool,
    pub separability_threshold: R,
    pub page_qubits: Option<N>,
    pub segment_qubits: Option<N>,
    pub max_paging_qubits: Option<N>,
    pub max_alloc_mb: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            qubit_count: 0,
            initial_permutation: 0,
            rng_seed: None,
            global_phase_is_random: false,
            do_auto_normalize: true,
            norm_threshold: crate::math::DEFAULT_EPSILON,
            host_memory: true,
            device_id: -1,
            use_sparse: false,
            separability_threshold: 1e-6,
            page_qubits: None,
            segment_qubits: None,
            max_paging_qubits: None,
            max_alloc_mb: None,
        }
    }
}

impl EngineConfig {
    pub fn new(qubit_count: N) -> Self {
        Self {
            qubit_count,
            ..Self::default()
        }
    }

    pub fn with_initial_permutation(mut self, state: usize) -> Self {
        self.initial_permutation = state;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn with_sparse(mut self, use_sparse: bool) -> Self {
        self.use_sparse = use_sparse;
        self
    }

    /// Overlays recognized `QSTRATUM_*` environment variables on top of
    /// `base`. Unset or unparsable variables silently fall through to
    /// `base`'s value, per spec §6 ("Environment").
    pub fn from_env(base: Self) -> Self {
        let mut cfg = base;

        if let Some(v) = env_u64("QSTRATUM_RNG_SEED") {
            cfg.rng_seed = Some(v);
        }
        if let Some(v) = env_bool("QSTRATUM_GLOBAL_PHASE_RANDOM") {
            cfg.global_phase_is_random = v;
        }
        if let Some(v) = env_bool("QSTRATUM_AUTO_NORMALIZE") {
            cfg.do_auto_normalize = v;
        }
        if let Some(v) = env_f64("QSTRATUM_NORM_THRESHOLD") {
            cfg.norm_threshold = v;
        }
        if let Some(v) = env_bool("QSTRATUM_HOST_MEMORY") {
            cfg.host_memory = v;
        }
        if let Some(v) = env_i64("QSTRATUM_DEVICE_ID") {
            cfg.device_id = v;
        }
        if let Some(v) = env_bool("QSTRATUM_USE_SPARSE") {
            cfg.use_sparse = v;
        }
        if let Some(v) = env_f64("QSTRATUM_SEPARABILITY_THRESHOLD") {
            cfg.separability_threshold = v;
        }
        if let Some(v) = env_usize("QSTRATUM_PAGE_QUBITS") {
            cfg.page_qubits = Some(v);
        }
        if let Some(v) = env_usize("QSTRATUM_SEGMENT_QUBITS") {
            cfg.segment_qubits = Some(v);
        }
        if let Some(v) = env_usize("QSTRATUM_MAX_PAGING_QUBITS") {
            cfg.max_paging_qubits = Some(v);
        }
        if let Some(v) = env_usize("QSTRATUM_MAX_ALLOC_MB") {
            cfg.max_alloc_mb = Some(v);
        }

        cfg
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    match env_str(key)?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key)?.trim().parse().ok()
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key)?.trim().parse().ok()
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key)?.trim().parse().ok()
}

fn env_f64(key: &str) -> Option<f64> {
    env_str(key)?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::new(4);
        assert_eq!(cfg.qubit_count, 4);
        assert!(cfg.do_auto_normalize);
        assert_eq!(cfg.device_id, -1);
    }

    #[test]
    fn unset_env_falls_through() {
        std::env::remove_var("QSTRATUM_RNG_SEED_TEST_UNUSED");
        let cfg = EngineConfig::from_env(EngineConfig::new(2));
        assert_eq!(cfg.qubit_count, 2);
    }
}
