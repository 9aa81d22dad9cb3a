#![allow(dead_code)]
#![warn(clippy::cargo)]
#![allow(clippy::comparison_chain)]
#![doc = include_str!("../README.md")]

pub mod amplitude;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod math;
pub mod parallel;

#[doc(hidden)]
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::hybrid::HybridEngine;
    pub use crate::engine::pager::PagerEngine;
    pub use crate::engine::stabilizer::StabilizerEngine;
    pub use crate::engine::state_vector::{DenseEngine, SparseEngine};
    pub use crate::engine::unit::UnitLayer;
    pub use crate::engine::QuantumEngine;
    pub use crate::error::{Error, Result};
    pub use crate::math::{C, M1, N, R};
}
