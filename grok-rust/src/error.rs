//! Error types for configuration and the worker bridge.
//!
//! Token indices outside `[0, modulus)` are not represented here: they are
//! caller bugs and trip an assertion in the forward pass instead.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GrokError {
    #[error("modulus must be at least 2, got {0}")]
    InvalidModulus(usize),

    #[error("{name} must be positive")]
    InvalidDimension { name: &'static str },

    #[error("train_fraction must lie strictly between 0 and 1, got {0}")]
    InvalidTrainFraction(f32),

    #[error("invalid {name}: {value}")]
    InvalidHyperparameter { name: &'static str, value: f32 },

    #[error("splitting {total} examples at fraction {fraction} leaves an empty {side} set")]
    EmptySplit { total: usize, fraction: f32, side: &'static str },

    #[error("training worker is no longer running")]
    WorkerGone,

    #[error("config file: {0}")]
    ConfigFile(String),
}

pub type Result<T> = std::result::Result<T, GrokError>;
