//! A factored MLP that learns `(a + b) mod p` from scratch and, with enough
//! weight decay, groks: test accuracy jumps long after the training set has
//! been memorized.
//!
//! Forward and backward passes are written out by hand; AdamW applies
//! decoupled weight decay; training runs on a background worker reached
//! through [`worker::WorkerHandle`].

pub mod adamw;
pub mod backward;
pub mod config;
pub mod data;
pub mod error;
pub mod forward;
pub mod ops;
pub mod params;
pub mod train;
pub mod worker;

pub use adamw::{AdamW, AdamWConfig};
pub use backward::{backward, cross_entropy};
pub use config::{DetectConfig, GrokConfig};
pub use data::{accuracy, generate_all_pairs, split, Example, Split};
pub use error::{GrokError, Result};
pub use forward::{forward, predict, ForwardCache};
pub use params::{Dims, Matrix, ParamSet, ParamStore};
pub use train::{ForwardReport, History, HistoryPoint, Phase, TrainState, Trainer, WeightSnapshot};
pub use worker::{Event, WorkerHandle};
