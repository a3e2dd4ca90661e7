// ============================================================================
// DATASET: all (a, b) pairs for modular addition
// ============================================================================

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::forward::predict;
use crate::params::ParamSet;

/// One `(a, b)` pair. The target is derived, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Example {
    pub a: usize,
    pub b: usize,
    modulus: usize,
}

impl Example {
    pub fn new(a: usize, b: usize, modulus: usize) -> Self {
        debug_assert!(a < modulus && b < modulus);
        Example { a, b, modulus }
    }

    #[inline]
    pub fn target(&self) -> usize { (self.a + self.b) % self.modulus }
}

#[derive(Clone, Debug, Default)]
pub struct Split {
    pub train: Vec<Example>,
    pub test: Vec<Example>,
}

/// Every pair in `[0, p)^2`; with `symmetric`, only `a <= b`.
pub fn generate_all_pairs(modulus: usize, symmetric: bool) -> Vec<Example> {
    let mut out = Vec::with_capacity(modulus * modulus);
    for a in 0..modulus {
        for b in 0..modulus {
            if symmetric && a > b { continue; }
            out.push(Example::new(a, b, modulus));
        }
    }
    out
}

/// Number of examples [`generate_all_pairs`] yields.
pub fn pair_count(modulus: usize, symmetric: bool) -> usize {
    if symmetric { modulus * (modulus + 1) / 2 } else { modulus * modulus }
}

/// Fisher-Yates.
pub fn shuffle<T>(items: &mut [T], rng: &mut impl Rng) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Size of the training side when `total` examples are cut at `train_fraction`.
pub fn train_count(total: usize, train_fraction: f32) -> usize {
    ((total as f64 * train_fraction as f64).floor() as usize).min(total)
}

/// Shuffle, then cut at `floor(len * train_fraction)`.
pub fn split(mut dataset: Vec<Example>, train_fraction: f32, rng: &mut impl Rng) -> Split {
    shuffle(&mut dataset, rng);
    let cut = train_count(dataset.len(), train_fraction);
    let test = dataset.split_off(cut);
    Split { train: dataset, test }
}

/// Fraction of `dataset` whose argmax prediction equals the target.
/// An empty dataset scores 0.
pub fn accuracy(params: &ParamSet, dataset: &[Example]) -> f32 {
    if dataset.is_empty() { return 0.0; }
    let correct = dataset.par_iter()
        .filter(|ex| predict(params, ex.a, ex.b) == ex.target())
        .count();
    correct as f32 / dataset.len() as f32
}
