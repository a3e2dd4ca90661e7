// ============================================================================
// PARAMETER STORE
// Three weight matrices, their gradient accumulators and AdamW moments.
// The embedding is tied: one owned matrix serves embed-a, embed-b and unembed.
// ============================================================================

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Dense row-major matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Matrix { rows, cols, data: vec![0.0; rows * cols] }
    }

    /// Entries i.i.d. uniform in `[-scale, scale]`.
    pub fn uniform(rows: usize, cols: usize, scale: f32, rng: &mut impl Rng) -> Self {
        let data = (0..rows * cols).map(|_| rng.gen_range(-scale..=scale)).collect();
        Matrix { rows, cols, data }
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f32] { &self.data[r * self.cols..(r + 1) * self.cols] }

    #[inline]
    pub fn row_mut(&mut self, r: usize) -> &mut [f32] { &mut self.data[r * self.cols..(r + 1) * self.cols] }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f32 { self.data[r * self.cols + c] }

    pub fn len(&self) -> usize { self.data.len() }

    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub fn fill_zero(&mut self) {
        for x in self.data.iter_mut() { *x = 0.0; }
    }
}

/// Network shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dims {
    pub modulus: usize,
    pub embed_size: usize,
    pub hidden_size: usize,
}

/// One matrix per weight: `embed (p, d_e)`, `hidden (d_e, d_h)`, `out (d_h, d_e)`.
/// Also the shape of every gradient and moment buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    pub embed: Matrix,
    pub hidden: Matrix,
    pub out: Matrix,
}

impl ParamSet {
    pub fn zeros(dims: Dims) -> Self {
        ParamSet {
            embed: Matrix::zeros(dims.modulus, dims.embed_size),
            hidden: Matrix::zeros(dims.embed_size, dims.hidden_size),
            out: Matrix::zeros(dims.hidden_size, dims.embed_size),
        }
    }

    /// Variance scaling: `U[-s, s]` with `s = sqrt(2 / fan_in)` per matrix.
    pub fn init(dims: Dims, rng: &mut impl Rng) -> Self {
        let scale = |fan_in: usize| (2.0 / fan_in as f32).sqrt();
        ParamSet {
            embed: Matrix::uniform(dims.modulus, dims.embed_size, scale(dims.modulus), rng),
            hidden: Matrix::uniform(dims.embed_size, dims.hidden_size, scale(dims.embed_size), rng),
            out: Matrix::uniform(dims.hidden_size, dims.embed_size, scale(dims.hidden_size), rng),
        }
    }

    pub fn dims(&self) -> Dims {
        Dims { modulus: self.embed.rows, embed_size: self.embed.cols, hidden_size: self.hidden.cols }
    }

    pub fn modulus(&self) -> usize { self.embed.rows }

    pub fn matrices(&self) -> [&Matrix; 3] { [&self.embed, &self.hidden, &self.out] }

    pub fn matrices_mut(&mut self) -> [&mut Matrix; 3] { [&mut self.embed, &mut self.hidden, &mut self.out] }

    pub fn fill_zero(&mut self) {
        for m in self.matrices_mut() { m.fill_zero(); }
    }

    pub fn total_params(&self) -> usize { self.matrices().iter().map(|m| m.len()).sum() }
}

/// Sole owner of the weights. Only [`crate::adamw::AdamW`] and
/// [`ParamStore::restart`] write them; everything else gets `&ParamSet`.
#[derive(Clone, Debug)]
pub struct ParamStore {
    pub(crate) params: ParamSet,
    pub(crate) grads: ParamSet,
    pub(crate) m: ParamSet,
    pub(crate) v: ParamSet,
    pub(crate) t_adam: u64,
}

impl ParamStore {
    pub fn new(dims: Dims, rng: &mut impl Rng) -> Self {
        ParamStore {
            params: ParamSet::init(dims, rng),
            grads: ParamSet::zeros(dims),
            m: ParamSet::zeros(dims),
            v: ParamSet::zeros(dims),
            t_adam: 0,
        }
    }

    /// Fresh weights; gradients, both moments and the step counter back to zero.
    pub fn restart(&mut self, rng: &mut impl Rng) {
        let dims = self.params.dims();
        self.params = ParamSet::init(dims, rng);
        self.grads.fill_zero();
        self.m.fill_zero();
        self.v.fill_zero();
        self.t_adam = 0;
    }

    pub fn params(&self) -> &ParamSet { &self.params }

    pub fn grads(&self) -> &ParamSet { &self.grads }

    pub fn first_moment(&self) -> &ParamSet { &self.m }

    pub fn second_moment(&self) -> &ParamSet { &self.v }

    pub fn step_count(&self) -> u64 { self.t_adam }

    pub fn dims(&self) -> Dims { self.params.dims() }

    /// Deep copy of the weights for hand-off to another thread.
    pub fn snapshot(&self) -> ParamSet { self.params.clone() }

    pub fn zero_grads(&mut self) { self.grads.fill_zero(); }

    /// Forward + backward for one example, summed into the accumulators.
    /// Returns the example's cross-entropy.
    pub fn accumulate(&mut self, a: usize, b: usize, target: usize) -> f32 {
        let cache = crate::forward::forward(&self.params, a, b);
        crate::backward::backward(&self.params, &mut self.grads, target, &cache);
        crate::backward::cross_entropy(&cache.probs, target)
    }
}
