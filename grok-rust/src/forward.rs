// ============================================================================
// FORWARD PASS
//   e_a, e_b = E[a], E[b]
//   h_a, h_b = e_a @ W_h, e_b @ W_h          (tied projection, no bias)
//   pre      = h_a + h_b ;  h = relu(pre)     (combine before the nonlinearity)
//   o        = h @ W_o
//   logits   = o @ E^T                        (tied unembedding)
//   probs    = softmax(logits)
// ============================================================================

use crate::ops::{argmax, softmax, vec_add, vec_mat, vec_mat_t, vec_relu};
use crate::params::ParamSet;

/// Every intermediate of one forward call. Produced by [`forward`], consumed
/// by [`crate::backward::backward`] for the same example, then dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct ForwardCache {
    pub a: usize,
    pub b: usize,
    pub e_a: Vec<f32>,
    pub e_b: Vec<f32>,
    pub h_a: Vec<f32>,
    pub h_b: Vec<f32>,
    pub pre: Vec<f32>,
    pub h: Vec<f32>,
    pub o: Vec<f32>,
    pub logits: Vec<f32>,
    pub probs: Vec<f32>,
}

impl ForwardCache {
    pub fn prediction(&self) -> usize { argmax(&self.probs) }
}

/// Panics if either token is outside `[0, modulus)`.
pub fn forward(params: &ParamSet, a: usize, b: usize) -> ForwardCache {
    let p = params.modulus();
    assert!(a < p && b < p, "token out of range: ({a}, {b}) with modulus {p}");
    let (d_e, d_h) = (params.hidden.rows, params.hidden.cols);

    let e_a = params.embed.row(a).to_vec();
    let e_b = params.embed.row(b).to_vec();

    let h_a = vec_mat(&e_a, &params.hidden.data, d_e, d_h);
    let h_b = vec_mat(&e_b, &params.hidden.data, d_e, d_h);

    let pre = vec_add(&h_a, &h_b);
    let h = vec_relu(&pre);

    let o = vec_mat(&h, &params.out.data, d_h, d_e);

    let logits = vec_mat_t(&o, &params.embed.data, p, d_e);
    let probs = softmax(&logits);

    ForwardCache { a, b, e_a, e_b, h_a, h_b, pre, h, o, logits, probs }
}

/// Most likely class for `(a, b)`.
pub fn predict(params: &ParamSet, a: usize, b: usize) -> usize {
    forward(params, a, b).prediction()
}
