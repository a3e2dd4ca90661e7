// ============================================================================
// BACKWARD PASS
// Hand-derived gradients of softmax cross-entropy through the factored MLP.
// Everything is *added* into `grads`; zeroing is the caller's job at batch start.
// ============================================================================

use crate::forward::ForwardCache;
use crate::ops::{outer_acc, vec_add_inplace, vec_mat, vec_mat_t};
use crate::params::ParamSet;

/// `-ln probs[target]`, floored so a saturated wrong answer stays finite.
#[inline]
pub fn cross_entropy(probs: &[f32], target: usize) -> f32 {
    -probs[target].max(1e-30).ln()
}

pub fn backward(params: &ParamSet, grads: &mut ParamSet, target: usize, cache: &ForwardCache) {
    let p = params.modulus();
    let (d_e, d_h) = (params.hidden.rows, params.hidden.cols);
    debug_assert!(target < p);

    // Softmax + cross-entropy in closed form.
    let mut d_logits = cache.probs.clone();
    d_logits[target] -= 1.0;

    // logits[j] = o . E[j]  =>  dE[j] += dLogits[j] * o,  dO = dLogits @ E
    outer_acc(&mut grads.embed.data, &d_logits, &cache.o);
    let d_out = vec_mat(&d_logits, &params.embed.data, p, d_e);

    // o = h @ W_o
    outer_acc(&mut grads.out.data, &cache.h, &d_out);
    let d_hidden = vec_mat_t(&d_out, &params.out.data, d_h, d_e);

    // relu
    let d_pre: Vec<f32> = d_hidden.iter().zip(cache.pre.iter())
        .map(|(&g, &x)| if x > 0.0 { g } else { 0.0 })
        .collect();

    // W_h is shared by both operands: both paths contribute, and both
    // embedded inputs receive the same upstream gradient.
    outer_acc(&mut grads.hidden.data, &cache.e_a, &d_pre);
    outer_acc(&mut grads.hidden.data, &cache.e_b, &d_pre);
    let d_embedded = vec_mat_t(&d_pre, &params.hidden.data, d_e, d_h);

    vec_add_inplace(grads.embed.row_mut(cache.a), &d_embedded);
    vec_add_inplace(grads.embed.row_mut(cache.b), &d_embedded);
}
