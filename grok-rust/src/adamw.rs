// ============================================================================
// ADAMW OPTIMIZER
// Decoupled weight decay: the decay term is added to the update directly and
// never enters the moment estimates.
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::params::{Matrix, ParamStore};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdamWConfig {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub weight_decay: f32,
}

impl Default for AdamWConfig {
    /// Grokking needs far more decay than the usual 0.01.
    fn default() -> Self {
        AdamWConfig { lr: 1e-2, beta1: 0.9, beta2: 0.98, eps: 1e-8, weight_decay: 1.0 }
    }
}

pub struct AdamW {
    pub config: AdamWConfig,
}

impl AdamW {
    pub fn new(config: AdamWConfig) -> Self {
        AdamW { config }
    }

    /// `1 - beta1^t`, `1 - beta2^t`. Past `i32::MAX` steps both are 1 in f32.
    pub fn bias_corrections(&self, t: u64) -> (f32, f32) {
        let t = i32::try_from(t).unwrap_or(i32::MAX);
        (1.0 - self.config.beta1.powi(t), 1.0 - self.config.beta2.powi(t))
    }

    /// One update from the gradients accumulated over `batch_size` examples.
    /// Gradients are averaged, applied, and left zeroed for the next batch.
    pub fn step(&self, store: &mut ParamStore, batch_size: usize) {
        assert!(batch_size > 0, "AdamW step over an empty batch");
        store.t_adam += 1;
        let (bc1, bc2) = self.bias_corrections(store.t_adam);
        let scale = 1.0 / batch_size as f32;

        let ParamStore { params, grads, m, v, .. } = store;
        let groups = params.matrices_mut().into_iter()
            .zip(grads.matrices_mut())
            .zip(m.matrices_mut())
            .zip(v.matrices_mut());
        for (((w, g), m), v) in groups {
            self.update(w, g, m, v, scale, bc1, bc2);
            g.fill_zero();
        }
    }

    #[allow(clippy::too_many_arguments)]
    #[inline]
    fn update(&self, w: &mut Matrix, g: &Matrix, m: &mut Matrix, v: &mut Matrix, scale: f32, bc1: f32, bc2: f32) {
        let c = &self.config;
        debug_assert_eq!(w.len(), g.len());
        for j in 0..w.data.len() {
            let grad = g.data[j] * scale;
            m.data[j] = c.beta1 * m.data[j] + (1.0 - c.beta1) * grad;
            v.data[j] = c.beta2 * v.data[j] + (1.0 - c.beta2) * grad * grad;
            let m_hat = m.data[j] / bc1;
            let v_hat = v.data[j] / bc2;
            w.data[j] -= c.lr * (m_hat / (v_hat.sqrt() + c.eps) + c.weight_decay * w.data[j]);
        }
    }
}
