// ============================================================================
// CONFIGURATION
// ============================================================================

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::adamw::AdamWConfig;
use crate::data::{pair_count, train_count};
use crate::error::{GrokError, Result};

/// Network, optimizer and dataset settings. This is the payload of the
/// `init` and `reset` messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrokConfig {
    pub modulus: usize,
    pub embed_size: usize,
    pub hidden_size: usize,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub beta1: f32,
    pub beta2: f32,
    /// Keep only `a <= b` pairs.
    pub symmetric: bool,
    pub train_fraction: f32,
    /// `None` seeds from OS entropy.
    pub seed: Option<u64>,
    pub detect: DetectConfig,
}

impl Default for GrokConfig {
    fn default() -> Self {
        GrokConfig {
            modulus: 67,
            embed_size: 500,
            hidden_size: 64,
            learning_rate: 1e-2,
            weight_decay: 1.0,
            beta1: 0.9,
            beta2: 0.98,
            symmetric: true,
            train_fraction: 0.4,
            seed: None,
            detect: DetectConfig::default(),
        }
    }
}

/// Evaluation cadence and the empirically tuned grokking heuristics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// Detection is disarmed until the epoch counter passes this.
    pub warmup_epochs: usize,
    /// History entries between the compared test accuracies.
    pub window: usize,
    pub train_threshold: f32,
    pub test_delta: f32,
    pub history_cap: usize,
    pub eval_every: usize,
    /// Evaluate only the first N examples of each split.
    pub eval_sample: Option<usize>,
    pub memorized_threshold: f32,
    pub generalized_threshold: f32,
}

impl Default for DetectConfig {
    fn default() -> Self {
        DetectConfig {
            warmup_epochs: 100,
            window: 50,
            train_threshold: 0.8,
            test_delta: 0.3,
            history_cap: 500,
            eval_every: 20,
            eval_sample: None,
            memorized_threshold: 0.95,
            generalized_threshold: 0.6,
        }
    }
}

impl GrokConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| GrokError::ConfigFile(format!("{}: {}", path.display(), e)))?;
        let config: GrokConfig = serde_json::from_str(&text)
            .map_err(|e| GrokError::ConfigFile(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn adamw(&self) -> AdamWConfig {
        AdamWConfig {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: 1e-8,
            weight_decay: self.weight_decay,
        }
    }

    /// Rejects anything the trainer cannot run with. Values are never clamped.
    pub fn validate(&self) -> Result<()> {
        if self.modulus < 2 {
            return Err(GrokError::InvalidModulus(self.modulus));
        }
        if self.embed_size == 0 {
            return Err(GrokError::InvalidDimension { name: "embed_size" });
        }
        if self.hidden_size == 0 {
            return Err(GrokError::InvalidDimension { name: "hidden_size" });
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(GrokError::InvalidTrainFraction(self.train_fraction));
        }
        // A fraction below 1 always leaves at least one test example.
        let total = pair_count(self.modulus, self.symmetric);
        if train_count(total, self.train_fraction) == 0 {
            return Err(GrokError::EmptySplit { total, fraction: self.train_fraction, side: "train" });
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(GrokError::InvalidHyperparameter { name: "learning_rate", value: self.learning_rate });
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(GrokError::InvalidHyperparameter { name: "weight_decay", value: self.weight_decay });
        }
        for (name, value) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&value) {
                return Err(GrokError::InvalidHyperparameter { name, value });
            }
        }
        if self.detect.window == 0 {
            return Err(GrokError::InvalidDimension { name: "detect.window" });
        }
        if self.detect.history_cap < self.detect.window {
            return Err(GrokError::InvalidHyperparameter {
                name: "detect.history_cap",
                value: self.detect.history_cap as f32,
            });
        }
        if self.detect.eval_sample == Some(0) {
            return Err(GrokError::InvalidDimension { name: "detect.eval_sample" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> GrokConfig {
        GrokConfig { modulus: 5, embed_size: 4, hidden_size: 4, ..GrokConfig::default() }
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(GrokConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_degenerate_modulus() {
        for m in [0, 1] {
            let c = GrokConfig { modulus: m, ..tiny() };
            assert_eq!(c.validate(), Err(GrokError::InvalidModulus(m)));
        }
    }

    #[test]
    fn rejects_zero_dimensions() {
        let c = GrokConfig { embed_size: 0, ..tiny() };
        assert_eq!(c.validate(), Err(GrokError::InvalidDimension { name: "embed_size" }));
        let c = GrokConfig { hidden_size: 0, ..tiny() };
        assert_eq!(c.validate(), Err(GrokError::InvalidDimension { name: "hidden_size" }));
    }

    #[test]
    fn rejects_train_fraction_on_the_boundary() {
        for f in [0.0, 1.0, -0.5, 1.5, f32::NAN] {
            let c = GrokConfig { train_fraction: f, ..tiny() };
            assert!(matches!(c.validate(), Err(GrokError::InvalidTrainFraction(_))), "{f}");
        }
    }

    #[test]
    fn rejects_fractions_that_leave_no_training_data() {
        // Symmetric p = 2 has 3 pairs; 0.1 of them rounds down to none.
        let c = GrokConfig { modulus: 2, train_fraction: 0.1, ..tiny() };
        assert_eq!(c.validate(), Err(GrokError::EmptySplit { total: 3, fraction: 0.1, side: "train" }));
        let c = GrokConfig { modulus: 2, train_fraction: 0.99, ..tiny() };
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_betas() {
        let c = GrokConfig { beta2: 1.0, ..tiny() };
        assert!(matches!(c.validate(), Err(GrokError::InvalidHyperparameter { name: "beta2", .. })));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: GrokConfig = serde_json::from_str(r#"{"modulus": 7, "detect": {"window": 10}}"#).unwrap();
        assert_eq!(c.modulus, 7);
        assert_eq!(c.embed_size, 500);
        assert_eq!(c.detect.window, 10);
        assert_eq!(c.detect.history_cap, 500);
    }
}
