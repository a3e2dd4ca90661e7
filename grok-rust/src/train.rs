// ============================================================================
// TRAINING LOOP
// Ticks of N full-batch epochs, periodic accuracy, rolling history and the
// grokking edge trigger. Owns everything it mutates; the worker thread (or
// the foreground, in inline mode) drives it.
// ============================================================================

use std::collections::VecDeque;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adamw::AdamW;
use crate::config::{DetectConfig, GrokConfig};
use crate::data::{accuracy, generate_all_pairs, shuffle, split, Example, Split};
use crate::error::Result;
use crate::forward::forward;
use crate::params::{Dims, Matrix, ParamSet, ParamStore};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub epoch: usize,
    pub train_accuracy: f32,
    pub test_accuracy: f32,
}

/// Bounded FIFO of accuracy samples; the oldest entry falls off at `cap`.
#[derive(Clone, Debug)]
pub struct History {
    points: VecDeque<HistoryPoint>,
    cap: usize,
}

impl History {
    pub fn new(cap: usize) -> Self {
        History { points: VecDeque::with_capacity(cap), cap }
    }

    pub fn push(&mut self, point: HistoryPoint) {
        if self.points.len() == self.cap { self.points.pop_front(); }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize { self.points.len() }

    pub fn is_empty(&self) -> bool { self.points.is_empty() }

    pub fn latest(&self) -> Option<&HistoryPoint> { self.points.back() }

    /// First and last entries of the most recent `n`, once that many exist.
    pub fn window(&self, n: usize) -> Option<(&HistoryPoint, &HistoryPoint)> {
        let len = self.points.len();
        if n == 0 || len < n { return None; }
        Some((&self.points[len - n], &self.points[len - 1]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryPoint> { self.points.iter() }
}

/// Heuristic: after warmup, with train accuracy high, test accuracy rose by
/// more than `test_delta` across the last `window` history entries. Fires once.
#[derive(Clone, Debug)]
pub struct GrokDetector {
    warmup_epochs: usize,
    window: usize,
    train_threshold: f32,
    test_delta: f32,
    detected_at: Option<usize>,
}

impl GrokDetector {
    pub fn new(cfg: &DetectConfig) -> Self {
        GrokDetector {
            warmup_epochs: cfg.warmup_epochs,
            window: cfg.window,
            train_threshold: cfg.train_threshold,
            test_delta: cfg.test_delta,
            detected_at: None,
        }
    }

    /// True only on the observation that first trips the trigger.
    pub fn observe(&mut self, epoch: usize, train_accuracy: f32, history: &History) -> bool {
        if self.detected_at.is_some() || epoch <= self.warmup_epochs { return false; }
        let Some((old, new)) = history.window(self.window) else { return false };
        if train_accuracy > self.train_threshold && new.test_accuracy - old.test_accuracy > self.test_delta {
            self.detected_at = Some(epoch);
            return true;
        }
        false
    }

    pub fn detected_at(&self) -> Option<usize> { self.detected_at }
}

/// Level-triggered view of where training stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Memorizing,
    Memorized,
    Generalized,
}

impl Phase {
    pub fn classify(train_accuracy: f32, test_accuracy: f32, cfg: &DetectConfig) -> Self {
        if train_accuracy < cfg.memorized_threshold {
            Phase::Memorizing
        } else if test_accuracy < cfg.generalized_threshold {
            Phase::Memorized
        } else {
            Phase::Generalized
        }
    }
}

/// Per-tick report. Activations come from one forward pass on a fixed
/// sample and exist only for display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainState {
    pub epoch: usize,
    pub train_accuracy: f32,
    pub test_accuracy: f32,
    pub loss: f32,
    pub phase: Phase,
    pub grokking_detected: bool,
    pub grokking_epoch: Option<usize>,
    pub hidden_activations: Vec<f32>,
    pub output_activations: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForwardReport {
    pub a: usize,
    pub b: usize,
    pub hidden_activations: Vec<f32>,
    pub output_activations: Vec<f32>,
    pub prediction: usize,
}

/// Deep copy of the weights. Stale as soon as it is taken; never written back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub modulus: usize,
    pub embed_size: usize,
    pub hidden_size: usize,
    pub epoch: usize,
    pub embed: Matrix,
    pub hidden_projection: Matrix,
    pub output_projection: Matrix,
}

pub struct Trainer {
    config: GrokConfig,
    store: ParamStore,
    opt: AdamW,
    split: Split,
    /// Real test set while the test-on-train override is active.
    saved_test: Option<Vec<Example>>,
    rng: ChaCha8Rng,
    order: Vec<usize>,
    epoch: usize,
    last_eval: Option<usize>,
    train_accuracy: f32,
    test_accuracy: f32,
    loss: f32,
    history: History,
    detector: GrokDetector,
}

impl Trainer {
    pub fn new(config: GrokConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let dims = Dims { modulus: config.modulus, embed_size: config.embed_size, hidden_size: config.hidden_size };
        let store = ParamStore::new(dims, &mut rng);

        let split = split(generate_all_pairs(config.modulus, config.symmetric), config.train_fraction, &mut rng);
        info!(
            "init: p={} embed={} hidden={} params={} | data: {} train, {} test | lr={} wd={}",
            config.modulus, config.embed_size, config.hidden_size, store.params().total_params(),
            split.train.len(), split.test.len(), config.learning_rate, config.weight_decay,
        );

        Ok(Trainer {
            opt: AdamW::new(config.adamw()),
            history: History::new(config.detect.history_cap),
            detector: GrokDetector::new(&config.detect),
            order: Vec::with_capacity(split.train.len()),
            config,
            store,
            split,
            saved_test: None,
            rng,
            epoch: 0,
            last_eval: None,
            train_accuracy: 0.0,
            test_accuracy: 0.0,
            loss: 0.0,
        })
    }

    /// Discard everything and start over from `config`. On error the
    /// current trainer is left untouched.
    pub fn reset(&mut self, config: GrokConfig) -> Result<()> {
        *self = Trainer::new(config)?;
        Ok(())
    }

    /// One pass over the training set in shuffled order. `batch_size` of
    /// `None` (or anything not smaller than the set) is full-batch: a single
    /// AdamW step per epoch. Returns the mean cross-entropy.
    pub fn train_epoch(&mut self, batch_size: Option<usize>) -> f32 {
        let n = self.split.train.len();
        self.order.clear();
        self.order.extend(0..n);
        shuffle(&mut self.order, &mut self.rng);
        let bs = batch_size.filter(|&b| b > 0 && b < n).unwrap_or(n);

        let mut total = 0.0f32;
        for chunk in self.order.chunks(bs) {
            self.store.zero_grads();
            for &i in chunk {
                let ex = self.split.train[i];
                total += self.store.accumulate(ex.a, ex.b, ex.target());
            }
            self.opt.step(&mut self.store, chunk.len());
        }
        self.epoch += 1;
        total / n as f32
    }

    /// Run `epochs` epochs, refresh accuracy when due, record history and
    /// check for grokking.
    pub fn tick(&mut self, epochs: usize, batch_size: Option<usize>) -> TrainState {
        let start = self.epoch;
        for _ in 0..epochs {
            self.loss = self.train_epoch(batch_size);
        }
        let due = self.last_eval.map_or(true, |e| self.epoch - e >= self.config.detect.eval_every);
        if due { self.evaluate(); }
        if self.epoch / 100 > start / 100 {
            info!(
                "epoch {:5} | loss {:.4} | train {:5.1}% | test {:5.1}%",
                self.epoch, self.loss, self.train_accuracy * 100.0, self.test_accuracy * 100.0,
            );
        }
        self.record();
        self.state()
    }

    /// Recompute train/test accuracy now.
    pub fn evaluate(&mut self) {
        let limit = |set: &[Example]| self.config.detect.eval_sample.map_or(set.len(), |s| s.min(set.len()));
        let params = self.store.params();
        self.train_accuracy = accuracy(params, &self.split.train[..limit(&self.split.train)]);
        self.test_accuracy = accuracy(params, &self.split.test[..limit(&self.split.test)]);
        self.last_eval = Some(self.epoch);
        debug!("eval @ {}: train={:.3} test={:.3}", self.epoch, self.train_accuracy, self.test_accuracy);
    }

    fn record(&mut self) {
        self.history.push(HistoryPoint {
            epoch: self.epoch,
            train_accuracy: self.train_accuracy,
            test_accuracy: self.test_accuracy,
        });
        if self.detector.observe(self.epoch, self.train_accuracy, &self.history) {
            info!(
                "grokking detected at epoch {} (train {:.1}%, test {:.1}%)",
                self.epoch, self.train_accuracy * 100.0, self.test_accuracy * 100.0,
            );
        }
    }

    /// Current state with activations from the first test example (or the
    /// first training example if the test set is empty).
    pub fn state(&self) -> TrainState {
        let sample = self.split.test.first().or_else(|| self.split.train.first());
        let (hidden, output) = match sample {
            Some(ex) => {
                let cache = forward(self.store.params(), ex.a, ex.b);
                (cache.h, cache.probs)
            }
            None => (Vec::new(), Vec::new()),
        };
        TrainState {
            epoch: self.epoch,
            train_accuracy: self.train_accuracy,
            test_accuracy: self.test_accuracy,
            loss: self.loss,
            phase: self.phase(),
            grokking_detected: self.detector.detected_at().is_some(),
            grokking_epoch: self.detector.detected_at(),
            hidden_activations: hidden,
            output_activations: output,
        }
    }

    /// Evaluate one pair without training. Panics on out-of-range tokens.
    pub fn forward(&self, a: usize, b: usize) -> ForwardReport {
        let cache = forward(self.store.params(), a, b);
        ForwardReport {
            a,
            b,
            prediction: cache.prediction(),
            hidden_activations: cache.h,
            output_activations: cache.probs,
        }
    }

    pub fn weights(&self) -> WeightSnapshot {
        let ParamSet { embed, hidden, out } = self.store.snapshot();
        let dims = self.store.dims();
        WeightSnapshot {
            modulus: dims.modulus,
            embed_size: dims.embed_size,
            hidden_size: dims.hidden_size,
            epoch: self.epoch,
            embed,
            hidden_projection: hidden,
            output_projection: out,
        }
    }

    /// While enabled, "test" accuracy is measured on the training set.
    pub fn set_test_override(&mut self, enabled: bool) -> TrainState {
        if enabled {
            if self.saved_test.is_none() {
                let real = std::mem::replace(&mut self.split.test, self.split.train.clone());
                self.saved_test = Some(real);
            }
        } else if let Some(real) = self.saved_test.take() {
            self.split.test = real;
        }
        info!("test override {} ({} test examples)", if enabled { "on" } else { "off" }, self.split.test.len());
        self.evaluate();
        self.state()
    }

    pub fn phase(&self) -> Phase {
        Phase::classify(self.train_accuracy, self.test_accuracy, &self.config.detect)
    }

    pub fn epoch(&self) -> usize { self.epoch }
    pub fn config(&self) -> &GrokConfig { &self.config }
    pub fn store(&self) -> &ParamStore { &self.store }
    pub fn params(&self) -> &ParamSet { self.store.params() }
    pub fn split(&self) -> &Split { &self.split }
    pub fn history(&self) -> &History { &self.history }
    pub fn train_accuracy(&self) -> f32 { self.train_accuracy }
    pub fn test_accuracy(&self) -> f32 { self.test_accuracy }
    pub fn grokking_epoch(&self) -> Option<usize> { self.detector.detected_at() }
    pub fn test_override(&self) -> bool { self.saved_test.is_some() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GrokError;

    fn config() -> GrokConfig {
        GrokConfig {
            modulus: 5,
            embed_size: 8,
            hidden_size: 8,
            train_fraction: 0.5,
            seed: Some(42),
            ..GrokConfig::default()
        }
    }

    fn point(epoch: usize, train: f32, test: f32) -> HistoryPoint {
        HistoryPoint { epoch, train_accuracy: train, test_accuracy: test }
    }

    #[test]
    fn history_drops_oldest_at_cap() {
        let mut h = History::new(3);
        for e in 0..5 { h.push(point(e, 0.0, 0.0)); }
        assert_eq!(h.len(), 3);
        assert_eq!(h.iter().map(|p| p.epoch).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(h.window(3).map(|(a, b)| (a.epoch, b.epoch)), Some((2, 4)));
        assert!(h.window(4).is_none());
    }

    #[test]
    fn detector_fires_once_on_a_jump() {
        let cfg = DetectConfig { warmup_epochs: 10, window: 3, ..DetectConfig::default() };
        let mut det = GrokDetector::new(&cfg);
        let mut h = History::new(10);
        h.push(point(9, 1.0, 0.1));
        h.push(point(10, 1.0, 0.2));
        h.push(point(11, 1.0, 0.9));
        // Still inside warmup at epoch 10.
        assert!(!det.observe(10, 1.0, &h));
        assert!(det.observe(11, 1.0, &h));
        assert_eq!(det.detected_at(), Some(11));
        assert!(!det.observe(12, 1.0, &h));
    }

    #[test]
    fn detector_ignores_jumps_without_memorization() {
        let cfg = DetectConfig { warmup_epochs: 0, window: 2, ..DetectConfig::default() };
        let mut det = GrokDetector::new(&cfg);
        let mut h = History::new(4);
        h.push(point(1, 0.5, 0.0));
        h.push(point(2, 0.5, 0.9));
        assert!(!det.observe(2, 0.5, &h));
        // A small rise is not enough either.
        let mut h = History::new(4);
        h.push(point(1, 1.0, 0.5));
        h.push(point(2, 1.0, 0.7));
        assert!(!det.observe(2, 1.0, &h));
    }

    #[test]
    fn phases() {
        let cfg = DetectConfig::default();
        assert_eq!(Phase::classify(0.5, 0.9, &cfg), Phase::Memorizing);
        assert_eq!(Phase::classify(1.0, 0.2, &cfg), Phase::Memorized);
        assert_eq!(Phase::classify(1.0, 0.7, &cfg), Phase::Generalized);
    }

    #[test]
    fn tick_advances_epochs_and_steps() {
        let mut t = Trainer::new(config()).unwrap();
        let s = t.tick(3, None);
        assert_eq!(s.epoch, 3);
        assert_eq!(t.store().step_count(), 3);
        assert_eq!(t.history().len(), 1);
        assert_eq!(s.output_activations.len(), 5);
        assert_eq!(s.hidden_activations.len(), 8);
        assert!(s.loss.is_finite() && s.loss > 0.0);
    }

    #[test]
    fn minibatches_take_several_steps_per_epoch() {
        let mut t = Trainer::new(config()).unwrap();
        let n = t.split().train.len();
        t.train_epoch(Some(2));
        assert_eq!(t.epoch(), 1);
        assert_eq!(t.store().step_count() as usize, n.div_ceil(2));
    }

    #[test]
    fn empty_split_is_rejected() {
        let c = GrokConfig { modulus: 2, train_fraction: 0.1, ..config() };
        assert!(matches!(Trainer::new(c), Err(GrokError::EmptySplit { side: "train", .. })));
    }

    #[test]
    fn test_override_round_trips() {
        let mut t = Trainer::new(config()).unwrap();
        let real = t.split().test.clone();
        let s = t.set_test_override(true);
        assert!(t.test_override());
        assert_eq!(t.split().test, t.split().train);
        assert_eq!(s.test_accuracy, s.train_accuracy);
        t.set_test_override(false);
        assert_eq!(t.split().test, real);
    }

    #[test]
    fn reset_starts_over() {
        let mut t = Trainer::new(config()).unwrap();
        t.tick(5, None);
        t.set_test_override(true);
        t.reset(config()).unwrap();
        assert_eq!(t.epoch(), 0);
        assert_eq!(t.store().step_count(), 0);
        assert!(t.history().is_empty());
        assert!(!t.test_override());
    }

    #[test]
    fn same_seed_same_trajectory() {
        let mut a = Trainer::new(config()).unwrap();
        let mut b = Trainer::new(config()).unwrap();
        assert_eq!(a.tick(4, None), b.tick(4, None));
        assert_eq!(a.params(), b.params());
    }
}
