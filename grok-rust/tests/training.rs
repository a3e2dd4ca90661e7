//! End-to-end training behaviour.

use grok_rust::{accuracy, generate_all_pairs, AdamW, AdamWConfig, DetectConfig, Dims, GrokConfig, ParamStore, Trainer};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[test]
fn modulus_two_is_learned_quickly() {
    let dims = Dims { modulus: 2, embed_size: 8, hidden_size: 16 };
    let mut store = ParamStore::new(dims, &mut ChaCha8Rng::seed_from_u64(0));
    let opt = AdamW::new(AdamWConfig { lr: 0.02, weight_decay: 0.01, ..AdamWConfig::default() });
    let data = generate_all_pairs(2, false);

    let mut acc = accuracy(store.params(), &data);
    for epoch in 1..=2000 {
        store.zero_grads();
        for ex in &data {
            store.accumulate(ex.a, ex.b, ex.target());
        }
        opt.step(&mut store, data.len());
        if epoch % 50 == 0 {
            acc = accuracy(store.params(), &data);
            if acc >= 0.95 { break; }
        }
    }
    assert!(acc >= 0.95, "accuracy {acc}");
    assert!((0.0..=1.0).contains(&acc));
}

#[test]
fn loss_falls_under_full_batch_training() {
    let config = GrokConfig {
        modulus: 7,
        embed_size: 16,
        hidden_size: 16,
        train_fraction: 0.5,
        weight_decay: 0.1,
        seed: Some(5),
        ..GrokConfig::default()
    };
    let mut t = Trainer::new(config).unwrap();
    let first = t.tick(1, None).loss;
    let later = t.tick(200, None).loss;
    assert!(later < first, "loss went from {first} to {later}");
}

fn grokking_config(seed: u64) -> GrokConfig {
    GrokConfig {
        modulus: 31,
        embed_size: 64,
        hidden_size: 64,
        learning_rate: 1e-2,
        weight_decay: 1.0,
        symmetric: false,
        train_fraction: 0.4,
        seed: Some(seed),
        detect: DetectConfig { eval_every: 1, ..DetectConfig::default() },
        ..GrokConfig::default()
    }
}

#[test]
fn mod31_memorizes_then_groks() {
    let mut t = Trainer::new(grokking_config(7)).unwrap();
    let mut memorized_at = None;
    let mut generalized_at = None;
    let mut early_test = None;

    while t.epoch() < 2000 {
        let s = t.tick(1, None);
        if memorized_at.is_none() && s.train_accuracy >= 0.99 {
            memorized_at = Some(s.epoch);
            early_test = Some(s.test_accuracy);
        }
        if generalized_at.is_none() && s.test_accuracy >= 0.9 {
            generalized_at = Some(s.epoch);
        }
        if generalized_at.is_some() && t.grokking_epoch().is_some() { break; }
    }

    let memorized_at = memorized_at.expect("training set never memorized");
    let generalized_at = generalized_at.expect("test accuracy never reached 0.9");
    assert!(memorized_at < generalized_at, "memorized @ {memorized_at}, generalized @ {generalized_at}");
    assert!(early_test.unwrap() < 0.9);
    let grokked_at = t.grokking_epoch().expect("grokking never detected");
    assert!(grokked_at > memorized_at, "detected @ {grokked_at}, memorized @ {memorized_at}");
}
