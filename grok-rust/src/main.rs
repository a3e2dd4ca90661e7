// ============================================================================
// GROKKING MODULAR ADDITION - headless driver
// Trains on the background worker (or inline with --inline) and prints one
// line per accuracy update.
// ============================================================================

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};

use grok_rust::{Event, GrokConfig, GrokError, TrainState, Trainer, WeightSnapshot, WorkerHandle};

/// Frame period of the foreground loop.
const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser, Debug, Clone)]
#[command(name = "grok-rust", about = "Watch a factored MLP grok (a + b) mod p")]
struct Cli {
    /// JSON config file; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    modulus: Option<usize>,

    #[arg(long)]
    embed_size: Option<usize>,

    #[arg(long)]
    hidden_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f32>,

    #[arg(long)]
    weight_decay: Option<f32>,

    #[arg(long)]
    beta1: Option<f32>,

    #[arg(long)]
    beta2: Option<f32>,

    /// Keep only a <= b pairs
    #[arg(long)]
    symmetric: Option<bool>,

    #[arg(long)]
    train_fraction: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,

    /// Total epochs to train
    #[arg(long, default_value_t = 5000)]
    epochs: usize,

    #[arg(long, default_value_t = 16)]
    epochs_per_tick: usize,

    /// Examples per AdamW step; omit for full batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Stop as soon as grokking is detected
    #[arg(long)]
    stop_on_grok: bool,

    /// Train on this thread instead of the worker
    #[arg(long)]
    inline: bool,

    /// Emit every state as a JSON line on stdout
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn grok_config(&self) -> Result<GrokConfig, GrokError> {
        let mut c = match &self.config {
            Some(path) => GrokConfig::from_json_file(path)?,
            None => GrokConfig::default(),
        };
        if let Some(v) = self.modulus { c.modulus = v; }
        if let Some(v) = self.embed_size { c.embed_size = v; }
        if let Some(v) = self.hidden_size { c.hidden_size = v; }
        if let Some(v) = self.learning_rate { c.learning_rate = v; }
        if let Some(v) = self.weight_decay { c.weight_decay = v; }
        if let Some(v) = self.beta1 { c.beta1 = v; }
        if let Some(v) = self.beta2 { c.beta2 = v; }
        if let Some(v) = self.symmetric { c.symmetric = v; }
        if let Some(v) = self.train_fraction { c.train_fraction = v; }
        if self.seed.is_some() { c.seed = self.seed; }
        c.validate()?;
        Ok(c)
    }
}

fn report(state: &TrainState, json: bool, t0: Instant) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(state)?);
    } else {
        println!(
            "Epoch {:5} | Loss: {:.5} | Train: {:5.1}% | Test: {:5.1}% | {:?}{} | {:.1}s",
            state.epoch, state.loss, state.train_accuracy * 100.0, state.test_accuracy * 100.0, state.phase,
            state.grokking_epoch.map(|e| format!(" (grokked @ {e})")).unwrap_or_default(),
            t0.elapsed().as_secs_f64(),
        );
    }
    Ok(())
}

fn summarize(w: &WeightSnapshot) {
    let rms = |data: &[f32]| (data.iter().map(|x| x * x).sum::<f32>() / data.len().max(1) as f32).sqrt();
    info!(
        "weights @ epoch {}: embed {}x{} rms {:.4} | hidden {}x{} rms {:.4} | out {}x{} rms {:.4}",
        w.epoch,
        w.embed.rows, w.embed.cols, rms(&w.embed.data),
        w.hidden_projection.rows, w.hidden_projection.cols, rms(&w.hidden_projection.data),
        w.output_projection.rows, w.output_projection.cols, rms(&w.output_projection.data),
    );
}

fn run_inline(cli: &Cli, config: GrokConfig) -> Result<(), Box<dyn std::error::Error>> {
    let t0 = Instant::now();
    let mut trainer = Trainer::new(config)?;
    while trainer.epoch() < cli.epochs {
        let n = cli.epochs_per_tick.min(cli.epochs - trainer.epoch());
        let state = trainer.tick(n, cli.batch_size);
        report(&state, cli.json, t0)?;
        if cli.stop_on_grok && state.grokking_detected { break; }
    }
    summarize(&trainer.weights());
    Ok(())
}

/// Frame loop: ask for a tick whenever the worker is idle, apply whatever
/// arrived, never wait on the worker mid-frame.
fn run_worker(cli: &Cli, config: GrokConfig) -> Result<(), Box<dyn std::error::Error>> {
    let t0 = Instant::now();
    let mut handle = WorkerHandle::spawn(config)?;
    let mut epoch = 0usize;
    let mut done = cli.epochs == 0;

    while !done {
        if handle.is_ready() && epoch < cli.epochs {
            let n = cli.epochs_per_tick.min(cli.epochs - epoch);
            handle.train(n, cli.batch_size)?;
        }
        for event in handle.poll()? {
            match event {
                Event::Ready(state) => info!("worker ready: {} classes", state.output_activations.len()),
                Event::State(state) => {
                    epoch = state.epoch;
                    report(&state, cli.json, t0)?;
                    if epoch >= cli.epochs || (cli.stop_on_grok && state.grokking_detected) {
                        done = true;
                    }
                }
                Event::Failed(message) => return Err(message.into()),
                Event::Forward(_) | Event::Weights(_) => {}
            }
        }
        thread::sleep(FRAME);
    }

    handle.sync_weights()?;
    loop {
        match handle.wait(Duration::from_secs(60))? {
            Some(Event::Weights(w)) => { summarize(&w); break; }
            Some(_) => continue,
            None => { warn!("no weight snapshot from worker"); break; }
        }
    }
    handle.shutdown()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("grok_rust=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.epochs_per_tick == 0 {
        return Err(GrokError::InvalidDimension { name: "epochs_per_tick" }.into());
    }
    let config = cli.grok_config()?;
    info!(
        "p={} embed={} hidden={} lr={} wd={} betas=({}, {}) symmetric={} train_fraction={} | {} epochs, {} per tick, {}",
        config.modulus, config.embed_size, config.hidden_size, config.learning_rate, config.weight_decay,
        config.beta1, config.beta2, config.symmetric, config.train_fraction, cli.epochs, cli.epochs_per_tick,
        if cli.inline { "inline" } else { "worker" },
    );

    if cli.inline { run_inline(&cli, config) } else { run_worker(&cli, config) }
}
