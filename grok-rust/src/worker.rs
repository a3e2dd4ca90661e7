// ============================================================================
// WORKER BRIDGE
// One background thread owns the Trainer (and with it every weight, gradient
// and moment buffer). The foreground talks to it only through two channels:
// requests go in, generation-tagged responses come back. Nothing mutable is
// shared; snapshots are deep copies moved across the channel.
// ============================================================================

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GrokConfig;
use crate::error::{GrokError, Result};
use crate::train::{ForwardReport, TrainState, Trainer, WeightSnapshot};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    /// Used for both `init` and `reset`: drop all worker state and rebuild.
    Init { generation: u64, config: GrokConfig },
    Train { epochs: usize, batch_size: Option<usize> },
    Forward { a: usize, b: usize },
    SyncWeights,
    TestOverride { enabled: bool },
    Shutdown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    Ready { generation: u64, state: TrainState },
    /// Reply to `Train`; the only state that ends a tick.
    Trained { generation: u64, state: TrainState },
    State { generation: u64, state: TrainState },
    Forward { generation: u64, report: ForwardReport },
    Weights { generation: u64, snapshot: WeightSnapshot },
    Failed { generation: u64, message: String },
}

impl Response {
    pub fn generation(&self) -> u64 {
        match self {
            Response::Ready { generation, .. }
            | Response::Trained { generation, .. }
            | Response::State { generation, .. }
            | Response::Forward { generation, .. }
            | Response::Weights { generation, .. }
            | Response::Failed { generation, .. } => *generation,
        }
    }
}

/// A response that survived the staleness check.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Ready(TrainState),
    State(TrainState),
    Forward(ForwardReport),
    Weights(WeightSnapshot),
    Failed(String),
}

// ----------------------------------------------------------------------------
// Worker side
// ----------------------------------------------------------------------------

fn worker_loop(requests: Receiver<Request>, responses: Sender<Response>) {
    let mut trainer: Option<Trainer> = None;
    let mut generation = 0u64;

    while let Ok(req) = requests.recv() {
        debug!(generation, ?req, "worker request");
        let resp = match req {
            Request::Shutdown => break,
            Request::Init { generation: g, config } => {
                generation = g;
                trainer = None;
                match Trainer::new(config) {
                    Ok(t) => {
                        let state = t.state();
                        trainer = Some(t);
                        Response::Ready { generation, state }
                    }
                    Err(e) => {
                        warn!("worker init failed: {e}");
                        Response::Failed { generation, message: e.to_string() }
                    }
                }
            }
            other => match trainer.as_mut() {
                None => Response::Failed { generation, message: "worker has no trainer".to_string() },
                Some(t) => handle(t, generation, other),
            },
        };
        if responses.send(resp).is_err() {
            debug!("foreground hung up; worker exiting");
            break;
        }
    }
}

fn handle(trainer: &mut Trainer, generation: u64, req: Request) -> Response {
    match req {
        Request::Train { epochs, batch_size } => {
            Response::Trained { generation, state: trainer.tick(epochs, batch_size) }
        }
        Request::Forward { a, b } => Response::Forward { generation, report: trainer.forward(a, b) },
        Request::SyncWeights => Response::Weights { generation, snapshot: trainer.weights() },
        Request::TestOverride { enabled } => {
            Response::State { generation, state: trainer.set_test_override(enabled) }
        }
        Request::Init { .. } | Request::Shutdown => unreachable!("handled by worker_loop"),
    }
}

// ----------------------------------------------------------------------------
// Foreground side
// ----------------------------------------------------------------------------

/// Foreground end of the bridge. Never blocks except in [`WorkerHandle::wait`]
/// and [`WorkerHandle::shutdown`]. Dropping it asks the worker to stop and
/// returns at once; a tick already running finishes on the detached thread.
pub struct WorkerHandle {
    tx: Sender<Request>,
    rx: Receiver<Response>,
    join: Option<JoinHandle<()>>,
    generation: u64,
    modulus: usize,
    training: bool,
    ready: bool,
}

impl WorkerHandle {
    /// Validate `config`, start the worker thread and send it `init`.
    pub fn spawn(config: GrokConfig) -> Result<Self> {
        config.validate()?;
        let (req_tx, req_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();
        let join = thread::Builder::new()
            .name("grok-trainer".to_string())
            .spawn(move || worker_loop(req_rx, resp_tx))
            .map_err(|_| GrokError::WorkerGone)?;
        let mut handle = WorkerHandle {
            tx: req_tx,
            rx: resp_rx,
            join: Some(join),
            generation: 0,
            modulus: config.modulus,
            training: false,
            ready: false,
        };
        handle.send_init(config)?;
        Ok(handle)
    }

    /// Start over from `config`. Every response still in flight from the
    /// previous generation will be discarded on arrival.
    pub fn reset(&mut self, config: GrokConfig) -> Result<()> {
        config.validate()?;
        self.send_init(config)
    }

    fn send_init(&mut self, config: GrokConfig) -> Result<()> {
        self.generation += 1;
        self.training = false;
        self.ready = false;
        self.modulus = config.modulus;
        info!(generation = self.generation, modulus = config.modulus, "worker (re)init");
        self.send(Request::Init { generation: self.generation, config })
    }

    /// Fire-and-forget. Returns `false` (and sends nothing) while a previous
    /// train request is still outstanding.
    pub fn train(&mut self, epochs: usize, batch_size: Option<usize>) -> Result<bool> {
        if self.training {
            debug!("train request dropped: previous tick still in flight");
            return Ok(false);
        }
        self.send(Request::Train { epochs, batch_size })?;
        self.training = true;
        Ok(true)
    }

    /// Panics if either token is outside `[0, modulus)`.
    pub fn forward(&mut self, a: usize, b: usize) -> Result<()> {
        assert!(a < self.modulus && b < self.modulus, "token out of range: ({a}, {b}) with modulus {}", self.modulus);
        self.send(Request::Forward { a, b })
    }

    pub fn sync_weights(&mut self) -> Result<()> {
        self.send(Request::SyncWeights)
    }

    pub fn set_test_override(&mut self, enabled: bool) -> Result<()> {
        self.send(Request::TestOverride { enabled })
    }

    /// Drain everything that has arrived. Stale responses are dropped, and
    /// of several states only the newest is kept (it comes last).
    pub fn poll(&mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        let mut latest_state = None;
        loop {
            match self.rx.try_recv() {
                Ok(resp) => match self.accept(resp) {
                    Some(Event::State(s)) => latest_state = Some(s),
                    Some(ev) => events.push(ev),
                    None => {}
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if events.is_empty() && latest_state.is_none() {
                        return Err(GrokError::WorkerGone);
                    }
                    break;
                }
            }
        }
        events.extend(latest_state.map(Event::State));
        Ok(events)
    }

    /// Block for the next current-generation event, up to `timeout`.
    pub fn wait(&mut self, timeout: Duration) -> Result<Option<Event>> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok(resp) => {
                    if let Some(ev) = self.accept(resp) { return Ok(Some(ev)); }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(GrokError::WorkerGone),
            }
        }
    }

    fn accept(&mut self, resp: Response) -> Option<Event> {
        if resp.generation() != self.generation {
            debug!(stale = resp.generation(), current = self.generation, "discarding stale response");
            return None;
        }
        Some(match resp {
            Response::Ready { state, .. } => {
                self.ready = true;
                Event::Ready(state)
            }
            Response::Trained { state, .. } => {
                self.training = false;
                Event::State(state)
            }
            Response::State { state, .. } => Event::State(state),
            Response::Forward { report, .. } => Event::Forward(report),
            Response::Weights { snapshot, .. } => Event::Weights(snapshot),
            Response::Failed { message, .. } => {
                warn!("worker: {message}");
                self.training = false;
                Event::Failed(message)
            }
        })
    }

    fn send(&self, req: Request) -> Result<()> {
        self.tx.send(req).map_err(|_| GrokError::WorkerGone)
    }

    /// Stop the worker and wait for its thread to exit, including any tick
    /// still in progress.
    pub fn shutdown(mut self) -> Result<()> {
        self.send(Request::Shutdown)?;
        match self.join.take() {
            Some(join) => join.join().map_err(|_| GrokError::WorkerGone),
            None => Ok(()),
        }
    }

    pub fn generation(&self) -> u64 { self.generation }
    pub fn is_training(&self) -> bool { self.training }
    pub fn is_ready(&self) -> bool { self.ready }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // The thread is detached here. It exits on Shutdown, or on its next
        // send once the response channel is gone.
        let _ = self.tx.send(Request::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64) -> GrokConfig {
        GrokConfig { modulus: 5, embed_size: 4, hidden_size: 4, train_fraction: 0.5, seed: Some(seed), ..GrokConfig::default() }
    }

    #[test]
    fn stale_generation_is_discarded() {
        let mut h = WorkerHandle::spawn(config(1)).unwrap();
        let current = h.generation();
        assert!(h.accept(Response::Failed { generation: current - 1, message: "old".into() }).is_none());
        assert!(h.accept(Response::Failed { generation: current, message: "new".into() }).is_some());
    }

    fn state(epoch: usize) -> TrainState {
        TrainState {
            epoch,
            train_accuracy: 0.0,
            test_accuracy: 0.0,
            loss: 0.0,
            phase: crate::train::Phase::Memorizing,
            grokking_detected: false,
            grokking_epoch: None,
            hidden_activations: Vec::new(),
            output_activations: Vec::new(),
        }
    }

    #[test]
    fn poll_keeps_only_the_newest_current_state() {
        let (req_tx, _req_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();
        let mut h = WorkerHandle {
            tx: req_tx,
            rx: resp_rx,
            join: None,
            generation: 3,
            modulus: 5,
            training: true,
            ready: true,
        };
        let report = ForwardReport { a: 1, b: 2, hidden_activations: vec![], output_activations: vec![], prediction: 3 };
        resp_tx.send(Response::Trained { generation: 2, state: state(99) }).unwrap();
        resp_tx.send(Response::State { generation: 3, state: state(1) }).unwrap();
        resp_tx.send(Response::Forward { generation: 3, report: report.clone() }).unwrap();
        resp_tx.send(Response::Trained { generation: 3, state: state(2) }).unwrap();

        let events = h.poll().unwrap();
        assert_eq!(events, vec![Event::Forward(report), Event::State(state(2))]);
        assert!(!h.is_training());
        assert!(h.poll().unwrap().is_empty());
    }

    #[test]
    fn only_a_trained_state_clears_the_train_latch() {
        let (req_tx, _req_rx) = mpsc::channel();
        let (_resp_tx, resp_rx) = mpsc::channel();
        let mut h = WorkerHandle {
            tx: req_tx,
            rx: resp_rx,
            join: None,
            generation: 1,
            modulus: 5,
            training: true,
            ready: true,
        };
        assert_eq!(h.accept(Response::State { generation: 1, state: state(0) }), Some(Event::State(state(0))));
        assert!(h.is_training());
        assert!(h.accept(Response::Trained { generation: 1, state: state(4) }).is_some());
        assert!(!h.is_training());
    }

    #[test]
    fn second_train_request_is_dropped_while_in_flight() {
        let mut h = WorkerHandle::spawn(config(2)).unwrap();
        assert!(h.train(1, None).unwrap());
        assert!(!h.train(1, None).unwrap());
        assert!(h.is_training());
    }

    #[test]
    fn invalid_config_is_rejected_before_spawning() {
        let c = GrokConfig { modulus: 1, ..config(3) };
        assert!(matches!(WorkerHandle::spawn(c), Err(GrokError::InvalidModulus(1))));
    }

    #[test]
    fn empty_split_is_rejected_before_spawning() {
        let c = GrokConfig { modulus: 2, train_fraction: 0.1, ..config(4) };
        assert!(matches!(WorkerHandle::spawn(c), Err(GrokError::EmptySplit { side: "train", .. })));
    }

    #[test]
    fn worker_reports_failed_init_and_recovers() {
        // Drive the loop directly: the handle would refuse this config.
        let (req_tx, req_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();
        let join = thread::spawn(move || worker_loop(req_rx, resp_tx));
        let bad = GrokConfig { modulus: 1, ..config(4) };
        req_tx.send(Request::Init { generation: 1, config: bad }).unwrap();
        req_tx.send(Request::SyncWeights).unwrap();
        req_tx.send(Request::Init { generation: 2, config: config(4) }).unwrap();
        req_tx.send(Request::Shutdown).unwrap();

        let replies: Vec<Response> = resp_rx.iter().collect();
        join.join().unwrap();
        assert!(matches!(&replies[0], Response::Failed { generation: 1, message } if message.contains("modulus")));
        assert!(matches!(&replies[1], Response::Failed { generation: 1, message } if message.contains("no trainer")));
        assert!(matches!(&replies[2], Response::Ready { generation: 2, .. }));
        assert_eq!(replies.len(), 3);
    }
}
