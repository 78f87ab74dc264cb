//! Debounced what-if scoring.
//!
//! Parameter changes reset a quiet-period timer; only when the timer
//! elapses is one scoring call issued, tagged with the next generation.
//! Calls may overlap. A completion updates the view only if its generation
//! is the newest issued, so a slow early call can never overwrite a later
//! one. Failures leave the last good result in place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

use crate::api::FraudApi;
use crate::errors::ApiError;
use crate::logging::log_simulation;
use crate::types::{Features, SimulationResult};

/// Issues generations and decides which completions may be applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationGate {
    issued: u64,
    applied: u64,
}

impl GenerationGate {
    pub fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    pub fn accepts(&self, generation: u64) -> bool {
        generation == self.issued && generation > self.applied
    }

    /// Record an accepted completion. Returns false for stale generations.
    pub fn try_apply(&mut self, generation: u64) -> bool {
        if !self.accepts(generation) {
            return false;
        }
        self.applied = generation;
        true
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }
}

/// What the presentation layer reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationView {
    /// Latest parameters seen, settled or not.
    pub params: Features,
    pub result: Option<SimulationResult>,
    /// Generation that produced `result`.
    pub result_generation: u64,
    pub issued: u64,
    pub in_flight: usize,
    /// Changes received by the coalescer.
    pub received: u64,
    /// A change is waiting out the quiet period.
    pub pending: bool,
    /// Transient message for the newest call's failure.
    pub last_error: Option<String>,
}

impl SimulationView {
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }
}

type Completion = (u64, Result<SimulationResult, ApiError>);

pub struct SimulationCoalescer {
    api: Arc<dyn FraudApi>,
    debounce: Duration,
    gate: GenerationGate,
    view: watch::Sender<SimulationView>,
}

pub struct CoalescerHandle {
    changes: mpsc::UnboundedSender<Features>,
    sent: AtomicU64,
    view: watch::Receiver<SimulationView>,
    task: JoinHandle<()>,
}

impl CoalescerHandle {
    /// Queue a full parameter set. Returns false once the coalescer stopped.
    pub fn submit(&self, params: Features) -> bool {
        let ok = self.changes.send(params).is_ok();
        if ok {
            self.sent.fetch_add(1, Ordering::SeqCst);
        }
        ok
    }

    /// Resolves once every submitted change has been issued and answered.
    pub async fn settled(&self) {
        let sent = self.sent.load(Ordering::SeqCst);
        let mut rx = self.view.clone();
        let _ = rx
            .wait_for(|v| v.received >= sent && !v.pending && v.in_flight == 0)
            .await;
    }

    pub fn view(&self) -> SimulationView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SimulationView> {
        self.view.clone()
    }

    /// Stop accepting changes. A pending (unsettled) change is dropped and
    /// in-flight completions are ignored.
    pub async fn shutdown(self) {
        drop(self.changes);
        let _ = self.task.await;
    }
}

impl SimulationCoalescer {
    pub fn spawn(api: Arc<dyn FraudApi>, debounce: Duration) -> CoalescerHandle {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(SimulationView::default());
        let coalescer = SimulationCoalescer {
            api,
            debounce,
            gate: GenerationGate::default(),
            view: view_tx,
        };
        let task = tokio::spawn(coalescer.run(changes_rx));
        CoalescerHandle {
            changes: changes_tx,
            sent: AtomicU64::new(0),
            view: view_rx,
            task,
        }
    }

    async fn run(mut self, mut changes: mpsc::UnboundedReceiver<Features>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut pending: Option<Features> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Some(params) => {
                        pending = Some(params);
                        deadline = Some(Instant::now() + self.debounce);
                        self.view.send_modify(|v| {
                            v.params = params;
                            v.received += 1;
                            v.pending = true;
                        });
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    if let Some(params) = pending.take() {
                        self.issue(params, &done_tx);
                    }
                },
                Some((generation, result)) = done_rx.recv() => {
                    self.complete(generation, result);
                }
            }
        }
    }

    fn issue(&mut self, params: Features, done: &mpsc::UnboundedSender<Completion>) {
        let generation = self.gate.issue();
        self.view.send_modify(|v| {
            v.issued = generation;
            v.in_flight += 1;
            v.pending = false;
        });
        log_simulation("issued", generation, &[("amount", json!(params.amount))]);

        let api = Arc::clone(&self.api);
        let done = done.clone();
        tokio::spawn(async move {
            let result = api.simulate(&params).await;
            let _ = done.send((generation, result));
        });
    }

    fn complete(&mut self, generation: u64, result: Result<SimulationResult, ApiError>) {
        self.view.send_modify(|v| v.in_flight = v.in_flight.saturating_sub(1));
        match result {
            Ok(res) => {
                if self.gate.try_apply(generation) {
                    log_simulation("applied", generation, &[("risk_score", json!(res.risk_score))]);
                    self.view.send_modify(|v| {
                        v.result = Some(res);
                        v.result_generation = generation;
                        v.last_error = None;
                    });
                } else {
                    log_simulation(
                        "stale_discarded",
                        generation,
                        &[("latest", json!(self.gate.issued()))],
                    );
                }
            }
            Err(err) => {
                log_simulation("failed", generation, &[("error", json!(err.to_string()))]);
                if generation == self.gate.issued() {
                    self.view.send_modify(|v| v.last_error = Some(err.to_string()));
                }
            }
        }
    }
}
