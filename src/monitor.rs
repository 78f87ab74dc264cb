//! Live monitor wiring: snapshot bootstrap, then streamed deltas applied to
//! the store in arrival order, with alert timers driven between events.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::api::retry::{retry_async, RetryConfig};
use crate::api::FraudApi;
use crate::config::Config;
use crate::feed::{ConnectionHandle, ConnectionManager, Connector, StreamEvent};
use crate::logging::{info, log_api_error, obj, v_str, Domain};
use crate::store::MonitorStore;
use crate::types::Transaction;

/// Initial ledger contents. A failed fetch leaves the ledger empty; streamed
/// inserts still arrive.
pub async fn fetch_snapshot(api: &dyn FraudApi, limit: usize, retry: &RetryConfig) -> Vec<Transaction> {
    match retry_async(retry, "fetch_snapshot", || api.fetch_transactions(0, limit)).await {
        Ok(page) => {
            info(
                Domain::Ledger,
                "snapshot_fetched",
                obj(&[
                    ("count", json!(page.transactions.len())),
                    ("total", json!(page.total)),
                ]),
            );
            page.transactions
        }
        Err(err) => {
            log_api_error("GET /fraud/transactions", &err.to_string());
            Vec::new()
        }
    }
}

/// Apply events until the channel closes. Between events the pump wakes at
/// the next alert deadline so expiry does not wait for traffic. Any store
/// change made elsewhere (a dismissal) re-reads that deadline.
pub async fn pump_events(store: Arc<MonitorStore>, mut events: mpsc::Receiver<StreamEvent>) {
    let mut revisions = store.subscribe();
    loop {
        revisions.borrow_and_update();
        let deadline = store.next_alert_deadline();
        tokio::select! {
            ev = events.recv() => match ev {
                Some(ev) => {
                    let report = store.apply(ev, Instant::now());
                    if report.alert.is_some() {
                        if let Some(tx) = store.active_alert() {
                            info(
                                Domain::Alert,
                                "fraud_detected",
                                obj(&[
                                    ("tx_id", v_str(&tx.id)),
                                    ("user_id", v_str(&tx.user_id)),
                                    ("risk_score", json!(tx.risk_score)),
                                    ("scored_at", json!(tx.timestamp_utc().map(|ts| ts.to_rfc3339()))),
                                ]),
                            );
                        }
                    }
                }
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                store.tick(Instant::now());
            }
            Ok(()) = revisions.changed() => {}
        }
    }
}

/// Running monitor: the connection and the pump that feeds the store.
pub struct Monitor {
    pub store: Arc<MonitorStore>,
    connection: ConnectionHandle,
    pump: tokio::task::JoinHandle<()>,
}

impl Monitor {
    /// Load the snapshot, then open the push channel. The snapshot is applied
    /// before any streamed event because the pump starts after it.
    pub async fn start(cfg: &Config, api: &dyn FraudApi, connector: Arc<dyn Connector>) -> Self {
        let store = Arc::new(MonitorStore::from_config(cfg));
        let items = fetch_snapshot(api, cfg.snapshot_limit, &RetryConfig::default()).await;
        store.apply(StreamEvent::snapshot(items), Instant::now());

        let (tx, rx) = mpsc::channel(cfg.event_channel_capacity);
        let connection = ConnectionManager::spawn(
            cfg.stream_url.clone(),
            cfg.reconnect_delay(),
            connector,
            tx,
        );
        let pump = tokio::spawn(pump_events(Arc::clone(&store), rx));
        Self {
            store,
            connection,
            pump,
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Deterministic teardown: the connection closes, the pending reconnect
    /// is cancelled, and the pump drains whatever was already decoded.
    pub async fn shutdown(self) {
        self.connection.shutdown().await;
        let _ = self.pump.await;
    }
}
