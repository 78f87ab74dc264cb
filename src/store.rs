//! Owned monitor state: the ledger and the alert slot behind one lock.
//!
//! Single writer (the event pump, plus user actions), many readers. Every
//! apply runs under the write lock, so a reader sees either the state before
//! an event or after it. A revision counter is published after each change.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tokio::time::{Duration, Instant};

use crate::alert::{Alert, AlertDispatcher, AlertTransition};
use crate::api::FraudApi;
use crate::config::Config;
use crate::errors::ApiError;
use crate::feed::StreamEvent;
use crate::ledger::{InsertOutcome, Ledger, LedgerStats};
use crate::logging::{agg_increment, log_api_error, obj, v_str, warn, Domain};
use crate::types::Transaction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub kind: &'static str,
    pub changed: bool,
    pub insert: Option<InsertOutcome>,
    pub alert: Option<AlertTransition>,
}

/// Consistent read of the store at one revision.
#[derive(Debug, Clone)]
pub struct MonitorView {
    pub revision: u64,
    pub items: Vec<Arc<Transaction>>,
    pub alert: Option<Arc<Transaction>>,
    pub displayed_alert: Option<Alert>,
    pub stats: LedgerStats,
}

struct Inner {
    ledger: Ledger,
    alerts: AlertDispatcher,
    revision: u64,
}

pub struct MonitorStore {
    inner: RwLock<Inner>,
    revision: watch::Sender<u64>,
}

impl MonitorStore {
    pub fn new(capacity: Option<usize>, alert_ttl: Duration, alert_grace: Duration) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Inner {
                ledger: Ledger::with_capacity(capacity),
                alerts: AlertDispatcher::new(alert_ttl, alert_grace),
                revision: 0,
            }),
            revision,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.ledger_capacity(), cfg.alert_ttl(), cfg.alert_grace())
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self, inner: &mut Inner) {
        inner.revision += 1;
        self.revision.send_replace(inner.revision);
    }

    /// Apply one event atomically.
    pub fn apply(&self, event: StreamEvent, now: Instant) -> ApplyReport {
        let kind = event.kind();
        let mut inner = self.write();
        let mut report = ApplyReport {
            kind,
            changed: false,
            insert: None,
            alert: None,
        };

        match event {
            StreamEvent::Snapshot(items) => {
                inner.ledger.load_snapshot(items);
                report.changed = true;
            }
            StreamEvent::Inserted(item) => {
                let outcome = inner.ledger.apply_insert(Arc::clone(&item));
                report.insert = Some(outcome);
                if outcome.applied() {
                    report.changed = true;
                    report.alert = inner.alerts.on_insert(&item, now);
                    if report.alert.is_some() {
                        agg_increment("alert");
                    }
                } else {
                    warn(
                        Domain::Ledger,
                        "duplicate_insert",
                        obj(&[
                            ("tx_id", v_str(&item.id)),
                            ("msg", v_str("insert with an identifier already in the ledger")),
                        ]),
                    );
                }
            }
            StreamEvent::Deleted(id) => {
                report.changed = inner.ledger.apply_delete(&id);
            }
            StreamEvent::Cleared => {
                inner.ledger.apply_clear();
                inner.alerts.clear();
                report.changed = true;
            }
        }

        if report.changed {
            self.bump(&mut inner);
        }
        report
    }

    /// Advance alert timers.
    pub fn tick(&self, now: Instant) -> Option<AlertTransition> {
        let mut inner = self.write();
        let transition = inner.alerts.tick(now);
        if transition.is_some() {
            self.bump(&mut inner);
        }
        transition
    }

    pub fn dismiss_alert(&self, now: Instant) -> Option<AlertTransition> {
        let mut inner = self.write();
        let transition = inner.alerts.dismiss(now);
        if transition.is_some() {
            self.bump(&mut inner);
        }
        transition
    }

    /// User-initiated delete: remove locally first, then ask the backing
    /// store. A remote failure does not restore the item; the discrepancy is
    /// logged and the error returned for display.
    pub async fn delete_transaction(&self, api: &dyn FraudApi, id: &str) -> Result<bool, ApiError> {
        let removed = self.apply(StreamEvent::Deleted(id.to_string()), Instant::now()).changed;
        if let Err(err) = api.delete_transaction(id).await {
            log_api_error("DELETE /fraud/transactions/{id}", &err.to_string());
            warn(
                Domain::Ledger,
                "delete_discrepancy",
                obj(&[
                    ("tx_id", v_str(id)),
                    ("msg", v_str("removed locally, remote delete failed")),
                ]),
            );
            return Err(err);
        }
        Ok(removed)
    }

    pub fn view(&self) -> MonitorView {
        let inner = self.read();
        MonitorView {
            revision: inner.revision,
            items: inner.ledger.snapshot(),
            alert: inner.alerts.active().cloned(),
            displayed_alert: inner.alerts.displayed().cloned(),
            stats: inner.ledger.stats(),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.read().ledger.ids()
    }

    pub fn len(&self) -> usize {
        self.read().ledger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().ledger.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Transaction>> {
        self.read().ledger.get(id).cloned()
    }

    pub fn active_alert(&self) -> Option<Arc<Transaction>> {
        self.read().alerts.active().cloned()
    }

    pub fn next_alert_deadline(&self) -> Option<Instant> {
        self.read().alerts.next_deadline()
    }

    pub fn revision(&self) -> u64 {
        self.read().revision
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::tx;
    use crate::types::{
        Analytics, AuditPage, Features, SimulationResult, TransactionInput, TransactionPage,
    };
    use async_trait::async_trait;

    fn store() -> MonitorStore {
        MonitorStore::new(None, Duration::from_secs(5), Duration::from_millis(300))
    }

    #[test]
    fn test_walkthrough() {
        let s = store();
        let now = Instant::now();
        s.apply(StreamEvent::Snapshot(vec![]), now);

        let r = s.apply(StreamEvent::Inserted(tx("A", true)), now);
        assert_eq!(r.alert, Some(AlertTransition::Raised));
        assert_eq!(s.active_alert().unwrap().id, "A");

        let r = s.apply(StreamEvent::Inserted(tx("B", false)), now);
        assert_eq!(r.alert, None);
        assert_eq!(s.ids(), vec!["B", "A"]);
        assert_eq!(s.active_alert().unwrap().id, "A");

        s.apply(StreamEvent::Deleted("A".to_string()), now);
        assert_eq!(s.ids(), vec!["B"]);
        // The alert keeps its own reference to A.
        assert_eq!(s.active_alert().unwrap().id, "A");

        s.apply(StreamEvent::Cleared, now);
        assert!(s.is_empty());
        assert!(s.active_alert().is_none());
        assert!(s.view().displayed_alert.is_none());
    }

    #[test]
    fn test_duplicate_insert_does_not_alert_or_bump() {
        let s = store();
        let now = Instant::now();
        s.apply(StreamEvent::Inserted(tx("A", false)), now);
        let rev = s.revision();
        let r = s.apply(StreamEvent::Inserted(tx("A", true)), now);
        assert_eq!(r.insert, Some(InsertOutcome::DuplicateRejected));
        assert!(!r.changed);
        assert_eq!(r.alert, None);
        assert_eq!(s.revision(), rev);
    }

    #[test]
    fn test_revision_published_on_change_only() {
        let s = store();
        let rx = s.subscribe();
        let now = Instant::now();
        s.apply(StreamEvent::Deleted("nope".to_string()), now);
        assert_eq!(*rx.borrow(), 0);
        s.apply(StreamEvent::Inserted(tx("A", false)), now);
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(s.view().revision, 1);
    }

    #[test]
    fn test_tick_expires_alert() {
        let s = store();
        let t0 = Instant::now();
        s.apply(StreamEvent::Inserted(tx("A", true)), t0);
        assert_eq!(s.next_alert_deadline(), Some(t0 + Duration::from_secs(5)));
        assert_eq!(s.tick(t0 + Duration::from_secs(5)), Some(AlertTransition::Expired));
        assert!(s.active_alert().is_none());
        assert_eq!(s.view().displayed_alert.unwrap().tx.id, "A");
        assert_eq!(s.tick(t0 + Duration::from_millis(5300)), Some(AlertTransition::Removed));
    }

    struct DeleteApi {
        fail: bool,
    }

    #[async_trait]
    impl FraudApi for DeleteApi {
        async fn fetch_transactions(&self, _: usize, _: usize) -> Result<TransactionPage, ApiError> {
            unimplemented!()
        }
        async fn delete_transaction(&self, _id: &str) -> Result<(), ApiError> {
            if self.fail {
                Err(ApiError::status("DELETE /fraud/transactions/{id}", 500, "down"))
            } else {
                Ok(())
            }
        }
        async fn simulate(&self, _: &Features) -> Result<SimulationResult, ApiError> {
            unimplemented!()
        }
        async fn submit_transaction(&self, _: &TransactionInput) -> Result<Transaction, ApiError> {
            unimplemented!()
        }
        async fn fetch_logs(&self, _: usize, _: usize) -> Result<AuditPage, ApiError> {
            unimplemented!()
        }
        async fn fetch_analytics(&self) -> Result<Analytics, ApiError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_optimistic_delete_survives_remote_failure() {
        let s = store();
        s.apply(
            StreamEvent::Snapshot(vec![tx("A", false), tx("B", false)]),
            Instant::now(),
        );

        let res = s.delete_transaction(&DeleteApi { fail: true }, "A").await;
        assert!(res.is_err());
        assert_eq!(s.ids(), vec!["B"]);

        let res = s.delete_transaction(&DeleteApi { fail: false }, "B").await;
        assert!(res.unwrap());
        assert!(s.is_empty());

        // Echo of the same delete from the push channel is a no-op.
        let r = s.apply(StreamEvent::Deleted("B".to_string()), Instant::now());
        assert!(!r.changed);
    }
}
