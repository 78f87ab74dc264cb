//! Single-slot fraud alert with timed expiry and a dismissal grace phase.
//!
//! `Active` is the logical alert. Expiry and manual dismissal both move it to
//! `Dismissing`, where the logical alert is gone but the transaction
//! reference stays readable for the grace interval so an exit transition can
//! still render it. After the grace interval the slot is empty.

use std::sync::Arc;

use tokio::time::{Duration, Instant};

use crate::logging::log_alert;
use crate::types::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Active { deadline: Instant },
    Dismissing { remove_at: Instant },
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub tx: Arc<Transaction>,
    pub raised_at: Instant,
    pub phase: AlertPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    Raised,
    Replaced,
    Expired,
    Dismissed,
    Removed,
}

#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    current: Option<Alert>,
    ttl: Duration,
    grace: Duration,
}

impl AlertDispatcher {
    pub fn new(ttl: Duration, grace: Duration) -> Self {
        Self {
            current: None,
            ttl,
            grace,
        }
    }

    /// Observe an applied insert. Only fraud verdicts raise; a new alert
    /// replaces whatever is shown, including one that is fading out.
    pub fn on_insert(&mut self, tx: &Arc<Transaction>, now: Instant) -> Option<AlertTransition> {
        if !tx.is_fraud {
            return None;
        }
        let transition = if self.current.is_some() {
            AlertTransition::Replaced
        } else {
            AlertTransition::Raised
        };
        self.current = Some(Alert {
            tx: Arc::clone(tx),
            raised_at: now,
            phase: AlertPhase::Active {
                deadline: now + self.ttl,
            },
        });
        log_alert("raised", &tx.id, tx.risk_score);
        Some(transition)
    }

    /// Manual dismissal. No-op unless an alert is active.
    pub fn dismiss(&mut self, now: Instant) -> Option<AlertTransition> {
        let alert = self.current.as_mut()?;
        match alert.phase {
            AlertPhase::Active { .. } => {
                alert.phase = AlertPhase::Dismissing {
                    remove_at: now + self.grace,
                };
                log_alert("dismissed", &alert.tx.id, alert.tx.risk_score);
                Some(AlertTransition::Dismissed)
            }
            AlertPhase::Dismissing { .. } => None,
        }
    }

    /// Advance timers. May pass through expiry and removal in one call when
    /// the caller is late.
    pub fn tick(&mut self, now: Instant) -> Option<AlertTransition> {
        let mut last = None;
        if let Some(alert) = self.current.as_mut() {
            if let AlertPhase::Active { deadline } = alert.phase {
                if now >= deadline {
                    alert.phase = AlertPhase::Dismissing {
                        remove_at: deadline + self.grace,
                    };
                    log_alert("expired", &alert.tx.id, alert.tx.risk_score);
                    last = Some(AlertTransition::Expired);
                }
            }
            if let AlertPhase::Dismissing { remove_at } = alert.phase {
                if now >= remove_at {
                    self.current = None;
                    last = Some(AlertTransition::Removed);
                }
            }
        }
        last
    }

    /// Drop the alert immediately (ledger cleared).
    pub fn clear(&mut self) {
        self.current = None;
    }

    /// The logical alert: present only while active.
    pub fn active(&self) -> Option<&Arc<Transaction>> {
        match &self.current {
            Some(Alert {
                tx,
                phase: AlertPhase::Active { .. },
                ..
            }) => Some(tx),
            _ => None,
        }
    }

    /// What a renderer may still show, including during the grace phase.
    pub fn displayed(&self) -> Option<&Alert> {
        self.current.as_ref()
    }

    /// Next instant at which `tick` would change something.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|a| match a.phase {
            AlertPhase::Active { deadline } => deadline,
            AlertPhase::Dismissing { remove_at } => remove_at,
        })
    }
}
