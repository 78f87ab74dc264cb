//! Authoritative ordered collection of active transactions.
//!
//! Front of the sequence is the most recent insert. Identifiers are unique:
//! an insert whose id is already present is rejected and reported, never
//! merged.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::logging::log_ledger_apply;
use crate::types::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Inserted, and this many oldest entries fell off the back.
    InsertedEvicting(usize),
    DuplicateRejected,
}

impl InsertOutcome {
    pub fn applied(self) -> bool {
        !matches!(self, InsertOutcome::DuplicateRejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerStats {
    pub total: usize,
    pub fraud: usize,
    pub clean: usize,
    pub mean_risk: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    items: VecDeque<Arc<Transaction>>,
    ids: HashSet<String>,
    capacity: Option<usize>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity: capacity.filter(|c| *c > 0),
            ..Self::default()
        }
    }

    /// Replace the whole sequence. Order of `items` is kept as given; when a
    /// capacity is set the most recent (front) entries are kept. Repeated ids
    /// after the first occurrence are dropped.
    pub fn load_snapshot(&mut self, items: Vec<Arc<Transaction>>) {
        self.items.clear();
        self.ids.clear();
        let mut dropped = 0usize;
        for item in items {
            if self.capacity.is_some_and(|cap| self.items.len() >= cap) {
                break;
            }
            if !self.ids.insert(item.id.clone()) {
                dropped += 1;
                continue;
            }
            self.items.push_back(item);
        }
        let outcome = if dropped > 0 { "duplicates_dropped" } else { "loaded" };
        log_ledger_apply("snapshot", None, outcome, self.items.len());
    }

    pub fn apply_insert(&mut self, item: Arc<Transaction>) -> InsertOutcome {
        if self.ids.contains(&item.id) {
            log_ledger_apply("insert", Some(&item.id), "duplicate_rejected", self.items.len());
            return InsertOutcome::DuplicateRejected;
        }
        self.ids.insert(item.id.clone());
        self.items.push_front(item);

        let mut evicted = 0usize;
        if let Some(cap) = self.capacity {
            while self.items.len() > cap {
                if let Some(old) = self.items.pop_back() {
                    self.ids.remove(&old.id);
                    evicted += 1;
                }
            }
        }
        let outcome = if evicted > 0 {
            InsertOutcome::InsertedEvicting(evicted)
        } else {
            InsertOutcome::Inserted
        };
        if let Some(front) = self.items.front() {
            log_ledger_apply("insert", Some(&front.id), "inserted", self.items.len());
        }
        outcome
    }

    /// Remove by id. Absent ids are a no-op; returns whether anything changed.
    pub fn apply_delete(&mut self, id: &str) -> bool {
        if !self.ids.remove(id) {
            log_ledger_apply("delete", Some(id), "absent", self.items.len());
            return false;
        }
        self.items.retain(|tx| tx.id != id);
        log_ledger_apply("delete", Some(id), "removed", self.items.len());
        true
    }

    pub fn apply_clear(&mut self) {
        self.items.clear();
        self.ids.clear();
        log_ledger_apply("clear", None, "cleared", 0);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Transaction>> {
        if !self.ids.contains(id) {
            return None;
        }
        self.items.iter().find(|tx| tx.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Transaction>> {
        self.items.iter()
    }

    /// Cheap copy for readers: the items themselves are shared.
    pub fn snapshot(&self) -> Vec<Arc<Transaction>> {
        self.items.iter().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|tx| tx.id.clone()).collect()
    }

    pub fn stats(&self) -> LedgerStats {
        let total = self.items.len();
        let fraud = self.items.iter().filter(|tx| tx.is_fraud).count();
        let mean_risk = if total > 0 {
            self.items.iter().map(|tx| tx.risk_score).sum::<f64>() / total as f64
        } else {
            0.0
        };
        LedgerStats {
            total,
            fraud,
            clean: total - fraud,
            mean_risk,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Features;

    pub(crate) fn tx(id: &str, is_fraud: bool) -> Arc<Transaction> {
        Arc::new(Transaction {
            id: id.to_string(),
            user_id: "user_1000".to_string(),
            features: Features::default(),
            is_fraud,
            risk_score: if is_fraud { 0.9 } else { 0.1 },
            timestamp: "2024-05-01T00:00:00Z".to_string(),
            explanations: Vec::new(),
        })
    }

    #[test]
    fn test_insert_prepends() {
        let mut l = Ledger::new();
        l.load_snapshot(vec![]);
        l.apply_insert(tx("A", false));
        l.apply_insert(tx("B", false));
        l.apply_insert(tx("C", false));
        assert_eq!(l.ids(), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_snapshot_keeps_given_order() {
        let mut l = Ledger::new();
        l.apply_insert(tx("X", false));
        l.load_snapshot(vec![tx("S3", false), tx("S2", true), tx("S1", false)]);
        assert_eq!(l.ids(), vec!["S3", "S2", "S1"]);
        assert!(!l.contains("X"));
    }

    #[test]
    fn test_clear_then_snapshot_yields_snapshot() {
        let mut l = Ledger::new();
        l.apply_insert(tx("A", false));
        l.apply_clear();
        assert!(l.is_empty());
        l.load_snapshot(vec![tx("P", false), tx("Q", false)]);
        assert_eq!(l.ids(), vec!["P", "Q"]);
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut l = Ledger::new();
        l.load_snapshot(vec![tx("A", false), tx("B", false)]);
        assert!(!l.apply_delete("missing"));
        assert_eq!(l.ids(), vec!["A", "B"]);
        assert!(l.apply_delete("A"));
        assert!(!l.apply_delete("A"));
        assert_eq!(l.ids(), vec!["B"]);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut l = Ledger::new();
        assert_eq!(l.apply_insert(tx("A", false)), InsertOutcome::Inserted);
        l.apply_insert(tx("B", false));
        assert_eq!(l.apply_insert(tx("A", true)), InsertOutcome::DuplicateRejected);
        assert_eq!(l.ids(), vec!["B", "A"]);
        assert!(!l.get("A").unwrap().is_fraud);
    }

    #[test]
    fn test_reinsert_after_delete_allowed() {
        let mut l = Ledger::new();
        l.apply_insert(tx("A", false));
        l.apply_insert(tx("B", false));
        l.apply_delete("A");
        assert_eq!(l.apply_insert(tx("A", false)), InsertOutcome::Inserted);
        assert_eq!(l.ids(), vec!["A", "B"]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut l = Ledger::with_capacity(Some(2));
        l.apply_insert(tx("A", false));
        l.apply_insert(tx("B", false));
        assert_eq!(l.apply_insert(tx("C", false)), InsertOutcome::InsertedEvicting(1));
        assert_eq!(l.ids(), vec!["C", "B"]);
        // Evicted ids are free again.
        assert!(!l.contains("A"));
        l.load_snapshot(vec![tx("1", false), tx("2", false), tx("3", false)]);
        assert_eq!(l.ids(), vec!["1", "2"]);
    }

    #[test]
    fn test_snapshot_drops_repeated_ids() {
        let mut l = Ledger::new();
        l.load_snapshot(vec![tx("A", false), tx("A", true), tx("B", false)]);
        assert_eq!(l.ids(), vec!["A", "B"]);
        assert!(!l.get("A").unwrap().is_fraud);
    }

    #[test]
    fn test_stats() {
        let mut l = Ledger::new();
        assert_eq!(l.stats().mean_risk, 0.0);
        l.load_snapshot(vec![tx("A", true), tx("B", false), tx("C", false), tx("D", true)]);
        let s = l.stats();
        assert_eq!(s.total, 4);
        assert_eq!(s.fraud, 2);
        assert_eq!(s.clean, 2);
        assert!((s.mean_risk - 0.5).abs() < 1e-12);
    }
}
