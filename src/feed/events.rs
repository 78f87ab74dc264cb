use std::sync::Arc;

use crate::types::Transaction;

/// One typed change to the transaction ledger.
///
/// `Snapshot` never arrives over the push channel; it is produced once from
/// the initial fetch so every ledger mutation flows through the same type.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Snapshot(Vec<Arc<Transaction>>),
    Inserted(Arc<Transaction>),
    Deleted(String),
    Cleared,
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Snapshot(_) => "snapshot",
            StreamEvent::Inserted(_) => "inserted",
            StreamEvent::Deleted(_) => "deleted",
            StreamEvent::Cleared => "cleared",
        }
    }

    pub fn snapshot(items: Vec<Transaction>) -> Self {
        StreamEvent::Snapshot(items.into_iter().map(Arc::new).collect())
    }

    pub fn inserted(item: Transaction) -> Self {
        StreamEvent::Inserted(Arc::new(item))
    }
}
