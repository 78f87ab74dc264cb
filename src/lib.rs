//! Client core of a live fraud-detection dashboard: push-channel handling,
//! a reconciled transaction ledger, fraud alerts, and debounced what-if
//! scoring against the remote model.

pub mod alert;
pub mod api;
pub mod coalescer;
pub mod config;
pub mod errors;
pub mod feed;
pub mod ledger;
pub mod logging;
pub mod monitor;
pub mod store;
pub mod types;
