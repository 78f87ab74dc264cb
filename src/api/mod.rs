use async_trait::async_trait;

use crate::errors::ApiError;
use crate::types::{
    Analytics, AuditPage, Features, SimulationResult, Transaction, TransactionInput,
    TransactionPage,
};

mod http;
pub mod retry;

pub use http::HttpFraudApi;

/// Request/response side of the fraud service.
#[async_trait]
pub trait FraudApi: Send + Sync {
    /// `GET /fraud/transactions?skip&limit`
    async fn fetch_transactions(&self, skip: usize, limit: usize) -> Result<TransactionPage, ApiError>;
    /// `DELETE /fraud/transactions/{id}`
    async fn delete_transaction(&self, id: &str) -> Result<(), ApiError>;
    /// `POST /fraud/simulate`
    async fn simulate(&self, features: &Features) -> Result<SimulationResult, ApiError>;
    /// `POST /fraud/transactions`; the scored record also arrives on the push channel.
    async fn submit_transaction(&self, input: &TransactionInput) -> Result<Transaction, ApiError>;
    /// `GET /logs/?skip&limit`
    async fn fetch_logs(&self, skip: usize, limit: usize) -> Result<AuditPage, ApiError>;
    /// `GET /logs/analytics`
    async fn fetch_analytics(&self) -> Result<Analytics, ApiError>;
}
