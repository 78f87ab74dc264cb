use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::errors::ApiError;
use crate::logging::{log_api_error, ProfileScope};
use crate::types::{
    Analytics, AuditEntry, AuditPage, Features, LoginResponse, SimulationResult, SubmitResponse,
    Transaction, TransactionInput, TransactionPage,
};

use super::FraudApi;

#[derive(Clone)]
pub struct HttpFraudApi {
    client: Client,
    base: String,
    token: Option<String>,
}

impl HttpFraudApi {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// `POST /auth/login` (form encoded). Keeps the bearer token for later calls.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ApiError> {
        let endpoint = "POST /auth/login";
        let req = self
            .request(Method::POST, "/auth/login")
            .form(&[("username", username), ("password", password)]);
        let resp = self.send(endpoint, req).await?;
        let body: LoginResponse = read_json(endpoint, resp).await?;
        self.token = Some(body.access_token);
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base, path);
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, endpoint: &str, req: RequestBuilder) -> Result<Response, ApiError> {
        let _scope = ProfileScope::with_context("http_request", &[("endpoint", json!(endpoint))]);
        req.send().await.map_err(|err| {
            log_api_error(endpoint, &err.to_string());
            ApiError::from(err)
        })
    }
}

async fn read_json<T: DeserializeOwned>(endpoint: &str, resp: Response) -> Result<T, ApiError> {
    let resp = check_status(endpoint, resp).await?;
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Body {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

async fn check_status(endpoint: &str, resp: Response) -> Result<Response, ApiError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    log_api_error(endpoint, &format!("status {}", status));
    Err(ApiError::status(endpoint, status, body))
}

#[async_trait]
impl FraudApi for HttpFraudApi {
    async fn fetch_transactions(&self, skip: usize, limit: usize) -> Result<TransactionPage, ApiError> {
        let endpoint = "GET /fraud/transactions";
        let req = self
            .request(Method::GET, "/fraud/transactions")
            .query(&[("skip", skip), ("limit", limit)]);
        let resp = self.send(endpoint, req).await?;
        read_json(endpoint, resp).await
    }

    async fn delete_transaction(&self, id: &str) -> Result<(), ApiError> {
        let endpoint = "DELETE /fraud/transactions/{id}";
        let req = self.request(Method::DELETE, &format!("/fraud/transactions/{}", id));
        let resp = self.send(endpoint, req).await?;
        check_status(endpoint, resp).await?;
        Ok(())
    }

    async fn simulate(&self, features: &Features) -> Result<SimulationResult, ApiError> {
        let endpoint = "POST /fraud/simulate";
        let req = self.request(Method::POST, "/fraud/simulate").json(features);
        let resp = self.send(endpoint, req).await?;
        read_json(endpoint, resp).await
    }

    async fn submit_transaction(&self, input: &TransactionInput) -> Result<Transaction, ApiError> {
        let endpoint = "POST /fraud/transactions";
        let req = self.request(Method::POST, "/fraud/transactions").json(input);
        let resp = self.send(endpoint, req).await?;
        let body: SubmitResponse = read_json(endpoint, resp).await?;
        Ok(body.transaction)
    }

    async fn fetch_logs(&self, skip: usize, limit: usize) -> Result<AuditPage, ApiError> {
        #[derive(Deserialize)]
        struct LogsResponse {
            logs: Vec<Value>,
            #[serde(default)]
            total: usize,
            #[serde(default)]
            skip: usize,
            #[serde(default)]
            limit: usize,
        }

        let endpoint = "GET /logs/";
        let req = self
            .request(Method::GET, "/logs/")
            .query(&[("skip", skip), ("limit", limit)]);
        let resp = self.send(endpoint, req).await?;
        let body: LogsResponse = read_json(endpoint, resp).await?;
        Ok(AuditPage {
            entries: body.logs.into_iter().filter_map(AuditEntry::from_value).collect(),
            total: body.total,
            skip: body.skip,
            limit: body.limit,
        })
    }

    async fn fetch_analytics(&self) -> Result<Analytics, ApiError> {
        let endpoint = "GET /logs/analytics";
        let req = self.request(Method::GET, "/logs/analytics");
        let resp = self.send(endpoint, req).await?;
        read_json(endpoint, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_is_normalized() {
        let api = HttpFraudApi::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(api.base, "http://localhost:8000");
        assert!(!api.has_token());
        let api = api.with_token(Some("t".to_string()));
        assert!(api.has_token());
    }

    #[test]
    fn test_request_carries_bearer_token() {
        let api = HttpFraudApi::new("http://localhost:8000", Duration::from_secs(5))
            .unwrap()
            .with_token(Some("abc".to_string()));
        let req = api
            .request(Method::DELETE, "/fraud/transactions/TXN-1")
            .build()
            .unwrap();
        assert_eq!(req.url().as_str(), "http://localhost:8000/fraud/transactions/TXN-1");
        assert_eq!(req.headers()["authorization"], "Bearer abc");
    }
}
