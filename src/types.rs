use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed-shape feature record scored by the fraud model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub amount: f64,
    pub user_age_days: i64,
    /// In [0, 1].
    pub device_trust_score: f64,
    pub velocity_1h: i64,
    pub distance_from_home: f64,
}

impl Default for Features {
    // Starting point of the what-if simulator.
    fn default() -> Self {
        Self {
            amount: 250.0,
            user_age_days: 365,
            device_trust_score: 0.9,
            velocity_1h: 2,
            distance_from_home: 5.0,
        }
    }
}

impl Features {
    /// Set one named feature from its textual value.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), String> {
        let value = value.trim();
        let bad = |e: &dyn std::fmt::Display| format!("{}={}: {}", name, value, e);
        match name {
            "amount" => self.amount = value.parse().map_err(|e| bad(&e))?,
            "user_age_days" => self.user_age_days = parse_count(name, value)?,
            "device_trust_score" => {
                let v: f64 = value.parse().map_err(|e| bad(&e))?;
                if !(0.0..=1.0).contains(&v) {
                    return Err(format!("device_trust_score out of range: {}", v));
                }
                self.device_trust_score = v;
            }
            "velocity_1h" => self.velocity_1h = parse_count(name, value)?,
            "distance_from_home" => self.distance_from_home = value.parse().map_err(|e| bad(&e))?,
            other => return Err(format!("unknown feature: {}", other)),
        }
        Ok(())
    }
}

/// Counts on the wire are plain integers; values typed in by hand must not
/// be negative.
fn parse_count(name: &str, value: &str) -> Result<i64, String> {
    let n: i64 = value
        .parse()
        .map_err(|e| format!("{}={}: {}", name, value, e))?;
    if n < 0 {
        return Err(format!("{} must not be negative: {}", name, n));
    }
    Ok(n)
}

/// One (feature, contribution, value) triple, ordered by impact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub feature: String,
    pub contribution: f64,
    pub value: f64,
}

/// A scored transaction as emitted by the server. Never mutated client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub features: Features,
    pub is_fraud: bool,
    pub risk_score: f64,
    pub timestamp: String,
    #[serde(default)]
    pub explanations: Vec<Explanation>,
}

impl Transaction {
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        parse_server_ts(&self.timestamp)
    }
}

/// Server timestamps are naive ISO-8601 with a literal `Z` suffix.
pub fn parse_server_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Response of `POST /fraud/simulate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub is_fraud: bool,
    pub risk_score: f64,
    #[serde(default)]
    pub explanations: Vec<Explanation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionInput {
    pub user_id: String,
    pub features: Features,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub message: String,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Transaction,
    DaoVerification,
    Other,
}

impl AuditKind {
    fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("TRANSACTION") => AuditKind::Transaction,
            Some("DAO_VERIFICATION") => AuditKind::DaoVerification,
            _ => AuditKind::Other,
        }
    }
}

/// One row of the unified audit log. Verification rows carry free-form
/// features, so the full record is kept as `raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub id: String,
    pub user_id: String,
    pub timestamp: String,
    pub is_fraud: bool,
    pub raw: Value,
}

impl AuditEntry {
    pub fn from_value(raw: Value) -> Option<Self> {
        let o = raw.as_object()?;
        let text = |k: &str| o.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
        let id = text("id");
        if id.is_empty() {
            return None;
        }
        Some(Self {
            kind: AuditKind::from_tag(o.get("type").and_then(Value::as_str)),
            user_id: text("user_id"),
            timestamp: text("timestamp"),
            is_fraud: o.get("is_fraud").and_then(Value::as_bool).unwrap_or(false),
            id,
            raw,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Analytics {
    pub total_transactions: u64,
    pub total_fraud_detected: u64,
    pub clean_transactions: u64,
    pub fraud_rate: f64,
}
