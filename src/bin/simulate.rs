//! Interactive what-if scoring against the fraud model.
//!
//! Usage:
//!   simulate < changes.txt
//!
//! Input, one per line:
//!   <feature>=<value>     - change one parameter (amount, user_age_days,
//!                           device_trust_score, velocity_1h, distance_from_home)
//!   submit <user_id>      - score the current parameters as a real transaction
//!   logs [limit]          - print the most recent audit entries
//!   analytics             - print aggregate counts
//!
//! Parameter changes are debounced; each accepted result is printed as one
//! JSON line.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::Duration;

use fraudwatch::api::{FraudApi, HttpFraudApi};
use fraudwatch::coalescer::{SimulationCoalescer, SimulationView};
use fraudwatch::config::Config;
use fraudwatch::logging::{log_api_error, obj, v_str, warn, Domain};
use fraudwatch::types::{Features, TransactionInput};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    cfg.validate()?;

    let mut http = HttpFraudApi::new(&cfg.api_base, Duration::from_secs(cfg.request_timeout_secs))?
        .with_token(cfg.token.clone());
    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        http.login(user, pass).await?;
    }
    let api: Arc<dyn FraudApi> = Arc::new(http);

    let coalescer = SimulationCoalescer::spawn(Arc::clone(&api), cfg.debounce());
    let printer = tokio::spawn(print_results(coalescer.subscribe()));

    let mut params = Features::default();
    coalescer.submit(params);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut words = line.split_whitespace();
        match words.next() {
            Some("submit") => {
                let user_id = words.next().unwrap_or("sim-user").to_string();
                submit(api.as_ref(), user_id, params).await;
            }
            Some("logs") => {
                let limit = words.next().and_then(|v| v.parse().ok()).unwrap_or(10);
                print_logs(api.as_ref(), limit).await;
            }
            Some("analytics") => match api.fetch_analytics().await {
                Ok(a) => println!(
                    "{}",
                    json!({
                        "total_transactions": a.total_transactions,
                        "total_fraud_detected": a.total_fraud_detected,
                        "clean_transactions": a.clean_transactions,
                        "fraud_rate": a.fraud_rate,
                    })
                ),
                Err(err) => log_api_error("GET /logs/analytics", &err.to_string()),
            },
            _ => match apply_change(&mut params, line) {
                Ok(()) => {
                    coalescer.submit(params);
                }
                Err(reason) => warn(
                    Domain::Simulate,
                    "bad_input",
                    obj(&[("line", v_str(line)), ("msg", v_str(&reason))]),
                ),
            },
        }
    }

    // Let the last change settle so its result is printed.
    let _ = tokio::time::timeout(Duration::from_secs(30), coalescer.settled()).await;
    coalescer.shutdown().await;
    let _ = printer.await;
    Ok(())
}

fn apply_change(params: &mut Features, line: &str) -> Result<(), String> {
    let (name, value) = line
        .split_once('=')
        .ok_or_else(|| format!("expected <feature>=<value>, got {:?}", line))?;
    params.set(name.trim(), value)
}

async fn submit(api: &dyn FraudApi, user_id: String, features: Features) {
    let input = TransactionInput { user_id, features };
    match api.submit_transaction(&input).await {
        Ok(tx) => println!(
            "{}",
            json!({
                "submitted": tx.id,
                "is_fraud": tx.is_fraud,
                "risk_score": tx.risk_score,
            })
        ),
        Err(err) => log_api_error("POST /fraud/transactions", &err.to_string()),
    }
}

async fn print_logs(api: &dyn FraudApi, limit: usize) {
    match api.fetch_logs(0, limit).await {
        Ok(page) => {
            for entry in page.entries {
                println!(
                    "{}",
                    json!({
                        "kind": format!("{:?}", entry.kind),
                        "id": entry.id,
                        "timestamp": entry.timestamp,
                        "is_fraud": entry.is_fraud,
                    })
                );
            }
        }
        Err(err) => log_api_error("GET /logs/", &err.to_string()),
    }
}

async fn print_results(mut rx: watch::Receiver<SimulationView>) {
    let mut printed = 0;
    while rx.changed().await.is_ok() {
        let view = rx.borrow_and_update().clone();
        if view.result_generation > printed {
            printed = view.result_generation;
            if let Some(result) = view.result {
                println!(
                    "{}",
                    json!({
                        "generation": printed,
                        "params": view.params,
                        "is_fraud": result.is_fraud,
                        "risk_score": result.risk_score,
                        "explanations": result.explanations,
                    })
                );
            }
        }
    }
}
