use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::time::{interval, Duration, MissedTickBehavior};

use fraudwatch::api::HttpFraudApi;
use fraudwatch::config::Config;
use fraudwatch::feed::WsConnector;
use fraudwatch::logging::{debug, info, obj, tick_aggregator, v_str, Domain};
use fraudwatch::monitor::Monitor;

const SUMMARY_EVERY: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    cfg.validate()?;

    let mut api = HttpFraudApi::new(&cfg.api_base, Duration::from_secs(cfg.request_timeout_secs))?
        .with_token(cfg.token.clone());
    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        api.login(user, pass)
            .await
            .with_context(|| format!("login as {}", user))?;
    }
    info(
        Domain::System,
        "startup",
        obj(&[
            ("api_base", v_str(&cfg.api_base)),
            ("stream_url", v_str(&cfg.stream_url)),
            ("authenticated", json!(api.has_token())),
            ("reconnect_ms", json!(cfg.reconnect_delay_ms)),
            ("alert_ttl_ms", json!(cfg.alert_ttl_ms)),
        ]),
    );

    let monitor = Monitor::start(&cfg, &api, Arc::new(WsConnector)).await;
    let mut revisions = monitor.store.subscribe();

    let mut summary = interval(SUMMARY_EVERY);
    summary.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = monitor.store.view();
                debug(
                    Domain::Ledger,
                    "revision",
                    obj(&[
                        ("revision", json!(view.revision)),
                        ("len", json!(view.items.len())),
                        ("alert", json!(view.alert.as_ref().map(|t| t.id.clone()))),
                    ]),
                );
            }
            _ = summary.tick() => {
                let view = monitor.store.view();
                let status = monitor.connection().status();
                info(
                    Domain::System,
                    "summary",
                    obj(&[
                        ("state", v_str(status.state.as_str())),
                        ("connects", json!(status.connects)),
                        ("decode_failures", json!(status.decode_failures)),
                        ("total", json!(view.stats.total)),
                        ("fraud", json!(view.stats.fraud)),
                        ("mean_risk", json!(view.stats.mean_risk)),
                    ]),
                );
                tick_aggregator();
            }
        }
    }

    info(Domain::System, "shutdown", obj(&[("msg", v_str("interrupt received"))]));
    monitor.shutdown().await;
    Ok(())
}
