//! Structured JSON-lines logging.
//!
//! Every record is one JSON object on one line:
//! `{"ts", "run_id", "seq", "lvl", "component", "event", "msg", ..., "data"}`.
//! Records go to stdout and, when `LOG_DIR` is set, to
//! `<LOG_DIR>/<run_id>/events.jsonl` (trace/debug to `trace.jsonl`).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Stream,   // Push-connection lifecycle
    Decode,   // Frame decoding
    Ledger,   // Snapshot/insert/delete/clear application
    Alert,    // Fraud alert raise/expire/dismiss
    Simulate, // Debounced what-if scoring
    Api,      // Request/response calls
    System,   // Startup, shutdown
    Profile,  // Timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Stream => "stream",
            Domain::Decode => "decode",
            Domain::Ledger => "ledger",
            Domain::Alert => "alert",
            Domain::Simulate => "simulate",
            Domain::Api => "api",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Sequence counter and run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct FileSinks {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    sinks: Option<FileSinks>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let sinks = std::env::var("LOG_DIR")
            .ok()
            .and_then(|base| open_sinks(PathBuf::from(base).join(&run_id), &run_id));
        RunContext { run_id, sinks }
    })
}

fn open_sinks(run_dir: PathBuf, run_id: &str) -> Option<FileSinks> {
    if let Err(err) = create_dir_all(&run_dir) {
        eprintln!("[log] failed to create run dir: {}", err);
        return None;
    }
    let _ = std::fs::write(
        run_dir.join("manifest.json"),
        json!({
            "run_id": run_id,
            "ts": ts_now(),
            "pid": process::id(),
            "log_dir": run_dir.to_string_lossy(),
        })
        .to_string(),
    );
    let open = |name: &str| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join(name))
            .map_err(|err| eprintln!("[log] failed to open {}: {}", name, err))
            .ok()
    };
    Some(FileSinks {
        events: Mutex::new(BufWriter::new(open("events.jsonl")?)),
        trace: Mutex::new(BufWriter::new(open("trace.jsonl")?)),
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in [
        "authorization",
        "Authorization",
        "token",
        "access_token",
        "password",
    ] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["tx_id", "generation", "state", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let line = render_record(level, domain.as_str(), event, fields);
    let ctx = ensure_run_context();
    if let Some(sinks) = &ctx.sinks {
        match level {
            Level::Trace | Level::Debug => write_line(&sinks.trace, &line),
            _ => write_line(&sinks.events, &line),
        }
    }
    println!("{}", line);
}

fn render_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) -> String {
    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry).to_string()
}

pub fn info(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Info, domain, event, fields);
}

pub fn warn(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Warn, domain, event, fields);
}

pub fn debug(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Debug, domain, event, fields);
}

// =============================================================================
// Domain helpers
// =============================================================================

/// Connection state change on the push channel
pub fn log_connection(state: &str, url: &str, error: Option<&str>) {
    let level = if error.is_some() { Level::Warn } else { Level::Info };
    log(
        level,
        Domain::Stream,
        "connection",
        obj(&[
            ("state", v_str(state)),
            ("url", v_str(url)),
            ("error", error.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

/// A frame that could not be decoded; the connection stays up
pub fn log_decode_failure(reason: &str, raw: &str) {
    // Frames can be large; keep a prefix for diagnosis.
    let preview: String = raw.chars().take(256).collect();
    log(
        Level::Warn,
        Domain::Decode,
        "decode_failure",
        obj(&[("reason", v_str(reason)), ("raw", v_str(&preview))]),
    );
}

/// Ledger mutation summary
pub fn log_ledger_apply(op: &str, tx_id: Option<&str>, outcome: &str, len: usize) {
    log(
        Level::Debug,
        Domain::Ledger,
        op,
        obj(&[
            ("tx_id", tx_id.map(v_str).unwrap_or(Value::Null)),
            ("outcome", v_str(outcome)),
            ("len", json!(len)),
        ]),
    );
}

/// Fraud alert lifecycle
pub fn log_alert(event: &str, tx_id: &str, risk_score: f64) {
    log(
        Level::Info,
        Domain::Alert,
        event,
        obj(&[("tx_id", v_str(tx_id)), ("risk_score", v_num(risk_score))]),
    );
}

/// Simulation call lifecycle
pub fn log_simulation(event: &str, generation: u64, fields: &[(&str, Value)]) {
    let mut map = obj(fields);
    map.insert("generation".to_string(), json!(generation));
    let level = if event.ends_with("failed") { Level::Warn } else { Level::Debug };
    log(level, Domain::Simulate, event, map);
}

/// Remote call failure
pub fn log_api_error(endpoint: &str, error: &str) {
    log(
        Level::Warn,
        Domain::Api,
        "request_failed",
        obj(&[("endpoint", v_str(endpoint)), ("error", v_str(error))]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self {
            label,
            context: Some(obj(fields)),
            started: Instant::now(),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Log Aggregator for Periodic Summaries
// =============================================================================

static AGGREGATOR: OnceLock<Mutex<LogAggregator>> = OnceLock::new();

fn get_aggregator() -> &'static Mutex<LogAggregator> {
    AGGREGATOR.get_or_init(|| Mutex::new(LogAggregator::new()))
}

struct LogAggregator {
    inserts: u64,
    deletes: u64,
    clears: u64,
    decode_failures: u64,
    alerts: u64,
    last_flush: Instant,
    flush_interval_secs: u64,
}

impl LogAggregator {
    fn new() -> Self {
        Self {
            inserts: 0,
            deletes: 0,
            clears: 0,
            decode_failures: 0,
            alerts: 0,
            last_flush: Instant::now(),
            flush_interval_secs: std::env::var("LOG_FLUSH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    fn increment(&mut self, event: &str) {
        match event {
            "inserted" => self.inserts += 1,
            "deleted" => self.deletes += 1,
            "cleared" => self.clears += 1,
            "decode_failure" => self.decode_failures += 1,
            "alert" => self.alerts += 1,
            _ => {}
        }
    }

    fn maybe_flush(&mut self) -> Option<Map<String, Value>> {
        if self.last_flush.elapsed().as_secs() < self.flush_interval_secs {
            return None;
        }
        let out = obj(&[
            ("inserted", json!(self.inserts)),
            ("deleted", json!(self.deletes)),
            ("cleared", json!(self.clears)),
            ("decode_failures", json!(self.decode_failures)),
            ("alerts", json!(self.alerts)),
        ]);
        *self = LogAggregator {
            flush_interval_secs: self.flush_interval_secs,
            ..LogAggregator::new()
        };
        Some(out)
    }
}

/// Call periodically to emit aggregated stream stats
pub fn tick_aggregator() {
    if let Ok(mut agg) = get_aggregator().lock() {
        if let Some(fields) = agg.maybe_flush() {
            log(Level::Info, Domain::System, "aggregated_stats", fields);
        }
    }
}

/// Increment a counter in the aggregator
pub fn agg_increment(event: &str) {
    if let Ok(mut agg) = get_aggregator().lock() {
        agg.increment(event);
    }
}

// =============================================================================
// Tests
// =============================================================================
