use log::kv::{self, Key, Value, Visitor};
use log::{Log, Metadata, Record, SetLoggerError};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static CURRENT_RUN_ID: RefCell<Option<String>> = RefCell::new(None);
}

/// Sets the current run ID for the calling thread. Every worker task should
/// set this before doing any phase work so log lines self-correlate.
pub fn set_current_run_id(run_id: String) {
    CURRENT_RUN_ID.with(|id_cell| {
        *id_cell.borrow_mut() = Some(run_id);
    });
}

pub fn clear_current_run_id() {
    CURRENT_RUN_ID.with(|id_cell| {
        *id_cell.borrow_mut() = None;
    });
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonLogRecord {
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub run_id: Option<String>,
    pub name: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

struct JsonLogger;

struct KeyValueCollector<'a>(&'a mut HashMap<String, serde_json::Value>);

impl<'a> Visitor<'a> for KeyValueCollector<'a> {
    fn visit_pair(&mut self, key: Key<'a>, value: Value<'a>) -> Result<(), kv::Error> {
        self.0
            .insert(key.as_str().to_string(), json!(value.to_string()));
        Ok(())
    }
}

impl Log for JsonLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let run_id = CURRENT_RUN_ID.with(|id_cell| id_cell.borrow().clone());

        let mut extra_fields = HashMap::new();
        let mut collector = KeyValueCollector(&mut extra_fields);
        if let Err(e) = record.key_values().visit(&mut collector) {
            eprintln!("error visiting log key-value pairs: {:?}", e);
        }

        let log_record = JsonLogRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: record.level().to_string(),
            message: format!("{}", record.args()),
            run_id,
            name: record.target().to_string(),
            module_path: record.module_path().map(|s| s.to_string()),
            file: record.file().map(|s| s.to_string()),
            line: record.line(),
            extra: extra_fields,
        };

        println!(
            "{}",
            serde_json::to_string(&log_record).expect("log record must serialize to JSON")
        );
    }

    fn flush(&self) {}
}

static LOGGER: JsonLogger = JsonLogger;
static INIT_LOGGER_ONCE: OnceCell<()> = OnceCell::new();

/// Initializes the process-wide JSON logger. Safe to call more than once;
/// only the first call takes effect.
pub fn init_logger() -> Result<(), SetLoggerError> {
    INIT_LOGGER_ONCE
        .get_or_try_init(|| {
            log::set_logger(&LOGGER)?;
            log::set_max_level(log::LevelFilter::Info);
            Ok(())
        })
        .map(|_| ())
}

/// Logs a run phase transition (`queued` -> `starting` -> ... -> `done`/`failed`).
/// Sets the thread-local run id context from `run_id` first so the emitted
/// line self-correlates regardless of whether the caller already set it.
pub fn log_phase_transition(run_id: &str, status: &str, pct: u8, step: &str) {
    set_current_run_id(run_id.to_string());
    log::info!(
        target: "mailtrace::run",
        status = status,
        pct = pct,
        step = step;
        "run phase transition"
    );
}

/// Logs a heartbeat tick emitted by a live matching worker.
pub fn log_heartbeat(run_id: &str, message: &str) {
    set_current_run_id(run_id.to_string());
    log::info!(target: "mailtrace::run", message = message; "heartbeat");
}
