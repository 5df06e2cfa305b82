use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration};

use super::config;
use super::contracts::{Mapping, RunStatus, Source};
use super::dedupe;
use super::errors::MailTraceError;
use super::mapping;
use super::match_store;
use super::aggregator;
use super::staging;
use super::store::{MappingStore, MatchStoreTrait, RawStore, RunStore, StagingStore};
use crate::utils::logger::{clear_current_run_id, log_heartbeat, log_phase_transition, set_current_run_id};

/// # NDOC
/// component: `subsystems::mail_trace::run`
/// purpose: Run state machine and matching worker (C8). `start_pipeline` is
///   the single entry point that sequences phases; nothing upstream
///   triggers matching implicitly. Cancellation is a `watch` channel, not
///   a polled flag, per the replacement for the source's callback-chain
///   and shared-state design (§9).

pub struct Stores {
    pub runs: Arc<dyn RunStore>,
    pub raw: Arc<dyn RawStore>,
    pub mappings: Arc<dyn MappingStore>,
    pub staging: Arc<dyn StagingStore>,
    pub matches: Arc<dyn MatchStoreTrait>,
}

/// A handle to a live worker; dropping it (or sending on `cancel`) asks the
/// worker to stop after its current CRM row.
pub struct RunHandle {
    pub cancel: watch::Sender<bool>,
}

impl RunHandle {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Validates both sides' mappings against their raw headers and reports,
/// per source, the canonical fields still unsatisfied. Empty on both sides
/// means the run may proceed.
pub async fn check_readiness(
    stores: &Stores,
    run_id: &str,
) -> Result<(Vec<String>, Vec<String>), MailTraceError> {
    let mail_headers: Vec<String> = stores
        .raw
        .get_raw_rows(run_id, Source::Mail)
        .await?
        .first()
        .map(|r| r.data.keys().cloned().collect())
        .unwrap_or_default();
    let crm_headers: Vec<String> = stores
        .raw
        .get_raw_rows(run_id, Source::Crm)
        .await?
        .first()
        .map(|r| r.data.keys().cloned().collect())
        .unwrap_or_default();

    let mail_mapping = stores.mappings.get_mapping(run_id, Source::Mail).await?;
    let crm_mapping = stores.mappings.get_mapping(run_id, Source::Crm).await?;

    let missing_mail = mapping::check_mapping(Source::Mail, &mail_headers, &mail_mapping);
    let missing_crm = mapping::check_mapping(Source::Crm, &crm_headers, &crm_mapping);
    Ok((missing_mail, missing_crm))
}

/// Sequences `starting -> normalizing_mail -> mail_ready -> normalizing_crm
/// -> crm_ready`, then spawns the matching worker. Returns the handle the
/// caller uses to cancel, and immediately returns control; phase
/// transitions after this point happen on the worker task.
pub async fn start_pipeline(stores: Arc<Stores>, run_id: String, user_id: String) -> Result<RunHandle, MailTraceError> {
    let (missing_mail, missing_crm) = check_readiness(&stores, &run_id).await?;
    if !missing_mail.is_empty() || !missing_crm.is_empty() {
        return Err(MailTraceError::conflict("mapping incomplete").with_context(serde_json::json!({
            "missing": { "mail": missing_mail, "crm": missing_crm }
        })));
    }

    let mut run = stores.runs.get_run(&run_id).await?;
    run.set_status(RunStatus::Starting, "starting run");
    stores.runs.save_run(run.clone()).await?;
    log_phase_transition(&run_id, "starting", 5, "starting run");

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let worker_stores = stores.clone();
    let worker_run_id = run_id.clone();
    let worker_user_id = user_id.clone();
    tokio::spawn(async move {
        run_worker(worker_stores, worker_run_id, worker_user_id, cancel_rx).await;
    });

    Ok(RunHandle { cancel: cancel_tx })
}

async fn set_status(stores: &Stores, run_id: &str, status: RunStatus, message: &str) -> Result<(), MailTraceError> {
    let mut run = stores.runs.get_run(run_id).await?;
    run.set_status(status, message);
    stores.runs.save_run(run.clone()).await?;
    let (pct, step) = status.anchor();
    log_phase_transition(run_id, &format!("{status:?}"), pct, step);
    Ok(())
}

async fn fail_run(stores: &Stores, run_id: &str, message: &str) {
    if let Ok(mut run) = stores.runs.get_run(run_id).await {
        run.set_status(RunStatus::Failed, message);
        let _ = stores.runs.save_run(run).await;
    }
}

async fn normalize_source(
    stores: &Stores,
    run_id: &str,
    user_id: &str,
    source: Source,
) -> Result<u64, MailTraceError> {
    let mapping = stores.mappings.get_mapping(run_id, source).await?;
    let raw = stores.raw.get_raw_rows(run_id, source).await?;
    let canon_rows = mapping::apply_mapping(&raw, &mapping, source);
    staging::normalize_and_stage(
        stores.staging.as_ref(),
        run_id,
        user_id,
        source,
        canon_rows,
        config::staging_batch_size(),
    )
    .await
}

/// Body of the spawned matching worker. Never returns an error to its
/// caller: any failure is recorded on the run as `failed` and the task
/// simply ends, per §7's "worker never leaks exceptions upward".
async fn run_worker(stores: Arc<Stores>, run_id: String, user_id: String, mut cancel: watch::Receiver<bool>) {
    if let Err(e) = run_worker_inner(&stores, &run_id, &user_id, &mut cancel).await {
        set_current_run_id(run_id.clone());
        log::warn!(target: "mailtrace::run", reason = e.message.as_str(); "run failed");
        clear_current_run_id();
        fail_run(&stores, &run_id, &e.message).await;
    }
}

async fn run_worker_inner(
    stores: &Stores,
    run_id: &str,
    user_id: &str,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), MailTraceError> {
    set_status(stores, run_id, RunStatus::NormalizingMail, "reading mail raw").await?;
    set_status(stores, run_id, RunStatus::MailInserting, "writing mail staging").await?;
    normalize_source(stores, run_id, user_id, Source::Mail).await?;
    set_status(stores, run_id, RunStatus::MailReady, "mail normalized").await?;

    set_status(stores, run_id, RunStatus::NormalizingCrm, "reading crm raw").await?;
    set_status(stores, run_id, RunStatus::CrmInserting, "writing crm staging").await?;
    normalize_source(stores, run_id, user_id, Source::Crm).await?;
    set_status(stores, run_id, RunStatus::CrmReady, "crm normalized").await?;

    if !dedupe::pair_ready(stores.staging.as_ref(), run_id).await? {
        return Err(MailTraceError::conflict("both sides must have staged rows before matching"));
    }

    set_status(stores, run_id, RunStatus::Matching, "linking mail and crm").await?;

    let heartbeat_run_id = run_id.to_string();
    let mut ticker = interval(Duration::from_secs(config::heartbeat_interval_secs()));
    let mail = stores.staging.mail_for_run(run_id).await?;
    let crm = stores.staging.crm_for_run(run_id).await?;

    tokio::select! {
        result = match_store::match_and_store(stores.matches.as_ref(), user_id, &mail, &crm) => {
            let (_written, _excluded) = result?;
        }
        _ = async {
            loop {
                ticker.tick().await;
                log_heartbeat(&heartbeat_run_id, "matching in progress");
            }
        } => unreachable!("heartbeat loop never returns"),
        _ = cancel.changed() => {
            if *cancel.borrow() {
                return Err(MailTraceError::internal("cancelled"));
            }
        }
    }

    set_status(stores, run_id, RunStatus::Aggregating, "aggregating results").await?;
    let mail = stores.staging.mail_for_run(run_id).await?;
    let crm = stores.staging.crm_for_run(run_id).await?;
    let matches = stores.matches.matches_for_run(run_id).await?;
    let _ = aggregator::aggregate(run_id, &mail, &crm, &matches);

    set_status(stores, run_id, RunStatus::Done, "run complete").await?;
    Ok(())
}

/// Thin wrapper kept alongside `start_pipeline` for callers that only need
/// to persist a mapping before checking readiness (used by `service`).
pub async fn save_mapping(stores: &Stores, run_id: &str, source: Source, mapping: Mapping) -> Result<(), MailTraceError> {
    stores.mappings.save_mapping(run_id, source, mapping).await
}
