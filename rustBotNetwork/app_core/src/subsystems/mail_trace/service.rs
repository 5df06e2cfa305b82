use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tokio::sync::Mutex;

use super::aggregator;
use super::contracts::{
    Mapping, ResultPayloadV1, RunListItemV1, RunListPageV1, RunStatus, RunStatusSnapshotV1, Source,
    UploadRawResultV1,
};
use super::errors::MailTraceError;
use super::mapping;
use super::run::{self, RunHandle, Stores};
use super::store::{InMemoryStore, MappingStore, MatchStoreTrait, RawStore, RunStore, StagingStore};

/// # NDOC
/// component: `subsystems::mail_trace::service`
/// purpose: The nine §6 boundary operations as a single `async_trait`,
///   wiring C1-C9 behind one object callers inject, in place of the
///   source's module-level singletons (§9).

#[async_trait]
pub trait MailTraceService: Send + Sync {
    async fn create_run(&self, user_id: &str) -> Result<String, MailTraceError>;
    async fn upload_raw(
        &self,
        run_id: &str,
        user_id: &str,
        source: Source,
        csv_bytes: &[u8],
    ) -> Result<UploadRawResultV1, MailTraceError>;
    async fn save_mapping(&self, run_id: &str, user_id: &str, source: Source, mapping: Mapping) -> Result<(), MailTraceError>;
    async fn get_headers(
        &self,
        run_id: &str,
        source: Source,
        sample_n: usize,
    ) -> Result<(Vec<String>, Vec<HashMap<String, String>>), MailTraceError>;
    async fn get_mapping(&self, run_id: &str, source: Source) -> Result<Mapping, MailTraceError>;
    async fn start_pipeline(&self, run_id: &str, user_id: &str) -> Result<(), MailTraceError>;
    async fn status(&self, run_id: &str) -> Result<RunStatusSnapshotV1, MailTraceError>;
    async fn result(&self, run_id: &str, user_id: &str) -> Result<ResultPayloadV1, MailTraceError>;
    async fn latest_run(&self, user_id: &str, only_done: bool) -> Result<Option<RunStatusSnapshotV1>, MailTraceError>;
    async fn list_runs(&self, user_id: &str, limit: usize, cursor: Option<String>) -> Result<RunListPageV1, MailTraceError>;
}

/// Parses a CSV byte stream per the §6 contract: UTF-8 (lossy on bad
/// bytes), comma-delimited, RFC4180 quoting, header row first.
fn parse_csv(csv_bytes: &[u8]) -> Result<Vec<HashMap<String, String>>, MailTraceError> {
    let text = String::from_utf8_lossy(csv_bytes);
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| MailTraceError::bad_request(format!("invalid CSV header: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| MailTraceError::bad_request(format!("invalid CSV row: {e}")))?;
        let mut row = HashMap::with_capacity(headers.len());
        for (header, value) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), value.to_string());
        }
        rows.push(row);
    }
    Ok(rows)
}

pub struct DefaultMailTraceService {
    stores: Arc<Stores>,
    /// Keeps each run's cancellation sender alive for the run's lifetime;
    /// without this the handle returned by `run::start_pipeline` would
    /// drop at the end of `start_pipeline` and close the worker's cancel
    /// channel prematurely.
    handles: Mutex<HashMap<String, RunHandle>>,
}

impl DefaultMailTraceService {
    pub fn new_in_memory() -> Self {
        let store = InMemoryStore::new();
        Self {
            stores: Arc::new(Stores {
                runs: store.clone(),
                raw: store.clone(),
                mappings: store.clone(),
                staging: store.clone(),
                matches: store,
            }),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_stores(stores: Arc<Stores>) -> Self {
        Self { stores, handles: Mutex::new(HashMap::new()) }
    }

    async fn assert_owner(&self, run_id: &str, user_id: &str) -> Result<super::contracts::Run, MailTraceError> {
        let run = self.stores.runs.get_run(run_id).await?;
        if run.user_id != user_id {
            return Err(MailTraceError::unauthorized("run does not belong to caller"));
        }
        Ok(run)
    }

    fn snapshot(run: &super::contracts::Run) -> RunStatusSnapshotV1 {
        RunStatusSnapshotV1 {
            run_id: run.id.clone(),
            status: run.status,
            pct: run.pct,
            step: run.step.clone(),
            message: run.message.clone(),
        }
    }
}

#[async_trait]
impl MailTraceService for DefaultMailTraceService {
    async fn create_run(&self, user_id: &str) -> Result<String, MailTraceError> {
        let run = self.stores.runs.create_or_reuse_run(user_id).await?;
        Ok(run.id)
    }

    async fn upload_raw(
        &self,
        run_id: &str,
        user_id: &str,
        source: Source,
        csv_bytes: &[u8],
    ) -> Result<UploadRawResultV1, MailTraceError> {
        let mut run = self.assert_owner(run_id, user_id).await?;
        if matches!(run.status, RunStatus::Matching | RunStatus::Aggregating) {
            return Err(MailTraceError::conflict("run is currently matching or aggregating"));
        }

        let rows = parse_csv(csv_bytes)?;
        let raw_count = mapping::ingest_raw(self.stores.raw.as_ref(), run_id, user_id, source, rows).await?;
        let (sample_headers, sample_rows) = mapping::headers_sample(self.stores.raw.as_ref(), run_id, source, 5).await?;

        match source {
            Source::Mail => run.mail_count = raw_count,
            Source::Crm => run.crm_count = raw_count,
        }
        self.stores.runs.save_run(run).await?;

        Ok(UploadRawResultV1 {
            state: "raw_only".to_string(),
            raw_count,
            sample_headers,
            sample_rows,
        })
    }

    async fn save_mapping(&self, run_id: &str, user_id: &str, source: Source, mapping: Mapping) -> Result<(), MailTraceError> {
        self.assert_owner(run_id, user_id).await?;
        run::save_mapping(&self.stores, run_id, source, mapping).await
    }

    async fn get_headers(
        &self,
        run_id: &str,
        source: Source,
        sample_n: usize,
    ) -> Result<(Vec<String>, Vec<HashMap<String, String>>), MailTraceError> {
        mapping::headers_sample(self.stores.raw.as_ref(), run_id, source, sample_n).await
    }

    async fn get_mapping(&self, run_id: &str, source: Source) -> Result<Mapping, MailTraceError> {
        self.stores.mappings.get_mapping(run_id, source).await
    }

    async fn start_pipeline(&self, run_id: &str, user_id: &str) -> Result<(), MailTraceError> {
        self.assert_owner(run_id, user_id).await?;
        let handle: RunHandle = run::start_pipeline(self.stores.clone(), run_id.to_string(), user_id.to_string()).await?;
        self.handles.lock().await.insert(run_id.to_string(), handle);
        Ok(())
    }

    async fn status(&self, run_id: &str) -> Result<RunStatusSnapshotV1, MailTraceError> {
        let run = self.stores.runs.get_run(run_id).await?;
        Ok(Self::snapshot(&run))
    }

    async fn result(&self, run_id: &str, user_id: &str) -> Result<ResultPayloadV1, MailTraceError> {
        let run = self.assert_owner(run_id, user_id).await?;
        if run.status != RunStatus::Done {
            return Err(MailTraceError::conflict("result requested before run is done"));
        }
        let mail = self.stores.staging.mail_for_run(run_id).await?;
        let crm = self.stores.staging.crm_for_run(run_id).await?;
        let matches = self.stores.matches.matches_for_run(run_id).await?;
        Ok(aggregator::aggregate(run_id, &mail, &crm, &matches))
    }

    async fn latest_run(&self, user_id: &str, only_done: bool) -> Result<Option<RunStatusSnapshotV1>, MailTraceError> {
        let run = self.stores.runs.latest_run(user_id, only_done).await?;
        Ok(run.as_ref().map(Self::snapshot))
    }

    async fn list_runs(&self, user_id: &str, limit: usize, cursor: Option<String>) -> Result<RunListPageV1, MailTraceError> {
        let (runs, next_cursor) = self.stores.runs.list_runs(user_id, limit, cursor).await?;
        let items = runs
            .into_iter()
            .map(|r| RunListItemV1 {
                id: r.id,
                started_at: r.started_at,
                summary: format!("{} mail / {} crm", r.mail_count, r.crm_count),
                status: r.status,
            })
            .collect();
        Ok(RunListPageV1 { items, next_cursor })
    }
}
