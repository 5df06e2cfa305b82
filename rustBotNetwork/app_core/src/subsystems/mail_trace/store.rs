use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::RwLock;

use super::contracts::{Mapping, MatchRecord, RawRow, Run, RunStatus, Source, StagedCrm, StagedMail};
use super::errors::MailTraceError;

/// # NDOC
/// component: `subsystems::mail_trace::store`
/// purpose: Persistence seams for C3/C4/C6/C8, expressed as object-safe
///   `async_trait`s rather than module-level singletons (§9 design note).
///   `InMemoryStore` backs every trait for this crate's scope; a real
///   deployment swaps in a database-backed implementation without
///   touching C1/C2/C5/C7/C9.

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Reuses the user's most recent non-terminal run, or creates a new
    /// `queued` one. Must be atomic with respect to concurrent callers for
    /// the same `user_id` (§4.8 "at-most-one active run" soft invariant).
    async fn create_or_reuse_run(&self, user_id: &str) -> Result<Run, MailTraceError>;
    async fn get_run(&self, run_id: &str) -> Result<Run, MailTraceError>;
    async fn save_run(&self, run: Run) -> Result<(), MailTraceError>;
    async fn list_runs(&self, user_id: &str, limit: usize, cursor: Option<String>)
        -> Result<(Vec<Run>, Option<String>), MailTraceError>;
    async fn latest_run(&self, user_id: &str, only_done: bool) -> Result<Option<Run>, MailTraceError>;
}

#[async_trait]
pub trait RawStore: Send + Sync {
    /// Replaces raw rows whole for `(run_id, source)`; assigns `rownum`
    /// starting at 1.
    async fn put_raw_rows(
        &self,
        run_id: &str,
        user_id: &str,
        source: Source,
        rows: Vec<HashMap<String, String>>,
    ) -> Result<u64, MailTraceError>;

    async fn get_raw_rows(&self, run_id: &str, source: Source) -> Result<Vec<RawRow>, MailTraceError>;
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn save_mapping(&self, run_id: &str, source: Source, mapping: Mapping) -> Result<(), MailTraceError>;
    async fn get_mapping(&self, run_id: &str, source: Source) -> Result<Mapping, MailTraceError>;
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Unique on `(user_id, mail_key)` globally, not per run: a key already
    /// staged under a different run is rebound to `run_id` (§4.3), not
    /// duplicated.
    async fn upsert_mail(&self, run_id: &str, rows: Vec<StagedMail>) -> Result<u64, MailTraceError>;
    /// Unique on `(user_id, job_index)` globally; same rebind rule as
    /// `upsert_mail`.
    async fn upsert_crm(&self, run_id: &str, rows: Vec<StagedCrm>) -> Result<u64, MailTraceError>;
    async fn mail_for_run(&self, run_id: &str) -> Result<Vec<StagedMail>, MailTraceError>;
    async fn crm_for_run(&self, run_id: &str) -> Result<Vec<StagedCrm>, MailTraceError>;
    async fn mail_count(&self, run_id: &str) -> Result<u64, MailTraceError>;
    async fn crm_count(&self, run_id: &str) -> Result<u64, MailTraceError>;
}

#[async_trait]
pub trait MatchStoreTrait: Send + Sync {
    /// Upserts on `(user_id, job_index)`; overwrites prior rows for
    /// overlapping `job_index` values, leaves unrelated jobs untouched.
    async fn upsert_matches(&self, user_id: &str, rows: Vec<MatchRecord>) -> Result<u64, MailTraceError>;
    async fn matches_for_run(&self, run_id: &str) -> Result<Vec<MatchRecord>, MailTraceError>;
}

#[derive(Default)]
struct InMemoryState {
    runs: HashMap<String, Run>,
    raw: HashMap<(String, &'static str), Vec<RawRow>>,
    mappings: HashMap<(String, &'static str), Mapping>,
    staged_mail: HashMap<(String, String), StagedMail>, // (user_id, mail_key) -> row
    staged_crm: HashMap<(String, String), StagedCrm>,   // (user_id, job_index) -> row
    matches: HashMap<String, HashMap<String, MatchRecord>>,    // user_id -> job_index -> row
}

/// In-memory implementation of every store trait, guarded by a single
/// `RwLock`. Sufficient for one process; not a substitute for a real
/// transactional store in production, which is exactly the point of
/// keeping these behind traits.
pub struct InMemoryStore {
    state: RwLock<InMemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(InMemoryState::default()),
        })
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn create_or_reuse_run(&self, user_id: &str) -> Result<Run, MailTraceError> {
        let mut state = self.state.write().await;
        if let Some(run) = state
            .runs
            .values()
            .filter(|r| r.user_id == user_id && !r.status.is_terminal())
            .max_by_key(|r| r.started_at)
        {
            return Ok(run.clone());
        }
        let run_id = uuid::Uuid::new_v4().to_string();
        let run = Run::new(run_id.clone(), user_id.to_string(), now());
        state.runs.insert(run_id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, run_id: &str) -> Result<Run, MailTraceError> {
        self.state
            .read()
            .await
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| MailTraceError::not_found(format!("run {run_id} not found")))
    }

    async fn save_run(&self, run: Run) -> Result<(), MailTraceError> {
        self.state.write().await.runs.insert(run.id.clone(), run);
        Ok(())
    }

    async fn list_runs(
        &self,
        user_id: &str,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<(Vec<Run>, Option<String>), MailTraceError> {
        let state = self.state.read().await;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let start = match cursor {
            Some(c) => runs.iter().position(|r| r.id == c).map(|i| i + 1).unwrap_or(0),
            None => 0,
        };
        let page: Vec<Run> = runs.iter().skip(start).take(limit).cloned().collect();
        let next_cursor = if start + page.len() < runs.len() {
            page.last().map(|r| r.id.clone())
        } else {
            None
        };
        Ok((page, next_cursor))
    }

    async fn latest_run(&self, user_id: &str, only_done: bool) -> Result<Option<Run>, MailTraceError> {
        let state = self.state.read().await;
        let run = state
            .runs
            .values()
            .filter(|r| r.user_id == user_id)
            .filter(|r| !only_done || r.status == RunStatus::Done)
            .max_by_key(|r| r.started_at)
            .cloned();
        Ok(run)
    }
}

fn source_key(source: Source) -> &'static str {
    source.as_str()
}

fn now() -> NaiveDateTime {
    // `create_or_reuse_run` only needs started_at to be monotonically
    // comparable across runs for the same user; callers that need true
    // wall-clock time stamp the run via `save_run` after construction.
    chrono::Utc::now().naive_utc()
}

#[async_trait]
impl RawStore for InMemoryStore {
    async fn put_raw_rows(
        &self,
        run_id: &str,
        user_id: &str,
        source: Source,
        rows: Vec<HashMap<String, String>>,
    ) -> Result<u64, MailTraceError> {
        let mut state = self.state.write().await;
        let mut raw_rows = Vec::with_capacity(rows.len());
        for (i, data) in rows.into_iter().enumerate() {
            raw_rows.push(RawRow {
                run_id: run_id.to_string(),
                user_id: user_id.to_string(),
                rownum: (i + 1) as u64,
                data,
            });
        }
        let count = raw_rows.len() as u64;
        state
            .raw
            .insert((run_id.to_string(), source_key(source)), raw_rows);
        Ok(count)
    }

    async fn get_raw_rows(&self, run_id: &str, source: Source) -> Result<Vec<RawRow>, MailTraceError> {
        Ok(self
            .state
            .read()
            .await
            .raw
            .get(&(run_id.to_string(), source_key(source)))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl MappingStore for InMemoryStore {
    async fn save_mapping(&self, run_id: &str, source: Source, mapping: Mapping) -> Result<(), MailTraceError> {
        self.state
            .write()
            .await
            .mappings
            .insert((run_id.to_string(), source_key(source)), mapping);
        Ok(())
    }

    async fn get_mapping(&self, run_id: &str, source: Source) -> Result<Mapping, MailTraceError> {
        Ok(self
            .state
            .read()
            .await
            .mappings
            .get(&(run_id.to_string(), source_key(source)))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl StagingStore for InMemoryStore {
    /// Keyed globally by `(user_id, mail_key)`, not per run: a `mail_key`
    /// already seen under a different run for this user is rebound to
    /// `run_id` (spec §4.3 "rebound ... reassigned by sequence") rather
    /// than duplicated per run.
    async fn upsert_mail(&self, run_id: &str, rows: Vec<StagedMail>) -> Result<u64, MailTraceError> {
        let mut state = self.state.write().await;
        let mut inserted = 0u64;
        for row in rows {
            let key = (row.user_id.clone(), row.mail_key.clone());
            state.staged_mail.insert(key, row);
            inserted += 1;
        }
        let _ = run_id;
        Ok(inserted)
    }

    /// Keyed globally by `(user_id, job_index)`; rebinds `run_id` the same
    /// way `upsert_mail` does, preserving `job_value` from the prior row
    /// when the incoming one carries none.
    async fn upsert_crm(&self, run_id: &str, rows: Vec<StagedCrm>) -> Result<u64, MailTraceError> {
        let mut state = self.state.write().await;
        let mut inserted = 0u64;
        for row in rows {
            let key = (row.user_id.clone(), row.job_index.clone());
            if let Some(existing) = state.staged_crm.get(&key) {
                let mut merged = row.clone();
                merged.job_value = row.job_value.or(existing.job_value);
                state.staged_crm.insert(key, merged);
            } else {
                state.staged_crm.insert(key, row);
            }
            inserted += 1;
        }
        let _ = run_id;
        Ok(inserted)
    }

    async fn mail_for_run(&self, run_id: &str) -> Result<Vec<StagedMail>, MailTraceError> {
        Ok(self
            .state
            .read()
            .await
            .staged_mail
            .values()
            .filter(|m| m.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn crm_for_run(&self, run_id: &str) -> Result<Vec<StagedCrm>, MailTraceError> {
        Ok(self
            .state
            .read()
            .await
            .staged_crm
            .values()
            .filter(|m| m.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn mail_count(&self, run_id: &str) -> Result<u64, MailTraceError> {
        Ok(self
            .state
            .read()
            .await
            .staged_mail
            .values()
            .filter(|m| m.run_id == run_id)
            .count() as u64)
    }

    async fn crm_count(&self, run_id: &str) -> Result<u64, MailTraceError> {
        Ok(self
            .state
            .read()
            .await
            .staged_crm
            .values()
            .filter(|m| m.run_id == run_id)
            .count() as u64)
    }
}

#[async_trait]
impl MatchStoreTrait for InMemoryStore {
    async fn upsert_matches(&self, user_id: &str, rows: Vec<MatchRecord>) -> Result<u64, MailTraceError> {
        let mut state = self.state.write().await;
        let bucket = state.matches.entry(user_id.to_string()).or_default();
        let mut written = 0u64;
        for row in rows {
            bucket.insert(row.job_index.clone(), row);
            written += 1;
        }
        Ok(written)
    }

    async fn matches_for_run(&self, run_id: &str) -> Result<Vec<MatchRecord>, MailTraceError> {
        let state = self.state.read().await;
        Ok(state
            .matches
            .values()
            .flat_map(|bucket| bucket.values())
            .filter(|m| m.run_id == run_id)
            .cloned()
            .collect())
    }
}
