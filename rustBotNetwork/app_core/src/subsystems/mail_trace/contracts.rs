use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// # NDOC
/// component: `subsystems::mail_trace::contracts`
/// purpose: Shared data-model types (§3) and versioned boundary contracts
///   (§6). Internal storage types are plain structs; request/response
///   shapes crossing the `MailTraceService` trait carry a `V1` suffix so a
///   later `V2` can be introduced without disturbing C1-C9.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Mail,
    Crm,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Mail => "mail",
            Source::Crm => "crm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Starting,
    NormalizingMail,
    MailInserting,
    MailReady,
    NormalizingCrm,
    CrmInserting,
    CrmReady,
    Matching,
    Aggregating,
    Done,
    Failed,
}

impl RunStatus {
    /// `failed` is terminal from any state; `done` is the only other
    /// terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Failed)
    }

    /// `(pct, label)` anchor for this status, per §4.8's table.
    pub fn anchor(&self) -> (u8, &'static str) {
        match self {
            RunStatus::Queued => (0, "Queued"),
            RunStatus::Starting => (5, "Starting run"),
            RunStatus::NormalizingMail => (15, "Normalizing Mail (reading RAW)"),
            RunStatus::MailInserting => (35, "Normalizing Mail (writing to staging)"),
            RunStatus::MailReady => (55, "Mail normalized"),
            RunStatus::NormalizingCrm => (60, "Normalizing CRM (reading RAW)"),
            RunStatus::CrmInserting => (78, "Normalizing CRM (writing to staging)"),
            RunStatus::CrmReady => (85, "CRM normalized"),
            RunStatus::Matching => (90, "Linking Mail \u{2194} CRM"),
            RunStatus::Aggregating => (97, "Aggregating results"),
            RunStatus::Done => (100, "Run complete"),
            RunStatus::Failed => (100, "Run failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub user_id: String,
    pub status: RunStatus,
    pub step: String,
    pub pct: u8,
    pub message: String,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub mail_count: u64,
    pub crm_count: u64,
    pub mail_ready: bool,
    pub crm_ready: bool,
}

impl Run {
    pub fn new(id: String, user_id: String, started_at: NaiveDateTime) -> Self {
        let (pct, step) = RunStatus::Queued.anchor();
        Self {
            id,
            user_id,
            status: RunStatus::Queued,
            step: step.to_string(),
            pct,
            message: String::new(),
            started_at,
            finished_at: None,
            mail_count: 0,
            crm_count: 0,
            mail_ready: false,
            crm_ready: false,
        }
    }

    pub fn set_status(&mut self, status: RunStatus, message: impl Into<String>) {
        let (pct, step) = status.anchor();
        self.status = status;
        self.pct = pct;
        self.step = step.to_string();
        self.message = message.into();
    }
}

/// One raw row landed verbatim, header-preserving, 1-based within its
/// `(run_id, source)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRow {
    pub run_id: String,
    pub user_id: String,
    pub rownum: u64,
    pub data: HashMap<String, String>,
}

/// Canonical-field -> raw-header mapping, one per `(run_id, source)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mapping {
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedMail {
    pub run_id: String,
    pub user_id: String,
    pub line_no: u64,
    pub mail_key: String,
    pub source_id: Option<String>,
    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub full_address: String,
    pub sent_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedCrm {
    pub run_id: String,
    pub user_id: String,
    pub line_no: u64,
    pub job_index: String,
    pub source_id: Option<String>,
    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub full_address: String,
    pub job_date: NaiveDate,
    pub job_value: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub run_id: String,
    pub user_id: String,
    pub job_index: String,
    pub crm_line_no: u64,
    pub crm_job_date: NaiveDate,
    pub job_value: Option<Decimal>,
    pub crm_city: String,
    pub crm_state: String,
    pub crm_zip: String,
    pub crm_full_address: String,
    pub mail_full_address: String,
    pub mail_ids: Vec<String>,
    pub matched_mail_dates: Vec<NaiveDate>,
    pub confidence_percent: u8,
    pub match_notes: String,
    pub zip5: String,
    pub state: String,
}

/// Reason a CRM row produced no match (recorded, not persisted as a
/// `Match` row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludedRow {
    pub job_index: String,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    NoBlockCandidates,
    NoDateWindowCandidates,
    BelowMinScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunKpis {
    pub total_mail: u64,
    pub unique_mail_addresses: u64,
    pub total_jobs: u64,
    pub matches: u64,
    pub match_rate: Decimal,
    pub match_revenue: Decimal,
    pub revenue_per_mailer: Decimal,
    pub avg_ticket_per_match: Decimal,
    pub median_days_to_convert: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSeries {
    pub months: Vec<String>,
    pub mailers: Vec<u64>,
    pub jobs: Vec<u64>,
    pub matches: Vec<u64>,
    pub yoy: Option<YoyOverlay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoyOverlay {
    pub months: Vec<String>,
    pub latest_year: Vec<u64>,
    pub previous_year: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopCity {
    pub city: String,
    pub matches: u64,
    pub match_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopZip {
    pub zip5: String,
    pub matches: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayloadV1 {
    pub run_id: String,
    pub kpis: RunKpis,
    pub graph: RunSeries,
    pub top_cities: Vec<TopCity>,
    pub top_zips: Vec<TopZip>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusSnapshotV1 {
    pub run_id: String,
    pub status: RunStatus,
    pub pct: u8,
    pub step: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRawResultV1 {
    pub state: String,
    pub raw_count: u64,
    pub sample_headers: Vec<String>,
    pub sample_rows: Vec<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunListItemV1 {
    pub id: String,
    pub started_at: NaiveDateTime,
    pub summary: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunListPageV1 {
    pub items: Vec<RunListItemV1>,
    pub next_cursor: Option<String>,
}
