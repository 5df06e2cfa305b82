use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::contracts::{Source, StagedCrm, StagedMail};
use super::errors::MailTraceError;
use super::identity::{job_index, mail_key};
use super::normalize::build_full_address;
use super::store::StagingStore;

/// # NDOC
/// component: `subsystems::mail_trace::staging`
/// purpose: Normalize canonical-keyed rows into typed staging records and
///   upsert them (C4). Dedupes within a batch by key before handing rows
///   to the store; the store itself resolves cross-batch/cross-run upserts.

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%m/%d/%y",
    "%d-%m-%y",
];

/// Accepts the formats in §4.4 plus ISO-with-time; returns `None` on
/// anything else.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc().date());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    let normalized = s.replace('/', "-");
    for fmt in DATE_FORMATS {
        let fmt_normalized = fmt.replace('/', "-");
        if let Ok(d) = NaiveDate::parse_from_str(&normalized, &fmt_normalized) {
            return Some(d);
        }
    }
    None
}

fn non_empty(m: &HashMap<String, String>, key: &str) -> String {
    m.get(key).map(|s| s.trim().to_string()).unwrap_or_default()
}

fn opt_non_empty(m: &HashMap<String, String>, key: &str) -> Option<String> {
    let v = non_empty(m, key);
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

/// Builds `StagedMail` rows from canonical-keyed maps, skipping rows with
/// no parseable `sent_date` (cannot participate in the date window) and
/// deduping within the batch by `mail_key` (keep-first).
pub fn build_staged_mail(run_id: &str, user_id: &str, canon_rows: Vec<HashMap<String, String>>) -> Vec<StagedMail> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for (i, row) in canon_rows.into_iter().enumerate() {
        let sent_date = match parse_date(&non_empty(&row, "sent_date")) {
            Some(d) => d,
            None => continue,
        };
        let address1 = non_empty(&row, "address1");
        let address2 = opt_non_empty(&row, "address2");
        let city = non_empty(&row, "city");
        let state = non_empty(&row, "state");
        let zip = non_empty(&row, "zip");
        let full_address = build_full_address(&address1, address2.as_deref(), &city, &state, &zip);
        let source_id = opt_non_empty(&row, "source_id");

        let key = match mail_key(source_id.as_deref(), Some(&full_address), Some(sent_date)) {
            Some(k) => k,
            None => continue,
        };
        if !seen.insert(key.clone()) {
            continue;
        }

        out.push(StagedMail {
            run_id: run_id.to_string(),
            user_id: user_id.to_string(),
            line_no: (i + 1) as u64,
            mail_key: key,
            source_id,
            address1,
            address2,
            city,
            state,
            zip,
            full_address,
            sent_date,
        });
    }
    out
}

/// Builds `StagedCrm` rows; skips rows lacking an authoritative id and
/// either `full_address` or `job_date` (no `job_index` can be synthesized).
pub fn build_staged_crm(run_id: &str, user_id: &str, canon_rows: Vec<HashMap<String, String>>) -> Vec<StagedCrm> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for (i, row) in canon_rows.into_iter().enumerate() {
        let address1 = non_empty(&row, "address1");
        let address2 = opt_non_empty(&row, "address2");
        let city = non_empty(&row, "city");
        let state = non_empty(&row, "state");
        let zip = non_empty(&row, "zip");
        let full_address = build_full_address(&address1, address2.as_deref(), &city, &state, &zip);
        let job_date = parse_date(&non_empty(&row, "job_date"));
        let source_id = opt_non_empty(&row, "source_id");

        let idx = match job_index(source_id.as_deref(), Some(&full_address), job_date) {
            Some(k) => k,
            None => continue,
        };
        let job_date = match job_date {
            Some(d) => d,
            None => continue,
        };
        if !seen.insert(idx.clone()) {
            continue;
        }

        let job_value = opt_non_empty(&row, "job_value")
            .and_then(|v| v.replace(',', "").parse::<Decimal>().ok());

        out.push(StagedCrm {
            run_id: run_id.to_string(),
            user_id: user_id.to_string(),
            line_no: (i + 1) as u64,
            job_index: idx,
            source_id,
            address1,
            address2,
            city,
            state,
            zip,
            full_address,
            job_date,
            job_value,
        });
    }
    out
}

/// Normalizes canonical CSV rows for `source` and upserts them through the
/// store, batched at `config::staging_batch_size()`. Returns rows inserted.
pub async fn normalize_and_stage(
    store: &dyn StagingStore,
    run_id: &str,
    user_id: &str,
    source: Source,
    canon_rows: Vec<HashMap<String, String>>,
    batch_size: usize,
) -> Result<u64, MailTraceError> {
    let mut total = 0u64;
    match source {
        Source::Mail => {
            let rows = build_staged_mail(run_id, user_id, canon_rows);
            for chunk in rows.chunks(batch_size.max(1)) {
                total += store.upsert_mail(run_id, chunk.to_vec()).await?;
            }
        }
        Source::Crm => {
            let rows = build_staged_crm(run_id, user_id, canon_rows);
            for chunk in rows.chunks(batch_size.max(1)) {
                total += store.upsert_crm(run_id, chunk.to_vec()).await?;
            }
        }
    }
    if total == 0 {
        return Err(MailTraceError::validation(
            format!("{} normalization produced zero rows", source.as_str()),
            vec![source.as_str().to_string()],
        ));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_all_documented_date_formats() {
        assert!(parse_date("2024-03-01").is_some());
        assert!(parse_date("03/01/2024").is_some());
        assert!(parse_date("03-01-2024").is_some());
        assert!(parse_date("01-03-2024").is_some());
        assert!(parse_date("2024/03/01").is_some());
        assert!(parse_date("03/01/24").is_some());
        assert!(parse_date("01-03-24").is_some());
        assert!(parse_date("not a date").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn mail_rows_without_date_are_skipped() {
        let rows = vec![row(&[("address1", "123 Main St"), ("city", "Austin"), ("state", "TX"), ("zip", "78701")])];
        let staged = build_staged_mail("r1", "u1", rows);
        assert!(staged.is_empty());
    }

    #[test]
    fn mail_dedupes_within_batch_by_mail_key() {
        let rows = vec![
            row(&[("address1", "123 Main St"), ("city", "Austin"), ("state", "TX"), ("zip", "78701"), ("sent_date", "2024-03-01")]),
            row(&[("address1", "123 Main St"), ("city", "Austin"), ("state", "TX"), ("zip", "78701"), ("sent_date", "2024-03-01")]),
        ];
        let staged = build_staged_mail("r1", "u1", rows);
        assert_eq!(staged.len(), 1);
    }

    #[test]
    fn crm_rows_without_synthesizable_index_are_skipped() {
        let rows = vec![row(&[("city", "Austin")])];
        let staged = build_staged_crm("r1", "u1", rows);
        assert!(staged.is_empty());
    }

    #[test]
    fn crm_parses_job_value_stripping_commas() {
        let rows = vec![row(&[
            ("address1", "50 Oak Rd"), ("city", "Austin"), ("state", "TX"), ("zip", "78702"),
            ("job_date", "2024-06-01"), ("job_value", "1,234.50"),
        ])];
        let staged = build_staged_crm("r1", "u1", rows);
        assert_eq!(staged[0].job_value, Some(Decimal::new(123450, 2)));
    }
}
