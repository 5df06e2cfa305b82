use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

use super::contracts::{Mapping, RawRow, Source};
use super::errors::MailTraceError;
use super::store::{MappingStore, RawStore};

/// # NDOC
/// component: `subsystems::mail_trace::mapping`
/// purpose: Two-phase loader (C3): land raw rows verbatim, then derive a
///   canonical shape under a user-declared mapping with alias fallback.

pub fn required_fields(source: Source) -> &'static [&'static str] {
    match source {
        Source::Mail => &["address1", "city", "state", "zip", "sent_date"],
        Source::Crm => &["address1", "city", "state", "zip", "job_date"],
    }
}

static ALIAS_MAIL: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("source_id", vec!["id", "mail_id", "record_id", "source_id"]),
        ("address1", vec!["address1", "addr1", "address 1", "address", "street", "line1", "line 1"]),
        ("address2", vec!["address2", "addr2", "address 2", "unit", "line2", "apt", "apartment", "suite", "line 2"]),
        ("city", vec!["city", "town"]),
        ("state", vec!["state", "st"]),
        ("zip", vec!["postal_code", "zip", "zipcode", "zip_code", "zip code"]),
        (
            "sent_date",
            vec![
                "sent_date", "sent date", "mail_date", "mail date", "date", "sent", "mailed",
                "mailed_at", "mailed at", "date mailed", "mailed date", "mailed_on", "mailed on",
                "postmark", "postmarked", "postmark date", "mailing date", "outbound date",
            ],
        ),
    ])
});

static ALIAS_CRM: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("source_id", vec!["id", "crm_id", "job_id", "record_id", "source_id"]),
        ("address1", vec!["address1", "addr1", "address 1", "address", "street", "line1", "line 1"]),
        ("address2", vec!["address2", "addr2", "address 2", "unit", "line2", "apt", "apartment", "suite", "line 2"]),
        ("city", vec!["city", "town"]),
        ("state", vec!["state", "st"]),
        ("zip", vec!["postal_code", "zip", "zipcode", "zip_code", "zip code"]),
        (
            "job_date",
            vec!["job_date", "job date", "date", "created_at", "completed_date", "service_date"],
        ),
        ("job_value", vec!["job_value", "value", "amount", "revenue", "price", "total"]),
    ])
});

fn alias_table(source: Source) -> &'static HashMap<&'static str, Vec<&'static str>> {
    match source {
        Source::Mail => &ALIAS_MAIL,
        Source::Crm => &ALIAS_CRM,
    }
}

fn first_present<'a>(headers_lower: &HashSet<String>, candidates: &'a [&'static str]) -> Option<&'a str> {
    candidates.iter().find(|c| headers_lower.contains(**c)).copied()
}

/// Replaces raw rows whole for `(run_id, source)` via the injected store.
pub async fn ingest_raw(
    store: &dyn RawStore,
    run_id: &str,
    user_id: &str,
    source: Source,
    rows: Vec<HashMap<String, String>>,
) -> Result<u64, MailTraceError> {
    store.put_raw_rows(run_id, user_id, source, rows).await
}

/// Upserts the canonical-field -> raw-header mapping for `(run_id, source)`.
pub async fn save_mapping(
    store: &dyn MappingStore,
    run_id: &str,
    source: Source,
    mapping: Mapping,
) -> Result<(), MailTraceError> {
    store.save_mapping(run_id, source, mapping).await
}

pub async fn get_mapping(store: &dyn MappingStore, run_id: &str, source: Source) -> Result<Mapping, MailTraceError> {
    store.get_mapping(run_id, source).await
}

/// Union of keys over the first `n` raw rows, plus the rows themselves.
pub async fn headers_sample(
    store: &dyn RawStore,
    run_id: &str,
    source: Source,
    n: usize,
) -> Result<(Vec<String>, Vec<HashMap<String, String>>), MailTraceError> {
    let rows = store.get_raw_rows(run_id, source).await?;
    let sample: Vec<&RawRow> = rows.iter().take(n).collect();
    let mut headers: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for row in &sample {
        for key in row.data.keys() {
            if seen.insert(key.clone()) {
                headers.push(key.clone());
            }
        }
    }
    let sample_rows = sample.iter().map(|r| r.data.clone()).collect();
    Ok((headers, sample_rows))
}

/// Explicit mapping wins; unmapped canonical fields fall back to the
/// per-source alias map. Missing values yield `""`.
pub fn apply_mapping(rows: &[RawRow], mapping: &Mapping, source: Source) -> Vec<HashMap<String, String>> {
    let aliases = alias_table(source);
    rows.iter()
        .map(|row| {
            let headers_lower: HashSet<String> = row.data.keys().map(|k| k.to_lowercase()).collect();
            let lower_to_orig: HashMap<String, &String> =
                row.data.iter().map(|(k, v)| (k.to_lowercase(), v)).collect();

            let mut canon_row = HashMap::new();
            let mut all_fields: HashSet<&str> = aliases.keys().copied().collect();
            for f in mapping.fields.keys() {
                all_fields.insert(f.as_str());
            }

            for canon in all_fields {
                if let Some(raw_header) = mapping.fields.get(canon) {
                    if let Some(v) = row.data.get(raw_header) {
                        canon_row.insert(canon.to_string(), v.clone());
                        continue;
                    }
                }
                if let Some(candidates) = aliases.get(canon) {
                    if let Some(alias) = first_present(&headers_lower, candidates) {
                        if let Some(v) = lower_to_orig.get(alias) {
                            canon_row.insert(canon.to_string(), (*v).clone());
                            continue;
                        }
                    }
                }
                canon_row.entry(canon.to_string()).or_insert_with(String::new);
            }
            canon_row
        })
        .collect()
}

/// Returns, per required canonical field, whether it is satisfied by
/// either an explicit mapping entry (to an extant raw header) or alias
/// fallback, given the observed raw headers.
pub fn check_mapping(
    source: Source,
    observed_headers: &[String],
    mapping: &Mapping,
) -> Vec<String> {
    let headers_lower: HashSet<String> = observed_headers.iter().map(|h| h.to_lowercase()).collect();
    let aliases = alias_table(source);

    required_fields(source)
        .iter()
        .filter(|field| {
            let explicit_ok = mapping
                .fields
                .get(**field)
                .map(|h| observed_headers.contains(h))
                .unwrap_or(false);
            let alias_ok = aliases
                .get(*field)
                .map(|candidates| first_present(&headers_lower, candidates).is_some())
                .unwrap_or(false);
            !(explicit_ok || alias_ok)
        })
        .map(|f| f.to_string())
        .collect()
}
