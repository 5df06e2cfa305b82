use chrono::NaiveDate;
use sha1::{Digest, Sha1};

/// # NDOC
/// component: `subsystems::mail_trace::identity`
/// purpose: Derive stable, per-user row identities (C2). AND-semantics on
///   the hash fallback prevents collisions from partial data; an explicit
///   `source_id` always wins when present so upstream provenance survives
///   re-ingestion.

fn hash16(raw: &str) -> String {
    let digest = Sha1::digest(raw.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

/// Prefers a non-empty `source_id`; else, if both `full_address` and
/// `sent_date` are present, a stable `mk_`-prefixed hash; else `None`.
pub fn mail_key(
    source_id: Option<&str>,
    full_address: Option<&str>,
    sent_date: Option<NaiveDate>,
) -> Option<String> {
    if let Some(sid) = source_id.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(sid.to_string());
    }
    match (full_address, sent_date) {
        (Some(addr), Some(date)) if !addr.trim().is_empty() => {
            let raw = format!("{}|{}", addr.trim().to_lowercase(), date.format("%Y-%m-%d"));
            Some(format!("mk_{}", hash16(&raw)))
        }
        _ => None,
    }
}

/// Same rule as `mail_key`, prefixed `jid_`.
pub fn job_index(
    source_id: Option<&str>,
    full_address: Option<&str>,
    job_date: Option<NaiveDate>,
) -> Option<String> {
    if let Some(sid) = source_id.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(sid.to_string());
    }
    match (full_address, job_date) {
        (Some(addr), Some(date)) if !addr.trim().is_empty() => {
            let raw = format!("{}|{}", addr.trim().to_lowercase(), date.format("%Y-%m-%d"));
            Some(format!("jid_{}", hash16(&raw)))
        }
        _ => None,
    }
}
