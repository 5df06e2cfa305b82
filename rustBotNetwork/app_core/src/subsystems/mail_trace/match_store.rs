use super::config;
use super::contracts::{ExcludedRow, MatchRecord, StagedCrm, StagedMail};
use super::errors::MailTraceError;
use super::matcher::run_matching;
use super::store::MatchStoreTrait;

/// # NDOC
/// component: `subsystems::mail_trace::match_store`
/// purpose: Orchestrates C5 against a full run's staged rows and persists
///   the result through `MatchStoreTrait` (C6), batched the same way C4
///   batches staging writes. The scoring itself lives in `matcher`; this
///   module owns nothing but the run-matching + write-through sequencing.

/// Runs the matcher over `mail`/`crm` for `run_id` and upserts the winners,
/// batched at `config::staging_batch_size()`. Returns `(written, excluded)`.
pub async fn match_and_store(
    store: &dyn MatchStoreTrait,
    user_id: &str,
    mail: &[StagedMail],
    crm: &[StagedCrm],
) -> Result<(u64, Vec<ExcludedRow>), MailTraceError> {
    let (matches, excluded) = run_matching(user_id, mail, crm);

    let batch_size = config::staging_batch_size().max(1);
    let mut written = 0u64;
    for chunk in matches.chunks(batch_size) {
        written += store.upsert_matches(user_id, chunk.to_vec()).await?;
    }

    Ok((written, excluded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::mail_trace::store::InMemoryStore;
    use chrono::NaiveDate;

    fn mail_row(source_id: &str, date: (i32, u32, u32)) -> StagedMail {
        StagedMail {
            run_id: "r1".into(), user_id: "u1".into(), line_no: 1,
            mail_key: format!("mk_{source_id}"), source_id: Some(source_id.to_string()),
            address1: "123 Main St".into(), address2: None, city: "Austin".into(), state: "TX".into(),
            zip: "78701".into(), full_address: "123 main st austin tx 78701".into(),
            sent_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        }
    }

    fn crm_row(job_index: &str, date: (i32, u32, u32)) -> StagedCrm {
        StagedCrm {
            run_id: "r1".into(), user_id: "u1".into(), line_no: 1,
            job_index: job_index.into(), source_id: None,
            address1: "123 Main St".into(), address2: None, city: "Austin".into(), state: "TX".into(),
            zip: "78701".into(), full_address: "123 main st austin tx 78701".into(),
            job_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            job_value: None,
        }
    }

    #[tokio::test]
    async fn matches_are_persisted_and_retrievable() {
        let store = InMemoryStore::new();
        let mail = vec![mail_row("M1", (2024, 1, 1))];
        let crm = vec![crm_row("J1", (2024, 2, 1))];
        let (written, excluded) = match_and_store(store.as_ref(), "u1", &mail, &crm).await.unwrap();
        assert_eq!(written, 1);
        assert!(excluded.is_empty());
        let rows = store.matches_for_run("r1").await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
