use super::errors::MailTraceError;
use super::store::StagingStore;

/// # NDOC
/// component: `subsystems::mail_trace::dedupe`
/// purpose: Readiness gate for matching (C9). Idempotency itself is not a
///   separate mechanism here: `mail_key`/`job_index` uniqueness (C2) plus
///   upsert-on-key semantics (C4/C6) already guarantee re-ingest and
///   re-match stability; this module only decides *when* matching may run.

/// Both staging tables must carry at least one row for `run_id` before the
/// matcher can run; used as the gate into `RunStatus::Matching`.
pub async fn pair_ready(store: &dyn StagingStore, run_id: &str) -> Result<bool, MailTraceError> {
    let mail_count = store.mail_count(run_id).await?;
    let crm_count = store.crm_count(run_id).await?;
    Ok(mail_count > 0 && crm_count > 0)
}

/// Per-source readiness, used to report which side is still missing in a
/// `start_pipeline` 409.
pub async fn missing_sides(store: &dyn StagingStore, run_id: &str) -> Result<Vec<&'static str>, MailTraceError> {
    let mut missing = Vec::new();
    if store.mail_count(run_id).await? == 0 {
        missing.push("mail");
    }
    if store.crm_count(run_id).await? == 0 {
        missing.push("crm");
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::mail_trace::contracts::{StagedCrm, StagedMail};
    use crate::subsystems::mail_trace::store::InMemoryStore;
    use chrono::NaiveDate;

    fn mail_row() -> StagedMail {
        StagedMail {
            run_id: "r1".into(), user_id: "u1".into(), line_no: 1,
            mail_key: "mk_1".into(), source_id: None,
            address1: "1 A St".into(), address2: None, city: "Austin".into(), state: "TX".into(),
            zip: "78701".into(), full_address: "1 a st austin tx 78701".into(),
            sent_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    fn crm_row() -> StagedCrm {
        StagedCrm {
            run_id: "r1".into(), user_id: "u1".into(), line_no: 1,
            job_index: "jid_1".into(), source_id: None,
            address1: "1 A St".into(), address2: None, city: "Austin".into(), state: "TX".into(),
            zip: "78701".into(), full_address: "1 a st austin tx 78701".into(),
            job_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), job_value: None,
        }
    }

    #[tokio::test]
    async fn pair_ready_requires_both_sides() {
        let store = InMemoryStore::new();
        assert!(!pair_ready(store.as_ref(), "r1").await.unwrap());

        store.upsert_mail("r1", vec![mail_row()]).await.unwrap();
        assert!(!pair_ready(store.as_ref(), "r1").await.unwrap());

        store.upsert_crm("r1", vec![crm_row()]).await.unwrap();
        assert!(pair_ready(store.as_ref(), "r1").await.unwrap());
    }

    #[tokio::test]
    async fn missing_sides_reports_both_then_none() {
        let store = InMemoryStore::new();
        assert_eq!(missing_sides(store.as_ref(), "r1").await.unwrap(), vec!["mail", "crm"]);

        store.upsert_mail("r1", vec![mail_row()]).await.unwrap();
        store.upsert_crm("r1", vec![crm_row()]).await.unwrap();
        assert!(missing_sides(store.as_ref(), "r1").await.unwrap().is_empty());
    }
}
