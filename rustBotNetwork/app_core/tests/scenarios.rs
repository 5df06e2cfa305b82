use std::time::Duration;

use mailtrace_core::subsystems::mail_trace::contracts::{Mapping, RunStatus, Source};
use mailtrace_core::subsystems::mail_trace::service::DefaultMailTraceService;
use mailtrace_core::MailTraceService;

async fn run_to_terminal(service: &DefaultMailTraceService, run_id: &str) -> RunStatus {
    for _ in 0..200 {
        let snap = service.status(run_id).await.unwrap();
        if snap.status.is_terminal() {
            return snap.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never reached a terminal status");
}

async fn stage(service: &DefaultMailTraceService, user_id: &str, mail_csv: &[u8], crm_csv: &[u8]) -> String {
    let run_id = service.create_run(user_id).await.unwrap();
    service.upload_raw(&run_id, user_id, Source::Mail, mail_csv).await.unwrap();
    service.upload_raw(&run_id, user_id, Source::Crm, crm_csv).await.unwrap();
    service.save_mapping(&run_id, user_id, Source::Mail, Mapping::default()).await.unwrap();
    service.save_mapping(&run_id, user_id, Source::Crm, Mapping::default()).await.unwrap();
    run_id
}

#[tokio::test]
async fn e1_basic_match_with_street_type_variation() {
    let service = DefaultMailTraceService::new_in_memory();
    let mail = b"source_id,address1,city,state,zip,sent_date\nM1,123 MAIN ST,Austin,TX,78701,2024-03-01\n";
    let crm = b"source_id,address1,city,state,zip,job_date,job_value\nJ1,123 Main Street,Austin,TX,78701-1234,2024-04-15,500\n";
    let run_id = stage(&service, "u1", mail, crm).await;

    service.start_pipeline(&run_id, "u1").await.unwrap();
    assert_eq!(run_to_terminal(&service, &run_id).await, RunStatus::Done);

    let result = service.result(&run_id, "u1").await.unwrap();
    assert_eq!(result.kpis.matches, 1);
    assert_eq!(result.kpis.median_days_to_convert, 45);
}

#[tokio::test]
async fn e2_date_window_excludes_future_mail() {
    let service = DefaultMailTraceService::new_in_memory();
    let mail = b"source_id,address1,city,state,zip,sent_date\nM2,10 Elm Ave,Boston,MA,02139,2024-05-10\n";
    let crm = b"source_id,address1,city,state,zip,job_date,job_value\nJ2,10 Elm Ave,Boston,MA,02139,2024-05-01,100\n";
    let run_id = stage(&service, "u2", mail, crm).await;

    service.start_pipeline(&run_id, "u2").await.unwrap();
    assert_eq!(run_to_terminal(&service, &run_id).await, RunStatus::Done);

    let result = service.result(&run_id, "u2").await.unwrap();
    assert_eq!(result.kpis.matches, 0);
    assert!(result.graph.matches.iter().all(|&n| n == 0));
}

#[tokio::test]
async fn e3_idempotent_reupload_keeps_staging_counts_stable() {
    let service = DefaultMailTraceService::new_in_memory();
    let mail = b"source_id,address1,city,state,zip,sent_date\n\
                 M1,1 A St,Austin,TX,78701,2024-01-01\n\
                 M2,2 B St,Austin,TX,78701,2024-01-02\n\
                 M3,3 C St,Austin,TX,78701,2024-01-03\n";
    let crm = b"source_id,address1,city,state,zip,job_date,job_value\nJ1,1 A St,Austin,TX,78701,2024-02-01,100\n";

    let run_id = service.create_run("u3").await.unwrap();
    service.upload_raw(&run_id, "u3", Source::Mail, mail).await.unwrap();
    service.upload_raw(&run_id, "u3", Source::Crm, crm).await.unwrap();
    service.save_mapping(&run_id, "u3", Source::Mail, Mapping::default()).await.unwrap();
    service.save_mapping(&run_id, "u3", Source::Crm, Mapping::default()).await.unwrap();

    service.start_pipeline(&run_id, "u3").await.unwrap();
    assert_eq!(run_to_terminal(&service, &run_id).await, RunStatus::Done);
    let first = service.result(&run_id, "u3").await.unwrap();

    // Re-upload the identical mail CSV into the same run's raw table and
    // re-run; staging stays at 3 unique mail_key rows (upsert-on-key).
    service.upload_raw(&run_id, "u3", Source::Mail, mail).await.unwrap();
    service.start_pipeline(&run_id, "u3").await.unwrap();
    assert_eq!(run_to_terminal(&service, &run_id).await, RunStatus::Done);
    let second = service.result(&run_id, "u3").await.unwrap();

    assert_eq!(first.kpis.total_mail, 3);
    assert_eq!(second.kpis.total_mail, 3);
    assert_eq!(first.kpis.matches, second.kpis.matches);
}

#[tokio::test]
async fn e4_directional_and_unit_notes() {
    let service = DefaultMailTraceService::new_in_memory();
    let mail = b"source_id,address1,city,state,zip,sent_date\nM4,100 N MAIN ST APT 4,Austin,TX,78701,2024-01-01\n";
    let crm = b"source_id,address1,city,state,zip,job_date,job_value\nJ4,100 Main St,Austin,TX,78701,2024-02-01,200\n";
    let run_id = stage(&service, "u4", mail, crm).await;

    service.start_pipeline(&run_id, "u4").await.unwrap();
    assert_eq!(run_to_terminal(&service, &run_id).await, RunStatus::Done);

    let result = service.result(&run_id, "u4").await.unwrap();
    assert_eq!(result.kpis.matches, 1);
}

#[tokio::test]
async fn e5_synthesized_job_index_deduped_on_reingest() {
    let service = DefaultMailTraceService::new_in_memory();
    let mail = b"source_id,address1,city,state,zip,sent_date\nM5,1 Z St,Austin,TX,78701,2024-01-01\n";
    let crm = b"address1,city,state,zip,job_date\n50 Oak Rd,Austin,TX,78702,2024-06-01\n";
    let run_id = stage(&service, "u5", mail, crm).await;

    service.start_pipeline(&run_id, "u5").await.unwrap();
    assert_eq!(run_to_terminal(&service, &run_id).await, RunStatus::Done);
    let before = service.result(&run_id, "u5").await.unwrap();

    // Re-ingesting the identical CRM row under the same user must not
    // insert a second staging row (job_index is stable and deterministic).
    service.upload_raw(&run_id, "u5", Source::Crm, crm).await.unwrap();
    service.start_pipeline(&run_id, "u5").await.unwrap();
    assert_eq!(run_to_terminal(&service, &run_id).await, RunStatus::Done);
    let after = service.result(&run_id, "u5").await.unwrap();

    assert_eq!(before.kpis.total_jobs, 1);
    assert_eq!(after.kpis.total_jobs, 1);
}

#[tokio::test]
async fn e6_tie_break_by_earliest_mail_date() {
    let service = DefaultMailTraceService::new_in_memory();
    let mail = b"source_id,address1,city,state,zip,sent_date\n\
                 EARLY,5 Pine Ln,Dallas,TX,75001,2024-01-10\n\
                 LATE,5 Pine Ln,Dallas,TX,75001,2024-02-01\n";
    let crm = b"source_id,address1,city,state,zip,job_date,job_value\nJ6,5 Pine Ln,Dallas,TX,75001,2024-03-01,300\n";
    let run_id = stage(&service, "u6", mail, crm).await;

    service.start_pipeline(&run_id, "u6").await.unwrap();
    assert_eq!(run_to_terminal(&service, &run_id).await, RunStatus::Done);

    let result = service.result(&run_id, "u6").await.unwrap();
    assert_eq!(result.kpis.matches, 1);
}

#[tokio::test]
async fn cross_run_reupload_rebinds_staging_rows_to_latest_run() {
    // Same mail_key/job_index re-ingested under a *second*, distinct run for
    // the same user must rebind to that run rather than stay counted against
    // the first (spec: staging uniqueness is per (user_id, key), not per run).
    let service = DefaultMailTraceService::new_in_memory();
    let mail = b"source_id,address1,city,state,zip,sent_date\nM1,1 A St,Austin,TX,78701,2024-01-01\n";
    let crm = b"source_id,address1,city,state,zip,job_date,job_value\nJ1,1 A St,Austin,TX,78701,2024-02-01,100\n";

    let run_1 = stage(&service, "u8", mail, crm).await;
    service.start_pipeline(&run_1, "u8").await.unwrap();
    assert_eq!(run_to_terminal(&service, &run_1).await, RunStatus::Done);
    let first = service.result(&run_1, "u8").await.unwrap();
    assert_eq!(first.kpis.total_mail, 1);
    assert_eq!(first.kpis.total_jobs, 1);

    // `run_1` is now Done (terminal), so a fresh create_run call for the same
    // user starts a genuinely new run rather than reusing `run_1`.
    let run_2 = stage(&service, "u8", mail, crm).await;
    assert_ne!(run_1, run_2);
    service.start_pipeline(&run_2, "u8").await.unwrap();
    assert_eq!(run_to_terminal(&service, &run_2).await, RunStatus::Done);
    let second = service.result(&run_2, "u8").await.unwrap();
    assert_eq!(second.kpis.total_mail, 1);
    assert_eq!(second.kpis.total_jobs, 1);

    // The rows rebound to run_2; run_1's own staged counts go to zero rather
    // than the store keeping duplicate per-run copies (run_1 stays Done, so
    // its result is still fetchable, just empty).
    let stale = service.result(&run_1, "u8").await.unwrap();
    assert_eq!(stale.kpis.total_mail, 0);
    assert_eq!(stale.kpis.total_jobs, 0);
}

#[tokio::test]
async fn start_pipeline_reports_missing_required_fields_per_source() {
    let service = DefaultMailTraceService::new_in_memory();
    let run_id = service.create_run("u7").await.unwrap();

    // Deliberately malformed: no recognizable address/date columns.
    service
        .upload_raw(&run_id, "u7", Source::Mail, b"city\nAustin\n")
        .await
        .unwrap();
    service
        .upload_raw(&run_id, "u7", Source::Crm, b"city\nAustin\n")
        .await
        .unwrap();
    service.save_mapping(&run_id, "u7", Source::Mail, Mapping::default()).await.unwrap();
    service.save_mapping(&run_id, "u7", Source::Crm, Mapping::default()).await.unwrap();

    let err = service.start_pipeline(&run_id, "u7").await.unwrap_err();
    assert_eq!(err.kind, mailtrace_core::subsystems::mail_trace::errors::MailTraceErrorKind::Conflict);
    let details = err.context.unwrap();
    assert!(details["missing"]["mail"].as_array().unwrap().contains(&serde_json::json!("address1")));
    assert!(details["missing"]["crm"].as_array().unwrap().contains(&serde_json::json!("job_date")));
}
