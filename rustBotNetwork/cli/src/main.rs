// rustBotNetwork/cli/src/main.rs

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use mailtrace_core::subsystems::mail_trace::contracts::{Mapping, Source as DomainSource};
use mailtrace_core::subsystems::mail_trace::service::DefaultMailTraceService;
use mailtrace_core::MailTraceService;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SourceArg {
    Mail,
    Crm,
}

impl From<SourceArg> for DomainSource {
    fn from(s: SourceArg) -> Self {
        match s {
            SourceArg::Mail => DomainSource::Mail,
            SourceArg::Crm => DomainSource::Crm,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Creates (or reuses) a run for a user
    CreateRun {
        #[clap(long)]
        user_id: String,
    },
    /// Uploads a mail or CRM CSV file into a run
    Upload {
        #[clap(long)]
        run_id: String,
        #[clap(long)]
        user_id: String,
        #[clap(long, value_enum)]
        source: SourceArg,
        #[clap(long)]
        file: PathBuf,
    },
    /// Shows sampled headers for a previously uploaded source
    Headers {
        #[clap(long)]
        run_id: String,
        #[clap(long, value_enum)]
        source: SourceArg,
        #[clap(long, default_value_t = 5)]
        sample_n: usize,
    },
    /// Saves a canonical-field -> raw-header mapping as JSON, e.g.
    /// '{"address1":"Street","zip":"Postal Code"}'
    SaveMapping {
        #[clap(long)]
        run_id: String,
        #[clap(long)]
        user_id: String,
        #[clap(long, value_enum)]
        source: SourceArg,
        #[clap(long)]
        mapping_json: String,
    },
    /// Starts the normalize -> match -> aggregate pipeline for a run
    Start {
        #[clap(long)]
        run_id: String,
        #[clap(long)]
        user_id: String,
    },
    /// Polls run status
    Status {
        #[clap(long)]
        run_id: String,
    },
    /// Fetches the full KPI/series/top-cities/top-zips payload once done
    Result {
        #[clap(long)]
        run_id: String,
        #[clap(long)]
        user_id: String,
    },
    /// Lists runs for a user, newest first
    ListRuns {
        #[clap(long)]
        user_id: String,
        #[clap(long, default_value_t = 20)]
        limit: usize,
        #[clap(long)]
        cursor: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = mailtrace_core::utils::logger::init_logger();
    let cli = Cli::parse();
    let service = DefaultMailTraceService::new_in_memory();

    if let Err(e) = run(&service, cli.command).await {
        eprintln!("{}", serde_json::to_string_pretty(&e.to_envelope()).unwrap_or_else(|_| e.to_string()));
        process::exit(1);
    }
}

async fn run(service: &DefaultMailTraceService, command: Commands) -> Result<(), mailtrace_core::MailTraceError> {
    match command {
        Commands::CreateRun { user_id } => {
            let run_id = service.create_run(&user_id).await?;
            println!("{}", serde_json::json!({ "run_id": run_id }));
        }
        Commands::Upload { run_id, user_id, source, file } => {
            let bytes = fs::read(&file).map_err(|e| {
                mailtrace_core::MailTraceError::bad_request(format!("could not read {}: {e}", file.display()))
            })?;
            let result = service.upload_raw(&run_id, &user_id, source.into(), &bytes).await?;
            println!("{}", serde_json::to_string_pretty(&result).unwrap());
        }
        Commands::Headers { run_id, source, sample_n } => {
            let (headers, rows) = service.get_headers(&run_id, source.into(), sample_n).await?;
            println!("{}", serde_json::json!({ "headers": headers, "sample_rows": rows }));
        }
        Commands::SaveMapping { run_id, user_id, source, mapping_json } => {
            let fields: std::collections::HashMap<String, String> = serde_json::from_str(&mapping_json)
                .map_err(|e| mailtrace_core::MailTraceError::bad_request(format!("invalid mapping JSON: {e}")))?;
            service.save_mapping(&run_id, &user_id, source.into(), Mapping { fields }).await?;
            println!("{}", serde_json::json!({ "ok": true }));
        }
        Commands::Start { run_id, user_id } => {
            service.start_pipeline(&run_id, &user_id).await?;
            println!("{}", serde_json::json!({ "ok": true }));
        }
        Commands::Status { run_id } => {
            let status = service.status(&run_id).await?;
            println!("{}", serde_json::to_string_pretty(&status).unwrap());
        }
        Commands::Result { run_id, user_id } => {
            let result = service.result(&run_id, &user_id).await?;
            println!("{}", serde_json::to_string_pretty(&result).unwrap());
        }
        Commands::ListRuns { user_id, limit, cursor } => {
            let page = service.list_runs(&user_id, limit, cursor).await?;
            println!("{}", serde_json::to_string_pretty(&page).unwrap());
        }
    }
    Ok(())
}
