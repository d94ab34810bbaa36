//! `minutes`: follow a meeting minutes job from the terminal.

use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand};
use minutes_sync::prelude::*;
use minutes_sync::init_observability;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "minutes", version, about = "Follow meeting minutes jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll a job until it finishes, then optionally stream its TL;DR.
    Watch {
        job_id: String,
        /// Stream the TL;DR summary once the job is done.
        #[arg(long)]
        stream: bool,
        /// Status poll interval in milliseconds.
        #[arg(long)]
        poll_ms: Option<u64>,
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Print download links for a job's exports.
    Exports {
        job_id: String,
        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[derive(Args)]
struct BackendArgs {
    /// Backend base URL (overrides MINUTES_API_BASE_URL).
    #[arg(long)]
    base_url: Option<String>,
}

impl BackendArgs {
    fn config(&self, poll_ms: Option<u64>) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::from_env().context("reading MINUTES_* environment")?;
        if let Some(base_url) = &self.base_url {
            config = config.base_url(base_url.clone());
        }
        if let Some(ms) = poll_ms {
            config = config.poll_interval(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_observability();
    let cli = Cli::parse();

    match cli.command {
        Command::Watch {
            job_id,
            stream,
            poll_ms,
            backend,
        } => watch_job(JobId::new(job_id), stream, backend.config(poll_ms)?).await,
        Command::Exports { job_id, backend } => {
            let config = backend.config(None)?;
            let job_id = JobId::new(job_id);
            for format in ExportFormat::ALL {
                println!("{:<4} {}", format.extension(), config.export_url(&job_id, format));
            }
            Ok(())
        }
    }
}

async fn watch_job(job_id: JobId, stream: bool, config: ClientConfig) -> anyhow::Result<()> {
    let mut session = JobSession::with_http(HttpJobApi::new(config)?);
    let mut updates = session.state().subscribe();
    session.watch_job(job_id.clone());
    tracing::info!(session_id = %session.session_id(), %job_id, "watch started");

    let finished = wait_for_terminal(&mut updates).await?;
    session.close();
    match finished.status {
        JobStatus::Done => print_result(&finished),
        _ => bail!(
            "job {job_id} failed: {}",
            finished.error.as_deref().unwrap_or("unknown error")
        ),
    }

    if stream {
        println!("\nTL;DR:");
        stream_tldr(&session, &mut updates).await?;
    }
    Ok(())
}

async fn wait_for_terminal(updates: &mut watch::Receiver<Snapshot>) -> anyhow::Result<Snapshot> {
    let mut last_status = None;
    loop {
        let snapshot = updates.borrow_and_update().clone();
        if last_status != Some(snapshot.status) {
            println!("status: {}", snapshot.status);
            last_status = Some(snapshot.status);
        }
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }
        updates.changed().await.context("session state closed")?;
    }
}

fn print_result(snapshot: &Snapshot) {
    let Some(result) = &snapshot.result else {
        return;
    };
    println!(
        "language: {}  duration: {:.0}s  speakers: {}",
        result.language.as_deref().unwrap_or("?"),
        result.duration_sec,
        result.speakers.join(", ")
    );
    for item in &result.summary.action_items {
        match &item.owner {
            Some(owner) => println!("  - {} ({owner})", item.text),
            None => println!("  - {}", item.text),
        }
    }
}

/// Runs the summary stream and echoes new TL;DR text as it arrives.
async fn stream_tldr(
    session: &JobSession,
    updates: &mut watch::Receiver<Snapshot>,
) -> anyhow::Result<()> {
    use std::io::Write as _;

    let mut printed = 0;
    let mut echo = |snapshot: &Snapshot| {
        let text = &snapshot.stream.tldr_stream;
        if text.len() > printed {
            print!("{}", &text[printed..]);
            let _ = std::io::stdout().flush();
            printed = text.len();
        }
    };

    let streaming = session.stream_summary();
    tokio::pin!(streaming);
    let outcome = loop {
        tokio::select! {
            outcome = &mut streaming => break outcome?,
            changed = updates.changed() => {
                changed.context("session state closed")?;
                echo(&updates.borrow_and_update());
            }
        }
    };
    echo(&session.state().snapshot());
    println!();

    outcome.into_result().map_err(SyncError::from)?;
    Ok(())
}
