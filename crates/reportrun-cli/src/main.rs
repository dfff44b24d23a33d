//! ReportRun CLI - submit research tasks and follow their delivery.

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use reportrun_client::{
    DeliveryConfig, DeliveryOutcome, DeliverySession, DeliveryState, DeliveryUpdate, HttpChannel,
};
use reportrun_core::{ResearchRequest, TaskRunId};

/// ReportRun CLI - research report delivery tool
#[derive(Parser)]
#[command(name = "reportrun")]
#[command(about = "CLI for the ReportRun delivery server", long_about = None)]
struct Cli {
    /// Delivery server base URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new research task
    Submit {
        /// Subject of the report
        #[arg(short, long)]
        topic: String,

        /// Optional geographic focus
        #[arg(short, long)]
        region: Option<String>,

        /// Optional free-text refinement
        #[arg(short, long)]
        notes: Option<String>,

        /// Follow delivery until the task resolves
        #[arg(short, long)]
        follow: bool,
    },

    /// Follow delivery of an existing task run
    Watch {
        /// Task run id
        id: String,
    },

    /// One-shot status check (finalizes if the task is done)
    Status {
        /// Task run id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let channel = HttpChannel::new(&cli.server);

    match cli.command {
        Commands::Submit {
            topic,
            region,
            notes,
            follow,
        } => {
            let mut request = ResearchRequest::new(topic);
            request.region = region;
            request.notes = notes;

            let submitted = channel.submit(&request).await?;
            println!("task run id: {}", submitted.task_run_id);

            if follow {
                let id = TaskRunId::new(submitted.task_run_id);
                follow_delivery(channel, id).await?;
            }
        }
        Commands::Watch { id } => {
            follow_delivery(channel, TaskRunId::new(id)).await?;
        }
        Commands::Status { id } => {
            check_status(channel, TaskRunId::new(id)).await?;
        }
    }

    Ok(())
}

/// Run a delivery session and render its updates until resolution.
async fn follow_delivery(
    channel: HttpChannel,
    id: TaskRunId,
) -> Result<(), Box<dyn std::error::Error>> {
    let (session, handle, mut updates) = DeliverySession::new(channel, id, DeliveryConfig::default());
    let mut run = tokio::spawn(session.run());

    loop {
        tokio::select! {
            outcome = &mut run => {
                return render_outcome(outcome?);
            }
            Some(update) = updates.recv() => {
                render_update(&update);
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("abandoning...");
                handle.abandon().await;
            }
        }
    }
}

fn render_update(update: &DeliveryUpdate) {
    match update {
        DeliveryUpdate::StateChanged(state) => {
            let label = match state {
                DeliveryState::Connecting => "connecting",
                DeliveryState::Streaming => "streaming",
                DeliveryState::Reconnecting => "reconnecting",
                DeliveryState::FallbackResolving => "resolving",
                DeliveryState::PeriodicPolling => "polling",
                DeliveryState::Resolved => "resolved",
            };
            println!("-- {label}");
        }
        DeliveryUpdate::Progress {
            sources_processed,
            sources_total,
        } => {
            println!("   sources {sources_processed}/{sources_total}");
        }
        DeliveryUpdate::Log { level, message } => {
            println!("   [{level:?}] {message}");
        }
        DeliveryUpdate::Reconnecting { attempt, delay } => {
            println!("   retry {attempt} in {}s", delay.as_secs());
        }
    }
}

fn render_outcome(outcome: DeliveryOutcome) -> Result<(), Box<dyn std::error::Error>> {
    match outcome {
        DeliveryOutcome::Success(report) => {
            if let Some(title) = &report.title {
                println!("\n{title}\n");
            }
            if let Some(content) = &report.content {
                println!("{content}");
            }
            Ok(())
        }
        DeliveryOutcome::Failure { status, message } => {
            Err(format!("delivery failed ({status:?}): {message}").into())
        }
        DeliveryOutcome::Abandoned => {
            println!("abandoned");
            Ok(())
        }
    }
}

/// Manual check: poll the snapshot and finalize if the run is done.
async fn check_status(
    channel: HttpChannel,
    id: TaskRunId,
) -> Result<(), Box<dyn std::error::Error>> {
    use reportrun_client::ProgressChannel;

    let snapshot = channel.poll_status(&id).await?;
    println!("status: {:?}", snapshot.status);

    if snapshot.is_complete {
        let report = channel.finalize(&id).await?;
        if let Some(title) = &report.title {
            println!("\n{title}\n");
        }
        if let Some(content) = &report.content {
            println!("{content}");
        }
        if let Some(error) = &report.error {
            println!("error: {error}");
        }
    }

    Ok(())
}
