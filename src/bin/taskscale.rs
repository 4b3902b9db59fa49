//! taskscale CLI — run the autoscaled worker pool and manage work items.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use taskscale::config::secrets::ExposeSecret;
use taskscale::config::{Config, ScalingFile};
use taskscale::db::Db;
use taskscale::engine::{Autoscaler, SimulatedProcessor, WorkerPool};
use taskscale::model::work::{NewWorkItem, Status, WorkId};
use taskscale::notify::{DEFAULT_SERVICE, LogNotifier};
use taskscale::store::{InMemoryStore, WorkItemStore};
use taskscale::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};

#[derive(Parser)]
#[command(name = "taskscale", about = "Elastic worker pool driven by queue depth")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pool and autoscaler against Postgres
    Serve {
        /// TOML scaling file; TASKSCALE_* env vars override it
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the pool and autoscaler over an in-memory queue
    Simulate {
        /// Number of work items to seed
        #[arg(long, default_value_t = 7)]
        items: usize,
        /// TOML scaling file; TASKSCALE_* env vars override it
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Work item operations
    Work {
        #[command(subcommand)]
        action: WorkAction,
    },
}

#[derive(Subcommand)]
enum WorkAction {
    /// Submit a new pending work item
    Submit {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List work items
    List {
        /// Filter by status (pending, in_progress, completed)
        #[arg(long)]
        status: Option<String>,
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a work item
    Show {
        /// Work item ID (full UUID)
        id: String,
        /// Print the item as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => cmd_serve(config).await,
        Command::Simulate { items, config } => cmd_simulate(items, config).await,
        Command::Work { action } => {
            let config = Config::from_env()?;
            let db = Db::connect(config.database_url.expose_secret(), 2).await?;
            db.migrate().await?;

            match action {
                WorkAction::Submit { title, description } => {
                    let item = db
                        .submit_work(NewWorkItem::new(title).description(description))
                        .await?;
                    println!("Created: {} (status: {})", item.id.0, item.status);
                    Ok(())
                }
                WorkAction::List { status, limit } => cmd_work_list(&db, status, limit).await,
                WorkAction::Show { id, json } => cmd_work_show(&db, id, json).await,
            }
        }
    }
}

fn scaling_config(path: Option<PathBuf>) -> anyhow::Result<ScalingFile> {
    Ok(ScalingFile::resolve(path.as_deref())?)
}

/// Shut telemetry down after the final report. Export failures go to
/// stderr; the run itself already succeeded.
fn finish_telemetry(guard: TelemetryGuard) {
    if let Err(e) = guard.finish() {
        eprintln!("warning: {e}");
    }
}

fn telemetry(endpoint: Option<String>, level: String) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint,
        service_name: "taskscale".to_string(),
        default_level: level,
    })?)
}

async fn cmd_serve(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let scaling = scaling_config(path)?;
    let guard = telemetry(config.otel_endpoint.clone(), config.log_level.clone())?;

    // One connection per worker plus one for the autoscaler.
    let connections = scaling.pool.max_workers as u32 + 1;
    let db = Db::connect(config.database_url.expose_secret(), connections).await?;
    db.migrate().await?;
    db.health_check().await?;

    let store: Arc<dyn WorkItemStore> = Arc::new(db);
    run_pool(store, scaling, LogNotifier::new(config.notify_service)).await?;
    finish_telemetry(guard);
    Ok(())
}

async fn cmd_simulate(items: usize, path: Option<PathBuf>) -> anyhow::Result<()> {
    let scaling = scaling_config(path)?;
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let guard = telemetry(std::env::var("OTEL_ENDPOINT").ok(), level)?;

    let store = Arc::new(InMemoryStore::new());
    for n in 1..=items {
        store.enqueue(NewWorkItem::new(format!("Task {n}")).description("simulated work"));
    }

    let service = std::env::var("AWS_SERVICE").unwrap_or_else(|_| DEFAULT_SERVICE.to_string());
    run_pool(store, scaling, LogNotifier::new(service)).await?;
    finish_telemetry(guard);
    Ok(())
}

/// Start the pool, run the autoscaler until it drains or Ctrl-C, then shut
/// the pool down and print what happened.
async fn run_pool(
    store: Arc<dyn WorkItemStore>,
    scaling: ScalingFile,
    notifier: LogNotifier,
) -> anyhow::Result<()> {
    let pool = Arc::new(
        WorkerPool::start(
            store,
            Arc::new(notifier),
            Arc::new(SimulatedProcessor::new(scaling.processing_time)),
            scaling.pool,
        )
        .await?,
    );
    let autoscaler = Autoscaler::new(Arc::clone(&pool), scaling.autoscaler)?;

    let ctrl = autoscaler.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    let report = autoscaler.run().await;
    let shutdown = pool.shutdown().await;

    println!(
        "Autoscaler: {:?} after {} tick(s), {} scale-up(s), {} scale-down(s), peak {} worker(s), {} sampling error(s)",
        report.exit,
        report.ticks,
        report.scale_ups,
        report.scale_downs,
        report.peak_workers,
        report.sample_errors
    );
    println!(
        "Pool: {} worker(s) stopped, {} aborted, {} item(s) left in progress",
        shutdown.workers_stopped,
        shutdown.workers_aborted,
        shutdown
            .abandoned_in_progress
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    Ok(())
}

async fn cmd_work_list(db: &Db, status: Option<String>, limit: i64) -> anyhow::Result<()> {
    let status_filter: Option<Status> = match status {
        Some(s) => Some(
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
        ),
        None => None,
    };

    let items = db.list_work_items(status_filter, limit).await?;

    if items.is_empty() {
        println!("No work items found.");
        return Ok(());
    }

    println!("{:<8}  {:<12}  {:<40}  CREATED", "ID", "STATUS", "TITLE");
    println!("{}", "-".repeat(80));

    for item in &items {
        let title: String = item.title.chars().take(40).collect();
        println!(
            "{:<8}  {:<12}  {:<40}  {}",
            item.id.to_string(),
            item.status.to_string(),
            title,
            item.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} item(s)", items.len());
    Ok(())
}

async fn cmd_work_show(db: &Db, id_str: String, json: bool) -> anyhow::Result<()> {
    let id = WorkId(uuid::Uuid::parse_str(&id_str)?);
    let item = db.get_work_item(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    println!("ID:          {}", item.id.0);
    println!("Title:       {}", item.title);
    println!("Status:      {}", item.status);
    println!("Description: {}", item.description);
    println!("Created:     {}", item.created_at);
    println!("Updated:     {}", item.updated_at);
    if let Some(claimed) = item.claimed_at {
        println!("Claimed:     {claimed}");
    }
    if let Some(completed) = item.completed_at {
        println!("Completed:   {completed}");
    }

    Ok(())
}
