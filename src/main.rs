use std::error::Error;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use catalog_jobs::config::AppConfig;
use catalog_jobs::models::fleet::FleetSnapshot;
use catalog_jobs::models::job::{Domain, JobKind, ScrapeParams};
use catalog_jobs::models::outcome::TaskOutcome;
use catalog_jobs::models::status::{StatusRecord, TaskState};
use catalog_jobs::services::status_client::{HttpStatusClient, TaskBackend};
use catalog_jobs::{JobEvent, JobHandle, JobTracker};
use chrono::Utc;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a query and import the products into the catalog
    Import {
        query: String,
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
        #[arg(short, long, default_value = "kz")]
        domain: Domain,
    },
    /// Parse a query without importing anything
    Preview {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
        #[arg(short, long, default_value = "kz")]
        domain: Domain,
    },
    /// Run the fixed parse/import smoke chain
    SmokeChain,
    /// Run the parser smoke test
    SmokeParser {
        #[arg(default_value = "jeans")]
        query: String,
        #[arg(short, long, default_value_t = 5)]
        limit: u32,
        #[arg(short, long, default_value = "kz")]
        domain: Domain,
    },
    /// Follow a job that is already running on the fleet
    Watch { task_id: String },
    /// Revoke a job
    Cancel { task_id: String },
    /// Print fleet snapshots until interrupted
    Fleet,
    /// Check worker and queue availability
    Health,
}

#[tokio::main]
async fn main() {
    // Structured logs go to stderr so command output stays readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("METRICS_ADDR is not a socket address");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_metrics();
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    let client = Arc::new(
        HttpStatusClient::new(
            &config.api_base_url,
            config.api_token.clone(),
            config.request_timeout(),
        )
        .expect("Failed to initialize catalog API client"),
    );

    if let Err(e) = run(cli.command, client, &config).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn describe_metrics() {
    metrics::describe_counter!("catalog_job_polls_total", "Status polls by outcome");
    metrics::describe_histogram!("catalog_job_poll_seconds", "Latency of one status poll");
    metrics::describe_counter!("catalog_jobs_submitted_total", "Jobs submitted by kind");
    metrics::describe_counter!("catalog_jobs_finished_total", "Jobs that reached a final state");
    metrics::describe_counter!("catalog_jobs_cancelled_total", "Jobs cancelled by the user");
    metrics::describe_gauge!("catalog_jobs_tracked", "Jobs currently visible");
    metrics::describe_counter!(
        "catalog_fleet_refresh_failures_total",
        "Failed fleet list or stats calls"
    );
}

async fn run(
    command: Commands,
    client: Arc<HttpStatusClient>,
    config: &AppConfig,
) -> Result<(), Box<dyn Error>> {
    let kind = match command {
        Commands::Import { query, limit, domain } => {
            JobKind::FullImport(ScrapeParams::new(query, limit).with_domain(domain))
        }
        Commands::Preview { query, limit, domain } => {
            JobKind::PreviewOnly(ScrapeParams::new(query, limit).with_domain(domain))
        }
        Commands::SmokeChain => JobKind::SmokeChain,
        Commands::SmokeParser { query, limit, domain } => {
            JobKind::SmokeParser(ScrapeParams::new(query, limit).with_domain(domain))
        }
        Commands::Watch { task_id } => return watch(client, config, task_id).await,
        Commands::Cancel { task_id } => {
            let tracker = JobTracker::start(client, config.tracker_settings());
            tracker.cancel(&JobHandle::new(task_id.clone())).acknowledged().await?;
            println!("Cancelled {}", task_id);
            return Ok(());
        }
        Commands::Fleet => return fleet(client, config).await,
        Commands::Health => {
            let health = client.health().await?;
            println!(
                "{}: {} workers, {} queues",
                health.status, health.celery_workers, health.active_queues
            );
            if let Some(error) = &health.error {
                println!("  {}", error);
            }
            return if health.is_healthy() {
                Ok(())
            } else {
                Err("catalog workers are not available".into())
            };
        }
    };

    let tracker = JobTracker::start(client, config.tracker_settings());
    let handle = tracker.submit(kind).await?;
    println!("Submitted {}", handle);
    follow(&tracker, &handle).await
}

async fn watch(
    client: Arc<HttpStatusClient>,
    config: &AppConfig,
    task_id: String,
) -> Result<(), Box<dyn Error>> {
    let active = client.list_active().await?;
    let kind = active
        .iter()
        .find(|t| t.task_id == task_id)
        .and_then(|t| t.job_kind());

    match kind {
        Some(kind) => {
            let tracker = JobTracker::start(client, config.tracker_settings());
            let handle = tracker.track(task_id, kind)?;
            follow(&tracker, &handle).await
        }
        None => {
            // Not running any more (or not a catalog job): report once.
            let record = client.get_status(&task_id).await?;
            print_status(&task_id, &record);
            if record.state == TaskState::Success {
                print_outcome(&client.get_result(&task_id).await?);
            }
            Ok(())
        }
    }
}

async fn follow(tracker: &JobTracker, handle: &JobHandle) -> Result<(), Box<dyn Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tracker.on_status(handle, move |event| {
        let _ = tx.send(event.clone());
    })?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("Cancelling {}", handle);
                tracker.cancel(handle).acknowledged().await?;
                return Ok(());
            }
            event = rx.recv() => match event {
                None => return Ok(()),
                Some(JobEvent::Status(record)) => {
                    print_status(handle.id(), &record);
                    match record.state {
                        TaskState::Failure => {
                            return Err(format!(
                                "job {} failed: {}",
                                handle,
                                record.error_detail.as_deref().unwrap_or("no details")
                            )
                            .into());
                        }
                        TaskState::Revoked => return Ok(()),
                        _ => {}
                    }
                }
                Some(JobEvent::ResultReady(outcome)) => {
                    print_outcome(&outcome);
                    if let Some(job) = tracker.registry().get(handle.id()) {
                        let took = job.elapsed(job.finished_at.unwrap_or_else(Utc::now));
                        println!("Finished in {}s", took.num_seconds());
                    }
                    return Ok(());
                }
                Some(JobEvent::ResultUnavailable(message)) => {
                    println!("Job succeeded but its result is unavailable: {}", message);
                    return Ok(());
                }
                Some(JobEvent::TimedOut(message)) | Some(JobEvent::WatchFailed(message)) => {
                    return Err(message.into());
                }
            }
        }
    }
}

async fn fleet(client: Arc<HttpStatusClient>, config: &AppConfig) -> Result<(), Box<dyn Error>> {
    let tracker = JobTracker::start(client, config.tracker_settings());
    tracker.subscribe_fleet(print_fleet);
    tokio::signal::ctrl_c().await?;
    Ok(())
}

fn print_status(task_id: &str, record: &StatusRecord) {
    let mut line = format!("[{}] {}", task_id, record.state);
    if let Some(percent) = record.percent() {
        line.push_str(&format!(" {}%", percent));
    }
    if let Some(phase) = record.progress.as_ref().and_then(|p| p.phase.as_deref()) {
        line.push_str(&format!(" - {}", phase));
    }
    if let Some(summary) = &record.result_summary {
        if let Some(found) = summary.total_found {
            line.push_str(&format!(" ({} found)", found));
        }
    }
    println!("{}", line);
}

fn print_outcome(outcome: &TaskOutcome) {
    println!(
        "Parsed {} products ({} ok, {} failed), quality {:.2}, {:.1}s",
        outcome.total_found,
        outcome.success_count,
        outcome.failed_count,
        outcome.quality_score,
        outcome.parsing_time
    );
    if let Some(error) = &outcome.error {
        println!("  error: {}", error);
    }
}

fn print_fleet(snapshot: &FleetSnapshot) {
    println!("{} active tasks", snapshot.active.len());
    for task in &snapshot.active {
        let started = task
            .started_at()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {} {} on {} since {}", task.task_id, task.name, task.worker, started);
    }
    if let Some(stats) = &snapshot.stats {
        println!(
            "catalog: {} items ({} this week), price {:.0}-{:.0}, avg {:.0}",
            stats.total_items,
            stats.recent_items_week,
            stats.price_range.min,
            stats.price_range.max,
            stats.price_range.average
        );
    }
}
