//! hookify CLI: run workers and operate the idea request queue.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hookify_worker::config::Config;
use hookify_worker::config::secrets::redact_url;
use hookify_worker::db::Db;
use hookify_worker::engine::{GenerateStage, NotifyStage, Shutdown, Stage, StageKind, WorkerLoop};
use hookify_worker::event::EventBus;
use hookify_worker::llm::{IdeaGenerator, openai_generator};
use hookify_worker::model::{NewWorkItem, Status, WorkId};
use hookify_worker::storage::QueueStore;
use hookify_worker::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Startup ping deadline. An unreachable database stops the process here.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "hookify", about = "Idea generation request worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run worker loops until Ctrl-C or a fatal store error
    Run {
        /// Number of worker loops in this process; ids get a -N suffix when > 1
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Enqueue a new request
    Submit {
        /// Requester / tenant key
        owner_key: String,
        /// Topic to generate ideas for
        topic: String,
    },
    /// List requests
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a request
    Show {
        /// Request ID
        id: String,
    },
    /// Show the generated ideas for a request
    Outputs {
        /// Request ID
        id: String,
    },
    /// Apply pending migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    if let Command::Run { workers } = cli.command {
        return cmd_run(config, workers).await;
    }

    let db = Db::connect(config.database_url.expose_secret(), config.store_timeout).await?;
    db.migrate().await?;
    operate(&db, cli.command).await
}

/// Queue operator commands; everything except `run`.
async fn operate(db: &Db, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Submit { owner_key, topic } => cmd_submit(db, owner_key, topic).await,
        Command::List { status, limit } => cmd_list(db, status, limit).await,
        Command::Show { id } => cmd_show(db, id).await,
        Command::Outputs { id } => cmd_outputs(db, id).await,
        Command::Migrate | Command::Run { .. } => {
            println!("Migrations applied.");
            Ok(())
        }
    }
}

async fn cmd_run(config: Config, workers: usize) -> anyhow::Result<()> {
    anyhow::ensure!(workers > 0, "--workers must be at least 1");

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "hookify-worker".to_string(),
        instance_id: Some(config.worker_id.clone()),
        default_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret(), config.store_timeout).await?;
    db.health_check(PING_TIMEOUT).await?;
    db.migrate().await?;
    info!(database = %redact_url(&config.database_url), "database ready");

    let store: Arc<dyn QueueStore> = Arc::new(db.clone());
    let bus: Arc<dyn EventBus> = match &config.bus_database_url {
        Some(url) => Arc::new(Db::connect(url.expose_secret(), config.store_timeout).await?),
        None => Arc::new(db),
    };
    let generator: Option<Arc<dyn IdeaGenerator>> = match &config.openai_api_key {
        Some(key) if config.stages.contains(&StageKind::Generate) => {
            let generator: Arc<dyn IdeaGenerator> =
                Arc::new(openai_generator(key, &config.openai_model)?);
            Some(generator)
        }
        _ => None,
    };

    let shutdown = Shutdown::new();
    let mut loops = JoinSet::new();

    for n in 0..workers {
        let mut worker_config = config.worker_config();
        if workers > 1 {
            worker_config.worker_id = format!("{}-{}", worker_config.worker_id, n + 1);
        }
        let stages = build_stages(&config, &store, &bus, generator.as_ref())?;
        let worker = WorkerLoop::new(Arc::clone(&store), worker_config, stages)?
            .with_shutdown(shutdown.clone());
        loops.spawn(async move { worker.run().await });
    }

    let ctrl = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("interrupt received, finishing in-flight work");
        ctrl.trigger();
    });

    let mut first_error: Option<anyhow::Error> = None;
    while let Some(joined) = loops.join_next().await {
        let outcome = match joined {
            Ok(result) => result.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::Error::from(e)),
        };
        if let Err(e) = outcome {
            error!(error = %e, "worker stopped");
            shutdown.trigger();
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn build_stages(
    config: &Config,
    store: &Arc<dyn QueueStore>,
    bus: &Arc<dyn EventBus>,
    generator: Option<&Arc<dyn IdeaGenerator>>,
) -> anyhow::Result<Vec<Box<dyn Stage>>> {
    config
        .stages
        .iter()
        .map(|kind| -> anyhow::Result<Box<dyn Stage>> {
            let stage: Box<dyn Stage> = match kind {
                StageKind::Notify => Box::new(NotifyStage::new(
                    Arc::clone(bus),
                    config.notify_channel.clone(),
                    config.store_timeout,
                )),
                StageKind::Generate => {
                    let generator = generator
                        .ok_or_else(|| anyhow::anyhow!("generate stage needs OPENAI_API_KEY"))?;
                    Box::new(GenerateStage::new(
                        Arc::clone(generator),
                        Arc::clone(store),
                        config.store_timeout,
                    ))
                }
            };
            Ok(stage)
        })
        .collect()
}

async fn cmd_submit(db: &Db, owner_key: String, topic: String) -> anyhow::Result<()> {
    let item = db.enqueue(NewWorkItem::new(owner_key, topic)).await?;
    println!("Queued: {} (status: {})", item.id, item.status);
    Ok(())
}

async fn cmd_list(db: &Db, status: Option<String>, limit: i64) -> anyhow::Result<()> {
    let status_filter: Option<Status> = match status {
        Some(s) => Some(
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
        ),
        None => None,
    };

    let items = db.list(status_filter, limit).await?;

    if items.is_empty() {
        println!("No requests found.");
        return Ok(());
    }

    // Header
    println!(
        "{:<36}  {:<10}  {:<16}  {:<12}  {:<30}  CREATED",
        "ID", "STATUS", "OWNER", "LOCKED_BY", "TOPIC"
    );
    println!("{}", "-".repeat(130));

    for item in &items {
        let topic: String = item.topic.chars().take(30).collect();
        let owner: String = item.owner_key.chars().take(16).collect();
        println!(
            "{:<36}  {:<10}  {:<16}  {:<12}  {:<30}  {}",
            item.id,
            item.status,
            owner,
            item.locked_by.as_deref().unwrap_or("-"),
            topic,
            item.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} item(s)", items.len());
    Ok(())
}

async fn cmd_show(db: &Db, id: String) -> anyhow::Result<()> {
    let id: WorkId = id.parse()?;
    let item = db.get(id).await?;

    println!("ID:         {}", item.id);
    println!("Owner:      {}", item.owner_key);
    println!("Topic:      {}", item.topic);
    println!("Status:     {}", item.status);
    println!("Attempts:   {}", item.attempts);
    println!("Locked By:  {}", item.locked_by.as_deref().unwrap_or("-"));
    println!("Created:    {}", item.created_at);
    if let Some(started) = item.started_at {
        println!("Started:    {started}");
    }
    if let Some(locked) = item.locked_at {
        println!("Locked:     {locked}");
    }
    if let Some(lease) = item.lease_expires_at {
        println!("Lease Ends: {lease}");
    }
    if let Some(finished) = item.finished_at {
        println!("Finished:   {finished}");
    }
    if let Some(ref err) = item.last_error {
        println!("Error:      {err}");
    }

    Ok(())
}

async fn cmd_outputs(db: &Db, id: String) -> anyhow::Result<()> {
    let id: WorkId = id.parse()?;
    let outputs = db.outputs(id).await?;

    if outputs.is_empty() {
        println!("No ideas stored for {id}.");
        return Ok(());
    }

    for out in &outputs {
        println!("#{} {}", out.idx, out.idea.title);
        println!("   hook:   {}", out.idea.hook);
        println!("   script: {}", out.idea.script);
        println!("   cta:    {}", out.idea.cta);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_and_operator_commands() {
        let cli = Cli::try_parse_from(["hookify", "run", "--workers", "4"]).unwrap();
        assert!(matches!(cli.command, Command::Run { workers: 4 }));

        let cli = Cli::try_parse_from(["hookify", "submit", "acme", "cold brew"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Submit { ref owner_key, ref topic } if owner_key == "acme" && topic == "cold brew"
        ));

        let cli = Cli::try_parse_from(["hookify", "list", "--status", "failed"]).unwrap();
        assert!(matches!(cli.command, Command::List { limit: 20, .. }));
    }
}
