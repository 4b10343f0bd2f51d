use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use conclave::adapters::{PostgresCheckpointStore, PostgresStore};
use conclave::exchange::adapter::UnboundExchangeFactory;
use conclave::pipeline::PluginRegistry;
use conclave::services::status_file::StatusPublisher;
use conclave::{AppConfig, BotSupervisor, SharedDeps};

#[derive(Parser)]
#[command(name = "conclave", about = "AI-driven trading orchestration core")]
struct Cli {
    /// Configuration directory (default.toml / local.toml)
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor with the given bots
    Run {
        /// Bot ids to start; every active bot when omitted
        #[arg(long)]
        bot_id: Vec<i64>,
    },
    /// List configured bots
    ListBots,
    /// Show the last published status of a bot
    Status {
        #[arg(long)]
        bot_id: i64,
    },
    /// Create the database schema if it does not exist
    InitDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone())),
        )
        .init();

    let store = PostgresStore::connect(&config.database.url, config.database.max_connections)
        .await?;
    store.init_schema().await?;

    match cli.command {
        Command::InitDb => {
            info!("schema ready");
            Ok(())
        }
        Command::ListBots => {
            use conclave::adapters::Store;
            let bots = store.list_bots().await?;
            for bot in bots {
                println!(
                    "{:>4}  {:<24} {:<8} exchange={} workflow={} active={}",
                    bot.id,
                    bot.name,
                    bot.trading_mode,
                    bot.exchange_id,
                    bot.workflow_id,
                    bot.is_active
                );
            }
            Ok(())
        }
        Command::Status { bot_id } => {
            let publisher = StatusPublisher::new(&config.paths.status_dir);
            match publisher.read(bot_id) {
                Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                None => println!("no status published for bot {}", bot_id),
            }
            Ok(())
        }
        Command::Run { bot_id } => run(config, store, bot_id).await,
    }
}

async fn run(config: AppConfig, store: PostgresStore, bot_ids: Vec<i64>) -> anyhow::Result<()> {
    let status = StatusPublisher::new(&config.paths.status_dir);
    let checkpoints = Arc::new(PostgresCheckpointStore::new(store.pool().clone()));

    let supervisor = Arc::new(BotSupervisor::new(SharedDeps {
        config,
        store: Arc::new(store),
        checkpoints,
        registry: Arc::new(PluginRegistry::with_builtins()),
        // Venue bindings are supplied by the embedding deployment; the bare
        // binary refuses to start bots until one is registered
        exchange_factory: Arc::new(UnboundExchangeFactory),
        status,
    }));

    let bot_ids = if bot_ids.is_empty() {
        supervisor
            .list_bots()
            .await?
            .into_iter()
            .filter(|b| b.is_active)
            .map(|b| b.id)
            .collect()
    } else {
        bot_ids
    };

    if bot_ids.is_empty() {
        info!("no active bots to run");
        return Ok(());
    }

    for bot_id in &bot_ids {
        if let Err(e) = supervisor.start(*bot_id).await {
            error!(bot_id, "failed to start: {}", e);
        }
    }
    info!(bots = bot_ids.len(), "supervisor running; ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    supervisor.stop_all().await;
    info!("all bots stopped");
    Ok(())
}
