use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use cplane_admin::convert::{parse_delete_status, FLUSH, REQUEST_ID};
use cplane_admin::{
    CollectionsHandler, ExecutionMode, ForceLeaderConfig, ModeKind, OrchestratorConfig, Params,
    QueueTaskRegistry,
};
use cplane_consensus::{CommandExecutor, LocalCommandRunner};
use cplane_store::{CommandQueue, FjallCoordinationStore, TermStore};
use cplane_types::{CommandEnvelope, CommandResponse, CplaneError};

#[derive(clap::Parser, Debug)]
#[command(name = "cplane-node", about = "Collection command control plane: operator tool")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `storage.data_dir`.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Report what happened to an async request.
    Status { request_id: String },
    /// Remove one stored async result (`--requestid`) or all of them (`--flush`).
    DeleteStatus {
        #[arg(long = "requestid")]
        request_id: Option<String>,
        #[arg(long)]
        flush: bool,
    },
    /// List queued commands the leader has not taken yet.
    Pending,
    /// Show the replica term table of a shard.
    Terms { collection: String, shard: String },
    /// Queue a collection command under an async id, e.g.
    /// `submit create --async-id job-1 -p name=orders -p numShards=1`.
    Submit {
        action: String,
        #[arg(long)]
        async_id: String,
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },
    /// Print the effective configuration.
    ShowConfig,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw}"))
}

#[derive(Debug, Deserialize)]
struct StorageConfig {
    data_dir: String,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    orchestrator: OrchestratorConfig,
    force_leader: ForceLeaderConfig,
    storage: StorageConfig,
    observability: ObservabilityConfig,
}

/// This tool only enqueues and inspects; it never executes commands.
struct NoExecutor;

impl CommandExecutor for NoExecutor {
    async fn execute(&self, envelope: CommandEnvelope) -> Result<CommandResponse, CplaneError> {
        Err(CplaneError::Consensus(format!(
            "{} cannot be executed by the operator tool",
            envelope.operation
        )))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new()
        .merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let config: Config = figment
        .merge(Env::prefixed("CPLANE_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    let log_format = config.observability.log_format.as_str();
    match log_format {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
    }

    if let Command::ShowConfig = cli.command {
        println!("{config:#?}");
        return Ok(());
    }

    if config.orchestrator.mode == ModeKind::Direct {
        anyhow::bail!("the durable store only tracks queue-mode commands; orchestrator.mode is direct");
    }

    let data_dir = cli.data_dir.unwrap_or_else(|| PathBuf::from(&config.storage.data_dir));
    tracing::info!(data_dir = %data_dir.display(), "opening coordination store");
    let store = Arc::new(
        FjallCoordinationStore::open(&data_dir)
            .with_context(|| format!("failed to open store at {}", data_dir.display()))?,
    );

    match cli.command {
        Command::Status { request_id } => {
            let status = QueueTaskRegistry::new(store).query_status(&request_id).await?;
            println!("{}: {}", status.state, status.message);
            if let Some(resp) = status.response {
                println!("{resp:#?}");
            }
        }
        Command::DeleteStatus { request_id, flush } => {
            let mut params = Params::new().with(FLUSH, flush.to_string());
            if let Some(id) = request_id {
                params = params.with(REQUEST_ID, id);
            }
            let request = parse_delete_status(&params)?;
            let handler = queue_handler(store, &config);
            let outcome = handler.delete_status(request).await?;
            println!("{}", outcome.message);
        }
        Command::Pending => {
            for entry in store.pending().await? {
                match CommandEnvelope::from_bytes(&entry.payload) {
                    Ok(env) => println!(
                        "{}\t{}\t{}",
                        entry.id,
                        env.operation,
                        env.async_id.as_deref().unwrap_or("-")
                    ),
                    Err(e) => println!("{}\t<undecodable: {e}>", entry.id),
                }
            }
        }
        Command::Terms { collection, shard } => {
            let terms = store.shard_terms(&collection, &shard).await?;
            println!("version {}", terms.version);
            for (replica, term) in &terms.terms {
                let eligible = if terms.can_become_leader(replica) { " (eligible)" } else { "" };
                println!("{replica}\t{term}{eligible}");
            }
        }
        Command::Submit { action, async_id, params } => {
            let params: Params = params.into_iter().chain([("async".to_string(), async_id)]).collect();
            let handler = queue_handler(store, &config);
            let resp = handler.handle(&action, &params).await?;
            match (resp.duplicate_task, resp.error) {
                (true, Some(err)) => println!("{err}"),
                _ => println!("queued {}", resp.request_id.unwrap_or_default()),
            }
        }
        Command::ShowConfig => {}
    }

    Ok(())
}

fn queue_handler(
    store: Arc<FjallCoordinationStore>,
    config: &Config,
) -> CollectionsHandler<FjallCoordinationStore, LocalCommandRunner<NoExecutor>> {
    CollectionsHandler::new(
        store,
        ExecutionMode::Queue,
        config.orchestrator.clone(),
        config.force_leader.clone(),
    )
}
