use std::{env, path::PathBuf};

use clap::{Parser, Subcommand};

pub mod config;
pub mod extract;
pub mod list;
pub mod models;
pub mod node;
pub mod run;
pub mod schema;
pub mod secrets;

use config::ConfigArgs;
use extract::ExtractArgs;
use models::ModelsArgs;
use node::NodeArgs;
use run::RunArgs;
use secrets::SecretArgs;

use crate::config::ConfigManager;
use crate::node::NodeContext;
use crate::provider::RetryPolicy;
use crate::secret::SecretsManager;

#[derive(Parser, Debug)]
#[command(
    name = "promptnodes",
    about = "LLM prompt, chat, vision and translation nodes",
    version
)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// OpenTelemetry endpoint (e.g. http://localhost:4318). Logs go to files when absent.
    #[arg(long, global = true)]
    pub otel_endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job file of node steps
    Run(RunArgs),

    /// Run a single node once
    Node(NodeArgs),

    /// Extract named fields from text
    Extract(ExtractArgs),

    /// List registered node classes
    List,

    /// Emit JSON‐Schema for every node into `<root>/schemas`
    Schema,

    /// List the models a provider offers
    Models(ModelsArgs),

    /// Handle secrets
    Secrets(SecretArgs),

    /// Handle configuration
    Config(ConfigArgs),
}

#[derive(Clone)]
pub struct CliContext {
    pub root: PathBuf,
    pub config_manager: ConfigManager,
    pub secrets_manager: SecretsManager,
}

impl CliContext {
    pub fn new(root: PathBuf, config_manager: ConfigManager, secrets_manager: SecretsManager) -> Self {
        Self {
            root,
            config_manager,
            secrets_manager,
        }
    }

    /// Node context over this CLI's config and secrets, with the retry
    /// policy read from config.
    pub async fn node_context(&self) -> NodeContext {
        let retry = RetryPolicy::from_config(&self.config_manager).await;
        NodeContext::new(self.config_manager.clone(), self.secrets_manager.clone()).with_retry(retry)
    }
}

/// Resolve the promptnodes root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    match env::var("PROMPTNODES_ROOT") {
        Ok(path) => PathBuf::from(path),
        Err(_) => PathBuf::from("./promptnodes"),
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Node(args) => node::execute(args, context).await,
        Commands::Extract(args) => extract::execute(args),
        Commands::List => list::execute(),
        Commands::Schema => schema::execute(context),
        Commands::Models(args) => models::execute(args, context).await,
        Commands::Secrets(args) => secrets::execute(args, context).await,
        Commands::Config(args) => config::execute(args, context).await,
    }
}
