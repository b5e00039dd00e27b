use clap::Parser;
use promptnodes::{
    catalog::register_builtin_nodes,
    cli::{Cli, CliContext, execute, resolve_root_dir},
    config::{ConfigManager, EnvConfigManager},
    logger::{LogConfig, LogLevel, init_tracing},
    secret::{EnvSecretsManager, SecretsManager},
};
use tracing::{error, info};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = resolve_root_dir();

    let log_level = cli.log_level.parse::<LogLevel>().unwrap_or_else(|e| {
        eprintln!("{e}; using info");
        LogLevel::Info
    });
    let _telemetry = init_tracing(&LogConfig::new(&root, log_level, cli.otel_endpoint.clone()))?;
    info!(root = %root.display(), "promptnodes starting");

    let config = ConfigManager(EnvConfigManager::new(root.join("config").join(".env")));
    let secrets = SecretsManager(EnvSecretsManager::new(Some(root.join("secrets"))));
    let context = CliContext::new(root, config, secrets);

    register_builtin_nodes();
    let result = execute(&context, cli.command).await;
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}
