use anyhow::Context;
use clap::{Args, Subcommand};

use super::CliContext;
use crate::config::OLLAMA_API_URL;
use crate::provider::Provider;

const RETRY_KEYS: [&str; 4] = ["RETRY_ATTEMPTS", "RETRY_MULTIPLIER", "RETRY_MIN_SECS", "RETRY_MAX_SECS"];

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Set a value, e.g. `OLLAMA_API_URL http://gpu-box:11434`
    Add { key: String, value: String },
    Update { key: String, value: String },
    Delete { key: String },
}

fn is_known(key: &str) -> bool {
    key == OLLAMA_API_URL
        || RETRY_KEYS.contains(&key)
        || Provider::ALL.iter().any(|p| p.base_url_key() == key)
}

pub async fn execute(args: ConfigArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = &context.config_manager.0;
    match args.command {
        ConfigCommands::Add { key, value } | ConfigCommands::Update { key, value } => {
            if !is_known(&key) {
                println!("⚠️  `{key}` is not a setting promptnodes reads.");
            }
            config
                .set(&key, &value)
                .await
                .with_context(|| format!("config `{key}` could not be saved"))?;
            println!("✅ Config `{key}` saved.");
        }
        ConfigCommands::Delete { key } => {
            config.del(&key).await;
            println!("✅ Config `{key}` deleted.");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_endpoint_and_retry_keys() {
        assert!(is_known("OLLAMA_API_URL"));
        assert!(is_known("GROQ_BASE_URL"));
        assert!(is_known("RETRY_MAX_SECS"));
        assert!(!is_known("GROQ_API_KEY"));
    }
}
