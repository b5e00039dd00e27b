use anyhow::Context;
use clap::{Args, Subcommand};

use super::CliContext;
use crate::provider::Provider;

#[derive(Args, Debug)]
pub struct SecretArgs {
    #[command(subcommand)]
    pub command: SecretCommands,
}

#[derive(Subcommand, Debug)]
pub enum SecretCommands {
    /// Store a new secret, e.g. `GROQ_API_KEY`
    Add { key: String, secret: String },
    Update { key: String, secret: String },
    Delete { key: String },
}

fn warn_if_unused(key: &str) {
    let known = Provider::ALL.iter().filter_map(|p| p.key_name()).any(|k| k == key);
    if !known {
        println!("⚠️  No node reads `{key}`; provider keys are named like GROQ_API_KEY.");
    }
}

pub async fn execute(args: SecretArgs, context: &CliContext) -> anyhow::Result<()> {
    let secrets = &context.secrets_manager;
    match args.command {
        SecretCommands::Add { key, secret } => {
            warn_if_unused(&key);
            secrets
                .add_secret(&key, &secret)
                .await
                .with_context(|| format!("secret `{key}` could not be added"))?;
            println!("✅ Secret `{key}` added.");
        }
        SecretCommands::Update { key, secret } => {
            warn_if_unused(&key);
            secrets
                .update_secret(&key, &secret)
                .await
                .with_context(|| format!("secret `{key}` could not be updated"))?;
            println!("✅ Secret `{key}` updated.");
        }
        SecretCommands::Delete { key } => {
            secrets
                .delete_secret(&key)
                .await
                .with_context(|| format!("secret `{key}` could not be deleted"))?;
            println!("✅ Secret `{key}` deleted.");
        }
    }
    Ok(())
}
