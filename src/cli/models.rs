use anyhow::anyhow;
use clap::Args;

use super::CliContext;
use crate::provider::Provider;

#[derive(Args, Debug)]
pub struct ModelsArgs {
    /// deepseek, groq, moonshot, openai, dashscope, gemini or ollama
    pub provider: String,
}

pub async fn execute(args: ModelsArgs, context: &CliContext) -> anyhow::Result<()> {
    let provider: Provider = args.provider.parse().map_err(|e: String| anyhow!(e))?;
    let ctx = context.node_context().await;
    let invoker = ctx.invoker(provider).await?;
    let models = invoker.list_models().await?;
    if models.is_empty() {
        println!("{provider} lists no models; default is {}", provider.default_model());
    }
    for model in models {
        println!("{model}");
    }
    Ok(())
}
