use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Args;
use tracing::info;

use super::CliContext;
use crate::executor::Executor;
use crate::hooks::{HookRegistry, TimingHook, format_seconds};
use crate::pipeline::{Job, Pipeline, RunReport};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Job file (.yaml, .yml or .json)
    pub job: PathBuf,

    /// Run the whole job this many times with the same node instances
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// Print each run's report as JSON
    #[arg(long)]
    pub json: bool,
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("run {} started {}", report.run_id, report.started_at.format("%Y-%m-%d %H:%M:%S"));
    for step in &report.steps {
        println!("── {} [{}]", step.id, step.class);
        for (slot, value) in &step.outputs {
            println!("{slot}: {}", value.render());
        }
    }
    println!("Total Execution Time: {}", format_seconds(report.total));
    Ok(())
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    if args.repeat == 0 {
        bail!("--repeat must be at least 1");
    }
    let job = Job::load(&args.job).with_context(|| format!("loading {}", args.job.display()))?;
    let name = job.name.clone().unwrap_or_else(|| args.job.display().to_string());

    let mut hooks = HookRegistry::new();
    hooks.register(TimingHook::new());
    let mut pipeline = Pipeline::new(job, Executor::new(hooks))?;
    let mut ctx = context.node_context().await;

    for round in 1..=args.repeat {
        info!(job = %name, round, "running job");
        if args.repeat > 1 {
            println!("=== run {round}/{} ===", args.repeat);
        }
        let report = pipeline.run(&mut ctx).await?;
        print_report(&report, args.json)?;
    }
    pipeline.unload();
    Ok(())
}
