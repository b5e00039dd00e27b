use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, ValueEnum};
use serde_json::{Map, Value};

use crate::extract::{DEFAULT_MERGE_THRESHOLD, Extractor, ExtractorConfig, FieldSpec, Strategy};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    Auto,
    Marker,
    TagPair,
}

impl From<StrategyArg> for Strategy {
    fn from(s: StrategyArg) -> Self {
        match s {
            StrategyArg::Auto => Strategy::Auto,
            StrategyArg::Marker => Strategy::Marker,
            StrategyArg::TagPair => Strategy::TagPair,
        }
    }
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Text file to read, or `-` for stdin
    pub input: PathBuf,

    #[arg(long, value_enum, default_value = "auto")]
    pub strategy: StrategyArg,

    /// Field marker as NAME=TEXT; repeat for alternatives and more fields
    #[arg(long = "marker", value_name = "NAME=TEXT")]
    pub markers: Vec<String>,

    /// Field tag as NAME=TAG
    #[arg(long = "tag", value_name = "NAME=TAG")]
    pub tags: Vec<String>,

    /// Collapse this field's marker span onto one line
    #[arg(long = "join", value_name = "NAME")]
    pub join: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_MERGE_THRESHOLD)]
    pub merge_threshold: usize,

    /// Keep tagged content as found
    #[arg(long)]
    pub raw_tags: bool,
}

fn split_pair(raw: &str) -> anyhow::Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() && !value.is_empty() => Ok((name.trim(), value)),
        _ => bail!("expected NAME=VALUE, got `{raw}`"),
    }
}

fn field<'a>(fields: &'a mut Vec<FieldSpec>, name: &str) -> &'a mut FieldSpec {
    let index = match fields.iter().position(|f| f.name == name) {
        Some(i) => i,
        None => {
            fields.push(FieldSpec::marked(name, &[]));
            fields.len() - 1
        }
    };
    &mut fields[index]
}

/// Fields in order of first mention on the command line.
pub fn build_config(args: &ExtractArgs) -> anyhow::Result<ExtractorConfig> {
    let mut fields: Vec<FieldSpec> = Vec::new();
    for raw in &args.markers {
        let (name, marker) = split_pair(raw)?;
        field(&mut fields, name).markers.push(marker.to_string());
    }
    for raw in &args.tags {
        let (name, tag) = split_pair(raw)?;
        field(&mut fields, name).tag = Some(tag.to_string());
    }
    for name in &args.join {
        match fields.iter_mut().find(|f| &f.name == name) {
            Some(f) => f.join_lines = true,
            None => bail!("--join names unknown field `{name}`"),
        }
    }
    if fields.is_empty() {
        bail!("give at least one --marker or --tag");
    }
    Ok(ExtractorConfig::new(fields)
        .with_strategy(args.strategy.into())
        .with_merge_threshold(args.merge_threshold)
        .with_clean_tagged(!args.raw_tags))
}

pub fn execute(args: ExtractArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let text = if args.input.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.input).with_context(|| format!("reading {}", args.input.display()))?
    };

    let found = Extractor::new(config).extract(&text);
    let out: Map<String, Value> = found
        .iter()
        .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect();
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ExtractArgs,
    }

    fn parse(argv: &[&str]) -> ExtractArgs {
        Harness::parse_from(std::iter::once("extract").chain(argv.iter().copied())).args
    }

    #[test]
    fn markers_group_by_field_name() {
        let args = parse(&[
            "-",
            "--marker", "pos=Prompt:",
            "--marker", "neg=Negative Prompt:",
            "--marker", "pos=Positive:",
            "--tag", "out=output",
            "--join", "neg",
            "--strategy", "marker",
        ]);
        let config = build_config(&args).unwrap();
        let names: Vec<&str> = config.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["pos", "neg", "out"]);
        assert_eq!(config.fields[0].markers, ["Prompt:", "Positive:"]);
        assert!(config.fields[1].join_lines);
        assert_eq!(config.fields[2].tag.as_deref(), Some("output"));
        assert_eq!(config.strategy, Strategy::Marker);
    }

    #[test]
    fn rejects_malformed_or_empty_field_lists() {
        assert!(build_config(&parse(&["-"])).is_err());
        assert!(build_config(&parse(&["-", "--marker", "no-equals"])).is_err());
        assert!(build_config(&parse(&["-", "--marker", "a=x", "--join", "b"])).is_err());
    }
}
