//! # vecbatch CLI
//!
//! Command-line front end for the batching scheduler.
//!
//! - `embed`: vectorize JSON-lines records through an OpenAI-compatible service
//! - `plan`: show how records would be packed under a token ceiling, offline
//!
//! Each input line is a record, optionally flagged as skipped:
//! `{"class": "Article", "properties": {"title": "..."}, "skip": false}`.

mod telemetry;

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, instrument, warn};
use vecbatch::batch::{pack, pending_items};
use vecbatch::client::{EmbeddingClient, OpenAiClient, OpenAiConfig, RateLimitedClient};
use vecbatch::render::PropertyRenderer;
use vecbatch::tokens::{CharRatioEstimator, TokenEstimator, WhitespaceEstimator};
use vecbatch::{BatchResult, CallContext, ClassConfig, ItemOutcome, Record, Scheduler, SchedulerConfig};

#[derive(Parser)]
#[command(author, version, about = "Batch records through a rate-limited embedding service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Vectorize JSON-lines records
    Embed(EmbedArgs),

    /// Show how records would be packed into sub-batches
    Plan(PlanArgs),
}

#[derive(Args, Debug, Clone)]
struct RenderArgs {
    /// Prefix texts with the class name
    #[arg(long)]
    class_name: bool,

    /// Prefix property values with the property name
    #[arg(long)]
    property_names: bool,

    /// Only render these properties (comma-separated)
    #[arg(long)]
    properties: Option<String>,

    /// Lowercase rendered text
    #[arg(long)]
    lowercase: bool,
}

impl RenderArgs {
    fn class_config(&self) -> ClassConfig {
        let mut config = ClassConfig::new()
            .vectorize_class_name(self.class_name)
            .vectorize_property_name(self.property_names)
            .lowercase(self.lowercase);
        if let Some(properties) = &self.properties {
            config = config.properties(properties.split(',').map(str::trim).filter(|p| !p.is_empty()));
        }
        config
    }
}

#[derive(Args, Debug)]
struct EmbedArgs {
    /// JSON-lines input file (stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Time budget for the whole run in seconds
    #[arg(short, long, default_value = "60")]
    time_budget_secs: u64,

    /// Maximum records per request
    #[arg(long, default_value = "2000")]
    max_batch_items: usize,

    /// Client-side cap on requests per minute
    #[arg(long)]
    rpm: Option<NonZeroU32>,

    /// Embedding model (defaults to OPENAI_EMBEDDING_MODEL or text-embedding-3-small)
    #[arg(short, long)]
    model: Option<String>,

    /// Requested vector dimensions
    #[arg(long)]
    dimensions: Option<usize>,

    /// Write vectors to the output, not just their status
    #[arg(long)]
    include_vectors: bool,

    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// JSON-lines input file (stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Token ceiling per sub-batch
    #[arg(short, long, default_value = "8191")]
    ceiling: usize,

    /// Maximum records per sub-batch
    #[arg(long, default_value = "2000")]
    max_batch_items: usize,

    /// Token estimator (whitespace|chars)
    #[arg(short, long, default_value = "whitespace", value_parser = ["whitespace", "chars"])]
    estimator: String,

    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Debug, Deserialize)]
struct InputLine {
    #[serde(flatten)]
    record: Record,

    #[serde(default)]
    skip: bool,
}

#[derive(Debug, Serialize)]
struct OutputLine<'a> {
    index: usize,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vector: Option<&'a [f32]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _otel = telemetry::init_tracing_subscriber()?;

    match cli.command {
        Commands::Embed(args) => embed_command(args).await?,
        Commands::Plan(args) => plan_command(args).await?,
    }

    Ok(())
}

#[instrument]
async fn embed_command(args: EmbedArgs) -> anyhow::Result<()> {
    let (records, skip) = parse_records(&read_input(args.input.as_ref()).await?)?;
    info!("Loaded {} records", records.len());

    let mut openai = OpenAiConfig::from_env()?;
    if let Some(model) = &args.model {
        openai = openai.model(model.clone());
    }
    if let Some(dimensions) = args.dimensions {
        openai = openai.dimensions(dimensions);
    }
    let client = OpenAiClient::new(openai)?;

    let config = SchedulerConfig::builder()
        .time_budget(Duration::from_secs(args.time_budget_secs))
        .max_batch_items(args.max_batch_items)
        .build();
    let class_config = args.render.class_config();

    let result = match args.rpm {
        Some(rpm) => {
            let client = RateLimitedClient::per_minute(client, rpm);
            vectorize(client, config, &records, &skip, &class_config).await
        }
        None => vectorize(client, config, &records, &skip, &class_config).await,
    };

    if !result.errors.is_empty() {
        warn!("{} of {} records failed", result.error_count(), records.len());
    }

    let output = render_output(&result, args.include_vectors)?;
    write_output(args.output.as_ref(), &output).await
}

async fn vectorize<C: EmbeddingClient>(
    client: C,
    config: SchedulerConfig,
    records: &[Record],
    skip: &[bool],
    class_config: &ClassConfig,
) -> BatchResult {
    let scheduler = Scheduler::with_config(client, config);

    let (ctx, cancel) = CallContext::cancellable();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning unsent records");
            cancel.cancel();
        }
    });

    scheduler.submit(&ctx, records, skip, class_config).await
}

#[instrument]
async fn plan_command(args: PlanArgs) -> anyhow::Result<()> {
    let (records, skip) = parse_records(&read_input(args.input.as_ref()).await?)?;
    let estimator: Box<dyn TokenEstimator> = match args.estimator.as_str() {
        "chars" => Box::new(CharRatioEstimator::default()),
        _ => Box::new(WhitespaceEstimator),
    };

    let plan = plan_batches(
        &records,
        &skip,
        &args.render.class_config(),
        estimator.as_ref(),
        args.ceiling,
        args.max_batch_items,
    );
    write_output(None, &plan).await
}

/// Describe the packing of `records` as text, one line per sub-batch
fn plan_batches(
    records: &[Record],
    skip: &[bool],
    class_config: &ClassConfig,
    estimator: &dyn TokenEstimator,
    ceiling: usize,
    max_batch_items: usize,
) -> String {
    let items = pending_items(records, skip, class_config, &PropertyRenderer, estimator);
    let packing = pack(items, ceiling, max_batch_items);
    let mut out = String::new();
    for (n, batch) in packing.batches.iter().enumerate() {
        out.push_str(&format!(
            "batch {}: {} records, {} tokens {:?}\n",
            n + 1,
            batch.len(),
            batch.cost(),
            batch.indices()
        ));
    }
    for too_long in &packing.too_long {
        out.push_str(&format!(
            "too long: record {} ({} tokens > {})\n",
            too_long.index, too_long.cost, too_long.ceiling
        ));
    }
    out
}

async fn read_input(path: Option<&PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut input = String::new();
            tokio::io::stdin().read_to_string(&mut input).await?;
            Ok(input)
        }
    }
}

fn parse_records(input: &str) -> anyhow::Result<(Vec<Record>, Vec<bool>)> {
    let mut records = Vec::new();
    let mut skip = Vec::new();
    for (n, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: InputLine = serde_json::from_str(line)
            .with_context(|| format!("Invalid record on line {}", n + 1))?;
        records.push(parsed.record);
        skip.push(parsed.skip);
    }
    Ok((records, skip))
}

fn render_output(result: &BatchResult, include_vectors: bool) -> anyhow::Result<String> {
    let mut out = String::new();
    for (index, outcome) in result.outcomes().enumerate() {
        let line = match outcome {
            ItemOutcome::Skipped => OutputLine {
                index,
                status: "skipped",
                dimensions: None,
                vector: None,
                error: None,
            },
            ItemOutcome::Vector(vector) => OutputLine {
                index,
                status: "ok",
                dimensions: Some(vector.len()),
                vector: include_vectors.then_some(vector),
                error: None,
            },
            ItemOutcome::Failed(error) => OutputLine {
                index,
                status: "error",
                dimensions: None,
                vector: None,
                error: Some(error.to_string()),
            },
        };
        out.push_str(&serde_json::to_string(&line)?);
        out.push('\n');
    }
    Ok(out)
}

async fn write_output(path: Option<&PathBuf>, output: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            tokio::fs::write(path, output).await?;
            info!("Wrote results to {}", path.display());
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(output.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use vecbatch::client::ScriptedClient;

    const INPUT: &str = r#"{"class": "Article", "properties": {"title": "first"}}

{"class": "Article", "properties": {"title": "second"}, "skip": true}
{"class": "Article", "properties": {"title": "error broken"}}
"#;

    #[test]
    fn test_parse_records() {
        let (records, skip) = parse_records(INPUT).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(skip, vec![false, true, false]);
        assert_eq!(records[1].properties["title"], "second");
    }

    #[test]
    fn test_parse_records_reports_line() {
        let err = parse_records("{\"class\": \"A\"}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_read_input_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(INPUT.as_bytes()).unwrap();

        let input = read_input(Some(&file.path().to_path_buf())).await.unwrap();
        assert_eq!(input, INPUT);
        assert!(read_input(Some(&PathBuf::from("/nonexistent/records.jsonl"))).await.is_err());
    }

    #[tokio::test]
    async fn test_vectorize_and_render_output() {
        let (records, skip) = parse_records(INPUT).unwrap();
        let result = vectorize(
            ScriptedClient::new(),
            SchedulerConfig::default(),
            &records,
            &skip,
            &ClassConfig::new(),
        )
        .await;

        let output = render_output(&result, false).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["status"], "ok");
        assert_eq!(lines[0]["dimensions"], 3);
        assert!(lines[0].get("vector").is_none());
        assert_eq!(lines[1]["status"], "skipped");
        assert_eq!(lines[2]["status"], "error");
        assert_eq!(lines[2]["error"], "vectorization failed: broken");

        let with_vectors = render_output(&result, true).unwrap();
        assert!(with_vectors.lines().next().unwrap().contains("\"vector\":[5.0,1.0,1.0]"));
    }

    #[test]
    fn test_plan_batches() {
        let records: Vec<Record> = ["one two", "three four five", "six", "a b c d e f g h i j"]
            .into_iter()
            .map(|text| Record::new("Note").with_property("body", text))
            .collect();

        let plan = plan_batches(
            &records,
            &[false; 4],
            &ClassConfig::new(),
            &WhitespaceEstimator,
            5,
            100,
        );
        assert_eq!(
            plan,
            "batch 1: 2 records, 5 tokens [0, 1]\n\
             batch 2: 1 records, 1 tokens [2]\n\
             too long: record 3 (10 tokens > 5)\n"
        );
    }

    #[test]
    fn test_render_args_class_config() {
        let args = RenderArgs {
            class_name: true,
            property_names: false,
            properties: Some("title, body,".to_string()),
            lowercase: false,
        };
        let config = args.class_config();
        assert!(config.vectorize_class_name);
        assert_eq!(
            config.properties,
            Some(vec!["title".to_string(), "body".to_string()])
        );
    }
}
