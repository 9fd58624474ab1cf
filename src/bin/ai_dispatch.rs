//! ai-dispatch: 批量提交 JSONL 请求文件的命令行工具
//!
//! Usage:
//!   ai-dispatch run --requests <file> --save <file> [--errors <file>] [--config <yaml>] [--request-url <url>]
//!   ai-dispatch estimate --requests <file> [--endpoint <kind>] [--encoding <name>]

use ai_dispatch::tokens::{encoder_for, CostEstimator};
use ai_dispatch::types::split_request_url;
use ai_dispatch::{
    Credentials, Dispatcher, DispatcherConfig, EndpointKind, Error, ErrorSink, JsonlErrorSink,
    WorkItem,
};
use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ai-dispatch",
    version,
    about = "Submit JSONL request files to an LLM provider within request and token budgets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch every request in a JSONL file and save the responses
    Run(RunArgs),
    /// Print the estimated token cost of every request without sending anything
    Estimate(EstimateArgs),
}

#[derive(Args)]
struct RunArgs {
    /// One JSON request payload per line; an optional `metadata` field is split off
    #[arg(long)]
    requests: PathBuf,
    /// Results file, one `[payload, response, metadata]` array per line
    #[arg(long)]
    save: PathBuf,
    /// Error log file (defaults to `<save>.errors.jsonl`)
    #[arg(long)]
    errors: Option<PathBuf>,
    /// Dispatcher config (YAML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Full request URL, e.g. https://api.openai.com/v1/chat/completions
    #[arg(long)]
    request_url: Option<String>,
    /// Endpoint kind (chat, completion, embedding); derived from --request-url when omitted
    #[arg(long)]
    endpoint: Option<EndpointKind>,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long)]
    max_requests_per_interval: Option<u64>,
    #[arg(long)]
    max_tokens_per_interval: Option<u64>,
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args)]
struct EstimateArgs {
    #[arg(long)]
    requests: PathBuf,
    #[arg(long, default_value = "chat")]
    endpoint: EndpointKind,
    #[arg(long, default_value = "cl100k_base")]
    encoding: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Estimate(args) => estimate(args).await,
    }
}

/// A request payload with its 1-based line number and split-off metadata.
type Request = (usize, Value, Option<Value>);

async fn read_requests(path: &Path) -> anyhow::Result<Vec<Request>> {
    let file = File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut lines = FramedRead::new(file, LinesCodec::new());
    let mut requests = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = lines.next().await {
        line_no += 1;
        let line = line.with_context(|| format!("{}:{}: read failed", path.display(), line_no))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut payload: Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid JSON", path.display(), line_no))?;
        let metadata = payload.as_object_mut().and_then(|o| o.remove("metadata"));
        requests.push((line_no, payload, metadata));
    }
    Ok(requests)
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => DispatcherConfig::from_yaml_file(path)?,
        None => DispatcherConfig::default(),
    }
    .apply_env_overrides();
    if let Some(n) = args.max_requests_per_interval {
        config.max_requests_per_interval = n;
    }
    if let Some(n) = args.max_tokens_per_interval {
        config.max_tokens_per_interval = n;
    }
    if let Some(n) = args.workers {
        config.workers = n;
    }

    let mut request_path = None;
    let mut endpoint = args.endpoint;
    if let Some(url) = &args.request_url {
        let (base, path) = split_request_url(url)
            .ok_or_else(|| anyhow!("cannot derive an endpoint from request URL '{}'", url))?;
        config.base_url = base.to_string();
        if endpoint.is_none() {
            endpoint = Some(EndpointKind::from_path(path)?);
        }
        request_path = Some(path.to_string());
    }
    let endpoint = endpoint.unwrap_or(EndpointKind::Chat);

    let credentials = match &args.api_key {
        Some(key) => Credentials::bearer(key),
        None => {
            warn!("no API key given; requests are sent without credentials");
            Credentials::new()
        }
    };

    let errors_path = args
        .errors
        .clone()
        .unwrap_or_else(|| args.save.with_extension("errors.jsonl"));
    let sink: Arc<dyn ErrorSink> = Arc::new(JsonlErrorSink::new(&errors_path));

    let requests = read_requests(&args.requests).await?;
    info!(
        count = requests.len(),
        endpoint = %endpoint,
        base_url = %config.base_url,
        "loaded requests"
    );

    let dispatcher = Dispatcher::builder(config).error_sink(sink).start()?;
    let mut save = File::create(&args.save)
        .await
        .with_context(|| format!("failed to create {}", args.save.display()))?;

    let mut pending = FuturesUnordered::new();
    for (_, payload, metadata) in requests {
        let mut item = WorkItem::new(endpoint, payload.clone(), credentials.clone());
        if let Some(path) = &request_path {
            item = item.with_path(path.clone());
        }
        if let Some(meta) = &metadata {
            item = item.with_metadata(meta.clone());
        }
        let handle = submit_with_backpressure(&dispatcher, item).await?;
        pending.push(async move { (payload, metadata, handle.await) });
    }

    let mut interrupted = false;
    loop {
        tokio::select! {
            next = pending.next() => {
                let Some((payload, metadata, outcome)) = next else { break };
                if let Ok(response) = outcome {
                    let line = json!([payload, response, metadata.unwrap_or(Value::Null)]);
                    let mut bytes = serde_json::to_vec(&line)?;
                    bytes.push(b'\n');
                    save.write_all(&bytes).await?;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("interrupted; abandoning outstanding requests");
                interrupted = true;
                dispatcher.shutdown().await;
            }
        }
    }
    save.flush().await?;

    if !interrupted {
        dispatcher.drain().await;
    }
    let status = dispatcher.status();
    info!(
        succeeded = status.succeeded,
        failed = status.failed,
        rate_limited = status.rate_limited,
        save = %args.save.display(),
        errors = %errors_path.display(),
        "dispatch finished"
    );
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Wait for room in a bounded queue instead of failing the whole batch.
async fn submit_with_backpressure(
    dispatcher: &Dispatcher,
    item: WorkItem,
) -> anyhow::Result<ai_dispatch::DispatchHandle> {
    loop {
        match dispatcher.submit_item(item.clone()) {
            Err(Error::QueueFull { .. }) => tokio::time::sleep(Duration::from_millis(50)).await,
            other => return Ok(other?),
        }
    }
}

async fn estimate(args: EstimateArgs) -> anyhow::Result<()> {
    let estimator = CostEstimator::new(encoder_for(&args.encoding)?);
    let requests = read_requests(&args.requests).await?;
    let mut total = 0u64;
    for (line, payload, _) in &requests {
        match estimator.estimate(payload, args.endpoint) {
            Ok(cost) => {
                total = total.saturating_add(cost);
                println!("{}", json!({"line": line, "tokens": cost}));
            }
            Err(e) => println!("{}", json!({"line": line, "error": e.to_string()})),
        }
    }
    println!("{}", json!({"requests": requests.len(), "total_tokens": total}));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_requests_keeps_file_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");
        std::fs::write(
            &path,
            "{\"input\": \"a\"}\n\n   \n{\"input\": \"b\", \"metadata\": {\"row\": 7}}\n",
        )
        .unwrap();

        let requests = read_requests(&path).await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, 1);
        assert_eq!(requests[1].0, 4);
        assert_eq!(requests[1].1, json!({"input": "b"}));
        assert_eq!(requests[1].2, Some(json!({"row": 7})));
    }

    #[tokio::test]
    async fn test_read_requests_reports_line_of_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");
        std::fs::write(&path, "\n{\"input\": \"a\"}\nnot json\n").unwrap();

        let err = read_requests(&path).await.unwrap_err();
        assert!(err.to_string().ends_with(":3: invalid JSON"));
    }
}
