use std::{fs, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use webcorpus::{
    assembler::{JsonFileSink, ResultSink},
    config::PipelineConfig,
    pipeline::{run_archive, ExclusionReason, RunOptions},
    resolver::FetchPolicy,
};

#[derive(Debug, clap::Parser)]
#[command(about = "Build a webpage corpus from a WARC archive and analyze it")]
struct CommandLine {
    /// WARC archive, plain or gzip/zstd compressed
    archive: PathBuf,
    /// Where to write the result set as JSON
    #[arg(short, long, default_value = "results.json")]
    output: PathBuf,
    /// TOML file with pipeline settings
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// File with one URL per line; all archived URLs when omitted
    #[arg(long)]
    urls: Option<PathBuf>,
    /// Abort the run after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    topics: Option<usize>,
    #[arg(long)]
    clusters: Option<usize>,
    /// Keep only the k most similar pairs
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long)]
    min_word_count: Option<usize>,
    /// Fetch URLs missing from the archive from the live web
    #[arg(long)]
    allow_live_fallback: bool,
}

fn load_config(args: &CommandLine) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(topics) = args.topics {
        config.topic_count = topics;
    }
    if let Some(clusters) = args.clusters {
        config.cluster_count = clusters;
    }
    if let Some(k) = args.top_k {
        config.similarity_top_k = k;
    }
    if let Some(min_word_count) = args.min_word_count {
        config.min_word_count = min_word_count;
    }
    if args.allow_live_fallback {
        config.fetch_policy = FetchPolicy::AllowLiveFallback;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CommandLine::parse();
    let config = load_config(&args)?;

    let urls = match &args.urls {
        Some(path) => {
            let list = fs::read_to_string(path)
                .with_context(|| format!("failed to read URL list {}", path.display()))?;
            Some(
                list.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string)
                    .collect(),
            )
        }
        None => None,
    };
    let options = RunOptions {
        timeout: args.timeout.map(Duration::from_secs),
        urls,
    };

    let output = run_archive(&args.archive, &config, &options)
        .with_context(|| format!("run over {} failed", args.archive.display()))?;

    let mut sink = JsonFileSink::new(&args.output);
    sink.write(&output.results)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    let report = &output.report;
    println!("requested:   {}", report.requested);
    println!("documents:   {}", report.documents);
    for reason in [
        ExclusionReason::ContentUnavailable,
        ExclusionReason::DecodeError,
        ExclusionReason::NotEnglish,
        ExclusionReason::EmptyText,
        ExclusionReason::BelowMinWordCount,
        ExclusionReason::DuplicateUrl,
    ] {
        println!("{:<20} {}", format!("{reason:?}:"), report.count(reason));
    }
    println!("pairs:       {}", output.results.pairs().len());
    println!("malformed:   {}", report.index.malformed);
    println!("elapsed:     {:.2?}", report.elapsed);
    println!("fingerprint: {}", output.results.fingerprint());

    Ok(())
}
