//! fanout CLI - multi-hop generation across many endpoints.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fanout::pipeline::{group_chunks, load_chunks, write_groupings};
use fanout::{Config, EndpointRegistry, HttpExecutor, MultiHopPipeline};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "fanout")]
#[command(version)]
#[command(about = "Fan calls out to many LLM endpoints over sampled multi-hop chunk groupings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "FANOUT_CONFIG",
        default_value = "fanout.toml"
    )]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample chunk groupings and write them without calling any endpoint
    Sample {
        /// Path to input chunks JSONL file
        #[arg(long)]
        chunks: PathBuf,

        /// Chunks per grouping
        #[arg(long, default_value = "2")]
        hops: usize,

        /// Number of groupings to draw
        #[arg(short, long)]
        samples: Option<usize>,

        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Path to output JSONL file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run the multi-hop pipeline against the configured endpoints
    Run {
        /// Path to input chunks JSONL file
        #[arg(long)]
        chunks: PathBuf,

        /// Path to output JSONL file (defaults to output.path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Endpoint to dispatch to; repeat for several (default: all)
        #[arg(short, long = "endpoint")]
        endpoints: Vec<String>,

        /// Override sampling.samples
        #[arg(short, long)]
        samples: Option<usize>,

        /// Override sampling.seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# fanout configuration file

# One table per endpoint. Every call is sent to every selected endpoint.
[endpoints.openrouter]
base_url = "https://openrouter.ai/api/v1"
model = "deepseek/deepseek-r1"
api_key_env = "OPENROUTER_API_KEY"
concurrency = 8          # max in-flight requests to this endpoint
max_retries = 3          # attempts per call (0 is treated as 1)
timeout_secs = 180
input_price_per_1m = 0.70
output_price_per_1m = 2.50

[endpoints.local]
base_url = "http://localhost:11434/v1"
model = "llama3.3:70b"
concurrency = 2
# headers = { "X-Api-Token" = "${LOCAL_TOKEN}" }

[dispatch]
backoff_unit_ms = 1000   # delays: 4s, 8s, 16s, ...
jitter = false

[sampling]
hops = 2                 # chunks per grouping
samples = 500
seed = 42

[generation]
system_prompt = "prompts/system.md"
user_template = "Write a question that needs all of these passages:\n\n{chunks}"
tags = ["multihop"]

[output]
path = "output/dataset.jsonl"
usage_report = "output/usage.json"
include_failed = false
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    let config =
        Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            let registry = EndpointRegistry::from_config(&config)?;
            HttpExecutor::from_config(&config).context("Failed to resolve endpoint settings")?;

            info!("Configuration is valid");
            for endpoint in registry.endpoints() {
                info!(
                    "  {}: concurrency {}, {} attempts, timeout {:?}",
                    endpoint.name(),
                    endpoint.concurrency(),
                    endpoint.max_retries().max(1),
                    endpoint.timeout()
                );
            }
            info!(
                "  Sampling: {} hop(s), {} grouping(s)",
                config.sampling.hops,
                config
                    .sampling
                    .samples
                    .map_or_else(|| "one per chunk".to_string(), |n| n.to_string())
            );
            return Ok(());
        }

        Commands::Sample {
            chunks,
            hops,
            samples,
            seed,
            output,
        } => {
            let chunks_data = load_chunks(&chunks)?;
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };

            let groups = group_chunks(&chunks_data, hops, samples, &mut rng)?;
            let written = write_groupings(&groups, &output)?;

            println!("\n=== Sampling Complete ===");
            println!("Chunks:      {}", chunks_data.len());
            println!("Hops:        {hops}");
            println!("Groupings:   {written}");
            println!("Output:      {output:?}");
        }

        Commands::Run {
            chunks,
            output,
            endpoints,
            samples,
            seed,
        } => {
            let mut config = load_config(&cli.config)?;
            if samples.is_some() {
                config.sampling.samples = samples;
            }
            if seed.is_some() {
                config.sampling.seed = seed;
            }

            let Some(output) = output.or_else(|| config.output.path.clone()) else {
                bail!("No output path: pass --output or set output.path");
            };

            let registry = EndpointRegistry::from_config(&config)?;
            let selected = if endpoints.is_empty() {
                registry.endpoints().to_vec()
            } else {
                registry.select(&endpoints)?
            };
            let executor = Arc::new(
                HttpExecutor::from_config(&config).context("Failed to build HTTP executor")?,
            );

            let pipeline = MultiHopPipeline::new(config, selected, executor)?;
            let chunks_data = load_chunks(&chunks)?;
            let stats = pipeline.run(chunks_data, &output).await?;

            println!("\n=== Multi-hop Generation Complete ===");
            println!("Chunks:      {}", stats.total_chunks);
            println!("Calls:       {}", stats.total_calls);
            println!("Units:       {}", stats.total_units);
            println!("Succeeded:   {}", stats.succeeded);
            println!("Failed:      {}", stats.failed);
            println!("Written:     {}", stats.written);
            println!("Success:     {:.1}%", stats.success_rate * 100.0);
            println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Output:      {output:?}");
        }
    }

    Ok(())
}
