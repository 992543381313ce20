//! rangecache CLI
//!
//! Command-line access to the cache read path:
//! - Inspect chunk file headers
//! - Merge a set of chunk files as one cached query
//! - Print a default configuration

use anyhow::Context;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use rangecache::cache::{Cache, CacheOptions, ProjectId, QueryContext, UpdateTracker};
use rangecache::config::{generate_default_config, Config, LoggingConfig};
use rangecache::storage::{fill, ChunkDescriptor, ChunkFile, ChunkFileReader, Interval, Timestamp};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rangecache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Read path of a time-series range-query cache")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the header of chunk files
    Inspect {
        files: Vec<PathBuf>,
    },

    /// Merge chunk files as one cached query and print the result as JSON
    Query {
        /// Query text the chunks belong to
        #[arg(short, long, default_value = "cli")]
        query: String,
        /// Range start, unix seconds (default: earliest chunk start)
        #[arg(long)]
        from: Option<i64>,
        /// Range end, unix seconds (default: latest chunk end)
        #[arg(long)]
        to: Option<i64>,
        /// Step in seconds (default: coarsest chunk step in range)
        #[arg(long)]
        step: Option<i64>,
        /// Fill policy for gaps: nan, zero, previous
        #[arg(long, default_value = "nan")]
        fill: String,
        /// Chunk files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print a default configuration file
    Config,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("rangecache={}", logging.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn format_time(ts: Timestamp) -> String {
    Utc.timestamp_opt(ts.0, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging);

    match cli.command {
        Commands::Inspect { files } => {
            for path in files {
                let header = ChunkFile::read_header(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let desc = header.descriptor(&path);
                println!("{}", path.display());
                println!("  from:    {} ({})", header.from, format_time(header.from));
                println!("  to:      {} ({})", desc.to(), format_time(desc.to()));
                println!("  step:    {}", header.step);
                println!("  points:  {}", header.points);
                println!("  series:  {}", header.series_count);
                println!("  created: {} ({})", header.created, format_time(header.created));
            }
        }

        Commands::Query {
            query,
            from,
            to,
            step,
            fill: fill_name,
            files,
        } => {
            let fill = fill::by_name(&fill_name)
                .with_context(|| format!("unknown fill policy {:?}", fill_name))?;

            let chunks = files
                .iter()
                .map(|p| {
                    ChunkDescriptor::from_file(p)
                        .with_context(|| format!("reading {}", p.display()))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let tracker = Arc::new(UpdateTracker::new());
            let cache = Cache::with_options(
                Arc::new(ChunkFileReader::new()),
                tracker.clone(),
                tracker,
                CacheOptions::from(&config.cache),
            );

            let project = ProjectId::from("cli");
            cache
                .register_project(project.clone(), Interval(config.cache.default_step_secs))
                .await;
            let query_step = chunks
                .iter()
                .map(|c| c.step)
                .min()
                .unwrap_or(Interval(config.cache.default_step_secs));
            let from = from
                .map(Timestamp)
                .or_else(|| chunks.iter().map(|c| c.from).min())
                .unwrap_or(Timestamp::ZERO);
            let to = to
                .map(Timestamp)
                .or_else(|| chunks.iter().map(|c| c.to()).max())
                .unwrap_or(from);
            cache.publish_chunks(&project, &query, query_step, chunks).await?;

            let client = cache.client(project);
            let step = match step {
                Some(s) => Interval(s),
                None => client.get_step(from, to).await?,
            };

            let mut ctx = QueryContext::new();
            if config.cache.query_timeout_ms > 0 {
                let timeout = std::time::Duration::from_millis(config.cache.query_timeout_ms);
                ctx = ctx.with_timeout(timeout);
            }

            let series = client
                .query_range_with(&ctx, &query, from, to, step, &*fill)
                .await?;

            let output = serde_json::json!({
                "from": from.truncate(step),
                "to": to.truncate(step),
                "step": step,
                "series": series,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Config => {
            print!("{}", generate_default_config());
        }
    }

    Ok(())
}
