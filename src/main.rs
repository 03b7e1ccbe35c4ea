mod cluster;
mod config;
mod db;
mod error;
mod model;
mod parser;
mod pipeline;
mod scraper;
mod stats;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use serde_json::json;
use tracing::info;

use cluster::ClusterParams;
use config::Settings;
use pipeline::{RunOptions, RunOutcome};
use scraper::{Fetcher, StoreRoot};

#[derive(Parser)]
#[command(
    name = "store_profiler",
    version,
    about = "Profile a storefront from its public catalog, collections, sitemap and homepage"
)]
struct Cli {
    /// Store URL or bare host, e.g. shop.example.com
    url: String,
    /// Number of product clusters (default: derived from catalog size)
    #[arg(short = 'k', long)]
    clusters: Option<usize>,
    /// Seed for cluster initialization
    #[arg(long)]
    seed: Option<u64>,
    /// Directory that receives <slug>/profile.{sqlite,json}
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Settings file (default: store_profiler.toml in the working directory, if present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Keep going with collections only when the catalog is unavailable
    #[arg(long)]
    allow_collections_only: bool,
    /// Print the summary without writing artifacts
    #[arg(long)]
    no_write: bool,
}

impl Cli {
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load()?,
        };
        if self.clusters.is_some() {
            settings.clusters = self.clusters;
        }
        if let Some(seed) = self.seed {
            settings.seed = seed;
        }
        if let Some(output) = &self.output {
            settings.output_dir = output.clone();
        }
        if self.allow_collections_only {
            settings.catalog_required = false;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries the JSON summary.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = cli.settings()?;
    let root = StoreRoot::parse(&cli.url)?;
    let fetcher = Fetcher::new(&settings)?;
    let options = RunOptions {
        catalog_required: settings.catalog_required,
        cluster: ClusterParams {
            k: settings.clusters,
            seed: settings.seed,
            max_iterations: settings.max_iterations,
            top_terms: settings.top_terms,
        },
    };

    let artifacts = match pipeline::run(&fetcher, &root, &options).await {
        Ok(artifacts) => artifacts,
        Err(failure) => {
            let report = json!({
                "store": root.as_str(),
                "outcome": "fatal",
                "error": failure.to_string(),
                "endpoints": failure.endpoints,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            info!("Failed after {}", format_duration(t0.elapsed()));
            return Ok(ExitCode::from(exit_status(None)));
        }
    };

    if cli.no_write {
        info!("Skipping artifact output (--no-write)");
    } else {
        let written = db::write_artifacts(&settings.output_dir, &artifacts)?;
        info!(
            json = %written.json.display(),
            homepage = written.homepage.is_some(),
            "Database: {}",
            written.database.display()
        );
    }

    println!("{}", serde_json::to_string_pretty(&artifacts.profile.summary())?);
    info!("Done in {}", format_duration(t0.elapsed()));

    Ok(ExitCode::from(exit_status(Some(artifacts.profile.outcome))))
}

/// Process status for a finished run; `None` is a fatal run.
fn exit_status(outcome: Option<RunOutcome>) -> u8 {
    match outcome {
        Some(RunOutcome::Success) => 0,
        Some(RunOutcome::PartialSuccess) => 2,
        None => 1,
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
