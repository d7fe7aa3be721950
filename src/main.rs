use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod domain;
mod error;
mod extract;
mod fetcher;
mod harvest;
mod models;
mod oracle;
mod pipeline;
mod records;
mod redirect;
mod search;
mod selector;

use config::ConfigArgs;
use pipeline::Pipeline;
use records::{CsvResultSink, LinksFileWriter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for candidate pages and write them to a links file
    Search {
        /// Names CSV (name, optional institution)
        #[arg(short, long)]
        input: PathBuf,

        /// Links file to write
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Find the best email per subject and write a results CSV
    Find {
        /// Links file from `search`, or a names CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Results CSV to write
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Start the API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            input,
            output,
            config,
        } => {
            let config = config::build_config(&config)?;
            info!("Searching links for subjects in {} -> {}", input.display(), output.display());
            search_file(&config, &input, &output).await?;
        }
        Commands::Find {
            input,
            output,
            config,
        } => {
            let config = config::build_config(&config)?;
            info!("Finding emails for subjects in {} -> {}", input.display(), output.display());
            find_file(&config, &input, &output).await?;
        }
        Commands::Serve { port, config } => {
            let config = config::build_config(&config)?;
            let pipeline = Pipeline::from_config(&config).context("Failed to build pipeline")?;
            api::start_api_server(pipeline, port).await;
        }
    }

    Ok(())
}

/// Raises the returned flag on Ctrl-C so a running batch can stop early.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current subject and stopping.");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn search_file(config: &config::Config, input: &Path, output: &Path) -> Result<()> {
    let subjects = records::read_subjects(input)
        .with_context(|| format!("Failed to read subjects from {}", input.display()))?;
    let pipeline = Pipeline::from_config(config).context("Failed to build pipeline")?;

    let file = records::create_output(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = LinksFileWriter::new(file);

    let summary = pipeline
        .discover_links(subjects, &mut writer, cancel_on_ctrl_c())
        .await
        .with_context(|| format!("Failed writing links to {}", output.display()))?;

    info!(
        "Wrote links for {} subjects ({} with results) to {}",
        summary.processed,
        summary.found,
        output.display()
    );
    Ok(())
}

async fn find_file(config: &config::Config, input: &Path, output: &Path) -> Result<()> {
    let subjects = records::read_subjects(input)
        .with_context(|| format!("Failed to read subjects from {}", input.display()))?;
    let pipeline = Pipeline::from_config(config).context("Failed to build pipeline")?;

    let file = records::create_output(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut sink = CsvResultSink::new(file)?;

    let summary = pipeline
        .run_batch(subjects, &mut sink, cancel_on_ctrl_c())
        .await
        .with_context(|| format!("Failed writing results to {}", output.display()))?;

    info!(
        "Wrote {} results ({} emails found) to {}",
        summary.processed,
        summary.found,
        output.display()
    );
    Ok(())
}
