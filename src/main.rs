mod catalog;
mod cli;
mod documents;
mod downloader;
mod error;
mod fetch;
mod parser;
mod pipeline;
mod records;
mod report;
mod types;

use anyhow::{bail, Context};
use chrono::Local;
use clap::Parser;
use cli::{Cli, Command};
use colored::*;
use fetch::HttpFetcher;
use log::{error, info};
use pipeline::RunOptions;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::List => {
            for source in catalog::all() {
                println!("{:<18} {}", source.key.bold(), source.dataset);
                println!("{:<18} {}", "", source.landing_url().dimmed());
            }
            Ok(())
        }
        Command::Run {
            source,
            output_root,
            limit,
            rate_limit,
            timeout_secs,
            no_progress,
        } => {
            let descriptor = catalog::find(&source)?;
            info!("Starting archive of {} ({})", descriptor.dataset, descriptor.key);

            let fetcher = HttpFetcher::new(Duration::from_secs(timeout_secs))
                .context("Failed to build HTTP client")?;
            let options = RunOptions {
                output_root,
                date: Local::now().date_naive(),
                limit,
                rate_limit,
                show_progress: !no_progress,
            };

            let run = match pipeline::archive(&descriptor, &fetcher, &options).await {
                Ok(run) => run,
                Err(e) => {
                    error!("Archive of {} failed: {}", descriptor.key, e);
                    eprintln!("{}", "Archive failed".red());
                    return Err(e.into());
                }
            };

            let elapsed = (Local::now() - run.started)
                .to_std()
                .unwrap_or_default();
            println!("\n{}", "Archive Summary:".bold());
            println!("Source: {}", run.source.bold());
            println!("Dataset: {} (archived by {})", run.dataset, run.attribution);
            println!("Output: {}", run.output_dir.display());
            println!(
                "Archived: {} of {} items",
                run.succeeded().to_string().green(),
                run.attempted()
            );
            println!("Total data transferred: {:.2} MB", run.bytes() as f64 / 1_048_576.0);
            println!("Total duration: {:.2?}", elapsed);

            for section in &run.sections {
                if run.sections.len() > 1 {
                    println!(
                        "  {} - {} of {} in {:.2?}, {} failed ({})",
                        section.title,
                        section.summary.succeeded,
                        section.summary.attempted,
                        section.summary.duration,
                        section.summary.failed(),
                        section.dir.display()
                    );
                }
                for warning in &section.warnings {
                    println!("  {} {}", "!".yellow(), warning);
                }
            }

            let failures: Vec<_> = run.failures().collect();
            if failures.is_empty() {
                println!("\n{}", "All downloads completed successfully".green());
                return Ok(());
            }

            println!("\n{}", "Failed Downloads:".red().bold());
            for failure in &failures {
                println!("✗ {} - Error: {}", failure.target.red(), failure.cause);
            }
            error!("{} downloads failed", failures.len());
            bail!("{} downloads failed; rerun to retry", failures.len())
        }
    }
}
