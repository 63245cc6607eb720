//! mungecap CLI entry point.

use std::process;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mungecap::cli::Args;
use mungecap::merge::merge_files;

fn main() -> Result<()> {
    // Usage errors exit with 1, help and version with 0
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            process::exit(code);
        }
    };

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = args.merge_options();
    let summary = merge_files(&options).context("mungecap failed")?;

    for source in &summary.sources {
        info!(
            source = %source.path,
            link_type = source.link_type,
            read = source.stats.read,
            filtered = source.stats.filtered,
            emitted = source.stats.emitted,
            status = %source.status,
            "Input done"
        );
    }

    let failed = summary.failed().count();
    if failed > 0 {
        eprintln!(
            "{} of {} inputs stopped early because of read errors",
            failed,
            summary.sources.len()
        );
    }
    println!(
        "{} packets merged into {}",
        summary.emitted,
        options.output.display()
    );
    Ok(())
}
