use clap::Parser;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codetext::{
    cli::{Cli, OutputFormat},
    config::CodeTextConfig,
    Consolidator, ConsolidationResult, PassReport, WatchStatus, Workspace,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = cli.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    cli.setup_logging();

    let config = cli.settings()?;
    let request = cli.request(&config)?;
    tracing::info!("Consolidating {}", request.root.display());

    let consolidator = Consolidator::new(config.scan_options())?;

    if cli.dry_run {
        let walked = consolidator.collect(&request.root, &request.filter, &request.output_path, request.compress)?;
        for entry in &walked.entries {
            println!("{}", entry.relative_path);
        }
        for skipped in &walked.skipped {
            println!("  skipped {}: {}", skipped.relative_path, skipped.reason);
        }
        tracing::info!("{} files would be included", walked.entries.len());
        return Ok(());
    }

    let workspace = Workspace::new(consolidator, request);
    let report = workspace.run_once().context("Consolidation failed")?;
    print_result(&report.result, cli.format)?;

    if cli.watch {
        run_watch_mode(&cli, &config, &workspace)?;
    }

    Ok(())
}

fn run_watch_mode(cli: &Cli, config: &CodeTextConfig, workspace: &Workspace) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let show_diff = config.watcher.show_diff;
    let format = cli.format;
    let session = workspace.watch(&config.watcher.watch_options(), move |_batch, outcome| {
        match outcome {
            Ok(report) => {
                if let Err(err) = print_result(&report.result, format) {
                    tracing::error!("Failed to print summary: {}", err);
                }
                if show_diff {
                    print_diff(&report);
                }
            }
            Err(err) => eprintln!("Error: {}", err),
        }
    })?;

    eprintln!("Watching: {}", session.root_folder().display());
    eprintln!("Press Ctrl+C to quit");

    while running.load(Ordering::SeqCst) {
        if let WatchStatus::Failed(reason) = session.status() {
            session.stop();
            anyhow::bail!("Watching failed: {}", reason);
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    session.stop();
    Ok(())
}

fn print_result(result: &ConsolidationResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(result)?),
        OutputFormat::Text => {
            println!(
                "Wrote {} ({} files, {} bytes{})",
                result.output_path.display(),
                result.included_files.len(),
                result.total_bytes,
                if result.compressed { ", gzip" } else { "" }
            );
            for skipped in &result.skipped_files {
                println!("  skipped {}: {}", skipped.relative_path, skipped.reason);
            }
        }
    }
    Ok(())
}

fn print_diff(report: &PassReport) {
    let Some(diff) = &report.diff else {
        println!("  no changes");
        return;
    };

    println!("  {}", diff.summary());
    for line in diff.unified.lines().take(40) {
        if line.starts_with('+') {
            println!("  \x1b[32m{}\x1b[0m", line);
        } else if line.starts_with('-') {
            println!("  \x1b[31m{}\x1b[0m", line);
        } else {
            println!("  {}", line);
        }
    }
}
