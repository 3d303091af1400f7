//! Vocab Pregen CLI - resumable batch content generation.
//!
//! Run `vocab-pregen --help` for usage information.

use anyhow::Result;
use console::style;
use std::fmt::Display;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vocab_pregen::orchestrator::RunOutcome;
use vocab_pregen::vocabulary::{self, Vocabulary};
use vocab_pregen::{
    Args, Config, CostEstimate, JobConfig, Orchestrator, PregenError, RateLimitConfig, RunReport,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse_args();

    // Setup logging
    setup_logging(&args);

    // Print banner
    if !args.json_logs {
        print_banner();
    }

    // Load the vocabulary before anything touches the network
    let mut words = match vocabulary::parse_file(&args.input).await {
        Ok(words) => words,
        Err(e) => fatal("Input error", e),
    };

    if args.validate {
        print_vocabulary_stats(&words);
        if words.is_empty() {
            fatal(
                "Validation failed",
                PregenError::EmptyVocabulary {
                    path: args.input.clone(),
                },
            );
        }
        println!(
            "{} {} words ready",
            style("✓").green().bold(),
            words.len()
        );
        return Ok(());
    }

    let limit = match args.item_limit() {
        Ok(limit) => limit,
        Err(e) => fatal("Configuration error", e),
    };
    if let Some(limit) = limit {
        words.truncate(limit);
        info!(limit, items = words.len(), "Test mode: limiting items");
    }

    // Dry run mode
    if args.dry_run {
        println!("\n{}", style("DRY RUN MODE").yellow().bold());
        print_vocabulary_stats(&words);
        CostEstimate::new(words.len(), dry_run_rpm(&args)).print();
        return Ok(());
    }

    // Load configuration
    let config = match Config::from_args(&args) {
        Ok(c) => c,
        Err(e) => fatal("Configuration error", e),
    };
    let job = match JobConfig::from_args(&args) {
        Ok(j) => j,
        Err(e) => fatal("Configuration error", e),
    };

    // Print configuration summary
    if args.verbose && !args.json_logs {
        print_config_summary(&job, &config, words.len());
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let mut orchestrator = match Orchestrator::from_config(&config, job, cancel) {
        Ok(o) => o,
        Err(e) => fatal("Configuration error", e),
    };

    info!(
        input = %args.input.display(),
        items = words.len(),
        "Starting generation"
    );

    let report = match orchestrator.run(&words.items).await {
        Ok(report) => report,
        Err(e) => fatal("Generation aborted", e),
    };

    // Print results
    if args.json_logs {
        // JSON output for programmatic consumption
        let json_result = serde_json::json!({
            "status": outcome_name(report.outcome),
            "completed_items": report.progress.completed,
            "total_items": report.progress.total,
            "success_count": report.session.success_count,
            "failure_count": report.session.failure_count,
            "failed_units": report.progress.failed,
            "estimated_tokens": report.progress.total_tokens_used,
            "estimated_cost": report.progress.estimated_cost,
            "elapsed_seconds": report.session.elapsed.as_secs_f64(),
        });
        println!("{}", serde_json::to_string(&json_result)?);
    } else {
        report.print_summary();
        print_next_steps(&report);
    }

    Ok(())
}

fn fatal(context: &str, e: impl Display) -> ! {
    error!("{context}: {e}");
    eprintln!("{} {context}: {e}", style("Error:").red().bold());
    std::process::exit(1);
}

fn outcome_name(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Done => "complete",
        RunOutcome::Partial => "partial",
        RunOutcome::Interrupted => "interrupted",
        RunOutcome::NothingToDo => "nothing_to_do",
    }
}

fn setup_logging(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("vocab_pregen={level},vocab-pregen={level}"))
    });

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact(),
            )
            .init();
    }
}

/// First signal cancels the run at the next unit boundary; a second one
/// exits immediately without saving.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        eprintln!(
            "\n{} Interrupt received: finishing the current query and saving progress \
             (press Ctrl+C again to quit without saving)",
            style("⚠").yellow().bold()
        );
        cancel.cancel();

        wait_for_signal().await;
        eprintln!("{} Forced exit", style("✗").red().bold());
        std::process::exit(130);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM signal"),
                _ = sigint.recv() => info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C signal"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}

/// Rate used by the estimate; credentials are not required for a dry run.
fn dry_run_rpm(args: &Args) -> u32 {
    args.rpm.unwrap_or_else(|| {
        args.config
            .as_deref()
            .and_then(|path| Config::from_file(path).ok())
            .map_or(RateLimitConfig::default().rpm, |c| c.rate_limit.rpm)
    })
}

fn print_banner() {
    let banner = r"

 __     __              _       ____
 \ \   / /__   ___ __ _| |__   |  _ \ _ __ ___  __ _  ___ _ __
  \ \ / / _ \ / __/ _` | '_ \  | |_) | '__/ _ \/ _` |/ _ \ '_ \
   \ V / (_) | (_| (_| | |_) | |  __/| | |  __/ (_| |  __/ | | |
    \_/ \___/ \___\__,_|_.__/  |_|   |_|  \___|\__, |\___|_| |_|
                                               |___/
    ";

    println!("{}", style(banner).cyan().bold());
    println!(
        "    {}",
        style("Resumable Batch Content Generation").white().dim()
    );
    println!(
        "    {}",
        style(format!("v{}", vocab_pregen::VERSION)).white().dim()
    );
    println!();
}

fn print_vocabulary_stats(words: &Vocabulary) {
    let stats = &words.stats;
    println!("{}", style("Vocabulary:").bold());
    println!("  Lines:      {}", stats.total_lines);
    println!("  Words:      {}", stats.valid_words);
    println!("  Skipped:    {}", stats.skipped_lines);
    println!("  Malformed:  {}", stats.error_lines);
    println!("  Duplicates: {}", stats.duplicates);
    if words.len() != stats.valid_words {
        println!("  Selected:   {}", words.len());
    }
    println!();
}

fn print_config_summary(job: &JobConfig, config: &Config, items: usize) {
    println!("{}", style("Configuration:").bold());
    println!("  Input:      {}", job.input.display());
    println!("  Output:     {}", job.output.display());
    println!("  Progress:   {}", job.progress.display());
    println!("  Book:       {} ({})", job.book_id, job.language);
    println!("  Items:      {items}");
    println!(
        "  Endpoint:   {}",
        vocab_pregen::endpoint::completions_url(config.endpoint.url.as_deref())
    );
    println!("  Model:      {}", config.endpoint.model);
    println!("  Rate Limit: {} req/min", config.rate_limit.rpm);
    println!(
        "  Delay:      {:?} .. {:?}",
        config.rate_limit.min_delay, config.rate_limit.max_delay
    );
    println!("  Timeout:    {:?}", config.request.timeout);
    println!("  Attempts:   {}", config.retry.max_attempts);
    println!("  Batch Size: {}", job.batch_size);
    if job.force {
        println!("  {}", style("Force: existing progress will be discarded").yellow());
    }
    println!();
}

fn print_next_steps(report: &RunReport) {
    match report.outcome {
        RunOutcome::Done => println!(
            "\n{} Results saved to: {}",
            style("✓").green().bold(),
            report.output_path.display()
        ),
        RunOutcome::Partial => println!(
            "\n{} {} queries failed; run the same command again to retry them",
            style("⚠").yellow().bold(),
            report.progress.failed
        ),
        RunOutcome::Interrupted => println!(
            "\n{} Progress saved to {}. Run the same command again to resume.",
            style("✓").green().bold(),
            report.progress_path.display()
        ),
        RunOutcome::NothingToDo => println!(
            "\n{} No vocabulary items selected, nothing to do",
            style("ℹ").cyan().bold()
        ),
    }
}
