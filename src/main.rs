// src/main.rs
// =============================================================================
// Entry point of the wayback-mirror CLI.
//
// What happens here:
// 1. Parse command-line arguments and set up logging
// 2. Turn the flags into a CrawlConfig
// 3. Find seeds (the target itself, or the archive index for a time range)
// 4. Crawl, then rewrite links so the mirror browses offline
// 5. Print the run statistics and exit (0 = done, 2 = fatal error)
//
// Dead pages do not change the exit code: they are listed in the summary and
// in crawl-stats.json. Only failures that make the whole run pointless
// (bad target, index unreachable, unwritable mirror) exit with 2.
// =============================================================================

mod archive;
mod cli;
mod config;
mod crawl;
mod error;
mod fetch;
mod mirror;
mod rewrite;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use archive::cdx::{self, CdxQuery, CdxRecord};
use archive::CaptureRef;
use cli::{Cli, Commands, CrawlArgs};
use config::CrawlConfig;
use crawl::{Bounds, CrawlReport, Crawler};
use error::MirrorError;
use fetch::{Fetch, HttpFetcher};
use mirror::STATS_FILE;
use rewrite::{rewrite_mirror, RewriteReport};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

// Logs go to stderr so --json output on stdout stays clean.
// RUST_LOG, when set, wins over -v/-q.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Crawl(args) => handle_crawl(args).await,
        Commands::Discover {
            site,
            from,
            to,
            archive_host,
            json,
        } => handle_discover(site, from, to, &archive_host, json).await,
        Commands::Rewrite {
            mirror_dir,
            archive_host,
            json,
        } => handle_rewrite(PathBuf::from(mirror_dir), &archive_host, json).await,
    }
}

fn crawl_config(args: &CrawlArgs) -> CrawlConfig {
    CrawlConfig {
        archive_host: args.archive_host.clone(),
        concurrency: args.concurrency,
        max_retries: args.max_retries,
        timeout: Duration::from_secs(args.timeout_secs),
        min_delay: Duration::from_millis(args.min_delay_ms),
        max_delay: Duration::from_millis(args.max_delay_ms),
        max_tasks: args.max_tasks,
        max_queued: args.max_queued,
        flush_interval: Duration::from_secs(args.flush_secs.max(1)),
        time_limit: args.time_limit_secs.map(Duration::from_secs),
        overwrite: args.overwrite,
        ..CrawlConfig::default()
    }
}

fn transport(config: &CrawlConfig) -> Result<Arc<dyn Fetch>> {
    let fetcher = HttpFetcher::new(config.timeout, &config.user_agent)
        .context("Could not build the HTTP client")?;
    Ok(Arc::new(fetcher))
}

fn parse_archive_host(host: &str) -> Result<Url> {
    match Url::parse(host) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(url),
        _ => bail!("Archive host '{}' is not a valid http(s) URL", host),
    }
}

/// Resolves on ctrl-c or when the time limit runs out, whichever comes first
fn shutdown_signal(time_limit: Option<Duration>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let deadline = async {
            match time_limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping the crawl"),
            _ = deadline => warn!("Time limit reached, stopping the crawl"),
        }
    })
}

// Handles the 'crawl' subcommand
async fn handle_crawl(args: CrawlArgs) -> Result<i32> {
    let config = crawl_config(&args);
    config.validate().context("Invalid crawl settings")?;
    let archive_host = config.archive_host_url()?;
    let fetcher = transport(&config)?;
    let root = PathBuf::from(&args.output);

    // The target is either one archival URL or a site prefix for the index
    let target = CaptureRef::parse(&args.target).ok();
    let mut seeds: Vec<CaptureRef> = target.iter().cloned().collect();

    if let Some(from) = &args.from {
        let site_prefix = match &target {
            Some(capture) => Bounds::new(&capture.canonical, args.bound.as_deref())
                .prefix()
                .to_string(),
            None => args.target.clone(),
        };
        let query = CdxQuery {
            site_prefix,
            from: from.clone(),
            to: args.to.clone(),
        };
        let records = cdx::discover(fetcher.as_ref(), &archive_host, &query).await?;
        seeds.extend(records.iter().filter_map(CdxRecord::capture));
    } else if target.is_none() {
        bail!(
            "'{}' is not an archival capture URL; pass --from to look up captures for a site prefix",
            args.target
        );
    }

    let first = match seeds.first() {
        Some(first) => first.clone(),
        None => bail!("The archive index has no captures for '{}'", args.target),
    };
    let bound = args
        .bound
        .clone()
        .or_else(|| target.is_none().then(|| args.target.clone()));
    let bounds = Bounds::new(&first.canonical, bound.as_deref());
    if let Some(capture) = &target {
        if !bounds.admits(&capture.canonical) {
            return Err(MirrorError::OutOfBounds(capture.canonical.key()).into());
        }
    }

    println!("🔍 Mirroring {} into {}", bounds.prefix(), root.display());

    let crawler = Crawler::new(config.clone(), fetcher, root.clone())?;
    let shutdown = shutdown_signal(config.time_limit);
    let report = if args.images_only {
        let timestamp = args.from.clone().unwrap_or_else(|| first.timestamp.clone());
        crawler.run_images_only(&timestamp, shutdown).await?
    } else {
        crawler.run(seeds, bounds, shutdown).await?
    };

    let rewrite = if args.no_rewrite {
        None
    } else {
        let root = root.clone();
        let host = archive_host.clone();
        let report = tokio::task::spawn_blocking(move || rewrite_mirror(&root, &host))
            .await
            .context("Link rewrite task panicked")??;
        Some(report)
    };

    print_crawl_report(&root, &report, rewrite.as_ref(), args.json)?;
    Ok(0)
}

// Handles the 'discover' subcommand
async fn handle_discover(site: String, from: String, to: Option<String>, archive_host: &str, json: bool) -> Result<i32> {
    let archive_host = parse_archive_host(archive_host)?;
    let fetcher = transport(&CrawlConfig::default())?;
    let query = CdxQuery {
        site_prefix: site,
        from,
        to,
    };
    let records = cdx::discover(fetcher.as_ref(), &archive_host, &query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(0);
    }

    println!("{:<16} {:<24} {}", "TIMESTAMP", "MIMETYPE", "ORIGINAL");
    println!("{}", "=".repeat(90));
    for record in &records {
        println!("{:<16} {:<24} {}", record.timestamp, record.mimetype, record.original);
    }
    println!();
    println!("📋 {} unique capture(s)", records.len());
    Ok(0)
}

// Handles the 'rewrite' subcommand
async fn handle_rewrite(root: PathBuf, archive_host: &str, json: bool) -> Result<i32> {
    let archive_host = parse_archive_host(archive_host)?;
    if !root.is_dir() {
        bail!("Mirror directory {} does not exist", root.display());
    }

    let report = tokio::task::spawn_blocking(move || rewrite_mirror(&root, &archive_host))
        .await
        .context("Link rewrite task panicked")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_rewrite_summary(&report);
    }
    Ok(0)
}

fn print_crawl_report(
    root: &Path,
    report: &CrawlReport,
    rewrite: Option<&RewriteReport>,
    json: bool,
) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "stats": report.stats,
            "mirrored": report.mirrored,
            "interrupted": report.interrupted,
            "rewrite": rewrite,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let stats = &report.stats;
    if !stats.failures.is_empty() {
        println!("{:<70} {}", "FAILED", "ERROR");
        println!("{}", "=".repeat(100));
        for failure in &stats.failures {
            let url = if failure.url.len() > 67 {
                format!("{}...", &failure.url[..67])
            } else {
                failure.url.clone()
            };
            println!("{:<70} {}", url, failure.error);
        }
        println!();
    }

    println!("📊 Summary:");
    println!("   ✅ Processed: {}", stats.processed);
    println!("   ⏭️  Skipped:   {}", stats.skipped);
    println!("   🟰 Unchanged: {}", stats.unchanged);
    println!("   🔁 Retried:   {}", stats.retried);
    println!("   🚮 Dropped:   {}", stats.dropped);
    println!("   ❌ Failed:    {}", stats.failed);
    for (content_type, count) in &stats.by_content_type {
        println!("      {:<28} {}", content_type, count);
    }
    println!("   📋 In mirror: {}", report.mirrored);
    println!("   Statistics written to {}", root.join(STATS_FILE).display());
    if report.interrupted {
        println!("   ⏸️  Interrupted: run the same command again to resume");
    }

    if let Some(rewrite) = rewrite {
        println!();
        print_rewrite_summary(rewrite);
    }
    info!(processed = stats.processed, failed = stats.failed, "Done");
    Ok(())
}

fn print_rewrite_summary(report: &RewriteReport) {
    println!("🔗 Links:");
    println!("   Pages:    {} ({} changed)", report.pages, report.changed);
    println!("   Live:     {}", report.live);
    println!("   Disabled: {}", report.disabled);
    if report.failed > 0 {
        println!("   Unreadable pages: {}", report.failed);
    }
}
