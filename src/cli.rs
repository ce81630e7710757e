// src/cli.rs
// =============================================================================
// Command-line interface, built with clap's derive API.
//
// Three subcommands:
// - crawl:    mirror a site (or one directory of it) from archival snapshots
// - discover: list the captures the archive's index knows for a site
// - rewrite:  run only the link rewriting pass over an existing mirror
//
// Every CrawlConfig knob has a flag here; main.rs turns the flags into a
// CrawlConfig and validates it.
// =============================================================================

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::DEFAULT_ARCHIVE_HOST;

#[derive(Parser, Debug)]
#[command(
    name = "wayback-mirror",
    version,
    about = "Rebuild a browsable offline mirror of a website from archival snapshots",
    long_about = "wayback-mirror crawls a site's captures on a web archive, saves every page, \
                  stylesheet and image under a local directory, and rewrites links so the \
                  mirror can be browsed offline. Interrupted crawls resume where they stopped."
)]
pub struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mirror a site from its archival captures
    ///
    /// Example: wayback-mirror crawl https://web.archive.org/web/20020821165006/http://www.site.org/a/
    Crawl(CrawlArgs),

    /// Print the captures the archive index holds for a site
    ///
    /// Example: wayback-mirror discover site.org/a --from 2002 --to 2003
    Discover {
        /// Domain plus optional path, e.g. site.org/a
        site: String,

        /// Start of the time range (timestamp prefix, e.g. 2002 or 20020821)
        #[arg(long)]
        from: String,

        /// End of the time range, defaults to --from
        #[arg(long)]
        to: Option<String>,

        #[arg(long, default_value = DEFAULT_ARCHIVE_HOST)]
        archive_host: String,

        /// Print the captures as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Rewrite links in an existing mirror so it browses offline
    Rewrite {
        /// Mirror root directory
        mirror_dir: String,

        #[arg(long, default_value = DEFAULT_ARCHIVE_HOST)]
        archive_host: String,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// Archival URL to start from, or a site prefix like site.org/a
    /// (a prefix needs --from so seeds can be looked up)
    pub target: String,

    /// Start of the time range; when given, seeds come from the archive index
    #[arg(long)]
    pub from: Option<String>,

    /// End of the time range, defaults to --from
    #[arg(long, requires = "from")]
    pub to: Option<String>,

    /// Crawl bound, e.g. site.org/a/ or /a/ (defaults to the seed's directory)
    #[arg(long)]
    pub bound: Option<String>,

    /// Mirror root directory
    #[arg(short, long, default_value = "mirror")]
    pub output: String,

    /// Fetch resources again even if they are already mirrored
    #[arg(long)]
    pub overwrite: bool,

    /// Only fetch images referenced by pages already in the mirror
    #[arg(long)]
    pub images_only: bool,

    /// Skip the link rewriting pass after the crawl
    #[arg(long)]
    pub no_rewrite: bool,

    /// Number of fetches in flight at once
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Extra attempts for a failed fetch
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Per-request timeout in seconds (5-60)
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Lower bound of the random pause before each fetch, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub min_delay_ms: u64,

    /// Upper bound of the random pause before each fetch, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub max_delay_ms: u64,

    /// Stop admitting new URLs after this many
    #[arg(long)]
    pub max_tasks: Option<usize>,

    /// Drop newly found links while this many are already queued
    #[arg(long, default_value_t = 50_000)]
    pub max_queued: usize,

    /// Stop admitting work after this many seconds
    #[arg(long)]
    pub time_limit_secs: Option<u64>,

    /// Seconds between crawl state flushes
    #[arg(long, default_value_t = 30)]
    pub flush_secs: u64,

    #[arg(long, default_value = DEFAULT_ARCHIVE_HOST)]
    pub archive_host: String,

    /// Print the run statistics as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}
