//! Command-line interface definitions for article-watch.
//!
//! Global options select the configuration file and the wait mode; the
//! subcommand selects what to do. `run` is the default.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the article-watch application.
///
/// # Examples
///
/// ```sh
/// # Log in, then crawl on the configured schedule until Ctrl-C
/// article-watch run
///
/// # Track a new account, searching the remote system by its alias
/// article-watch subscribe "Daily Notes" --alias daily_notes
///
/// # One pass with timeouts suspended, for a supervised first login
/// article-watch --interactive crawl
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, env = "ARTICLE_WATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Suspend all timeouts; waits end only on Ctrl-C
    #[arg(short, long)]
    pub interactive: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Log in and crawl on schedule until interrupted
    Run,
    /// Establish a session and persist it, then exit
    Login,
    /// Log in and run a single crawl pass
    Crawl,
    /// Start tracking a source
    Subscribe {
        /// Display name, unique among tracked sources
        name: String,
        /// Name to search the remote system with, when it differs
        #[arg(short, long)]
        alias: Option<String>,
    },
    /// List tracked, active sources
    Sources,
    /// Stop crawling a source (it stays stored)
    Disable {
        /// Source id as printed by `sources`
        id: String,
    },
    /// Print the cron expression for a crawl interval
    Schedule {
        /// Interval in minutes, 5 to 1440
        minutes: u32,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
