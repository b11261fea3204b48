//! Operator CLI for larder.

mod api_client;

use anyhow::Result;
use api_client::{AccessTime, ApiClient, DeleteOutcome};
use clap::{Parser, Subcommand};
use time::OffsetDateTime;

#[derive(Parser)]
#[command(name = "larderctl")]
#[command(about = "Operator CLI for the larder caching proxy")]
#[command(version)]
struct Cli {
    /// Server URL. Admin commands must come from an allow-listed address.
    #[arg(
        long,
        global = true,
        env = "LARDER_SERVER",
        default_value = "http://127.0.0.1:9192"
    )]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the server's counters
    Stat {
        /// Show in-flight transfers instead
        #[arg(long)]
        active: bool,
    },
    /// List available paths
    Paths,
    /// List paths by last access, oldest first
    AccessTimes {
        /// Only show the N oldest entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List every cache file on disk and whether it is tracked
    Disk {
        /// Only show files the server does not track
        #[arg(long)]
        orphans: bool,
    },
    /// Show the cached response headers of a path
    Headers { path: String },
    /// Print the total size of available paths in bytes
    Size,
    /// Force the next request for a path to re-fetch from the origin
    Purge { path: String },
    /// Delete the cached copy of a path
    Delete { path: String },
    /// Delete every path not accessed for a while
    Prune {
        /// Minimum idle time in seconds
        #[arg(long)]
        older_than: u64,
        /// Print what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let Cli { server, command } = Cli::parse();
    let client = ApiClient::new(&server)?;

    match command {
        Commands::Stat { active } => {
            let report = if active {
                client.active().await?
            } else {
                client.stat().await?
            };
            print!("{report}");
        }
        Commands::Paths => {
            for path in client.list_paths().await? {
                println!("{path}");
            }
        }
        Commands::AccessTimes { limit } => {
            for entry in client.access_times(limit).await? {
                println!("{} {}", entry.unix_seconds, entry.path);
            }
        }
        Commands::Disk { orphans } => {
            for entry in client.list_disk().await? {
                if orphans && entry.available {
                    continue;
                }
                let status = if entry.available { "available" } else { "orphan" };
                println!("{status} {}", entry.path);
            }
        }
        Commands::Headers { path } => {
            let headers = client.path_headers(&path).await?;
            println!("{}", serde_json::to_string_pretty(&headers)?);
        }
        Commands::Size => {
            println!("{}", client.available_size().await?);
        }
        Commands::Purge { path } => {
            client.purge(&path).await?;
            println!("Purge pending: {path}");
        }
        Commands::Delete { path } => match client.delete_path(&path).await? {
            DeleteOutcome::Deleted => println!("Deleted: {path}"),
            DeleteOutcome::Missing => println!("Not on disk: {path}"),
            DeleteOutcome::Busy => anyhow::bail!("path is busy, retry later: {path}"),
        },
        Commands::Prune {
            older_than,
            dry_run,
        } => prune(&client, older_than, dry_run).await?,
    }

    Ok(())
}

async fn prune(client: &ApiClient, older_than: u64, dry_run: bool) -> Result<()> {
    let cutoff = idle_cutoff(OffsetDateTime::now_utc(), older_than);
    let entries = client.access_times(None).await?;
    let expired = idle_since(&entries, cutoff);

    if dry_run {
        for entry in &expired {
            println!("Would delete: {}", entry.path);
        }
        println!("{} path(s) idle for at least {older_than}s", expired.len());
        return Ok(());
    }

    let (mut deleted, mut busy) = (0usize, 0usize);
    for entry in expired {
        match client.delete_path(&entry.path).await? {
            DeleteOutcome::Deleted | DeleteOutcome::Missing => {
                tracing::debug!(path = %entry.path, "Pruned");
                deleted += 1;
            }
            DeleteOutcome::Busy => {
                println!("Skipped busy path: {}", entry.path);
                busy += 1;
            }
        }
    }
    println!("Pruned {deleted} path(s), skipped {busy} busy");
    Ok(())
}

/// Unix second before which an access counts as idle.
fn idle_cutoff(now: OffsetDateTime, older_than: u64) -> i64 {
    let older_than = i64::try_from(older_than).unwrap_or(i64::MAX);
    now.unix_timestamp().saturating_sub(older_than)
}

/// Leading entries of an oldest-first access log last touched before `cutoff`.
fn idle_since(entries: &[AccessTime], cutoff: i64) -> Vec<&AccessTime> {
    entries
        .iter()
        .take_while(|entry| entry.unix_seconds < cutoff)
        .collect()
}
