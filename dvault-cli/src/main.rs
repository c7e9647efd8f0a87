//! DVault command line client

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dvault_core::{ProgressObserver, Repository, Workdir};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dvault")]
#[command(author = "DVault Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Snapshot directory trees into a content-addressed repository")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a new repository
    Init { path: PathBuf },

    /// Bind a directory to a repository and write a revision into it
    Checkout {
        #[arg(short, long)]
        repo: PathBuf,
        #[arg(short, long, default_value = "default")]
        session: String,
        /// Repository subtree mirrored by the directory
        #[arg(long, default_value = "")]
        scope: String,
        /// Revision to check out (latest if omitted)
        #[arg(long)]
        rev: Option<u64>,
        dir: PathBuf,
    },

    /// Commit the current state of a bound directory
    Checkin {
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Bind to this repository first (for directories never checked out)
        #[arg(short, long)]
        repo: Option<PathBuf>,
        #[arg(short, long, default_value = "default")]
        session: String,
        #[arg(long, default_value = "")]
        scope: String,
    },

    /// Show how a bound directory differs from its last sync
    Status {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Stop tracking a file; the next checkin drops it
    Rm {
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        path: String,
    },

    /// List revisions, newest first
    Log {
        #[arg(short, long)]
        repo: PathBuf,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Re-hash every blob referenced by any revision
    Verify {
        #[arg(short, long)]
        repo: PathBuf,
    },
}

/// Reports per-file progress through the log
struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_file(&self, operation: &str, path: &str, done: usize, total: usize) {
        debug!("{} [{}/{}] {}", operation, done, total, path);
    }
}

fn observer() -> Option<Box<dyn ProgressObserver>> {
    Some(Box::new(LogProgress))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    match cli.command {
        Commands::Init { path } => {
            let repo = Repository::create(&path)
                .with_context(|| format!("Failed to create repository at {}", path.display()))?;
            println!(
                "Repository initialized at {} (UUID: {})",
                path.display(),
                repo.uuid()
            );
        }

        Commands::Checkout {
            repo,
            session,
            scope,
            rev,
            dir,
        } => {
            let repository = open_repository(&repo)?;
            let mut workdir = Workdir::bind(repository, session, &scope, observer(), &dir)?;
            let checked_out = workdir
                .checkout(rev)
                .with_context(|| format!("Failed to check out into {}", dir.display()))?;
            info!(rev = checked_out, dir = %dir.display(), "checkout complete");
            println!("Checked out revision {}", checked_out);
        }

        Commands::Checkin {
            dir,
            repo,
            session,
            scope,
        } => {
            let mut workdir = match repo {
                Some(repo) => Workdir::bind(open_repository(&repo)?, session, &scope, observer(), &dir)?,
                None => open_workdir(&dir)?,
            };
            let changes = workdir.get_changes()?;
            if changes.is_clean() && workdir.revision().is_some() {
                println!("No changes; committing an identical revision");
            }
            let rev = workdir
                .checkin()
                .with_context(|| format!("Failed to check in {}", dir.display()))?;
            println!("Committed revision {}", rev);
        }

        Commands::Status { dir } => {
            let workdir = open_workdir(&dir)?;
            let changes = workdir.get_changes()?;
            match workdir.revision() {
                Some(rev) => println!("At revision {} (scope: {:?})", rev, workdir.scope()),
                None => println!("Not yet synced (scope: {:?})", workdir.scope()),
            }
            let buckets = [
                ("A", &changes.new),
                ("M", &changes.changed),
                ("!", &changes.missing),
                ("D", &changes.deleted),
            ];
            for (flag, paths) in buckets {
                for path in paths {
                    println!("{}  {}", flag, path);
                }
            }
            if changes.is_clean() {
                println!("Clean ({} files)", changes.unchanged.len());
            }
        }

        Commands::Rm { dir, path } => {
            let mut workdir = open_workdir(&dir)?;
            workdir.remove(&path)?;
            println!("D  {}", path);
        }

        Commands::Log { repo, limit } => {
            let repository = open_repository(&repo)?;
            for summary in repository.revisions().log(limit)? {
                let when = DateTime::<Utc>::from_timestamp(summary.timestamp, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| summary.timestamp.to_string());
                println!(
                    "r{} | {} | {} | {} files",
                    summary.id, summary.session, when, summary.file_count
                );
            }
        }

        Commands::Verify { repo } => {
            let repository = open_repository(&repo)?;
            let report = repository.verify()?;
            for problem in &report.problems {
                println!("{}", problem);
            }
            println!(
                "Checked {} revisions, {} files, {} blobs",
                report.revisions, report.files, report.blobs
            );
            if !report.is_ok() {
                bail!("{} problems found", report.problems.len());
            }
        }
    }

    Ok(())
}

fn open_repository(path: &Path) -> Result<Repository> {
    Repository::open(path).with_context(|| format!("Failed to open repository at {}", path.display()))
}

fn open_workdir(dir: &Path) -> Result<Workdir> {
    Workdir::open(dir, observer())
        .with_context(|| format!("{} is not a bound working directory", dir.display()))
}
