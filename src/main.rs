//! blobview - read blobs, diffs and snapshots out of hosted git repositories
//!
//! # Usage
//! ```bash
//! blobview --root /srv/git blob linux.git <hash>            # Raw blob to stdout
//! blobview --root /srv/git info linux.git <hash> -n a.png   # Size, binary flag, MIME as JSON
//! blobview --root /srv/git diff linux.git --from <a> --to <b>
//! blobview --root /srv/git snapshot linux.git v6.1 -f tar -c gzip
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blobview::cache::{CacheStore, MemoryCache};
use blobview::git::diff::NULL_DEVICE;
use blobview::git::{ArchiveBuilder, BlobRepository, ContentClassifier, DiffEngine, DiffSide, Project};
use blobview::models::{Compression, ContainerFormat};
use blobview::{Config, CoreError};

/// Read blobs, diffs and snapshots out of hosted git repositories
#[derive(Parser)]
#[command(name = "blobview")]
#[command(about = "Blob, diff and snapshot access for hosted git repositories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory containing the project repositories
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Read objects through the git binary
    #[arg(long)]
    compat: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a blob's content
    Blob {
        project: String,
        hash: String,
        /// Print numbered lines instead of raw bytes
        #[arg(short, long)]
        lines: bool,
    },
    /// Print size, binary flag and MIME type as JSON
    Info {
        project: String,
        hash: String,
        /// File name, used for extension-based MIME detection
        #[arg(short, long)]
        name: Option<String>,
        /// Size already known from the tree listing
        #[arg(short, long)]
        size: Option<u64>,
    },
    /// Print a blob's MIME type
    Mime {
        project: String,
        hash: String,
        #[arg(short, long)]
        name: Option<String>,
        /// Only the type group, e.g. `image`
        #[arg(long)]
        short: bool,
    },
    /// Unified diff between two blobs; omit a side for added or deleted files
    Diff {
        project: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        from_label: Option<String>,
        #[arg(long)]
        to_label: Option<String>,
    },
    /// Write an archive of the tree at a revision
    Snapshot {
        project: String,
        revision: Option<String>,
        #[arg(short, long, value_enum)]
        format: Option<ContainerFormat>,
        #[arg(short, long, value_enum)]
        compression: Option<Compression>,
        /// Output file, defaults to the suggested file name
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(root) = &cli.root {
        config.project_root = root.clone();
    }
    if cli.compat {
        config.compat = true;
    }
    Ok(config)
}

fn open_project(config: &Config, name: &str) -> anyhow::Result<Arc<Project>> {
    let project = Project::open(config, name).inspect_err(|_| {
        tracing::debug!(root = %config.project_root.display(), project = name, "project lookup failed");
    })?;
    Ok(Arc::new(project))
}

/// Missing projects, objects and revisions all exit with status 2.
fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CoreError>().is_some_and(CoreError::is_not_found)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new(config.cache_max_bytes));
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Blob { project, hash, lines } => {
            let project = open_project(&config, &project)?;
            let repo = BlobRepository::for_project(project, &config, cache);
            let mut blob = repo.blob(hash);
            if lines {
                for (i, line) in blob.lines(&repo).await?.iter().enumerate() {
                    writeln!(stdout, "{:>6} {}", i + 1, line)?;
                }
            } else {
                stdout.write_all(&blob.data(&repo).await?)?;
            }
        }
        Commands::Info { project, hash, name, size } => {
            let project = open_project(&config, &project)?;
            let repo = BlobRepository::for_project(project, &config, cache);
            let classifier = ContentClassifier::from_config(&config);
            let mut blob = repo.blob(hash);
            if let Some(name) = name {
                blob = blob.with_name(name);
            }
            if let Some(size) = size {
                blob.set_size(size);
            }
            let info = blob.info(&repo, &classifier).await?;
            writeln!(stdout, "{}", serde_json::to_string_pretty(&info)?)?;
        }
        Commands::Mime { project, hash, name, short } => {
            let project = open_project(&config, &project)?;
            let repo = BlobRepository::for_project(project, &config, cache);
            let classifier = ContentClassifier::from_config(&config);
            let mut blob = repo.blob(hash);
            if let Some(name) = name {
                blob = blob.with_name(name);
            }
            writeln!(stdout, "{}", blob.mime(&repo, &classifier, short).await?)?;
        }
        Commands::Diff {
            project,
            from,
            to,
            from_label,
            to_label,
        } => {
            let project = open_project(&config, &project)?;
            let repo = BlobRepository::for_project(project, &config, cache);
            let engine = DiffEngine::from_config(&config);

            let from_label = from_label.or_else(|| from.clone()).unwrap_or_else(|| NULL_DEVICE.to_string());
            let to_label = to_label.or_else(|| to.clone()).unwrap_or_else(|| NULL_DEVICE.to_string());
            let text = engine
                .diff(
                    &repo,
                    DiffSide::new(from.as_deref(), &from_label),
                    DiffSide::new(to.as_deref(), &to_label),
                )
                .await?;
            stdout.write_all(text.as_bytes())?;
        }
        Commands::Snapshot {
            project,
            revision,
            format,
            compression,
            output,
        } => {
            let project = open_project(&config, &project)?;
            let builder = ArchiveBuilder::for_project(&project, &config, cache);
            let snapshot = builder
                .snapshot(
                    &project.name,
                    revision.as_deref(),
                    format.unwrap_or(config.snapshot_format),
                    compression.unwrap_or(config.snapshot_compression),
                )
                .await?;

            let path = output.unwrap_or_else(|| PathBuf::from(&snapshot.filename));
            std::fs::write(&path, &snapshot.data)?;
            let summary = json!({
                "path": path.display().to_string(),
                "content_type": snapshot.content_type,
                "filename": snapshot.filename,
                "bytes": snapshot.data.len(),
            });
            writeln!(stdout, "{}", serde_json::to_string_pretty(&summary)?)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing (quiet unless RUST_LOG says otherwise)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => Ok(()),
        Err(e) if is_not_found(&e) => {
            eprintln!("✗ {}", e);
            std::process::exit(2);
        }
        Err(e) => Err(e),
    }
}
