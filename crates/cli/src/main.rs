//! Operator CLI for the Strata versioned path store.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use strata_core::config::AppConfig;
use strata_core::{ContentHash, ContextSnapshot, NewBlob, NormalizedPath, StoreContext, VersionMeta};
use strata_store::{Readable, VersionStore, Writable};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Operator CLI for the Strata versioned path store")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML). STRATA_* environment variables override it.
    #[arg(long, env = "STRATA_CONFIG", default_value = "strata.toml")]
    config: PathBuf,

    /// Principal recorded on every version written by this invocation
    #[arg(long, env = "STRATA_PRINCIPAL")]
    principal: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a path from a local file
    Put {
        /// Absolute path to create, e.g. /docs/42
        path: String,
        /// Local file to upload
        file: PathBuf,
        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        /// MIME type (sniffed from content when omitted)
        #[arg(long)]
        mime: Option<String>,
    },
    /// Write a new version of an existing path
    Update { path: String, file: PathBuf },
    /// Print the current content of a path
    Cat { path: String },
    /// Delete a path, keeping its history
    Rm {
        path: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Bring back a deleted path with its last content
    Undelete { path: String },
    /// Make historical content current again
    Restore {
        path: String,
        /// Content hash in `<algorithm>:<hex>` form
        hash: String,
    },
    /// Show every version of a path, oldest first
    History { path: String },
    /// List the children of a path
    Ls {
        path: String,
        /// Include deleted children
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Show active path locks
    Locks,
    /// Release lock groups whose lease expired
    ReapLocks,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load configuration from an optional TOML file merged with `STRATA_`
/// environment variables (`__` separates nested keys).
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        tracing::debug!(config_path = %path.display(), "loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!(config_path = %path.display(), "no config file, using defaults");
    }

    let config: AppConfig = figment
        .merge(
            Env::prefixed("STRATA_")
                .ignore(&["config", "principal"])
                .split("__"),
        )
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn parse_path(raw: &str) -> Result<NormalizedPath> {
    NormalizedPath::parse(raw).with_context(|| format!("invalid path '{raw}'"))
}

/// Split a path into its parent and leaf segment.
fn split_leaf(path: &NormalizedPath) -> Result<(NormalizedPath, &str)> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => bail!("cannot write to the root path"),
    }
}

fn format_time(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

fn format_version(v: &VersionMeta) -> String {
    let mut line = format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        v.id,
        v.operation,
        format_time(v.timestamp),
        v.blob.hash,
        v.principal,
        v.path
    );
    if let Some(txn) = &v.transaction_id {
        line.push_str(&format!("\ttxn={txn}:{}", v.transaction_result));
    }
    if let Some(reason) = &v.reason {
        line.push_str(&format!("\treason={reason}"));
    }
    line
}

fn print_written(written: Option<VersionMeta>, path: &NormalizedPath, refusal: &str) -> Result<()> {
    match written {
        Some(v) => {
            println!("{}", format_version(&v));
            Ok(())
        }
        None => bail!("{path}: {refusal}"),
    }
}

async fn run(cli: Cli, store: &VersionStore) -> Result<()> {
    let snapshot = cli
        .principal
        .as_ref()
        .map(|p| ContextSnapshot::default().with_principal(p.clone()));
    let ctx = StoreContext::from_snapshot(snapshot.as_ref()).context("invalid principal")?;

    match cli.command {
        Commands::Put {
            path,
            file,
            name,
            mime,
        } => {
            let path = parse_path(&path)?;
            let (parent, leaf) = split_leaf(&path)?;
            let name = name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let content = strata_storage::file_stream(&file)
                .await
                .with_context(|| format!("failed to open {}", file.display()))?;
            let written = store
                .create_with_id(
                    &ctx,
                    &parent,
                    leaf,
                    NewBlob::new(name, mime.unwrap_or_default()),
                    content,
                )
                .await?;
            print_written(written, &path, "already exists")
        }
        Commands::Update { path, file } => {
            let path = parse_path(&path)?;
            let content = strata_storage::file_stream(&file)
                .await
                .with_context(|| format!("failed to open {}", file.display()))?;
            let written = store.update(&ctx, &path, content).await?;
            print_written(written, &path, "no live version to update")
        }
        Commands::Cat { path } => {
            let path = parse_path(&path)?;
            let Some(mut stream) = store.read(&ctx, &path).await? else {
                bail!("{path}: not found");
            };
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = stream.next().await {
                stdout.write_all(&chunk?).await?;
            }
            stdout.flush().await?;
            Ok(())
        }
        Commands::Rm { path, reason } => {
            let path = parse_path(&path)?;
            let written = store.delete(&ctx, &path, reason.as_deref()).await?;
            print_written(written, &path, "no live version to delete")
        }
        Commands::Undelete { path } => {
            let path = parse_path(&path)?;
            let written = store.undelete(&ctx, &path).await?;
            print_written(written, &path, "not deleted")
        }
        Commands::Restore { path, hash } => {
            let path = parse_path(&path)?;
            let hash = ContentHash::parse(&hash).context("invalid content hash")?;
            let written = store.restore(&ctx, &path, &hash).await?;
            print_written(written, &path, "no version with that content")
        }
        Commands::History { path } => {
            let path = parse_path(&path)?;
            let versions = store.get_all_versions(&ctx, &path).await?;
            if versions.is_empty() {
                bail!("{path}: not found");
            }
            for v in &versions {
                println!("{}", format_version(v));
            }
            Ok(())
        }
        Commands::Ls { path, all } => {
            let path = parse_path(&path)?;
            let children = if all {
                store.get_children_latest_version(&ctx, &path).await?
            } else {
                store.list(&ctx, &path).await?
            };
            for v in &children {
                println!("{}", format_version(v));
            }
            Ok(())
        }
        Commands::Locks => {
            let Some(locking) = store.locking() else {
                bail!("locking is disabled");
            };
            let locks = locking.active_locks().await?;
            if locks.is_empty() {
                println!("No active locks.");
            }
            for lock in &locks {
                println!(
                    "{}\t{}\t{}\texpires {}",
                    lock.lock_group_id,
                    lock.owner_id,
                    lock.scope_key,
                    format_time(lock.lease_expires_at)
                );
            }
            Ok(())
        }
        Commands::ReapLocks => {
            let Some(locking) = store.locking() else {
                bail!("locking is disabled");
            };
            let reaped = locking.reap_expired(OffsetDateTime::now_utc()).await?;
            println!("Released {reaped} expired lock group(s).");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli.config)?;
    let store = VersionStore::from_config(&config)
        .await
        .context("failed to open version store")?;
    run(cli, &store).await
}
