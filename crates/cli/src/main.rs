//! Command-line client for the isolate content store.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use isolate_client::{FileSink, IsolateClient, archive, download_all};
use isolate_core::item::collect_items;
use isolate_core::{ClientConfig, ContentId, Item, Namespace};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "isolatectl")]
#[command(about = "Upload to and download from an isolate content store")]
#[command(version)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct StoreArgs {
    /// Config file path
    #[arg(long, env = "ISOLATE_CONFIG")]
    config: Option<PathBuf>,

    /// Store URL (overrides config)
    #[arg(long)]
    server: Option<String>,

    /// Namespace (overrides config)
    #[arg(long)]
    namespace: Option<String>,

    /// Number of concurrent transfers (overrides config)
    #[arg(long, short = 'j')]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files and directories to the store
    Archive {
        /// Files or directories to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Download objects by identifier
    Download {
        /// Directory to write files into
        #[arg(long, short = 't')]
        target: PathBuf,
        /// Object to fetch and where to write it, relative to the target
        #[arg(long = "file", short = 'f', num_args = 2, value_names = ["ID", "PATH"], required = true)]
        files: Vec<String>,
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { verbose, command } = Cli::parse();

    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match command {
        Commands::Archive { paths, store } => handle_archive(&paths, &store).await,
        Commands::Download {
            target,
            files,
            store,
        } => handle_download(&target, &files, &store).await,
    }
}

/// Merge the config file, `ISOLATE_` environment variables and flags.
fn load_config(args: &StoreArgs) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if let Some(path) = &args.config {
        anyhow::ensure!(path.exists(), "config file {} not found", path.display());
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed("ISOLATE_").split("__"));

    let mut config: ClientConfig = figment
        .extract()
        .context("failed to load configuration")?;

    if let Some(server) = &args.server {
        config.server = server.clone();
    }
    if let Some(namespace) = &args.namespace {
        config.namespace = Namespace::parse(namespace)?;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    if config.server.is_empty() {
        anyhow::bail!("no store configured; pass --server or set ISOLATE_SERVER");
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn handle_archive(paths: &[PathBuf], store: &StoreArgs) -> Result<()> {
    let config = load_config(store)?;

    let mut files = Vec::new();
    for path in paths {
        collect_files(path, &mut files)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
    }

    let mut items = Vec::with_capacity(files.len());
    for file in &files {
        let item = Item::from_file(file)
            .await
            .with_context(|| format!("failed to hash {}", file.display()))?;
        println!("{}  {}", item.id, file.display());
        items.push(item);
    }

    let client = Arc::new(IsolateClient::connect(config)?);
    let summary = archive(client, &collect_items(items))
        .await
        .context("archive failed")?;

    tracing::info!(
        "{} items, {} uploaded, {} bytes",
        summary.candidates,
        summary.uploaded,
        summary.bytes_sent
    );
    Ok(())
}

/// Expand `path` into the regular files below it, sorted per directory.
///
/// Symlinks are followed; a directory reached twice is walked once.
async fn collect_files(path: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut visited = HashSet::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(path) = pending.pop() {
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_dir() {
            out.push(path);
            continue;
        }
        if !visited.insert(tokio::fs::canonicalize(&path).await?) {
            tracing::debug!(path = %path.display(), "Skipping directory already walked");
            continue;
        }

        let mut entries = tokio::fs::read_dir(&path).await?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            children.push(entry.path());
        }
        children.sort();
        // Reversed so the stack pops them in name order.
        pending.extend(children.into_iter().rev());
    }
    Ok(())
}

fn parse_files(files: &[String]) -> Result<Vec<(ContentId, PathBuf)>> {
    files
        .chunks(2)
        .map(|pair| match pair {
            [id, path] => {
                let id: ContentId = id
                    .parse()
                    .with_context(|| format!("invalid object id {id:?}"))?;
                Ok((id, PathBuf::from(path)))
            }
            _ => anyhow::bail!("--file takes an ID and a PATH"),
        })
        .collect()
}

async fn handle_download(target: &Path, files: &[String], store: &StoreArgs) -> Result<()> {
    let config = load_config(store)?;
    let files = parse_files(files)?;

    tokio::fs::create_dir_all(target)
        .await
        .with_context(|| format!("failed to create {}", target.display()))?;

    let client = Arc::new(IsolateClient::connect(config)?);
    let summary = download_all(client, Arc::new(FileSink::new(target)), files)
        .await
        .context("download failed")?;

    tracing::info!(
        "{} items, {} bytes",
        summary.completed.len(),
        summary.bytes_written
    );
    Ok(())
}
