//! SaleCache CLI - Command line interface for the encrypted sales cache.
//!
//! This tool syncs the local cache against the remote delta feeds and
//! inspects what it holds.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

use salecache_app::{CacheManager, Party};
use salecache_common::{CollectionName, SensitiveBytes};
use salecache_storage::{create_default_registry, BlobStore};
use salecache_sync::{CacheConfig, FeedEndpoint, SyncMode, SyncReport};

/// Session secret used to derive the cache key.
const SECRET_ENV: &str = "SALECACHE_SESSION_SECRET";
/// Bearer token sent to the feed.
const TOKEN_ENV: &str = "SALECACHE_FEED_TOKEN";

#[derive(Parser)]
#[command(name = "salecache")]
#[command(about = "SaleCache - Encrypted offline cache of sales, buyers and producers")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON file with cache settings.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the encrypted cache.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Base URL of the sync API.
    #[arg(short, long, global = true, default_value = "http://localhost:3000/api")]
    server: Url,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch changes from the server.
    Sync {
        /// Download every collection from scratch.
        #[arg(short, long)]
        full: bool,

        /// Only sync this collection.
        #[arg(long)]
        collection: Option<CollectionName>,
    },

    /// Show record counts and sync state.
    Status,

    /// List the cached records of a collection.
    List {
        /// sales, buyers or producers.
        collection: CollectionName,

        /// Only buyers or producers matching this text.
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Print one cached record as JSON.
    Show {
        /// sales, buyers or producers.
        collection: CollectionName,

        /// Record id.
        id: String,
    },

    /// Delete the local cache.
    Clear {
        /// Only clear this collection.
        #[arg(long)]
        collection: Option<CollectionName>,
    },

    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let builder = FmtSubscriber::builder().with_target(false).compact();
    match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())?
        }
        Err(_) => tracing::subscriber::set_global_default(builder.with_max_level(level).finish())?,
    }

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "salecache", &mut std::io::stdout());
        return Ok(());
    }

    let cache = open_cache(&cli).await?;

    let outcome = match cli.command {
        Commands::Sync { full, collection } => cmd_sync(&cache, full, collection).await,
        Commands::Status => cmd_status(&cache),
        Commands::List { collection, search } => cmd_list(&cache, collection, search.as_deref()),
        Commands::Show { collection, id } => cmd_show(&cache, collection, &id),
        Commands::Clear { collection } => cmd_clear(&cache, collection).await,
        Commands::Completions { .. } => Ok(()),
    };

    cache.end_session().await.context("Failed to close the cache")?;
    outcome
}

/// Read the session secret from the environment, or prompt for it.
fn session_secret() -> Result<SensitiveBytes> {
    let secret = match std::env::var(SECRET_ENV) {
        Ok(secret) => secret,
        Err(_) => rpassword::prompt_password("Session secret: ")
            .context("Failed to read session secret")?,
    };
    if secret.is_empty() {
        anyhow::bail!("Session secret cannot be empty");
    }
    Ok(SensitiveBytes::from(secret))
}

fn default_cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("No cache directory on this platform, use --cache-dir")?;
    Ok(base.join("salecache"))
}

fn open_store(dir: &Path) -> Result<Arc<dyn BlobStore>> {
    let registry = create_default_registry()?;
    let store_config = serde_json::json!({
        "root": dir.to_string_lossy()
    });
    registry
        .resolve("local", store_config)
        .with_context(|| format!("Failed to open cache directory {}", dir.display()))
}

/// Build the manager and open a session on it.
async fn open_cache(cli: &Cli) -> Result<CacheManager> {
    let config = match &cli.config {
        Some(path) => CacheConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CacheConfig::default(),
    };

    let dir = match &cli.cache_dir {
        Some(dir) => dir.clone(),
        None => default_cache_dir()?,
    };
    let backend = open_store(&dir)?;

    let mut endpoint = FeedEndpoint::new(cli.server.as_str());
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        endpoint = endpoint.with_bearer_token(token);
    }

    let cache = CacheManager::with_http(backend, &endpoint, config)
        .context("Failed to set up the cache")?;

    let report = cache
        .begin_session(session_secret()?)
        .await
        .context("Failed to open the cache")?;
    for collection in report.reset_collections() {
        warn!("Cached {} could not be read and was discarded", collection);
    }
    info!("Cache at {}", dir.display());

    Ok(cache)
}

fn print_report(report: &SyncReport) {
    println!(
        "  {:<10} {} page(s), {} upserted, {} deleted, {} dropped{}",
        report.collection.as_str(),
        report.pages,
        report.upserts,
        report.deletes,
        report.dropped,
        if report.coalesced { " (joined running sync)" } else { "" }
    );
}

/// Sync one or every collection.
async fn cmd_sync(
    cache: &CacheManager,
    full: bool,
    collection: Option<CollectionName>,
) -> Result<()> {
    let mode = if full { SyncMode::Full } else { SyncMode::Incremental };

    if let Some(collection) = collection {
        let report = cache
            .request_sync(collection, mode)
            .await
            .with_context(|| format!("Failed to sync {}", collection))?;
        println!("Sync complete:");
        print_report(&report);
        return Ok(());
    }

    let mut failed = Vec::new();
    println!("Sync results:");
    for (collection, result) in cache.sync_all(mode).await {
        match result {
            Ok(report) => print_report(&report),
            Err(e) => {
                println!("  {:<10} failed: {}", collection.as_str(), e);
                failed.push(collection.as_str());
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("Sync failed for {}", failed.join(", "));
    }
    Ok(())
}

/// Show every collection's state.
fn cmd_status(cache: &CacheManager) -> Result<()> {
    println!("Cache status:");
    for status in cache.status() {
        let synced = status
            .cursor
            .last_synced_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<10} {:>6} records, last synced {}",
            status.collection.as_str(),
            status.records,
            synced
        );
        if let Some(error) = &status.cursor.last_error {
            println!("             last error: {}", error);
        }
    }
    Ok(())
}

fn print_parties<P: Party>(parties: Vec<P>) {
    for party in parties {
        println!(
            "  {:<8} {:<40} {}",
            party.code(),
            party.company_name(),
            party.vat_number()
        );
    }
}

/// List a collection.
fn cmd_list(cache: &CacheManager, collection: CollectionName, search: Option<&str>) -> Result<()> {
    match collection {
        CollectionName::Sales => {
            if search.is_some() {
                anyhow::bail!("--search applies to buyers and producers");
            }
            let sales = cache.sales().list();
            if sales.is_empty() {
                println!("No cached sales.");
            }
            for sale in sales {
                println!(
                    "  {} #{:<6} {:<30} {:>12.2} {} {:?}",
                    sale.sale_date,
                    sale.sale_number,
                    sale.buyer_name,
                    sale.total,
                    sale.currency,
                    sale.status
                );
            }
        }
        CollectionName::Buyers => print_parties(match search {
            Some(query) => cache.buyers().search(query),
            None => cache.buyers().list(),
        }),
        CollectionName::Producers => print_parties(match search {
            Some(query) => cache.producers().search(query),
            None => cache.producers().list(),
        }),
    }
    Ok(())
}

/// Print one record.
fn cmd_show(cache: &CacheManager, collection: CollectionName, id: &str) -> Result<()> {
    let record = match collection {
        CollectionName::Sales => cache.sales().get(id).map(|r| serde_json::to_string_pretty(&r)),
        CollectionName::Buyers => cache.buyers().get(id).map(|r| serde_json::to_string_pretty(&r)),
        CollectionName::Producers => {
            cache.producers().get(id).map(|r| serde_json::to_string_pretty(&r))
        }
    };

    match record {
        Some(json) => {
            println!("{}", json.context("Failed to format record")?);
            Ok(())
        }
        None => anyhow::bail!("No cached {} record with id {}", collection, id),
    }
}

/// Clear the local cache.
async fn cmd_clear(cache: &CacheManager, collection: Option<CollectionName>) -> Result<()> {
    cache.clear(collection).await.context("Failed to clear cache")?;
    match collection {
        Some(collection) => println!("Cleared cached {}.", collection),
        None => println!("Cleared the local cache."),
    }
    Ok(())
}
