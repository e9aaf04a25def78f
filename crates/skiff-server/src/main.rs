use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use object_store::aws::AmazonS3Builder;
use skiff_broker::{BatcherConfig, BatcherKind, Broker, BrokerConfig, CompressionKind};
use skiff_server::{router, AppState};
use skiff_storage::{
    BackingStorage, Cache, CacheStorage, DiskCacheStorage, DiskStorage, MemoryCacheStorage,
    ObjectStorage,
};
use tracing_subscriber::EnvFilter;

/// Skiff: an append-only, topic-partitioned event broker.
#[derive(Debug, Parser)]
#[command(name = "skiff", version)]
struct Args {
    /// Address to serve HTTP on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Local directory for batch files. Ignored when --s3-bucket is set.
    #[arg(long, default_value = "data")]
    root_dir: PathBuf,

    /// S3 bucket for batch files; credentials and region come from the
    /// environment. When unset, batch files go to --root-dir.
    #[arg(long)]
    s3_bucket: Option<String>,

    /// Key prefix inside the S3 bucket.
    #[arg(long)]
    s3_prefix: Option<String>,

    /// API key required as `Authorization: Bearer <key>`. Unset disables the
    /// check.
    #[arg(long)]
    api_key: Option<String>,

    /// Directory for the batch cache. Unset keeps the cache in memory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Byte budget the cache is evicted down to.
    #[arg(long, default_value_t = 1024 * 1024 * 1024)]
    cache_max_bytes: u64,

    /// Seconds between cache eviction sweeps.
    #[arg(long, default_value_t = 30)]
    cache_eviction_interval_secs: u64,

    /// How long a batch window stays open after its first record, in
    /// milliseconds. Zero flushes every record on its own.
    #[arg(long, default_value_t = 10)]
    batch_wait_ms: u64,

    /// Create topics on first use instead of requiring an explicit create.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    auto_create_topics: bool,

    /// Gzip batch files on their way to the backing store.
    #[arg(long)]
    gzip: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let storage: Arc<dyn BackingStorage> = match &args.s3_bucket {
        Some(bucket) => {
            let s3 = AmazonS3Builder::from_env()
                .with_bucket_name(bucket.clone())
                .build()?;
            tracing::info!(bucket = %bucket, "using s3 backing storage");
            match &args.s3_prefix {
                Some(prefix) => Arc::new(ObjectStorage::with_key_prefix(Arc::new(s3), prefix)),
                None => Arc::new(ObjectStorage::new(Arc::new(s3))),
            }
        }
        None => {
            tracing::info!(root_dir = %args.root_dir.display(), "using local backing storage");
            Arc::new(DiskStorage::new(&args.root_dir))
        }
    };

    let cache_storage: Arc<dyn CacheStorage> = match &args.cache_dir {
        Some(dir) => Arc::new(DiskCacheStorage::new(dir)),
        None => Arc::new(MemoryCacheStorage::new()),
    };
    let cache = Arc::new(Cache::new(cache_storage).await?);

    let config = BrokerConfig {
        auto_create_topics: args.auto_create_topics,
        compression: if args.gzip {
            CompressionKind::Gzip
        } else {
            CompressionKind::None
        },
        batcher: if args.batch_wait_ms == 0 {
            BatcherKind::Null
        } else {
            BatcherKind::Window(BatcherConfig {
                max_wait: Duration::from_millis(args.batch_wait_ms),
                ..BatcherConfig::default()
            })
        },
        ..BrokerConfig::default()
    };

    let broker = Arc::new(Broker::new(storage, Arc::clone(&cache), config));

    // Keep the cache inside its byte budget.
    {
        let cache = Arc::clone(&cache);
        let max_bytes = args.cache_max_bytes;
        let mut ticker =
            tokio::time::interval(Duration::from_secs(args.cache_eviction_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if let Err(err) = cache.evict_least_recently_used(max_bytes).await {
                    tracing::error!(error = %err, "cache eviction sweep failed");
                }
            }
        });
    }

    let state = AppState {
        broker,
        api_key: args.api_key,
    };

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!(listen = %args.listen, "serving");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
