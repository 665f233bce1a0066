//! Tenant Bridge - serve tenant-aware APIs backed by Kubernetes

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tenant_bridge::config::BridgeConfig;
use tenant_bridge::middleware::TenantLayer;
use tenant_bridge::resolver::{GroupKind, ResourceResolver};
use tenant_bridge::schema::{KubeCrdClient, SchemaRegistry};
use tenant_bridge::server::router;
use tenant_bridge::tenant::cache::{CacheSettings, DEFAULT_MAX_TENANTS};
use tenant_bridge::tenant::watch::DEFAULT_QUEUE_CAPACITY;
use tenant_bridge::tenant::{
    DsnSessionFactory, KubeConfigSource, TenantBuilder, TenantCache, TenantNaming,
    WatchAggregator, CONFIG_NAME_SUFFIX, DEFAULT_CONFIG_NAMESPACE, SETTINGS_KEY,
};
use tenant_bridge::DEFAULT_API_PREFIX;

/// Tenant Bridge - CRD registration, resource resolution and tenant contexts
#[derive(Parser, Debug)]
#[command(name = "tenant-bridge", version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, env = "TENANT_BRIDGE_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register schemas and serve tenant-aware HTTP APIs
    Serve(ServeArgs),

    /// Resolve a group/kind through discovery and print its mapping
    Resolve(ResolveArgs),
}

/// Serve mode arguments
#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind the HTTP server
    #[arg(long, env = "TENANT_BRIDGE_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Namespace holding tenant ConfigMaps
    #[arg(long, env = "TENANT_BRIDGE_CONFIG_NAMESPACE", default_value = DEFAULT_CONFIG_NAMESPACE)]
    config_namespace: String,

    /// Suffix appended to the tenant id to name its ConfigMap
    #[arg(long, env = "TENANT_BRIDGE_CONFIG_SUFFIX", default_value = CONFIG_NAME_SUFFIX)]
    config_suffix: String,

    /// ConfigMap key holding the settings document
    #[arg(long, env = "TENANT_BRIDGE_SETTINGS_KEY", default_value = SETTINGS_KEY)]
    settings_key: String,

    /// Path prefix whose requests receive a tenant context
    #[arg(long, env = "TENANT_BRIDGE_API_PREFIX", default_value = DEFAULT_API_PREFIX)]
    api_prefix: String,

    /// Maximum number of cached tenant contexts
    #[arg(long, env = "TENANT_BRIDGE_CACHE_CAPACITY", default_value_t = DEFAULT_MAX_TENANTS)]
    cache_capacity: u64,

    /// Seconds a cached tenant context lives
    #[arg(long, env = "TENANT_BRIDGE_CACHE_TTL_SECS", default_value_t = 3600)]
    cache_ttl_secs: u64,

    /// Capacity of the shared ConfigMap event queue
    #[arg(long, env = "TENANT_BRIDGE_WATCH_QUEUE", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    watch_queue: usize,

    /// CRD manifest files to register at startup (repeatable)
    #[arg(short = 'f', long = "schema", env = "TENANT_BRIDGE_SCHEMAS", value_delimiter = ',')]
    schemas: Vec<PathBuf>,
}

impl From<ServeArgs> for BridgeConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen_addr: args.listen,
            api_prefix: args.api_prefix,
            naming: TenantNaming {
                namespace: args.config_namespace,
                suffix: args.config_suffix,
                settings_key: args.settings_key,
            },
            cache: CacheSettings {
                max_tenants: args.cache_capacity,
                time_to_live: Duration::from_secs(args.cache_ttl_secs),
            },
            watch_queue_capacity: args.watch_queue,
            schema_files: args.schemas,
        }
    }
}

/// Resolve mode arguments
#[derive(Args, Debug)]
struct ResolveArgs {
    /// API group ("" for core)
    #[arg(long, default_value = "")]
    group: String,

    /// Kind to resolve
    #[arg(long)]
    kind: String,

    /// Namespace for namespaced kinds
    #[arg(long, short = 'n', default_value = "")]
    namespace: String,

    /// Acceptable versions in preference order (repeatable)
    #[arg(long = "version")]
    versions: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if cli.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args.into()).await,
        Commands::Resolve(args) => run_resolve(args).await,
    }
}

/// Register schemas, start the watch aggregator and serve until Ctrl-C
async fn run_serve(config: BridgeConfig) -> anyhow::Result<()> {
    config.validate()?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let schemas = config.load_schemas().await?;
    let registry = SchemaRegistry::new(Arc::new(KubeCrdClient::new(client.clone())));
    let registered = registry.register_all(&schemas).await?;
    info!(registered, total = schemas.len(), "schemas registered");

    let source = Arc::new(KubeConfigSource::new(client));
    let (mut aggregator, watch) = WatchAggregator::new(
        source.clone(),
        config.naming.clone(),
        config.watch_queue_capacity,
    );
    let builder = TenantBuilder::new(source, Arc::new(DsnSessionFactory), config.naming.clone());
    let cache = TenantCache::new(builder, config.cache, Some(watch));
    aggregator.attach(cache.clone());

    let shutdown = CancellationToken::new();
    let watch_task = tokio::spawn(aggregator.run(shutdown.clone()));

    let app = router(TenantLayer::new(cache, config.api_prefix.as_str()));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", config.listen_addr, e))?;
    info!(addr = %config.listen_addr, "serving");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    watch_task.await?;
    Ok(())
}

/// Resolve a kind against the live cluster and print its mapping
async fn run_resolve(args: ResolveArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let resolver = ResourceResolver::new(client);
    let versions: Vec<&str> = args.versions.iter().map(String::as_str).collect();
    let handle = resolver
        .resolve(&GroupKind::new(args.group, args.kind), &args.namespace, &versions)
        .await?;

    let resource = handle.resource();
    println!(
        "{}\t{}\t{:?}\t{}",
        resource.api_version,
        resource.plural,
        handle.scope(),
        handle.namespace().unwrap_or("<cluster>")
    );
    Ok(())
}
