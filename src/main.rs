#![warn(
    rust_2024_compatibility,
    clippy::all,
    clippy::future_not_send,
    clippy::mod_module_files,
    clippy::needless_pass_by_ref_mut,
    clippy::unused_async
)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lode::config::{CacheBackendKind, Config};
use lode::content::{ContentSource, OriginContentSource};
use lode::gateway::LodeGateway;
use lode_adapter::{CacheStore, DiskStore, MemoryStore};
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};
use rama::{
    Layer as RamaLayer,
    graceful::Shutdown,
    http::{layer::trace::TraceLayer, server::HttpServer},
    layer::ConsumeErrLayer,
    rt::Executor,
    tcp::server::TcpListener,
};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Lode package CDN edge gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the Lode gateway server
    Serve {
        /// Path to the configuration file
        #[arg(long, default_value = "lode.toml")]
        config: PathBuf,
    },
    /// Display response cache statistics
    Stats {
        /// Path to the configuration file
        #[arg(long, default_value = "lode.toml")]
        config: PathBuf,
    },
    /// Cache maintenance operations
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    /// Perform a health check against a Lode instance
    Health {
        /// URL of the main page (defaults to local gateway)
        #[arg(long, default_value = "http://127.0.0.1:8123/")]
        url: String,
        /// Timeout in seconds for the request
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    /// Drop expired entries from the on-disk response cache
    Purge {
        /// Path to the configuration file
        #[arg(long, default_value = "lode.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => run_server(config),
        Command::Stats { config } => run_stats(config),
        Command::Cache { action } => match action {
            CacheCommand::Purge { config } => run_cache_purge(config),
        },
        Command::Health { url, timeout } => run_health(url, timeout),
    }
}

fn run_server(config_path: PathBuf) -> Result<()> {
    let config = Arc::new(Config::load(Some(config_path)).context("loading configuration")?);
    config.validate().context("validating configuration")?;
    init_tracing(&config)?;

    if config.edge.is_deployed() {
        tracing::info!(
            service_version = config.edge.service_version.as_deref().unwrap_or(""),
            pop = config.edge.pop.as_deref().unwrap_or("local"),
            ttl_secs = config.cache.ttl_secs,
            "response caching active"
        );
    } else {
        tracing::info!("no service version configured - response caching disabled (local mode)");
    }

    let store = open_store(&config).context("opening response cache store")?;
    let content: Arc<dyn ContentSource> =
        Arc::new(OriginContentSource::new(config.clone()).context("creating content source")?);
    let gateway = LodeGateway::new(config.clone(), store, content);

    let rt_server = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .enable_all()
        .build()
        .context("constructing server runtime")?;

    rt_server.block_on(async move {
        let graceful = Shutdown::default();
        let addr = format!("{}:{}", config.server.host, config.server.port);

        tracing::info!(%addr, "starting Rama HTTP server");

        graceful.spawn_task_fn(move |guard| {
            let gateway = gateway.clone();
            let addr = addr.clone();
            async move {
                let tcp_service = TcpListener::build()
                    .bind(addr)
                    .await
                    .expect("bind tcp gateway");

                let exec = Executor::graceful(guard.clone());
                let http_service = HttpServer::auto(exec).service(
                    (TraceLayer::new_for_http(), ConsumeErrLayer::default()).into_layer(gateway),
                );

                tcp_service.serve_graceful(guard, http_service).await;
            }
        });

        // Wait for ctrl+c to initiate graceful shutdown
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for shutdown signal");

        graceful
            .shutdown_with_limit(Duration::from_secs(30))
            .await?;

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<dyn CacheStore>> {
    Ok(match config.cache.backend {
        CacheBackendKind::Memory => Arc::new(MemoryStore::new()),
        CacheBackendKind::Disk => Arc::new(DiskStore::open(&config.cache.path)?),
    })
}

fn run_stats(config_path: PathBuf) -> Result<()> {
    let config = Arc::new(Config::load(Some(config_path)).context("loading configuration")?);
    init_tracing(&config)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("constructing stats runtime")?;

    let store = open_store(&config).context("opening response cache store")?;
    let stats = rt
        .block_on(store.stats())
        .context("collecting cache stats")?;

    match config.cache.backend {
        CacheBackendKind::Memory => println!("Memory cache (empty outside a running server)"),
        CacheBackendKind::Disk => println!("Disk cache: {}", config.cache.path.display()),
    }
    println!("  total entries: {}", stats.total_entries);
    println!("  live entries: {}", stats.live_entries);
    println!("  expired entries: {}", stats.expired_entries);

    Ok(())
}

fn run_cache_purge(config_path: PathBuf) -> Result<()> {
    let config = Arc::new(Config::load(Some(config_path)).context("loading configuration")?);
    init_tracing(&config)?;

    match config.cache.backend {
        CacheBackendKind::Memory => {
            println!("Memory cache expires in place; nothing to purge.");
        }
        CacheBackendKind::Disk => {
            let store =
                DiskStore::open(&config.cache.path).context("opening response cache store")?;
            let purged = store.purge_expired().context("purging expired entries")?;
            println!(
                "Purged {purged} expired entr{} from {}",
                if purged == 1 { "y" } else { "ies" },
                config.cache.path.display()
            );
        }
    }

    Ok(())
}

fn run_health(url: String, timeout: u64) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
        .context("building health check client")?;

    let response = client
        .get(&url)
        .send()
        .context("sending health check request")?;

    if response.status().is_success() {
        println!("Lode healthy: {}", response.status());
        Ok(())
    } else {
        bail!("health endpoint returned status {}", response.status());
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("building log filter")?;

    let fmt_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        use opentelemetry_otlp::WithExportConfig;

        let resource = Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", "lode"),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])
            .build();

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?;

        let provider = sdktrace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build();

        let tracer = provider.tracer("lode");
        global::set_tracer_provider(provider);

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        registry.try_init()?;
    }
    Ok(())
}
