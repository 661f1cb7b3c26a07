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

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
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

use m2proxy::config::{self, Config};
use m2proxy::proxy::MavenProxyService;
use m2proxy::proxy_env::ProxySelector;
use m2proxy::resolver::{self, OverrideSource, RepositoryTable};
use m2proxy::settings::MavenSettings;
use m2proxy::upstream::UpstreamClient;
use m2proxy_adapter::LocalArtifactCache;

#[derive(Debug, Parser)]
#[command(author, version, about = "Caching reverse proxy for Maven repositories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Path to the configuration file
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// YAML file with `mavenRepositories` overrides
    #[arg(long)]
    proxy_config: Option<PathBuf>,
    /// Maven settings.xml to read repositories, mirrors and credentials from
    #[arg(long)]
    maven_settings: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the proxy server
    Serve {
        #[command(flatten)]
        sources: SourceArgs,
        /// Local repository consulted before going upstream
        #[arg(long)]
        local_repository: Option<PathBuf>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the resolved repository mappings
    Repositories {
        #[command(flatten)]
        sources: SourceArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            sources,
            local_repository,
            host,
            port,
        } => {
            let mut config = load_config(sources)?;
            if let Some(path) = local_repository {
                config.maven.local_repository = Some(path);
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config)
        }
        Command::Repositories { sources } => run_repositories(load_config(sources)?),
    }
}

fn load_config(sources: SourceArgs) -> Result<Config> {
    let mut config = Config::load(Some(sources.config)).context("loading configuration")?;
    if let Some(path) = sources.proxy_config {
        config.maven.proxy_config = Some(path);
    }
    if let Some(path) = sources.maven_settings {
        config.maven.settings = Some(path);
    }
    Ok(config)
}

fn resolve_repositories(config: &Config) -> Result<RepositoryTable> {
    let settings = match config.maven.settings_path() {
        Some(path) => MavenSettings::load(&path)?,
        None => None,
    };
    let overrides = config
        .maven
        .proxy_config
        .as_deref()
        .map(OverrideSource::load)
        .transpose()?;

    resolver::resolve(settings.as_ref(), overrides.as_ref()).context("resolving repositories")
}

fn open_local_repository(config: &Config) -> Result<Option<LocalArtifactCache>> {
    let Some(path) = config.maven.local_repository_path() else {
        tracing::warn!("no home directory; local repository disabled");
        return Ok(None);
    };

    if !path.is_dir() && !config.maven.local_repository_is_explicit() {
        tracing::warn!(path = %path.display(), "local repository not found; serving from upstream only");
        return Ok(None);
    }

    let cache = LocalArtifactCache::new(path.clone())
        .with_context(|| format!("opening local repository {}", path.display()))?;
    tracing::info!(path = %path.display(), "using local repository");
    Ok(Some(cache))
}

fn run_repositories(config: Config) -> Result<()> {
    config.validate().context("validating configuration")?;
    init_tracing(&config)?;
    config.source.log();

    let table = resolve_repositories(&config)?;
    print!("{}", table.listing());
    Ok(())
}

fn run_server(config: Config) -> Result<()> {
    config.validate().context("validating configuration")?;
    init_tracing(&config)?;
    config.source.log();

    let selector = Arc::new(ProxySelector::from_env().context("reading proxy environment")?);
    let table = resolve_repositories(&config)?;
    let local = open_local_repository(&config)?;
    let client =
        UpstreamClient::new(selector, &config.upstream).context("building upstream client")?;
    let proxy = MavenProxyService::new(table, local, client, config.upstream.negative_cache_ttl());

    let rt_server = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()
        .context("constructing server runtime")?;

    rt_server.block_on(async move {
        let graceful = Shutdown::default();
        let addr = config.server.bind_address();

        let tcp_service = TcpListener::build()
            .bind(addr.clone())
            .await
            .map_err(|err| anyhow!("binding {addr}: {err}"))?;

        tracing::info!(%addr, "starting Rama HTTP server");

        graceful.spawn_task_fn(move |guard| async move {
            let exec = Executor::graceful(guard.clone());
            let http_service = HttpServer::auto(exec).service(
                (TraceLayer::new_for_http(), ConsumeErrLayer::default()).into_layer(proxy),
            );

            tcp_service.serve_graceful(guard, http_service).await;
        });

        // Wait for ctrl+c to initiate graceful shutdown
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;

        graceful
            .shutdown_with_limit(Duration::from_secs(30))
            .await?;

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
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
                KeyValue::new("service.name", "m2proxy"),
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

        let tracer = provider.tracer("m2proxy");
        global::set_tracer_provider(provider);

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        registry.try_init()?;
    }
    Ok(())
}
