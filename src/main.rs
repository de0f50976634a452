//! image-edge - Adaptive image delivery.
//!
//! This binary runs the transcoding server, the edge proxy, or resolves
//! transcode URLs from the command line.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use image_edge::{
    config::{Cli, Command, EdgeConfig, ResolveConfig, ServeConfig},
    edge::{
        spawn_control_loop, CacheStorage, DiskCacheStorage, EdgeCacheManager, HttpUpstream,
        MemoryCacheStorage,
    },
    hints::{AcceptHeaderProbe, ClientHintResolver, FormatCapabilityProbe},
    server::{create_edge_router, create_router, EdgeState, RouterConfig},
    transcode::TranscodeService,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Edge(config) => run_edge(config).await,
        Command::Resolve(config) => run_resolve(config),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("image-edge transcoder v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Asset root: {}", config.asset_root.display());
    info!("  Endpoint: {}", config.endpoint);
    match &config.cors_origins {
        Some(origins) => info!("  CORS origins: {}", origins.join(", ")),
        None => info!("  CORS origins: any"),
    }

    if !config.asset_root.is_dir() {
        warn!(
            "  Asset root {} is not a directory; every request will 404",
            config.asset_root.display()
        );
    }

    let service = TranscodeService::new(config.asset_root.clone());
    let router = create_router(service, build_router_config(&config));

    let addr = config.bind_address();
    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("  Try:");
    info!("    curl -o out.webp 'http://{}{}?url=/hero.png&w=640&f=webp'", addr, config.endpoint);
    info!("");

    serve(&addr, router).await
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_endpoint(config.endpoint.clone())
        .with_preflight_max_age(config.preflight_max_age)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Edge Command
// =============================================================================

async fn run_edge(config: EdgeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let origin = match config.upstream_url() {
        Ok(url) => url,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let cache_config = config.to_cache_config();

    info!("image-edge proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Upstream: {}", origin);
    info!(
        "  Cache: {} (version {}), {}MB ceiling, {:?} eviction",
        config
            .cache_dir
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "memory".to_string()),
        cache_config.version,
        cache_config.max_size / (1024 * 1024),
        cache_config.eviction_policy
    );

    let storage: Arc<dyn CacheStorage> = match &config.cache_dir {
        Some(dir) => match DiskCacheStorage::new(dir.clone()).await {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                error!("Failed to open cache directory {}: {}", dir.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => Arc::new(MemoryCacheStorage::new()),
    };

    let upstream = match HttpUpstream::new() {
        Ok(upstream) => Arc::new(upstream),
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let manager = match EdgeCacheManager::install(cache_config, origin, storage, upstream).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to install edge cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match manager.activate().await {
        Ok(deleted) if !deleted.is_empty() => {
            info!("  Deleted stale stores: {}", deleted.join(", "));
        }
        Ok(_) => {}
        Err(e) => {
            error!("Failed to activate edge cache: {}", e);
            return ExitCode::FAILURE;
        }
    }
    manager.update_network(config.network_info());

    let (control, _control_task) = spawn_control_loop(manager.clone());
    let router = create_edge_router(EdgeState::new(manager, control), !config.no_tracing);

    let addr = config.bind_address();
    info!("");
    info!("  Edge listening on: http://{}", addr);
    info!("  Try:");
    info!("    curl http://{}/__edge/health", addr);
    info!(
        "    curl -X POST -H 'content-type: application/json' -d '{{\"type\":\"GET_CACHE_STATS\"}}' http://{}/__edge/control",
        addr
    );
    info!("");

    serve(&addr, router).await
}

// =============================================================================
// Resolve Command
// =============================================================================

fn run_resolve(config: ResolveConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match &config.accept {
        Some(accept) => print_resolved(
            &config,
            ClientHintResolver::with_probe(
                config.endpoint.clone(),
                config.hints(),
                AcceptHeaderProbe::new(accept.clone()),
            ),
        ),
        None => print_resolved(
            &config,
            ClientHintResolver::new(config.endpoint.clone(), config.hints()),
        ),
    }

    ExitCode::SUCCESS
}

fn print_resolved<P: FormatCapabilityProbe>(config: &ResolveConfig, resolver: ClientHintResolver<P>) {
    println!(
        "{}",
        resolver.resolve_with_quality(&config.source, config.width, config.quality)
    );

    if let Some(ref widths) = config.widths {
        println!(
            "srcset: {}",
            resolver.build_candidate_set(&config.source, widths, config.quality)
        );
    }

    if let Some(priority) = config.preload {
        let hint = resolver.preload(&config.source, config.width, config.quality, priority);
        println!("Link: {}", hint.to_link_header());
    }
}

// =============================================================================
// Shared
// =============================================================================

async fn serve(addr: &str, router: axum::Router) -> ExitCode {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "image_edge=debug,tower_http=debug"
    } else {
        "image_edge=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
