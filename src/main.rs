//! imthumb - an on-demand image thumbnailing server.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imthumb::{
    cache::ArtifactCache,
    config::{CheckConfig, Cli, Command, ServeConfig},
    server::create_router,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Check(config) => run_check(config).await,
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

    info!("imthumb v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Base directory: {}", config.base_dir.display());
    if config.cache_enabled {
        info!(
            "  Cache: {} (max age {}s)",
            config.cache_dir.display(),
            config.cache_max_age
        );
    } else {
        warn!("  Cache: DISABLED - every request renders from the source");
    }
    if config.allow_all_external {
        warn!("  Remote sources: any http(s) URL");
    } else if config.allow_external {
        info!("  Remote sources: {}", config.allowed_sites.join(", "));
    }
    if config.rate_limiter != "none" {
        info!(
            "  Rate limit: {} requests / {}s per client",
            config.rate_limit_requests, config.rate_limit_interval
        );
    }

    let service = match config.build_service() {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let router = create_router(service, config.render_defaults(), config.router_config());
    let addr = config.bind_address();

    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("    curl 'http://{}/?src=photo.jpg&w=200&h=200' -o thumb.jpg", addr);
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let app = router.into_make_service_with_connect_info::<std::net::SocketAddr>();
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "imthumb=debug,tower_http=debug"
    } else {
        "imthumb=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.serve.verbose {
        init_logging(true);
    }

    println!("imthumb Configuration Check");
    println!("═══════════════════════════");
    println!();

    if let Err(e) = config.serve.validate() {
        println!("✗ Configuration: {}", e);
        return ExitCode::FAILURE;
    }
    println!("✓ Configuration");

    let resolver = match config.serve.build_resolver() {
        Ok(resolver) => {
            println!("✓ Sources: {} rule(s)", resolver.rule_count());
            resolver
        }
        Err(e) => {
            println!("✗ Sources: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.serve.cache_config() {
        Some(cache_config) => {
            let cache = ArtifactCache::new(cache_config);
            match cache.ensure_directory_writable() {
                Ok(()) => println!("✓ Cache directory: {}", cache.directory().display()),
                Err(e) => {
                    println!("✗ Cache directory: {}", e);
                    return ExitCode::FAILURE;
                }
            }

            if config.sweep {
                match cache.sweep_expired() {
                    Ok(Some(removed)) => println!("✓ Sweep: removed {} entr(ies)", removed),
                    Ok(None) => println!("✓ Sweep: not due yet"),
                    Err(e) => {
                        println!("✗ Sweep: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            }
        }
        None => println!("- Cache: disabled"),
    }

    if let Some(ref src) = config.test_src {
        println!();
        print!("Resolving '{}'... ", src);

        match resolver.resolve(src).await {
            Ok((handler, meta)) => match meta.validate(src, config.serve.max_source_bytes) {
                Ok(()) => {
                    println!("✓ {} handler", handler.name());
                    println!("  Path: {}", meta.path.display());
                    println!("  Type: {}", meta.mime_type);
                    println!("  Size: {} bytes", meta.byte_size);
                }
                Err(e) => {
                    println!("✗ {}", e);
                    return ExitCode::FAILURE;
                }
            },
            Err(e) => {
                println!("✗ {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    println!();
    println!("═══════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}
