//! dht-peerkeeper - Main entry point
//!
//! Runs the throttled UDP front door of a DHT node with its peer store.

use anyhow::{Context, Result};
use dht_peerkeeper::{
    bootstrap, BootstrapConfig, CliArgs, Config, DatagramHandler, DhtError, DhtServer, HostThrottle,
    PeerStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        if let Some(location) = panic_info.location() {
            error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

/// Accepts datagrams on behalf of the RPC layer, which is not part of this binary.
struct LoggingHandler;

impl DatagramHandler for LoggingHandler {
    fn handle(&self, data: &[u8], from: SocketAddr, store: &PeerStore) {
        trace!(
            "Accepted {} bytes from {} ({} info hashes cached)",
            data.len(),
            from,
            store.info_hash_count()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("dht-peerkeeper starting");
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args);
    config.validate().context("Invalid configuration")?;
    display_config(&config);

    let store = Arc::new(
        PeerStore::new(config.max_info_hashes, config.max_info_hash_peers)
            .context("Failed to create peer store")?,
    );
    for (info_hash, port) in &config.local_downloads {
        store.add_local_download(*info_hash, *port);
        info!("Serving {} on port {}", info_hash, port);
    }
    let throttle = Arc::new(
        HostThrottle::spawn(config.max_per_minute, config.max_hosts)
            .context("Failed to create host throttle")?,
    );

    if config.bootstrap {
        let mut nodes: Vec<SocketAddr> = Vec::new();
        let added = bootstrap(&BootstrapConfig::default(), &mut nodes).await;
        if added == 0 {
            error!("No bootstrap node could be resolved");
        }
        for node in &nodes {
            info!("Bootstrap node: {}", node);
        }
    }

    let bind_addr: SocketAddr = config.listen_addr().parse().map_err(DhtError::from)?;
    let server = Arc::new(DhtServer::new(bind_addr, store.clone(), throttle.clone()).await?);

    let runner = server.clone();
    let server_task = tokio::spawn(async move { runner.run_loop(&LoggingHandler).await });

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutting down...");

    server.stop();
    match server_task.await {
        Ok(result) => result?,
        Err(e) => error!("DHT server task failed: {}", e),
    }
    throttle.stop().await;

    let stats = server.stats();
    info!(
        "Accepted {} datagrams, dropped {} from {} blocked hosts",
        stats.accepted,
        stats.dropped,
        throttle.blocked_hosts()
    );
    Ok(())
}

/// Initialize logging based on CLI arguments
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.verbose {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level: {:?}", level);
}

fn display_config(config: &Config) {
    if config.quiet {
        return;
    }
    println!("Configuration:");
    println!("  Listen address: {}", config.listen_addr());
    println!("  Max info hashes: {}", config.max_info_hashes);
    println!("  Max peers per info hash: {}", config.max_info_hash_peers);
    println!("  Max requests per minute: {}", config.max_per_minute);
    println!("  Max tracked hosts: {}", config.max_hosts);
    println!("  Bootstrap: {}", if config.bootstrap { "enabled" } else { "disabled" });
    println!();
}
