#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tiller_router_lib::config::{load_from_path, Config};
use tiller_router_lib::discovery::{Instance, MemoryDiscovery};
use tiller_router_lib::error::Result;
use tiller_router_lib::server::ListenerOptions;
use tiller_router_lib::store::{MemoryStore, RouteStore};
use tiller_router_lib::tls::parse_keypair;
use tiller_router_lib::types::{route_id, Route};
use tiller_router_lib::HttpListener;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tiller edge router")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "tiller.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let mut cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Err(err) = cfg.apply_env() {
        error!(%err, "invalid environment override");
        std::process::exit(1);
    }

    if let Err(err) = run(cfg).await {
        error!(%err, "router exited with error");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let cookie_key = cfg.cookie_key()?;
    if cfg.cookie_key.is_none() {
        warn!("no cookie_key configured, sticky cookies use an all-zero key");
    }

    let fallback_keypair = match &cfg.tls {
        Some(tls) => {
            let cert = std::fs::read_to_string(&tls.cert_path)?;
            let key = std::fs::read_to_string(&tls.key_path)?;
            Some(parse_keypair(&cert, &key)?)
        }
        None => None,
    };

    let discovery = Arc::new(MemoryDiscovery::new());
    for service in &cfg.services {
        for addr in &service.addrs {
            discovery.register(&service.name, Instance::new(addr.clone()));
        }
    }

    let store = Arc::new(MemoryStore::new());
    for route_cfg in &cfg.routes {
        let mut route = Route::new(route_cfg.domain.clone(), route_cfg.service.clone());
        route.sticky = route_cfg.sticky;
        if let (Some(cert_path), Some(key_path)) =
            (&route_cfg.tls_cert_path, &route_cfg.tls_key_path)
        {
            route.tls_cert = std::fs::read_to_string(cert_path)?;
            route.tls_key = std::fs::read_to_string(key_path)?;
        }
        route.id = route_id(&route.domain);
        store.add(&route).await?;
    }

    let listener = HttpListener::new(
        ListenerOptions {
            http_addr: cfg.listen.http,
            tls_addr: cfg.listen.tls,
            cookie_key,
            fallback_keypair,
        },
        store,
        discovery,
    );
    listener.start().await?;
    info!(
        routes = cfg.routes.len(),
        services = cfg.services.len(),
        "router started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    listener.close();
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
