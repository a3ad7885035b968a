use axum::{
    Router,
    extract::Extension,
    routing::{delete, get, post},
};
use distributed_store::node::handlers::{handle_delete, handle_get, handle_peers, handle_store};
use distributed_store::node::{FileServer, FileServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

const HTTP_PORT_OFFSET: u16 = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--seed <addr:port>]... [--root <dir>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:3000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:4000 --seed 127.0.0.1:3000",
            args[0]
        );

        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut seed_nodes: Vec<String> = vec![];
    let mut root: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match (args[i].as_str(), args.get(i + 1)) {
            ("--bind", Some(value)) => {
                bind_addr = Some(value.parse()?);
                i += 2;
            }
            ("--seed", Some(value)) => {
                seed_nodes.push(value.clone());
                i += 2;
            }
            ("--root", Some(value)) => {
                root = Some(PathBuf::from(value));
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let Some(bind_addr) = bind_addr else {
        anyhow::bail!("--bind is required");
    };
    let storage_root = root.unwrap_or_else(|| PathBuf::from(format!("{}_network", bind_addr.port())));

    tracing::info!("Starting node on {}", bind_addr);
    if !seed_nodes.is_empty() {
        tracing::info!("Seed nodes: {:?}", seed_nodes);
    } else {
        tracing::info!("Starting without bootstrap peers");
    }

    // 1. File server (TCP transport + dispatch loop):
    let server = FileServer::new(FileServerConfig {
        listen_addr: bind_addr.to_string(),
        storage_root,
        bootstrap_nodes: seed_nodes,
        ..Default::default()
    });
    server.start().await?;

    // 2. Spawn stats reporter:
    let stats_server = server.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));

        loop {
            interval.tick().await;
            let peers = stats_server.registry().identities().await;
            tracing::info!("Cluster stats: {} connected peers", peers.len());
            for peer in peers {
                tracing::info!("  - {}", peer);
            }
        }
    });

    // 3. HTTP Router:
    let app = Router::new()
        .route("/store/:key", post(handle_store))
        .route("/get/:key", get(handle_get))
        .route("/delete/:key", delete(handle_delete))
        .route("/peers", get(handle_peers))
        .layer(Extension(server.clone()));

    // 4. Start HTTP server:
    let http_addr = http_addr_for(bind_addr)?;

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// The HTTP front-end listens 1000 ports above the p2p listener.
fn http_addr_for(bind_addr: SocketAddr) -> anyhow::Result<SocketAddr> {
    let Some(http_port) = bind_addr.port().checked_add(HTTP_PORT_OFFSET) else {
        anyhow::bail!(
            "No HTTP port above {}: bind port must be at most {}",
            bind_addr.port(),
            u16::MAX - HTTP_PORT_OFFSET
        );
    };
    Ok(SocketAddr::new(bind_addr.ip(), http_port))
}
