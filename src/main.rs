use crate::config::Args;
use crate::reconciler::Reconciler;
use crate::runtime::DockerRuntime;
use crate::state::AppState;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
#[cfg(test)]
mod fake_runtime;
mod image_reference;
mod locks;
mod notification;
mod reconciler;
mod routing;
mod runtime;
mod state;
mod webserver;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    info!("Starting registry-deployer {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = args.load_config()?;

    let docker = DockerRuntime::connect().await?;

    info!("Resolving routing network {}", args.network);
    let candidates = docker
        .find_networks(&args.network)
        .await
        .context("Failed to list networks")?;
    let network = routing::select_network(&args.network, candidates)
        .context("Failed to resolve routing network")?;
    info!("Attaching deployed containers to network {}", network);

    let reconciler = Reconciler::new(Arc::new(docker), config.routing, network, &config.deploy);
    let state = AppState {
        reconciler: Arc::new(reconciler),
    };

    let app = webserver::create_app(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Webserver stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = wait_for_signal("Ctrl-C", tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = wait_for_signal("SIGTERM", async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?
            .recv()
            .await;
        Ok::<(), std::io::Error>(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Resolves when the signal arrives; never resolves if the handler could not be installed.
async fn wait_for_signal<F>(name: &str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!("Failed to listen for {}: {}", name, e);
        std::future::pending::<()>().await
    }
}
