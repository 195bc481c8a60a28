//! Plugin process entry points.
//!
//! A plugin binary binds its listener, announces the address on stdout in
//! the plugin-manager handshake format, and serves until the host calls
//! `Stop` and disconnects, or the process receives Ctrl-C / SIGTERM.

use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::transport::server::Router;
use tonic_health::ServingStatus;
use tracing::{info, warn};

use crate::contracts::{Controller, Datasource};
use crate::controller::GrpcControllerServer;
use crate::datasource::GrpcDatasourceServer;
use laniakea_config::LaniakeaConfig;
use laniakea_core::{HandshakeConfig, Result};
use laniakea_proto::{CONTROLLER_SERVICE, DATASOURCE_SERVICE};

/// Serve `logic` as a Datasource plugin until shutdown.
pub async fn serve_datasource<T: Datasource>(logic: T, config: &LaniakeaConfig) -> Result<()> {
    let listener = bind(config).await?;
    let bridge = Arc::new(GrpcDatasourceServer::new(logic).configured(config));
    info!(service = DATASOURCE_SERVICE, plugin = %config.plugin.name, "serving datasource");

    let router = base_router()
        .await
        .add_service(Arc::clone(&bridge).into_service(config.stream.max_message_bytes));
    let stopper = Arc::clone(&bridge);
    run(listener, router, shutdown_signal(), async move {
        if let Err(e) = stopper.shutdown().await {
            warn!(error = %e, "datasource did not stop cleanly");
        }
    })
    .await
}

/// Serve `logic` as a Controller plugin until shutdown.
pub async fn serve_controller<T: Controller>(logic: T, config: &LaniakeaConfig) -> Result<()> {
    let listener = bind(config).await?;
    let bridge = Arc::new(GrpcControllerServer::new(logic).configured(config));
    info!(service = CONTROLLER_SERVICE, plugin = %config.plugin.name, "serving controller");

    let router = base_router()
        .await
        .add_service(Arc::clone(&bridge).into_service(config.stream.max_message_bytes));
    let stopper = Arc::clone(&bridge);
    run(listener, router, shutdown_signal(), async move {
        if let Err(e) = stopper.shutdown().await {
            warn!(error = %e, "controller did not stop cleanly");
        }
    })
    .await
}

/// Name under which the gRPC health service reports the plugin.
pub const HEALTH_SERVICE_NAME: &str = "plugin";

/// A router already carrying the standard health service, with
/// [`HEALTH_SERVICE_NAME`] marked as serving.
async fn base_router() -> Router {
    let (mut reporter, health) = tonic_health::server::health_reporter();
    reporter
        .set_service_status(HEALTH_SERVICE_NAME, ServingStatus::Serving)
        .await;
    Server::builder().add_service(health)
}

async fn bind(config: &LaniakeaConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind(&config.server.listen).await?;
    announce(listener.local_addr()?)?;
    Ok(listener)
}

/// Print the handshake line the plugin manager waits for.
fn announce(addr: SocketAddr) -> Result<()> {
    let line = HandshakeConfig::LANIAKEA.announce(addr);
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    info!(%addr, "listening");
    Ok(())
}

/// Serve `router` on `listener` until `signal` resolves. The plugin logic is
/// stopped through `on_shutdown` before the server drains its connections,
/// so endless streams do not hold the shutdown up.
pub(crate) async fn run<F, S>(
    listener: TcpListener,
    router: Router,
    signal: F,
    on_shutdown: S,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
    S: Future<Output = ()> + Send,
{
    let incoming = TcpListenerStream::new(listener);
    router
        .serve_with_incoming_shutdown(incoming, async move {
            signal.await;
            info!("shutting down");
            on_shutdown.await;
        })
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
