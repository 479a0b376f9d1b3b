//! Node startup and lifecycle

use crate::routes;
use anyhow::Context;
use elastore_core::StorageService;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Bind address of the diagnostics server
pub fn http_bind_addr(service: &StorageService) -> String {
    let config = service.config();
    format!("{}:{}", config.listen_address, config.port_http_server)
}

/// Start the storage service, serve diagnostics until `shutdown_signal`
/// resolves, then stop the service.
pub async fn run_node(
    service: StorageService,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    service
        .start()
        .await
        .into_result()
        .context("starting storage service")?;

    let addr = http_bind_addr(&service);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding diagnostics server to {addr}"))?;
    info!("Diagnostics server listening on http://{}", addr);

    let app = routes::create_router(service.clone());
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await;

    let stopped = service.stop().await;
    if !stopped.ok() {
        warn!(status = %stopped, "Storage service did not stop cleanly");
    }
    served.context("diagnostics server failed")?;
    stopped.into_result().context("stopping storage service")?;

    info!("Node shutdown complete");
    Ok(())
}
