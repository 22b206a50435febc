//! Webhook receiver for Trivy Operator.

use crate::cancel::cancellation;
use crate::dependencytrack::TrackingClient;
use crate::error::Error;
use crate::uploader::{RunOutcome, Uploader};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub fn router<C>(uploader: Arc<Uploader<C>>) -> Router
where
    C: TrackingClient + ?Sized + 'static,
{
    Router::new()
        .route("/", post(receive::<C>))
        .route("/healthz", get(healthz))
        .with_state(uploader)
}

/// Serves webhooks on `listen` until Ctrl-C or SIGTERM.
pub async fn serve<C>(uploader: Arc<Uploader<C>>, listen: SocketAddr) -> std::io::Result<()>
where
    C: TrackingClient + ?Sized + 'static,
{
    let listener = TcpListener::bind(listen).await?;
    info!(%listen, "Listening for SBOM report webhooks");
    axum::serve(listener, router(uploader))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn receive<C>(State(uploader): State<Arc<Uploader<C>>>, body: Bytes) -> (StatusCode, String)
where
    C: TrackingClient + ?Sized + 'static,
{
    // cancels the run when the connection goes away and axum drops this future
    let (handle, cancellation) = cancellation();
    let _guard = handle.drop_guard();

    match uploader.run(&body, cancellation).await {
        Ok(RunOutcome::Uploaded {
            project,
            version,
            is_latest,
        }) => (
            StatusCode::OK,
            format!("uploaded BOM for {}:{} (latest: {})", project, version, is_latest),
        ),
        Ok(RunOutcome::Skipped { reason }) => (StatusCode::OK, format!("skipped: {}", reason)),
        Err(err) => {
            error!(error = %err, "Failed to process report");
            (status_for(&err), err.to_string())
        }
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotSbomReport(_)
        | Error::InvalidReport(_)
        | Error::UnsupportedOperation(_)
        | Error::Template(_) => StatusCode::BAD_REQUEST,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        err if err.is_service_failure() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
