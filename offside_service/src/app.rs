use crate::{
    config::Config,
    server::{HttpServer, SharedState},
    strategy::Strategies,
    telemetry::Metrics,
    upload::UploadStore,
};
use offside_detector::{Detector, OrtDetector};
use std::{error::Error, future::Future, sync::Arc};
use tokio::{signal, sync::broadcast, task::JoinHandle};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let detector: Arc<dyn Detector> = match OrtDetector::new(&config.model) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to initialize detector: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let strategies = Strategies::new(detector, config.classes, &config.worker, &config.queue)?;
    let uploads = UploadStore::new(&config.upload)?;
    let metrics = Metrics::new()?;

    let state = SharedState {
        strategies: Arc::new(strategies),
        uploads: Arc::new(uploads),
        metrics: Arc::new(metrics),
    };

    let server = HttpServer::new(state, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    supervise(server_handle, shutdown_signal(), shutdown_tx).await?;

    Ok(())
}

/// Waits for the shutdown signal, then drains the server. A server error,
/// whether it ends the server early or surfaces while draining, is returned.
async fn supervise(
    mut server_handle: JoinHandle<anyhow::Result<()>>,
    shutdown: impl Future<Output = ()>,
    shutdown_tx: broadcast::Sender<()>,
) -> anyhow::Result<()> {
    tokio::select! {
        result = &mut server_handle => {
            let result = result.map_err(anyhow::Error::from).and_then(|served| served);
            if let Err(e) = &result {
                tracing::error!("Server stopped unexpectedly: {:?}", e);
            }
            return result;
        }
        _ = shutdown => {
            tracing::info!("Shutdown signal received, starting graceful shutdown.");
        }
    }

    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Ok(())) => {
            tracing::info!("Server stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!("Server failed during shutdown: {:?}", e);
            Err(e)
        }
        Err(e) => {
            tracing::error!("Server task failed: {:?}", e);
            Err(e.into())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
