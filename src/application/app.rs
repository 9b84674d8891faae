use crate::config::ProxySettings;
use crate::proxy::ProxyService;
use crate::Result;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// Metering proxy process: listener, router and dispatcher lifecycle
pub struct Application {
    service: ProxyService,
}

impl Application {
    /// Load settings from the environment; a missing upstream key fails here
    pub fn new() -> Result<Self> {
        Ok(Self::with_settings(ProxySettings::new()?))
    }

    pub fn with_settings(settings: ProxySettings) -> Self {
        Self {
            service: ProxyService::new(settings),
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        self.service.settings()
    }

    /// Serve on the configured address until ctrl-c or SIGTERM
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.settings().listen_addr).await?;
        self.run_until(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves, then stop the dispatcher
    #[instrument(skip_all)]
    pub async fn run_until<F>(mut self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let settings = self.settings();
        info!(
            listen_addr = %listener.local_addr()?,
            upstream = %settings.upstream_base_url,
            collector = %settings.collector_url,
            queue_size = %settings.event_queue_size,
            "Starting llm_meter proxy"
        );

        self.service.start_dispatcher();
        let served = axum::serve(listener, self.service.router())
            .with_graceful_shutdown(shutdown)
            .await;

        info!("Proxy stopped accepting requests; flushing metering events");
        self.service.shutdown().await;

        served?;
        Ok(())
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Environment;

    #[tokio::test]
    async fn serves_until_shutdown_signal() {
        let map: config::Map<String, String> = [("UPSTREAM_OPENAI_API_KEY", "sk-test")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let settings =
            ProxySettings::from_source(Environment::default().source(Some(map))).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let app = Application::with_settings(settings);
        let server = tokio::spawn(app.run_until(listener, async {
            let _ = stop_rx.await;
        }));

        stop_tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
    }
}
