use crate::application::app::shutdown_signal;
use crate::collector::{Collector, EventLog};
use crate::config::CollectorSettings;
use crate::Result;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::{info, instrument};

/// Collector process: ingestion endpoint over a single event log
pub struct CollectorApplication {
    settings: CollectorSettings,
    collector: Collector,
}

impl CollectorApplication {
    /// Load settings and open the event log
    pub fn new() -> Result<Self> {
        Self::with_settings(CollectorSettings::new()?)
    }

    pub fn with_settings(settings: CollectorSettings) -> Result<Self> {
        let log = EventLog::open(settings.event_log_path.as_deref())?;
        Ok(Self {
            settings,
            collector: Collector::new(log),
        })
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.settings.listen_addr).await?;
        self.run_until(listener, shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then flush the log
    #[instrument(skip_all)]
    pub async fn run_until<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(listen_addr = %listener.local_addr()?, "Collector listening");

        let served = axum::serve(listener, self.collector.router())
            .with_graceful_shutdown(shutdown)
            .await;

        self.collector.close()?;
        info!("Collector stopped");

        served?;
        Ok(())
    }
}
