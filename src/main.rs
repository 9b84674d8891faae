use anyhow::Result;
use llm_meter::{config::ProxySettings, logging, Application};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = ProxySettings::new()?;
    logging::init(settings.log_format);

    info!("Starting llm_meter");

    Application::with_settings(settings).run().await?;

    Ok(())
}
