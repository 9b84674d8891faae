use anyhow::Result;
use llm_meter::{config::CollectorSettings, logging, CollectorApplication};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = CollectorSettings::new()?;
    logging::init(settings.log_format);

    info!("Starting llm_meter collector");

    CollectorApplication::with_settings(settings)?.run().await?;

    Ok(())
}
