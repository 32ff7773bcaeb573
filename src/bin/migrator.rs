use dotenvy::dotenv;
use invoice_ledger::{
    infrastructure::{config::Config, db},
    telemetry,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    telemetry::init();

    let config = Config::from_env()?;
    if config.records.provider != "postgres" {
        warn!(provider = %config.records.provider, "record store is not PostgreSQL; nothing to migrate");
        return Ok(());
    }

    let pool = db::connect(&config.database).await?;
    db::run_migrations(&pool).await?;

    info!("invoice table migrations completed");

    Ok(())
}
