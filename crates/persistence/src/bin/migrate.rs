#![deny(warnings)]

use persistence::{ensure_db_dir, init_db, seed_items};
use roster_plan::{PlannerConfig, Reference};
use tracing_subscriber::EnvFilter;

/// Usage: migrate [database_url] [reference.yaml]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let defaults = PlannerConfig::default();
    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or(defaults.database_url);
    let reference_path = args.next().map(Into::into).unwrap_or(defaults.reference_path);

    ensure_db_dir(&url)?;
    let pool = init_db(&url).await?;
    let reference = Reference::load(&reference_path)?;
    let inserted = seed_items(&pool, reference.catalog_items()).await?;
    println!("DB migrated at {url} ({inserted} items seeded)");
    Ok(())
}
