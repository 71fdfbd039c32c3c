use anyhow::Context;
use std::path::PathBuf;
use tracing::{info, warn};

use shelf_scout::config::load_config;
use shelf_scout::{Orchestrator, WorkList};

fn work_list_from_args() -> Option<PathBuf> {
    std::env::args().nth(1).map(PathBuf::from)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chromiumoxide=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = load_config();
    let work_list = work_list_from_args().unwrap_or_else(|| config.work_list.clone());

    let raw = std::fs::read_to_string(&work_list)
        .with_context(|| format!("reading work list {}", work_list.display()))?;
    let list: WorkList =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", work_list.display()))?;

    if list.skus.is_empty() {
        warn!("work list {} is empty, nothing to do", work_list.display());
        return Ok(());
    }
    info!("loaded {} items from {}", list.skus.len(), work_list.display());

    let orchestrator = Orchestrator::new(config);
    let summary = orchestrator.run(list.skus).await;

    info!(
        "run complete: {} total, {} succeeded, {} failed",
        summary.total, summary.succeeded, summary.failed
    );
    Ok(())
}
