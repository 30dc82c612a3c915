use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cart_bench::config::Config;
use cart_bench::runner::{run_staged_test, Harness};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let harness = Arc::new(Harness::new(config)?);
    let config = &harness.config;

    info!("════════════════════════════════════════════════════════════");
    info!("              CART API LOAD BENCHMARK (Rust)");
    info!("════════════════════════════════════════════════════════════");
    info!("Target:            {}", config.base_url);
    info!("Auth Mode:         {:?}", config.auth_mode);
    info!("Credential Source: {:?}", config.credential_source);
    info!("Catalog Size:      {}", config.catalog_size);
    info!("Operations:        {:?}", config.ops);
    info!(
        "Pacing:            {}..{} ms",
        config.pacing_min_ms, config.pacing_max_ms
    );
    info!("Target VUs:        {}", config.num_vus);
    info!("Ramp Duration:     {}s", config.ramp_duration);
    info!("Hold Duration:     {}s", config.hold_duration);
    for stage in harness.timeline.stages() {
        info!(
            "Stage {:<10} {}s..{}s",
            stage.name, stage.start, stage.end
        );
    }
    info!("════════════════════════════════════════════════════════════");

    run_staged_test(Arc::clone(&harness)).await?;

    harness.metrics.print_summary().await;

    info!("════════════════════════════════════════════════════════════");
    info!("                 BENCHMARK COMPLETE");
    info!("════════════════════════════════════════════════════════════");

    Ok(())
}
