use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cart::CartClient;
use crate::config::{Config, CredentialSource};
use crate::metrics::Metrics;
use crate::phase::{TestClock, Timeline};
use crate::session::Session;
use crate::token::{self, TokenMinter};

/// Shared, read-only wiring every VU gets a handle to. Built once before
/// any VU spawns, which also fixes the test-global start instant.
pub struct Harness {
    pub config: Config,
    pub timeline: Timeline,
    pub clock: TestClock,
    pub minter: TokenMinter,
    pub client: CartClient,
    pub metrics: Metrics,
}

impl Harness {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let timeline = config.timeline()?;
        let minter = TokenMinter::new(&config.jwt_secret, config.token_ttl);
        let client = CartClient::new(
            &config.base_url,
            config.auth_mode,
            config.request_timeout(),
        )?;
        let metrics = Metrics::new(&timeline);
        Ok(Self {
            config,
            timeline,
            clock: TestClock::start_now(),
            minter,
            client,
            metrics,
        })
    }
}

fn pick_item(catalog_size: u32) -> u32 {
    rand::rng().random_range(0..catalog_size)
}

fn pacing_delay(config: &Config) -> Duration {
    let ms = if config.pacing_max_ms > config.pacing_min_ms {
        rand::rng().random_range(config.pacing_min_ms..=config.pacing_max_ms)
    } else {
        config.pacing_min_ms
    };
    Duration::from_millis(ms)
}

async fn establish_credential(harness: &Harness, session: &mut Session) -> Result<()> {
    match harness.config.credential_source {
        CredentialSource::Mint => {
            session
                .ensure(&harness.minter)
                .context("minting initial token")?;
        }
        CredentialSource::Bootstrap => {
            let candidate = harness
                .client
                .bootstrap(&harness.config.bootstrap_path)
                .await
                .context("bootstrap request")?;
            match candidate {
                Some(tok) => session.rotate(Some(tok)),
                None => bail!("bootstrap response carried no credential"),
            }
        }
    }
    Ok(())
}

/// One pass through the iteration state machine for a single VU: obtain a
/// credential if none is held, run the configured operation sequence, then
/// pace. Nothing here retries; failures are recorded and the iteration
/// moves on. An establishment failure skips the rest of the iteration and
/// the next one starts from scratch.
pub async fn run_iteration(id: usize, harness: &Harness, session: &mut Session) {
    let iteration = session.begin_iteration();

    if session.credential().is_none() {
        if let Err(err) = establish_credential(harness, session).await {
            warn!("VU {} could not establish a credential: {:#}", id, err);
            harness.metrics.record_credential_failure();
            return;
        }
    }
    let Some(mut token) = session.credential().map(str::to_string) else {
        return;
    };

    debug!(
        "VU {} iteration {} starting in phase {}",
        id,
        iteration,
        harness.timeline.phase_at(harness.clock.elapsed())
    );

    let config = &harness.config;
    let mut item = pick_item(config.catalog_size);
    for op in &config.ops {
        if config.item_per_call {
            item = pick_item(config.catalog_size);
        }

        // Phase reading at the moment the call is issued, not when it
        // completes.
        let phase = harness.timeline.phase_at(harness.clock.elapsed());
        let started = Instant::now();
        match harness.client.execute(*op, item, &token).await {
            Ok(outcome) => {
                let passed = op.accepts(&outcome);
                if !passed {
                    debug!(
                        "VU {} {:?} item {} rejected: status {}",
                        id, op, item, outcome.status
                    );
                }
                harness
                    .metrics
                    .record(phase, started.elapsed().as_millis() as u64, passed)
                    .await;
                // Later calls in this iteration must use the rotated
                // credential; the target encodes the cart inside it.
                if let Some(next) = outcome.rotated {
                    session.rotate(Some(next.clone()));
                    token = next;
                }
            }
            Err(err) => {
                debug!("VU {} {:?} item {} failed: {}", id, op, item, err);
                harness
                    .metrics
                    .record(phase, started.elapsed().as_millis() as u64, false)
                    .await;
            }
        }
    }

    sleep(pacing_delay(config)).await;
}

async fn run_vu(id: usize, harness: Arc<Harness>, mut shutdown: broadcast::Receiver<()>) {
    harness.metrics.vu_started();
    let mut session = Session::new(format!("user_{}_{}", id, token::unix_now()));
    debug!("VU {} starting as {}", id, session.subject());

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("VU {} received shutdown signal", id);
                break;
            }
            _ = run_iteration(id, &harness, &mut session) => {}
        }
    }

    harness.metrics.vu_finished();
    debug!("VU {} stopped", id);
}

/// Drives the whole test: spawns VUs linearly across the ramp window,
/// holds at the target count, then broadcasts shutdown and waits for
/// stragglers with a bounded grace period. In-flight iterations are
/// abandoned at teardown, not drained.
pub async fn run_staged_test(harness: Arc<Harness>) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();
    let metrics = harness.metrics.clone();
    let num_vus = harness.config.num_vus;

    info!("Starting staged test");
    info!("Target: {} VUs", num_vus);

    let stage_start = Instant::now();
    info!(
        "Stage 1: ramping to {} VUs over {}s",
        num_vus, harness.config.ramp_duration
    );

    let vus_per_second = num_vus as f64 / harness.config.ramp_duration as f64;
    let mut spawned = 0;
    let mut last_log = Instant::now();

    while spawned < num_vus {
        let elapsed = stage_start.elapsed().as_secs_f64();
        let target_now = (vus_per_second * elapsed).min(num_vus as f64) as usize;

        while spawned < target_now {
            let vu_harness = Arc::clone(&harness);
            let shutdown_rx = shutdown_tx.subscribe();

            let id = spawned;
            spawned += 1;

            tasks.push(tokio::spawn(async move {
                run_vu(id, vu_harness, shutdown_rx).await;
            }));
        }

        sleep(Duration::from_millis(100)).await;

        if last_log.elapsed() >= Duration::from_secs(5) {
            info!(
                "Stage 1: spawned={}, active={}, requests={}",
                spawned,
                metrics.active_vus(),
                metrics.total_requests()
            );
            last_log = Instant::now();
        }
    }

    let remaining = harness
        .config
        .ramp_duration
        .saturating_sub(stage_start.elapsed().as_secs());
    if remaining > 0 {
        sleep(Duration::from_secs(remaining)).await;
    }

    info!(
        "Stage 1 complete: {} VUs spawned, {} active",
        spawned,
        metrics.active_vus()
    );

    let stage_start = Instant::now();
    info!(
        "Stage 2: holding at {} VUs for {}s",
        num_vus, harness.config.hold_duration
    );

    let hold_interval = Duration::from_secs(5);
    let mut last_log = Instant::now();

    while stage_start.elapsed() < Duration::from_secs(harness.config.hold_duration) {
        sleep(Duration::from_millis(500)).await;

        if last_log.elapsed() >= hold_interval {
            info!(
                "Stage 2: active={}, requests={}",
                metrics.active_vus(),
                metrics.total_requests()
            );
            last_log = Instant::now();
        }
    }

    info!("Stage 2 complete: {} active", metrics.active_vus());

    info!(
        "Stage 3: ramping down over {}s",
        harness.config.ramp_down_duration
    );

    shutdown_tx.send(()).ok();

    info!("Waiting for graceful shutdown (max 30s)");
    tokio::select! {
        _ = sleep(Duration::from_secs(30)) => {
            info!("Graceful shutdown timeout reached");
        }
        _ = async {
            futures_util::future::join_all(tasks).await;
        } => {
            info!("All tasks completed before timeout");
        }
    }

    info!("Stage 3 complete: {} active", metrics.active_vus());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn picked_items_stay_inside_the_catalog() {
        for _ in 0..100 {
            assert!(pick_item(8) < 8);
        }
        assert_eq!(pick_item(1), 0);
    }

    #[test]
    fn fixed_pacing_uses_the_lower_bound() {
        let config = Config::parse_from([
            "cart-bench",
            "--pacing-min-ms",
            "250",
            "--pacing-max-ms",
            "250",
        ]);
        assert_eq!(pacing_delay(&config), Duration::from_millis(250));
    }

    #[test]
    fn randomized_pacing_stays_inside_the_range() {
        let config = Config::parse_from([
            "cart-bench",
            "--pacing-min-ms",
            "100",
            "--pacing-max-ms",
            "400",
        ]);
        for _ in 0..100 {
            let delay = pacing_delay(&config);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(400));
        }
    }
}
