use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde::Deserialize;

/// Bucket for samples that land outside every named stage. Excluded from
/// per-phase statistics, always counted in the overall aggregator.
pub const UNATTRIBUTED: &str = "none";

/// One named segment of the load timeline. Offsets are seconds from test
/// start, inclusive on both ends.
#[derive(Debug, Clone, Deserialize)]
pub struct Stage {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone)]
pub struct Timeline {
    stages: Vec<Stage>,
}

impl Timeline {
    /// Stages must be ordered and non-overlapping; gaps are allowed and
    /// map to [`UNATTRIBUTED`]. Touching boundaries (one stage ending the
    /// second the next begins) are legal; the earlier stage wins there.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        let mut prev_end: Option<u64> = None;
        for stage in &stages {
            if stage.name.is_empty() || stage.name == UNATTRIBUTED {
                bail!("stage name {:?} is reserved or empty", stage.name);
            }
            if stages.iter().filter(|s| s.name == stage.name).count() > 1 {
                bail!("duplicate stage name {:?}", stage.name);
            }
            if stage.end < stage.start {
                bail!(
                    "stage {:?} ends before it starts ({}s..{}s)",
                    stage.name,
                    stage.start,
                    stage.end
                );
            }
            if let Some(prev) = prev_end {
                if stage.start < prev {
                    bail!("stage {:?} overlaps the previous stage", stage.name);
                }
            }
            prev_end = Some(stage.end);
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Name of the first stage whose interval contains `elapsed`, or the
    /// sentinel when none does.
    pub fn phase_at(&self, elapsed: Duration) -> &str {
        let secs = elapsed.as_secs_f64();
        self.stages
            .iter()
            .find(|s| secs >= s.start as f64 && secs <= s.end as f64)
            .map(|s| s.name.as_str())
            .unwrap_or(UNATTRIBUTED)
    }
}

/// Wall-clock origin shared by every VU. Captured once, before any VU is
/// allowed to iterate, so phase boundaries are test-global.
#[derive(Debug, Clone, Copy)]
pub struct TestClock {
    start: Instant,
}

impl TestClock {
    pub fn start_now() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
