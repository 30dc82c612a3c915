use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::Parser;

use crate::cart::{AuthMode, CartOp};
use crate::phase::{Stage, Timeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CredentialSource {
    /// Mint the first token locally with the shared secret
    Mint,
    /// Take the first token from the bootstrap response's Set-Cookie
    Bootstrap,
}

#[derive(Parser, Debug)]
#[command(name = "cart-bench")]
#[command(about = "Staged load driver for a JWT cart API", long_about = None)]
pub struct Config {
    /// Target base URL
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Shared HMAC secret for locally minted tokens
    #[arg(long, env = "JWT_SECRET", default_value = "your-super-secret-key-12345")]
    pub jwt_secret: String,

    /// How each VU obtains its first credential
    #[arg(long, env = "CREDENTIAL_SOURCE", value_enum, default_value_t = CredentialSource::Mint)]
    pub credential_source: CredentialSource,

    /// Path fetched when bootstrapping a credential from the server
    #[arg(long, env = "BOOTSTRAP_PATH", default_value = "/")]
    pub bootstrap_path: String,

    /// How the credential travels on requests
    #[arg(long, env = "AUTH_MODE", value_enum, default_value_t = AuthMode::Cookie)]
    pub auth_mode: AuthMode,

    /// Catalog size; item ids are 0..catalog-size
    #[arg(long, env = "CATALOG_SIZE", default_value = "8")]
    pub catalog_size: u32,

    /// Expiry horizon of minted tokens in seconds
    #[arg(long, env = "TOKEN_TTL", default_value = "3600")]
    pub token_ttl: u64,

    /// Operations each iteration performs, in order
    #[arg(
        long,
        env = "OPS",
        value_enum,
        value_delimiter = ',',
        default_value = "add,increase,decrease,remove"
    )]
    pub ops: Vec<CartOp>,

    /// Pick a fresh random item per call instead of once per iteration
    #[arg(long, env = "ITEM_PER_CALL")]
    pub item_per_call: bool,

    /// Pacing sleep lower bound in milliseconds
    #[arg(long, env = "PACING_MIN_MS", default_value = "100")]
    pub pacing_min_ms: u64,

    /// Pacing sleep upper bound in milliseconds; above the lower bound
    /// the delay is drawn uniformly from the range
    #[arg(long, env = "PACING_MAX_MS", default_value = "100")]
    pub pacing_max_ms: u64,

    /// Target number of virtual users
    #[arg(long, env = "NUM_VUS", default_value = "1000")]
    pub num_vus: usize,

    /// Duration to ramp up to target VUs in seconds
    #[arg(long, env = "RAMP_DURATION", default_value = "30")]
    pub ramp_duration: u64,

    /// Duration to hold at target VU count in seconds
    #[arg(long, env = "HOLD_DURATION", default_value = "60")]
    pub hold_duration: u64,

    /// Duration to ramp down in seconds
    #[arg(long, env = "RAMP_DOWN_DURATION", default_value = "10")]
    pub ramp_down_duration: u64,

    /// Stage timeline JSON file overriding the derived ramp/plateau stages
    #[arg(long, env = "TIMELINE_FILE")]
    pub timeline_file: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.catalog_size > 0, "catalog size must be positive");
        ensure!(!self.ops.is_empty(), "operation sequence must not be empty");
        ensure!(
            self.pacing_max_ms >= self.pacing_min_ms,
            "pacing upper bound {}ms is below lower bound {}ms",
            self.pacing_max_ms,
            self.pacing_min_ms
        );
        ensure!(self.ramp_duration > 0, "ramp duration must be positive");
        Ok(())
    }

    /// The stage timeline: an explicit JSON file when given, otherwise a
    /// ramp stage followed by a plateau derived from the schedule. The
    /// ramp-down window stays unattributed either way.
    pub fn timeline(&self) -> Result<Timeline> {
        if let Some(path) = &self.timeline_file {
            let content = std::fs::read_to_string(path)
                .context(format!("Failed to read timeline file: {:?}", path))?;
            let stages: Vec<Stage> =
                sonic_rs::from_str(&content).context("Failed to parse timeline JSON")?;
            return Timeline::new(stages);
        }

        Timeline::new(vec![
            Stage {
                name: "ramp".to_string(),
                start: 0,
                end: self.ramp_duration,
            },
            Stage {
                name: "plateau".to_string(),
                start: self.ramp_duration,
                end: self.ramp_duration + self.hold_duration,
            },
        ])
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}
