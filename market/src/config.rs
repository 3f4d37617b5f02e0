//! Market configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Market configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ledger and storage configuration
    pub ledger: wagerbook_ledger::Config,

    /// Moderator consensus settings
    pub resolution: ResolutionConfig,

    /// Per-operation deadlines
    pub timeouts: TimeoutConfig,

    /// Input limits
    pub limits: LimitsConfig,

    /// Logging settings (applied by the binary)
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger: wagerbook_ledger::Config::default(),
            resolution: ResolutionConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Moderator consensus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Minimum number of live votes before a unanimous vote closes a bet
    pub quorum: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self { quorum: 2 }
    }
}

/// Per-operation deadlines (ms)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wager admission
    pub wager_ms: u64,
    /// Vote casting, including a finalising payout
    pub vote_ms: u64,
    /// Peer transfer
    pub transfer_ms: u64,
    /// Single gift
    pub gift_ms: u64,
    /// Airdrop to every user
    pub airdrop_ms: u64,
    /// Bet creation
    pub bet_ms: u64,
    /// User creation
    pub user_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            wager_ms: 8_000,
            vote_ms: 10_000,
            transfer_ms: 5_000,
            gift_ms: 10_000,
            airdrop_ms: 30_000,
            bet_ms: 5_000,
            user_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    /// Wager deadline
    pub fn wager(&self) -> Duration {
        Duration::from_millis(self.wager_ms)
    }

    /// Vote deadline
    pub fn vote(&self) -> Duration {
        Duration::from_millis(self.vote_ms)
    }

    /// Transfer deadline
    pub fn transfer(&self) -> Duration {
        Duration::from_millis(self.transfer_ms)
    }

    /// Gift deadline
    pub fn gift(&self) -> Duration {
        Duration::from_millis(self.gift_ms)
    }

    /// Airdrop deadline
    pub fn airdrop(&self) -> Duration {
        Duration::from_millis(self.airdrop_ms)
    }

    /// Bet creation deadline
    pub fn bet(&self) -> Duration {
        Duration::from_millis(self.bet_ms)
    }

    /// User creation deadline
    pub fn user(&self) -> Duration {
        Duration::from_millis(self.user_ms)
    }

    fn all(&self) -> [(&'static str, u64); 7] {
        [
            ("wager_ms", self.wager_ms),
            ("vote_ms", self.vote_ms),
            ("transfer_ms", self.transfer_ms),
            ("gift_ms", self.gift_ms),
            ("airdrop_ms", self.airdrop_ms),
            ("bet_ms", self.bet_ms),
            ("user_ms", self.user_ms),
        ]
    }
}

/// Input limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Notes are truncated to this many characters
    pub note_max_chars: usize,
    /// Rows in the hall of fame
    pub leaderboard_size: usize,
    /// Open wagers and open bets listed per user profile
    pub profile_items: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            note_max_chars: 200,
            leaderboard_size: 50,
            profile_items: 20,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `WAGERBOOK_*` environment variables on top of this config
    pub fn apply_env(&mut self) -> crate::Result<()> {
        self.ledger.apply_env()?;

        if let Ok(quorum) = std::env::var("WAGERBOOK_QUORUM") {
            self.resolution.quorum = quorum.trim().parse().map_err(|_| {
                crate::Error::Config(format!("WAGERBOOK_QUORUM has an invalid value: {}", quorum))
            })?;
        }

        if let Ok(level) = std::env::var("WAGERBOOK_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("WAGERBOOK_LOG_FORMAT") {
            self.logging.format = match format.trim().to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => {
                    return Err(crate::Error::Config(format!(
                        "WAGERBOOK_LOG_FORMAT has an invalid value: {}",
                        format
                    )))
                }
            };
        }

        Ok(())
    }

    /// Reject values the market cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        self.ledger.validate()?;

        if self.resolution.quorum == 0 {
            return Err(crate::Error::Config(
                "resolution.quorum must be at least 1".to_string(),
            ));
        }
        if let Some((name, _)) = self.timeouts.all().iter().find(|(_, ms)| *ms == 0) {
            return Err(crate::Error::Config(format!(
                "timeouts.{} must be positive",
                name
            )));
        }
        if self.limits.leaderboard_size == 0 {
            return Err(crate::Error::Config(
                "limits.leaderboard_size must be positive".to_string(),
            ));
        }
        if self.limits.profile_items == 0 {
            return Err(crate::Error::Config(
                "limits.profile_items must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
