//! Coordinator configuration.

use std::path::PathBuf;
use std::time::Duration;

use nostrovostro_common::{InstitutionId, DEFAULT_AUDITOR_ID};

/// Settlement processing configuration.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Bound on one settlement attempt, locks included.
    pub timeout: Duration,
    /// Retries after a version conflict or attempt timeout.
    pub max_retries: u32,
    /// Linear backoff step between retries.
    pub retry_backoff: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

impl SettlementConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff * attempt
    }
}

/// Main coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Id whose history query returns the whole journal.
    pub auditor_id: InstitutionId,
    /// Settlement configuration.
    pub settlement_config: SettlementConfig,
    /// Rate file replacing the default FX table.
    pub fx_rates_path: Option<PathBuf>,
    /// Seed the default correspondent banks on start.
    pub bootstrap: bool,
    /// Log level.
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            auditor_id: InstitutionId::new(DEFAULT_AUDITOR_ID),
            settlement_config: SettlementConfig::default(),
            fx_rates_path: None,
            bootstrap: true,
            log_level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("NV_AUDITOR_ID") {
            config.auditor_id = InstitutionId::new(id);
        }

        if let Ok(ms) = std::env::var("NV_SETTLEMENT_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.settlement_config.timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(retries) = std::env::var("NV_MAX_RETRIES") {
            if let Ok(retries) = retries.parse() {
                config.settlement_config.max_retries = retries;
            }
        }

        if let Ok(ms) = std::env::var("NV_RETRY_BACKOFF_MS") {
            if let Ok(ms) = ms.parse() {
                config.settlement_config.retry_backoff = Duration::from_millis(ms);
            }
        }

        if let Ok(path) = std::env::var("NV_FX_RATES_PATH") {
            if !path.is_empty() {
                config.fx_rates_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(flag) = std::env::var("NV_BOOTSTRAP") {
            config.bootstrap = !matches!(flag.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.auditor_id.as_str().is_empty() {
            return Err("Auditor id cannot be empty".to_string());
        }

        if self.settlement_config.timeout.is_zero() {
            return Err("Settlement timeout cannot be 0".to_string());
        }

        Ok(())
    }
}
