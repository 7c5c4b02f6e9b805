//! Privacy Configuration
//!
//! Values the core consumes but does not own: mixing switch, preferred
//! denomination, auto-mint target, spend security level and ledger
//! parameters. Loaded from the environment or a JSON file.

use std::env;
use std::path::Path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::consensus_params::zerocoin::{
    DEFAULT_SECURITY_LEVEL, MAX_AUTOMINT_PERCENTAGE, MAX_SECURITY_LEVEL,
    MIN_AUTOMINT_PERCENTAGE, MIN_SECURITY_LEVEL,
};
use crate::denomination::Denomination;

/// Deterministic order in which mints are folded into an accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoldOrder {
    /// Ascending serial number bytes
    SerialNumber,
    /// Confirmation height, then arrival order inside the block
    Confirmation,
}

impl Default for FoldOrder {
    fn default() -> Self {
        FoldOrder::SerialNumber
    }
}

/// Wallet privacy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Enable obfuscation mixing
    pub enable_mixing: bool,

    /// Preferred denomination in whole coins (0 = any)
    pub preferred_denomination: u32,

    /// Target share of the balance held as zerocoin (10..=100)
    pub automint_percentage: u8,

    /// Spend proof security level (1..=100)
    pub security_level: u8,

    /// Wait for enough funds to mint the preferred denomination
    pub wait_for_preferred: bool,

    /// Accumulator fold order
    pub fold_order: FoldOrder,

    /// Blocks rescanned by a cache reset
    pub rescan_depth: u64,

    /// Accumulator/mint cache location
    pub db_path: String,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enable_mixing: false,
            preferred_denomination: 0,
            automint_percentage: MIN_AUTOMINT_PERCENTAGE,
            security_level: DEFAULT_SECURITY_LEVEL,
            wait_for_preferred: false,
            fold_order: FoldOrder::default(),
            rescan_depth: 1000,
            db_path: "./zerocoin_cache_db".to_string(),
        }
    }
}

impl PrivacyConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enable_mixing = env::var("ENABLE_MIXING")
            .unwrap_or_else(|_| defaults.enable_mixing.to_string())
            .parse()
            .unwrap_or(defaults.enable_mixing);

        let preferred_denomination = env::var("PREFERRED_DENOM")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0);

        let automint_percentage = env::var("AUTOMINT_PERCENTAGE")
            .unwrap_or_else(|_| defaults.automint_percentage.to_string())
            .parse::<u32>()
            .map(|v| v.min(u8::MAX as u32) as u8)
            .unwrap_or(defaults.automint_percentage);

        let security_level = env::var("SECURITY_LEVEL")
            .unwrap_or_else(|_| defaults.security_level.to_string())
            .parse::<u32>()
            .map(|v| v.min(u8::MAX as u32) as u8)
            .unwrap_or(defaults.security_level);

        let wait_for_preferred = env::var("WAIT_FOR_PREFERRED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let rescan_depth = env::var("RESCAN_DEPTH")
            .unwrap_or_else(|_| defaults.rescan_depth.to_string())
            .parse()
            .unwrap_or(defaults.rescan_depth);

        let db_path = env::var("PRIVACY_DB_PATH").unwrap_or(defaults.db_path);

        Self {
            enable_mixing,
            preferred_denomination,
            automint_percentage,
            security_level,
            wait_for_preferred,
            fold_order: FoldOrder::default(),
            rescan_depth,
            db_path,
        }
        .normalized()
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config.normalized())
    }

    /// Clamp every value into its accepted range
    pub fn normalized(mut self) -> Self {
        if self.preferred_denomination != 0
            && Denomination::from_value(self.preferred_denomination as u64).is_none()
        {
            log::warn!(
                "preferred denomination {} is not a catalog value, using 0",
                self.preferred_denomination
            );
            self.preferred_denomination = 0;
        }
        self.automint_percentage = self
            .automint_percentage
            .clamp(MIN_AUTOMINT_PERCENTAGE, MAX_AUTOMINT_PERCENTAGE);
        self.security_level = self.security_level.clamp(MIN_SECURITY_LEVEL, MAX_SECURITY_LEVEL);
        self
    }

    /// Preferred denomination, if one is configured
    pub fn preferred(&self) -> Option<Denomination> {
        Denomination::from_value(self.preferred_denomination as u64)
    }
}
