//! Core runtime configuration.
//!
//! # Responsibility
//! - Hold tunables for layout, placement and the embedding call.
//! - Parse host-provided JSON and reject unusable values.
//!
//! # Invariants
//! - A validated config always has a positive finite spread, a non-zero
//!   embedding timeout and at least one placement neighbor.

use crate::layout::placement::DEFAULT_PLACEMENT_NEIGHBORS;
use crate::layout::DEFAULT_LAYOUT_SPREAD;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

const DEFAULT_EMBEDDING_TIMEOUT_MS: u64 = 5_000;

/// Configuration consumed by core services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Multiplier applied to standardized layout axes.
    pub layout_spread: f64,
    /// Upper bound for one embedding provider call.
    pub embedding_timeout_ms: u64,
    /// Expected embedding length. `None` trusts the provider's declaration.
    pub embedding_dimensions: Option<usize>,
    /// Neighbors blended by incremental placement.
    pub placement_neighbors: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            layout_spread: DEFAULT_LAYOUT_SPREAD,
            embedding_timeout_ms: DEFAULT_EMBEDDING_TIMEOUT_MS,
            embedding_dimensions: None,
            placement_neighbors: DEFAULT_PLACEMENT_NEIGHBORS,
        }
    }
}

/// Configuration parse/validation failure.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl CoreConfig {
    /// Parses JSON; missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.layout_spread.is_finite() || self.layout_spread <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "layout_spread must be positive and finite, got {}",
                self.layout_spread
            )));
        }
        if self.embedding_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "embedding_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.embedding_dimensions == Some(0) {
            return Err(ConfigError::Invalid(
                "embedding_dimensions must be greater than 0 when set".to_string(),
            ));
        }
        if self.placement_neighbors == 0 {
            return Err(ConfigError::Invalid(
                "placement_neighbors must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }
}
