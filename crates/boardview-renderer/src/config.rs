use std::path::Path;

use boardview_core::Rgba;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Viewer tuning. Every field has a default, so a config file only needs
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Minimum zoom for LOD 0, 1, 2 and 3; anything below the last is LOD 4.
    pub lod_breakpoints: [f32; 4],
    /// Highest tier instanced entities draw (tiers beyond it reuse it).
    pub instanced_tier_cap: usize,
    /// How far an instance may sit from its object's bounds center and
    /// still be taken as that object.
    pub position_tolerance: f32,
    pub via_overlay_color: Rgba,
    pub drc_overlay_color: Rgba,
    pub undo_limit: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            lod_breakpoints: [10.0, 5.0, 2.0, 0.5],
            instanced_tier_cap: 2,
            position_tolerance: 0.5,
            via_overlay_color: [1.0, 0.84, 0.0, 1.0],
            drc_overlay_color: [1.0, 0.0, 0.0, 0.6],
            undo_limit: 100,
        }
    }
}

impl ViewerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str::<Self>(json)?.validated()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if !self.lod_breakpoints.windows(2).all(|w| w[0] > w[1]) {
            return Err(ConfigError::Invalid(format!(
                "LOD breakpoints must be strictly decreasing, got {:?}",
                self.lod_breakpoints
            )));
        }
        if !(self.position_tolerance >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "position tolerance must be non-negative, got {}",
                self.position_tolerance
            )));
        }
        if self.undo_limit == 0 {
            return Err(ConfigError::Invalid("undo limit must be at least 1".into()));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ViewerConfig::from_json(r#"{"position_tolerance": 1.5}"#).unwrap();
        assert_eq!(config.position_tolerance, 1.5);
        assert_eq!(config.lod_breakpoints, [10.0, 5.0, 2.0, 0.5]);
        assert_eq!(config.undo_limit, 100);
    }

    #[test]
    fn test_rejects_unordered_breakpoints() {
        let err = ViewerConfig::from_json(r#"{"lod_breakpoints": [1, 5, 2, 0.5]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(matches!(
            ViewerConfig::from_json("{not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ViewerConfig::load("/nonexistent/boardview.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
