//! Cache Settings
//!
//! Runtime configuration for the resource context, consumed once by
//! [`ResourceContext::new`](crate::ResourceContext::new).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use resident::settings::{CacheSettings, PoolSettings};
//!
//! // Defaults: 4-tick pool budget, hot reload every 30 ticks
//! let settings = CacheSettings::default();
//!
//! // Longer-lived transient targets, no hot reload
//! let settings = CacheSettings {
//!     pool: PoolSettings { frame_budget: 8 },
//!     hot_reload: HotReloadSettings { enabled: false, ..Default::default() },
//!     ..Default::default()
//! };
//! ```
//!
//! Settings can also be read from JSON; missing fields fall back to their
//! defaults:
//!
//! ```json
//! { "pool": { "frame_budget": 5 }, "marshal": { "poll_interval_ms": 2 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

// ---------------------------------------------------------------------------
// PoolSettings
// ---------------------------------------------------------------------------

/// Render-target pooling policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Ticks a pooled render target survives without being acquired.
    ///
    /// Acquiring a target refreshes its budget back to this value.
    pub frame_budget: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self { frame_budget: 4 }
    }
}

// ---------------------------------------------------------------------------
// HotReloadSettings
// ---------------------------------------------------------------------------

/// Shader source hot-reload polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadSettings {
    pub enabled: bool,
    /// File modification times are checked every `interval_ticks` ticks.
    pub interval_ticks: u32,
}

impl Default for HotReloadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ticks: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// MarshalSettings
// ---------------------------------------------------------------------------

/// Render-thread worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarshalSettings {
    /// Name given to the OS thread that owns the device.
    pub thread_name: String,
    /// How long the worker sleeps waiting for work, and how often
    /// `wait_idle` re-checks the queue.
    pub poll_interval_ms: u64,
}

impl Default for MarshalSettings {
    fn default() -> Self {
        Self {
            thread_name: "render-thread".to_string(),
            poll_interval_ms: 1,
        }
    }
}

impl MarshalSettings {
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// CacheSettings
// ---------------------------------------------------------------------------

/// Global configuration for the resource context.
///
/// | Section      | Description                         | Default                  |
/// |--------------|-------------------------------------|--------------------------|
/// | `pool`       | Render-target pool budget           | 4 ticks                  |
/// | `hot_reload` | Shader source change polling        | enabled, every 30 ticks  |
/// | `marshal`    | Render-thread name and poll period  | `render-thread`, 1 ms    |
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub pool: PoolSettings,
    pub hot_reload: HotReloadSettings,
    pub marshal: MarshalSettings,
}

impl CacheSettings {
    /// Parses settings from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::default();
        assert_eq!(settings.pool.frame_budget, 4);
        assert!(settings.hot_reload.enabled);
        assert_eq!(settings.hot_reload.interval_ticks, 30);
        assert_eq!(settings.marshal.thread_name, "render-thread");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings =
            CacheSettings::from_json_str(r#"{ "pool": { "frame_budget": 6 } }"#).unwrap();
        assert_eq!(settings.pool.frame_budget, 6);
        assert_eq!(settings.hot_reload, HotReloadSettings::default());
        assert_eq!(settings.marshal, MarshalSettings::default());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(CacheSettings::from_json_str("{ pool: 3").is_err());
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let marshal = MarshalSettings {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(marshal.poll_interval(), Duration::from_millis(1));
    }
}
