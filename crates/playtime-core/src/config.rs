use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timing policy and feature flags consumed by the tracking engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Pause after spawn before deciding which process to monitor, so a
    /// launcher can exec or replace itself (in milliseconds)
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// How often the foreground window owner is sampled (in milliseconds)
    #[serde(default = "default_focus_poll_interval_ms")]
    pub focus_poll_interval_ms: u64,

    /// How often focus state is re-derived to repair a dropped transition
    /// (in milliseconds)
    #[serde(default = "default_focus_revalidate_interval_ms")]
    pub focus_revalidate_interval_ms: u64,

    /// Capacity of the focus event channel; events are dropped when full
    #[serde(default = "default_focus_event_capacity")]
    pub focus_event_capacity: usize,

    /// Granularity of active-time accumulation (in milliseconds)
    #[serde(default = "default_active_tick_ms")]
    pub active_tick_ms: u64,

    /// Length of each bounded blocking wait inside the process watcher
    /// (in milliseconds)
    #[serde(default = "default_watcher_wait_slice_ms")]
    pub watcher_wait_slice_ms: u64,

    /// How long to wait for the user to pick a process (in seconds)
    #[serde(default = "default_selection_timeout_secs")]
    pub selection_timeout_secs: u64,

    /// Hard cap on how long a single session is monitored (in seconds)
    #[serde(default = "default_session_ceiling_secs")]
    pub session_ceiling_secs: u64,

    /// Sessions shorter than this are deleted instead of recorded (in seconds)
    #[serde(default = "default_min_session_secs")]
    pub min_session_secs: u64,

    /// Count only focused time unless a game overrides it
    #[serde(default)]
    pub active_time_only: bool,

    /// Back up save data after every recorded session of a game that
    /// declares a save path
    #[serde(default)]
    pub auto_backup: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            focus_poll_interval_ms: default_focus_poll_interval_ms(),
            focus_revalidate_interval_ms: default_focus_revalidate_interval_ms(),
            focus_event_capacity: default_focus_event_capacity(),
            active_tick_ms: default_active_tick_ms(),
            watcher_wait_slice_ms: default_watcher_wait_slice_ms(),
            selection_timeout_secs: default_selection_timeout_secs(),
            session_ceiling_secs: default_session_ceiling_secs(),
            min_session_secs: default_min_session_secs(),
            active_time_only: false,
            auto_backup: false,
        }
    }
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: TrackerConfig =
            serde_json::from_str(json).context("Failed to parse tracker configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tracker configuration from {path:?}"))?;
        Self::from_json_str(&raw)
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.focus_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("focus_poll_interval_ms must be greater than 0"));
        }

        if self.focus_revalidate_interval_ms < self.focus_poll_interval_ms {
            return Err(anyhow::anyhow!(
                "focus_revalidate_interval_ms cannot be shorter than focus_poll_interval_ms"
            ));
        }

        if self.focus_event_capacity == 0 {
            return Err(anyhow::anyhow!("focus_event_capacity must be at least 1"));
        }

        if self.active_tick_ms == 0 {
            return Err(anyhow::anyhow!("active_tick_ms must be greater than 0"));
        }

        if self.watcher_wait_slice_ms == 0 {
            return Err(anyhow::anyhow!("watcher_wait_slice_ms must be greater than 0"));
        }

        if self.watcher_wait_slice_ms > 5_000 {
            return Err(anyhow::anyhow!(
                "watcher_wait_slice_ms should not exceed 5 seconds or stop requests go unnoticed"
            ));
        }

        if self.session_ceiling_secs == 0 {
            return Err(anyhow::anyhow!("session_ceiling_secs must be greater than 0"));
        }

        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn focus_poll_interval(&self) -> Duration {
        Duration::from_millis(self.focus_poll_interval_ms)
    }

    pub fn focus_revalidate_interval(&self) -> Duration {
        Duration::from_millis(self.focus_revalidate_interval_ms)
    }

    pub fn active_tick(&self) -> Duration {
        Duration::from_millis(self.active_tick_ms)
    }

    pub fn watcher_wait_slice(&self) -> Duration {
        Duration::from_millis(self.watcher_wait_slice_ms)
    }

    pub fn selection_timeout(&self) -> Duration {
        Duration::from_secs(self.selection_timeout_secs)
    }

    pub fn session_ceiling(&self) -> Duration {
        Duration::from_secs(self.session_ceiling_secs)
    }

    /// Active-only mode for a game, honouring its per-game override
    pub fn counts_active_time_only(&self, game_override: Option<bool>) -> bool {
        game_override.unwrap_or(self.active_time_only)
    }
}

// Default value functions for serde
fn default_settle_delay_ms() -> u64 {
    1_000
}
fn default_focus_poll_interval_ms() -> u64 {
    500
}
fn default_focus_revalidate_interval_ms() -> u64 {
    30_000
}
fn default_focus_event_capacity() -> usize {
    16
}
fn default_active_tick_ms() -> u64 {
    1_000
}
fn default_watcher_wait_slice_ms() -> u64 {
    1_000
}
fn default_selection_timeout_secs() -> u64 {
    5 * 60
}
fn default_session_ceiling_secs() -> u64 {
    24 * 60 * 60
}
fn default_min_session_secs() -> u64 {
    60
}
