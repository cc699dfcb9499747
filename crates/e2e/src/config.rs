//! Suite configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::overlay::{builtin_overlays, OverlayType};
use crate::playwright::PlaywrightConfig;

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Browser launch settings
    #[serde(default)]
    pub playwright: PlaywrightConfig,

    /// Popup suppression settings
    #[serde(default)]
    pub popups: PopupConfig,
}

impl SuiteConfig {
    /// Load configuration from file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> E2eResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.popups.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Popup engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PopupConfig {
    #[serde(default)]
    pub timing: TimingConfig,

    /// Defaults for `run_with_suppression`
    #[serde(default)]
    pub suppression: SuppressionOptions,

    /// Defaults for `run_sequence_with_suppression`
    #[serde(default)]
    pub sequence: SequenceOptions,

    /// Overlay table; empty means the built-in definitions
    #[serde(default)]
    pub overlays: Vec<OverlayType>,
}

impl PopupConfig {
    /// The overlay table in dismissal order
    pub fn overlay_types(&self) -> Vec<OverlayType> {
        if self.overlays.is_empty() {
            builtin_overlays()
        } else {
            self.overlays.clone()
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        let mut seen = std::collections::HashSet::new();
        for overlay in &self.overlays {
            if overlay.presence.roots.is_empty() {
                return Err(E2eError::InvalidConfig(format!(
                    "overlay '{}' has no root selectors",
                    overlay.name
                )));
            }
            if !seen.insert(overlay.name.as_str()) {
                return Err(E2eError::InvalidConfig(format!(
                    "overlay '{}' is defined twice",
                    overlay.name
                )));
            }
        }
        if self.suppression.check_interval_ms == 0 || self.sequence.check_interval_ms == 0 {
            return Err(E2eError::InvalidConfig("check_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Per-step timeouts and settle delays, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait after each dismissal attempt before re-checking
    pub settle_ms: u64,

    /// Visibility query timeout
    pub query_timeout_ms: u64,

    /// Click timeout for located controls
    pub interaction_timeout_ms: u64,

    /// Wait after an awaited overlay appears, before dismissing it
    pub appear_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: 300,
            query_timeout_ms: 500,
            interaction_timeout_ms: 1000,
            appear_settle_ms: 500,
        }
    }
}

impl TimingConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn interaction_timeout(&self) -> Duration {
        Duration::from_millis(self.interaction_timeout_ms)
    }

    pub fn appear_settle(&self) -> Duration {
        Duration::from_millis(self.appear_settle_ms)
    }
}

/// Options for running one action under background suppression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionOptions {
    pub check_interval_ms: u64,
    pub max_duration_ms: u64,
    pub dismiss_before: bool,
    pub dismiss_after: bool,
}

impl Default for SuppressionOptions {
    fn default() -> Self {
        Self {
            check_interval_ms: 1000,
            max_duration_ms: 30_000,
            dismiss_before: true,
            dismiss_after: true,
        }
    }
}

impl SuppressionOptions {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

/// Options for running an ordered list of actions under background suppression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceOptions {
    pub check_interval_ms: u64,
    pub max_duration_ms: u64,
    pub dismiss_between: bool,
    /// Pause before the between-actions pass
    pub pause_between_ms: u64,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            check_interval_ms: 1000,
            max_duration_ms: 60_000,
            dismiss_between: true,
            pause_between_ms: 200,
        }
    }
}

impl SequenceOptions {
    pub fn pause_between(&self) -> Duration {
        Duration::from_millis(self.pause_between_ms)
    }

    /// Background timer settings for the whole sequence. A sequence is always
    /// cleared before its first action and after its last.
    pub fn suppression(&self) -> SuppressionOptions {
        SuppressionOptions {
            check_interval_ms: self.check_interval_ms,
            max_duration_ms: self.max_duration_ms,
            dismiss_before: true,
            dismiss_after: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{Tactic, REGION_REDIRECT_DIALOG, SUBSCRIPTION_MODAL};

    #[test]
    fn test_defaults_use_builtin_overlays() {
        let config = SuiteConfig::from_toml("").unwrap();
        let names: Vec<_> = config.popups.overlay_types().into_iter().map(|o| o.name).collect();
        assert_eq!(names, [SUBSCRIPTION_MODAL, REGION_REDIRECT_DIALOG]);
        assert_eq!(config.popups.timing.settle_ms, 300);
        assert!(config.popups.suppression.dismiss_after);
    }

    #[test]
    fn test_parse_custom_overlay() {
        let toml = r##"
[popups.timing]
settle_ms = 150

[popups.suppression]
check_interval_ms = 250

[[popups.overlays]]
name = "cookie-banner"

[popups.overlays.presence]
roots = ["#cookie-banner"]

[[popups.overlays.strategies]]
name = "accept"
kind = "click_control"
selectors = ["#cookie-accept"]
scopes = [{ scope = "root" }, { scope = "inside_open", ancestor = "#cookie-banner" }]

[[popups.overlays.strategies]]
name = "escape"
kind = "press_key"
key = "Escape"

[[popups.overlays.strategies]]
name = "outside"
kind = "click_outside"
backdrops = [".scrim"]
"##;
        let config = SuiteConfig::from_toml(toml).unwrap();
        assert_eq!(config.popups.timing.settle_ms, 150);
        assert_eq!(config.popups.timing.query_timeout_ms, 500);
        assert_eq!(config.popups.suppression.check_interval_ms, 250);
        assert_eq!(config.popups.suppression.max_duration_ms, 30_000);

        let overlays = config.popups.overlay_types();
        assert_eq!(overlays.len(), 1);
        let banner = &overlays[0];
        assert_eq!(banner.strategies.len(), 3);
        assert!(matches!(banner.strategies[1].tactic, Tactic::PressKey { ref key } if key == "Escape"));
        match &banner.strategies[2].tactic {
            Tactic::ClickOutside { backdrops, fallback } => {
                assert_eq!(backdrops, &[".scrim".to_string()]);
                assert_eq!(fallback.x, 10.0);
            }
            other => panic!("unexpected tactic {:?}", other),
        }
    }

    #[test]
    fn test_rejects_duplicate_overlays() {
        let toml = r##"
[[popups.overlays]]
name = "twice"
strategies = []
[popups.overlays.presence]
roots = ["#a"]

[[popups.overlays]]
name = "twice"
strategies = []
[popups.overlays.presence]
roots = ["#b"]
"##;
        let err = SuiteConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, E2eError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_overlay_without_roots() {
        let toml = r##"
[[popups.overlays]]
name = "rootless"
strategies = [{ name = "escape", kind = "press_key", key = "Escape" }]
[popups.overlays.presence]
roots = []
"##;
        let err = SuiteConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("rootless"), "{}", err);
    }

    #[test]
    fn test_rejects_zero_check_interval() {
        let err = SuiteConfig::from_toml("[popups.sequence]\ncheck_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, E2eError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SuiteConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(config.popups.overlays.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("suite.toml");

        let mut config = SuiteConfig::default();
        config.popups.overlays = builtin_overlays();
        config.popups.sequence.pause_between_ms = 50;
        config.save(&path).unwrap();

        let loaded = SuiteConfig::load(&path).unwrap();
        assert_eq!(loaded.popups.overlays, builtin_overlays());
        assert_eq!(loaded.popups.sequence.pause_between_ms, 50);
    }
}
