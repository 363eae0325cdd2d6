use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

/// How static (object-less) events are routed to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StaticEventFanOut {
    /// Stop at the first script whose instances produced a call. Static events are
    /// expected to be subscribed from a single script.
    #[default]
    FirstScript,
    AllScripts,
}

impl StaticEventFanOut {
    pub fn label(self) -> &'static str {
        match self {
            StaticEventFanOut::FirstScript => "first_script",
            StaticEventFanOut::AllScripts => "all_scripts",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "first_script" | "first" => Some(StaticEventFanOut::FirstScript),
            "all_scripts" | "all" => Some(StaticEventFanOut::AllScripts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub static_event_fan_out: StaticEventFanOut,
    #[serde(default = "RuntimeConfig::default_zero_tolerance")]
    pub zero_tolerance: f32,
    #[serde(default = "RuntimeConfig::default_max_diagnostics")]
    pub max_diagnostics: usize,
    #[serde(default = "RuntimeConfig::default_log_stack_traces")]
    pub log_stack_traces: bool,
    #[serde(default = "RuntimeConfig::default_resave_deprecated_assets")]
    pub resave_deprecated_assets: bool,
    #[serde(default = "RuntimeConfig::default_hot_reload_debounce_ms")]
    pub hot_reload_debounce_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigOverrides {
    pub static_event_fan_out: Option<StaticEventFanOut>,
    pub zero_tolerance: Option<f32>,
}

impl RuntimeConfig {
    fn default_zero_tolerance() -> f32 {
        1e-6
    }

    const fn default_max_diagnostics() -> usize {
        1024
    }

    const fn default_log_stack_traces() -> bool {
        true
    }

    const fn default_resave_deprecated_assets() -> bool {
        true
    }

    const fn default_hot_reload_debounce_ms() -> u64 {
        100
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RuntimeConfigOverrides) {
        if let Some(fan_out) = overrides.static_event_fan_out {
            self.static_event_fan_out = fan_out;
        }
        if let Some(tolerance) = overrides.zero_tolerance {
            self.zero_tolerance = tolerance;
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            static_event_fan_out: StaticEventFanOut::default(),
            zero_tolerance: Self::default_zero_tolerance(),
            max_diagnostics: Self::default_max_diagnostics(),
            log_stack_traces: Self::default_log_stack_traces(),
            resave_deprecated_assets: Self::default_resave_deprecated_assets(),
            hot_reload_debounce_ms: Self::default_hot_reload_debounce_ms(),
        }
    }
}

impl RuntimeConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.static_event_fan_out.is_none() && self.zero_tolerance.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.static_event_fan_out.is_some() {
            fields.push("static_event_fan_out");
        }
        if self.zero_tolerance.is_some() {
            fields.push("zero_tolerance");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str(r#"{ "static_event_fan_out": "all_scripts" }"#).unwrap();
        assert_eq!(cfg.static_event_fan_out, StaticEventFanOut::AllScripts);
        assert_eq!(cfg.max_diagnostics, 1024);
        assert!(cfg.log_stack_traces);
        assert_eq!(cfg.hot_reload_debounce_ms, 100);
    }

    #[test]
    fn load_reports_path_on_parse_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = RuntimeConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
        let cfg = RuntimeConfig::load_or_default(file.path());
        assert_eq!(cfg.static_event_fan_out, StaticEventFanOut::FirstScript);
    }

    #[test]
    fn overrides_replace_selected_fields() {
        let mut cfg = RuntimeConfig::default();
        let overrides = RuntimeConfigOverrides { static_event_fan_out: None, zero_tolerance: Some(0.01) };
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.zero_tolerance, 0.01);
        assert_eq!(overrides.applied_fields(), vec!["zero_tolerance"]);
    }
}
