//! Core configuration file, loaded once at startup by a binary wiring up a
//! [`crate::control::Core`]. Nested `#[derive(Deserialize)]` sections, each
//! with `#[serde(default = "...")]` so a minimal TOML file is valid and only
//! the fields an operator cares about need to be present.

use serde::Deserialize;

/// Top-level configuration for a core-hosting binary.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub sensors: SensorsSection,
    #[serde(default)]
    pub strings: StringsSection,
    #[serde(default)]
    pub outputs: OutputsSection,
}

impl CoreConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {:?}: {e}", path))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse config {:?}: {e}", path))?;
        Ok(config)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            worker: WorkerSection::default(),
            sensors: SensorsSection::default(),
            strings: StringsSection::default(),
            outputs: OutputsSection::default(),
        }
    }
}

/// Overrides for the realtime worker's tick cadence and scheduling, mainly
/// useful for running the core under test or in a container without
/// `CAP_SYS_NICE`.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_tick_us")]
    pub tick_us: u64,
    #[serde(default = "default_true")]
    pub realtime: bool,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self { tick_us: default_tick_us(), realtime: true }
    }
}

fn default_tick_us() -> u64 {
    mgurdy_protocol::WORKER_INTERVAL_US
}

/// Device paths for the key and wheel sensor character devices. Empty means
/// "use a null/synthetic source" -- useful for demos and tests that don't
/// have real hardware attached.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SensorsSection {
    #[serde(default)]
    pub key_device: String,
    #[serde(default)]
    pub wheel_device: String,
}

/// Default roles, channels, and base notes for the ten addressable strings,
/// applied once at startup before any control-plane reconfiguration.
#[derive(Debug, Clone, Deserialize)]
pub struct StringsSection {
    #[serde(default = "default_melody_base_notes")]
    pub melody_base_notes: [i32; 3],
    #[serde(default = "default_drone_base_notes")]
    pub drone_base_notes: [i32; 3],
    #[serde(default = "default_trompette_base_notes")]
    pub trompette_base_notes: [i32; 3],
}

impl Default for StringsSection {
    fn default() -> Self {
        Self {
            melody_base_notes: default_melody_base_notes(),
            drone_base_notes: default_drone_base_notes(),
            trompette_base_notes: default_trompette_base_notes(),
        }
    }
}

fn default_melody_base_notes() -> [i32; 3] {
    [60, 60, 60]
}

fn default_drone_base_notes() -> [i32; 3] {
    [48, 48, 48]
}

fn default_trompette_base_notes() -> [i32; 3] {
    [48, 48, 48]
}

/// Default token-bucket rate for newly added outputs, in the same units as
/// `Output::tokens_per_tick`. Mirrors the `speed` enum from the control-plane
/// `config_midi_output` operation: `normal` (3000/tick), `fast` (6000/tick),
/// `unlimited` (0, meaning no rate limit).
#[derive(Debug, Clone, Deserialize)]
pub struct OutputsSection {
    #[serde(default = "default_token_rate")]
    pub default_tokens_per_tick: i32,
}

impl Default for OutputsSection {
    fn default() -> Self {
        Self { default_tokens_per_tick: default_token_rate() }
    }
}

fn default_token_rate() -> i32 {
    3000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let config: CoreConfig = toml::from_str("").unwrap();
        assert_eq!(config.worker.tick_us, mgurdy_protocol::WORKER_INTERVAL_US);
        assert!(config.worker.realtime);
        assert_eq!(config.outputs.default_tokens_per_tick, 3000);
    }

    #[test]
    fn test_partial_toml_overrides_only_given_fields() {
        let toml = r#"
            [worker]
            tick_us = 2000
        "#;
        let config: CoreConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.worker.tick_us, 2000);
        assert!(config.worker.realtime, "unset fields keep their default");
    }

    #[test]
    fn test_sensors_section_defaults_to_empty_paths() {
        let config = CoreConfig::default();
        assert_eq!(config.sensors.key_device, "");
        assert_eq!(config.sensors.wheel_device, "");
    }
}
