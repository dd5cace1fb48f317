use std::collections::{BTreeMap, HashSet};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    settings::{ComfortSettings, Presets, SettingsError},
    types::{FanMode, HvacMode, TemperatureUnit},
};

pub const DEFAULT_TEMP_STEP: f32 = 1.0;
pub const DEFAULT_TEMP_TOLERANCE: f32 = 0.75;
pub const DEFAULT_CYCLE_COOLDOWN_MS: u64 = 300_000;
pub const DEFAULT_OPENING_DELAY_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one of heater_switch, cooler_switch or fan_switch is required")]
    NoSwitchConfigured,
    #[error("temp_min ({min}) must be below temp_max ({max})")]
    InvalidTemperatureBounds { min: f32, max: f32 },
    #[error("temp_tolerance must be a finite, non-negative number, got {0}")]
    InvalidTolerance(f32),
    #[error("temp_step must be a finite, positive number, got {0}")]
    InvalidStep(f32),
    #[error("{0} must be a positive duration")]
    ZeroDuration(&'static str),
    #[error("opening {0} must have a positive delay")]
    ZeroOpeningDelay(String),
    #[error("opening {0} is configured more than once")]
    DuplicateOpening(String),
    #[error("preset {0} is configured more than once")]
    DuplicatePreset(String),
    #[error("initial_preset {0} does not name a configured preset")]
    UnknownInitialPreset(String),
    #[error("an hvac_mode is required for {0}")]
    HvacModeRequired(String),
    #[error("a target temperature range cannot be used for {0}")]
    RangeNotAllowed(String),
    #[error("a single target temperature cannot be used with heat_cool for {0}")]
    TargetNotAllowed(String),
    #[error("a lower bound for the target temperature range is required for {0}")]
    MissingLowBound(String),
    #[error("an upper bound for the target temperature range is required for {0}")]
    MissingHighBound(String),
    #[error("target temperature required for {0}")]
    TargetRequired(String),
    #[error("{name} uses hvac mode {} but no switch is configured for it", .mode.as_str())]
    UnavailableMode { name: String, mode: HvacMode },
    #[error("{name} target {value} is outside the range {min} to {max}")]
    TargetOutOfRange {
        name: String,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error("invalid settings for {name}: {source}")]
    Settings {
        name: String,
        #[source]
        source: SettingsError,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default)]
    pub target_temp: Option<f32>,
    #[serde(default)]
    pub target_temp_low: Option<f32>,
    #[serde(default)]
    pub target_temp_high: Option<f32>,
    #[serde(default)]
    pub hvac_mode: Option<HvacMode>,
    #[serde(default)]
    pub fan_mode: Option<FanMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetConfig {
    pub name: String,
    #[serde(flatten)]
    pub settings: SettingsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningConfig {
    pub entity_id: String,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermostatConfig {
    pub name: String,
    pub temperature_sensor: String,
    #[serde(default)]
    pub heater_switch: Option<String>,
    #[serde(default)]
    pub cooler_switch: Option<String>,
    #[serde(default)]
    pub fan_switch: Option<String>,
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,
    #[serde(default)]
    pub temp_min: Option<f32>,
    #[serde(default)]
    pub temp_max: Option<f32>,
    #[serde(default = "default_temp_step")]
    pub temp_step: f32,
    #[serde(default = "default_temp_tolerance")]
    pub temp_tolerance: f32,
    #[serde(default)]
    pub cycle_min_runtime_ms: Option<u64>,
    #[serde(default = "default_cycle_cooldown_ms")]
    pub cycle_min_cooldown_ms: Option<u64>,
    #[serde(default)]
    pub openings: Vec<OpeningConfig>,
    #[serde(default = "default_opening_delay_ms")]
    pub default_opening_delay_ms: u64,
    #[serde(default)]
    pub presets: Vec<PresetConfig>,
    #[serde(default = "default_preset_hvac_mode")]
    pub default_preset_hvac_mode: HvacMode,
    #[serde(default = "default_preset_fan_mode")]
    pub default_preset_fan_mode: FanMode,
    #[serde(default)]
    pub initial_preset: Option<String>,
    #[serde(default)]
    pub initial_settings: Option<SettingsConfig>,
}

fn default_temp_step() -> f32 {
    DEFAULT_TEMP_STEP
}

fn default_temp_tolerance() -> f32 {
    DEFAULT_TEMP_TOLERANCE
}

fn default_cycle_cooldown_ms() -> Option<u64> {
    Some(DEFAULT_CYCLE_COOLDOWN_MS)
}

fn default_opening_delay_ms() -> u64 {
    DEFAULT_OPENING_DELAY_MS
}

fn default_preset_hvac_mode() -> HvacMode {
    HvacMode::Off
}

fn default_preset_fan_mode() -> FanMode {
    FanMode::Off
}

impl ThermostatConfig {
    pub fn new(name: impl Into<String>, temperature_sensor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temperature_sensor: temperature_sensor.into(),
            heater_switch: None,
            cooler_switch: None,
            fan_switch: None,
            temperature_unit: TemperatureUnit::default(),
            temp_min: None,
            temp_max: None,
            temp_step: DEFAULT_TEMP_STEP,
            temp_tolerance: DEFAULT_TEMP_TOLERANCE,
            cycle_min_runtime_ms: None,
            cycle_min_cooldown_ms: Some(DEFAULT_CYCLE_COOLDOWN_MS),
            openings: Vec::new(),
            default_opening_delay_ms: DEFAULT_OPENING_DELAY_MS,
            presets: Vec::new(),
            default_preset_hvac_mode: HvacMode::Off,
            default_preset_fan_mode: FanMode::Off,
            initial_preset: None,
            initial_settings: None,
        }
    }

    pub fn temp_min(&self) -> f32 {
        self.temp_min
            .unwrap_or_else(|| self.temperature_unit.default_min())
    }

    pub fn temp_max(&self) -> f32 {
        self.temp_max
            .unwrap_or_else(|| self.temperature_unit.default_max())
    }

    pub fn min_runtime(&self) -> Option<Duration> {
        self.cycle_min_runtime_ms.map(millis)
    }

    pub fn min_cooldown(&self) -> Option<Duration> {
        self.cycle_min_cooldown_ms.map(millis)
    }

    pub fn default_opening_delay(&self) -> Duration {
        millis(self.default_opening_delay_ms)
    }

    pub fn opening_delays(&self) -> Vec<(String, Option<Duration>)> {
        self.openings
            .iter()
            .map(|opening| (opening.entity_id.clone(), opening.delay_ms.map(millis)))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heater_switch.is_none() && self.cooler_switch.is_none() && self.fan_switch.is_none()
        {
            return Err(ConfigError::NoSwitchConfigured);
        }

        let (min, max) = (self.temp_min(), self.temp_max());
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ConfigError::InvalidTemperatureBounds { min, max });
        }
        if !self.temp_tolerance.is_finite() || self.temp_tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(self.temp_tolerance));
        }
        if !self.temp_step.is_finite() || self.temp_step <= 0.0 {
            return Err(ConfigError::InvalidStep(self.temp_step));
        }

        if self.cycle_min_runtime_ms == Some(0) {
            return Err(ConfigError::ZeroDuration("cycle_min_runtime_ms"));
        }
        if self.cycle_min_cooldown_ms == Some(0) {
            return Err(ConfigError::ZeroDuration("cycle_min_cooldown_ms"));
        }
        if self.default_opening_delay_ms == 0 {
            return Err(ConfigError::ZeroDuration("default_opening_delay_ms"));
        }

        let mut seen = HashSet::new();
        for opening in &self.openings {
            if opening.delay_ms == Some(0) {
                return Err(ConfigError::ZeroOpeningDelay(opening.entity_id.clone()));
            }
            if !seen.insert(opening.entity_id.as_str()) {
                return Err(ConfigError::DuplicateOpening(opening.entity_id.clone()));
            }
        }

        self.presets()?;
        self.initial_settings()?;
        Ok(())
    }

    pub fn supports_mode(&self, mode: HvacMode) -> bool {
        match mode {
            HvacMode::Off => true,
            HvacMode::FanOnly => self.fan_switch.is_some(),
            HvacMode::Heat => self.heater_switch.is_some(),
            HvacMode::Cool => self.cooler_switch.is_some(),
            HvacMode::HeatCool => self.heater_switch.is_some() && self.cooler_switch.is_some(),
        }
    }

    pub fn presets(&self) -> Result<Presets, ConfigError> {
        let mut entries = BTreeMap::new();
        for preset in &self.presets {
            let settings = process_settings(
                &preset.settings,
                &preset.name,
                Some(self.default_preset_hvac_mode),
                self.default_preset_fan_mode,
            )?;
            self.check_settings(&preset.name, &settings)?;
            if entries.insert(preset.name.clone(), settings).is_some() {
                return Err(ConfigError::DuplicatePreset(preset.name.clone()));
            }
        }
        Ok(Presets::new(entries))
    }

    pub fn initial_settings(&self) -> Result<Option<ComfortSettings>, ConfigError> {
        let Some(config) = &self.initial_settings else {
            return Ok(None);
        };
        let settings =
            process_settings(config, "initial_settings", None, self.default_preset_fan_mode)?;
        self.check_settings("initial_settings", &settings)?;
        Ok(Some(settings))
    }

    fn check_settings(&self, name: &str, settings: &ComfortSettings) -> Result<(), ConfigError> {
        if !self.supports_mode(settings.mode()) {
            return Err(ConfigError::UnavailableMode {
                name: name.to_string(),
                mode: settings.mode(),
            });
        }

        let (min, max) = (self.temp_min(), self.temp_max());
        let targets = [settings.target(), settings.target_low(), settings.target_high()];
        if let Some(value) = targets
            .into_iter()
            .flatten()
            .find(|value| *value < min || *value > max)
        {
            return Err(ConfigError::TargetOutOfRange {
                name: name.to_string(),
                value,
                min,
                max,
            });
        }
        Ok(())
    }
}

pub fn process_settings(
    config: &SettingsConfig,
    name: &str,
    fallback_hvac_mode: Option<HvacMode>,
    fallback_fan_mode: FanMode,
) -> Result<ComfortSettings, ConfigError> {
    let hvac_mode = config
        .hvac_mode
        .or(fallback_hvac_mode)
        .ok_or_else(|| ConfigError::HvacModeRequired(name.to_string()))?;
    let fan_mode = config.fan_mode.unwrap_or(fallback_fan_mode);
    let has_range = config.target_temp_low.is_some() || config.target_temp_high.is_some();

    if hvac_mode == HvacMode::HeatCool {
        if config.target_temp.is_some() {
            return Err(ConfigError::TargetNotAllowed(name.to_string()));
        }
        if config.target_temp_low.is_none() {
            return Err(ConfigError::MissingLowBound(name.to_string()));
        }
        if config.target_temp_high.is_none() {
            return Err(ConfigError::MissingHighBound(name.to_string()));
        }
    } else if has_range {
        return Err(ConfigError::RangeNotAllowed(name.to_string()));
    } else if matches!(hvac_mode, HvacMode::Heat | HvacMode::Cool) && config.target_temp.is_none() {
        return Err(ConfigError::TargetRequired(name.to_string()));
    }

    ComfortSettings::new(
        config.target_temp,
        config.target_temp_low,
        config.target_temp_high,
        hvac_mode,
        fan_mode,
    )
    .map_err(|source| ConfigError::Settings {
        name: name.to_string(),
        source,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub topic_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            topic_prefix: "home".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub thermostat: ThermostatConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
}

fn default_http_port() -> u16 {
    8080
}

fn default_startup_delay_ms() -> u64 {
    2_000
}

impl RuntimeConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(raw)?;
        config.thermostat.validate()?;
        Ok(config)
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heat_only() -> ThermostatConfig {
        let mut config = ThermostatConfig::new("Living Room", "sensor.living_room");
        config.heater_switch = Some("switch.heater".to_string());
        config
    }

    #[test]
    fn requires_a_switch() {
        let config = ThermostatConfig::new("Living Room", "sensor.living_room");
        assert!(matches!(config.validate(), Err(ConfigError::NoSwitchConfigured)));
    }

    #[test]
    fn bounds_default_per_unit() {
        let mut config = heat_only();
        config.temperature_unit = TemperatureUnit::Fahrenheit;

        assert_eq!(config.temp_min(), 40.0);
        assert_eq!(config.temp_max(), 80.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_bounds() {
        let mut config = heat_only();
        config.temp_min = Some(30.0);
        config.temp_max = Some(10.0);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTemperatureBounds { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_openings() {
        let mut config = heat_only();
        let door = OpeningConfig {
            entity_id: "binary_sensor.door".to_string(),
            delay_ms: None,
        };
        config.openings = vec![door.clone(), door];

        assert!(matches!(config.validate(), Err(ConfigError::DuplicateOpening(_))));
    }

    #[test]
    fn dual_band_preset_needs_both_bounds() {
        let settings = SettingsConfig {
            target_temp_low: Some(18.0),
            hvac_mode: Some(HvacMode::HeatCool),
            ..SettingsConfig::default()
        };

        let result = process_settings(&settings, "comfort", None, FanMode::Off);
        assert!(matches!(result, Err(ConfigError::MissingHighBound(name)) if name == "comfort"));
    }

    #[test]
    fn target_rejected_in_heat_cool() {
        let settings = SettingsConfig {
            target_temp: Some(21.0),
            target_temp_low: Some(18.0),
            target_temp_high: Some(24.0),
            hvac_mode: Some(HvacMode::HeatCool),
            ..SettingsConfig::default()
        };

        let result = process_settings(&settings, "comfort", None, FanMode::Off);
        assert!(matches!(result, Err(ConfigError::TargetNotAllowed(_))));
    }

    #[test]
    fn range_rejected_in_single_modes() {
        let settings = SettingsConfig {
            target_temp_low: Some(18.0),
            target_temp_high: Some(24.0),
            hvac_mode: Some(HvacMode::Heat),
            ..SettingsConfig::default()
        };

        let result = process_settings(&settings, "away", None, FanMode::Off);
        assert!(matches!(result, Err(ConfigError::RangeNotAllowed(_))));
    }

    #[test]
    fn initial_settings_require_hvac_mode() {
        let mut config = heat_only();
        config.initial_settings = Some(SettingsConfig {
            target_temp: Some(21.0),
            ..SettingsConfig::default()
        });

        assert!(matches!(
            config.initial_settings(),
            Err(ConfigError::HvacModeRequired(_))
        ));
    }

    #[test]
    fn presets_fall_back_to_default_modes() {
        let mut config = heat_only();
        config.default_preset_hvac_mode = HvacMode::Heat;
        config.default_preset_fan_mode = FanMode::Auto;
        config.presets = vec![PresetConfig {
            name: "home".to_string(),
            settings: SettingsConfig {
                target_temp: Some(21.0),
                ..SettingsConfig::default()
            },
        }];

        let home = config.presets().unwrap().get("home").unwrap();
        assert_eq!(home.mode(), HvacMode::Heat);
        assert_eq!(home.fan_mode(), FanMode::Auto);
    }

    #[test]
    fn parses_runtime_config_with_defaults() {
        let raw = br#"{
            "thermostat": {
                "name": "Office",
                "temperature_sensor": "sensor.office",
                "heater_switch": "switch.office_heater",
                "openings": [{ "entity_id": "binary_sensor.office_window", "delay_ms": 10000 }],
                "presets": [{ "name": "eco", "target_temp": 17.5, "hvac_mode": "heat" }]
            }
        }"#;

        let runtime = RuntimeConfig::from_json(raw).unwrap();
        let thermostat = &runtime.thermostat;

        assert_eq!(runtime.http_port, 8080);
        assert_eq!(runtime.network.mqtt_port, 1883);
        assert_eq!(thermostat.temp_tolerance, DEFAULT_TEMP_TOLERANCE);
        assert_eq!(thermostat.min_cooldown(), Some(Duration::minutes(5)));
        assert_eq!(thermostat.min_runtime(), None);
        assert_eq!(
            thermostat.opening_delays(),
            vec![("binary_sensor.office_window".to_string(), Some(Duration::seconds(10)))]
        );
        assert_eq!(thermostat.presets().unwrap().get("eco").unwrap().target(), Some(17.5));
    }

    #[test]
    fn sample_config_is_valid() {
        let runtime =
            RuntimeConfig::from_json(include_bytes!("../../flex-thermostat.sample.json")).unwrap();

        let presets = runtime.thermostat.presets().unwrap();
        assert_eq!(presets.names(), vec!["away", "home", "sleep"]);
        assert!(presets.get("home").unwrap().is_range());
        assert_eq!(runtime.network.topic_prefix, "home");
    }

    #[test]
    fn preset_mode_needs_its_switch() {
        let mut config = heat_only();
        config.presets = vec![PresetConfig {
            name: "summer".to_string(),
            settings: SettingsConfig {
                target_temp: Some(24.0),
                hvac_mode: Some(HvacMode::Cool),
                ..SettingsConfig::default()
            },
        }];

        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnavailableMode { name, mode: HvacMode::Cool }) if name == "summer"
        ));
    }

    #[test]
    fn initial_target_outside_bounds_is_rejected() {
        let mut config = heat_only();
        config.initial_settings = Some(SettingsConfig {
            target_temp: Some(40.0),
            hvac_mode: Some(HvacMode::Heat),
            ..SettingsConfig::default()
        });

        assert!(matches!(
            config.validate(),
            Err(ConfigError::TargetOutOfRange { value, .. }) if value == 40.0
        ));

        config.temp_max = Some(45.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn runtime_config_without_switch_is_rejected() {
        let raw = br#"{ "thermostat": { "name": "Office", "temperature_sensor": "sensor.office" } }"#;
        assert!(matches!(
            RuntimeConfig::from_json(raw),
            Err(ConfigError::NoSwitchConfigured)
        ));
    }
}
