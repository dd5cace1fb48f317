use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    HeatCool,
    FanOnly,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::HeatCool => "heat_cool",
            Self::FanOnly => "fan_only",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "heat" => Some(Self::Heat),
            "cool" => Some(Self::Cool),
            "heat_cool" => Some(Self::HeatCool),
            "fan_only" => Some(Self::FanOnly),
            _ => None,
        }
    }

    pub fn permits_heating(self) -> bool {
        matches!(self, Self::Heat | Self::HeatCool)
    }

    pub fn permits_cooling(self) -> bool {
        matches!(self, Self::Cool | Self::HeatCool)
    }

    /// Dual-band modes read `target_low`/`target_high` instead of `target`.
    pub fn is_dual_band(self) -> bool {
        self == Self::HeatCool
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    Off,
    On,
    Auto,
}

impl FanMode {
    pub const ALL: [FanMode; 3] = [FanMode::Off, FanMode::On, FanMode::Auto];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Auto => "auto",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "on" => Some(Self::On),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacAction {
    Off,
    Idle,
    Heating,
    Cooling,
    Fan,
}

impl HvacAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
            Self::Fan => "fan",
        }
    }

    pub fn is_climate_active(self) -> bool {
        matches!(self, Self::Heating | Self::Cooling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[default]
    #[serde(rename = "°C", alias = "C", alias = "celsius")]
    Celsius,
    #[serde(rename = "°F", alias = "F", alias = "fahrenheit")]
    Fahrenheit,
    #[serde(rename = "K", alias = "kelvin")]
    Kelvin,
}

impl TemperatureUnit {
    pub fn default_min(self) -> f32 {
        match self {
            Self::Celsius => 7.0,
            Self::Fahrenheit => 40.0,
            Self::Kelvin => 280.0,
        }
    }

    pub fn default_max(self) -> f32 {
        match self {
            Self::Celsius => 35.0,
            Self::Fahrenheit => 80.0,
            Self::Kelvin => 308.0,
        }
    }
}

/// Attributes written out on every state change so a restarted controller
/// can resume its cycle timing and manual settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_stop: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hvac_mode: Option<HvacMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_mode: Option<FanMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_temperature_low: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_temperature_high: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThermostatStatus {
    pub name: String,
    #[serde(rename = "currentTemperature")]
    pub current_temperature: Option<f32>,
    #[serde(rename = "hvacMode")]
    pub hvac_mode: HvacMode,
    #[serde(rename = "hvacAction")]
    pub hvac_action: HvacAction,
    #[serde(rename = "hvacModes")]
    pub hvac_modes: Vec<HvacMode>,
    #[serde(rename = "fanMode")]
    pub fan_mode: FanMode,
    #[serde(rename = "fanModes")]
    pub fan_modes: Vec<FanMode>,
    #[serde(rename = "presetMode")]
    pub preset_mode: Option<String>,
    #[serde(rename = "presetModes")]
    pub preset_modes: Vec<String>,
    #[serde(rename = "targetTemperature")]
    pub target_temperature: Option<f32>,
    #[serde(rename = "targetTemperatureLow")]
    pub target_temperature_low: Option<f32>,
    #[serde(rename = "targetTemperatureHigh")]
    pub target_temperature_high: Option<f32>,
    #[serde(rename = "dualBand")]
    pub dual_band: bool,
    #[serde(rename = "temperatureUnit")]
    pub temperature_unit: TemperatureUnit,
    #[serde(rename = "minTemp")]
    pub min_temp: f32,
    #[serde(rename = "maxTemp")]
    pub max_temp: f32,
    #[serde(rename = "targetTemperatureStep")]
    pub target_temperature_step: f32,
    #[serde(rename = "anyOpeningOpen")]
    pub any_opening_open: bool,
    #[serde(rename = "deferralPending")]
    pub deferral_pending: bool,
    pub attributes: PersistedState,
}
