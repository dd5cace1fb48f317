pub mod config;
pub mod cycle;
pub mod error;
pub mod host;
pub mod opening;
pub mod settings;
pub mod switch;
pub mod thermostat;
pub mod topics;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, NetworkConfig, RuntimeConfig, ThermostatConfig};
pub use cycle::CycleGuard;
pub use error::ThermostatError;
pub use host::{Host, ScheduledTask, SubscriptionHandle, SwitchCommand, TimerHandle};
pub use opening::OpeningTracker;
pub use settings::{ComfortSettings, Presets, SettingsError};
pub use switch::SwitchBinding;
pub use thermostat::{ComfortController, UpdateOutcome};
pub use topics::*;
pub use types::{FanMode, HvacAction, HvacMode, PersistedState, TemperatureUnit, ThermostatStatus};
