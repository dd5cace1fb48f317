use thiserror::Error;

use crate::{
    settings::SettingsError,
    types::{FanMode, HvacAction, HvacMode},
};

#[derive(Debug, Error, PartialEq)]
pub enum ThermostatError {
    #[error("{0} has not been initialized")]
    NotInitialized(&'static str),
    #[error("{0} has already been initialized")]
    AlreadyInitialized(&'static str),
    #[error("{0} has been torn down")]
    Stopped(&'static str),
    #[error("no remaining time without a recorded cycle {0}")]
    MissingCycleTimestamp(&'static str),
    #[error("no remaining time without a minimum {0}")]
    MissingCycleDuration(&'static str),
    #[error("invariant violated while handling {action:?}: {reason}")]
    Invariant {
        action: HvacAction,
        reason: &'static str,
    },
    #[error("preset {0:?} does not exist")]
    UnknownPreset(String),
    #[error("hvac mode {} is not available", .0.as_str())]
    UnsupportedHvacMode(HvacMode),
    #[error("fan mode {} is not available without a fan switch", .0.as_str())]
    UnsupportedFanMode(FanMode),
    #[error("target temperature required in current mode")]
    TargetRequired,
    #[error("at least one temperature bound is required")]
    RangeBoundRequired,
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl ThermostatError {
    /// Errors caused by a rejected user request rather than a logic bug.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownPreset(_)
                | Self::UnsupportedHvacMode(_)
                | Self::UnsupportedFanMode(_)
                | Self::TargetRequired
                | Self::RangeBoundRequired
                | Self::Settings(_)
        )
    }
}
