use chrono::{DateTime, Duration, Utc};

use crate::error::ThermostatError;

/// Minimum runtime / cooldown guard for the shared heating/cooling circuit.
///
/// Timestamps are absolute UTC so they survive a restart through
/// [`PersistedState`](crate::PersistedState).
#[derive(Debug, Clone)]
pub struct CycleGuard {
    min_runtime: Option<Duration>,
    min_cooldown: Option<Duration>,
    last_start: Option<DateTime<Utc>>,
    last_stop: Option<DateTime<Utc>>,
    initialized: bool,
}

impl CycleGuard {
    pub fn new(min_runtime: Option<Duration>, min_cooldown: Option<Duration>) -> Self {
        Self {
            min_runtime,
            min_cooldown,
            last_start: None,
            last_stop: None,
            initialized: false,
        }
    }

    pub fn initialize(&mut self, last_start: Option<DateTime<Utc>>, last_stop: Option<DateTime<Utc>>) {
        self.last_start = last_start;
        self.last_stop = last_stop;
        self.initialized = true;
    }

    pub fn last_start(&self) -> Option<DateTime<Utc>> {
        self.last_start
    }

    pub fn last_stop(&self) -> Option<DateTime<Utc>> {
        self.last_stop
    }

    pub fn can_start(&self, now: DateTime<Utc>) -> Result<bool, ThermostatError> {
        self.ensure_initialized()?;
        Ok(match (self.last_stop, self.min_cooldown) {
            (Some(stop), Some(cooldown)) => now >= stop + cooldown,
            _ => true,
        })
    }

    pub fn can_stop(&self, now: DateTime<Utc>) -> Result<bool, ThermostatError> {
        self.ensure_initialized()?;
        Ok(match (self.last_start, self.min_runtime) {
            (Some(start), Some(runtime)) => now >= start + runtime,
            _ => true,
        })
    }

    pub fn remaining_start_time(&self, now: DateTime<Utc>) -> Result<Duration, ThermostatError> {
        self.ensure_initialized()?;
        let stop = self
            .last_stop
            .ok_or(ThermostatError::MissingCycleTimestamp("stop"))?;
        let cooldown = self
            .min_cooldown
            .ok_or(ThermostatError::MissingCycleDuration("cooldown"))?;
        Ok(stop + cooldown - now)
    }

    pub fn remaining_stop_time(&self, now: DateTime<Utc>) -> Result<Duration, ThermostatError> {
        self.ensure_initialized()?;
        let start = self
            .last_start
            .ok_or(ThermostatError::MissingCycleTimestamp("start"))?;
        let runtime = self
            .min_runtime
            .ok_or(ThermostatError::MissingCycleDuration("runtime"))?;
        Ok(start + runtime - now)
    }

    pub fn cycle_started(&mut self, now: DateTime<Utc>) {
        self.last_start = Some(now);
    }

    pub fn cycle_ended(&mut self, now: DateTime<Utc>) {
        self.last_stop = Some(now);
    }

    fn ensure_initialized(&self) -> Result<(), ThermostatError> {
        if self.initialized {
            Ok(())
        } else {
            Err(ThermostatError::NotInitialized("cycle guard"))
        }
    }
}
