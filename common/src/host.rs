//! Narrow interfaces the controller needs from the home-automation host.
//!
//! The core never blocks on the host: switch commands are fire-and-forget,
//! state changes and fired timers come back in through
//! [`ComfortController::handle_state_change`] and
//! [`ComfortController::handle_timer`].
//!
//! [`ComfortController::handle_state_change`]: crate::ComfortController::handle_state_change
//! [`ComfortController::handle_timer`]: crate::ComfortController::handle_timer

use chrono::{DateTime, Utc};

use crate::types::ThermostatStatus;

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";
pub const STATE_OPEN: &str = "open";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCommand {
    TurnOn,
    TurnOff,
}

impl SwitchCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledTask {
    DeferredEvaluate,
    OpeningSettled(String),
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

pub trait StateReader {
    fn entity_state(&self, entity_id: &str) -> Option<String>;
}

pub trait SwitchChannel {
    fn call_switch(&mut self, entity_id: &str, command: SwitchCommand);
}

pub trait EventFeed {
    fn subscribe(&mut self, entity_ids: &[String]) -> SubscriptionHandle;
    fn unsubscribe(&mut self, handle: SubscriptionHandle);
}

pub trait Scheduler {
    fn schedule_at(&mut self, at: DateTime<Utc>, task: ScheduledTask) -> TimerHandle;
    fn cancel(&mut self, handle: TimerHandle);
}

pub trait StateSink {
    fn write_state(&mut self, status: &ThermostatStatus);
}

pub trait Host: Clock + StateReader + SwitchChannel + EventFeed + Scheduler + StateSink {}

impl<T> Host for T where T: Clock + StateReader + SwitchChannel + EventFeed + Scheduler + StateSink {}

/// Switches report `on`; openings report either `on` or `open`.
pub fn is_on_state(state: Option<&str>) -> bool {
    matches!(state, Some(value) if value.eq_ignore_ascii_case(STATE_ON))
}

pub fn is_open_state(state: Option<&str>) -> bool {
    matches!(state, Some(value) if value.eq_ignore_ascii_case(STATE_ON) || value.eq_ignore_ascii_case(STATE_OPEN))
}
