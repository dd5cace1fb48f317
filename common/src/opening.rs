use std::collections::HashMap;

use chrono::Duration;
use tracing::debug;

use crate::{
    error::ThermostatError,
    host::{is_open_state, Clock, EventFeed, ScheduledTask, Scheduler, StateReader, SubscriptionHandle, TimerHandle},
};

#[derive(Debug, Clone)]
pub struct Opening {
    entity_id: String,
    delay: Duration,
    is_open: bool,
    pending_timer: Option<TimerHandle>,
}

impl Opening {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }
}

/// Tracks door/window sensors and exposes a debounced "any opening open" flag.
///
/// A raw state change only (re)arms that opening's timer. The opening is
/// re-read when the timer fires, so a flicker shorter than the delay never
/// reaches the aggregate.
#[derive(Debug, Clone)]
pub struct OpeningTracker {
    openings: HashMap<String, Opening>,
    any_open: bool,
    initialized: bool,
    subscription: Option<SubscriptionHandle>,
}

impl OpeningTracker {
    pub fn new<I>(configs: I, default_delay: Duration) -> Self
    where
        I: IntoIterator<Item = (String, Option<Duration>)>,
    {
        let openings = configs
            .into_iter()
            .map(|(entity_id, delay)| {
                let opening = Opening {
                    entity_id: entity_id.clone(),
                    delay: delay.unwrap_or(default_delay),
                    is_open: false,
                    pending_timer: None,
                };
                (entity_id, opening)
            })
            .collect();

        Self {
            openings,
            any_open: false,
            initialized: false,
            subscription: None,
        }
    }

    pub fn is_any_opening_open(&self) -> bool {
        self.any_open
    }

    pub fn opening(&self, entity_id: &str) -> Option<&Opening> {
        self.openings.get(entity_id)
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.openings.keys().map(String::as_str)
    }

    pub fn tracks(&self, entity_id: &str) -> bool {
        self.openings.contains_key(entity_id)
    }

    pub fn initialize<H>(&mut self, host: &mut H) -> Result<(), ThermostatError>
    where
        H: StateReader + EventFeed + ?Sized,
    {
        if self.initialized {
            return Err(ThermostatError::AlreadyInitialized("opening tracker"));
        }

        for opening in self.openings.values_mut() {
            opening.is_open = is_open_state(host.entity_state(&opening.entity_id).as_deref());
        }
        self.any_open = self.openings.values().any(Opening::is_open);

        if !self.openings.is_empty() {
            let ids: Vec<String> = self.openings.keys().cloned().collect();
            self.subscription = Some(host.subscribe(&ids));
        }

        self.initialized = true;
        Ok(())
    }

    /// Restarts the debounce timer for `entity_id`. Unknown ids are ignored.
    pub fn handle_state_change<H>(&mut self, host: &mut H, entity_id: &str)
    where
        H: Clock + Scheduler + ?Sized,
    {
        let Some(opening) = self.openings.get_mut(entity_id) else {
            return;
        };

        if let Some(pending) = opening.pending_timer.take() {
            debug!(entity_id, "opening changed again, restarting delay");
            host.cancel(pending);
        } else {
            debug!(entity_id, delay_secs = opening.delay.num_seconds(), "opening changed, starting delay");
        }

        let at = host.now() + opening.delay;
        opening.pending_timer = Some(host.schedule_at(
            at,
            ScheduledTask::OpeningSettled(entity_id.to_string()),
        ));
    }

    /// Re-reads the opening once its delay elapsed. Returns the new aggregate
    /// when it changed; stale timers are ignored.
    pub fn handle_timer<H>(&mut self, host: &H, handle: TimerHandle, entity_id: &str) -> Option<bool>
    where
        H: StateReader + ?Sized,
    {
        let opening = self.openings.get_mut(entity_id)?;
        if opening.pending_timer != Some(handle) {
            debug!(entity_id, "ignoring stale opening timer");
            return None;
        }

        opening.pending_timer = None;
        opening.is_open = is_open_state(host.entity_state(entity_id).as_deref());

        let any_open = self.openings.values().any(Opening::is_open);
        if any_open == self.any_open {
            return None;
        }

        debug!(any_open, "aggregate opening state changed");
        self.any_open = any_open;
        Some(any_open)
    }

    pub fn teardown<H>(&mut self, host: &mut H)
    where
        H: EventFeed + Scheduler + ?Sized,
    {
        if let Some(subscription) = self.subscription.take() {
            host.unsubscribe(subscription);
        }
        for opening in self.openings.values_mut() {
            if let Some(pending) = opening.pending_timer.take() {
                host.cancel(pending);
            }
        }
    }
}
