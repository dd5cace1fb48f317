use tracing::debug;

use crate::{
    error::ThermostatError,
    host::{is_on_state, EventFeed, StateReader, SubscriptionHandle, SwitchChannel, SwitchCommand},
};

/// One controllable relay (heater, cooler or fan).
///
/// A binding without an entity id is disabled: it never reports active and
/// never issues commands.
#[derive(Debug, Clone)]
pub struct SwitchBinding {
    entity_id: Option<String>,
    active: Option<bool>,
    subscription: Option<SubscriptionHandle>,
}

impl SwitchBinding {
    pub fn new(entity_id: Option<String>) -> Self {
        Self {
            entity_id,
            active: None,
            subscription: None,
        }
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.entity_id.is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_active(&self) -> Result<bool, ThermostatError> {
        self.active
            .ok_or(ThermostatError::NotInitialized("switch"))
    }

    /// Seeds the cached state from the host and starts observing the entity.
    pub fn initialize<H>(&mut self, host: &mut H) -> Result<(), ThermostatError>
    where
        H: StateReader + EventFeed + ?Sized,
    {
        if self.active.is_some() {
            return Err(ThermostatError::AlreadyInitialized("switch"));
        }

        match self.entity_id.clone() {
            Some(entity_id) => {
                let state = host.entity_state(&entity_id);
                self.active = Some(is_on_state(state.as_deref()));
                self.subscription = Some(host.subscribe(std::slice::from_ref(&entity_id)));
            }
            None => self.active = Some(false),
        }
        Ok(())
    }

    /// Returns `true` when a command was sent.
    pub fn turn_on<C>(&mut self, channel: &mut C) -> Result<bool, ThermostatError>
    where
        C: SwitchChannel + ?Sized,
    {
        self.command(channel, SwitchCommand::TurnOn)
    }

    /// Returns `true` when a command was sent.
    pub fn turn_off<C>(&mut self, channel: &mut C) -> Result<bool, ThermostatError>
    where
        C: SwitchChannel + ?Sized,
    {
        self.command(channel, SwitchCommand::TurnOff)
    }

    /// Applies an externally reported state. Returns `true` when it differs
    /// from the cached state, i.e. the switch was changed behind our back.
    pub fn handle_state_change(&mut self, new_state: Option<&str>) -> Result<bool, ThermostatError> {
        let cached = self.is_active()?;
        let reported = is_on_state(new_state);

        if cached == reported {
            debug!(
                entity_id = self.entity_id().unwrap_or_default(),
                active = reported,
                "switch state matches cached state"
            );
            return Ok(false);
        }

        debug!(
            entity_id = self.entity_id().unwrap_or_default(),
            active = reported,
            "switch changed state externally"
        );
        self.active = Some(reported);
        Ok(true)
    }

    pub fn teardown<F>(&mut self, feed: &mut F)
    where
        F: EventFeed + ?Sized,
    {
        if let Some(subscription) = self.subscription.take() {
            feed.unsubscribe(subscription);
        }
    }

    fn command<C>(&mut self, channel: &mut C, command: SwitchCommand) -> Result<bool, ThermostatError>
    where
        C: SwitchChannel + ?Sized,
    {
        let active = self.is_active()?;
        let wanted = command == SwitchCommand::TurnOn;
        let Some(entity_id) = self.entity_id.as_deref() else {
            return Ok(false);
        };
        if active == wanted {
            return Ok(false);
        }

        channel.call_switch(entity_id, command);
        self.active = Some(wanted);
        Ok(true)
    }
}
