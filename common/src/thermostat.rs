use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, info_span, warn, Span};

use crate::{
    config::{ConfigError, ThermostatConfig},
    cycle::CycleGuard,
    error::ThermostatError,
    host::{Clock, Host, ScheduledTask, Scheduler, SubscriptionHandle, TimerHandle},
    opening::OpeningTracker,
    settings::{ComfortSettings, Presets},
    switch::SwitchBinding,
    types::{FanMode, HvacAction, HvacMode, PersistedState, TemperatureUnit, ThermostatStatus},
};

const SWITCH_RESYNC_DELAY_SECS: i64 = 30;
const MIN_DEFERRAL_SECS: i64 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub handled: bool,
    pub deferred: bool,
}

impl UpdateOutcome {
    pub const NONE: Self = Self {
        handled: false,
        deferred: false,
    };
    pub const HANDLED: Self = Self {
        handled: true,
        deferred: false,
    };
    pub const DEFERRED: Self = Self {
        handled: false,
        deferred: true,
    };

    pub fn check(self, action: HvacAction) -> Result<(), ThermostatError> {
        if self.handled && self.deferred {
            return Err(ThermostatError::Invariant {
                action,
                reason: "outcome is both handled and deferred",
            });
        }
        if self.deferred && action == HvacAction::Off {
            return Err(ThermostatError::Invariant {
                action,
                reason: "off action cannot be deferred",
            });
        }
        Ok(())
    }
}

impl BitOr for UpdateOutcome {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            handled: self.handled || rhs.handled,
            deferred: self.deferred || rhs.deferred,
        }
    }
}

impl BitOrAssign for UpdateOutcome {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClimateUnit {
    Heater,
    Cooler,
}

impl ClimateUnit {
    fn opposite(self) -> Self {
        match self {
            Self::Heater => Self::Cooler,
            Self::Cooler => Self::Heater,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Heater => "heater",
            Self::Cooler => "cooler",
        }
    }
}

#[derive(Debug)]
pub struct ComfortController {
    name: String,
    span: Span,
    temperature_sensor: String,
    unit: TemperatureUnit,
    temp_min: f32,
    temp_max: f32,
    temp_step: f32,
    tolerance: f32,

    presets: Presets,
    default_hvac_mode: HvacMode,
    default_fan_mode: FanMode,

    settings: ComfortSettings,
    current_preset: Option<String>,
    current_temperature: Option<f32>,
    current_action: HvacAction,

    heater: SwitchBinding,
    cooler: SwitchBinding,
    fan: SwitchBinding,
    cycle: CycleGuard,
    openings: OpeningTracker,

    restored_cycle: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    pending_deferral: Option<TimerHandle>,
    sensor_subscription: Option<SubscriptionHandle>,
    initialized: bool,
    stopped: bool,
}

impl ComfortController {
    pub fn new(config: &ThermostatConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let presets = config.presets()?;

        let (settings, current_preset) = match &config.initial_preset {
            Some(name) => {
                let settings = presets
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownInitialPreset(name.clone()))?;
                (settings, Some(name.clone()))
            }
            None => match config.initial_settings()? {
                Some(settings) => (settings, None),
                None => (ComfortSettings::off(config.default_preset_fan_mode), None),
            },
        };

        Ok(Self {
            name: config.name.clone(),
            span: info_span!("thermostat", name = %config.name),
            temperature_sensor: config.temperature_sensor.clone(),
            unit: config.temperature_unit,
            temp_min: config.temp_min(),
            temp_max: config.temp_max(),
            temp_step: config.temp_step,
            tolerance: config.temp_tolerance,
            presets,
            default_hvac_mode: config.default_preset_hvac_mode,
            default_fan_mode: config.default_preset_fan_mode,
            settings,
            current_preset,
            current_temperature: None,
            current_action: HvacAction::Idle,
            heater: SwitchBinding::new(config.heater_switch.clone()),
            cooler: SwitchBinding::new(config.cooler_switch.clone()),
            fan: SwitchBinding::new(config.fan_switch.clone()),
            cycle: CycleGuard::new(config.min_runtime(), config.min_cooldown()),
            openings: OpeningTracker::new(config.opening_delays(), config.default_opening_delay()),
            restored_cycle: (None, None),
            pending_deferral: None,
            sensor_subscription: None,
            initialized: false,
            stopped: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn temperature_sensor(&self) -> &str {
        &self.temperature_sensor
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn settings(&self) -> &ComfortSettings {
        &self.settings
    }

    pub fn hvac_mode(&self) -> HvacMode {
        self.settings.mode()
    }

    pub fn hvac_action(&self) -> HvacAction {
        self.current_action
    }

    pub fn preset_mode(&self) -> Option<&str> {
        self.current_preset.as_deref()
    }

    pub fn preset_modes(&self) -> Vec<String> {
        self.presets.names()
    }

    pub fn current_temperature(&self) -> Option<f32> {
        self.current_temperature
    }

    pub fn is_any_opening_open(&self) -> bool {
        self.openings.is_any_opening_open()
    }

    pub fn is_deferral_pending(&self) -> bool {
        self.pending_deferral.is_some()
    }

    pub fn watched_entities(&self) -> Vec<String> {
        let mut ids = vec![self.temperature_sensor.clone()];
        for switch in [&self.heater, &self.cooler, &self.fan] {
            if let Some(entity_id) = switch.entity_id() {
                ids.push(entity_id.to_string());
            }
        }
        for entity_id in self.openings.entity_ids() {
            if !ids.iter().any(|id| id == entity_id) {
                ids.push(entity_id.to_string());
            }
        }
        ids
    }

    pub fn available_hvac_modes(&self) -> Vec<HvacMode> {
        let mut modes = vec![HvacMode::Off];
        if self.fan.is_enabled() {
            modes.push(HvacMode::FanOnly);
        }
        if self.heater.is_enabled() {
            modes.push(HvacMode::Heat);
        }
        if self.cooler.is_enabled() {
            modes.push(HvacMode::Cool);
        }
        if self.heater.is_enabled() && self.cooler.is_enabled() {
            modes.push(HvacMode::HeatCool);
        }
        modes
    }

    pub fn available_fan_modes(&self) -> Vec<FanMode> {
        if self.fan.is_enabled() {
            FanMode::ALL.to_vec()
        } else {
            Vec::new()
        }
    }

    pub fn restore(&mut self, persisted: &PersistedState) -> Result<(), ThermostatError> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.ensure_running()?;
        if self.initialized {
            return Err(ThermostatError::AlreadyInitialized("thermostat"));
        }

        self.restored_cycle = (persisted.last_cycle_start, persisted.last_cycle_stop);
        debug!(
            "restored cycle timestamps start={:?} stop={:?}",
            persisted.last_cycle_start, persisted.last_cycle_stop
        );

        if let Some((name, settings)) = persisted
            .preset_mode
            .as_deref()
            .and_then(|name| self.presets.get(name).map(|settings| (name, settings)))
        {
            debug!("restoring preset {name}");
            self.current_preset = Some(name.to_string());
            self.settings = settings;
        } else if let Some(settings) = self.read_manual_settings(persisted) {
            debug!("restoring manual settings {settings:?}");
            self.current_preset = None;
            self.settings = settings;
        }
        Ok(())
    }

    pub fn initialize<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<(), ThermostatError> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.ensure_running()?;
        if self.initialized {
            return Err(ThermostatError::AlreadyInitialized("thermostat"));
        }

        self.current_temperature =
            parse_temperature(host.entity_state(&self.temperature_sensor).as_deref());
        self.sensor_subscription =
            Some(host.subscribe(std::slice::from_ref(&self.temperature_sensor)));

        self.heater.initialize(host)?;
        self.cooler.initialize(host)?;
        self.fan.initialize(host)?;
        self.openings.initialize(host)?;
        let (last_start, last_stop) = self.restored_cycle;
        self.cycle.initialize(last_start, last_stop);

        self.initialized = true;
        info!(
            "thermostat initialized (mode={}, temperature={:?})",
            self.settings.mode().as_str(),
            self.current_temperature
        );

        self.evaluate(host)?;
        Ok(())
    }

    pub fn handle_state_change<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        entity_id: &str,
        new_state: Option<&str>,
    ) -> Result<(), ThermostatError> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.ensure_running()?;
        if entity_id == self.temperature_sensor {
            debug!("temperature sensor updated: {new_state:?}");
            self.current_temperature = parse_temperature(new_state);
            if self.initialized {
                self.evaluate(host)?;
            } else {
                debug!("temperature changed but thermostat hasn't been initialized");
            }
            return Ok(());
        }

        if !self.initialized {
            return Ok(());
        }

        if self.openings.tracks(entity_id) {
            self.openings.handle_state_change(host, entity_id);
            return Ok(());
        }

        let mut changed = false;
        for switch in [&mut self.heater, &mut self.cooler, &mut self.fan] {
            if switch.entity_id() == Some(entity_id) {
                changed |= switch.handle_state_change(new_state)?;
            }
        }
        if changed {
            self.defer_update(host, Duration::seconds(SWITCH_RESYNC_DELAY_SECS));
        }
        Ok(())
    }

    pub fn handle_timer<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        handle: TimerHandle,
        task: &ScheduledTask,
    ) -> Result<(), ThermostatError> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.ensure_running()?;
        match task {
            ScheduledTask::DeferredEvaluate => {
                if self.pending_deferral != Some(handle) {
                    debug!("ignoring stale deferral timer {handle:?}");
                    return Ok(());
                }
                self.pending_deferral = None;
                self.evaluate(host)?;
            }
            ScheduledTask::OpeningSettled(entity_id) => {
                if let Some(any_open) = self.openings.handle_timer(host, handle, entity_id) {
                    info!("openings changed, any open: {any_open}");
                    self.evaluate(host)?;
                }
            }
        }
        Ok(())
    }

    pub fn set_temperature<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        target: Option<f32>,
        target_low: Option<f32>,
        target_high: Option<f32>,
    ) -> Result<(), ThermostatError> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.ensure_running()?;
        let mut updated = self.settings.clone();
        if self.settings.mode().is_dual_band() {
            if target_low.is_none() && target_high.is_none() {
                return Err(ThermostatError::RangeBoundRequired);
            }
            updated.set_range(
                target_low.map(|value| self.clamp_target(value)),
                target_high.map(|value| self.clamp_target(value)),
            )?;
        } else {
            let target = target.ok_or(ThermostatError::TargetRequired)?;
            updated.set_target(self.clamp_target(target))?;
        }

        debug!(
            "target changed to {:?} ({:?} - {:?})",
            updated.target(),
            updated.target_low(),
            updated.target_high()
        );
        self.settings = updated;
        self.current_preset = None;
        self.settings_changed(host)
    }

    pub fn set_hvac_mode<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        mode: HvacMode,
    ) -> Result<(), ThermostatError> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.ensure_running()?;
        if !self.available_hvac_modes().contains(&mode) {
            return Err(ThermostatError::UnsupportedHvacMode(mode));
        }

        debug!("setting hvac mode to {}", mode.as_str());
        self.settings.set_mode(mode)?;
        self.current_preset = None;
        self.settings_changed(host)
    }

    pub fn set_fan_mode<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        fan_mode: FanMode,
    ) -> Result<(), ThermostatError> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.ensure_running()?;
        if !self.fan.is_enabled() {
            return Err(ThermostatError::UnsupportedFanMode(fan_mode));
        }

        debug!("setting fan mode to {}", fan_mode.as_str());
        self.settings.set_fan_mode(fan_mode);
        self.current_preset = None;
        self.settings_changed(host)
    }

    pub fn set_preset_mode<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        preset: &str,
    ) -> Result<(), ThermostatError> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.ensure_running()?;
        let settings = self
            .presets
            .get(preset)
            .ok_or_else(|| ThermostatError::UnknownPreset(preset.to_string()))?;

        debug!("changing preset to {preset}");
        self.settings = settings;
        self.current_preset = Some(preset.to_string());
        self.settings_changed(host)
    }

    /// Returns `None` when nothing had to change.
    pub fn evaluate<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> Result<Option<UpdateOutcome>, ThermostatError> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.ensure_running()?;
        if !self.initialized {
            return Err(ThermostatError::NotInitialized("thermostat"));
        }

        let Some(requested) = self.requested_action() else {
            debug!("no usable temperature reading, skipping evaluation");
            self.write_state(host);
            return Ok(None);
        };

        if requested == self.current_action {
            debug!(
                "current and requested action are both {}, taking no action",
                requested.as_str()
            );
            self.write_state(host);
            return Ok(None);
        }

        debug!(
            "current action ({}) differs from requested action ({})",
            self.current_action.as_str(),
            requested.as_str()
        );

        let mut outcome = self.reconcile_climate(host, requested)?;
        if !outcome.deferred {
            outcome |= self.reconcile_fan(host, requested)?;
        }
        outcome.check(requested)?;

        debug!(
            "handle action result: deferred={} handled={}",
            outcome.deferred, outcome.handled
        );

        if outcome.handled || requested == HvacAction::Off {
            info!(
                "hvac action {} -> {}",
                self.current_action.as_str(),
                requested.as_str()
            );
            self.current_action = requested;
        }

        self.write_state(host);
        Ok(Some(outcome))
    }

    /// Every later request or event is refused with [`ThermostatError::Stopped`].
    pub fn teardown<H: Host + ?Sized>(&mut self, host: &mut H) {
        let span = self.span.clone();
        let _guard = span.enter();

        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(pending) = self.pending_deferral.take() {
            host.cancel(pending);
        }
        self.openings.teardown(host);
        self.heater.teardown(host);
        self.cooler.teardown(host);
        self.fan.teardown(host);
        if let Some(subscription) = self.sensor_subscription.take() {
            host.unsubscribe(subscription);
        }
        info!("thermostat torn down");
    }

    pub fn persisted_state(&self) -> PersistedState {
        let (last_cycle_start, last_cycle_stop) = if self.initialized {
            (self.cycle.last_start(), self.cycle.last_stop())
        } else {
            self.restored_cycle
        };

        let mut state = PersistedState {
            last_cycle_start,
            last_cycle_stop,
            preset_mode: self.current_preset.clone(),
            ..PersistedState::default()
        };

        if self.current_preset.is_none() {
            state.hvac_mode = Some(self.settings.mode());
            state.fan_mode = Some(self.settings.fan_mode());
            state.target_temperature = self.settings.target();
            state.target_temperature_low = self.settings.target_low();
            state.target_temperature_high = self.settings.target_high();
        }
        state
    }

    pub fn status(&self) -> ThermostatStatus {
        ThermostatStatus {
            name: self.name.clone(),
            current_temperature: self.current_temperature,
            hvac_mode: self.settings.mode(),
            hvac_action: self.current_action,
            hvac_modes: self.available_hvac_modes(),
            fan_mode: self.settings.fan_mode(),
            fan_modes: self.available_fan_modes(),
            preset_mode: self.current_preset.clone(),
            preset_modes: self.presets.names(),
            target_temperature: self.settings.target(),
            target_temperature_low: self.settings.target_low(),
            target_temperature_high: self.settings.target_high(),
            dual_band: self.settings.mode().is_dual_band(),
            temperature_unit: self.unit,
            min_temp: self.temp_min,
            max_temp: self.temp_max,
            target_temperature_step: self.temp_step,
            any_opening_open: self.openings.is_any_opening_open(),
            deferral_pending: self.pending_deferral.is_some(),
            attributes: self.persisted_state(),
        }
    }

    fn ensure_running(&self) -> Result<(), ThermostatError> {
        if self.stopped {
            Err(ThermostatError::Stopped("thermostat"))
        } else {
            Ok(())
        }
    }

    fn settings_changed<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<(), ThermostatError> {
        if self.initialized {
            self.evaluate(host)?;
        } else {
            debug!("settings changed but thermostat hasn't been initialized");
        }
        Ok(())
    }

    fn clamp_target(&self, value: f32) -> f32 {
        value.clamp(self.temp_min, self.temp_max)
    }

    fn requested_action(&self) -> Option<HvacAction> {
        let action = match self.settings.mode() {
            HvacMode::Off => HvacAction::Off,
            HvacMode::FanOnly => HvacAction::Fan,
            HvacMode::Heat => {
                let temperature = self.current_temperature?;
                if self.is_heating_required(temperature) {
                    HvacAction::Heating
                } else {
                    HvacAction::Idle
                }
            }
            HvacMode::Cool => {
                let temperature = self.current_temperature?;
                if self.is_cooling_required(temperature) {
                    HvacAction::Cooling
                } else {
                    HvacAction::Idle
                }
            }
            HvacMode::HeatCool => {
                let temperature = self.current_temperature?;
                if self.is_heating_required(temperature) {
                    HvacAction::Heating
                } else if self.is_cooling_required(temperature) {
                    HvacAction::Cooling
                } else {
                    HvacAction::Idle
                }
            }
        };
        Some(action)
    }

    fn is_heating_required(&self, temperature: f32) -> bool {
        self.settings.mode().permits_heating()
            && !self.openings.is_any_opening_open()
            && self
                .settings
                .heating_target()
                .is_some_and(|target| temperature - self.tolerance <= target)
    }

    fn is_cooling_required(&self, temperature: f32) -> bool {
        self.settings.mode().permits_cooling()
            && !self.openings.is_any_opening_open()
            && self
                .settings
                .cooling_target()
                .is_some_and(|target| temperature + self.tolerance >= target)
    }

    fn binding(&self, unit: ClimateUnit) -> &SwitchBinding {
        match unit {
            ClimateUnit::Heater => &self.heater,
            ClimateUnit::Cooler => &self.cooler,
        }
    }

    fn binding_mut(&mut self, unit: ClimateUnit) -> &mut SwitchBinding {
        match unit {
            ClimateUnit::Heater => &mut self.heater,
            ClimateUnit::Cooler => &mut self.cooler,
        }
    }

    fn reconcile_climate<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        requested: HvacAction,
    ) -> Result<UpdateOutcome, ThermostatError> {
        let now = host.now();

        match requested {
            HvacAction::Heating => self.start_climate(host, ClimateUnit::Heater, now),
            HvacAction::Cooling => self.start_climate(host, ClimateUnit::Cooler, now),
            HvacAction::Off => {
                // Off bypasses the runtime guard.
                if self.heater.is_active()? || self.cooler.is_active()? {
                    self.stop_climate(host, now)?;
                }
                Ok(UpdateOutcome::NONE)
            }
            HvacAction::Idle | HvacAction::Fan => {
                if !self.heater.is_active()? && !self.cooler.is_active()? {
                    return Ok(UpdateOutcome::NONE);
                }
                if self.cycle.can_stop(now)? {
                    self.stop_climate(host, now)?;
                    Ok(UpdateOutcome::HANDLED)
                } else {
                    debug!("climate is on but not needed and can't be stopped yet, deferring");
                    let wait = self.cycle.remaining_stop_time(now)?;
                    self.defer_update(host, wait);
                    Ok(UpdateOutcome::DEFERRED)
                }
            }
        }
    }

    fn start_climate<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        unit: ClimateUnit,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, ThermostatError> {
        let opposite = unit.opposite();

        if self.binding(opposite).is_active()? {
            if self.cycle.can_stop(now)? {
                debug!(
                    "{} requested while {} is on, turning it off",
                    unit.as_str(),
                    opposite.as_str()
                );
                self.binding_mut(opposite).turn_off(host)?;
                self.cycle.cycle_ended(now);
            } else {
                debug!(
                    "{} requested while {} is on but can't be stopped, deferring",
                    unit.as_str(),
                    opposite.as_str()
                );
                let wait = self.cycle.remaining_stop_time(now)?;
                self.defer_update(host, wait);
                return Ok(UpdateOutcome::DEFERRED);
            }
        }

        if !self.binding(unit).is_enabled() {
            warn!("{} requested but no switch is configured for it", unit.as_str());
            return Ok(UpdateOutcome::NONE);
        }

        if self.binding(unit).is_active()? {
            warn!("{} requested and is already on, this is unexpected", unit.as_str());
            self.cycle.cycle_started(now);
            return Ok(UpdateOutcome::HANDLED);
        }

        if self.cycle.can_start(now)? {
            debug!("{} requested, turning it on", unit.as_str());
            self.binding_mut(unit).turn_on(host)?;
            self.cycle.cycle_started(now);
            Ok(UpdateOutcome::HANDLED)
        } else {
            debug!("{} requested but can't be started yet, deferring", unit.as_str());
            let wait = self.cycle.remaining_start_time(now)?;
            self.defer_update(host, wait);
            Ok(UpdateOutcome::DEFERRED)
        }
    }

    fn stop_climate<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        now: DateTime<Utc>,
    ) -> Result<(), ThermostatError> {
        if self.heater.turn_off(host)? {
            debug!("turned off heater");
        }
        if self.cooler.turn_off(host)? {
            debug!("turned off cooler");
        }
        self.cycle.cycle_ended(now);
        Ok(())
    }

    fn reconcile_fan<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        requested: HvacAction,
    ) -> Result<UpdateOutcome, ThermostatError> {
        if !self.fan.is_enabled() {
            return Ok(UpdateOutcome::NONE);
        }

        let (wanted, outcome) = match requested {
            HvacAction::Off => (false, UpdateOutcome::NONE),
            HvacAction::Fan => (true, UpdateOutcome::HANDLED),
            _ => {
                let wanted = match self.settings.fan_mode() {
                    FanMode::On => true,
                    FanMode::Off => false,
                    FanMode::Auto => requested.is_climate_active(),
                };
                (wanted, UpdateOutcome::NONE)
            }
        };

        let sent = if wanted {
            self.fan.turn_on(host)?
        } else {
            self.fan.turn_off(host)?
        };
        if sent {
            debug!("fan turned {}", if wanted { "on" } else { "off" });
        }
        Ok(outcome)
    }

    fn defer_update<H>(&mut self, host: &mut H, wait: Duration)
    where
        H: Clock + Scheduler + ?Sized,
    {
        let minimum = Duration::seconds(MIN_DEFERRAL_SECS);
        let wait = if wait < minimum {
            debug!(
                "requested deferral was {}ms, using the {MIN_DEFERRAL_SECS}s minimum",
                wait.num_milliseconds()
            );
            minimum
        } else {
            wait
        };

        if self.pending_deferral.is_some() {
            debug!("deferral requested but one is pending, taking no action");
            return;
        }

        debug!("deferring update for {}s", wait.num_seconds());
        let at = host.now() + wait;
        self.pending_deferral = Some(host.schedule_at(at, ScheduledTask::DeferredEvaluate));
    }

    fn read_manual_settings(&self, persisted: &PersistedState) -> Option<ComfortSettings> {
        let has_range = persisted.target_temperature_low.is_some()
            && persisted.target_temperature_high.is_some();
        if !has_range && persisted.target_temperature.is_none() {
            return None;
        }

        let (low, high) = if has_range {
            (persisted.target_temperature_low, persisted.target_temperature_high)
        } else {
            (None, None)
        };
        let target = if has_range {
            None
        } else {
            persisted.target_temperature
        };

        match ComfortSettings::new(
            target,
            low,
            high,
            persisted.hvac_mode.unwrap_or(self.default_hvac_mode),
            persisted.fan_mode.unwrap_or(self.default_fan_mode),
        ) {
            Ok(settings) => Some(settings),
            Err(err) => {
                warn!("ignoring persisted manual settings: {err}");
                None
            }
        }
    }

    fn write_state<H: Host + ?Sized>(&self, host: &mut H) {
        host.write_state(&self.status());
    }
}

/// Unavailable, non-numeric or non-finite readings count as "no reading".
fn parse_temperature(state: Option<&str>) -> Option<f32> {
    let raw = state?;
    match raw.trim().parse::<f32>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            warn!("temperature sensor reported unusable state {raw:?}");
            None
        }
    }
}
