use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::types::{FanMode, HvacMode};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("a target temperature or range must be specified")]
    MissingTarget,
    #[error("a temperature range needs both a low and a high bound")]
    IncompleteRange,
    #[error("a single target cannot be combined with a range")]
    TargetAndRange,
    #[error("temperature range low bound must not exceed the high bound")]
    InvertedRange,
    #[error("temperature values must be finite")]
    NonFinite,
}

/// Comfort target for the controller: either a single set-point or a
/// low/high band, together with the hvac and fan modes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComfortSettings {
    target: Option<f32>,
    target_low: Option<f32>,
    target_high: Option<f32>,
    mode: HvacMode,
    fan_mode: FanMode,
}

impl ComfortSettings {
    pub fn new(
        target: Option<f32>,
        target_low: Option<f32>,
        target_high: Option<f32>,
        mode: HvacMode,
        fan_mode: FanMode,
    ) -> Result<Self, SettingsError> {
        if [target, target_low, target_high]
            .iter()
            .flatten()
            .any(|value| !value.is_finite())
        {
            return Err(SettingsError::NonFinite);
        }

        match (target, target_low, target_high) {
            (None, None, None) if mode != HvacMode::Off => return Err(SettingsError::MissingTarget),
            (Some(_), None, None) | (None, None, None) => {}
            (None, Some(low), Some(high)) => {
                if low > high {
                    return Err(SettingsError::InvertedRange);
                }
            }
            (Some(_), _, _) => return Err(SettingsError::TargetAndRange),
            _ => return Err(SettingsError::IncompleteRange),
        }

        Ok(Self {
            target,
            target_low,
            target_high,
            mode,
            fan_mode,
        })
    }

    pub fn single(target: f32, mode: HvacMode, fan_mode: FanMode) -> Result<Self, SettingsError> {
        Self::new(Some(target), None, None, mode, fan_mode)
    }

    pub fn range(
        low: f32,
        high: f32,
        mode: HvacMode,
        fan_mode: FanMode,
    ) -> Result<Self, SettingsError> {
        Self::new(None, Some(low), Some(high), mode, fan_mode)
    }

    /// Settings with no target, only valid while the mode is OFF.
    pub fn off(fan_mode: FanMode) -> Self {
        Self {
            target: None,
            target_low: None,
            target_high: None,
            mode: HvacMode::Off,
            fan_mode,
        }
    }

    pub fn target(&self) -> Option<f32> {
        self.target
    }

    pub fn target_low(&self) -> Option<f32> {
        self.target_low
    }

    pub fn target_high(&self) -> Option<f32> {
        self.target_high
    }

    pub fn mode(&self) -> HvacMode {
        self.mode
    }

    pub fn fan_mode(&self) -> FanMode {
        self.fan_mode
    }

    pub fn is_range(&self) -> bool {
        self.target_low.is_some() && self.target_high.is_some()
    }

    /// Threshold the heating condition compares against in the current mode.
    pub fn heating_target(&self) -> Option<f32> {
        if self.mode.is_dual_band() {
            self.target_low
        } else {
            self.target
        }
    }

    /// Threshold the cooling condition compares against in the current mode.
    pub fn cooling_target(&self) -> Option<f32> {
        if self.mode.is_dual_band() {
            self.target_high
        } else {
            self.target
        }
    }

    /// Only OFF may be selected while no target or band is set.
    pub fn set_mode(&mut self, mode: HvacMode) -> Result<(), SettingsError> {
        let has_target = self.target.is_some() || self.is_range();
        if mode != HvacMode::Off && !has_target {
            return Err(SettingsError::MissingTarget);
        }
        self.mode = mode;
        Ok(())
    }

    pub fn set_fan_mode(&mut self, fan_mode: FanMode) {
        self.fan_mode = fan_mode;
    }

    /// Replaces any band with a single set-point.
    pub fn set_target(&mut self, target: f32) -> Result<(), SettingsError> {
        if !target.is_finite() {
            return Err(SettingsError::NonFinite);
        }
        self.target = Some(target);
        self.target_low = None;
        self.target_high = None;
        Ok(())
    }

    /// Replaces any single set-point with a band; absent bounds keep their
    /// current value and the result must be a complete, ordered band.
    pub fn set_range(&mut self, low: Option<f32>, high: Option<f32>) -> Result<(), SettingsError> {
        let low = low.or(self.target_low).ok_or(SettingsError::IncompleteRange)?;
        let high = high.or(self.target_high).ok_or(SettingsError::IncompleteRange)?;
        if !low.is_finite() || !high.is_finite() {
            return Err(SettingsError::NonFinite);
        }
        if low > high {
            return Err(SettingsError::InvertedRange);
        }
        self.target = None;
        self.target_low = Some(low);
        self.target_high = Some(high);
        Ok(())
    }
}

/// Named comfort settings, fixed once the configuration is loaded.
#[derive(Debug, Clone, Default)]
pub struct Presets {
    entries: BTreeMap<String, ComfortSettings>,
}

impl Presets {
    pub fn new(entries: BTreeMap<String, ComfortSettings>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Returns an owned copy so callers can never mutate the stored preset.
    pub fn get(&self, name: &str) -> Option<ComfortSettings> {
        self.entries.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_target_combined_with_range() {
        let result = ComfortSettings::new(
            Some(21.0),
            Some(18.0),
            Some(24.0),
            HvacMode::HeatCool,
            FanMode::Off,
        );
        assert_eq!(result, Err(SettingsError::TargetAndRange));
    }

    #[test]
    fn rejects_missing_target_outside_off() {
        let result = ComfortSettings::new(None, None, None, HvacMode::Heat, FanMode::Off);
        assert_eq!(result, Err(SettingsError::MissingTarget));

        let off = ComfortSettings::new(None, None, None, HvacMode::Off, FanMode::Off);
        assert!(off.is_ok());
    }

    #[test]
    fn rejects_half_a_range() {
        let low_only = ComfortSettings::new(None, Some(18.0), None, HvacMode::HeatCool, FanMode::Off);
        let high_only =
            ComfortSettings::new(None, None, Some(24.0), HvacMode::HeatCool, FanMode::Off);

        assert_eq!(low_only, Err(SettingsError::IncompleteRange));
        assert_eq!(high_only, Err(SettingsError::IncompleteRange));
    }

    #[test]
    fn targets_follow_mode() {
        let mut settings = ComfortSettings::range(18.0, 24.0, HvacMode::HeatCool, FanMode::Auto).unwrap();
        assert_eq!(settings.heating_target(), Some(18.0));
        assert_eq!(settings.cooling_target(), Some(24.0));

        settings.set_mode(HvacMode::Heat).unwrap();
        assert_eq!(settings.heating_target(), None);
    }

    #[test]
    fn set_mode_requires_target_outside_off() {
        let mut settings = ComfortSettings::off(FanMode::Auto);

        assert_eq!(settings.set_mode(HvacMode::Heat), Err(SettingsError::MissingTarget));
        assert_eq!(settings.set_mode(HvacMode::FanOnly), Err(SettingsError::MissingTarget));
        assert_eq!(settings.mode(), HvacMode::Off);

        settings.set_target(21.0).unwrap();
        settings.set_mode(HvacMode::Heat).unwrap();
        assert_eq!(settings.mode(), HvacMode::Heat);
    }

    #[test]
    fn set_range_merges_existing_bound() {
        let mut settings = ComfortSettings::range(18.0, 24.0, HvacMode::HeatCool, FanMode::Off).unwrap();
        settings.set_range(Some(19.5), None).unwrap();

        assert_eq!(settings.target_low(), Some(19.5));
        assert_eq!(settings.target_high(), Some(24.0));
        assert_eq!(settings.target(), None);
    }

    #[test]
    fn set_range_from_single_needs_both_bounds() {
        let mut settings = ComfortSettings::single(21.0, HvacMode::Heat, FanMode::Off).unwrap();
        assert_eq!(
            settings.set_range(Some(18.0), None),
            Err(SettingsError::IncompleteRange)
        );
        assert_eq!(settings.target(), Some(21.0));
    }

    #[test]
    fn preset_lookup_returns_copy() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "home".to_string(),
            ComfortSettings::single(21.0, HvacMode::Heat, FanMode::Auto).unwrap(),
        );
        let presets = Presets::new(entries);

        let mut selected = presets.get("home").unwrap();
        selected.set_target(25.0).unwrap();

        assert_eq!(presets.get("home").unwrap().target(), Some(21.0));
    }
}
