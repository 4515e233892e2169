//! Normalized thermostat state shared by both Salus backends.
//!
//! The mobile-app API and the web portal report the device in different
//! formats. Both are converted into a single [`State`] record which is what the
//! [`crate::coordinator::Coordinator`] publishes on every refresh.

use std::fmt;

use clap::ValueEnum;

/// Lowest target temperature accepted by the thermostat, in °C.
pub const MIN_TEMP: f64 = 5.0;
/// Highest target temperature accepted by the thermostat, in °C.
pub const MAX_TEMP: f64 = 35.0;
/// Lowest freeze protection temperature, in °C.
pub const FREEZE_PROTECTION_MIN_TEMP: f64 = 5.0;
/// Highest freeze protection temperature, in °C.
pub const FREEZE_PROTECTION_MAX_TEMP: f64 = 12.0;
/// Lowest sensor offset, in °C.
pub const TEMPERATURE_OFFSET_MIN: f64 = -3.0;
/// Highest sensor offset, in °C.
pub const TEMPERATURE_OFFSET_MAX: f64 = 3.0;

/// Sensor offsets supported by the device.
///
/// The thermostat stores the offset as an index into this table.
pub const TEMPERATURE_OFFSET_VALUES: [f64; 13] = [
    -3.0, -2.5, -2.0, -1.5, -1.0, -0.5, 0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0,
];

/// Returns the offset stored at `index`, if any.
pub fn offset_from_index(index: usize) -> Option<f64> {
    TEMPERATURE_OFFSET_VALUES.get(index).copied()
}

/// Returns the device index of an offset value.
///
/// Only exact table values are accepted, they are all multiples of 0.5.
pub fn offset_index(value: f64) -> Option<usize> {
    TEMPERATURE_OFFSET_VALUES.iter().position(|v| *v == value)
}

/// Heating mode of the thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HvacMode {
    /// The thermostat regulates the room temperature.
    Heat,
    /// The thermostat is switched off.
    Off,
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HvacMode::Heat => write!(f, "heat"),
            HvacMode::Off => write!(f, "off"),
        }
    }
}

/// What the boiler relay is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacAction {
    Heating,
    Idle,
}

impl fmt::Display for HvacAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HvacAction::Heating => write!(f, "heating"),
            HvacAction::Idle => write!(f, "idle"),
        }
    }
}

/// Switching hysteresis of the thermostat.
///
/// Variants are declared in display order. The device code of the first two
/// options is swapped, see [`TemperatureSpan::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TemperatureSpan {
    #[value(name = "0.25")]
    Quarter,
    #[value(name = "0.5")]
    Half,
    #[value(name = "1.0")]
    One,
    #[value(name = "1.5")]
    OneAndHalf,
    #[value(name = "2.0")]
    Two,
}

impl TemperatureSpan {
    /// All options in display order.
    pub fn all() -> [TemperatureSpan; 5] {
        [
            TemperatureSpan::Quarter,
            TemperatureSpan::Half,
            TemperatureSpan::One,
            TemperatureSpan::OneAndHalf,
            TemperatureSpan::Two,
        ]
    }

    /// Value written to and read from the `S15` attribute.
    pub fn code(&self) -> u8 {
        match self {
            TemperatureSpan::Quarter => 1,
            TemperatureSpan::Half => 0,
            TemperatureSpan::One => 2,
            TemperatureSpan::OneAndHalf => 3,
            TemperatureSpan::Two => 4,
        }
    }

    /// Parses a device code, `None` if the device reports an unknown value.
    pub fn from_code(code: u8) -> Option<TemperatureSpan> {
        TemperatureSpan::all().into_iter().find(|s| s.code() == code)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TemperatureSpan::Quarter => "Hysteresis ±0.25°C",
            TemperatureSpan::Half => "Hysteresis ±0.5°C",
            TemperatureSpan::One => "Hysteresis ±1.0°C",
            TemperatureSpan::OneAndHalf => "Hysteresis ±1.5°C",
            TemperatureSpan::Two => "Hysteresis ±2.0°C",
        }
    }
}

/// The state of the thermostat.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// Measured room temperature in °C
    pub current_temperature: f64,
    /// Temperature the thermostat tries to reach in °C
    pub target_temperature: f64,
    /// Freeze protection temperature in °C
    pub frost: f64,
    /// Current relay activity
    pub action: HvacAction,
    /// Heating mode
    pub mode: HvacMode,
    /// Whether hot water production is enabled
    pub hot_water_enabled: bool,
    /// Switching hysteresis
    ///
    /// Only reported by the mobile application API
    pub temperature_span: Option<TemperatureSpan>,
    /// Sensor offset in °C
    ///
    /// Only reported by the mobile application API
    pub temperature_offset: Option<f64>,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "current={:.1}°C, target={:.1}°C, frost={:.1}°C, mode={}, action={}, hot_water={}",
            self.current_temperature,
            self.target_temperature,
            self.frost,
            self.mode,
            self.action,
            if self.hot_water_enabled { "on" } else { "off" }
        )?;
        if let Some(span) = self.temperature_span {
            write!(f, ", span={}", span.label())?;
        }
        if let Some(offset) = self.temperature_offset {
            write!(f, ", offset={:.1}°C", offset)?;
        }
        Ok(())
    }
}
