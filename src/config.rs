//! Configuration management for Ampwise
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Values that the host exposes as helpers
//! (toggles, thresholds, daily targets) are not stored here; only the entity
//! ids that bind them are.

use crate::error::{AmpwiseError, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Site location used for sunrise/sunset computation
    pub location: LocationConfig,

    /// Charger actuator limits and sequencing timings
    pub charger: ChargerConfig,

    /// EV vs home battery balancing fallbacks
    pub balancer: BalancerConfig,

    /// Smart charger blocker settings
    pub blocker: BlockerConfig,

    /// Scheduled overnight charging settings
    pub night_charge: NightChargeConfig,

    /// Solar surplus optimisation settings
    pub solar_surplus: SolarSurplusConfig,

    /// Binding of logical roles to host entity ids
    pub entities: EntitiesConfig,

    /// Initial entity states for the daemon's in-memory host
    pub simulation: SimulationConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional override for console output level
    pub console_level: Option<String>,

    /// Optional override for file output level
    pub file_level: Option<String>,

    /// Directory (or file path whose parent is used) for rotated log files
    pub file: String,

    /// Whether to write rotated log files at all
    pub file_output: bool,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Site location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Latitude in degrees, north positive
    pub latitude: f64,

    /// Longitude in degrees, east positive
    pub longitude: f64,

    /// IANA timezone name used for schedules and weekday resolution
    pub timezone: String,

    /// Fixed local sunrise (HH:MM) replacing the astronomical computation
    pub sunrise_override: Option<String>,

    /// Fixed local sunset (HH:MM) replacing the astronomical computation
    pub sunset_override: Option<String>,
}

/// Charger actuator limits and sequencing timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargerConfig {
    /// Permitted current levels in amps, strictly ascending
    pub amperage_levels: Vec<u32>,

    /// Nominal single-phase voltage used to convert watts to amps
    pub nominal_voltage: f64,

    /// Minimum spacing between two executed charger operations
    pub min_operation_interval_seconds: f64,

    /// Maximum number of operations waiting for the rate limit
    pub queue_capacity: usize,

    /// Timeout applied to every individual actuator call
    pub service_timeout_seconds: f64,

    /// Safe decrease: wait after turning off before setting the new current
    pub decrease_off_delay_seconds: f64,

    /// Safe decrease: wait after setting the new current before turning on
    pub decrease_set_delay_seconds: f64,

    /// Start: wait after setting the current before turning on
    pub amperage_stabilization_seconds: f64,

    /// Start: wait after turning on before reading state back
    pub start_sequence_seconds: f64,

    /// Stop and direct set: wait after the command before reading state back
    pub command_delay_seconds: f64,
}

/// Priority balancer fallbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// EV minimum SOC used when a weekday helper is unavailable
    pub default_ev_min_soc: f64,

    /// Home battery minimum SOC used when a weekday helper is unavailable
    pub default_home_min_soc: f64,
}

/// Smart charger blocker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockerConfig {
    /// Block when solar production is below this many watts
    pub solar_threshold_watts: f64,

    /// Periodic re-check interval; 0 keeps the blocker edge-triggered only
    pub poll_interval_seconds: u64,
}

/// Night smart charge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NightChargeConfig {
    /// Current used for overnight charging (must be a permitted level)
    pub amperage: u32,

    /// Tomorrow's PV forecast at or above this allows the home battery as source
    pub solar_forecast_threshold_kwh: f64,

    /// Evaluation tick
    pub tick_interval_seconds: u64,
}

/// Solar surplus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolarSurplusConfig {
    /// Evaluation interval
    pub interval_seconds: u64,

    /// Extra surplus above the lowest level required before starting from idle
    pub start_hysteresis_watts: f64,

    /// Level switched to when surplus drops and the home battery may assist
    pub battery_fallback_amperage: u32,
}

/// Per-weekday helper entity ids
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WeekdayEntities {
    pub monday: Option<String>,
    pub tuesday: Option<String>,
    pub wednesday: Option<String>,
    pub thursday: Option<String>,
    pub friday: Option<String>,
    pub saturday: Option<String>,
    pub sunday: Option<String>,
}

/// Binding of logical roles to host entity ids
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EntitiesConfig {
    /// Charger on/off switch
    pub charger_switch: Option<String>,
    /// Charger current setpoint (number entity)
    pub charger_current: Option<String>,
    /// Charger status sensor (free / connected / charging ...)
    pub charger_status: Option<String>,

    /// EV state of charge (%)
    pub ev_soc: Option<String>,
    /// Home battery state of charge (%)
    pub home_battery_soc: Option<String>,
    /// Solar production (W)
    pub solar_production: Option<String>,
    /// Home consumption (W)
    pub home_consumption: Option<String>,
    /// Grid import (W)
    pub grid_import: Option<String>,
    /// PV forecast for tomorrow (kWh)
    pub pv_forecast_tomorrow: Option<String>,

    /// Global override switch
    pub override_switch: Option<String>,
    /// Smart blocker enable toggle
    pub blocker_enabled: Option<String>,
    /// Night smart charge enable toggle
    pub night_charge_enabled: Option<String>,
    /// Night smart charge scheduled start time
    pub night_charge_time: Option<String>,
    /// Priority balancer enable toggle
    pub balancer_enabled: Option<String>,
    /// Charging profile selector
    pub charging_profile: Option<String>,

    /// Grid import threshold (W)
    pub grid_import_threshold: Option<String>,
    /// Grid import trigger delay (s)
    pub grid_import_delay: Option<String>,
    /// Surplus drop trigger delay (s)
    pub surplus_drop_delay: Option<String>,
    /// Whether the home battery may assist solar charging
    pub use_home_battery: Option<String>,
    /// Home battery minimum SOC for assisting (%)
    pub home_battery_min_soc: Option<String>,

    /// EV minimum SOC per weekday
    pub ev_min_soc: WeekdayEntities,
    /// Home battery minimum SOC per weekday
    pub home_min_soc: WeekdayEntities,
}

/// Initial states for the in-memory host used by the daemon
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimulationConfig {
    /// entity id -> raw state
    pub states: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first existing default location
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os("AMPWISE_CONFIG") {
            return Self::from_file(path);
        }

        let default_paths = ["ampwise.yaml", "/etc/ampwise/config.yaml"];
        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Self::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let levels = &self.charger.amperage_levels;
        if levels.is_empty() {
            return Err(AmpwiseError::validation(
                "charger.amperage_levels",
                "At least one level is required",
            ));
        }
        if levels[0] == 0 || levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AmpwiseError::validation(
                "charger.amperage_levels",
                "Levels must be positive and strictly ascending",
            ));
        }
        if !levels.contains(&self.night_charge.amperage) {
            return Err(AmpwiseError::validation(
                "night_charge.amperage",
                "Must be one of charger.amperage_levels",
            ));
        }
        if !levels.contains(&self.solar_surplus.battery_fallback_amperage) {
            return Err(AmpwiseError::validation(
                "solar_surplus.battery_fallback_amperage",
                "Must be one of charger.amperage_levels",
            ));
        }

        if self.charger.nominal_voltage <= 0.0 {
            return Err(AmpwiseError::validation(
                "charger.nominal_voltage",
                "Must be positive",
            ));
        }
        if self.charger.queue_capacity == 0 {
            return Err(AmpwiseError::validation(
                "charger.queue_capacity",
                "Must be greater than 0",
            ));
        }
        for (field, value) in [
            (
                "charger.min_operation_interval_seconds",
                self.charger.min_operation_interval_seconds,
            ),
            (
                "charger.service_timeout_seconds",
                self.charger.service_timeout_seconds,
            ),
            (
                "charger.decrease_off_delay_seconds",
                self.charger.decrease_off_delay_seconds,
            ),
            (
                "charger.decrease_set_delay_seconds",
                self.charger.decrease_set_delay_seconds,
            ),
            (
                "charger.amperage_stabilization_seconds",
                self.charger.amperage_stabilization_seconds,
            ),
            (
                "charger.start_sequence_seconds",
                self.charger.start_sequence_seconds,
            ),
            ("charger.command_delay_seconds", self.charger.command_delay_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AmpwiseError::validation(field, "Must be a non-negative number"));
            }
        }
        if self.charger.service_timeout_seconds == 0.0 {
            return Err(AmpwiseError::validation(
                "charger.service_timeout_seconds",
                "Must be greater than 0",
            ));
        }

        if self.night_charge.tick_interval_seconds == 0 {
            return Err(AmpwiseError::validation(
                "night_charge.tick_interval_seconds",
                "Must be greater than 0",
            ));
        }
        if self.solar_surplus.interval_seconds == 0 {
            return Err(AmpwiseError::validation(
                "solar_surplus.interval_seconds",
                "Must be greater than 0",
            ));
        }

        if !(-90.0..=90.0).contains(&self.location.latitude) {
            return Err(AmpwiseError::validation(
                "location.latitude",
                "Must be within [-90, 90]",
            ));
        }
        if !(-180.0..=180.0).contains(&self.location.longitude) {
            return Err(AmpwiseError::validation(
                "location.longitude",
                "Must be within [-180, 180]",
            ));
        }
        self.location.tz()?;
        self.location.sunrise_override_time()?;
        self.location.sunset_override_time()?;

        Ok(())
    }
}

impl LocationConfig {
    /// Parsed timezone
    pub fn tz(&self) -> Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            AmpwiseError::validation("location.timezone".to_string(), format!("{e}"))
        })
    }

    /// Parsed fixed sunrise, if configured
    pub fn sunrise_override_time(&self) -> Result<Option<NaiveTime>> {
        parse_optional_time("location.sunrise_override", self.sunrise_override.as_deref())
    }

    /// Parsed fixed sunset, if configured
    pub fn sunset_override_time(&self) -> Result<Option<NaiveTime>> {
        parse_optional_time("location.sunset_override", self.sunset_override.as_deref())
    }
}

fn parse_optional_time(field: &str, raw: Option<&str>) -> Result<Option<NaiveTime>> {
    match raw {
        None => Ok(None),
        Some(s) => crate::host::parse_time_of_day(s).map(Some).ok_or_else(|| {
            AmpwiseError::validation(field.to_string(), format!("Invalid time '{s}'"))
        }),
    }
}

/// Negative or non-finite values (rejected by `validate`) read as zero
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl ChargerConfig {
    pub fn min_operation_interval(&self) -> Duration {
        seconds(self.min_operation_interval_seconds)
    }

    pub fn service_timeout(&self) -> Duration {
        seconds(self.service_timeout_seconds)
    }

    pub fn decrease_off_delay(&self) -> Duration {
        seconds(self.decrease_off_delay_seconds)
    }

    pub fn decrease_set_delay(&self) -> Duration {
        seconds(self.decrease_set_delay_seconds)
    }

    pub fn amperage_stabilization(&self) -> Duration {
        seconds(self.amperage_stabilization_seconds)
    }

    pub fn start_sequence(&self) -> Duration {
        seconds(self.start_sequence_seconds)
    }

    pub fn command_delay(&self) -> Duration {
        seconds(self.command_delay_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(
            config.charger.amperage_levels,
            vec![6, 8, 10, 13, 16, 20, 24, 32]
        );
        assert!((config.charger.nominal_voltage - 230.0).abs() < f64::EPSILON);
        assert_eq!(config.solar_surplus.interval_seconds, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.charger.amperage_levels = vec![6, 10, 8];
        assert!(config.validate().is_err());

        config = Config::default();
        config.charger.queue_capacity = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.night_charge.amperage = 11;
        assert!(config.validate().is_err());

        config = Config::default();
        config.location.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.location.sunrise_override = Some("25:99".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            config.charger.queue_capacity,
            deserialized.charger.queue_capacity
        );
        assert_eq!(config.location.timezone, deserialized.location.timezone);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "charger:\n  nominal_voltage: 240\nentities:\n  charger_switch: switch.wallbox\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!((config.charger.nominal_voltage - 240.0).abs() < f64::EPSILON);
        assert_eq!(config.charger.queue_capacity, 10);
        assert_eq!(
            config.entities.charger_switch.as_deref(),
            Some("switch.wallbox")
        );
    }
}
