use super::*;

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/var/log/ampwise/ampwise.log".to_string(),
            file_output: true,
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 52.37,
            longitude: 4.90,
            timezone: "Europe/Amsterdam".to_string(),
            sunrise_override: None,
            sunset_override: None,
        }
    }
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            amperage_levels: vec![6, 8, 10, 13, 16, 20, 24, 32],
            nominal_voltage: 230.0,
            min_operation_interval_seconds: 30.0,
            queue_capacity: 10,
            service_timeout_seconds: 10.0,
            decrease_off_delay_seconds: 5.0,
            decrease_set_delay_seconds: 2.0,
            amperage_stabilization_seconds: 2.0,
            start_sequence_seconds: 5.0,
            command_delay_seconds: 2.0,
        }
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            default_ev_min_soc: 50.0,
            default_home_min_soc: 50.0,
        }
    }
}

impl Default for BlockerConfig {
    fn default() -> Self {
        Self {
            solar_threshold_watts: 1000.0,
            poll_interval_seconds: 300,
        }
    }
}

impl Default for NightChargeConfig {
    fn default() -> Self {
        Self {
            amperage: 16,
            solar_forecast_threshold_kwh: 20.0,
            tick_interval_seconds: 60,
        }
    }
}

impl Default for SolarSurplusConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            start_hysteresis_watts: 230.0,
            battery_fallback_amperage: 8,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            location: LocationConfig::default(),
            charger: ChargerConfig::default(),
            balancer: BalancerConfig::default(),
            blocker: BlockerConfig::default(),
            night_charge: NightChargeConfig::default(),
            solar_surplus: SolarSurplusConfig::default(),
            entities: EntitiesConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}
