#![allow(dead_code)]

use ampwise::clock::ManualClock;
use ampwise::config::Config;
use ampwise::coordinator::{ControlAction, ControlGrant, PolicyKind};
use ampwise::host::InMemoryHost;
use ampwise::policies::PolicyContext;
use ampwise::ChargingAutomation;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

pub const SWITCH: &str = "switch.wallbox";
pub const CURRENT: &str = "number.wallbox_current";
pub const STATUS: &str = "sensor.wallbox_status";
pub const EV_SOC: &str = "sensor.ev_soc";
pub const HOME_SOC: &str = "sensor.home_battery_soc";
pub const SOLAR: &str = "sensor.solar_power";
pub const CONSUMPTION: &str = "sensor.house_power";
pub const GRID: &str = "sensor.grid_import";
pub const FORECAST: &str = "sensor.pv_forecast_tomorrow";
pub const OVERRIDE: &str = "input_boolean.charging_override";
pub const BLOCKER_ON: &str = "input_boolean.smart_blocker";
pub const NIGHT_ON: &str = "input_boolean.night_charge";
pub const NIGHT_TIME: &str = "input_datetime.night_charge_time";
pub const BALANCER_ON: &str = "input_boolean.priority_balancer";
pub const PROFILE: &str = "input_select.charging_profile";
pub const GRID_THRESHOLD: &str = "input_number.grid_import_threshold";
pub const GRID_DELAY: &str = "input_number.grid_import_delay";
pub const DROP_DELAY: &str = "input_number.surplus_drop_delay";
pub const USE_BATTERY: &str = "input_boolean.use_home_battery";
pub const BATTERY_MIN: &str = "input_number.home_battery_min_soc";
/// Monday helpers; the test dates below are Mondays
pub const EV_TARGET_MON: &str = "input_number.ev_min_soc_monday";
pub const HOME_TARGET_MON: &str = "input_number.home_min_soc_monday";

/// 2024-06-03 (a Monday) at the given UTC time
pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, h, m, s).unwrap()
}

/// UTC site with sunrise 07:30 and sunset 21:00, every role bound
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.logging.file_output = false;
    cfg.location.timezone = "UTC".to_string();
    cfg.location.sunrise_override = Some("07:30".to_string());
    cfg.location.sunset_override = Some("21:00".to_string());

    let e = &mut cfg.entities;
    let s = |v: &str| Some(v.to_string());
    e.charger_switch = s(SWITCH);
    e.charger_current = s(CURRENT);
    e.charger_status = s(STATUS);
    e.ev_soc = s(EV_SOC);
    e.home_battery_soc = s(HOME_SOC);
    e.solar_production = s(SOLAR);
    e.home_consumption = s(CONSUMPTION);
    e.grid_import = s(GRID);
    e.pv_forecast_tomorrow = s(FORECAST);
    e.override_switch = s(OVERRIDE);
    e.blocker_enabled = s(BLOCKER_ON);
    e.night_charge_enabled = s(NIGHT_ON);
    e.night_charge_time = s(NIGHT_TIME);
    e.balancer_enabled = s(BALANCER_ON);
    e.charging_profile = s(PROFILE);
    e.grid_import_threshold = s(GRID_THRESHOLD);
    e.grid_import_delay = s(GRID_DELAY);
    e.surplus_drop_delay = s(DROP_DELAY);
    e.use_home_battery = s(USE_BATTERY);
    e.home_battery_min_soc = s(BATTERY_MIN);
    e.ev_min_soc.monday = s(EV_TARGET_MON);
    e.home_min_soc.monday = s(HOME_TARGET_MON);
    cfg
}

/// Charger connected and idle at 16 A, toggles on, daytime sensors
pub fn seed_defaults(host: &InMemoryHost) {
    host.seed([
        (SWITCH, "off"),
        (CURRENT, "16"),
        (STATUS, "connected"),
        (EV_SOC, "40"),
        (HOME_SOC, "80"),
        (SOLAR, "3000"),
        (CONSUMPTION, "500"),
        (GRID, "0"),
        (FORECAST, "10"),
        (OVERRIDE, "off"),
        (BLOCKER_ON, "on"),
        (NIGHT_ON, "on"),
        (NIGHT_TIME, "01:00:00"),
        (BALANCER_ON, "on"),
        (PROFILE, "solar_surplus"),
        (GRID_THRESHOLD, "50"),
        (GRID_DELAY, "30"),
        (DROP_DELAY, "60"),
        (USE_BATTERY, "off"),
        (BATTERY_MIN, "20"),
        (EV_TARGET_MON, "80"),
        (HOME_TARGET_MON, "50"),
    ]);
}

pub struct Harness {
    pub host: Arc<InMemoryHost>,
    pub clock: Arc<ManualClock>,
    pub config: Config,
    pub automation: ChargingAutomation,
    pub ctx: PolicyContext,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_config(now, test_config())
    }

    pub fn with_config(now: DateTime<Utc>, config: Config) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let host = Arc::new(InMemoryHost::new().with_clock(clock.clone()));
        seed_defaults(&host);
        let automation =
            ChargingAutomation::new(config.clone(), host.clone(), clock.clone()).unwrap();
        let ctx = automation.context().unwrap();
        Self {
            host,
            clock,
            config,
            automation,
            ctx,
        }
    }

    pub fn grant(&self, policy: PolicyKind, action: ControlAction) -> ControlGrant {
        self.ctx
            .coordinator
            .request(policy, action, "test")
            .into_grant()
            .expect("grant")
    }

    pub fn advance_secs(&self, secs: u64) {
        self.clock.advance(std::time::Duration::from_secs(secs));
    }
}
