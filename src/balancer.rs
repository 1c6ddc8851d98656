//! Priority balancer
//!
//! Compares EV and home battery state of charge against today's minimum
//! targets and says which one should get energy first. Targets and SOC
//! readings are read fresh on every evaluation; the last verdict is kept for
//! diagnostics only.

use crate::clock::Clock;
use crate::config::{BalancerConfig, EntitiesConfig};
use crate::host::{EntityId, Host, HostExt, WeekdayMap, bind_optional};
use crate::logging::StructuredLogger;
use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Which battery should be charged first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Priority {
    #[serde(rename = "EV")]
    Ev,
    #[serde(rename = "HOME")]
    Home,
    /// Both targets met
    #[serde(rename = "EV_FREE")]
    EvFree,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ev => "EV",
            Self::Home => "HOME",
            Self::EvFree => "EV_FREE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityVerdict {
    pub priority: Priority,
    pub ev_soc: f64,
    pub ev_target: f64,
    pub home_soc: f64,
    pub home_target: f64,
    pub weekday: String,
    pub reason: String,
    pub computed_at: DateTime<Utc>,
}

/// First match wins: EV below target, then home below target
pub fn decide(ev_soc: f64, ev_target: f64, home_soc: f64, home_target: f64) -> Priority {
    if ev_soc < ev_target {
        Priority::Ev
    } else if home_soc < home_target {
        Priority::Home
    } else {
        Priority::EvFree
    }
}

#[derive(Debug, Clone)]
pub struct BalancerHandles {
    pub enabled: Option<EntityId>,
    pub ev_soc: Option<EntityId>,
    pub home_soc: Option<EntityId>,
    pub ev_targets: WeekdayMap<Option<EntityId>>,
    pub home_targets: WeekdayMap<Option<EntityId>>,
}

impl BalancerHandles {
    pub fn bind(entities: &EntitiesConfig) -> Self {
        Self {
            enabled: bind_optional(entities.balancer_enabled.as_ref()),
            ev_soc: bind_optional(entities.ev_soc.as_ref()),
            home_soc: bind_optional(entities.home_battery_soc.as_ref()),
            ev_targets: WeekdayMap::bind(&entities.ev_min_soc),
            home_targets: WeekdayMap::bind(&entities.home_min_soc),
        }
    }
}

pub struct PriorityBalancer {
    host: Arc<dyn Host>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    handles: BalancerHandles,
    defaults: BalancerConfig,
    last: Mutex<Option<PriorityVerdict>>,
    logger: StructuredLogger,
}

impl PriorityBalancer {
    pub fn new(
        host: Arc<dyn Host>,
        clock: Arc<dyn Clock>,
        tz: Tz,
        handles: BalancerHandles,
        defaults: BalancerConfig,
        logger: StructuredLogger,
    ) -> Self {
        if handles.ev_targets.bound_count() < 7 || handles.home_targets.bound_count() < 7 {
            logger.debug("Some weekday targets are unbound, fallback targets apply");
        }
        Self {
            host,
            clock,
            tz,
            handles,
            defaults,
            last: Mutex::new(None),
            logger,
        }
    }

    /// Balancing feature toggle
    pub fn enabled(&self) -> bool {
        self.host.is_enabled(self.handles.enabled.as_ref())
    }

    pub fn today(&self) -> Weekday {
        self.clock.now().with_timezone(&self.tz).weekday()
    }

    pub fn ev_target(&self, day: Weekday) -> f64 {
        self.read_percent(self.handles.ev_targets.get(day).as_ref())
            .unwrap_or(self.defaults.default_ev_min_soc)
    }

    /// Target as read for `day`: an unbound weekday uses the default, a bound
    /// helper that cannot be read gives `None`
    pub fn ev_target_reading(&self, day: Weekday) -> Option<f64> {
        match self.handles.ev_targets.get(day) {
            Some(entity) => self.read_percent(Some(entity)),
            None => Some(self.defaults.default_ev_min_soc),
        }
    }

    pub fn home_target(&self, day: Weekday) -> f64 {
        self.read_percent(self.handles.home_targets.get(day).as_ref())
            .unwrap_or(self.defaults.default_home_min_soc)
    }

    /// Current EV SOC, `None` when unavailable
    pub fn ev_soc(&self) -> Option<f64> {
        self.read_percent(self.handles.ev_soc.as_ref())
    }

    pub fn home_soc(&self) -> Option<f64> {
        self.read_percent(self.handles.home_soc.as_ref())
    }

    /// Recompute the verdict from live readings. A missing EV SOC counts as
    /// empty and a missing home SOC as full, which leans towards the EV.
    pub fn evaluate(&self) -> PriorityVerdict {
        let day = self.today();
        let ev_target = self.ev_target(day);
        let home_target = self.home_target(day);
        let ev_reading = self.ev_soc();
        let home_reading = self.home_soc();
        let ev_soc = ev_reading.unwrap_or(0.0);
        let home_soc = home_reading.unwrap_or(100.0);

        let priority = decide(ev_soc, ev_target, home_soc, home_target);
        let mut reason = match priority {
            Priority::Ev => format!("EV {ev_soc:.0}% below target {ev_target:.0}%"),
            Priority::Home => {
                format!("Home battery {home_soc:.0}% below target {home_target:.0}%")
            }
            Priority::EvFree => format!(
                "EV {ev_soc:.0}% >= {ev_target:.0}% and home {home_soc:.0}% >= {home_target:.0}%"
            ),
        };
        if ev_reading.is_none() {
            reason.push_str(" (EV SOC unavailable)");
        }
        if home_reading.is_none() {
            reason.push_str(" (home SOC unavailable)");
        }

        let verdict = PriorityVerdict {
            priority,
            ev_soc,
            ev_target,
            home_soc,
            home_target,
            weekday: day.to_string(),
            reason,
            computed_at: self.clock.now(),
        };

        let changed = {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = last.as_ref().is_none_or(|l| l.priority != priority);
            *last = Some(verdict.clone());
            changed
        };
        if changed {
            self.logger
                .info(&format!("Priority {priority}: {}", verdict.reason));
        }
        verdict
    }

    /// Verdict of the last evaluation, for display
    pub fn last_verdict(&self) -> Option<PriorityVerdict> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn read_percent(&self, entity: Option<&EntityId>) -> Option<f64> {
        entity
            .and_then(|e| self.host.read_f64(e))
            .map(|v| v.clamp(0.0, 100.0))
    }
}
