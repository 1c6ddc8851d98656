//! Host platform port
//!
//! The host supplies sensor and helper states, performs actuator calls,
//! delivers state-change events and receives notifications and diagnostics.
//! Raw states are strings; the typed readers here turn them into values and
//! treat `unavailable`/`unknown` as absent.

use crate::error::Result;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod entity;
pub mod memory;

pub use entity::{EntityId, WeekdayMap, bind_optional, bind_required};
pub use memory::{InMemoryHost, RecordedCall};

/// An actuator invocation, e.g. `switch.turn_on` on `switch.wallbox`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub entity_id: EntityId,
    pub data: serde_json::Value,
}

impl ServiceCall {
    pub fn turn_on(entity: &EntityId) -> Self {
        Self {
            domain: entity.domain().to_string(),
            service: "turn_on".to_string(),
            entity_id: entity.clone(),
            data: serde_json::Value::Null,
        }
    }

    pub fn turn_off(entity: &EntityId) -> Self {
        Self {
            domain: entity.domain().to_string(),
            service: "turn_off".to_string(),
            entity_id: entity.clone(),
            data: serde_json::Value::Null,
        }
    }

    pub fn set_value(entity: &EntityId, value: u32) -> Self {
        Self {
            domain: entity.domain().to_string(),
            service: "set_value".to_string(),
            entity_id: entity.clone(),
            data: serde_json::json!({ "value": value }),
        }
    }

    /// `domain.service`
    pub fn name(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }
}

/// Transition of one entity's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub entity: EntityId,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Category tag attached to notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    SmartBlocker,
    NightCharge,
    SolarSurplus,
    Override,
    Error,
}

/// Message for an external delivery mechanism
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub category: NotificationCategory,
    pub message: String,
}

impl Notification {
    pub fn new<S: Into<String>>(category: NotificationCategory, message: S) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

/// Display-only snapshot a component publishes each cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub component: String,
    pub state: String,
    pub attributes: serde_json::Value,
}

#[async_trait::async_trait]
pub trait Host: Send + Sync {
    /// Current raw state of an entity, `None` if the entity does not exist
    fn state(&self, entity: &EntityId) -> Option<String>;

    /// Perform an actuator call, resolving once the host acknowledged it
    async fn call_service(&self, call: &ServiceCall) -> Result<()>;

    /// Receive every transition of `entity` from now on
    fn subscribe(&self, entity: &EntityId) -> broadcast::Receiver<StateChange>;

    fn notify(&self, notification: Notification);

    fn publish(&self, diagnostic: Diagnostic);
}

/// Typed reads on top of [`Host::state`]
pub trait HostExt: Host {
    fn read_raw(&self, entity: &EntityId) -> Option<String> {
        self.state(entity)
            .and_then(|s| normalize_state(&s).map(str::to_string))
    }

    fn read_f64(&self, entity: &EntityId) -> Option<f64> {
        self.state(entity).as_deref().and_then(parse_f64)
    }

    fn read_bool(&self, entity: &EntityId) -> Option<bool> {
        self.state(entity).as_deref().and_then(parse_bool)
    }

    fn read_time(&self, entity: &EntityId) -> Option<NaiveTime> {
        self.state(entity).as_deref().and_then(parse_time_of_day)
    }

    /// Toggle helper; anything but a readable "on" counts as off
    fn is_on(&self, entity: Option<&EntityId>) -> bool {
        entity.and_then(|e| self.read_bool(e)).unwrap_or(false)
    }

    /// Feature toggle; an unbound toggle leaves the feature enabled, a bound
    /// but unreadable one disables it
    fn is_enabled(&self, toggle: Option<&EntityId>) -> bool {
        toggle.is_none_or(|e| self.read_bool(e).unwrap_or(false))
    }
}

impl<T: Host + ?Sized> HostExt for T {}

/// Strip host placeholders for "no value"
pub fn normalize_state(raw: &str) -> Option<&str> {
    let s = raw.trim();
    match s.to_ascii_lowercase().as_str() {
        "" | "unavailable" | "unknown" | "none" | "null" => None,
        _ => Some(s),
    }
}

pub fn parse_f64(raw: &str) -> Option<f64> {
    normalize_state(raw)?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match normalize_state(raw)?.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Some(true),
        "off" | "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// `HH:MM:SS` or `HH:MM`
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let s = normalize_state(raw)?;
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Charger connection status as reported by the charger status sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargerStatus {
    /// No vehicle connected
    Free,
    /// Vehicle connected, not drawing current
    Connected,
    Charging,
    Unknown,
}

impl ChargerStatus {
    pub fn from_state(raw: Option<&str>) -> Self {
        let Some(s) = raw.and_then(normalize_state) else {
            return Self::Unknown;
        };
        match s.to_ascii_lowercase().as_str() {
            "free" | "available" | "disconnected" | "not_connected" => Self::Free,
            "charging" => Self::Charging,
            _ => Self::Connected,
        }
    }
}
