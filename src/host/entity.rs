//! Entity identifiers and the startup binding step.
//!
//! Roles from [`crate::config::EntitiesConfig`] are resolved into typed
//! handles once; nothing at decision time looks entities up by name.

use crate::config::WeekdayEntities;
use crate::error::{AmpwiseError, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Host entity id such as `switch.wallbox_charging`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the first dot (`switch`, `number`, ...)
    pub fn domain(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(d, _)| d)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bind a role that must be configured
pub fn bind_required(role: &str, raw: Option<&String>) -> Result<EntityId> {
    bind_optional(raw)
        .ok_or_else(|| AmpwiseError::config(format!("Required entity '{role}' is not configured")))
}

/// Bind a role that may be left out
pub fn bind_optional(raw: Option<&String>) -> Option<EntityId> {
    raw.map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(EntityId::new)
}

/// One value per weekday, indexed by [`Weekday`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekdayMap<T>([T; 7]);

impl<T> WeekdayMap<T> {
    pub const fn new(values: [T; 7]) -> Self {
        Self(values)
    }

    pub fn get(&self, day: Weekday) -> &T {
        &self.0[day.num_days_from_monday() as usize]
    }
}

impl WeekdayMap<Option<EntityId>> {
    pub fn bind(entities: &WeekdayEntities) -> Self {
        Self([
            bind_optional(entities.monday.as_ref()),
            bind_optional(entities.tuesday.as_ref()),
            bind_optional(entities.wednesday.as_ref()),
            bind_optional(entities.thursday.as_ref()),
            bind_optional(entities.friday.as_ref()),
            bind_optional(entities.saturday.as_ref()),
            bind_optional(entities.sunday.as_ref()),
        ])
    }

    /// Number of weekdays with a bound helper
    pub fn bound_count(&self) -> usize {
        self.0.iter().filter(|e| e.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_and_display() {
        let id = EntityId::new("number.wallbox_current");
        assert_eq!(id.domain(), "number");
        assert_eq!(id.to_string(), "number.wallbox_current");
        assert_eq!(EntityId::new("bare").domain(), "bare");
    }

    #[test]
    fn required_binding_reports_role() {
        let err = bind_required("charger_switch", None).unwrap_err();
        assert!(err.to_string().contains("charger_switch"));
        let blank = "  ".to_string();
        assert!(bind_required("charger_switch", Some(&blank)).is_err());
    }

    #[test]
    fn weekday_map_indexes_by_day() {
        let cfg = WeekdayEntities {
            friday: Some("input_number.ev_min_soc_friday".to_string()),
            ..Default::default()
        };
        let map = WeekdayMap::bind(&cfg);
        assert_eq!(map.bound_count(), 1);
        assert_eq!(
            map.get(Weekday::Fri).as_ref().map(EntityId::as_str),
            Some("input_number.ev_min_soc_friday")
        );
        assert!(map.get(Weekday::Mon).is_none());
    }
}
