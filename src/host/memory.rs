//! In-memory [`Host`] used by the daemon's dry-run mode and by tests.
//!
//! Actuator calls are simulated: `turn_on`/`turn_off` flip the target entity
//! to `on`/`off` and `set_value` stores the value, so the sequencer reads back
//! what it commanded.

use super::{Diagnostic, EntityId, Host, Notification, ServiceCall, StateChange};
use crate::clock::Clock;
use crate::error::{AmpwiseError, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// A service call as the host saw it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Clock time of the call, when the host was given a clock
    pub at: Option<DateTime<Utc>>,
    pub call: ServiceCall,
}

#[derive(Default)]
pub struct InMemoryHost {
    states: Mutex<HashMap<EntityId, String>>,
    channels: Mutex<HashMap<EntityId, broadcast::Sender<StateChange>>>,
    calls: Mutex<Vec<RecordedCall>>,
    notifications: Mutex<Vec<Notification>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
    failures: Mutex<HashMap<String, String>>,
    hanging: Mutex<HashSet<String>>,
    clock: Option<Arc<dyn Clock>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp recorded calls with `clock` time
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Seed many states at once without emitting change events
    pub fn seed<I, K, V>(&self, states: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = lock(&self.states);
        for (k, v) in states {
            map.insert(EntityId::new(k), v.into());
        }
    }

    /// Set a state, notifying subscribers when it changed
    pub fn set_state(&self, entity: &str, value: &str) {
        self.apply_state(&EntityId::new(entity), Some(value.to_string()));
    }

    /// Remove an entity entirely
    pub fn remove_state(&self, entity: &str) {
        self.apply_state(&EntityId::new(entity), None);
    }

    fn apply_state(&self, entity: &EntityId, value: Option<String>) {
        let old = {
            let mut map = lock(&self.states);
            match &value {
                Some(v) => map.insert(entity.clone(), v.clone()),
                None => map.remove(entity),
            }
        };
        if old == value {
            return;
        }
        if let Some(tx) = lock(&self.channels).get(entity) {
            let _ = tx.send(StateChange {
                entity: entity.clone(),
                old,
                new: value,
            });
        }
    }

    /// Make every call of `domain.service` fail with `message`
    pub fn fail_service(&self, service: &str, message: &str) {
        lock(&self.failures).insert(service.to_string(), message.to_string());
    }

    /// Make every call of `domain.service` never acknowledge
    pub fn hang_service(&self, service: &str) {
        lock(&self.hanging).insert(service.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
        lock(&self.hanging).clear();
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Recorded calls rendered as `domain.service` (plus `=value` for set_value)
    pub fn call_log(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .map(|r| match r.call.data.get("value") {
                Some(v) => format!("{}={}", r.call.name(), v),
                None => r.call.name(),
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }

    /// Most recent diagnostic published by `component`
    pub fn last_diagnostic(&self, component: &str) -> Option<Diagnostic> {
        lock(&self.diagnostics)
            .iter()
            .rev()
            .find(|d| d.component == component)
            .cloned()
    }
}

#[async_trait::async_trait]
impl Host for InMemoryHost {
    fn state(&self, entity: &EntityId) -> Option<String> {
        lock(&self.states).get(entity).cloned()
    }

    async fn call_service(&self, call: &ServiceCall) -> Result<()> {
        let name = call.name();
        lock(&self.calls).push(RecordedCall {
            at: self.clock.as_ref().map(|c| c.now()),
            call: call.clone(),
        });

        if lock(&self.hanging).contains(&name) {
            std::future::pending::<()>().await;
        }
        if let Some(message) = lock(&self.failures).get(&name).cloned() {
            return Err(AmpwiseError::actuator(name, message));
        }

        match call.service.as_str() {
            "turn_on" => self.apply_state(&call.entity_id, Some("on".to_string())),
            "turn_off" => self.apply_state(&call.entity_id, Some("off".to_string())),
            "set_value" => {
                if let Some(v) = call.data.get("value") {
                    self.apply_state(&call.entity_id, Some(v.to_string()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn subscribe(&self, entity: &EntityId) -> broadcast::Receiver<StateChange> {
        lock(&self.channels)
            .entry(entity.clone())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    fn notify(&self, notification: Notification) {
        lock(&self.notifications).push(notification);
    }

    fn publish(&self, diagnostic: Diagnostic) {
        let mut diagnostics = lock(&self.diagnostics);
        if diagnostics.len() >= 512 {
            diagnostics.remove(0);
        }
        diagnostics.push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostExt;

    #[tokio::test]
    async fn actuator_calls_update_state_and_notify() {
        let host = InMemoryHost::new();
        let sw = EntityId::new("switch.wallbox");
        host.set_state("switch.wallbox", "off");
        let mut rx = host.subscribe(&sw);

        host.call_service(&ServiceCall::turn_on(&sw)).await.unwrap();
        assert_eq!(host.read_bool(&sw), Some(true));
        let change = rx.recv().await.unwrap();
        assert_eq!(change.old.as_deref(), Some("off"));
        assert_eq!(change.new.as_deref(), Some("on"));

        let num = EntityId::new("number.wallbox_current");
        host.call_service(&ServiceCall::set_value(&num, 13))
            .await
            .unwrap();
        assert_eq!(host.read_f64(&num), Some(13.0));
        assert_eq!(
            host.call_log(),
            vec!["switch.turn_on", "number.set_value=13"]
        );
    }

    #[tokio::test]
    async fn injected_failure_is_reported() {
        let host = InMemoryHost::new();
        host.fail_service("switch.turn_off", "relay stuck");
        let err = host
            .call_service(&ServiceCall::turn_off(&EntityId::new("switch.wallbox")))
            .await
            .unwrap_err();
        assert!(err.is_actuator_failure());
        assert_eq!(host.state(&EntityId::new("switch.wallbox")), None);
    }

    #[test]
    fn unchanged_state_emits_nothing() {
        let host = InMemoryHost::new();
        let id = EntityId::new("sensor.charger_status");
        host.set_state("sensor.charger_status", "free");
        let mut rx = host.subscribe(&id);
        host.set_state("sensor.charger_status", "free");
        assert!(rx.try_recv().is_err());
    }
}
