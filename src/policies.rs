//! Charging policies
//!
//! Each policy binds its entities once (a missing required entity disables
//! only that policy), then runs as a set of tasks: a periodic tick and/or a
//! state-change subscription. Policies never touch the actuators directly;
//! they ask the coordinator for a grant and hand it to the sequencer.

use crate::astral::Astral;
use crate::balancer::PriorityBalancer;
use crate::clock::Clock;
use crate::coordinator::{ControlAction, ControlGrant, Coordinator, PolicyKind};
use crate::host::{ChargerStatus, Diagnostic, EntityId, Host, StateChange};
use crate::logging::StructuredLogger;
use crate::sequencer::ChargerSequencer;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

pub mod blocker;
pub mod manual_override;
pub mod night_charge;
pub mod solar_surplus;

pub use blocker::{BlockReason, BlockerOutcome, SmartBlocker};
pub use manual_override::ManualOverride;
pub use night_charge::{
    NightChargeMode, NightChargeSession, NightDecision, NightOutcome, NightSmartCharge,
    SharedSession,
};
pub use solar_surplus::{
    SolarOutcome, SolarSurplus, SurplusAction, SurplusController, SurplusInputs, SurplusStep,
};

/// Collaborators every policy works with
#[derive(Clone)]
pub struct PolicyContext {
    pub host: Arc<dyn Host>,
    pub clock: Arc<dyn Clock>,
    pub coordinator: Arc<Coordinator>,
    pub sequencer: ChargerSequencer,
    pub balancer: Arc<PriorityBalancer>,
    pub astral: Arc<Astral>,
    pub session: SharedSession,
}

impl PolicyContext {
    pub fn charger_status(&self, entity: &EntityId) -> ChargerStatus {
        ChargerStatus::from_state(self.host.state(entity).as_deref())
    }

    pub fn override_on(&self) -> bool {
        self.coordinator.is_override_on()
    }

    /// Ask for control; a denial is logged and yields `None`
    pub fn acquire(
        &self,
        policy: PolicyKind,
        action: ControlAction,
        reason: &str,
        logger: &StructuredLogger,
    ) -> Option<ControlGrant> {
        let arbitration = self.coordinator.request(policy, action, reason);
        if !arbitration.is_granted() {
            logger.info(&format!(
                "Backing off {action}: {}",
                arbitration.explanation()
            ));
        }
        arbitration.into_grant()
    }

    pub fn publish(&self, component: PolicyKind, state: &str, attributes: serde_json::Value) {
        self.host.publish(Diagnostic {
            component: component.name().to_string(),
            state: state.to_string(),
            attributes,
        });
    }
}

/// Running tasks of one policy; dropping the handle leaves them running,
/// [`PolicyHandle::teardown`] stops them
#[derive(Debug)]
pub struct PolicyHandle {
    policy: PolicyKind,
    tasks: Vec<JoinHandle<()>>,
}

impl PolicyHandle {
    pub const fn new(policy: PolicyKind, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { policy, tasks }
    }

    pub const fn policy(&self) -> PolicyKind {
        self.policy
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }

    pub fn teardown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Run `tick` every `period`, first run after one period
pub(crate) fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            tick().await;
        }
    })
}

/// Run `on_change` for every transition of `entity`
pub(crate) fn spawn_on_change<F, Fut>(
    host: &Arc<dyn Host>,
    entity: &EntityId,
    logger: StructuredLogger,
    mut on_change: F,
) -> JoinHandle<()>
where
    F: FnMut(StateChange) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let entity_name = entity.to_string();
    let mut changes = BroadcastStream::new(host.subscribe(entity)).filter_map(move |res| {
        match res {
            Ok(change) => Some(change),
            Err(e) => {
                logger.warn(&format!("Missed state changes of {entity_name}: {e}"));
                None
            }
        }
    });
    tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            on_change(change).await;
        }
    })
}

/// `true` for a transition into `to` from any other status
pub(crate) fn entered(change: &StateChange, to: ChargerStatus) -> bool {
    ChargerStatus::from_state(change.new.as_deref()) == to
        && ChargerStatus::from_state(change.old.as_deref()) != to
}

/// `true` for a transition away from `from`
pub(crate) fn left(change: &StateChange, from: ChargerStatus) -> bool {
    ChargerStatus::from_state(change.old.as_deref()) == from
        && ChargerStatus::from_state(change.new.as_deref()) != from
}

/// Log an actuator failure of a policy cycle and raise an error notification
pub(crate) fn report_failure(
    host: &Arc<dyn Host>,
    logger: &StructuredLogger,
    policy: PolicyKind,
    err: &crate::error::AmpwiseError,
) {
    logger.error(&format!("{policy} cycle failed: {err}"));
    if err.is_actuator_failure() {
        host.notify(crate::host::Notification::new(
            crate::host::NotificationCategory::Error,
            format!("{policy}: charger command failed: {err}"),
        ));
    }
}
