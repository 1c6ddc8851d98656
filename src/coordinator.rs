//! Arbitration coordinator
//!
//! Decides which policy may drive the charger. A single [`ActiveControl`]
//! slot is held by at most one policy; stronger policies supersede weaker
//! ones, weaker policies may only act in the holder's direction, and the
//! global override switch keeps charging running regardless of the holder.
//!
//! A granted request yields a [`ControlGrant`], which the sequencer requires
//! for every mutating operation.

use crate::clock::Clock;
use crate::host::{EntityId, Host, HostExt};
use crate::logging::StructuredLogger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Decisions kept for diagnostics
pub const HISTORY_CAPACITY: usize = 50;

/// The policies competing for the charger, strongest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Override,
    SmartBlocker,
    NightCharge,
    Balancer,
    SolarSurplus,
}

impl PolicyKind {
    /// 1 is the strongest, 5 the weakest
    pub const fn priority(self) -> u8 {
        match self {
            Self::Override => 1,
            Self::SmartBlocker => 2,
            Self::NightCharge => 3,
            Self::Balancer => 4,
            Self::SolarSurplus => 5,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::SmartBlocker => "smart_blocker",
            Self::NightCharge => "night_charge",
            Self::Balancer => "balancer",
            Self::SolarSurplus => "solar_surplus",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    TurnOn,
    TurnOff,
}

impl ControlAction {
    pub const fn opposite(self) -> Self {
        match self {
            Self::TurnOn => Self::TurnOff,
            Self::TurnOff => Self::TurnOn,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
        })
    }
}

/// The policy currently driving the charger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveControl {
    pub policy: PolicyKind,
    pub priority: u8,
    pub action: ControlAction,
    pub reason: String,
    pub since: DateTime<Utc>,
}

/// Proof that a policy was allowed to perform `action`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlGrant {
    policy: PolicyKind,
    action: ControlAction,
}

impl ControlGrant {
    pub const fn policy(&self) -> PolicyKind {
        self.policy
    }

    pub const fn action(&self) -> ControlAction {
        self.action
    }
}

/// Outcome of [`Coordinator::request`]. A denial is a normal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arbitration {
    Granted {
        grant: ControlGrant,
        explanation: String,
    },
    Denied {
        explanation: String,
    },
}

impl Arbitration {
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    pub fn explanation(&self) -> &str {
        match self {
            Self::Granted { explanation, .. } | Self::Denied { explanation } => explanation,
        }
    }

    pub fn into_grant(self) -> Option<ControlGrant> {
        match self {
            Self::Granted { grant, .. } => Some(grant),
            Self::Denied { .. } => None,
        }
    }
}

/// One entry of the diagnostic decision log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArbitrationRecord {
    pub at: DateTime<Utc>,
    pub policy: PolicyKind,
    pub action: Option<ControlAction>,
    pub granted: bool,
    pub explanation: String,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    active: Option<ActiveControl>,
    history: VecDeque<ArbitrationRecord>,
}

pub struct Coordinator {
    host: Arc<dyn Host>,
    clock: Arc<dyn Clock>,
    override_switch: Option<EntityId>,
    state: Mutex<CoordinatorState>,
    logger: StructuredLogger,
}

impl Coordinator {
    pub fn new(
        host: Arc<dyn Host>,
        clock: Arc<dyn Clock>,
        override_switch: Option<EntityId>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            host,
            clock,
            override_switch,
            state: Mutex::new(CoordinatorState::default()),
            logger,
        }
    }

    pub fn is_override_on(&self) -> bool {
        self.host.is_on(self.override_switch.as_ref())
    }

    /// Ask for permission to perform `action`
    pub fn request(&self, policy: PolicyKind, action: ControlAction, reason: &str) -> Arbitration {
        let now = self.clock.now();
        let override_on = self.is_override_on();
        let mut state = self.lock();

        let granted = |explanation: String| Arbitration::Granted {
            grant: ControlGrant { policy, action },
            explanation,
        };
        let claim = ActiveControl {
            policy,
            priority: policy.priority(),
            action,
            reason: reason.to_string(),
            since: now,
        };

        let outcome = if override_on {
            match action {
                ControlAction::TurnOn => {
                    if policy == PolicyKind::Override {
                        state.active = Some(claim);
                    }
                    granted("Override active, charging permitted".to_string())
                }
                ControlAction::TurnOff => Arbitration::Denied {
                    explanation: "Override active, charging must continue".to_string(),
                },
            }
        } else {
            match state.active.as_ref() {
                None => {
                    state.active = Some(claim);
                    granted(format!("No active control, {policy} takes control"))
                }
                Some(holder) if holder.policy == policy => {
                    state.active = Some(claim);
                    granted(format!("{policy} updates its own control"))
                }
                Some(holder) if policy.priority() < holder.priority => {
                    let explanation = format!(
                        "{policy} (priority {}) supersedes {} (priority {})",
                        policy.priority(),
                        holder.policy,
                        holder.priority
                    );
                    state.active = Some(claim);
                    granted(explanation)
                }
                Some(holder) if holder.action == action.opposite() => Arbitration::Denied {
                    explanation: format!(
                        "{} (priority {}) holds {}, {policy} (priority {}) may not {action}",
                        holder.policy,
                        holder.priority,
                        holder.action,
                        policy.priority()
                    ),
                },
                Some(holder) => granted(format!(
                    "Does not conflict with {} holding {}",
                    holder.policy, holder.action
                )),
            }
        };

        Self::record(
            &mut state,
            ArbitrationRecord {
                at: now,
                policy,
                action: Some(action),
                granted: outcome.is_granted(),
                explanation: outcome.explanation().to_string(),
            },
        );
        drop(state);

        if outcome.is_granted() {
            self.logger
                .debug(&format!("{policy} {action} granted: {}", outcome.explanation()));
        } else {
            self.logger
                .info(&format!("{policy} {action} denied: {}", outcome.explanation()));
        }
        outcome
    }

    /// Give up control; only the holder can release. Returns whether it did.
    pub fn release(&self, policy: PolicyKind, reason: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.active.as_ref().is_none_or(|a| a.policy != policy) {
            return false;
        }
        state.active = None;
        Self::record(
            &mut state,
            ArbitrationRecord {
                at: now,
                policy,
                action: None,
                granted: true,
                explanation: format!("Released: {reason}"),
            },
        );
        drop(state);
        self.logger.debug(&format!("{policy} released control: {reason}"));
        true
    }

    /// Clear the slot regardless of holder
    pub fn release_all(&self, reason: &str) {
        let mut state = self.lock();
        if let Some(active) = state.active.take() {
            let record = ArbitrationRecord {
                at: self.clock.now(),
                policy: active.policy,
                action: None,
                granted: true,
                explanation: format!("Released: {reason}"),
            };
            Self::record(&mut state, record);
        }
    }

    pub fn active_control(&self) -> Option<ActiveControl> {
        self.lock().active.clone()
    }

    /// Oldest first
    pub fn history(&self) -> Vec<ArbitrationRecord> {
        self.lock().history.iter().cloned().collect()
    }

    fn record(state: &mut CoordinatorState, record: ArbitrationRecord) {
        if state.history.len() >= HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.history.push_back(record);
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
