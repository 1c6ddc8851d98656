use crate::coordinator::{ControlAction, ControlGrant};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Start,
    Stop,
    SetAmperage,
}

impl OperationKind {
    /// Grant action an operation of this kind must carry
    pub const fn required_action(self) -> ControlAction {
        match self {
            Self::Stop => ControlAction::TurnOff,
            Self::Start | Self::SetAmperage => ControlAction::TurnOn,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::SetAmperage => "set_amperage",
        })
    }
}

/// An operation waiting for the rate limit
#[derive(Debug, Clone)]
pub struct ChargerOperation {
    pub kind: OperationKind,
    pub target_amperage: Option<u32>,
    pub reason: String,
    pub enqueued_at: DateTime<Utc>,
    pub(crate) grant: ControlGrant,
}

/// Cached actuator state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChargerSnapshot {
    pub is_on: bool,
    pub current_amperage: Option<u32>,
    pub last_operation_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Actuator calls were issued
    Executed,
    /// Rate limited; will run from the queue
    Queued,
    /// Charger already in the requested state
    NoOp,
}

/// Actuator steps chosen for an operation against the current snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plan {
    /// Optionally set the current, then switch on
    Start { set: Option<u32> },
    Stop,
    /// Set while running (increase) or while off
    DirectSet(u32),
    /// off, wait, set, wait, on
    SafeDecrease(u32),
}

impl Plan {
    /// `None` when the charger already is where the operation wants it
    pub(crate) fn for_operation(
        snapshot: &ChargerSnapshot,
        kind: OperationKind,
        target: Option<u32>,
    ) -> Option<Self> {
        match kind {
            OperationKind::Stop => snapshot.is_on.then_some(Self::Stop),
            OperationKind::SetAmperage => {
                target.and_then(|t| Self::for_amperage(snapshot, t))
            }
            OperationKind::Start if !snapshot.is_on => Some(Self::Start {
                set: target.filter(|t| Some(*t) != snapshot.current_amperage),
            }),
            OperationKind::Start => target.and_then(|t| Self::for_amperage(snapshot, t)),
        }
    }

    fn for_amperage(snapshot: &ChargerSnapshot, target: u32) -> Option<Self> {
        if snapshot.current_amperage == Some(target) {
            return None;
        }
        // An unknown current while running is treated as a decrease
        let decreasing = snapshot.current_amperage.is_none_or(|c| target < c);
        if snapshot.is_on && decreasing {
            Some(Self::SafeDecrease(target))
        } else {
            Some(Self::DirectSet(target))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(is_on: bool, current: Option<u32>) -> ChargerSnapshot {
        ChargerSnapshot {
            is_on,
            current_amperage: current,
            last_operation_at: None,
        }
    }

    #[test]
    fn plans_follow_charger_state() {
        let on16 = snap(true, Some(16));
        assert_eq!(
            Plan::for_operation(&on16, OperationKind::SetAmperage, Some(16)),
            None
        );
        assert_eq!(
            Plan::for_operation(&on16, OperationKind::SetAmperage, Some(10)),
            Some(Plan::SafeDecrease(10))
        );
        assert_eq!(
            Plan::for_operation(&on16, OperationKind::SetAmperage, Some(20)),
            Some(Plan::DirectSet(20))
        );
        assert_eq!(
            Plan::for_operation(&on16, OperationKind::Start, None),
            None
        );
        assert_eq!(
            Plan::for_operation(&on16, OperationKind::Stop, None),
            Some(Plan::Stop)
        );

        let off16 = snap(false, Some(16));
        assert_eq!(
            Plan::for_operation(&off16, OperationKind::SetAmperage, Some(6)),
            Some(Plan::DirectSet(6))
        );
        assert_eq!(
            Plan::for_operation(&off16, OperationKind::Start, Some(16)),
            Some(Plan::Start { set: None })
        );
        assert_eq!(
            Plan::for_operation(&off16, OperationKind::Start, Some(8)),
            Some(Plan::Start { set: Some(8) })
        );
        assert_eq!(Plan::for_operation(&off16, OperationKind::Stop, None), None);

        assert_eq!(
            Plan::for_operation(&snap(true, None), OperationKind::SetAmperage, Some(8)),
            Some(Plan::SafeDecrease(8))
        );
    }
}
