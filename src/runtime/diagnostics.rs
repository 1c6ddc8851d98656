use crate::balancer::PriorityVerdict;
use crate::coordinator::{ActiveControl, ArbitrationRecord, PolicyKind};
use crate::policies::NightChargeSession;
use crate::sequencer::ChargerSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Display-only view of the automation
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeDiagnostics {
    pub generated_at: DateTime<Utc>,
    pub running_policies: Vec<PolicyKind>,
    pub override_on: bool,
    pub active_control: Option<ActiveControl>,
    pub priority: Option<PriorityVerdict>,
    pub night_charge: NightChargeSession,
    /// `None` when the charger could not be bound
    pub charger: Option<ChargerSnapshot>,
    pub queue_size: usize,
    pub seconds_since_last_operation: Option<f64>,
    pub recent_decisions: Vec<ArbitrationRecord>,
}

impl RuntimeDiagnostics {
    /// Short state label for the diagnostic entity
    pub fn state_label(&self) -> &'static str {
        if self.charger.is_none() {
            "charger_unavailable"
        } else if self.override_on {
            "override"
        } else if self.night_charge.active {
            "night_charge"
        } else if self.active_control.is_some() {
            "controlled"
        } else {
            "idle"
        }
    }
}
