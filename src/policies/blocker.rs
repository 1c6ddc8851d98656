//! Smart charger blocker
//!
//! Stops charging that begins at night or while solar production is low.
//! Purely preventive: it never starts the charger again.

use super::{PolicyContext, PolicyHandle, entered, report_failure, spawn_on_change, spawn_periodic};
use crate::config::{BlockerConfig, EntitiesConfig};
use crate::coordinator::{ControlAction, PolicyKind};
use crate::error::Result;
use crate::host::{
    ChargerStatus, EntityId, HostExt, Notification, NotificationCategory, bind_optional,
    bind_required,
};
use crate::logging::StructuredLogger;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockReason {
    Nighttime,
    LowSolar { watts: f64, threshold: f64 },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nighttime => f.write_str("nighttime"),
            Self::LowSolar { watts, threshold } => {
                write!(f, "low solar ({watts:.0} W < {threshold:.0} W)")
            }
        }
    }
}

/// Reasons to block; empty means charging may continue. A missing solar
/// reading is not treated as low solar.
pub fn block_reasons(is_night: bool, solar_watts: Option<f64>, threshold: f64) -> Vec<BlockReason> {
    let mut reasons = Vec::new();
    if is_night {
        reasons.push(BlockReason::Nighttime);
    }
    if let Some(watts) = solar_watts.filter(|w| *w < threshold) {
        reasons.push(BlockReason::LowSolar { watts, threshold });
    }
    reasons
}

fn join_reasons(reasons: &[BlockReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" and ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockerOutcome {
    Suppressed(&'static str),
    Allowed,
    Blocked(Vec<BlockReason>),
    Denied,
}

#[derive(Debug, Clone)]
pub struct BlockerHandles {
    pub enabled: Option<EntityId>,
    pub status: EntityId,
    pub solar: Option<EntityId>,
}

impl BlockerHandles {
    pub fn bind(entities: &EntitiesConfig) -> Result<Self> {
        Ok(Self {
            enabled: bind_optional(entities.blocker_enabled.as_ref()),
            status: bind_required("charger_status", entities.charger_status.as_ref())?,
            solar: bind_optional(entities.solar_production.as_ref()),
        })
    }
}

pub struct SmartBlocker {
    ctx: PolicyContext,
    handles: BlockerHandles,
    config: BlockerConfig,
    logger: StructuredLogger,
}

impl SmartBlocker {
    pub fn new(
        ctx: PolicyContext,
        entities: &EntitiesConfig,
        config: BlockerConfig,
        logger: StructuredLogger,
    ) -> Result<Self> {
        Ok(Self {
            ctx,
            handles: BlockerHandles::bind(entities)?,
            config,
            logger,
        })
    }

    /// Check the blocking predicate and stop the charger if it holds
    pub async fn evaluate(&self) -> Result<BlockerOutcome> {
        if self.ctx.override_on() {
            return Ok(BlockerOutcome::Suppressed("override active"));
        }
        if !self.ctx.host.is_enabled(self.handles.enabled.as_ref()) {
            return Ok(BlockerOutcome::Suppressed("blocker disabled"));
        }
        if self.ctx.session.is_active() {
            return Ok(BlockerOutcome::Suppressed("night charge session active"));
        }

        let solar = self
            .handles
            .solar
            .as_ref()
            .and_then(|e| self.ctx.host.read_f64(e));
        let is_night = self.ctx.astral.is_night(self.ctx.clock.now());
        let reasons = block_reasons(is_night, solar, self.config.solar_threshold_watts);
        if reasons.is_empty() {
            return Ok(BlockerOutcome::Allowed);
        }

        let reason = join_reasons(&reasons);
        let Some(grant) = self.ctx.acquire(
            PolicyKind::SmartBlocker,
            ControlAction::TurnOff,
            &reason,
            &self.logger,
        ) else {
            return Ok(BlockerOutcome::Denied);
        };

        let stopped = self
            .ctx
            .sequencer
            .stop(&grant, &format!("Blocked: {reason}"))
            .await;
        self.ctx.coordinator.release(PolicyKind::SmartBlocker, "block issued");
        stopped?;

        self.logger.info(&format!("Charging blocked: {reason}"));
        self.ctx.host.notify(Notification::new(
            NotificationCategory::SmartBlocker,
            format!("Charging blocked: {reason}"),
        ));
        self.ctx.publish(
            PolicyKind::SmartBlocker,
            "blocked",
            json!({ "reason": reason, "solar_watts": solar, "night": is_night }),
        );
        Ok(BlockerOutcome::Blocked(reasons))
    }

    async fn tick(&self) {
        if let Err(e) = self.evaluate().await {
            report_failure(&self.ctx.host, &self.logger, PolicyKind::SmartBlocker, &e);
        }
    }

    /// Edge trigger on status turning to charging, plus an optional poll that
    /// only acts while the charger reports charging
    pub fn spawn(self: Arc<Self>) -> PolicyHandle {
        let mut tasks = Vec::new();
        let edge = {
            let policy = Arc::clone(&self);
            spawn_on_change(
                &self.ctx.host,
                &self.handles.status,
                self.logger.clone(),
                move |change| {
                    let policy = Arc::clone(&policy);
                    async move {
                        if entered(&change, ChargerStatus::Charging) {
                            policy.tick().await;
                        }
                    }
                },
            )
        };
        tasks.push(edge);

        if self.config.poll_interval_seconds > 0 {
            let policy = Arc::clone(&self);
            tasks.push(spawn_periodic(
                Duration::from_secs(self.config.poll_interval_seconds),
                move || {
                    let policy = Arc::clone(&policy);
                    async move {
                        if policy.ctx.charger_status(&policy.handles.status)
                            == ChargerStatus::Charging
                        {
                            policy.tick().await;
                        }
                    }
                },
            ));
        }
        self.logger.info("Smart charger blocker active");
        PolicyHandle::new(PolicyKind::SmartBlocker, tasks)
    }
}
