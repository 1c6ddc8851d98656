//! Solar surplus charging
//!
//! Follows live surplus power (production minus consumption) with the
//! charger current. Increases apply at once; drops and grid import are
//! answered one level at a time, each after its delay has elapsed without
//! interruption. The timing logic lives in [`SurplusController`], which is
//! pure and driven by explicit timestamps.

use super::{PolicyContext, PolicyHandle, report_failure, spawn_periodic};
use crate::amperage::{AmperageLevels, surplus_target, watts_to_amps};
use crate::balancer::Priority;
use crate::clock::elapsed_between;
use crate::config::{ChargerConfig, EntitiesConfig, SolarSurplusConfig};
use crate::coordinator::{ControlAction, PolicyKind};
use crate::error::Result;
use crate::host::{
    ChargerStatus, EntityId, HostExt, Notification, NotificationCategory, bind_optional,
    bind_required,
};
use crate::logging::StructuredLogger;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Profile selector value that enables this policy
pub const PROFILE_NAME: &str = "solar_surplus";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurplusInputs {
    pub now: DateTime<Utc>,
    pub surplus_watts: f64,
    pub grid_import_watts: f64,
    pub grid_threshold_watts: f64,
    pub grid_delay: Duration,
    pub drop_delay: Duration,
    pub is_on: bool,
    pub current_amps: u32,
    /// Home battery may cover a surplus drop
    pub battery_assist: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "amps")]
pub enum SurplusAction {
    Hold,
    Start(u32),
    Increase(u32),
    StepDown(u32),
    Fallback(u32),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurplusStep {
    pub action: SurplusAction,
    pub target: u32,
    /// Short label for the diagnostic entity
    pub state: &'static str,
}

#[derive(Debug, Clone)]
pub struct SurplusController {
    levels: AmperageLevels,
    voltage: f64,
    start_hysteresis_watts: f64,
    fallback_amps: u32,
    grid_since: Option<DateTime<Utc>>,
    drop_since: Option<DateTime<Utc>>,
}

impl SurplusController {
    pub fn new(
        levels: AmperageLevels,
        voltage: f64,
        start_hysteresis_watts: f64,
        fallback_amps: u32,
    ) -> Self {
        Self {
            levels,
            voltage,
            start_hysteresis_watts,
            fallback_amps,
            grid_since: None,
            drop_since: None,
        }
    }

    pub const fn grid_timer(&self) -> Option<DateTime<Utc>> {
        self.grid_since
    }

    pub const fn drop_timer(&self) -> Option<DateTime<Utc>> {
        self.drop_since
    }

    pub fn reset(&mut self) {
        self.grid_since = None;
        self.drop_since = None;
    }

    pub fn step(&mut self, input: &SurplusInputs) -> SurplusStep {
        let current = if input.is_on { input.current_amps } else { 0 };
        let target = surplus_target(
            &self.levels,
            input.surplus_watts,
            self.voltage,
            input.is_on,
            self.start_hysteresis_watts,
        );
        let step = |action: SurplusAction, state: &'static str| SurplusStep {
            action,
            target,
            state,
        };

        if input.is_on && input.grid_import_watts > input.grid_threshold_watts {
            let since = *self.grid_since.get_or_insert(input.now);
            if elapsed_between(since, input.now) < input.grid_delay {
                return step(SurplusAction::Hold, "grid_import_pending");
            }
            self.grid_since = None;
            self.drop_since = None;
            return match self.levels.step_down(current) {
                0 => step(SurplusAction::Stop, "grid_import_stop"),
                next => step(SurplusAction::StepDown(next), "grid_import_step_down"),
            };
        }
        self.grid_since = None;

        if !input.is_on {
            self.drop_since = None;
            return if target > 0 {
                step(SurplusAction::Start(target), "starting")
            } else {
                step(SurplusAction::Hold, "waiting_for_surplus")
            };
        }

        if target > current {
            self.drop_since = None;
            return step(SurplusAction::Increase(target), "increasing");
        }

        if target < current {
            if input.battery_assist {
                self.drop_since = None;
                return if current > self.fallback_amps {
                    step(SurplusAction::Fallback(self.fallback_amps), "battery_fallback")
                } else {
                    step(SurplusAction::Hold, "battery_assist")
                };
            }
            let since = *self.drop_since.get_or_insert(input.now);
            if elapsed_between(since, input.now) < input.drop_delay {
                return step(SurplusAction::Hold, "surplus_drop_pending");
            }
            self.drop_since = None;
            return match self.levels.step_down(current) {
                0 => step(SurplusAction::Stop, "surplus_stop"),
                next => step(SurplusAction::StepDown(next), "surplus_step_down"),
            };
        }

        self.reset();
        step(SurplusAction::Hold, "stable")
    }
}

#[derive(Debug, Clone)]
pub struct SolarHandles {
    pub status: EntityId,
    pub profile: EntityId,
    pub solar: EntityId,
    pub consumption: EntityId,
    pub grid_import: EntityId,
    pub grid_threshold: EntityId,
    pub grid_delay: EntityId,
    pub drop_delay: EntityId,
    pub use_battery: Option<EntityId>,
    pub battery_min_soc: Option<EntityId>,
}

impl SolarHandles {
    pub fn bind(e: &EntitiesConfig) -> Result<Self> {
        Ok(Self {
            status: bind_required("charger_status", e.charger_status.as_ref())?,
            profile: bind_required("charging_profile", e.charging_profile.as_ref())?,
            solar: bind_required("solar_production", e.solar_production.as_ref())?,
            consumption: bind_required("home_consumption", e.home_consumption.as_ref())?,
            grid_import: bind_required("grid_import", e.grid_import.as_ref())?,
            grid_threshold: bind_required(
                "grid_import_threshold",
                e.grid_import_threshold.as_ref(),
            )?,
            grid_delay: bind_required("grid_import_delay", e.grid_import_delay.as_ref())?,
            drop_delay: bind_required("surplus_drop_delay", e.surplus_drop_delay.as_ref())?,
            use_battery: bind_optional(e.use_home_battery.as_ref()),
            battery_min_soc: bind_optional(e.home_battery_min_soc.as_ref()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolarOutcome {
    Skipped(&'static str),
    SensorUnavailable(String),
    /// Stopped because the balancer gave priority elsewhere
    Yielded(Priority),
    Applied(SurplusAction),
    Denied(SurplusAction),
}

struct Readings {
    solar: f64,
    consumption: f64,
    grid_import: f64,
    grid_threshold: f64,
    grid_delay: Duration,
    drop_delay: Duration,
}

pub struct SolarSurplus {
    ctx: PolicyContext,
    handles: SolarHandles,
    config: SolarSurplusConfig,
    voltage: f64,
    controller: Mutex<SurplusController>,
    logger: StructuredLogger,
}

impl SolarSurplus {
    pub fn new(
        ctx: PolicyContext,
        entities: &EntitiesConfig,
        charger: &ChargerConfig,
        config: SolarSurplusConfig,
        logger: StructuredLogger,
    ) -> Result<Self> {
        let handles = SolarHandles::bind(entities)?;
        let levels = ctx.sequencer.levels().clone();
        if !levels.contains(config.battery_fallback_amperage) {
            return Err(crate::error::AmpwiseError::validation(
                "solar_surplus.battery_fallback_amperage".to_string(),
                format!("{}A is not a permitted level", config.battery_fallback_amperage),
            ));
        }
        let controller = SurplusController::new(
            levels,
            charger.nominal_voltage,
            config.start_hysteresis_watts,
            config.battery_fallback_amperage,
        );
        Ok(Self {
            ctx,
            handles,
            config,
            voltage: charger.nominal_voltage,
            controller: Mutex::new(controller),
            logger,
        })
    }

    fn controller(&self) -> std::sync::MutexGuard<'_, SurplusController> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn skip(&self, reason: &'static str) -> Result<SolarOutcome> {
        self.controller().reset();
        self.ctx.publish(
            PolicyKind::SolarSurplus,
            "inactive",
            json!({ "reason": reason }),
        );
        Ok(SolarOutcome::Skipped(reason))
    }

    pub async fn evaluate(&self) -> Result<SolarOutcome> {
        if self.ctx.override_on() {
            return self.skip("override active");
        }
        if self.ctx.session.is_active() {
            return self.skip("night charge session active");
        }
        let profile = self.ctx.host.read_raw(&self.handles.profile);
        if profile.as_deref() != Some(PROFILE_NAME) {
            return self.skip("profile not selected");
        }
        if self.ctx.charger_status(&self.handles.status) == ChargerStatus::Free {
            return self.skip("no vehicle connected");
        }

        // The charger may have been switched outside the automation
        let charger = self.ctx.sequencer.refresh();
        let is_on = charger.is_on;
        let verdict = self.ctx.balancer.evaluate();
        match verdict.priority {
            Priority::Home | Priority::EvFree if is_on => {
                self.controller().reset();
                let reason = format!("Priority {}: {}", verdict.priority, verdict.reason);
                let applied = self.apply(SurplusAction::Stop, &reason).await?;
                self.ctx.publish(
                    PolicyKind::SolarSurplus,
                    "yielding",
                    json!({ "priority": verdict.priority, "reason": verdict.reason }),
                );
                return Ok(if applied {
                    SolarOutcome::Yielded(verdict.priority)
                } else {
                    SolarOutcome::Denied(SurplusAction::Stop)
                });
            }
            Priority::Home => {
                self.controller().reset();
                self.ctx.publish(
                    PolicyKind::SolarSurplus,
                    "home_priority",
                    json!({ "reason": verdict.reason }),
                );
                return Ok(SolarOutcome::Yielded(Priority::Home));
            }
            Priority::Ev | Priority::EvFree => {}
        }

        let readings = match self.read_sensors() {
            Ok(r) => r,
            Err(missing) => {
                self.logger
                    .warn(&format!("Sensor unavailable: {missing}, skipping cycle"));
                self.ctx.publish(
                    PolicyKind::SolarSurplus,
                    "sensor_unavailable",
                    json!({ "entity": missing }),
                );
                return Ok(SolarOutcome::SensorUnavailable(missing));
            }
        };

        let inputs = SurplusInputs {
            now: self.ctx.clock.now(),
            surplus_watts: readings.solar - readings.consumption,
            grid_import_watts: readings.grid_import,
            grid_threshold_watts: readings.grid_threshold,
            grid_delay: readings.grid_delay,
            drop_delay: readings.drop_delay,
            is_on,
            current_amps: charger.current_amperage.unwrap_or(0),
            battery_assist: self.battery_assist(verdict.priority),
        };
        let (step, grid_timer, drop_timer) = {
            let mut controller = self.controller();
            let step = controller.step(&inputs);
            (step, controller.grid_timer(), controller.drop_timer())
        };

        self.ctx.publish(
            PolicyKind::SolarSurplus,
            step.state,
            json!({
                "priority": verdict.priority,
                "surplus_watts": inputs.surplus_watts,
                "surplus_amps": watts_to_amps(inputs.surplus_watts, self.voltage),
                "target_amps": step.target,
                "current_amps": if is_on { inputs.current_amps } else { 0 },
                "grid_import_watts": inputs.grid_import_watts,
                "grid_timer_started": grid_timer,
                "drop_timer_started": drop_timer,
                "battery_assist": inputs.battery_assist,
                "action": step.action,
            }),
        );

        if step.action == SurplusAction::Hold {
            return Ok(SolarOutcome::Applied(SurplusAction::Hold));
        }
        let reason = format!(
            "Solar surplus {:.0} W ({})",
            inputs.surplus_watts, step.state
        );
        if self.apply(step.action, &reason).await? {
            Ok(SolarOutcome::Applied(step.action))
        } else {
            Ok(SolarOutcome::Denied(step.action))
        }
    }

    /// Execute a controller action; `false` when arbitration denied it
    async fn apply(&self, action: SurplusAction, reason: &str) -> Result<bool> {
        let sequencer = &self.ctx.sequencer;
        match action {
            SurplusAction::Hold => Ok(true),
            SurplusAction::Stop => {
                let Some(grant) = self.ctx.acquire(
                    PolicyKind::SolarSurplus,
                    ControlAction::TurnOff,
                    reason,
                    &self.logger,
                ) else {
                    return Ok(false);
                };
                let result = sequencer.stop(&grant, reason).await;
                self.ctx.coordinator.release(PolicyKind::SolarSurplus, reason);
                result?;
                self.ctx.host.notify(Notification::new(
                    NotificationCategory::SolarSurplus,
                    format!("Solar charging stopped: {reason}"),
                ));
                Ok(true)
            }
            SurplusAction::Start(amps) => {
                let Some(grant) = self.ctx.acquire(
                    PolicyKind::SolarSurplus,
                    ControlAction::TurnOn,
                    reason,
                    &self.logger,
                ) else {
                    return Ok(false);
                };
                sequencer.start(&grant, Some(amps), reason).await?;
                self.ctx.host.notify(Notification::new(
                    NotificationCategory::SolarSurplus,
                    format!("Solar charging started at {amps}A"),
                ));
                Ok(true)
            }
            SurplusAction::Increase(amps)
            | SurplusAction::StepDown(amps)
            | SurplusAction::Fallback(amps) => {
                let Some(grant) = self.ctx.acquire(
                    PolicyKind::SolarSurplus,
                    ControlAction::TurnOn,
                    reason,
                    &self.logger,
                ) else {
                    return Ok(false);
                };
                sequencer.set_amperage(&grant, amps, reason).await?;
                Ok(true)
            }
        }
    }

    fn read_sensors(&self) -> std::result::Result<Readings, String> {
        let read = |e: &EntityId| self.ctx.host.read_f64(e).ok_or_else(|| e.to_string());
        let seconds = |e: &EntityId| {
            read(e).and_then(|s| {
                Duration::try_from_secs_f64(s.max(0.0)).map_err(|_| e.to_string())
            })
        };
        let h = &self.handles;
        Ok(Readings {
            solar: read(&h.solar)?,
            consumption: read(&h.consumption)?,
            grid_import: read(&h.grid_import)?,
            grid_threshold: read(&h.grid_threshold)?,
            grid_delay: seconds(&h.grid_delay)?,
            drop_delay: seconds(&h.drop_delay)?,
        })
    }

    fn battery_assist(&self, priority: Priority) -> bool {
        if priority == Priority::Home || !self.ctx.host.is_on(self.handles.use_battery.as_ref()) {
            return false;
        }
        let min_soc = self
            .handles
            .battery_min_soc
            .as_ref()
            .and_then(|e| self.ctx.host.read_f64(e));
        match (self.ctx.balancer.home_soc(), min_soc) {
            (Some(soc), Some(min)) => soc > min,
            _ => false,
        }
    }

    async fn tick(&self) {
        if let Err(e) = self.evaluate().await {
            report_failure(&self.ctx.host, &self.logger, PolicyKind::SolarSurplus, &e);
        }
    }

    pub fn spawn(self: Arc<Self>) -> PolicyHandle {
        let period = Duration::from_secs(self.config.interval_seconds);
        let policy = Arc::clone(&self);
        let ticker = spawn_periodic(period, move || {
            let policy = Arc::clone(&policy);
            async move { policy.tick().await }
        });
        self.logger.info(&format!(
            "Solar surplus active, evaluating every {}s",
            self.config.interval_seconds
        ));
        PolicyHandle::new(PolicyKind::SolarSurplus, vec![ticker])
    }
}
