//! Night smart charge
//!
//! Charges the EV overnight, inside the window from the scheduled start time
//! to the next sunrise, until today's EV target is reached. Tomorrow's PV
//! forecast picks the energy source: a sunny day ahead lets the home battery
//! be drained (`battery`), otherwise only the grid is used (`grid`).

use super::{PolicyContext, PolicyHandle, entered, left, report_failure, spawn_on_change, spawn_periodic};
use crate::config::{EntitiesConfig, NightChargeConfig};
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
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NightChargeMode {
    #[default]
    Idle,
    /// Home battery may supply the EV
    Battery,
    /// Grid only; grid-import protection is bypassed
    Grid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NightChargeSession {
    /// Identifies one overnight session in logs and diagnostics
    pub id: Option<Uuid>,
    pub active: bool,
    pub mode: NightChargeMode,
    pub started_at: Option<DateTime<Utc>>,
}

impl NightChargeSession {
    pub const fn is_grid_mode(&self) -> bool {
        self.active && matches!(self.mode, NightChargeMode::Grid)
    }
}

/// Session state shared read-only with the other policies
#[derive(Debug, Clone, Default)]
pub struct SharedSession(Arc<RwLock<NightChargeSession>>);

impl SharedSession {
    pub fn get(&self) -> NightChargeSession {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.get().active
    }

    pub fn set(&self, session: NightChargeSession) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

/// What one evaluation should do, once the guards hold
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NightDecision {
    /// EV SOC or today's target unavailable; leave everything as is
    Skip,
    /// Target reached while a session was running
    Complete,
    /// Target reached, nothing running
    Noop,
    Charge(NightChargeMode),
}

/// Decide from the EV SOC and tomorrow's PV forecast
pub fn decide(
    ev_soc: Option<f64>,
    ev_target: Option<f64>,
    forecast_kwh: f64,
    forecast_threshold_kwh: f64,
    session_active: bool,
) -> NightDecision {
    let (Some(soc), Some(ev_target)) = (ev_soc, ev_target) else {
        return NightDecision::Skip;
    };
    if soc >= ev_target {
        return if session_active {
            NightDecision::Complete
        } else {
            NightDecision::Noop
        };
    }
    if forecast_kwh >= forecast_threshold_kwh {
        NightDecision::Charge(NightChargeMode::Battery)
    } else {
        NightDecision::Charge(NightChargeMode::Grid)
    }
}

#[derive(Debug, Clone)]
pub struct NightChargeHandles {
    pub enabled: Option<EntityId>,
    pub start_time: EntityId,
    pub status: EntityId,
    pub forecast: Option<EntityId>,
}

impl NightChargeHandles {
    pub fn bind(entities: &EntitiesConfig) -> Result<Self> {
        Ok(Self {
            enabled: bind_optional(entities.night_charge_enabled.as_ref()),
            start_time: bind_required("night_charge_time", entities.night_charge_time.as_ref())?,
            status: bind_required("charger_status", entities.charger_status.as_ref())?,
            forecast: bind_optional(entities.pv_forecast_tomorrow.as_ref()),
        })
    }
}

/// Result of one evaluation, mostly for tests and diagnostics
#[derive(Debug, Clone, PartialEq)]
pub enum NightOutcome {
    /// A guard did not hold
    Inactive(String),
    Skipped,
    Idle,
    Charging(NightChargeMode),
    Completed,
    Denied,
}

pub struct NightSmartCharge {
    ctx: PolicyContext,
    handles: NightChargeHandles,
    config: NightChargeConfig,
    logger: StructuredLogger,
}

impl NightSmartCharge {
    pub fn new(
        ctx: PolicyContext,
        entities: &EntitiesConfig,
        config: NightChargeConfig,
        logger: StructuredLogger,
    ) -> Result<Self> {
        let handles = NightChargeHandles::bind(entities)?;
        if !ctx.sequencer.levels().contains(config.amperage) {
            return Err(crate::error::AmpwiseError::validation(
                "night_charge.amperage".to_string(),
                format!("{}A is not a permitted level", config.amperage),
            ));
        }
        Ok(Self {
            ctx,
            handles,
            config,
            logger,
        })
    }

    pub fn session(&self) -> NightChargeSession {
        self.ctx.session.get()
    }

    /// Guards in order; `Err` names the first that failed
    fn check_guards(&self) -> std::result::Result<(), String> {
        let host = &self.ctx.host;
        if !host.is_enabled(self.handles.enabled.as_ref()) {
            return Err("night charge disabled".to_string());
        }
        let Some(start) = host.read_time(&self.handles.start_time) else {
            return Err("scheduled start time unavailable".to_string());
        };
        let now = self.ctx.clock.now();
        if !self.ctx.astral.in_night_window(start, now) {
            return Err("outside active window".to_string());
        }
        if !self.ctx.balancer.enabled() {
            return Err("priority balancing disabled".to_string());
        }
        if self.ctx.charger_status(&self.handles.status) == ChargerStatus::Free {
            return Err("no vehicle connected".to_string());
        }
        Ok(())
    }

    pub async fn evaluate(&self) -> Result<NightOutcome> {
        if let Err(reason) = self.check_guards() {
            self.end_session(&reason);
            return Ok(NightOutcome::Inactive(reason));
        }

        let day = self.ctx.balancer.today();
        let ev_target = self.ctx.balancer.ev_target_reading(day);
        let ev_soc = self.ctx.balancer.ev_soc();
        let forecast = self
            .handles
            .forecast
            .as_ref()
            .and_then(|e| self.ctx.host.read_f64(e))
            .unwrap_or(0.0);
        let session = self.session();

        match decide(
            ev_soc,
            ev_target,
            forecast,
            self.config.solar_forecast_threshold_kwh,
            session.active,
        ) {
            NightDecision::Skip => {
                self.logger
                    .warn("EV SOC or today's EV target unavailable, skipping cycle");
                Ok(NightOutcome::Skipped)
            }
            NightDecision::Noop => Ok(NightOutcome::Idle),
            NightDecision::Complete => {
                self.complete(ev_soc.unwrap_or_default(), ev_target.unwrap_or_default())
                    .await?;
                Ok(NightOutcome::Completed)
            }
            NightDecision::Charge(mode) => self.charge(mode, forecast, session).await,
        }
    }

    async fn charge(
        &self,
        mode: NightChargeMode,
        forecast: f64,
        previous: NightChargeSession,
    ) -> Result<NightOutcome> {
        let now = self.ctx.clock.now();
        // Mark first so solar surplus yields while the sequence runs
        let session = NightChargeSession {
            id: previous.id.or_else(|| Some(Uuid::new_v4())),
            active: true,
            mode,
            started_at: previous.started_at.or(Some(now)),
        };
        self.ctx.session.set(session);

        let reason = format!("Night charge ({mode:?} mode, forecast {forecast:.1} kWh)");
        let Some(grant) =
            self.ctx
                .acquire(PolicyKind::NightCharge, ControlAction::TurnOn, &reason, &self.logger)
        else {
            self.ctx.session.set(previous);
            return Ok(NightOutcome::Denied);
        };

        if let Err(e) = self
            .ctx
            .sequencer
            .start(&grant, Some(self.config.amperage), &reason)
            .await
        {
            self.ctx.session.set(previous);
            return Err(e);
        }

        if !previous.active {
            self.logger.info(&format!(
                "Session {} started in {mode:?} mode at {}A",
                session.id.unwrap_or_default(),
                self.config.amperage
            ));
            self.ctx.host.notify(Notification::new(
                NotificationCategory::NightCharge,
                format!(
                    "Night charging started at {}A ({})",
                    self.config.amperage,
                    mode_label(mode)
                ),
            ));
        } else if previous.mode != mode {
            self.logger
                .info(&format!("Switched from {:?} to {mode:?} mode", previous.mode));
        }
        self.ctx.publish(
            PolicyKind::NightCharge,
            mode_label(mode),
            json!({
                "session_id": session.id,
                "amperage": self.config.amperage,
                "forecast_kwh": forecast,
            }),
        );
        Ok(NightOutcome::Charging(mode))
    }

    async fn complete(&self, ev_soc: f64, ev_target: f64) -> Result<()> {
        let reason = format!("EV reached {ev_soc:.0}% (target {ev_target:.0}%)");
        let stop = match self.ctx.acquire(
            PolicyKind::NightCharge,
            ControlAction::TurnOff,
            &reason,
            &self.logger,
        ) {
            Some(grant) => self.ctx.sequencer.stop(&grant, &reason).await.map(|_| ()),
            None => Ok(()),
        };
        // The session ends even when the stop was denied or failed
        self.ctx.session.set(NightChargeSession::default());
        self.ctx.coordinator.release(PolicyKind::NightCharge, &reason);
        self.logger.info(&format!("Session complete: {reason}"));
        self.ctx.host.notify(Notification::new(
            NotificationCategory::NightCharge,
            format!("Night charging complete: {reason}"),
        ));
        self.ctx
            .publish(PolicyKind::NightCharge, "idle", json!({ "reason": reason }));
        stop
    }

    /// Drop a running session without stopping the charger
    fn end_session(&self, reason: &str) {
        if !self.session().active {
            return;
        }
        self.ctx.session.set(NightChargeSession::default());
        self.ctx.coordinator.release(PolicyKind::NightCharge, reason);
        self.logger.info(&format!("Session ended: {reason}"));
        self.ctx
            .publish(PolicyKind::NightCharge, "idle", json!({ "reason": reason }));
    }

    async fn tick(&self) {
        if let Err(e) = self.evaluate().await {
            report_failure(&self.ctx.host, &self.logger, PolicyKind::NightCharge, &e);
        }
    }

    /// Periodic tick plus re-evaluation when a car gets plugged in
    pub fn spawn(self: Arc<Self>) -> PolicyHandle {
        let period = Duration::from_secs(self.config.tick_interval_seconds);
        let ticker = {
            let policy = Arc::clone(&self);
            spawn_periodic(period, move || {
                let policy = Arc::clone(&policy);
                async move { policy.tick().await }
            })
        };
        let plugged = {
            let policy = Arc::clone(&self);
            spawn_on_change(
                &self.ctx.host,
                &self.handles.status,
                self.logger.clone(),
                move |change| {
                    let policy = Arc::clone(&policy);
                    async move {
                        if left(&change, ChargerStatus::Free)
                            || entered(&change, ChargerStatus::Connected)
                        {
                            policy.tick().await;
                        }
                    }
                },
            )
        };
        self.logger.info("Night smart charge active");
        PolicyHandle::new(PolicyKind::NightCharge, vec![ticker, plugged])
    }
}

const fn mode_label(mode: NightChargeMode) -> &'static str {
    match mode {
        NightChargeMode::Idle => "idle",
        NightChargeMode::Battery => "battery",
        NightChargeMode::Grid => "grid",
    }
}
