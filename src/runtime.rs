//! Composition root
//!
//! Builds the shared components from configuration, starts every policy
//! whose entities could be bound, and tears them down again. A policy that
//! fails to set up is logged and left out; the rest keep running.

use crate::astral::Astral;
use crate::balancer::{BalancerHandles, PriorityBalancer};
use crate::clock::Clock;
use crate::config::Config;
use crate::coordinator::{Coordinator, PolicyKind};
use crate::error::Result;
use crate::host::{Diagnostic, Host, bind_optional};
use crate::logging::{StructuredLogger, get_logger};
use crate::policies::{
    ManualOverride, NightSmartCharge, PolicyContext, PolicyHandle, SharedSession, SmartBlocker,
    SolarSurplus,
};
use crate::sequencer::{ChargerHandles, ChargerSequencer};
use std::sync::Arc;
use std::time::Duration;

mod diagnostics;

pub use diagnostics::RuntimeDiagnostics;

/// Decisions included in a diagnostics snapshot
const RECENT_DECISIONS: usize = 10;
const DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(60);

pub struct ChargingAutomation {
    config: Config,
    host: Arc<dyn Host>,
    clock: Arc<dyn Clock>,
    coordinator: Arc<Coordinator>,
    balancer: Arc<PriorityBalancer>,
    astral: Arc<Astral>,
    session: SharedSession,
    sequencer: Option<ChargerSequencer>,
    handles: Vec<PolicyHandle>,
    reporter: Option<tokio::task::JoinHandle<()>>,
    logger: StructuredLogger,
}

impl ChargingAutomation {
    /// Bind the shared components. Only a broken site location is fatal; a
    /// charger that cannot be bound leaves every policy disabled.
    pub fn new(config: Config, host: Arc<dyn Host>, clock: Arc<dyn Clock>) -> Result<Self> {
        let logger = get_logger("runtime");
        let astral = Arc::new(Astral::from_config(&config.location)?);
        let entities = &config.entities;

        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&host),
            Arc::clone(&clock),
            bind_optional(entities.override_switch.as_ref()),
            get_logger("coordinator"),
        ));
        let balancer = Arc::new(PriorityBalancer::new(
            Arc::clone(&host),
            Arc::clone(&clock),
            astral.timezone(),
            BalancerHandles::bind(entities),
            config.balancer.clone(),
            get_logger("balancer"),
        ));

        let sequencer = ChargerHandles::bind(entities).and_then(|handles| {
            ChargerSequencer::new(
                &config.charger,
                handles,
                Arc::clone(&host),
                Arc::clone(&clock),
                get_logger("sequencer"),
            )
        });
        let sequencer = match sequencer {
            Ok(s) => Some(s),
            Err(e) => {
                logger.error(&format!("Charger unavailable, all policies disabled: {e}"));
                None
            }
        };

        Ok(Self {
            config,
            host,
            clock,
            coordinator,
            balancer,
            astral,
            session: SharedSession::default(),
            sequencer,
            handles: Vec::new(),
            reporter: None,
            logger,
        })
    }

    /// Shared collaborators, `None` without a charger
    pub fn context(&self) -> Option<PolicyContext> {
        Some(PolicyContext {
            host: Arc::clone(&self.host),
            clock: Arc::clone(&self.clock),
            coordinator: Arc::clone(&self.coordinator),
            sequencer: self.sequencer.clone()?,
            balancer: Arc::clone(&self.balancer),
            astral: Arc::clone(&self.astral),
            session: self.session.clone(),
        })
    }

    /// Start every policy that can be set up; returns those now running
    pub fn start(&mut self) -> Vec<PolicyKind> {
        if !self.handles.is_empty() {
            return self.running_policies();
        }
        let Some(ctx) = self.context() else {
            return Vec::new();
        };
        let entities = &self.config.entities;

        let setups: [(PolicyKind, Result<PolicyHandle>); 4] = [
            (
                PolicyKind::Override,
                ManualOverride::new(ctx.clone(), entities, get_logger("manual_override"))
                    .map(|p| Arc::new(p).spawn()),
            ),
            (
                PolicyKind::SmartBlocker,
                SmartBlocker::new(
                    ctx.clone(),
                    entities,
                    self.config.blocker.clone(),
                    get_logger("smart_blocker"),
                )
                .map(|p| Arc::new(p).spawn()),
            ),
            (
                PolicyKind::NightCharge,
                NightSmartCharge::new(
                    ctx.clone(),
                    entities,
                    self.config.night_charge.clone(),
                    get_logger("night_charge"),
                )
                .map(|p| Arc::new(p).spawn()),
            ),
            (
                PolicyKind::SolarSurplus,
                SolarSurplus::new(
                    ctx,
                    entities,
                    &self.config.charger,
                    self.config.solar_surplus.clone(),
                    get_logger("solar_surplus"),
                )
                .map(|p| Arc::new(p).spawn()),
            ),
        ];

        for (policy, setup) in setups {
            match setup {
                Ok(handle) => self.handles.push(handle),
                Err(e) => self
                    .logger
                    .error(&format!("Policy {policy} disabled: {e}")),
            }
        }

        self.reporter = Some(self.spawn_reporter());
        let running = self.running_policies();
        self.logger.info(&format!("Started policies: {running:?}"));
        running
    }

    /// Stop all policy tasks and drop any held control
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.teardown();
        }
        if let Some(reporter) = self.reporter.take() {
            reporter.abort();
        }
        self.coordinator.release_all("shutdown");
        self.logger.info("Automation stopped");
    }

    pub fn running_policies(&self) -> Vec<PolicyKind> {
        self.handles.iter().map(PolicyHandle::policy).collect()
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn balancer(&self) -> &Arc<PriorityBalancer> {
        &self.balancer
    }

    pub const fn sequencer(&self) -> Option<&ChargerSequencer> {
        self.sequencer.as_ref()
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn diagnostics(&self) -> RuntimeDiagnostics {
        snapshot(
            &self.clock,
            &self.coordinator,
            &self.balancer,
            &self.session,
            self.sequencer.as_ref(),
            self.running_policies(),
        )
    }

    fn spawn_reporter(&self) -> tokio::task::JoinHandle<()> {
        let host = Arc::clone(&self.host);
        let clock = Arc::clone(&self.clock);
        let coordinator = Arc::clone(&self.coordinator);
        let balancer = Arc::clone(&self.balancer);
        let session = self.session.clone();
        let sequencer = self.sequencer.clone();
        let running = self.running_policies();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(DIAGNOSTICS_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let diagnostics = snapshot(
                    &clock,
                    &coordinator,
                    &balancer,
                    &session,
                    sequencer.as_ref(),
                    running.clone(),
                );
                match serde_json::to_value(&diagnostics) {
                    Ok(attributes) => host.publish(Diagnostic {
                        component: "runtime".to_string(),
                        state: diagnostics.state_label().to_string(),
                        attributes,
                    }),
                    Err(e) => logger.warn(&format!("Failed to serialize diagnostics: {e}")),
                }
            }
        })
    }
}

fn snapshot(
    clock: &Arc<dyn Clock>,
    coordinator: &Coordinator,
    balancer: &PriorityBalancer,
    session: &SharedSession,
    sequencer: Option<&ChargerSequencer>,
    running_policies: Vec<PolicyKind>,
) -> RuntimeDiagnostics {
    let history = coordinator.history();
    let recent = history
        .iter()
        .skip(history.len().saturating_sub(RECENT_DECISIONS))
        .cloned()
        .collect();
    RuntimeDiagnostics {
        generated_at: clock.now(),
        running_policies,
        override_on: coordinator.is_override_on(),
        active_control: coordinator.active_control(),
        priority: balancer.last_verdict(),
        night_charge: session.get(),
        charger: sequencer.map(ChargerSequencer::snapshot),
        queue_size: sequencer.map_or(0, ChargerSequencer::queue_size),
        seconds_since_last_operation: sequencer
            .and_then(ChargerSequencer::seconds_since_last_operation),
        recent_decisions: recent,
    }
}

impl Drop for ChargingAutomation {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.teardown();
        }
        if let Some(reporter) = self.reporter.take() {
            reporter.abort();
        }
    }
}
