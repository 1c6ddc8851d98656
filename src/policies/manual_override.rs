//! Manual override
//!
//! Turning the override switch on takes control at the highest priority and
//! starts the charger; turning it off hands control back.

use super::{PolicyContext, PolicyHandle, report_failure, spawn_on_change};
use crate::config::EntitiesConfig;
use crate::coordinator::{ControlAction, PolicyKind};
use crate::error::Result;
use crate::host::{EntityId, HostExt, Notification, NotificationCategory, bind_required, parse_bool};
use crate::logging::StructuredLogger;
use crate::sequencer::OperationOutcome;
use std::sync::Arc;

pub struct ManualOverride {
    ctx: PolicyContext,
    switch: EntityId,
    logger: StructuredLogger,
}

impl ManualOverride {
    pub fn new(ctx: PolicyContext, entities: &EntitiesConfig, logger: StructuredLogger) -> Result<Self> {
        Ok(Self {
            ctx,
            switch: bind_required("override_switch", entities.override_switch.as_ref())?,
            logger,
        })
    }

    /// Take control and make sure the charger runs
    pub async fn engage(&self) -> Result<Option<OperationOutcome>> {
        let Some(grant) = self.ctx.acquire(
            PolicyKind::Override,
            ControlAction::TurnOn,
            "Manual override",
            &self.logger,
        ) else {
            return Ok(None);
        };
        let outcome = self.ctx.sequencer.start(&grant, None, "Manual override").await?;
        self.logger.info("Override engaged");
        self.ctx.host.notify(Notification::new(
            NotificationCategory::Override,
            "Manual override on: charging runs regardless of automation",
        ));
        Ok(Some(outcome))
    }

    pub fn disengage(&self) {
        if self
            .ctx
            .coordinator
            .release(PolicyKind::Override, "Manual override off")
        {
            self.logger.info("Override released");
            self.ctx.host.notify(Notification::new(
                NotificationCategory::Override,
                "Manual override off: automation resumed",
            ));
        }
    }

    async fn on_switch(&self, on: bool) {
        if on {
            if let Err(e) = self.engage().await {
                report_failure(&self.ctx.host, &self.logger, PolicyKind::Override, &e);
            }
        } else {
            self.disengage();
        }
    }

    pub fn spawn(self: Arc<Self>) -> PolicyHandle {
        let policy = Arc::clone(&self);
        let watcher = spawn_on_change(
            &self.ctx.host,
            &self.switch,
            self.logger.clone(),
            move |change| {
                let policy = Arc::clone(&policy);
                async move {
                    let was_on = change.old.as_deref().and_then(parse_bool);
                    let is_on = change.new.as_deref().and_then(parse_bool);
                    if let Some(on) = is_on.filter(|on| was_on != Some(*on)) {
                        policy.on_switch(on).await;
                    }
                }
            },
        );
        let mut tasks = vec![watcher];
        if self.ctx.host.is_on(Some(&self.switch)) {
            let policy = Arc::clone(&self);
            tasks.push(tokio::spawn(async move { policy.on_switch(true).await }));
        }
        PolicyHandle::new(PolicyKind::Override, tasks)
    }
}
