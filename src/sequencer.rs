//! Charger command sequencer
//!
//! The only component that mutates the charger. It serializes every
//! operation behind one async lock (held across the settle waits of a
//! sequence), spaces executed operations by a minimum interval, queues what
//! arrives too early, and turns current decreases into the safe
//! off / set / on sequence.

use crate::amperage::AmperageLevels;
use crate::clock::{Clock, elapsed_between};
use crate::config::{ChargerConfig, EntitiesConfig};
use crate::coordinator::ControlGrant;
use crate::error::{AmpwiseError, Result};
use crate::host::{EntityId, Host, HostExt, ServiceCall, bind_required};
use crate::logging::StructuredLogger;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

mod operation;

pub use operation::{ChargerOperation, ChargerSnapshot, OperationKind, OperationOutcome};
use operation::Plan;

/// Actuator entities the sequencer drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargerHandles {
    pub switch: EntityId,
    pub current: EntityId,
}

impl ChargerHandles {
    pub fn bind(entities: &EntitiesConfig) -> Result<Self> {
        Ok(Self {
            switch: bind_required("charger_switch", entities.charger_switch.as_ref())?,
            current: bind_required("charger_current", entities.charger_current.as_ref())?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    min_interval: Duration,
    service_timeout: Duration,
    decrease_off_delay: Duration,
    decrease_set_delay: Duration,
    stabilization: Duration,
    start_sequence: Duration,
    command_delay: Duration,
}

impl Timing {
    fn from_config(config: &ChargerConfig) -> Self {
        Self {
            min_interval: config.min_operation_interval(),
            service_timeout: config.service_timeout(),
            decrease_off_delay: config.decrease_off_delay(),
            decrease_set_delay: config.decrease_set_delay(),
            stabilization: config.amperage_stabilization(),
            start_sequence: config.start_sequence(),
            command_delay: config.command_delay(),
        }
    }
}

struct Inner {
    host: Arc<dyn Host>,
    clock: Arc<dyn Clock>,
    handles: ChargerHandles,
    levels: AmperageLevels,
    timing: Timing,
    capacity: usize,
    op_lock: tokio::sync::Mutex<()>,
    queue: Mutex<VecDeque<ChargerOperation>>,
    draining: AtomicBool,
    drained: Notify,
    snapshot: RwLock<ChargerSnapshot>,
    logger: StructuredLogger,
}

/// Cheap to clone; clones share the same queue, lock and cache
#[derive(Clone)]
pub struct ChargerSequencer {
    inner: Arc<Inner>,
}

impl ChargerSequencer {
    pub fn new(
        config: &ChargerConfig,
        handles: ChargerHandles,
        host: Arc<dyn Host>,
        clock: Arc<dyn Clock>,
        logger: StructuredLogger,
    ) -> Result<Self> {
        let levels = AmperageLevels::new(config.amperage_levels.clone())?;
        if config.queue_capacity == 0 {
            return Err(AmpwiseError::validation(
                "charger.queue_capacity",
                "Must be greater than 0",
            ));
        }
        let sequencer = Self {
            inner: Arc::new(Inner {
                host,
                clock,
                handles,
                levels,
                timing: Timing::from_config(config),
                capacity: config.queue_capacity,
                op_lock: tokio::sync::Mutex::new(()),
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                drained: Notify::new(),
                snapshot: RwLock::new(ChargerSnapshot::default()),
                logger,
            }),
        };
        sequencer.refresh();
        Ok(sequencer)
    }

    pub fn levels(&self) -> &AmperageLevels {
        &self.inner.levels
    }

    /// Switch on, first setting `target_amperage` when given
    pub async fn start(
        &self,
        grant: &ControlGrant,
        target_amperage: Option<u32>,
        reason: &str,
    ) -> Result<OperationOutcome> {
        let target = target_amperage.map(|a| self.inner.levels.snap(a));
        self.submit(grant, OperationKind::Start, target, reason).await
    }

    pub async fn stop(&self, grant: &ControlGrant, reason: &str) -> Result<OperationOutcome> {
        self.submit(grant, OperationKind::Stop, None, reason).await
    }

    /// Change the current; the request is snapped to the nearest level
    pub async fn set_amperage(
        &self,
        grant: &ControlGrant,
        target: u32,
        reason: &str,
    ) -> Result<OperationOutcome> {
        let snapped = self.inner.levels.snap(target);
        if snapped != target {
            self.inner
                .logger
                .debug(&format!("Requested {target}A snapped to {snapped}A"));
        }
        self.submit(grant, OperationKind::SetAmperage, Some(snapped), reason)
            .await
    }

    /// Re-read switch and current from the host into the cache. Unreadable
    /// values keep their cached counterpart.
    pub fn refresh(&self) -> ChargerSnapshot {
        let host = &self.inner.host;
        let is_on = host.read_bool(&self.inner.handles.switch);
        let current = host
            .read_f64(&self.inner.handles.current)
            .filter(|a| *a >= 0.0)
            .map(round_amps);
        let mut snapshot = self.write_snapshot();
        if let Some(on) = is_on {
            snapshot.is_on = on;
        }
        if current.is_some() {
            snapshot.current_amperage = current;
        }
        *snapshot
    }

    pub fn snapshot(&self) -> ChargerSnapshot {
        *self
            .inner
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_on(&self) -> bool {
        self.snapshot().is_on
    }

    pub fn current_amperage(&self) -> Option<u32> {
        self.snapshot().current_amperage
    }

    pub fn queue_size(&self) -> usize {
        self.queue().len()
    }

    /// Operations waiting, oldest first
    pub fn pending(&self) -> Vec<ChargerOperation> {
        self.queue().iter().cloned().collect()
    }

    pub fn seconds_since_last_operation(&self) -> Option<f64> {
        let last = self.snapshot().last_operation_at?;
        Some(elapsed_between(last, self.inner.clock.now()).as_secs_f64())
    }

    /// Resolve once the queue is empty and no drain task is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.queue_size() == 0 && !self.inner.draining.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    async fn submit(
        &self,
        grant: &ControlGrant,
        kind: OperationKind,
        target: Option<u32>,
        reason: &str,
    ) -> Result<OperationOutcome> {
        if grant.action() != kind.required_action() {
            return Err(AmpwiseError::validation(
                "grant".to_string(),
                format!(
                    "{} grant for {} cannot authorize {kind}",
                    grant.action(),
                    grant.policy()
                ),
            ));
        }

        let snapshot = self.refresh();
        let queue_empty = self.queue_size() == 0;
        if queue_empty && Plan::for_operation(&snapshot, kind, target).is_none() {
            return Ok(OperationOutcome::NoOp);
        }

        if !queue_empty || self.rate_limited() {
            self.enqueue(ChargerOperation {
                kind,
                target_amperage: target,
                reason: reason.to_string(),
                enqueued_at: self.inner.clock.now(),
                grant: grant.clone(),
            })?;
            return Ok(OperationOutcome::Queued);
        }

        self.execute(kind, target, reason).await
    }

    fn rate_limited(&self) -> bool {
        let min_interval = self.inner.timing.min_interval;
        if min_interval.is_zero() {
            return false;
        }
        self.snapshot().last_operation_at.is_some_and(|last| {
            elapsed_between(last, self.inner.clock.now()) <= min_interval
        })
    }

    fn enqueue(&self, op: ChargerOperation) -> Result<()> {
        {
            let mut queue = self.queue();
            if queue.len() >= self.inner.capacity {
                self.inner.logger.error(&format!(
                    "Queue full, rejecting {} ({})",
                    op.kind, op.reason
                ));
                return Err(AmpwiseError::queue_full(self.inner.capacity));
            }
            self.inner.logger.info(&format!(
                "Rate limited, queued {} ({}) at position {}",
                op.kind,
                op.reason,
                queue.len() + 1
            ));
            queue.push_back(op);
        }
        self.spawn_drain();
        Ok(())
    }

    fn spawn_drain(&self) {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let sequencer = self.clone();
        tokio::spawn(async move { sequencer.drain().await });
    }

    async fn drain(&self) {
        loop {
            let next = self.queue().pop_front();
            let Some(op) = next else {
                self.inner.draining.store(false, Ordering::Release);
                // An enqueue may have raced the flag reset
                if self.queue_size() > 0
                    && self
                        .inner
                        .draining
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    continue;
                }
                self.inner.drained.notify_waiters();
                return;
            };

            let waited = elapsed_between(op.enqueued_at, self.inner.clock.now());
            self.inner.logger.debug(&format!(
                "Draining {} for {} ({}) after {:.1}s in queue",
                op.kind,
                op.grant.policy(),
                op.reason,
                waited.as_secs_f64()
            ));
            if let Err(e) = self.execute(op.kind, op.target_amperage, &op.reason).await {
                self.inner
                    .logger
                    .error(&format!("Queued {} ({}) failed: {e}", op.kind, op.reason));
            }
        }
    }

    /// Run one operation inside the exclusive section
    async fn execute(
        &self,
        kind: OperationKind,
        target: Option<u32>,
        reason: &str,
    ) -> Result<OperationOutcome> {
        let _guard = self.inner.op_lock.lock().await;
        self.wait_out_interval().await;

        let snapshot = self.refresh();
        let Some(plan) = Plan::for_operation(&snapshot, kind, target) else {
            return Ok(OperationOutcome::NoOp);
        };

        self.inner.logger.info(&format!("{kind}: {reason}"));
        let result = self.run(plan).await;
        self.write_snapshot().last_operation_at = Some(self.inner.clock.now());
        self.refresh();
        result.map(|()| OperationOutcome::Executed)
    }

    async fn wait_out_interval(&self) {
        let Some(last) = self.snapshot().last_operation_at else {
            return;
        };
        let elapsed = elapsed_between(last, self.inner.clock.now());
        if let Some(remaining) = self.inner.timing.min_interval.checked_sub(elapsed) {
            if !remaining.is_zero() {
                self.inner.clock.sleep(remaining).await;
            }
        }
    }

    async fn run(&self, plan: Plan) -> Result<()> {
        let timing = self.inner.timing;
        let clock = &self.inner.clock;
        match plan {
            Plan::Start { set } => {
                if let Some(amps) = set {
                    self.set_value(amps).await?;
                    clock.sleep(timing.stabilization).await;
                }
                self.switch(true).await?;
                clock.sleep(timing.start_sequence).await;
            }
            Plan::Stop => {
                self.switch(false).await?;
                clock.sleep(timing.command_delay).await;
            }
            Plan::DirectSet(amps) => {
                self.set_value(amps).await?;
                clock.sleep(timing.command_delay).await;
            }
            Plan::SafeDecrease(amps) => {
                self.inner.logger.info(&format!(
                    "Safe decrease to {amps}A: off, wait {:?}, set, wait {:?}, on",
                    timing.decrease_off_delay, timing.decrease_set_delay
                ));
                self.switch(false).await?;
                clock.sleep(timing.decrease_off_delay).await;
                self.set_value(amps).await?;
                clock.sleep(timing.decrease_set_delay).await;
                self.switch(true).await?;
            }
        }
        Ok(())
    }

    async fn switch(&self, on: bool) -> Result<()> {
        let entity = &self.inner.handles.switch;
        let call = if on {
            ServiceCall::turn_on(entity)
        } else {
            ServiceCall::turn_off(entity)
        };
        self.invoke(&call).await?;
        self.write_snapshot().is_on = on;
        Ok(())
    }

    async fn set_value(&self, amps: u32) -> Result<()> {
        self.invoke(&ServiceCall::set_value(&self.inner.handles.current, amps))
            .await?;
        self.write_snapshot().current_amperage = Some(amps);
        Ok(())
    }

    /// Single actuator call bounded by the service timeout
    async fn invoke(&self, call: &ServiceCall) -> Result<()> {
        let name = call.name();
        let timeout = self.inner.timing.service_timeout;
        match tokio::time::timeout(timeout, self.inner.host.call_service(call)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_actuator_failure() => Err(e),
            Ok(Err(e)) => Err(AmpwiseError::actuator(name, e.to_string())),
            Err(_) => Err(AmpwiseError::timeout(format!(
                "{name} on {} not acknowledged within {:.1}s",
                call.entity_id,
                timeout.as_secs_f64()
            ))),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<ChargerOperation>> {
        self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_snapshot(&self) -> std::sync::RwLockWriteGuard<'_, ChargerSnapshot> {
        self.inner
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_amps(amps: f64) -> u32 {
    amps.round().min(f64::from(u32::MAX)) as u32
}
