use crate::channel::{expect_accepted, CommandClient, UnitEvent, UnitLink};
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::protocol::{GeoPoint, Message, MissionParams, ReportedState, StatusReport};
use crate::protocol::HazardReport;
use crate::registry::{FleetRegistry, UnitRole, UnitState};
use crate::tasks::{TaskKind, TaskRecord, TaskResult, TaskState, TaskStore};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time;
use tracing::{error, info, warn};

/// Multi-task submission policy.
#[derive(Debug, Clone, Copy)]
pub enum BatchPolicy {
    /// Each task's full lifecycle completes before the next is created.
    Sequential { inter_task_delay: Duration },
    /// Bounded worker pool; up to `workers` tasks in flight, dispatches
    /// staggered to avoid command bursts.
    Parallel { workers: usize },
}

/// The brain of the operation: assigns tasks to idle units, drives both
/// state machines, and reacts to unit reports — including creating and
/// dispatching suppression tasks when a scout confirms a hazard.
pub struct Orchestrator {
    registry: Arc<FleetRegistry>,
    tasks: Arc<TaskStore>,
    config: FleetConfig,
    links: DashMap<String, Arc<dyn UnitLink>>,
    /// Confirmed hazards per scout task, folded into the result payload.
    hazard_counts: DashMap<String, u32>,
}

impl Orchestrator {
    pub fn new(registry: Arc<FleetRegistry>, tasks: Arc<TaskStore>, config: FleetConfig) -> Self {
        Self {
            registry,
            tasks,
            config,
            links: DashMap::new(),
            hazard_counts: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Wire up the command channel for a unit. Tests attach mocks here.
    pub fn attach_link(&self, link: Arc<dyn UnitLink>) {
        self.links.insert(link.unit_id().to_string(), link);
    }

    pub fn detach_link(&self, unit_id: &str) {
        self.links.remove(unit_id);
    }

    pub fn link(&self, unit_id: &str) -> Result<Arc<dyn UnitLink>> {
        self.links
            .get(unit_id)
            .map(|l| Arc::clone(l.value()))
            .ok_or_else(|| FleetError::ChannelClosed(unit_id.to_string()))
    }

    /// Connect the TCP command channel to a registered unit's endpoint and
    /// start its heartbeat loop.
    pub async fn connect_unit(
        &self,
        unit_id: &str,
        event_tx: mpsc::Sender<UnitEvent>,
    ) -> Result<Arc<CommandClient>> {
        let unit = self.registry.get(unit_id)?;
        let client = CommandClient::connect(unit_id, &unit.endpoint, event_tx.clone()).await?;
        client.start_heartbeat(
            self.config.heartbeat_interval,
            self.config.liveness_timeout,
            event_tx,
        );
        self.attach_link(client.clone() as Arc<dyn UnitLink>);
        Ok(client)
    }

    /// Operator entry point: create a scout task over an area. Assignment
    /// is attempted immediately; an unassignable task stays `created` and
    /// is retried as units return to idle.
    pub fn create_scout_task(&self, area: Vec<GeoPoint>, params: MissionParams) -> TaskRecord {
        let task = self.tasks.create_scout(area, params);
        info!(task = %task.id, "scout task created");
        task
    }

    /// Select a unit for a created task and claim both records. The claim
    /// is atomic: the task half rolls back if the unit half fails, so the
    /// single-assignment invariant holds. Returns the unit id, or None
    /// when no eligible unit exists.
    pub fn try_assign(&self, task_id: &str) -> Result<Option<String>> {
        let task = self.tasks.get(task_id)?;
        if task.state != TaskState::Created {
            return Ok(None);
        }
        let role = match task.kind {
            TaskKind::Scout => UnitRole::Scout,
            TaskKind::Suppress => UnitRole::Suppressor,
        };
        loop {
            let Some(unit_id) = self.registry.select_for_assignment(role) else {
                return Ok(None);
            };
            self.tasks.assign(task_id, &unit_id)?;
            match self.registry.begin_assignment(&unit_id, task_id) {
                Ok(()) => {
                    info!(task = %task_id, unit = %unit_id, "task assigned");
                    return Ok(Some(unit_id));
                }
                Err(e) => {
                    // Unit raced out of eligibility between selection and
                    // claim; undo the task half and pick another.
                    warn!(task = %task_id, unit = %unit_id, error = %e, "assignment claim lost");
                    self.tasks.rollback_assignment(task_id)?;
                }
            }
        }
    }

    /// Push an assigned task out to its unit: mission-assign then
    /// mission-start, each acked within the command timeout with bounded
    /// retries. Acked -> executing/flying; exhausted -> failed/returning
    /// (assume the unit attempts autonomous recovery).
    pub async fn dispatch(&self, task_id: &str) -> Result<()> {
        let task = self.tasks.get(task_id)?;
        let unit_id = task
            .assigned_unit
            .clone()
            .ok_or_else(|| FleetError::UnknownUnit(format!("task {} unassigned", task_id)))?;

        let outcome = self.send_mission(&task, &unit_id).await;
        match outcome {
            Ok(()) => {
                self.tasks.update_state(task_id, TaskState::Executing)?;
                self.registry.update_state(&unit_id, UnitState::Flying)?;
                info!(task = %task_id, unit = %unit_id, "mission executing");
                Ok(())
            }
            Err(e) => {
                error!(task = %task_id, unit = %unit_id, error = %e, "dispatch failed");
                self.tasks.fail(task_id)?;
                self.registry.update_state(&unit_id, UnitState::Returning)?;
                Err(e)
            }
        }
    }

    async fn send_mission(&self, task: &TaskRecord, unit_id: &str) -> Result<()> {
        let link = self.link(unit_id)?;
        let assign = Message::MissionAssign {
            task_id: task.id.clone(),
            waypoints: task.waypoints.clone(),
            area: task.area.clone(),
            params: task.params,
        };
        self.send_with_retry(&link, assign).await?;
        self.send_with_retry(&link, Message::MissionStart).await?;
        Ok(())
    }

    /// Retry only on timeout, with exponential backoff. `Busy` and
    /// explicit rejections are final; cancellation (emergency path) is
    /// never retried.
    async fn send_with_retry(&self, link: &Arc<dyn UnitLink>, message: Message) -> Result<()> {
        let mut backoff = self.config.backoff_base;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match link.request(message.clone(), self.config.command_timeout).await {
                Ok(ack) => {
                    expect_accepted(link.unit_id(), ack)?;
                    return Ok(());
                }
                Err(FleetError::Timeout { .. }) if attempts <= self.config.retry_count => {
                    warn!(
                        unit = link.unit_id(),
                        kind = message.label(),
                        attempts,
                        "command timed out; retrying"
                    );
                    time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(FleetError::Timeout { .. }) => {
                    return Err(FleetError::Timeout {
                        unit: link.unit_id().to_string(),
                        attempts,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Consume the per-unit event streams until every sender is dropped.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<UnitEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    /// One inbound event. Infallible by design: a single unit's fault must
    /// never take the orchestrator down, so failures degrade to log lines
    /// plus failed-task/returning-unit record states.
    pub async fn handle_event(self: &Arc<Self>, event: UnitEvent) {
        match event {
            UnitEvent::Status(report) => self.handle_status_report(report).await,
            UnitEvent::Hazard(report) => self.handle_hazard_report(report).await,
            UnitEvent::HeartbeatOk { unit_id } => {
                let was_reachable = self.registry.get(&unit_id).map(|u| u.reachable).ok();
                match self
                    .registry
                    .record_heartbeat(&unit_id, true, self.config.heartbeat_miss_limit)
                {
                    Ok(_) => {
                        if was_reachable == Some(false) {
                            info!(unit = %unit_id, "unit reachable again");
                            self.retry_pending_assignments().await;
                        }
                    }
                    Err(e) => warn!(unit = %unit_id, error = %e, "heartbeat bookkeeping failed"),
                }
            }
            UnitEvent::HeartbeatMiss { unit_id } => {
                match self
                    .registry
                    .record_heartbeat(&unit_id, false, self.config.heartbeat_miss_limit)
                {
                    Ok(reachable) => {
                        if !reachable {
                            warn!(unit = %unit_id, "unit unreachable; assignment suspended");
                        }
                    }
                    Err(e) => warn!(unit = %unit_id, error = %e, "heartbeat bookkeeping failed"),
                }
            }
            UnitEvent::Disconnected { unit_id } => {
                warn!(unit = %unit_id, "command channel lost");
                self.detach_link(&unit_id);
                if let Err(e) = self.registry.mark_unreachable(&unit_id) {
                    warn!(unit = %unit_id, error = %e, "could not mark unit unreachable");
                }
            }
        }
    }

    async fn handle_status_report(self: &Arc<Self>, report: StatusReport) {
        if let Err(e) = self.registry.update_telemetry(
            &report.unit_id,
            report.position,
            report.battery,
            report.timestamp_ms,
        ) {
            warn!(unit = %report.unit_id, error = %e, "status report from unknown unit");
            return;
        }

        match report.state {
            ReportedState::Executing => {}
            ReportedState::MissionComplete => {
                if let Some(task_id) = &report.task_id {
                    self.finish_task(task_id, &report.unit_id, true);
                }
            }
            ReportedState::MissionAborted => {
                if let Some(task_id) = &report.task_id {
                    self.finish_task(task_id, &report.unit_id, false);
                }
            }
            ReportedState::Returning => {}
            ReportedState::Home | ReportedState::Idle => {
                // Home confirmation closes the mandatory return leg.
                let unit = self.registry.get(&report.unit_id).ok();
                if unit.map(|u| u.state) == Some(UnitState::Returning) {
                    if let Err(e) = self.registry.update_state(&report.unit_id, UnitState::Idle) {
                        warn!(unit = %report.unit_id, error = %e, "return-to-idle failed");
                    } else {
                        info!(unit = %report.unit_id, "unit back at base, idle");
                        self.retry_pending_assignments().await;
                    }
                }
            }
        }
    }

    /// Terminal transition from a unit's own report. Late reports against
    /// an already-terminal task are discarded.
    fn finish_task(&self, task_id: &str, unit_id: &str, completed: bool) {
        let Ok(task) = self.tasks.get(task_id) else {
            warn!(task = %task_id, "terminal report for unknown task");
            return;
        };
        if task.state.is_terminal() {
            return;
        }
        let result = if completed {
            let hotspots = self
                .hazard_counts
                .remove(task_id)
                .map(|(_, n)| n)
                .unwrap_or(0);
            self.tasks.complete(
                task_id,
                TaskResult {
                    hotspots_detected: hotspots,
                    artifacts: Vec::new(),
                },
            )
        } else {
            self.tasks.fail(task_id)
        };
        if let Err(e) = result {
            warn!(task = %task_id, error = %e, "terminal transition rejected");
            return;
        }
        info!(task = %task_id, unit = %unit_id, completed, "task finished");
        // flying -> returning; an abort before start arrives as
        // assigned -> returning instead.
        if let Err(e) = self.registry.update_state(unit_id, UnitState::Returning) {
            warn!(unit = %unit_id, error = %e, "return transition rejected");
        }
    }

    /// Confirmed hazard from a scout: the only path that creates a task
    /// without an operator request. Late events after task termination are
    /// discarded, never retro-applied.
    async fn handle_hazard_report(self: &Arc<Self>, report: HazardReport) {
        let task = match self.tasks.get(&report.task_id) {
            Ok(task) => task,
            Err(e) => {
                warn!(task = %report.task_id, error = %e, "hazard report for unknown task");
                return;
            }
        };
        if task.state != TaskState::Executing || task.kind != TaskKind::Scout {
            warn!(
                task = %report.task_id,
                state = %task.state,
                "hazard report outside an executing scout task; discarded"
            );
            return;
        }
        *self
            .hazard_counts
            .entry(report.task_id.clone())
            .or_insert(0) += 1;

        info!(
            task = %report.task_id,
            confidence = report.confidence,
            temperature = report.temperature_c,
            "hazard confirmed; dispatching suppression"
        );
        let suppress = self.tasks.create_suppress(
            report.location,
            MissionParams {
                cruise_altitude_m: 30.0,
                cruise_speed_ms: 10.0,
            },
        );
        self.assign_and_dispatch(&suppress.id).await;
    }

    /// Assign if possible and dispatch in the background. No eligible unit
    /// leaves the task `created` for later retry.
    async fn assign_and_dispatch(self: &Arc<Self>, task_id: &str) {
        match self.try_assign(task_id) {
            Ok(Some(_)) => {
                let this = Arc::clone(self);
                let task_id = task_id.to_string();
                tokio::spawn(async move {
                    let _ = this.dispatch(&task_id).await;
                });
            }
            Ok(None) => {
                warn!(task = %task_id, "no eligible unit; task queued");
            }
            Err(e) => error!(task = %task_id, error = %e, "assignment failed"),
        }
    }

    /// Re-run assignment for every still-created task, oldest id first.
    /// Invoked whenever a unit becomes idle or reachable again.
    pub async fn retry_pending_assignments(self: &Arc<Self>) {
        let pending = self.tasks.list(|t| t.state == TaskState::Created);
        for task in pending {
            self.assign_and_dispatch(&task.id).await;
        }
    }

    /// Block until the task reaches a terminal state.
    pub async fn await_terminal(&self, task_id: &str) -> Result<TaskRecord> {
        loop {
            let task = self.tasks.get(task_id)?;
            if task.state.is_terminal() {
                return Ok(task);
            }
            time::sleep(self.config.completion_poll).await;
        }
    }

    /// Submit several scout areas under a batch policy. Returns the task
    /// ids in submission order.
    pub async fn run_batch(
        self: &Arc<Self>,
        areas: Vec<Vec<GeoPoint>>,
        params: MissionParams,
        policy: BatchPolicy,
    ) -> Vec<String> {
        match policy {
            BatchPolicy::Sequential { inter_task_delay } => {
                let mut ids = Vec::with_capacity(areas.len());
                for area in areas {
                    let task = self.create_scout_task(area, params);
                    self.drive_to_completion(&task.id).await;
                    ids.push(task.id);
                    time::sleep(inter_task_delay).await;
                }
                ids
            }
            BatchPolicy::Parallel { workers } => {
                let pool = Arc::new(Semaphore::new(workers.max(1)));
                let mut handles = Vec::with_capacity(areas.len());
                let mut ids = Vec::with_capacity(areas.len());
                for (i, area) in areas.into_iter().enumerate() {
                    let task = self.create_scout_task(area, params);
                    ids.push(task.id.clone());
                    let this = Arc::clone(self);
                    let pool = Arc::clone(&pool);
                    let stagger = self.config.batch_stagger * i as u32;
                    handles.push(tokio::spawn(async move {
                        let _permit = pool.acquire_owned().await;
                        time::sleep(stagger).await;
                        this.drive_to_completion(&task.id).await;
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
                ids
            }
        }
    }

    /// One batch worker: wait for an eligible unit, dispatch, await the
    /// terminal state. Dispatch failure already finalized the task.
    async fn drive_to_completion(self: &Arc<Self>, task_id: &str) {
        loop {
            match self.try_assign(task_id) {
                Ok(Some(_)) => break,
                Ok(None) => time::sleep(self.config.completion_poll).await,
                Err(e) => {
                    error!(task = %task_id, error = %e, "batch assignment failed");
                    return;
                }
            }
        }
        let _ = self.dispatch(task_id).await;
        let _ = self.await_terminal(task_id).await;
    }
}
