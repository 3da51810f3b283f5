use crate::config::FleetConfig;
use crate::control::UnitController;
use crate::error::Result;
use crate::hazard::{HazardPipeline, ThermalSource, VisualClassifier};
use crate::protocol::{
    decode_frame, encode_frame, now_ms, Ack, Frame, GeoPoint, HazardReport, Message, MissionParams,
    ReportedState, StatusReport,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

/// The mission currently held by the agent. Exactly one at a time; a
/// second assignment is refused with a busy ack.
#[derive(Debug, Clone)]
struct AssignedMission {
    task_id: String,
    waypoints: Vec<GeoPoint>,
    params: MissionParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentPhase {
    Idle,
    Assigned,
    Executing,
    Returning,
    /// Landed or killed away from home; requires operator recovery.
    Grounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortMode {
    /// abort/rtl: stop the mission and fly home autonomously.
    ReturnHome,
    /// land/kill: stop where we are, no further travel.
    StayPut,
}

struct MissionSlot {
    assigned: Option<AssignedMission>,
    phase: AgentPhase,
    abort_mode: AbortMode,
    abort_requested: bool,
}

struct AgentInner {
    unit_id: String,
    config: FleetConfig,
    controller: Mutex<Box<dyn UnitController>>,
    thermal: Mutex<Box<dyn ThermalSource>>,
    classifier: Mutex<Box<dyn VisualClassifier>>,
    pipeline: Mutex<HazardPipeline>,
    mission: Mutex<MissionSlot>,
    /// Launch position captured at startup; abort/rtl returns here.
    home: Mutex<Option<GeoPoint>>,
    abort: Notify,
    /// Outbound event frames fanned out to every controller connection.
    /// Telemetry is never gated on an outstanding request.
    events: broadcast::Sender<Frame>,
}

/// On-board agent: the server side of the remote command channel. Accepts
/// mission and emergency commands, drives the controller adapter, and
/// independently streams status reports at a fixed cadence plus hazard
/// reports as the pipeline confirms them.
pub struct UnitAgent {
    inner: Arc<AgentInner>,
}

impl UnitAgent {
    pub fn new(
        unit_id: impl Into<String>,
        controller: Box<dyn UnitController>,
        thermal: Box<dyn ThermalSource>,
        classifier: Box<dyn VisualClassifier>,
        config: FleetConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(AgentInner {
                unit_id: unit_id.into(),
                pipeline: Mutex::new(HazardPipeline::new(config.clone())),
                config,
                controller: Mutex::new(controller),
                thermal: Mutex::new(thermal),
                classifier: Mutex::new(classifier),
                mission: Mutex::new(MissionSlot {
                    assigned: None,
                    phase: AgentPhase::Idle,
                    abort_mode: AbortMode::ReturnHome,
                    abort_requested: false,
                }),
                home: Mutex::new(None),
                abort: Notify::new(),
                events,
            }),
        }
    }

    /// The confirmation token a kill command must carry for this unit.
    pub fn kill_token(unit_id: &str) -> String {
        format!("KILL-{}", unit_id)
    }

    /// Serve controller connections on `listener` until the process exits.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        {
            let mut controller = self.inner.controller.lock().await;
            controller.connect()?;
            let position = controller.read_telemetry().position;
            *self.inner.home.lock().await = Some(position);
        }
        info!(unit = %self.inner.unit_id, addr = ?listener.local_addr()?, "unit agent listening");

        AgentInner::spawn_status_loop(&self.inner);

        loop {
            let (stream, addr) = listener.accept().await?;
            info!(unit = %self.inner.unit_id, %addr, "controller connected");
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if let Err(e) = inner.serve_connection(stream).await {
                    debug!(%addr, error = %e, "connection ended");
                }
            });
        }
    }
}

impl AgentInner {
    fn spawn_status_loop(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(inner.config.status_report_interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = inner.current_report().await;
                // No subscribers just means no controller is connected.
                let _ = inner
                    .events
                    .send(Frame::Event(Message::StatusReport(report)));
            }
        });
    }

    async fn current_report(&self) -> StatusReport {
        let telemetry = {
            let mut controller = self.controller.lock().await;
            controller.read_telemetry()
        };
        let mission = self.mission.lock().await;
        let state = match mission.phase {
            AgentPhase::Idle | AgentPhase::Assigned => ReportedState::Idle,
            AgentPhase::Executing => ReportedState::Executing,
            // Grounded units await operator recovery; reporting returning
            // keeps them out of the assignment pool.
            AgentPhase::Returning | AgentPhase::Grounded => ReportedState::Returning,
        };
        StatusReport {
            unit_id: self.unit_id.clone(),
            state,
            battery: telemetry.battery,
            position: telemetry.position,
            task_id: mission.assigned.as_ref().map(|m| m.task_id.clone()),
            timestamp_ms: now_ms(),
        }
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        let (reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));

        // Forward broadcast events to this connection for as long as it
        // lives; request handling below shares the same writer.
        let event_writer = Arc::clone(&writer);
        let mut events = self.events.subscribe();
        let forwarder = tokio::spawn(async move {
            loop {
                let frame = match events.recv().await {
                    Ok(frame) => frame,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event forwarder lagged; reports dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let line = match encode_frame(&frame) {
                    Ok(line) => line,
                    Err(_) => continue,
                };
                let mut w = event_writer.lock().await;
                if w.write_all(line.as_bytes()).await.is_err()
                    || w.write_all(b"\n").await.is_err()
                {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let ack = match decode_frame(trimmed) {
                Ok(Frame::Request { seq, message }) => self.handle_request(seq, message).await,
                Ok(_) => {
                    warn!(unit = %self.unit_id, "non-request frame from controller; ignored");
                    continue;
                }
                Err(e) => {
                    warn!(unit = %self.unit_id, error = %e, "malformed frame from controller");
                    Ack::rejected(0, "malformed frame")
                }
            };
            let line = encode_frame(&Frame::Response(ack))?;
            let mut w = writer.lock().await;
            w.write_all(line.as_bytes()).await?;
            w.write_all(b"\n").await?;
        }

        forwarder.abort();
        Ok(())
    }

    async fn handle_request(self: &Arc<Self>, seq: u64, message: Message) -> Ack {
        debug!(unit = %self.unit_id, kind = message.label(), "request");
        match message {
            Message::MissionAssign {
                task_id,
                waypoints,
                params,
                ..
            } => {
                let mut mission = self.mission.lock().await;
                if let Some(active) = &mission.assigned {
                    return Ack::busy(seq, &active.task_id);
                }
                if mission.phase == AgentPhase::Grounded {
                    return Ack::rejected(seq, "unit grounded; requires recovery");
                }
                mission.assigned = Some(AssignedMission {
                    task_id,
                    waypoints,
                    params,
                });
                mission.phase = AgentPhase::Assigned;
                Ack::accepted(seq)
            }

            Message::MissionStart => {
                let mut mission = self.mission.lock().await;
                match (&mission.assigned, mission.phase) {
                    (Some(assigned), AgentPhase::Assigned) => {
                        let assigned = assigned.clone();
                        mission.phase = AgentPhase::Executing;
                        mission.abort_mode = AbortMode::ReturnHome;
                        mission.abort_requested = false;
                        drop(mission);
                        let inner = Arc::clone(self);
                        tokio::spawn(async move {
                            inner.fly_mission(assigned).await;
                        });
                        Ack::accepted(seq)
                    }
                    (Some(_), _) => Ack::rejected(seq, "mission already started"),
                    (None, _) => Ack::rejected(seq, "no mission assigned"),
                }
            }

            Message::MissionAbort | Message::Rtl => {
                let mut mission = self.mission.lock().await;
                if mission.phase == AgentPhase::Executing {
                    mission.abort_mode = AbortMode::ReturnHome;
                    mission.abort_requested = true;
                    drop(mission);
                    self.abort.notify_one();
                } else {
                    // Defensive: acknowledged even without an active
                    // mission, so emergency control works against any
                    // reachable unit.
                    mission.assigned = None;
                    if mission.phase == AgentPhase::Assigned {
                        mission.phase = AgentPhase::Idle;
                    }
                }
                Ack::accepted(seq)
            }

            Message::Land => {
                self.stop_in_place().await;
                Ack::accepted(seq)
            }

            Message::Kill { confirm_token } => {
                if confirm_token != UnitAgent::kill_token(&self.unit_id) {
                    return Ack::rejected(seq, "confirmation token mismatch");
                }
                self.stop_in_place().await;
                Ack::accepted(seq)
            }

            Message::StatusRequest => {
                let mut ack = Ack::accepted(seq);
                ack.report = Some(self.current_report().await);
                ack
            }

            Message::Heartbeat => Ack::accepted(seq),

            Message::StatusReport(_) | Message::HazardReport(_) => {
                Ack::rejected(seq, "report frames are unit-to-controller only")
            }
        }
    }

    /// land/kill path: halt the mission where it is and cut propulsion.
    async fn stop_in_place(self: &Arc<Self>) {
        let mut mission = self.mission.lock().await;
        if mission.phase == AgentPhase::Executing {
            mission.abort_mode = AbortMode::StayPut;
            mission.abort_requested = true;
            drop(mission);
            self.abort.notify_one();
        } else {
            mission.assigned = None;
            mission.phase = AgentPhase::Grounded;
            drop(mission);
            let mut controller = self.controller.lock().await;
            let _ = controller.disarm();
        }
    }

    /// Execute the assigned mission: arm, fly the waypoint sequence while
    /// running the hazard pipeline, then return home. Every pause point
    /// also listens for an abort.
    async fn fly_mission(self: Arc<Self>, assigned: AssignedMission) {
        info!(unit = %self.unit_id, task = %assigned.task_id, "mission started");
        {
            let mut controller = self.controller.lock().await;
            if let Err(e) = controller.arm() {
                warn!(unit = %self.unit_id, error = %e, "arm failed; mission abandoned");
                drop(controller);
                self.finish_aborted(AbortMode::StayPut).await;
                return;
            }
        }

        let leg_pause = self.config.status_report_interval;
        for waypoint in &assigned.waypoints {
            {
                let mut controller = self.controller.lock().await;
                if let Err(e) = controller.navigate(*waypoint) {
                    warn!(unit = %self.unit_id, error = %e, "navigation fault; returning");
                    drop(controller);
                    self.finish_aborted(AbortMode::ReturnHome).await;
                    return;
                }
            }
            self.scan_for_hazards(&assigned, *waypoint).await;

            tokio::select! {
                _ = time::sleep(leg_pause) => {}
                _ = self.abort.notified() => {}
            }
            // A stale notify permit without a request is ignored.
            let (requested, mode) = {
                let mission = self.mission.lock().await;
                (mission.abort_requested, mission.abort_mode)
            };
            if requested {
                self.finish_aborted(mode).await;
                return;
            }
        }

        // Sweep complete; report it once, then make the mandatory return
        // to base before the controller will consider us idle again.
        self.send_oneshot_report(ReportedState::MissionComplete).await;
        {
            let mut mission = self.mission.lock().await;
            mission.phase = AgentPhase::Returning;
        }
        self.return_home().await;
        self.finish_mission(&assigned.task_id).await;
        info!(unit = %self.unit_id, task = %assigned.task_id, "mission complete");
    }

    /// One pipeline pass at the current waypoint. A confirmed event goes
    /// straight onto the event stream as a hazard report.
    async fn scan_for_hazards(&self, assigned: &AssignedMission, position: GeoPoint) {
        let frame = {
            let mut thermal = self.thermal.lock().await;
            thermal.capture()
        };
        let candidate = {
            let pipeline = self.pipeline.lock().await;
            pipeline.detect_candidate(&frame, &assigned.task_id, position)
        };
        let Some(candidate) = candidate else {
            return;
        };
        let visual_score = {
            let mut classifier = self.classifier.lock().await;
            classifier.score()
        };
        let event = {
            let mut pipeline = self.pipeline.lock().await;
            pipeline.confirm(&candidate, visual_score)
        };
        if let Some(event) = event {
            info!(
                unit = %self.unit_id,
                task = %event.task_id,
                confidence = event.confidence,
                "hazard confirmed"
            );
            let report = HazardReport {
                unit_id: self.unit_id.clone(),
                task_id: event.task_id.clone(),
                location: event.location,
                confidence: event.confidence,
                temperature_c: event.temperature_c,
                timestamp_ms: event.timestamp_ms,
            };
            let _ = self.events.send(Frame::Event(Message::HazardReport(report)));
        }
    }

    async fn finish_aborted(self: &Arc<Self>, mode: AbortMode) {
        self.send_oneshot_report(ReportedState::MissionAborted).await;
        match mode {
            AbortMode::ReturnHome => {
                {
                    let mut mission = self.mission.lock().await;
                    mission.phase = AgentPhase::Returning;
                }
                self.return_home().await;
                let task_id = {
                    let mission = self.mission.lock().await;
                    mission.assigned.as_ref().map(|m| m.task_id.clone())
                };
                if let Some(task_id) = task_id {
                    self.finish_mission(&task_id).await;
                }
            }
            AbortMode::StayPut => {
                let mut mission = self.mission.lock().await;
                mission.assigned = None;
                mission.phase = AgentPhase::Grounded;
                drop(mission);
                let mut controller = self.controller.lock().await;
                let _ = controller.disarm();
            }
        }
    }

    async fn return_home(&self) {
        let home = *self.home.lock().await;
        if let Some(home) = home {
            let mut controller = self.controller.lock().await;
            if let Err(e) = controller.navigate(home) {
                warn!(unit = %self.unit_id, error = %e, "return navigation fault");
            }
        }
        time::sleep(self.config.status_report_interval).await;
    }

    /// Back at base: disarm, clear the mission slot, report home.
    async fn finish_mission(&self, task_id: &str) {
        {
            let mut controller = self.controller.lock().await;
            let _ = controller.disarm();
        }
        {
            let mut mission = self.mission.lock().await;
            mission.assigned = None;
            mission.phase = AgentPhase::Idle;
        }
        {
            let mut pipeline = self.pipeline.lock().await;
            pipeline.clear_task(task_id);
        }
        self.send_oneshot_report(ReportedState::Home).await;
    }

    async fn send_oneshot_report(&self, state: ReportedState) {
        let mut report = self.current_report().await;
        report.state = state;
        let _ = self.events.send(Frame::Event(Message::StatusReport(report)));
    }
}
