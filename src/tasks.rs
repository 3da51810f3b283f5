use crate::error::{FleetError, Result};
use crate::protocol::{now_ms, GeoPoint, MissionParams};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Scout,
    Suppress,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Scout => write!(f, "scout"),
            TaskKind::Suppress => write!(f, "suppress"),
        }
    }
}

/// Task lifecycle: created -> assigned -> executing -> {completed | failed},
/// with assigned -> failed covering dispatch failure. Completed and failed
/// are terminal; terminal records never mutate again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Assigned,
    Executing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Created, TaskState::Assigned)
                | (TaskState::Assigned, TaskState::Executing)
                | (TaskState::Assigned, TaskState::Failed)
                | (TaskState::Executing, TaskState::Completed)
                | (TaskState::Executing, TaskState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Assigned => "assigned",
            TaskState::Executing => "executing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Opaque result payload, readable after the task reaches a terminal state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub hotspots_detected: u32,
    /// References to captured artifacts (image/thermal captures).
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub kind: TaskKind,
    /// Ordered polygon for scout sweeps; suppression tasks carry a small
    /// box around the target point.
    pub area: Vec<GeoPoint>,
    pub target: Option<GeoPoint>,
    pub waypoints: Vec<GeoPoint>,
    pub params: MissionParams,
    pub state: TaskState,
    pub assigned_unit: Option<String>,
    pub created_ms: i64,
    pub started_ms: Option<i64>,
    pub completed_ms: Option<i64>,
    pub result: Option<TaskResult>,
}

/// Authoritative store of every mission task, per-record locking like the
/// fleet registry. Ids are time-derived (`TASK-YYYYMMDD-NNNN`).
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<String, TaskRecord>,
    counter: AtomicU64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("TASK-{}-{:04}", Utc::now().format("%Y%m%d"), n)
    }

    /// Create a scout task over an area. Waypoints are a serpentine sweep
    /// of the area's bounding box.
    pub fn create_scout(&self, area: Vec<GeoPoint>, params: MissionParams) -> TaskRecord {
        let waypoints = serpentine_waypoints(&area, 4, params.cruise_altitude_m);
        self.insert(TaskKind::Scout, area, None, waypoints, params)
    }

    /// Create a suppression task targeting a confirmed hazard location.
    pub fn create_suppress(&self, target: GeoPoint, params: MissionParams) -> TaskRecord {
        // ~10 m box around the target, matching the sweep the suppressor
        // performs over the hazard.
        let d = 0.0001;
        let area = vec![
            GeoPoint::new(target.lat + d, target.lon - d, params.cruise_altitude_m),
            GeoPoint::new(target.lat + d, target.lon + d, params.cruise_altitude_m),
            GeoPoint::new(target.lat - d, target.lon + d, params.cruise_altitude_m),
            GeoPoint::new(target.lat - d, target.lon - d, params.cruise_altitude_m),
        ];
        let waypoints = vec![GeoPoint::new(target.lat, target.lon, params.cruise_altitude_m)];
        self.insert(TaskKind::Suppress, area, Some(target), waypoints, params)
    }

    fn insert(
        &self,
        kind: TaskKind,
        area: Vec<GeoPoint>,
        target: Option<GeoPoint>,
        waypoints: Vec<GeoPoint>,
        params: MissionParams,
    ) -> TaskRecord {
        let record = TaskRecord {
            id: self.next_id(),
            kind,
            area,
            target,
            waypoints,
            params,
            state: TaskState::Created,
            assigned_unit: None,
            created_ms: now_ms(),
            started_ms: None,
            completed_ms: None,
            result: None,
        };
        self.tasks.insert(record.id.clone(), record.clone());
        record
    }

    pub fn get(&self, id: &str) -> Result<TaskRecord> {
        self.tasks
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| FleetError::UnknownTask(id.to_string()))
    }

    pub fn list<F>(&self, filter: F) -> Vec<TaskRecord>
    where
        F: Fn(&TaskRecord) -> bool,
    {
        let mut out: Vec<TaskRecord> = self
            .tasks
            .iter()
            .filter(|r| filter(r.value()))
            .map(|r| r.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Total transition function; rejection leaves the record untouched and
    /// terminal records reject every further transition.
    pub fn update_state(&self, id: &str, next: TaskState) -> Result<()> {
        let mut rec = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownTask(id.to_string()))?;
        if !rec.state.can_transition_to(next) {
            return Err(FleetError::InvalidTransition {
                entity: "task",
                id: id.to_string(),
                from: rec.state.to_string(),
                to: next.to_string(),
            });
        }
        rec.state = next;
        match next {
            TaskState::Executing => rec.started_ms = Some(now_ms()),
            TaskState::Completed | TaskState::Failed => rec.completed_ms = Some(now_ms()),
            _ => {}
        }
        Ok(())
    }

    /// First half of the atomic assignment: created -> assigned with the
    /// unit recorded. The orchestrator rolls this back if claiming the
    /// unit fails.
    pub fn assign(&self, id: &str, unit_id: &str) -> Result<()> {
        let mut rec = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownTask(id.to_string()))?;
        if !rec.state.can_transition_to(TaskState::Assigned) {
            return Err(FleetError::InvalidTransition {
                entity: "task",
                id: id.to_string(),
                from: rec.state.to_string(),
                to: TaskState::Assigned.to_string(),
            });
        }
        rec.state = TaskState::Assigned;
        rec.assigned_unit = Some(unit_id.to_string());
        Ok(())
    }

    /// Undo a half-completed assignment. Not a lifecycle edge: it restores
    /// the pre-assignment record so the single-assignment invariant holds
    /// when the unit half of the claim fails.
    pub fn rollback_assignment(&self, id: &str) -> Result<()> {
        let mut rec = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownTask(id.to_string()))?;
        if rec.state != TaskState::Assigned {
            return Err(FleetError::InvalidTransition {
                entity: "task",
                id: id.to_string(),
                from: rec.state.to_string(),
                to: TaskState::Created.to_string(),
            });
        }
        rec.state = TaskState::Created;
        rec.assigned_unit = None;
        Ok(())
    }

    /// Terminal completion with the result payload recorded in the same
    /// serialized mutation.
    pub fn complete(&self, id: &str, result: TaskResult) -> Result<()> {
        let mut rec = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownTask(id.to_string()))?;
        if !rec.state.can_transition_to(TaskState::Completed) {
            return Err(FleetError::InvalidTransition {
                entity: "task",
                id: id.to_string(),
                from: rec.state.to_string(),
                to: TaskState::Completed.to_string(),
            });
        }
        rec.state = TaskState::Completed;
        rec.completed_ms = Some(now_ms());
        rec.result = Some(result);
        Ok(())
    }

    pub fn fail(&self, id: &str) -> Result<()> {
        let mut rec = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownTask(id.to_string()))?;
        if !rec.state.can_transition_to(TaskState::Failed) {
            return Err(FleetError::InvalidTransition {
                entity: "task",
                id: id.to_string(),
                from: rec.state.to_string(),
                to: TaskState::Failed.to_string(),
            });
        }
        rec.state = TaskState::Failed;
        rec.completed_ms = Some(now_ms());
        Ok(())
    }
}

/// Serpentine sweep over the area's bounding box: `lanes` passes of
/// alternating direction, the pattern the scout flies for coverage.
pub fn serpentine_waypoints(area: &[GeoPoint], lanes: usize, alt_m: f64) -> Vec<GeoPoint> {
    if area.is_empty() || lanes == 0 {
        return Vec::new();
    }
    let lat_min = area.iter().map(|p| p.lat).fold(f64::INFINITY, f64::min);
    let lat_max = area.iter().map(|p| p.lat).fold(f64::NEG_INFINITY, f64::max);
    let lon_min = area.iter().map(|p| p.lon).fold(f64::INFINITY, f64::min);
    let lon_max = area.iter().map(|p| p.lon).fold(f64::NEG_INFINITY, f64::max);

    let mut waypoints = Vec::with_capacity(lanes * 2);
    let step = if lanes > 1 {
        (lat_max - lat_min) / (lanes as f64 - 1.0)
    } else {
        0.0
    };
    for lane in 0..lanes {
        let lat = lat_min + step * lane as f64;
        let (start, end) = if lane % 2 == 0 {
            (lon_min, lon_max)
        } else {
            (lon_max, lon_min)
        };
        waypoints.push(GeoPoint::new(lat, start, alt_m));
        waypoints.push(GeoPoint::new(lat, end, alt_m));
    }
    waypoints
}
