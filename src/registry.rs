use crate::error::{FleetError, Result};
use crate::protocol::GeoPoint;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitRole {
    Scout,
    Suppressor,
}

impl fmt::Display for UnitRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitRole::Scout => write!(f, "scout"),
            UnitRole::Suppressor => write!(f, "suppressor"),
        }
    }
}

/// Unit lifecycle. The only legal cycle is
/// idle -> assigned -> flying -> returning -> idle, with
/// assigned -> returning as the dispatch-failure recovery edge.
/// Return-to-base before reassignment is mandatory: there is no edge
/// from flying back to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Idle,
    Assigned,
    Flying,
    Returning,
}

impl UnitState {
    pub fn can_transition_to(self, next: UnitState) -> bool {
        matches!(
            (self, next),
            (UnitState::Idle, UnitState::Assigned)
                | (UnitState::Assigned, UnitState::Flying)
                | (UnitState::Assigned, UnitState::Returning)
                | (UnitState::Flying, UnitState::Returning)
                | (UnitState::Returning, UnitState::Idle)
        )
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Idle => "idle",
            UnitState::Assigned => "assigned",
            UnitState::Flying => "flying",
            UnitState::Returning => "returning",
        };
        write!(f, "{}", s)
    }
}

/// Authoritative record for one aerial unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: String,
    pub role: UnitRole,
    pub state: UnitState,
    /// Battery fraction in [0, 1].
    pub battery: f64,
    pub position: Option<GeoPoint>,
    pub last_seen_ms: i64,
    /// Network endpoint of the on-board agent, `host:port`.
    pub endpoint: String,
    /// Reachability is orthogonal to lifecycle state: an unreachable unit
    /// keeps its in-progress task but receives no new assignments.
    pub reachable: bool,
    pub missed_heartbeats: u32,
    /// Monotonic sequence of the last assignment, 0 = never assigned.
    pub last_assigned_seq: u64,
    pub active_task: Option<String>,
}

impl UnitRecord {
    pub fn new(id: impl Into<String>, role: UnitRole, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            state: UnitState::Idle,
            battery: 1.0,
            position: None,
            last_seen_ms: 0,
            endpoint: endpoint.into(),
            reachable: true,
            missed_heartbeats: 0,
            last_assigned_seq: 0,
            active_task: None,
        }
    }

    pub fn eligible_for(&self, role: UnitRole) -> bool {
        self.role == role && self.state == UnitState::Idle && self.reachable
    }
}

/// Authoritative registry of every unit. Each record is guarded by its own
/// dashmap shard entry; there is no fleet-wide lock, so unrelated units
/// mutate in parallel.
#[derive(Debug, Default)]
pub struct FleetRegistry {
    units: DashMap<String, UnitRecord>,
    assign_seq: AtomicU64,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, record: UnitRecord) -> Result<()> {
        if self.units.contains_key(&record.id) {
            return Err(FleetError::Rejected {
                unit: record.id,
                reason: "unit already registered".into(),
            });
        }
        self.units.insert(record.id.clone(), record);
        Ok(())
    }

    /// Units leave the fleet only through explicit deregistration.
    pub fn deregister(&self, id: &str) -> Result<UnitRecord> {
        self.units
            .remove(id)
            .map(|(_, rec)| rec)
            .ok_or_else(|| FleetError::UnknownUnit(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Result<UnitRecord> {
        self.units
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| FleetError::UnknownUnit(id.to_string()))
    }

    pub fn list<F>(&self, filter: F) -> Vec<UnitRecord>
    where
        F: Fn(&UnitRecord) -> bool,
    {
        let mut out: Vec<UnitRecord> = self
            .units
            .iter()
            .filter(|r| filter(r.value()))
            .map(|r| r.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Total transition function over (current, requested). Rejection
    /// leaves the record untouched.
    pub fn update_state(&self, id: &str, next: UnitState) -> Result<()> {
        let mut rec = self
            .units
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownUnit(id.to_string()))?;
        if !rec.state.can_transition_to(next) {
            return Err(FleetError::InvalidTransition {
                entity: "unit",
                id: id.to_string(),
                from: rec.state.to_string(),
                to: next.to_string(),
            });
        }
        rec.state = next;
        if next == UnitState::Idle {
            rec.active_task = None;
        }
        Ok(())
    }

    pub fn update_telemetry(
        &self,
        id: &str,
        position: GeoPoint,
        battery: f64,
        timestamp_ms: i64,
    ) -> Result<()> {
        let mut rec = self
            .units
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownUnit(id.to_string()))?;
        rec.position = Some(position);
        rec.battery = battery.clamp(0.0, 1.0);
        rec.last_seen_ms = timestamp_ms;
        Ok(())
    }

    /// Claim an idle, reachable unit for a task: idle -> assigned plus
    /// round-robin bookkeeping, as one serialized mutation.
    pub fn begin_assignment(&self, id: &str, task_id: &str) -> Result<()> {
        let mut rec = self
            .units
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownUnit(id.to_string()))?;
        if !rec.reachable {
            return Err(FleetError::Unreachable(id.to_string()));
        }
        if !rec.state.can_transition_to(UnitState::Assigned) {
            return Err(FleetError::InvalidTransition {
                entity: "unit",
                id: id.to_string(),
                from: rec.state.to_string(),
                to: UnitState::Assigned.to_string(),
            });
        }
        rec.state = UnitState::Assigned;
        rec.active_task = Some(task_id.to_string());
        rec.last_assigned_seq = self.assign_seq.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(())
    }

    /// Pick the assignment candidate for a role: idle, reachable, matching
    /// role, least recently assigned (round robin), id as final tiebreak.
    pub fn select_for_assignment(&self, role: UnitRole) -> Option<String> {
        let mut candidates = self.list(|u| u.eligible_for(role));
        candidates.sort_by(|a, b| {
            a.last_assigned_seq
                .cmp(&b.last_assigned_seq)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.into_iter().next().map(|u| u.id)
    }

    /// Immediate unreachability (channel teardown), bypassing the miss
    /// streak.
    pub fn mark_unreachable(&self, id: &str) -> Result<()> {
        let mut rec = self
            .units
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownUnit(id.to_string()))?;
        rec.reachable = false;
        Ok(())
    }

    /// Record a heartbeat outcome. Returns true when the unit is reachable
    /// after this observation. A miss streak at the configured limit flips
    /// the unit unreachable; any success restores it.
    pub fn record_heartbeat(&self, id: &str, success: bool, miss_limit: u32) -> Result<bool> {
        let mut rec = self
            .units
            .get_mut(id)
            .ok_or_else(|| FleetError::UnknownUnit(id.to_string()))?;
        if success {
            rec.missed_heartbeats = 0;
            rec.reachable = true;
        } else {
            rec.missed_heartbeats = rec.missed_heartbeats.saturating_add(1);
            if rec.missed_heartbeats >= miss_limit {
                rec.reachable = false;
            }
        }
        Ok(rec.reachable)
    }
}
