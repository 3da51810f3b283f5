use firefleet::config::FleetConfig;
use firefleet::orchestrator::Orchestrator;
use firefleet::protocol::{GeoPoint, MissionParams};
use firefleet::registry::{FleetRegistry, UnitRecord, UnitRole, UnitState};
use firefleet::tasks::{TaskState, TaskStore};
use std::sync::Arc;

fn area() -> Vec<GeoPoint> {
    vec![
        GeoPoint::new(37.0, -122.0, 0.0),
        GeoPoint::new(37.0, -121.99, 0.0),
        GeoPoint::new(37.01, -121.99, 0.0),
        GeoPoint::new(37.01, -122.0, 0.0),
    ]
}

fn fleet_with_scouts(ids: &[&str]) -> Orchestrator {
    let registry = Arc::new(FleetRegistry::new());
    for id in ids {
        registry
            .register(UnitRecord::new(*id, UnitRole::Scout, "127.0.0.1:0"))
            .unwrap();
    }
    Orchestrator::new(registry, Arc::new(TaskStore::new()), FleetConfig::fast())
}

#[test]
fn test_assignment_claims_both_records() {
    let orch = fleet_with_scouts(&["scout-1"]);
    let task = orch.create_scout_task(area(), MissionParams::default());

    let unit = orch.try_assign(&task.id).unwrap();
    assert_eq!(unit.as_deref(), Some("scout-1"));

    let task = orch.tasks().get(&task.id).unwrap();
    assert_eq!(task.state, TaskState::Assigned);
    assert_eq!(task.assigned_unit.as_deref(), Some("scout-1"));

    let unit = orch.registry().get("scout-1").unwrap();
    assert_eq!(unit.state, UnitState::Assigned);
    assert_eq!(unit.active_task.as_deref(), Some(task.id.as_str()));
}

#[test]
fn test_round_robin_rotates_across_units() {
    let orch = fleet_with_scouts(&["scout-1", "scout-2", "scout-3"]);

    let mut picked = Vec::new();
    for _ in 0..3 {
        let task = orch.create_scout_task(area(), MissionParams::default());
        let unit = orch.try_assign(&task.id).unwrap().unwrap();
        picked.push(unit.clone());
        // Simulate the full cycle so the unit becomes idle again.
        orch.registry().update_state(&unit, UnitState::Flying).unwrap();
        orch.registry().update_state(&unit, UnitState::Returning).unwrap();
        orch.registry().update_state(&unit, UnitState::Idle).unwrap();
    }
    // Never-assigned units are preferred, id as tiebreak, so all three
    // get exactly one task before anyone gets a second.
    picked.sort();
    assert_eq!(picked, vec!["scout-1", "scout-2", "scout-3"]);

    // The next pick is the least recently assigned: scout-1 again.
    let task = orch.create_scout_task(area(), MissionParams::default());
    assert_eq!(orch.try_assign(&task.id).unwrap().as_deref(), Some("scout-1"));
}

#[test]
fn test_no_eligible_unit_leaves_task_created() {
    let orch = fleet_with_scouts(&["scout-1"]);
    let first = orch.create_scout_task(area(), MissionParams::default());
    let second = orch.create_scout_task(area(), MissionParams::default());

    assert!(orch.try_assign(&first.id).unwrap().is_some());
    // The only scout is now claimed.
    assert!(orch.try_assign(&second.id).unwrap().is_none());
    assert_eq!(orch.tasks().get(&second.id).unwrap().state, TaskState::Created);

    // Unit completes its cycle; the pending task becomes assignable.
    orch.registry().update_state("scout-1", UnitState::Flying).unwrap();
    orch.registry().update_state("scout-1", UnitState::Returning).unwrap();
    orch.registry().update_state("scout-1", UnitState::Idle).unwrap();
    assert_eq!(orch.try_assign(&second.id).unwrap().as_deref(), Some("scout-1"));
}

#[test]
fn test_unreachable_units_are_skipped() {
    let orch = fleet_with_scouts(&["scout-1", "scout-2"]);
    orch.registry().mark_unreachable("scout-1").unwrap();

    let task = orch.create_scout_task(area(), MissionParams::default());
    assert_eq!(orch.try_assign(&task.id).unwrap().as_deref(), Some("scout-2"));
}

#[test]
fn test_role_matching_suppressor_only() {
    let registry = Arc::new(FleetRegistry::new());
    registry
        .register(UnitRecord::new("scout-1", UnitRole::Scout, "127.0.0.1:0"))
        .unwrap();
    registry
        .register(UnitRecord::new("supp-1", UnitRole::Suppressor, "127.0.0.1:0"))
        .unwrap();
    let orch = Orchestrator::new(registry, Arc::new(TaskStore::new()), FleetConfig::fast());

    let target = GeoPoint::new(37.0, -122.0, 0.0);
    let task = orch
        .tasks()
        .create_suppress(target, MissionParams::default());
    assert_eq!(orch.try_assign(&task.id).unwrap().as_deref(), Some("supp-1"));
}

#[test]
fn test_assign_is_idempotent_for_non_created_task() {
    let orch = fleet_with_scouts(&["scout-1", "scout-2"]);
    let task = orch.create_scout_task(area(), MissionParams::default());
    assert!(orch.try_assign(&task.id).unwrap().is_some());
    // A second attempt must not claim another unit.
    assert!(orch.try_assign(&task.id).unwrap().is_none());
    let assigned = orch.registry().list(|u| u.state == UnitState::Assigned);
    assert_eq!(assigned.len(), 1);
}
