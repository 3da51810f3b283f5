use async_trait::async_trait;
use firefleet::channel::UnitLink;
use firefleet::config::FleetConfig;
use firefleet::emergency::EmergencyController;
use firefleet::orchestrator::Orchestrator;
use firefleet::protocol::{Ack, AckStatus, GeoPoint, Message, MissionParams};
use firefleet::registry::{FleetRegistry, UnitRecord, UnitRole, UnitState};
use firefleet::tasks::{TaskState, TaskStore};
use firefleet::{FleetError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted link: records every transmitted message and answers with a
/// fixed ack status.
struct ScriptedLink {
    unit_id: String,
    status: AckStatus,
    sent: Mutex<Vec<Message>>,
    cancels: AtomicUsize,
}

impl ScriptedLink {
    fn accepting(unit_id: &str) -> Arc<Self> {
        Arc::new(Self {
            unit_id: unit_id.to_string(),
            status: AckStatus::Accepted,
            sent: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        })
    }

    fn rejecting(unit_id: &str) -> Arc<Self> {
        Arc::new(Self {
            unit_id: unit_id.to_string(),
            status: AckStatus::Rejected,
            sent: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        })
    }

    fn sent_labels(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|m| m.label()).collect()
    }
}

#[async_trait]
impl UnitLink for ScriptedLink {
    fn unit_id(&self) -> &str {
        &self.unit_id
    }

    async fn request(&self, message: Message, _deadline: Duration) -> Result<Ack> {
        self.sent.lock().unwrap().push(message);
        match self.status {
            AckStatus::Accepted => Ok(Ack::accepted(1)),
            AckStatus::Busy => Ok(Ack::busy(1, "TASK-X")),
            AckStatus::Rejected => Ok(Ack::rejected(1, "scripted rejection")),
        }
    }

    fn cancel_inflight(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

fn flying_fleet(unit_id: &str) -> (Arc<Orchestrator>, String) {
    let registry = Arc::new(FleetRegistry::new());
    registry
        .register(UnitRecord::new(unit_id, UnitRole::Scout, "127.0.0.1:0"))
        .unwrap();
    let tasks = Arc::new(TaskStore::new());
    let orch = Arc::new(Orchestrator::new(registry, tasks, FleetConfig::fast()));

    let area = vec![
        GeoPoint::new(37.0, -122.0, 0.0),
        GeoPoint::new(37.01, -121.99, 0.0),
    ];
    let task = orch.create_scout_task(area, MissionParams::default());
    orch.try_assign(&task.id).unwrap().unwrap();
    orch.tasks().update_state(&task.id, TaskState::Executing).unwrap();
    orch.registry().update_state(unit_id, UnitState::Flying).unwrap();
    (orch, task.id)
}

#[tokio::test]
async fn test_abort_preempts_and_recalls() {
    let (orch, task_id) = flying_fleet("scout-1");
    let link = ScriptedLink::accepting("scout-1");
    orch.attach_link(link.clone());

    let emergency = EmergencyController::new(Arc::clone(&orch));
    emergency.abort("scout-1").await.unwrap();

    assert_eq!(link.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(link.sent_labels(), vec!["mission_abort"]);
    assert_eq!(orch.registry().get("scout-1").unwrap().state, UnitState::Returning);
    assert_eq!(orch.tasks().get(&task_id).unwrap().state, TaskState::Failed);
}

#[tokio::test]
async fn test_rtl_never_touches_task_records() {
    let (orch, task_id) = flying_fleet("scout-1");
    let link = ScriptedLink::accepting("scout-1");
    orch.attach_link(link.clone());

    EmergencyController::new(Arc::clone(&orch)).rtl("scout-1").await.unwrap();

    assert_eq!(link.sent_labels(), vec!["rtl"]);
    assert_eq!(orch.tasks().get(&task_id).unwrap().state, TaskState::Executing);
    assert_eq!(orch.registry().get("scout-1").unwrap().state, UnitState::Returning);
}

#[tokio::test]
async fn test_rtl_works_for_unit_without_task() {
    let registry = Arc::new(FleetRegistry::new());
    registry
        .register(UnitRecord::new("scout-9", UnitRole::Scout, "127.0.0.1:0"))
        .unwrap();
    registry.begin_assignment("scout-9", "TASK-GONE").unwrap();
    registry.update_state("scout-9", UnitState::Flying).unwrap();
    let orch = Arc::new(Orchestrator::new(
        registry,
        Arc::new(TaskStore::new()),
        FleetConfig::fast(),
    ));
    let link = ScriptedLink::accepting("scout-9");
    orch.attach_link(link.clone());

    // No task record exists for TASK-GONE; rtl must still succeed.
    EmergencyController::new(Arc::clone(&orch)).rtl("scout-9").await.unwrap();
    assert_eq!(link.sent_labels(), vec!["rtl"]);
}

#[tokio::test]
async fn test_land_fails_the_active_task() {
    let (orch, task_id) = flying_fleet("scout-1");
    let link = ScriptedLink::accepting("scout-1");
    orch.attach_link(link.clone());

    EmergencyController::new(Arc::clone(&orch)).land("scout-1").await.unwrap();

    assert_eq!(link.sent_labels(), vec!["land"]);
    assert_eq!(orch.tasks().get(&task_id).unwrap().state, TaskState::Failed);
}

#[tokio::test]
async fn test_kill_without_confirmation_transmits_nothing() {
    let (orch, task_id) = flying_fleet("scout-1");
    let link = ScriptedLink::accepting("scout-1");
    orch.attach_link(link.clone());
    let emergency = EmergencyController::new(Arc::clone(&orch));

    let err = emergency.kill("scout-1", "yes please").await.unwrap_err();
    assert!(matches!(err, FleetError::ConfirmationRequired));
    assert!(link.sent_labels().is_empty());
    assert_eq!(link.cancels.load(Ordering::SeqCst), 0);
    // Records untouched.
    assert_eq!(orch.registry().get("scout-1").unwrap().state, UnitState::Flying);
    assert_eq!(orch.tasks().get(&task_id).unwrap().state, TaskState::Executing);
}

#[tokio::test]
async fn test_kill_with_confirmation_goes_through() {
    let (orch, task_id) = flying_fleet("scout-1");
    let link = ScriptedLink::accepting("scout-1");
    orch.attach_link(link.clone());

    let phrase = EmergencyController::kill_confirmation("scout-1");
    assert_eq!(phrase, "KILL-scout-1");
    EmergencyController::new(Arc::clone(&orch))
        .kill("scout-1", &phrase)
        .await
        .unwrap();

    assert_eq!(link.sent_labels(), vec!["kill"]);
    let sent = link.sent.lock().unwrap();
    assert!(matches!(
        &sent[0],
        Message::Kill { confirm_token } if confirm_token == "KILL-scout-1"
    ));
    drop(sent);
    assert_eq!(orch.tasks().get(&task_id).unwrap().state, TaskState::Failed);
}

#[tokio::test]
async fn test_rejected_emergency_surfaces_error() {
    let (orch, _) = flying_fleet("scout-1");
    let link = ScriptedLink::rejecting("scout-1");
    orch.attach_link(link.clone());

    let err = EmergencyController::new(Arc::clone(&orch))
        .abort("scout-1")
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Rejected { .. }));
    // The command was transmitted; the unit refused it.
    assert_eq!(link.sent_labels(), vec!["mission_abort"]);
}

#[tokio::test]
async fn test_emergency_without_link_fails_cleanly() {
    let (orch, _) = flying_fleet("scout-1");
    let err = EmergencyController::new(Arc::clone(&orch))
        .abort("scout-1")
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::ChannelClosed(_)));
}
