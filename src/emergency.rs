use crate::agent::UnitAgent;
use crate::channel::{expect_accepted, UnitLink};
use crate::error::{FleetError, Result};
use crate::orchestrator::Orchestrator;
use crate::protocol::Message;
use crate::registry::UnitState;
use std::sync::Arc;
use tracing::{info, warn};

/// Escalation ladder for a misbehaving or endangered unit. Every rung
/// preempts normal traffic: the unit's in-flight command waits are failed
/// before the emergency command goes out, and nothing here retries or
/// backs off. Other units are untouched.
///
/// Rungs, least to most destructive:
///   abort  - stop the mission, fly home
///   rtl    - fly home regardless of mission state
///   land   - descend and disarm in place
///   kill   - cut motors immediately; requires typed confirmation
pub struct EmergencyController {
    orchestrator: Arc<Orchestrator>,
}

impl EmergencyController {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// The exact phrase an operator must type to authorize a kill.
    pub fn kill_confirmation(unit_id: &str) -> String {
        UnitAgent::kill_token(unit_id)
    }

    /// Abort the unit's mission and recall it. The acknowledged abort
    /// fails the task immediately; the unit's own aborted-mission report
    /// arrives later and finds the record already terminal.
    pub async fn abort(&self, unit_id: &str) -> Result<()> {
        self.preempt_and_send(unit_id, Message::MissionAbort).await?;
        self.mark_returning(unit_id);
        self.fail_active_task(unit_id);
        info!(unit = %unit_id, "mission abort acknowledged");
        Ok(())
    }

    /// Recall the unit without touching its task bookkeeping at all.
    /// Usable even when no task record exists for the unit.
    pub async fn rtl(&self, unit_id: &str) -> Result<()> {
        self.preempt_and_send(unit_id, Message::Rtl).await?;
        self.mark_returning(unit_id);
        info!(unit = %unit_id, "return-to-launch acknowledged");
        Ok(())
    }

    /// Ground the unit where it is. The unit will not come home on its
    /// own, so its active task is failed here.
    pub async fn land(&self, unit_id: &str) -> Result<()> {
        self.preempt_and_send(unit_id, Message::Land).await?;
        self.mark_returning(unit_id);
        self.fail_active_task(unit_id);
        info!(unit = %unit_id, "emergency land acknowledged");
        Ok(())
    }

    /// Cut motors. `typed_confirmation` must match the per-unit phrase
    /// exactly; on mismatch nothing is transmitted. Deliberately crashes
    /// the airframe, so the active task is failed immediately.
    pub async fn kill(&self, unit_id: &str, typed_confirmation: &str) -> Result<()> {
        let expected = UnitAgent::kill_token(unit_id);
        if typed_confirmation != expected {
            return Err(FleetError::ConfirmationRequired);
        }
        self.preempt_and_send(
            unit_id,
            Message::Kill {
                confirm_token: expected,
            },
        )
        .await?;
        self.mark_returning(unit_id);
        self.fail_active_task(unit_id);
        warn!(unit = %unit_id, "kill acknowledged; unit down");
        Ok(())
    }

    /// Recall every unit that has a live command channel. Failures are
    /// collected per unit instead of aborting the sweep.
    pub async fn abort_all(&self) -> Vec<(String, FleetError)> {
        let mut failures = Vec::new();
        for unit in self.orchestrator.registry().list(|_| true) {
            if self.orchestrator.link(&unit.id).is_err() {
                continue;
            }
            if let Err(e) = self.abort(&unit.id).await {
                warn!(unit = %unit.id, error = %e, "fleet abort: unit did not acknowledge");
                failures.push((unit.id, e));
            }
        }
        failures
    }

    async fn preempt_and_send(&self, unit_id: &str, message: Message) -> Result<()> {
        let link = self.orchestrator.link(unit_id)?;
        link.cancel_inflight();
        let ack = link
            .request(message, self.orchestrator.config().command_timeout)
            .await?;
        expect_accepted(unit_id, ack)?;
        Ok(())
    }

    /// Best effort: an already-idle or already-returning unit is fine.
    fn mark_returning(&self, unit_id: &str) {
        if let Err(e) = self
            .orchestrator
            .registry()
            .update_state(unit_id, UnitState::Returning)
        {
            warn!(unit = %unit_id, error = %e, "emergency: return transition skipped");
        }
    }

    fn fail_active_task(&self, unit_id: &str) {
        let Ok(unit) = self.orchestrator.registry().get(unit_id) else {
            return;
        };
        let Some(task_id) = unit.active_task else {
            return;
        };
        match self.orchestrator.tasks().get(&task_id) {
            Ok(task) if !task.state.is_terminal() => {
                if let Err(e) = self.orchestrator.tasks().fail(&task_id) {
                    warn!(task = %task_id, error = %e, "emergency: task fail rejected");
                }
            }
            _ => {}
        }
    }
}
