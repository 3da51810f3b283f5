use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// A fault on one unit or task must never take the orchestrator down: every
/// variant here degrades to a failed task and/or a returning or unreachable
/// unit, surfaced to the operator.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Logic fault: the requested lifecycle edge is not in the transition
    /// table. The record is left untouched.
    #[error("invalid {entity} transition {from} -> {to} ({id})")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// The unit agent already has an active mission.
    #[error("unit {0} is busy with an active mission")]
    Busy(String),

    /// No acknowledgment inside the command deadline, retry budget spent.
    #[error("command to unit {unit} timed out after {attempts} attempt(s)")]
    Timeout { unit: String, attempts: u32 },

    /// Heartbeat streak exceeded; assignment to this unit is suspended.
    #[error("unit {0} is unreachable")]
    Unreachable(String),

    /// Kill issued without a matching confirmation token. Rejected locally;
    /// nothing is transmitted.
    #[error("kill requires a confirmation token bound to the target unit")]
    ConfirmationRequired,

    /// An emergency command cancelled this unit's in-flight command wait.
    #[error("command wait cancelled by emergency control")]
    Cancelled,

    /// The agent rejected the command outright.
    #[error("unit {unit} rejected command: {reason}")]
    Rejected { unit: String, reason: String },

    #[error("command channel to unit {0} is closed")]
    ChannelClosed(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
