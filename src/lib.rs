//! # Fleet Coordination Engine
//!
//! Mission orchestration for a mixed fleet of autonomous aerial units:
//! thermal-scouting drones that sweep an area for hazards, and suppression
//! drones dispatched to confirmed hazard locations.
//!
//! ## Features
//!
//! - **Task lifecycle**: scout and suppression tasks driven through a
//!   strict created/assigned/executing/terminal state machine
//! - **Fleet registry**: per-unit records with round-robin assignment and
//!   heartbeat-based reachability
//! - **Remote command protocol**: newline-delimited JSON frames over TCP
//!   with ack/busy/reject semantics, timeouts, and bounded retries
//! - **Hazard pipeline**: two-stage thermal + visual confirmation with
//!   per-task deduplication
//! - **Emergency control**: abort / rtl / land / kill escalation with
//!   typed kill confirmation
//! - **On-board agent**: the unit-side mission executor, servable over
//!   loopback for full-stack tests
//!
//! ## Architecture
//!
//! - [`orchestrator`] - assignment, dispatch, and the fleet event loop
//! - [`registry`] - authoritative unit records and their state machine
//! - [`tasks`] - authoritative task records and their state machine
//! - [`channel`] - controller-side command channel and heartbeats
//! - [`agent`] - unit-side agent: mission execution and reporting
//! - [`hazard`] - thermal/visual hazard confirmation pipeline
//! - [`emergency`] - the escalation ladder
//! - [`protocol`] - wire frames and shared message types

pub mod agent;
pub mod channel;
pub mod config;
pub mod control;
pub mod emergency;
pub mod error;
pub mod hazard;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod tasks;

// Re-export the main public types for convenience
pub use agent::UnitAgent;
pub use channel::{CommandClient, UnitEvent, UnitLink};
pub use config::FleetConfig;
pub use emergency::EmergencyController;
pub use error::{FleetError, Result};
pub use orchestrator::{BatchPolicy, Orchestrator};
pub use registry::{FleetRegistry, UnitRecord, UnitRole, UnitState};
pub use tasks::{TaskKind, TaskRecord, TaskState, TaskStore};
