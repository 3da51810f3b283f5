use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every tunable the coordination engine consumes, in one explicit record.
///
/// Constructed once and passed by reference into the orchestrator, channel,
/// agent, and pipeline; there are no ambient/global settings. `Default`
/// carries the fleet's operational values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Deadline for a single command request/response exchange.
    pub command_timeout: Duration,
    /// Shorter deadline used only for heartbeat/status liveness polling.
    pub liveness_timeout: Duration,
    /// Cadence of the per-unit heartbeat loop.
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats before a unit is marked unreachable.
    pub heartbeat_miss_limit: u32,
    /// Cadence of unsolicited status reports from the unit agent.
    pub status_report_interval: Duration,
    /// Retry budget for dispatch commands before the task is failed.
    pub retry_count: u32,
    /// First retry delay; doubles on every subsequent attempt.
    pub backoff_base: Duration,

    /// Combined confidence at or above this value confirms a hazard.
    pub hazard_confidence_threshold: f64,
    /// Weight of the thermal stage in the combined confidence.
    pub thermal_weight: f64,
    /// Weight of the visual stage in the combined confidence.
    pub visual_weight: f64,
    /// Absolute cell temperature floor for a hazard candidate, Celsius.
    pub thermal_absolute_c: f64,
    /// Required excess over the ambient estimate, Celsius.
    pub thermal_relative_c: f64,
    /// Minimum contiguous hot-cell cluster size.
    pub min_cluster_size: usize,
    /// Candidates within this distance of an active event are duplicates.
    pub dedup_radius_m: f64,

    /// Poll interval while a batch worker awaits task completion.
    pub completion_poll: Duration,
    /// Delay between dispatches of parallel batch workers.
    pub batch_stagger: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_miss_limit: 3,
            status_report_interval: Duration::from_secs(2),
            retry_count: 3,
            backoff_base: Duration::from_secs(1),

            hazard_confidence_threshold: 0.7,
            thermal_weight: 0.5,
            visual_weight: 0.5,
            thermal_absolute_c: 40.0,
            thermal_relative_c: 15.0,
            min_cluster_size: 3,
            // 15 ft suppression radius around an active event
            dedup_radius_m: 4.6,

            completion_poll: Duration::from_millis(200),
            batch_stagger: Duration::from_millis(500),
        }
    }
}

impl FleetConfig {
    /// Tightened deadlines for loopback testing; semantics unchanged.
    pub fn fast() -> Self {
        Self {
            command_timeout: Duration::from_millis(500),
            liveness_timeout: Duration::from_millis(200),
            heartbeat_interval: Duration::from_millis(100),
            status_report_interval: Duration::from_millis(50),
            backoff_base: Duration::from_millis(20),
            completion_poll: Duration::from_millis(20),
            batch_stagger: Duration::from_millis(10),
            ..Self::default()
        }
    }
}
