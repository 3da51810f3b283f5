use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for a single newline-delimited wire frame. Anything larger
/// is rejected before it reaches the JSON parser.
pub const MAX_FRAME_SIZE: usize = 4096;

/// WGS84 position. Altitude is meters above ground at the launch site.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64, alt_m: f64) -> Self {
        Self { lat, lon, alt_m }
    }

    /// Great-circle ground distance in meters (altitude ignored).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Flight parameters carried with a mission assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MissionParams {
    pub cruise_altitude_m: f64,
    pub cruise_speed_ms: f64,
}

impl Default for MissionParams {
    fn default() -> Self {
        Self {
            cruise_altitude_m: 50.0,
            cruise_speed_ms: 8.0,
        }
    }
}

/// Flight state as reported by the unit itself. This is the unit's own
/// view, not the registry lifecycle state; the orchestrator maps terminal
/// values (`MissionComplete`, `MissionAborted`, `Home`) onto record
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedState {
    Idle,
    Executing,
    MissionComplete,
    MissionAborted,
    Returning,
    Home,
}

/// Periodic, fire-and-forget status report (unit -> controller).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub unit_id: String,
    pub state: ReportedState,
    /// Battery fraction in [0, 1].
    pub battery: f64,
    pub position: GeoPoint,
    pub task_id: Option<String>,
    pub timestamp_ms: i64,
}

/// Event-driven confirmed-hazard report (unit -> controller).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardReport {
    pub unit_id: String,
    pub task_id: String,
    pub location: GeoPoint,
    /// Combined pipeline confidence in [0, 1].
    pub confidence: f64,
    pub temperature_c: f64,
    pub timestamp_ms: i64,
}

/// The wire message set of the remote command channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    // controller -> unit
    MissionAssign {
        task_id: String,
        waypoints: Vec<GeoPoint>,
        area: Vec<GeoPoint>,
        params: MissionParams,
    },
    MissionStart,
    MissionAbort,
    Rtl,
    Land,
    Kill {
        confirm_token: String,
    },
    StatusRequest,
    Heartbeat,
    // unit -> controller
    StatusReport(StatusReport),
    HazardReport(HazardReport),
}

impl Message {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Message::MissionAssign { .. } => "mission_assign",
            Message::MissionStart => "mission_start",
            Message::MissionAbort => "mission_abort",
            Message::Rtl => "rtl",
            Message::Land => "land",
            Message::Kill { .. } => "kill",
            Message::StatusRequest => "status_request",
            Message::Heartbeat => "heartbeat",
            Message::StatusReport(_) => "status_report",
            Message::HazardReport(_) => "hazard_report",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Accepted,
    Busy,
    Rejected,
}

/// Response to a single request, correlated by sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub seq: u64,
    pub status: AckStatus,
    pub message: Option<String>,
    /// Answer payload for `StatusRequest`; absent for plain commands.
    pub report: Option<StatusReport>,
}

impl Ack {
    pub fn accepted(seq: u64) -> Self {
        Self {
            seq,
            status: AckStatus::Accepted,
            message: None,
            report: None,
        }
    }

    pub fn busy(seq: u64, active_task: &str) -> Self {
        Self {
            seq,
            status: AckStatus::Busy,
            message: Some(format!("mission {} already executing", active_task)),
            report: None,
        }
    }

    pub fn rejected(seq: u64, reason: &str) -> Self {
        Self {
            seq,
            status: AckStatus::Rejected,
            message: Some(reason.to_string()),
            report: None,
        }
    }
}

/// One line on the wire. Requests expect a matching `Response`; `Event`
/// frames are unsolicited unit->controller traffic and are never acked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Request { seq: u64, message: Message },
    Response(Ack),
    Event(Message),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame")]
    InvalidJson,
    #[error("frame exceeds {MAX_FRAME_SIZE} bytes")]
    FrameTooLarge,
    #[error("frame serialization failed")]
    Serialization,
}

pub fn encode_frame(frame: &Frame) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(frame).map_err(|_| ProtocolError::Serialization)?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge);
    }
    Ok(json)
}

pub fn decode_frame(line: &str) -> Result<Frame, ProtocolError> {
    if line.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge);
    }
    serde_json::from_str(line).map_err(|_| ProtocolError::InvalidJson)
}

/// Wall-clock milliseconds for wire timestamps and record bookkeeping.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
