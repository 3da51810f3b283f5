use crate::error::{FleetError, Result};
use crate::protocol::GeoPoint;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Telemetry {
    pub position: GeoPoint,
    /// Battery fraction in [0, 1].
    pub battery: f64,
    pub heading_deg: f64,
    pub speed_ms: f64,
    pub armed: bool,
}

/// Capability interface over the flight-control backend. The agent depends
/// only on this trait; simulated and hardware backends plug in behind it.
pub trait UnitController: Send {
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    fn read_telemetry(&mut self) -> Telemetry;
    fn navigate(&mut self, waypoint: GeoPoint) -> Result<()>;
    fn arm(&mut self) -> Result<()>;
    fn disarm(&mut self) -> Result<()>;
}

/// Software backend: teleports between waypoints with battery drain
/// proportional to distance and jittered telemetry. Flight dynamics are
/// out of scope; this models only what the coordination engine observes.
pub struct SimulatedController {
    unit_id: String,
    home: GeoPoint,
    position: GeoPoint,
    battery: f64,
    heading_deg: f64,
    connected: bool,
    armed: bool,
}

impl SimulatedController {
    pub fn new(unit_id: impl Into<String>, home: GeoPoint) -> Self {
        Self {
            unit_id: unit_id.into(),
            home,
            position: home,
            battery: 1.0,
            heading_deg: 0.0,
            connected: false,
            armed: false,
        }
    }

    pub fn home(&self) -> GeoPoint {
        self.home
    }

    fn drain_for(&mut self, distance_m: f64) {
        // ~1% per 500 m plus idle draw
        self.battery = (self.battery - distance_m / 50_000.0 - 0.001).max(0.0);
    }
}

impl UnitController for SimulatedController {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.armed = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_telemetry(&mut self) -> Telemetry {
        let mut rng = rand::thread_rng();
        Telemetry {
            position: self.position,
            battery: self.battery,
            heading_deg: self.heading_deg,
            speed_ms: if self.armed {
                8.0 + rng.gen_range(-0.5..0.5)
            } else {
                0.0
            },
            armed: self.armed,
        }
    }

    fn navigate(&mut self, waypoint: GeoPoint) -> Result<()> {
        if !self.connected {
            return Err(FleetError::Rejected {
                unit: self.unit_id.clone(),
                reason: "controller not connected".into(),
            });
        }
        if !self.armed {
            return Err(FleetError::Rejected {
                unit: self.unit_id.clone(),
                reason: "navigate while disarmed".into(),
            });
        }
        let distance = self.position.distance_m(&waypoint);
        self.heading_deg = (waypoint.lon - self.position.lon)
            .atan2(waypoint.lat - self.position.lat)
            .to_degrees()
            .rem_euclid(360.0);
        self.position = waypoint;
        self.drain_for(distance);
        Ok(())
    }

    fn arm(&mut self) -> Result<()> {
        if !self.connected {
            return Err(FleetError::Rejected {
                unit: self.unit_id.clone(),
                reason: "arm while disconnected".into(),
            });
        }
        self.armed = true;
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        self.armed = false;
        Ok(())
    }
}
