use crate::config::FleetConfig;
use crate::protocol::{now_ms, GeoPoint};
use chrono::Utc;
use heapless::Vec as BoundedVec;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Active events tracked per pipeline for dedup. Oldest entries are evicted
/// when the table is full.
const MAX_ACTIVE_EVENTS: usize = 16;

/// On-board thermal grid (MLX90640 geometry: 24x32 cells, Celsius).
pub const FRAME_ROWS: usize = 24;
pub const FRAME_COLS: usize = 32;

#[derive(Debug, Clone)]
pub struct ThermalFrame {
    cells: Vec<f64>,
}

impl ThermalFrame {
    pub fn uniform(ambient_c: f64) -> Self {
        Self {
            cells: vec![ambient_c; FRAME_ROWS * FRAME_COLS],
        }
    }

    pub fn cell(&self, row: usize, col: usize) -> f64 {
        self.cells[row * FRAME_COLS + col]
    }

    pub fn set_cell(&mut self, row: usize, col: usize, temp_c: f64) {
        self.cells[row * FRAME_COLS + col] = temp_c;
    }

    /// Paint a rectangular hot patch, clipped to the frame.
    pub fn set_patch(&mut self, row: usize, col: usize, rows: usize, cols: usize, temp_c: f64) {
        for r in row..(row + rows).min(FRAME_ROWS) {
            for c in col..(col + cols).min(FRAME_COLS) {
                self.set_cell(r, c, temp_c);
            }
        }
    }

    /// Ambient estimate: frame mean. A hot cluster skews it slightly high,
    /// which only makes the relative threshold stricter.
    pub fn ambient_estimate(&self) -> f64 {
        self.cells.iter().sum::<f64>() / self.cells.len() as f64
    }
}

/// Transient pipeline-internal candidate. Never persisted: either promoted
/// to a `HazardEvent` or dropped on the floor.
#[derive(Debug, Clone)]
pub struct HazardCandidate {
    pub task_id: String,
    pub location: GeoPoint,
    pub peak_temperature_c: f64,
    pub cluster_size: usize,
    pub ambient_c: f64,
}

/// Confirmed, combined-confidence hazard. Triggers suppression dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardEvent {
    pub id: String,
    pub task_id: String,
    pub location: GeoPoint,
    pub confidence: f64,
    pub temperature_c: f64,
    pub timestamp_ms: i64,
}

/// Black-box image classifier for the visual stage. The score covers the
/// same time window as the thermal frame that raised the candidate.
pub trait VisualClassifier: Send {
    fn score(&mut self) -> f64;
}

/// Stand-in classifier for simulated flights: high score with jitter, since
/// it is only consulted after the thermal stage already fired.
pub struct SimulatedClassifier;

impl VisualClassifier for SimulatedClassifier {
    fn score(&mut self) -> f64 {
        rand::thread_rng().gen_range(0.75..0.95)
    }
}

/// Frame source for the scouting unit. Real sensors sit behind this seam.
pub trait ThermalSource: Send {
    fn capture(&mut self) -> ThermalFrame;
}

/// Simulated sensor: ambient noise with an occasional injected hot cluster.
pub struct SimulatedThermalSource {
    pub ambient_c: f64,
    pub hotspot_probability: f64,
}

impl Default for SimulatedThermalSource {
    fn default() -> Self {
        Self {
            ambient_c: 16.0,
            hotspot_probability: 0.1,
        }
    }
}

impl ThermalSource for SimulatedThermalSource {
    fn capture(&mut self) -> ThermalFrame {
        let mut rng = rand::thread_rng();
        let mut frame = ThermalFrame::uniform(self.ambient_c);
        for r in 0..FRAME_ROWS {
            for c in 0..FRAME_COLS {
                frame.set_cell(r, c, self.ambient_c + rng.gen_range(-2.0..2.0));
            }
        }
        if rng.gen_bool(self.hotspot_probability) {
            let row = rng.gen_range(4..FRAME_ROWS - 4);
            let col = rng.gen_range(4..FRAME_COLS - 4);
            frame.set_patch(row, col, 3, 3, rng.gen_range(45.0..70.0));
        }
        frame
    }
}

/// Two-stage verdict combiner: thermal thresholding (fast, low confidence)
/// plus image classification (slow, high confidence), with per-task
/// deduplication against still-active confirmed events.
pub struct HazardPipeline {
    config: FleetConfig,
    active: BoundedVec<HazardEvent, MAX_ACTIVE_EVENTS>,
    counter: AtomicU64,
}

impl HazardPipeline {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            config,
            active: BoundedVec::new(),
            counter: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("HAZ-{}-{:04}", Utc::now().format("%Y%m%d"), n)
    }

    /// Thermal stage. Raises a candidate when a contiguous cluster of at
    /// least `min_cluster_size` cells exceeds both the absolute threshold
    /// and ambient plus the relative threshold.
    pub fn detect_candidate(
        &self,
        frame: &ThermalFrame,
        task_id: &str,
        location: GeoPoint,
    ) -> Option<HazardCandidate> {
        let ambient = frame.ambient_estimate();
        let threshold = self
            .config
            .thermal_absolute_c
            .max(ambient + self.config.thermal_relative_c);

        let (cluster_size, peak) = largest_hot_cluster(frame, threshold);
        if cluster_size < self.config.min_cluster_size {
            return None;
        }
        Some(HazardCandidate {
            task_id: task_id.to_string(),
            location,
            peak_temperature_c: peak,
            cluster_size,
            ambient_c: ambient,
        })
    }

    /// Thermal stage score: grows with cluster size and with temperature
    /// excess over the effective threshold, clipped to [0, 1].
    pub fn thermal_confidence(&self, candidate: &HazardCandidate) -> f64 {
        let threshold = self
            .config
            .thermal_absolute_c
            .max(candidate.ambient_c + self.config.thermal_relative_c);
        let size_term = (candidate.cluster_size as f64 / 10.0).min(1.0);
        let excess_term = ((candidate.peak_temperature_c - threshold) / 25.0).clamp(0.0, 1.0);
        (0.5 * size_term + 0.5 * excess_term).clamp(0.0, 1.0)
    }

    /// Weighted blend of the two stage scores.
    pub fn combine(&self, thermal_score: f64, visual_score: f64) -> f64 {
        let w = self.config.thermal_weight + self.config.visual_weight;
        (self.config.thermal_weight * thermal_score + self.config.visual_weight * visual_score) / w
    }

    /// Visual stage plus verdict. Confirms iff the combined confidence
    /// reaches the threshold (boundary inclusive) and the candidate is not
    /// a duplicate of a still-active event for the same task. Rejected
    /// candidates are discarded, never retried; a later frame may re-raise
    /// one independently.
    pub fn confirm(
        &mut self,
        candidate: &HazardCandidate,
        visual_score: f64,
    ) -> Option<HazardEvent> {
        let combined = self.combine(self.thermal_confidence(candidate), visual_score);
        if combined < self.config.hazard_confidence_threshold {
            debug!(
                task = %candidate.task_id,
                combined, "hazard candidate below confidence threshold"
            );
            return None;
        }
        if self.is_duplicate(&candidate.task_id, &candidate.location) {
            debug!(task = %candidate.task_id, "hazard candidate suppressed as duplicate");
            return None;
        }
        let event = HazardEvent {
            id: self.next_id(),
            task_id: candidate.task_id.clone(),
            location: candidate.location,
            confidence: combined,
            temperature_c: candidate.peak_temperature_c,
            timestamp_ms: now_ms(),
        };
        if self.active.push(event.clone()).is_err() {
            self.active.remove(0);
            let _ = self.active.push(event.clone());
        }
        Some(event)
    }

    pub fn is_duplicate(&self, task_id: &str, location: &GeoPoint) -> bool {
        self.active.iter().any(|e| {
            e.task_id == task_id && e.location.distance_m(location) <= self.config.dedup_radius_m
        })
    }

    /// Drop active events for a finished task; a new task over the same
    /// ground starts with a clean dedup slate.
    pub fn clear_task(&mut self, task_id: &str) {
        let mut i = 0;
        while i < self.active.len() {
            if self.active[i].task_id == task_id {
                self.active.remove(i);
            } else {
                i += 1;
            }
        }
    }

    pub fn active_events(&self) -> &[HazardEvent] {
        &self.active
    }
}

/// Largest 4-connected cluster of cells at or above `threshold`, with its
/// peak temperature.
fn largest_hot_cluster(frame: &ThermalFrame, threshold: f64) -> (usize, f64) {
    let mut visited = [[false; FRAME_COLS]; FRAME_ROWS];
    let mut best = (0usize, f64::NEG_INFINITY);

    for r in 0..FRAME_ROWS {
        for c in 0..FRAME_COLS {
            if visited[r][c] || frame.cell(r, c) < threshold {
                continue;
            }
            let mut size = 0usize;
            let mut peak = f64::NEG_INFINITY;
            let mut stack = vec![(r, c)];
            visited[r][c] = true;
            while let Some((row, col)) = stack.pop() {
                size += 1;
                peak = peak.max(frame.cell(row, col));
                let neighbors = [
                    (row.wrapping_sub(1), col),
                    (row + 1, col),
                    (row, col.wrapping_sub(1)),
                    (row, col + 1),
                ];
                for (nr, nc) in neighbors {
                    if nr < FRAME_ROWS
                        && nc < FRAME_COLS
                        && !visited[nr][nc]
                        && frame.cell(nr, nc) >= threshold
                    {
                        visited[nr][nc] = true;
                        stack.push((nr, nc));
                    }
                }
            }
            if size > best.0 {
                best = (size, peak);
            }
        }
    }
    if best.0 == 0 {
        (0, 0.0)
    } else {
        best
    }
}
