use firefleet::config::FleetConfig;
use firefleet::hazard::{HazardCandidate, HazardPipeline, ThermalFrame, FRAME_COLS, FRAME_ROWS};
use firefleet::protocol::GeoPoint;

fn here() -> GeoPoint {
    GeoPoint::new(37.0, -122.0, 50.0)
}

fn strong_candidate(task_id: &str, location: GeoPoint) -> HazardCandidate {
    // Saturates both thermal confidence terms: cluster at the size cap,
    // peak a full 25 C over the 40 C effective threshold.
    HazardCandidate {
        task_id: task_id.to_string(),
        location,
        peak_temperature_c: 65.0,
        cluster_size: 10,
        ambient_c: 16.0,
    }
}

#[test]
fn test_uniform_frame_raises_no_candidate() {
    let pipeline = HazardPipeline::new(FleetConfig::default());
    let frame = ThermalFrame::uniform(18.0);
    assert!(pipeline.detect_candidate(&frame, "TASK-A", here()).is_none());
}

#[test]
fn test_cluster_below_minimum_size_ignored() {
    let pipeline = HazardPipeline::new(FleetConfig::default());
    let mut frame = ThermalFrame::uniform(16.0);
    // Two hot cells only; minimum cluster is three.
    frame.set_cell(10, 10, 60.0);
    frame.set_cell(10, 11, 60.0);
    assert!(pipeline.detect_candidate(&frame, "TASK-A", here()).is_none());

    frame.set_cell(10, 12, 62.0);
    let candidate = pipeline
        .detect_candidate(&frame, "TASK-A", here())
        .expect("three contiguous hot cells");
    assert_eq!(candidate.cluster_size, 3);
    assert!((candidate.peak_temperature_c - 62.0).abs() < f64::EPSILON);
}

#[test]
fn test_diagonal_cells_are_not_contiguous() {
    let pipeline = HazardPipeline::new(FleetConfig::default());
    let mut frame = ThermalFrame::uniform(16.0);
    frame.set_cell(5, 5, 60.0);
    frame.set_cell(6, 6, 60.0);
    frame.set_cell(7, 7, 60.0);
    // Three hot cells, but 4-connectivity sees three size-1 clusters.
    assert!(pipeline.detect_candidate(&frame, "TASK-A", here()).is_none());
}

#[test]
fn test_relative_threshold_on_hot_ground() {
    let pipeline = HazardPipeline::new(FleetConfig::default());
    // Desert afternoon: ambient 32 C pushes the effective threshold to
    // ambient + 15, above the 40 C absolute floor.
    let mut frame = ThermalFrame::uniform(32.0);
    frame.set_patch(8, 8, 3, 3, 42.0);
    assert!(pipeline.detect_candidate(&frame, "TASK-A", here()).is_none());

    frame.set_patch(8, 8, 3, 3, 55.0);
    assert!(pipeline.detect_candidate(&frame, "TASK-A", here()).is_some());
}

#[test]
fn test_hot_patch_spans_grid_geometry() {
    let pipeline = HazardPipeline::new(FleetConfig::default());
    let mut frame = ThermalFrame::uniform(16.0);
    // Patch clipped at the bottom-right corner of the 24x32 grid.
    frame.set_patch(FRAME_ROWS - 2, FRAME_COLS - 2, 4, 4, 60.0);
    let candidate = pipeline
        .detect_candidate(&frame, "TASK-A", here())
        .expect("clipped patch still forms a cluster");
    assert_eq!(candidate.cluster_size, 4);
}

#[test]
fn test_thermal_confidence_bounds() {
    let pipeline = HazardPipeline::new(FleetConfig::default());
    let strong = strong_candidate("TASK-A", here());
    assert!((pipeline.thermal_confidence(&strong) - 1.0).abs() < f64::EPSILON);

    let weak = HazardCandidate {
        cluster_size: 3,
        peak_temperature_c: 40.5,
        ..strong_candidate("TASK-A", here())
    };
    let score = pipeline.thermal_confidence(&weak);
    assert!(score > 0.0 && score < 0.5);
}

#[test]
fn test_combine_is_weighted_mean() {
    let pipeline = HazardPipeline::new(FleetConfig::default());
    assert!((pipeline.combine(1.0, 0.0) - 0.5).abs() < f64::EPSILON);
    assert!((pipeline.combine(0.8, 0.8) - 0.8).abs() < f64::EPSILON);

    let mut config = FleetConfig::default();
    config.thermal_weight = 1.0;
    config.visual_weight = 3.0;
    let pipeline = HazardPipeline::new(config);
    assert!((pipeline.combine(0.0, 1.0) - 0.75).abs() < f64::EPSILON);
}

#[test]
fn test_confidence_threshold_is_boundary_inclusive() {
    let mut config = FleetConfig::default();
    config.hazard_confidence_threshold = 1.0;
    let mut pipeline = HazardPipeline::new(config);

    let candidate = strong_candidate("TASK-A", here());
    // Thermal confidence is exactly 1.0; visual 1.0 lands combined exactly
    // on the threshold, which must confirm.
    assert!(pipeline.confirm(&candidate, 1.0).is_some());

    let mut pipeline = HazardPipeline::new({
        let mut config = FleetConfig::default();
        config.hazard_confidence_threshold = 1.0;
        config
    });
    assert!(pipeline.confirm(&candidate, 0.9).is_none());
}

#[test]
fn test_default_threshold_verdict_at_the_boundary() {
    let config = FleetConfig::default();
    let pipeline = HazardPipeline::new(config.clone());
    // Equal stage scores blend to exactly that score; 0.70 passes the
    // inclusive threshold, 0.699 does not.
    assert!(pipeline.combine(0.7, 0.7) >= config.hazard_confidence_threshold);
    assert!(pipeline.combine(0.699, 0.699) < config.hazard_confidence_threshold);
}

#[test]
fn test_low_visual_score_rejects_candidate() {
    let mut pipeline = HazardPipeline::new(FleetConfig::default());
    let candidate = strong_candidate("TASK-A", here());
    // combined = (1.0 + 0.2) / 2 = 0.6, under the 0.7 default.
    assert!(pipeline.confirm(&candidate, 0.2).is_none());
    assert!(pipeline.active_events().is_empty());
}

#[test]
fn test_duplicate_suppressed_within_radius() {
    let mut pipeline = HazardPipeline::new(FleetConfig::default());
    let first = strong_candidate("TASK-A", here());
    assert!(pipeline.confirm(&first, 0.9).is_some());

    // ~2 m north: inside the 4.6 m dedup radius.
    let nearby = strong_candidate("TASK-A", GeoPoint::new(37.000018, -122.0, 50.0));
    assert!(pipeline.confirm(&nearby, 0.9).is_none());

    // ~11 m north: a distinct hazard.
    let distant = strong_candidate("TASK-A", GeoPoint::new(37.0001, -122.0, 50.0));
    assert!(pipeline.confirm(&distant, 0.9).is_some());
    assert_eq!(pipeline.active_events().len(), 2);
}

#[test]
fn test_dedup_is_scoped_per_task() {
    let mut pipeline = HazardPipeline::new(FleetConfig::default());
    assert!(pipeline.confirm(&strong_candidate("TASK-A", here()), 0.9).is_some());
    // Same spot, different task: not a duplicate.
    assert!(pipeline.confirm(&strong_candidate("TASK-B", here()), 0.9).is_some());
}

#[test]
fn test_clear_task_resets_dedup_slate() {
    let mut pipeline = HazardPipeline::new(FleetConfig::default());
    assert!(pipeline.confirm(&strong_candidate("TASK-A", here()), 0.9).is_some());
    assert!(pipeline.confirm(&strong_candidate("TASK-A", here()), 0.9).is_none());

    pipeline.clear_task("TASK-A");
    assert!(pipeline.active_events().is_empty());
    assert!(pipeline.confirm(&strong_candidate("TASK-A", here()), 0.9).is_some());
}

#[test]
fn test_event_ids_are_unique_and_dated() {
    let mut pipeline = HazardPipeline::new(FleetConfig::default());
    let a = pipeline
        .confirm(&strong_candidate("TASK-A", here()), 0.9)
        .unwrap();
    let b = pipeline
        .confirm(
            &strong_candidate("TASK-A", GeoPoint::new(37.001, -122.0, 50.0)),
            0.9,
        )
        .unwrap();
    assert!(a.id.starts_with("HAZ-"));
    assert_ne!(a.id, b.id);
    assert!(a.confidence >= 0.7);
}
