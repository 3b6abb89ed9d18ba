// tests/tracking_tests.rs
//! MU tracking across recordings

use std::collections::HashSet;

use hdemg_core::config::TrackingConfig;
use hdemg_core::electrodes::ElectrodeCatalog;
use hdemg_core::grid::MuapMap;
use hdemg_core::processing::Derivation;
use hdemg_core::record::{Decomposition, FiringTrain, Recording};
use hdemg_core::simulation::SyntheticRecordingBuilder;
use hdemg_core::tracking::{tracking, tracking_muaps, tracking_observed, MatchSink, MatchTable, TrackingMatch};

const ROWS: usize = 4;
const COLS: usize = 4;

fn unsorted_config() -> TrackingConfig {
    let mut config = TrackingConfig::default();
    config.muap.electrode.matrix_code = "None".to_string();
    config.muap.electrode.n_rows = Some(ROWS);
    config.muap.electrode.n_cols = Some(COLS);
    config
}

fn synthetic(motor_units: usize) -> Recording {
    SyntheticRecordingBuilder::new(ROWS, COLS)
        .motor_units(motor_units)
        .duration_s(4.0)
        .noise_std(0.02)
        .seed(11)
        .build()
        .unwrap()
}

fn assert_unique_sides(table: &MatchTable) {
    let a: HashSet<usize> = table.iter().map(|m| m.mu_a).collect();
    let b: HashSet<usize> = table.iter().map(|m| m.mu_b).collect();
    assert_eq!(a.len(), table.len());
    assert_eq!(b.len(), table.len());
}

#[test]
fn test_identical_recordings_match_one_to_one() {
    let recording = synthetic(4);
    let catalog = ElectrodeCatalog::builtin();

    let table = tracking(&recording, &recording.clone(), &catalog, &unsorted_config()).unwrap();

    assert_eq!(table.len(), 4);
    for (index, row) in table.iter().enumerate() {
        assert_eq!(row.mu_a, index);
        assert_eq!(row.mu_b, index);
        assert!((row.xcc - 1.0).abs() < 1e-9, "row {:?}", row);
    }
}

#[test]
fn test_unfiltered_zero_threshold_returns_every_pair() {
    let a = synthetic(4);
    let b = a.without_motor_units(&[1]).unwrap();
    let mut config = unsorted_config();
    config.threshold = 0.0;
    config.exclude_below_threshold = false;
    config.filter = false;

    let table = tracking(&a, &b, &ElectrodeCatalog::builtin(), &config).unwrap();
    assert_eq!(table.len(), 4 * 3);

    for pair in table.rows().windows(2) {
        assert!(pair[0].mu_a <= pair[1].mu_a);
        if pair[0].mu_a == pair[1].mu_a {
            assert!(pair[0].xcc >= pair[1].xcc);
        }
    }
}

#[test]
fn test_filter_keeps_at_most_one_row_per_mu() {
    let a = synthetic(4);
    let b = a.without_motor_units(&[0, 2]).unwrap();
    let mut config = unsorted_config();
    config.threshold = 0.0;
    config.exclude_below_threshold = false;

    let table = tracking(&a, &b, &ElectrodeCatalog::builtin(), &config).unwrap();
    assert!(table.len() <= 2);
    assert_unique_sides(&table);
    assert!(table.iter().any(|m| m.mu_a == 1 && m.mu_b == 0));
    assert!(table.iter().any(|m| m.mu_a == 3 && m.mu_b == 1));
}

#[test]
fn test_threshold_excludes_distinct_units() {
    let a = synthetic(3);
    let b = SyntheticRecordingBuilder::new(ROWS, COLS)
        .motor_units(3)
        .duration_s(4.0)
        .seed(99)
        .build()
        .unwrap();
    let mut config = unsorted_config();
    config.threshold = 0.999;

    let table = tracking(&a, &b, &ElectrodeCatalog::builtin(), &config).unwrap();
    assert!(table.is_empty());
}

#[test]
fn test_empty_motor_unit_fails_before_matching() {
    let a = synthetic(2);
    let mut firings = a.firings().to_vec();
    firings.push(FiringTrain::new(Vec::new()).unwrap());
    let decomposition = a.decomposition();
    let b = Recording::grid(
        Decomposition::new(decomposition.raw().clone(), decomposition.fsamp(), decomposition.ied_mm(), firings).unwrap(),
    );

    let err = tracking(&a, &b, &ElectrodeCatalog::builtin(), &unsorted_config()).unwrap_err();
    assert_eq!(err.kind(), "EmptyMotorUnit");
}

/// `recording` plus one MU firing only at `firing`
fn with_extra_unit(recording: &Recording, firing: usize) -> Recording {
    let mut firings = recording.firings().to_vec();
    firings.push(FiringTrain::new(vec![firing]).unwrap());
    let decomposition = recording.decomposition();
    Recording::grid(
        Decomposition::new(decomposition.raw().clone(), decomposition.fsamp(), decomposition.ied_mm(), firings).unwrap(),
    )
}

#[test]
fn test_unit_cut_off_by_signal_edge_does_not_abort_batch() {
    let a = synthetic(3);
    let b = with_extra_unit(&a, 10);
    let catalog = ElectrodeCatalog::builtin();

    let table = tracking(&a, &b, &catalog, &unsorted_config()).unwrap();
    assert_eq!(table.len(), 3);
    assert!(table.iter().all(|m| m.mu_a == m.mu_b));

    let mut config = unsorted_config();
    config.exclude_below_threshold = false;
    config.filter = false;
    let table = tracking(&a, &b, &catalog, &config).unwrap();
    assert_eq!(table.len(), 3 * 4);
    for row in table.iter().filter(|m| m.mu_b == 3) {
        assert!(row.xcc.is_nan());
    }
    // NaN rows sort last for their MU
    for chunk in table.rows().chunks(4) {
        assert_eq!(chunk[3].mu_b, 3);
    }

    let reversed = tracking(&b, &a, &catalog, &unsorted_config()).unwrap();
    assert_eq!(reversed.len(), 3);
}

#[test]
fn test_tracking_is_deterministic() {
    let a = synthetic(4);
    let b = a.without_motor_units(&[3]).unwrap();
    let mut config = unsorted_config();
    config.exclude_below_threshold = false;
    config.filter = false;

    let catalog = ElectrodeCatalog::builtin();
    let first = tracking(&a, &b, &catalog, &config).unwrap();
    let second = tracking(&a, &b, &catalog, &config).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_double_differential_tracking() {
    let recording = synthetic(3);
    let mut config = unsorted_config();
    config.muap.derivation = Derivation::DoubleDifferential;

    let table = tracking(&recording, &recording, &ElectrodeCatalog::builtin(), &config).unwrap();
    assert_eq!(table.len(), 3);
}

#[test]
fn test_sensor_array_recordings_use_supplied_muaps() {
    let (recording, templates) = SyntheticRecordingBuilder::new(4, 1)
        .motor_units(3)
        .duration_s(2.0)
        .build_with_templates()
        .unwrap();
    let sensor = Recording::sensor_array(recording.decomposition().clone(), templates).unwrap();

    let mut config = TrackingConfig::default();
    config.muap.electrode.matrix_code = "Trigno Galileo Sensor".to_string();
    let table = tracking(&sensor, &sensor, &ElectrodeCatalog::builtin(), &config).unwrap();
    assert_eq!(table.len(), 3);
    assert!(table.iter().all(|m| m.mu_a == m.mu_b));

    let err = tracking(&sensor, &recording, &ElectrodeCatalog::builtin(), &config).unwrap_err();
    assert_eq!(err.kind(), "InvalidConfiguration");
}

#[test]
fn test_tracking_supplied_muaps_checks_arrangement() {
    let (_, four_by_four) = SyntheticRecordingBuilder::new(4, 4).motor_units(2).build_with_templates().unwrap();
    let (_, two_by_eight) = SyntheticRecordingBuilder::new(2, 8).motor_units(2).build_with_templates().unwrap();
    let config = TrackingConfig::default();

    let table = tracking_muaps(&four_by_four, &four_by_four, &config).unwrap();
    assert_eq!(table.len(), 2);

    let err = tracking_muaps(&four_by_four, &two_by_eight, &config).unwrap_err();
    assert_eq!(err.kind(), "InvalidConfiguration");
}

#[derive(Default)]
struct CollectingSink {
    pairs: Vec<(TrackingMatch, usize, usize)>,
}

impl MatchSink for CollectingSink {
    fn on_match(&mut self, matched: &TrackingMatch, muap_a: &MuapMap, muap_b: &MuapMap) {
        self.pairs.push((*matched, muap_a.n_samples(), muap_b.n_samples()));
    }
}

#[test]
fn test_matched_pairs_are_handed_over_aligned() {
    let recording = synthetic(3);
    let mut sink = CollectingSink::default();

    let table = tracking_observed(&recording, &recording, &ElectrodeCatalog::builtin(), &unsorted_config(), &mut sink)
        .unwrap();

    assert_eq!(sink.pairs.len(), table.len());
    for (matched, len_a, len_b) in &sink.pairs {
        assert!(table.rows().contains(matched));
        // 2 x 50 ms STA at 2048 Hz is 204 samples, half of it is kept
        assert_eq!(*len_a, 102);
        assert_eq!(*len_b, 102);
    }
}

#[test]
fn test_invalid_threshold_rejected() {
    let recording = synthetic(1);
    let mut config = unsorted_config();
    config.threshold = 1.5;

    let err = tracking(&recording, &recording, &ElectrodeCatalog::builtin(), &config).unwrap_err();
    assert_eq!(err.kind(), "InvalidConfiguration");
}
