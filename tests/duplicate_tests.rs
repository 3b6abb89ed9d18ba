// tests/duplicate_tests.rs
//! Duplicate MU resolution between two decompositions of the same signal

use hdemg_core::config::DuplicateConfig;
use hdemg_core::electrodes::ElectrodeCatalog;
use hdemg_core::record::{Decomposition, Recording};
use hdemg_core::simulation::SyntheticRecordingBuilder;
use hdemg_core::tracking::{remove_duplicates_between, tracking, DuplicateStrategy};

fn unsorted_config(strategy: DuplicateStrategy) -> DuplicateConfig {
    let mut config = DuplicateConfig::default();
    config.strategy = strategy;
    config.muap.electrode.matrix_code = "None".to_string();
    config.muap.electrode.n_rows = Some(4);
    config.muap.electrode.n_cols = Some(4);
    config
}

/// Four MUs, and a second decomposition that found only the first three
fn overlapping_pair() -> (Recording, Recording) {
    let full = SyntheticRecordingBuilder::new(4, 4)
        .motor_units(4)
        .duration_s(4.0)
        .noise_std(0.02)
        .seed(3)
        .build()
        .unwrap();
    let partial = full.without_motor_units(&[3]).unwrap();
    (partial, full)
}

fn with_quality(recording: &Recording, quality: Vec<f64>) -> Recording {
    let d = recording.decomposition();
    let decomposition = Decomposition::new(d.raw().clone(), d.fsamp(), d.ied_mm(), d.firings().to_vec())
        .unwrap()
        .with_quality(quality)
        .unwrap();
    Recording::grid(decomposition)
}

#[test]
fn test_count_strategy_removes_from_the_larger_recording() {
    let (a, b) = overlapping_pair();
    let catalog = ElectrodeCatalog::builtin();
    let config = unsorted_config(DuplicateStrategy::MuCount);

    let removal = remove_duplicates_between(&a, &b, &catalog, &config).unwrap();

    assert_eq!(removal.matches.len(), 3);
    assert_eq!(removal.recording_a.mu_count(), 3);
    assert_eq!(removal.recording_b.mu_count(), 1);
    assert_eq!(removal.recording_b.firings()[0], b.firings()[3]);
    assert_eq!(
        removal.recording_a.mu_count() + removal.recording_b.mu_count(),
        a.mu_count() + b.mu_count() - removal.matches.len()
    );

    // originals untouched
    assert_eq!(a.mu_count(), 3);
    assert_eq!(b.mu_count(), 4);
}

#[test]
fn test_count_strategy_reaches_a_fixed_point() {
    let (a, b) = overlapping_pair();
    let catalog = ElectrodeCatalog::builtin();
    let config = unsorted_config(DuplicateStrategy::MuCount);

    let removal = remove_duplicates_between(&a, &b, &catalog, &config).unwrap();
    let rerun = tracking(&removal.recording_a, &removal.recording_b, &catalog, &config.tracking_config()).unwrap();
    assert!(rerun.is_empty());
}

#[test]
fn test_equal_counts_remove_from_first_recording() {
    let (_, b) = overlapping_pair();
    let catalog = ElectrodeCatalog::builtin();

    let removal = remove_duplicates_between(&b, &b.clone(), &catalog, &unsorted_config(DuplicateStrategy::MuCount)).unwrap();
    assert_eq!(removal.recording_a.mu_count(), 0);
    assert_eq!(removal.recording_b.mu_count(), 4);
}

#[test]
fn test_quality_strategy_keeps_the_better_copy() {
    let (a, b) = overlapping_pair();
    let a = with_quality(&a, vec![0.9, 0.5, 0.9]);
    let b = with_quality(&b, vec![0.8; 4]);

    let removal =
        remove_duplicates_between(&a, &b, &ElectrodeCatalog::builtin(), &unsorted_config(DuplicateStrategy::Quality)).unwrap();

    assert_eq!(removal.matches.len(), 3);
    assert_eq!(removal.recording_a.firings(), &[a.firings()[0].clone(), a.firings()[2].clone()]);
    assert_eq!(removal.recording_b.firings(), &[b.firings()[1].clone(), b.firings()[3].clone()]);
    assert_eq!(removal.recording_a.quality().unwrap(), &[0.9, 0.9]);
}

#[test]
fn test_quality_ties_remove_from_first_recording() {
    let (a, b) = overlapping_pair();
    let a = with_quality(&a, vec![0.8; 3]);
    let b = with_quality(&b, vec![0.8; 4]);

    let removal =
        remove_duplicates_between(&a, &b, &ElectrodeCatalog::builtin(), &unsorted_config(DuplicateStrategy::Quality)).unwrap();
    assert_eq!(removal.recording_a.mu_count(), 0);
    assert_eq!(removal.recording_b.mu_count(), 4);
}

#[test]
fn test_quality_strategy_without_scores_fails_fast() {
    let (a, b) = overlapping_pair();
    let err = remove_duplicates_between(&a, &b, &ElectrodeCatalog::builtin(), &unsorted_config(DuplicateStrategy::Quality))
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidConfiguration");
}
