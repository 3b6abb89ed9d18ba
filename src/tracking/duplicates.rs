// src/tracking/duplicates.rs
//! Removal of MUs identified in both of two decompositions of the same signal

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::DuplicateConfig;
use crate::electrodes::ElectrodeCatalog;
use crate::error::{EmgErrorBuilder, EmgResult};
use crate::record::Recording;
use crate::tracking::matcher::{tracking, MatchTable};

/// Which copy of a duplicated MU is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DuplicateStrategy {
    /// Delete every duplicate from the recording with more MUs (the first one on ties)
    #[default]
    #[serde(rename = "count")]
    MuCount,
    /// Per pair, delete the copy with the lower quality score (the first one on ties)
    #[serde(rename = "quality")]
    Quality,
}

/// Both recordings without their duplicates, plus the matches that justified the removal
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateRemoval {
    pub recording_a: Recording,
    pub recording_b: Recording,
    pub matches: MatchTable,
}

/// MU indices to delete from each recording
pub fn plan_removals(
    matches: &MatchTable,
    strategy: DuplicateStrategy,
    recording_a: &Recording,
    recording_b: &Recording,
) -> EmgResult<(Vec<usize>, Vec<usize>)> {
    let mut remove_a = Vec::new();
    let mut remove_b = Vec::new();

    match strategy {
        DuplicateStrategy::MuCount => {
            if recording_a.mu_count() >= recording_b.mu_count() {
                remove_a.extend(matches.iter().map(|m| m.mu_a));
            } else {
                remove_b.extend(matches.iter().map(|m| m.mu_b));
            }
        }
        DuplicateStrategy::Quality => {
            let (quality_a, quality_b) = quality_scores(recording_a, recording_b)?;
            for matched in matches.iter() {
                if quality_a[matched.mu_a] <= quality_b[matched.mu_b] {
                    remove_a.push(matched.mu_a);
                } else {
                    remove_b.push(matched.mu_b);
                }
            }
        }
    }

    Ok((remove_a, remove_b))
}

fn quality_scores<'a>(recording_a: &'a Recording, recording_b: &'a Recording) -> EmgResult<(&'a [f64], &'a [f64])> {
    match (recording_a.quality(), recording_b.quality()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EmgErrorBuilder::new("duplicates", "quality_scores")
            .configuration("quality-based duplicate removal needs a quality score for every MU of both recordings")),
    }
}

/// Find MUs present in both recordings and delete one copy of each
#[instrument(skip_all, fields(mu_a = recording_a.mu_count(), mu_b = recording_b.mu_count(), strategy = ?config.strategy))]
pub fn remove_duplicates_between(
    recording_a: &Recording,
    recording_b: &Recording,
    catalog: &ElectrodeCatalog,
    config: &DuplicateConfig,
) -> EmgResult<DuplicateRemoval> {
    config.ensure_valid("remove_duplicates_between")?;
    if config.strategy == DuplicateStrategy::Quality {
        quality_scores(recording_a, recording_b)?;
    }

    let matches = tracking(recording_a, recording_b, catalog, &config.tracking_config())?;
    let (remove_a, remove_b) = plan_removals(&matches, config.strategy, recording_a, recording_b)?;

    info!(
        duplicates = matches.len(),
        removed_from_a = remove_a.len(),
        removed_from_b = remove_b.len(),
        "duplicates removed"
    );

    Ok(DuplicateRemoval {
        recording_a: recording_a.without_motor_units(&remove_a)?,
        recording_b: recording_b.without_motor_units(&remove_b)?,
        matches,
    })
}
