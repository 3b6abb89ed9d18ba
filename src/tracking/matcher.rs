// src/tracking/matcher.rs
//! All-pairs MU matching between two recordings

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

#[cfg(not(feature = "single_threaded"))]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::constants::muap::TRACKING_WINDOW_FACTOR;
use crate::config::{MuapConfig, TrackingConfig};
use crate::electrodes::{sort_rawemg, ElectrodeCatalog};
use crate::error::{EmgErrorBuilder, EmgResult};
use crate::grid::{joint_mask, MuapMap};
use crate::processing::{align_by_xcorr, derive, norm_twod_xcorr, sta, CorrelationMode};
use crate::record::Recording;

/// One compared pair: MU `mu_a` of the first recording against `mu_b` of the second
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingMatch {
    pub mu_a: usize,
    pub mu_b: usize,
    /// Peak normalized cross-correlation
    pub xcc: f64,
}

/// Ordered match rows
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchTable {
    rows: Vec<TrackingMatch>,
}

impl MatchTable {
    /// Table over rows already in the caller's preferred order
    pub fn from_rows(rows: Vec<TrackingMatch>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[TrackingMatch] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackingMatch> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<TrackingMatch> {
        self.rows
    }
}

/// Per-pair comparison policy shared by every task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonSettings {
    pub threshold: f64,
    pub exclude_below_threshold: bool,
    /// Align each pair to this fraction of its length first; `None` compares as is
    pub align: Option<f64>,
}

impl ComparisonSettings {
    fn keeps(&self, xcc: f64) -> bool {
        !self.exclude_below_threshold || xcc >= self.threshold
    }
}

/// All comparisons of one MU of the first recording against every MU of the second
#[derive(Debug, Clone, Copy)]
pub struct TrackingTask<'a> {
    pub mu_index: usize,
    pub source: &'a MuapMap,
    pub targets: &'a [MuapMap],
    pub settings: ComparisonSettings,
}

impl TrackingTask<'_> {
    pub fn run(&self) -> EmgResult<Vec<TrackingMatch>> {
        let mut rows = Vec::new();
        for (mu_b, target) in self.targets.iter().enumerate() {
            let comparable = shares_cells(self.source, target)?;
            let xcc = match self.settings.align {
                // no cell survived the STA on one side: undefined, not an error
                _ if !comparable => f64::NAN,
                Some(fraction) => {
                    let (a, b) = align_by_xcorr(self.source, target, fraction)?;
                    compare_muaps(&a, &b)?
                }
                None => compare_muaps(self.source, target)?,
            };

            if self.settings.keeps(xcc) {
                rows.push(TrackingMatch { mu_a: self.mu_index, mu_b, xcc });
            }
        }
        Ok(rows)
    }
}

/// Whether some cell is present in both maps
fn shares_cells(a: &MuapMap, b: &MuapMap) -> EmgResult<bool> {
    Ok(joint_mask(a, b)?.into_iter().any(|present| present))
}

/// Peak of the full normalized 2D cross-correlation over the cells present in both maps
pub fn compare_muaps(a: &MuapMap, b: &MuapMap) -> EmgResult<f64> {
    let mask = joint_mask(a, b)?;
    if !mask.iter().any(|&present| present) {
        return Ok(f64::NAN);
    }
    Ok(norm_twod_xcorr(&a.unpack(&mask)?, &b.unpack(&mask)?, CorrelationMode::Full)?.peak)
}

/// Descending by XCC, NaN last
fn by_xcc_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Run every task and merge into a table sorted by `mu_a`, then XCC descending
pub fn execute_tasks(tasks: &[TrackingTask<'_>]) -> EmgResult<MatchTable> {
    #[cfg(not(feature = "single_threaded"))]
    let per_task: Vec<Vec<TrackingMatch>> = tasks.par_iter().map(TrackingTask::run).collect::<EmgResult<_>>()?;
    #[cfg(feature = "single_threaded")]
    let per_task: Vec<Vec<TrackingMatch>> = tasks.iter().map(TrackingTask::run).collect::<EmgResult<_>>()?;

    let mut rows: Vec<TrackingMatch> = per_task.into_iter().flatten().collect();
    rows.sort_by(|x, y| {
        x.mu_a
            .cmp(&y.mu_a)
            .then_with(|| by_xcc_desc(x.xcc, y.xcc))
            .then_with(|| x.mu_b.cmp(&y.mu_b))
    });
    Ok(MatchTable { rows })
}

/// Keep the best row per `mu_a`, then the best of those per `mu_b`
///
/// Equal XCCs keep the lower partner index. Rows without a finite XCC never
/// survive. The result is sorted by `mu_a`.
pub fn filter_best_matches(table: &MatchTable) -> MatchTable {
    fn best_by<K: Ord>(
        rows: impl Iterator<Item = TrackingMatch>,
        key: impl Fn(&TrackingMatch) -> K,
        partner: impl Fn(&TrackingMatch) -> usize,
    ) -> Vec<TrackingMatch> {
        let mut best: BTreeMap<K, TrackingMatch> = BTreeMap::new();
        for row in rows.filter(|r| !r.xcc.is_nan()) {
            best.entry(key(&row))
                .and_modify(|current| {
                    let better = row.xcc > current.xcc || (row.xcc == current.xcc && partner(&row) < partner(current));
                    if better {
                        *current = row;
                    }
                })
                .or_insert(row);
        }
        best.into_values().collect()
    }

    let per_a = best_by(table.rows.iter().copied(), |r| r.mu_a, |r| r.mu_b);
    let mut rows = best_by(per_a.into_iter(), |r| r.mu_b, |r| r.mu_a);
    rows.sort_by_key(|r| r.mu_a);
    MatchTable { rows }
}

/// Compare every map of `muaps_a` with every map of `muaps_b`
pub fn match_muaps(
    muaps_a: &[MuapMap],
    muaps_b: &[MuapMap],
    settings: ComparisonSettings,
    filter: bool,
) -> EmgResult<MatchTable> {
    if let (Some(a), Some(b)) = (muaps_a.first(), muaps_b.first()) {
        joint_mask(a, b)?;
    }

    let tasks: Vec<TrackingTask<'_>> = muaps_a
        .iter()
        .enumerate()
        .map(|(mu_index, source)| TrackingTask { mu_index, source, targets: muaps_b, settings })
        .collect();

    let table = execute_tasks(&tasks)?;
    debug!(rows = table.len(), filter, "compared all MU pairs");
    Ok(if filter { filter_best_matches(&table) } else { table })
}

/// MUAP maps of every MU, estimated by STA over the configured derivation
pub fn compute_muaps(
    recording: &Recording,
    catalog: &ElectrodeCatalog,
    config: &MuapConfig,
    window_ms: f64,
) -> EmgResult<Vec<MuapMap>> {
    let selection = config.electrode.to_selection()?;
    let sorted = sort_rawemg(recording, catalog, &selection)?;
    let derived = derive(&sorted, config.derivation);
    sta(recording, &derived, config.firings, window_ms)
}

/// Everything a tracking run produces before its maps are discarded
struct TrackingRun {
    table: MatchTable,
    muaps_a: Vec<MuapMap>,
    muaps_b: Vec<MuapMap>,
    settings: ComparisonSettings,
}

fn run_tracking(
    recording_a: &Recording,
    recording_b: &Recording,
    catalog: &ElectrodeCatalog,
    config: &TrackingConfig,
) -> EmgResult<TrackingRun> {
    config.ensure_valid("tracking")?;
    recording_a.ensure_no_empty_motor_units("tracking")?;
    recording_b.ensure_no_empty_motor_units("tracking")?;

    let mut settings = ComparisonSettings {
        threshold: config.threshold,
        exclude_below_threshold: config.exclude_below_threshold,
        align: None,
    };

    let (muaps_a, muaps_b) = match (recording_a.supplied_muaps(), recording_b.supplied_muaps()) {
        (None, None) => {
            let window_ms = config.muap.timewindow_ms * TRACKING_WINDOW_FACTOR;
            settings.align = Some(config.final_fraction);
            (
                compute_muaps(recording_a, catalog, &config.muap, window_ms)?,
                compute_muaps(recording_b, catalog, &config.muap, window_ms)?,
            )
        }
        (Some(a), Some(b)) => (a.to_vec(), b.to_vec()),
        _ => {
            return Err(EmgErrorBuilder::new("tracking", "tracking")
                .configuration("cannot track a grid recording against a sensor-array recording"))
        }
    };

    let table = match_muaps(&muaps_a, &muaps_b, settings, config.filter)?;
    Ok(TrackingRun { table, muaps_a, muaps_b, settings })
}

/// Match the MUs of two recordings by MUAP similarity
#[instrument(skip_all, fields(mu_a = recording_a.mu_count(), mu_b = recording_b.mu_count(), threshold = config.threshold))]
pub fn tracking(
    recording_a: &Recording,
    recording_b: &Recording,
    catalog: &ElectrodeCatalog,
    config: &TrackingConfig,
) -> EmgResult<MatchTable> {
    let started = Instant::now();
    let run = run_tracking(recording_a, recording_b, catalog, config)?;
    info!(rows = run.table.len(), elapsed_ms = started.elapsed().as_millis() as u64, "tracking finished");
    Ok(run.table)
}

/// Track caller-supplied MUAP maps, compared without alignment
pub fn tracking_muaps(muaps_a: &[MuapMap], muaps_b: &[MuapMap], config: &TrackingConfig) -> EmgResult<MatchTable> {
    config.ensure_valid("tracking_muaps")?;
    let settings = ComparisonSettings {
        threshold: config.threshold,
        exclude_below_threshold: config.exclude_below_threshold,
        align: None,
    };
    match_muaps(muaps_a, muaps_b, settings, config.filter)
}

/// Receives each matched pair, as compared, for display
pub trait MatchSink {
    fn on_match(&mut self, matched: &TrackingMatch, muap_a: &MuapMap, muap_b: &MuapMap);
}

/// [`tracking`], then hand every matched pair to `sink`
pub fn tracking_observed(
    recording_a: &Recording,
    recording_b: &Recording,
    catalog: &ElectrodeCatalog,
    config: &TrackingConfig,
    sink: &mut dyn MatchSink,
) -> EmgResult<MatchTable> {
    let run = run_tracking(recording_a, recording_b, catalog, config)?;

    for matched in run.table.iter() {
        let (a, b) = (&run.muaps_a[matched.mu_a], &run.muaps_b[matched.mu_b]);
        let comparable = shares_cells(a, b)?;
        match run.settings.align {
            Some(fraction) if comparable => {
                let (a, b) = align_by_xcorr(a, b, fraction)?;
                sink.on_match(matched, &a, &b);
            }
            _ => sink.on_match(matched, a, b),
        }
    }
    Ok(run.table)
}
