// src/processing/sta.rs
//! Spike-triggered averaging of grid signals around MU firings

use ndarray::{s, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::constants::muap::MILLISECONDS_PER_SECOND;
use crate::error::{EmgErrorBuilder, EmgResult};
use crate::grid::{GridSignal, MuapMap, StMuapSet};
use crate::record::{FiringTrain, Recording};

/// Which firings of each MU contribute to the average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiringRange {
    #[default]
    All,
    /// Firings `start..stop` in firing order
    Span { start: usize, stop: usize },
}

impl FiringRange {
    /// Select the firings in range, clamping bounds past the end of the train
    pub fn select<'a>(&self, firings: &'a [usize]) -> &'a [usize] {
        match *self {
            FiringRange::All => firings,
            FiringRange::Span { start, stop } => {
                let stop_clamped = stop.min(firings.len());
                let start_clamped = start.min(stop_clamped);
                if (start_clamped, stop_clamped) != (start, stop) {
                    warn!(start, stop, available = firings.len(), "firing range clamped");
                }
                &firings[start_clamped..stop_clamped]
            }
        }
    }
}

/// Symmetric window around each firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaWindow {
    halftime: usize,
}

impl StaWindow {
    /// `halftime = round(round(window_ms / 1000 * fsamp) / 2)`, rounding half to even
    pub fn from_ms(window_ms: f64, fsamp: f64) -> EmgResult<Self> {
        let builder = || EmgErrorBuilder::new("sta", "window");
        if !(window_ms.is_finite() && window_ms > 0.0) {
            return Err(builder().configuration(&format!("timewindow must be positive, got {} ms", window_ms)));
        }
        if !(fsamp.is_finite() && fsamp > 0.0) {
            return Err(builder().configuration(&format!("sampling rate must be positive, got {}", fsamp)));
        }

        let window_samples = (window_ms / MILLISECONDS_PER_SECOND * fsamp).round_ties_even();
        let halftime = (window_samples / 2.0).round_ties_even() as usize;
        if halftime == 0 {
            return Err(builder().configuration(&format!(
                "timewindow of {} ms is shorter than one sample pair at {} Hz",
                window_ms, fsamp
            )));
        }
        Ok(Self { halftime })
    }

    pub fn halftime(&self) -> usize {
        self.halftime
    }

    pub fn len(&self) -> usize {
        self.halftime * 2
    }

    /// Snippet start for `firing`, or `None` if it would cross a signal edge
    fn start(&self, firing: usize, n_samples: usize) -> Option<usize> {
        let start = firing.checked_sub(self.halftime)?;
        (firing + self.halftime <= n_samples).then_some(start)
    }
}

fn snippets<'a>(
    channel: &'a Array1<f64>,
    firings: &'a [usize],
    window: StaWindow,
) -> impl Iterator<Item = ArrayView1<'a, f64>> + 'a {
    firings
        .iter()
        .filter_map(move |&firing| window.start(firing, channel.len()))
        .map(move |start| channel.slice(s![start..start + window.len()]))
}

/// Average the snippets of every channel around `firings`
///
/// Snippets crossing a signal edge are discarded. A channel left with no
/// snippet becomes an empty cell.
pub fn sta_for_firings(signal: &GridSignal, firings: &[usize], window: StaWindow) -> MuapMap {
    let mut dropped_channels = 0usize;
    let muap = signal.map_cells(|channel| {
        let mut sum = Array1::<f64>::zeros(window.len());
        let mut count = 0usize;
        for snippet in snippets(channel, firings, window) {
            sum += &snippet;
            count += 1;
        }

        if count == 0 {
            dropped_channels += 1;
            None
        } else {
            Some(sum / count as f64)
        }
    });

    if dropped_channels > 0 {
        warn!(dropped_channels, firings = firings.len(), "no complete snippet for some channels");
    }
    muap
}

/// MUAP map of MU `mu_index`, given its firing train
pub fn sta_motor_unit(
    signal: &GridSignal,
    mu_index: usize,
    firings: &FiringTrain,
    range: FiringRange,
    window_ms: f64,
    fsamp: f64,
) -> EmgResult<MuapMap> {
    if firings.is_empty() {
        return Err(EmgErrorBuilder::new("sta", "sta_motor_unit").empty_motor_unit(mu_index));
    }
    let window = StaWindow::from_ms(window_ms, fsamp)?;
    Ok(sta_for_firings(signal, range.select(firings.as_slice()), window))
}

/// MUAP map of every MU in the recording, in MU order
pub fn sta(recording: &Recording, signal: &GridSignal, range: FiringRange, window_ms: f64) -> EmgResult<Vec<MuapMap>> {
    recording.ensure_no_empty_motor_units("sta")?;
    let window = StaWindow::from_ms(window_ms, recording.fsamp())?;
    debug!(halftime = window.halftime(), mu_count = recording.mu_count(), "computing STA");

    Ok(recording
        .firings()
        .iter()
        .map(|firings| sta_for_firings(signal, range.select(firings.as_slice()), window))
        .collect())
}

/// Per-firing snippets of every MU, shape `(kept firings, window)` per channel
pub fn st_muap(recording: &Recording, signal: &GridSignal, window_ms: f64) -> EmgResult<Vec<StMuapSet>> {
    recording.ensure_no_empty_motor_units("st_muap")?;
    let window = StaWindow::from_ms(window_ms, recording.fsamp())?;

    Ok(recording
        .firings()
        .iter()
        .map(|firings| {
            signal.map_cells(|channel| {
                let kept: Vec<ArrayView1<f64>> = snippets(channel, firings.as_slice(), window).collect();
                let mut ensemble = Array2::<f64>::zeros((kept.len(), window.len()));
                for (mut row, snippet) in ensemble.rows_mut().into_iter().zip(kept) {
                    row.assign(&snippet);
                }
                Some(ensemble)
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ChannelGrid;
    use crate::record::{Decomposition, RawSignal};
    use ndarray::Array2;

    fn ramp_signal(n_samples: usize) -> GridSignal {
        ChannelGrid::from_columns(vec![vec![
            Some(Array1::from_iter((0..n_samples).map(|s| s as f64))),
            None,
        ]])
    }

    #[test]
    fn test_window_rounding() {
        // 50 ms at 2048 Hz = 102.4 samples -> 102 -> halftime 51
        let window = StaWindow::from_ms(50.0, 2048.0).unwrap();
        assert_eq!(window.halftime(), 51);
        assert_eq!(window.len(), 102);

        // 5 samples -> 2.5 rounds half to even -> 2
        assert_eq!(StaWindow::from_ms(5.0, 1000.0).unwrap().halftime(), 2);
        assert!(StaWindow::from_ms(0.0, 1000.0).is_err());
        assert!(StaWindow::from_ms(0.1, 1000.0).is_err());
    }

    #[test]
    fn test_firing_range_clamps() {
        let firings = [1, 2, 3];
        assert_eq!(FiringRange::All.select(&firings), &[1, 2, 3]);
        assert_eq!(FiringRange::Span { start: 1, stop: 10 }.select(&firings), &[2, 3]);
        assert!(FiringRange::Span { start: 5, stop: 10 }.select(&firings).is_empty());
    }

    #[test]
    fn test_average_of_ramp() {
        let window = StaWindow::from_ms(4.0, 1000.0).unwrap();
        let muap = sta_for_firings(&ramp_signal(100), &[10, 20], window);
        // snippets [8, 9, 10, 11] and [18, 19, 20, 21]
        assert_eq!(muap.get(0, 0).unwrap(), &ndarray::array![13.0, 14.0, 15.0, 16.0]);
        assert!(muap.get(0, 1).is_none());
    }

    #[test]
    fn test_edge_snippets_discarded() {
        let window = StaWindow::from_ms(4.0, 1000.0).unwrap();
        let muap = sta_for_firings(&ramp_signal(30), &[1, 10, 29], window);
        assert_eq!(muap.get(0, 0).unwrap()[0], 8.0);

        let nothing_left = sta_for_firings(&ramp_signal(30), &[1, 29], window);
        assert_eq!(nothing_left.n_present(), 0);
    }

    #[test]
    fn test_st_muap_keeps_every_snippet() {
        let raw = RawSignal::new(Array2::zeros((100, 1))).unwrap();
        let firings = vec![FiringTrain::new(vec![0, 10, 20]).unwrap()];
        let recording = Recording::grid(Decomposition::new(raw, 1000.0, 8.0, firings).unwrap());

        let sets = st_muap(&recording, &ramp_signal(100), 4.0).unwrap();
        let ensemble = sets[0].get(0, 0).unwrap();
        assert_eq!(ensemble.dim(), (2, 4));
        assert_eq!(ensemble[[1, 0]], 18.0);
    }

    #[test]
    fn test_empty_motor_unit_rejected() {
        let empty = FiringTrain::new(Vec::new()).unwrap();
        let err = sta_motor_unit(&ramp_signal(10), 7, &empty, FiringRange::All, 4.0, 1000.0).unwrap_err();
        assert_eq!(err.kind(), "EmptyMotorUnit");
        assert!(err.to_string().contains("Motor unit 7"));
    }
}
