// src/record.rs
//! In-memory decomposition records supplied by the file-loading layer
//!
//! A recording is one of a closed set of variants. Grid recordings come from
//! electrode matrices whose MUAPs are estimated here by spike-triggered
//! averaging; sensor-array recordings come from single-array sensors whose
//! decomposition already ships one MUAP per motor unit.

use std::collections::BTreeSet;

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{EmgErrorBuilder, EmgResult};
use crate::grid::MuapMap;

/// Raw multi-channel signal, shape `(samples, channels)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    data: Array2<f64>,
}

impl RawSignal {
    pub fn new(data: Array2<f64>) -> EmgResult<Self> {
        let (n_samples, n_channels) = data.dim();
        if n_samples == 0 || n_channels == 0 {
            return Err(EmgErrorBuilder::new("record", "RawSignal::new").invalid_data(
                "raw signal",
                &format!("needs at least one sample and one channel, got {}x{}", n_samples, n_channels),
            ));
        }
        Ok(Self { data })
    }

    /// Build from per-channel sample vectors of equal length
    pub fn from_channels(channels: &[Vec<f64>]) -> EmgResult<Self> {
        let n_samples = channels.first().map(Vec::len).unwrap_or(0);
        if let Some((index, channel)) = channels.iter().enumerate().find(|(_, c)| c.len() != n_samples) {
            return Err(EmgErrorBuilder::new("record", "RawSignal::from_channels").invalid_data(
                "raw signal",
                &format!("channel {} has {} samples, expected {}", index, channel.len(), n_samples),
            ));
        }

        let data = Array2::from_shape_fn((n_samples, channels.len()), |(s, c)| channels[c][s]);
        Self::new(data)
    }

    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_channels(&self) -> usize {
        self.data.ncols()
    }

    pub fn channel(&self, index: usize) -> ArrayView1<'_, f64> {
        self.data.index_axis(Axis(1), index)
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }
}

/// Ascending, duplicate-free sample indices at which one MU fired
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FiringTrain(Vec<usize>);

impl FiringTrain {
    pub fn new(firings: Vec<usize>) -> EmgResult<Self> {
        if let Some(pos) = firings.windows(2).position(|w| w[0] >= w[1]) {
            return Err(EmgErrorBuilder::new("record", "FiringTrain::new").invalid_data(
                "firing train",
                &format!(
                    "firings must be strictly ascending, found {} followed by {} at position {}",
                    firings[pos],
                    firings[pos + 1],
                    pos
                ),
            ));
        }
        Ok(Self(firings))
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Fields every decomposition provides regardless of provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    raw: RawSignal,
    fsamp: f64,
    ied_mm: f64,
    firings: Vec<FiringTrain>,
    quality: Option<Vec<f64>>,
}

impl Decomposition {
    pub fn new(raw: RawSignal, fsamp: f64, ied_mm: f64, firings: Vec<FiringTrain>) -> EmgResult<Self> {
        let builder = || EmgErrorBuilder::new("record", "Decomposition::new");
        if !(fsamp.is_finite() && fsamp > 0.0) {
            return Err(builder().invalid_data("sampling rate", &format!("must be positive, got {}", fsamp)));
        }
        if !(ied_mm.is_finite() && ied_mm > 0.0) {
            return Err(builder().invalid_data("inter-electrode distance", &format!("must be positive, got {}", ied_mm)));
        }
        Ok(Self { raw, fsamp, ied_mm, firings, quality: None })
    }

    /// Attach one quality score per MU (e.g. decomposition accuracy)
    pub fn with_quality(mut self, quality: Vec<f64>) -> EmgResult<Self> {
        let builder = || EmgErrorBuilder::new("record", "Decomposition::with_quality");
        if quality.len() != self.firings.len() {
            return Err(builder().invalid_data(
                "quality scores",
                &format!("{} scores for {} motor units", quality.len(), self.firings.len()),
            ));
        }
        if let Some(mu_index) = quality.iter().position(|score| !score.is_finite()) {
            return Err(builder().invalid_data(
                "quality scores",
                &format!("score of motor unit {} is {}", mu_index, quality[mu_index]),
            ));
        }
        self.quality = Some(quality);
        Ok(self)
    }

    pub fn raw(&self) -> &RawSignal {
        &self.raw
    }

    pub fn fsamp(&self) -> f64 {
        self.fsamp
    }

    pub fn ied_mm(&self) -> f64 {
        self.ied_mm
    }

    pub fn firings(&self) -> &[FiringTrain] {
        &self.firings
    }

    pub fn quality(&self) -> Option<&[f64]> {
        self.quality.as_deref()
    }

    pub fn mu_count(&self) -> usize {
        self.firings.len()
    }

    fn retain_motor_units(&self, keep: &[bool]) -> Self {
        let firings = self
            .firings
            .iter()
            .zip(keep)
            .filter(|(_, &k)| k)
            .map(|(f, _)| f.clone())
            .collect();
        let quality = self.quality.as_ref().map(|scores| {
            scores.iter().zip(keep).filter(|(_, &k)| k).map(|(&s, _)| s).collect()
        });

        Self {
            raw: self.raw.clone(),
            fsamp: self.fsamp,
            ied_mm: self.ied_mm,
            firings,
            quality,
        }
    }
}

/// Decomposition record, one variant per provenance
#[derive(Debug, Clone, PartialEq)]
pub enum Recording {
    /// Electrode matrix recording; MUAPs are estimated by STA
    Grid(Decomposition),
    /// Single-array sensor recording carrying one vendor MUAP per MU
    SensorArray {
        decomposition: Decomposition,
        muaps: Vec<MuapMap>,
    },
}

impl Recording {
    pub fn grid(decomposition: Decomposition) -> Self {
        Recording::Grid(decomposition)
    }

    pub fn sensor_array(decomposition: Decomposition, muaps: Vec<MuapMap>) -> EmgResult<Self> {
        if muaps.len() != decomposition.mu_count() {
            return Err(EmgErrorBuilder::new("record", "Recording::sensor_array").invalid_data(
                "sensor MUAPs",
                &format!("{} MUAPs for {} motor units", muaps.len(), decomposition.mu_count()),
            ));
        }
        Ok(Recording::SensorArray { decomposition, muaps })
    }

    pub fn decomposition(&self) -> &Decomposition {
        match self {
            Recording::Grid(decomposition) => decomposition,
            Recording::SensorArray { decomposition, .. } => decomposition,
        }
    }

    pub fn raw(&self) -> &RawSignal {
        self.decomposition().raw()
    }

    pub fn fsamp(&self) -> f64 {
        self.decomposition().fsamp()
    }

    pub fn ied_mm(&self) -> f64 {
        self.decomposition().ied_mm()
    }

    pub fn firings(&self) -> &[FiringTrain] {
        self.decomposition().firings()
    }

    pub fn quality(&self) -> Option<&[f64]> {
        self.decomposition().quality()
    }

    pub fn mu_count(&self) -> usize {
        self.decomposition().mu_count()
    }

    /// MUAPs shipped with the recording, if its provenance supplies them
    pub fn supplied_muaps(&self) -> Option<&[MuapMap]> {
        match self {
            Recording::Grid(_) => None,
            Recording::SensorArray { muaps, .. } => Some(muaps),
        }
    }

    /// Fail with `EmptyMotorUnit` on the first MU without firings
    pub fn ensure_no_empty_motor_units(&self, operation: &str) -> EmgResult<()> {
        match self.firings().iter().position(FiringTrain::is_empty) {
            Some(mu_index) => Err(EmgErrorBuilder::new("record", operation).empty_motor_unit(mu_index)),
            None => Ok(()),
        }
    }

    /// New record without the given MUs; indices refer to this record
    pub fn without_motor_units(&self, indices: &[usize]) -> EmgResult<Recording> {
        let mu_count = self.mu_count();
        let to_remove: BTreeSet<usize> = indices.iter().copied().collect();
        if let Some(&bad) = to_remove.iter().find(|&&i| i >= mu_count) {
            return Err(EmgErrorBuilder::new("record", "without_motor_units").configuration(&format!(
                "motor unit {} does not exist ({} motor units)",
                bad, mu_count
            )));
        }

        let keep: Vec<bool> = (0..mu_count).map(|i| !to_remove.contains(&i)).collect();
        let decomposition = self.decomposition().retain_motor_units(&keep);

        Ok(match self {
            Recording::Grid(_) => Recording::Grid(decomposition),
            Recording::SensorArray { muaps, .. } => Recording::SensorArray {
                decomposition,
                muaps: muaps.iter().zip(&keep).filter(|(_, &k)| k).map(|(m, _)| m.clone()).collect(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn decomposition(firings: Vec<Vec<usize>>) -> Decomposition {
        let raw = RawSignal::new(Array2::zeros((100, 4))).unwrap();
        let trains = firings.into_iter().map(|f| FiringTrain::new(f).unwrap()).collect();
        Decomposition::new(raw, 2048.0, 8.0, trains).unwrap()
    }

    #[test]
    fn test_firing_train_must_ascend() {
        assert!(FiringTrain::new(vec![1, 5, 9]).is_ok());
        assert!(FiringTrain::new(vec![1, 5, 5]).is_err());
        assert!(FiringTrain::new(vec![9, 5]).is_err());
        assert!(FiringTrain::new(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_raw_signal_from_channels() {
        let raw = RawSignal::from_channels(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(raw.n_samples(), 3);
        assert_eq!(raw.n_channels(), 2);
        assert_eq!(raw.channel(1)[2], 6.0);

        assert!(RawSignal::from_channels(&[vec![1.0], vec![1.0, 2.0]]).is_err());
        assert!(RawSignal::from_channels(&[]).is_err());
    }

    #[test]
    fn test_invalid_sampling_rate_rejected() {
        let raw = RawSignal::new(Array2::zeros((10, 1))).unwrap();
        assert!(Decomposition::new(raw.clone(), 0.0, 8.0, Vec::new()).is_err());
        assert!(Decomposition::new(raw, 2048.0, f64::NAN, Vec::new()).is_err());
    }

    #[test]
    fn test_quality_scores_must_be_finite() {
        let err = decomposition(vec![vec![10], vec![20]]).with_quality(vec![0.9, f64::NAN]).unwrap_err();
        assert_eq!(err.kind(), "InvalidData");
        assert!(err.to_string().contains("motor unit 1"));

        assert!(decomposition(vec![vec![10]]).with_quality(vec![f64::INFINITY]).is_err());
        assert!(decomposition(vec![vec![10]]).with_quality(vec![0.0]).is_ok());
    }

    #[test]
    fn test_without_motor_units_keeps_quality_in_sync() {
        let decomposition = decomposition(vec![vec![10], vec![20], vec![30]])
            .with_quality(vec![0.9, 0.8, 0.7])
            .unwrap();
        let recording = Recording::grid(decomposition);

        let trimmed = recording.without_motor_units(&[1, 1]).unwrap();
        assert_eq!(trimmed.mu_count(), 2);
        assert_eq!(trimmed.firings()[1].as_slice(), &[30]);
        assert_eq!(trimmed.quality().unwrap(), &[0.9, 0.7]);
        assert_eq!(recording.mu_count(), 3);

        assert!(recording.without_motor_units(&[3]).is_err());
    }

    #[test]
    fn test_empty_motor_unit_detected() {
        let recording = Recording::grid(decomposition(vec![vec![10], vec![]]));
        let err = recording.ensure_no_empty_motor_units("sta").unwrap_err();
        assert_eq!(err.kind(), "EmptyMotorUnit");
    }

    #[test]
    fn test_sensor_array_requires_one_muap_per_mu() {
        let decomposition = decomposition(vec![vec![10]]);
        assert!(Recording::sensor_array(decomposition, Vec::new()).is_err());
    }
}
