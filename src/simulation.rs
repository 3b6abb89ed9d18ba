// src/simulation.rs
//! Deterministic synthetic HD-EMG decompositions
//!
//! Each MU gets a spatio-temporal template: a Gaussian-windowed oscillation
//! with its own carrier frequency, spread over the grid by a spatial hump
//! centred on a random electrode and delayed row by row to mimic propagation.
//! The raw signal is the superposition of every template at every firing plus
//! optional white Gaussian noise. Channels are laid out column by column, so
//! sorting with code "None" and the builder's rows and columns restores the grid.

use std::f64::consts::PI;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::constants::muap::MILLISECONDS_PER_SECOND;
use crate::error::{EmgErrorBuilder, EmgResult};
use crate::grid::{ChannelGrid, MuapMap};
use crate::record::{Decomposition, FiringTrain, RawSignal, Recording};

const TEMPLATE_HALF_MS: f64 = 20.0;
const ENVELOPE_SIGMA_MS: f64 = 3.0;
const BASE_CARRIER_HZ: f64 = 80.0;
const CARRIER_STEP_HZ: f64 = 120.0;
const SPATIAL_SPREAD: f64 = 1.5;
const ROW_DELAY_MS: f64 = 0.5;
/// Extra inter-spike interval per MU index, in samples
const ISI_STEP_SAMPLES: usize = 13;

/// Builder for synthetic grid recordings
#[derive(Debug, Clone)]
pub struct SyntheticRecordingBuilder {
    n_rows: usize,
    n_cols: usize,
    fsamp: f64,
    duration_s: f64,
    motor_units: usize,
    mean_isi_ms: f64,
    noise_std: f64,
    ied_mm: f64,
    seed: u64,
    quality: Option<Vec<f64>>,
}

impl SyntheticRecordingBuilder {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            fsamp: 2048.0,
            duration_s: 5.0,
            motor_units: 3,
            mean_isi_ms: 100.0,
            noise_std: 0.0,
            ied_mm: 8.0,
            seed: 42,
            quality: None,
        }
    }

    pub fn fsamp(mut self, fsamp: f64) -> Self {
        self.fsamp = fsamp;
        self
    }

    pub fn duration_s(mut self, duration_s: f64) -> Self {
        self.duration_s = duration_s;
        self
    }

    pub fn motor_units(mut self, motor_units: usize) -> Self {
        self.motor_units = motor_units;
        self
    }

    pub fn mean_isi_ms(mut self, mean_isi_ms: f64) -> Self {
        self.mean_isi_ms = mean_isi_ms;
        self
    }

    pub fn noise_std(mut self, noise_std: f64) -> Self {
        self.noise_std = noise_std;
        self
    }

    pub fn ied_mm(mut self, ied_mm: f64) -> Self {
        self.ied_mm = ied_mm;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn quality(mut self, quality: Vec<f64>) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn n_channels(&self) -> usize {
        self.n_rows * self.n_cols
    }

    pub fn build(&self) -> EmgResult<Recording> {
        Ok(self.build_with_templates()?.0)
    }

    /// Recording plus the ground-truth template of every MU, in grid order
    pub fn build_with_templates(&self) -> EmgResult<(Recording, Vec<MuapMap>)> {
        self.validate()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let n_samples = (self.duration_s * self.fsamp).round() as usize;
        let half = self.ms_to_samples(TEMPLATE_HALF_MS);

        let templates: Vec<Array2<f64>> = (0..self.motor_units).map(|mu| self.template(mu, half, &mut rng)).collect();
        let firings: Vec<Vec<usize>> = (0..self.motor_units)
            .map(|mu| self.firing_times(mu, n_samples, half, &mut rng))
            .collect();

        let mut raw = Array2::<f64>::zeros((n_samples, self.n_channels()));
        for (template, times) in templates.iter().zip(&firings) {
            for &firing in times {
                let start = firing - half;
                let mut target = raw.slice_mut(ndarray::s![start..start + template.nrows(), ..]);
                target += template;
            }
        }

        if self.noise_std > 0.0 {
            raw.mapv_inplace(|x| x + self.noise_std * box_muller(&mut rng));
        }

        debug!(
            n_samples,
            n_channels = self.n_channels(),
            motor_units = self.motor_units,
            seed = self.seed,
            "built synthetic recording"
        );

        let trains = firings.into_iter().map(FiringTrain::new).collect::<EmgResult<Vec<_>>>()?;
        let mut decomposition = Decomposition::new(RawSignal::new(raw)?, self.fsamp, self.ied_mm, trains)?;
        if let Some(quality) = &self.quality {
            decomposition = decomposition.with_quality(quality.clone())?;
        }

        let muaps = templates.iter().map(|template| self.to_grid(template)).collect();
        Ok((Recording::grid(decomposition), muaps))
    }

    fn validate(&self) -> EmgResult<()> {
        let builder = || EmgErrorBuilder::new("simulation", "build");
        if self.n_rows == 0 || self.n_cols == 0 {
            return Err(builder().configuration("grid needs at least one row and one column"));
        }
        if !(self.fsamp > 0.0 && self.duration_s > 0.0 && self.mean_isi_ms > 0.0) {
            return Err(builder().configuration("sampling rate, duration and ISI must be positive"));
        }
        if !(self.noise_std >= 0.0) {
            return Err(builder().configuration(&format!("noise std must be non-negative, got {}", self.noise_std)));
        }
        Ok(())
    }

    fn ms_to_samples(&self, ms: f64) -> usize {
        (ms / MILLISECONDS_PER_SECOND * self.fsamp).round() as usize
    }

    /// `(2 * half + 1, channels)` waveform of one MU
    fn template(&self, mu: usize, half: usize, rng: &mut StdRng) -> Array2<f64> {
        let carrier_hz = BASE_CARRIER_HZ + CARRIER_STEP_HZ * mu as f64;
        let sigma_s = ENVELOPE_SIGMA_MS / MILLISECONDS_PER_SECOND;
        let centre_row = rng.gen_range(0.0..self.n_rows as f64);
        let centre_col = rng.gen_range(0.0..self.n_cols as f64);

        let mut template = Array2::<f64>::zeros((2 * half + 1, self.n_channels()));
        for col in 0..self.n_cols {
            for row in 0..self.n_rows {
                let distance2 = (row as f64 - centre_row).powi(2) + (col as f64 - centre_col).powi(2);
                let gain = (-distance2 / (2.0 * SPATIAL_SPREAD * SPATIAL_SPREAD)).exp() * rng.gen_range(0.5..1.5);
                let delay_s = (row as f64 - centre_row) * ROW_DELAY_MS / MILLISECONDS_PER_SECOND;

                let channel = col * self.n_rows + row;
                for (i, value) in template.column_mut(channel).iter_mut().enumerate() {
                    let t = (i as f64 - half as f64) / self.fsamp - delay_s;
                    *value = gain * (2.0 * PI * carrier_hz * t).sin() * (-(t * t) / (2.0 * sigma_s * sigma_s)).exp();
                }
            }
        }
        template
    }

    /// Jittered, strictly ascending firings that keep the whole template inside the signal
    fn firing_times(&self, mu: usize, n_samples: usize, half: usize, rng: &mut StdRng) -> Vec<usize> {
        let isi = (self.ms_to_samples(self.mean_isi_ms) + ISI_STEP_SAMPLES * mu).max(1);
        let jitter = isi / 10;

        let mut firings = Vec::new();
        let mut next = half + rng.gen_range(0..isi);
        while next + half < n_samples {
            firings.push(next);
            next += isi - jitter + rng.gen_range(0..=2 * jitter);
        }
        firings
    }

    fn to_grid(&self, template: &Array2<f64>) -> MuapMap {
        let columns = (0..self.n_cols)
            .map(|col| {
                (0..self.n_rows)
                    .map(|row| Some(template.column(col * self.n_rows + row).to_owned()))
                    .collect()
            })
            .collect();
        ChannelGrid::from_columns(columns)
    }
}

/// Standard normal sample
fn box_muller(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
