// src/processing/conduction.rs
//! Muscle fibre conduction velocity along a grid column
//!
//! The propagation delay between adjacent rows is a maximum-likelihood
//! estimate: each channel in turn is the reference, the others are shifted in
//! the frequency domain by their row distance times the candidate delay, and
//! Newton iterations minimize the mean square error between them. A lagged
//! product search over physiological velocities gives the starting delay.

use std::f64::consts::PI;
use std::ops::Range;

use ndarray::{s, stack, Array2, ArrayView1, ArrayView2, Axis};
use rustfft::{num_complex::Complex, FftPlanner};
use tracing::{debug, warn};

use crate::config::constants::conduction::{
    DELAY_TOLERANCE_SAMPLES, MAX_CV_M_S, MAX_ITERATIONS, MAX_NEWTON_STEP_SAMPLES, MILLIMETRES_PER_METRE, MIN_CV_M_S,
};
use crate::error::{EmgErrorBuilder, EmgResult};
use crate::grid::{ChannelGrid, MuapMap, StMuapSet};
use crate::record::Recording;

/// Estimated conduction velocity and the delay it was derived from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConductionVelocity {
    /// Metres per second, always non-negative
    pub cv_m_s: f64,
    /// Delay between adjacent rows in samples, positive when higher rows lag
    pub delay_samples: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Starting delay: the lag maximizing the product of two adjacent channels.
///
/// Lags are searched in both directions between the delays of `MAX_CV_M_S`
/// and `MIN_CV_M_S`, then refined by a parabola through the peak and its
/// neighbours.
pub fn initial_delay(first: ArrayView1<f64>, second: ArrayView1<f64>, ied_mm: f64, fsamp: f64) -> f64 {
    let n = first.len().min(second.len());
    if n < 2 {
        return 0.0;
    }

    let ied_m = ied_mm / MILLIMETRES_PER_METRE;
    let max_lag = ((ied_m / MIN_CV_M_S * fsamp).ceil() as usize).clamp(1, n - 1) as isize;
    let min_lag = ((ied_m / MAX_CV_M_S * fsamp).floor() as isize).clamp(1, max_lag);

    let lagged_product = |lag: isize| -> f64 {
        let shift = lag.unsigned_abs();
        let (a, b) = if lag >= 0 {
            (first.slice(s![..n - shift]), second.slice(s![shift..n]))
        } else {
            (first.slice(s![shift..n]), second.slice(s![..n - shift]))
        };
        a.dot(&b)
    };

    let candidates: Vec<isize> = (-max_lag..=-min_lag).chain(min_lag..=max_lag).collect();
    let products: Vec<f64> = candidates.iter().map(|&lag| lagged_product(lag)).collect();
    let Some(best) = (0..candidates.len()).fold(None, |best: Option<usize>, i| match best {
        Some(b) if products[b] >= products[i] => Some(b),
        _ => Some(i),
    }) else {
        return 0.0;
    };

    let lag = candidates[best];
    let neighbours = best > 0
        && best + 1 < candidates.len()
        && candidates[best - 1] == lag - 1
        && candidates[best + 1] == lag + 1;
    if !neighbours {
        return lag as f64;
    }

    let (before, peak, after) = (products[best - 1], products[best], products[best + 1]);
    let curvature = before - 2.0 * peak + after;
    if curvature < 0.0 {
        lag as f64 + 0.5 * (before - after) / curvature
    } else {
        lag as f64
    }
}

/// Forward FFT of every channel (row)
fn channel_spectra(channels: ArrayView2<f64>) -> Array2<Complex<f64>> {
    let n = channels.ncols();
    let mut spectra = channels.mapv(|x| Complex::new(x, 0.0));
    let fft = FftPlanner::<f64>::new().plan_fft_forward(n);
    let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

    for mut row in spectra.rows_mut() {
        let mut buffer = row.to_vec();
        fft.process_with_scratch(&mut buffer, &mut scratch);
        row.iter_mut().zip(buffer).for_each(|(dst, src)| *dst = src);
    }
    spectra
}

/// First and second derivative of the beamforming mean square error with
/// respect to the delay, with `reference` as the reference channel
fn beamforming_derivatives(spectra: &Array2<Complex<f64>>, reference: usize, delay: f64) -> (f64, f64) {
    let (n_channels, n) = spectra.dim();
    let m = (n_channels - 1) as f64;
    let half = ((n as f64 / 2.0).round_ties_even() as usize).min(n - 1);

    let others: Vec<(f64, ArrayView1<Complex<f64>>)> = (0..n_channels)
        .filter(|&channel| channel != reference)
        .map(|channel| (channel as f64 - reference as f64, spectra.row(channel)))
        .collect();
    let reference_spectrum = spectra.row(reference);

    let mut first = 0.0;
    let mut second = 0.0;
    for k in 1..=half {
        let omega = 2.0 * PI * k as f64 / n as f64;

        let (mut pairs_first, mut pairs_second) = (0.0, 0.0);
        for (i, (position_i, spectrum_i)) in others.iter().enumerate() {
            for (position_u, spectrum_u) in &others[i + 1..] {
                let phase = omega * (position_i - position_u);
                let term = spectrum_i[k] * spectrum_u[k].conj() * Complex::from_polar(1.0, phase * delay);
                pairs_first -= (term * phase).im;
                pairs_second -= (term * phase * phase).re;
            }
        }

        let mut shifted_first = Complex::new(0.0, 0.0);
        let mut shifted_second = Complex::new(0.0, 0.0);
        for (position, spectrum) in &others {
            let phase = omega * position;
            let term = spectrum[k] * Complex::from_polar(1.0, phase * delay);
            shifted_first += term * phase;
            shifted_second += term * phase * phase;
        }

        let reference_conj = reference_spectrum[k].conj();
        first += 2.0 * pairs_first / (m * m) + 2.0 * (reference_conj * shifted_first).im / m;
        second += 2.0 * pairs_second / (m * m) + 2.0 * (reference_conj * shifted_second).re / m;
    }

    (2.0 * first / n as f64, 2.0 * second / n as f64)
}

/// Newton refinement of the row delay, starting from `initial_delay`.
///
/// Returns the delay, the number of iterations and whether the last step was
/// below `DELAY_TOLERANCE_SAMPLES`.
pub fn mle_delay(channels: ArrayView2<f64>, initial_delay: f64) -> (f64, usize, bool) {
    let spectra = channel_spectra(channels);
    let n_channels = spectra.nrows();

    let mut next = initial_delay;
    let mut delay = f64::INFINITY;
    let mut iterations = 0;

    while (next - delay).abs() >= DELAY_TOLERANCE_SAMPLES && iterations < MAX_ITERATIONS {
        iterations += 1;
        delay = next;

        let (first, second) = (0..n_channels)
            .map(|reference| beamforming_derivatives(&spectra, reference, delay))
            .fold((0.0, 0.0), |(a, b), (da, db)| (a + da + f64::EPSILON, b + db + f64::EPSILON));

        let step = if first == 0.0 {
            0.0
        } else if second > 0.0 && (first / second).abs() <= MAX_NEWTON_STEP_SAMPLES {
            -first / second
        } else {
            -MAX_NEWTON_STEP_SAMPLES * first.signum()
        };
        next = delay + step;
    }

    (delay, iterations, (next - delay).abs() < DELAY_TOLERANCE_SAMPLES)
}

/// Conduction velocity from channels ordered along the propagation direction
///
/// `channels` is `(channels, samples)`, adjacent rows `ied_mm` apart. A zero
/// delay yields an infinite velocity.
pub fn estimate_cv(channels: ArrayView2<f64>, ied_mm: f64, fsamp: f64) -> EmgResult<ConductionVelocity> {
    let builder = || EmgErrorBuilder::new("conduction", "estimate_cv");
    if channels.nrows() < 2 {
        return Err(builder().configuration(&format!(
            "conduction velocity needs at least two channels, got {}",
            channels.nrows()
        )));
    }
    if channels.ncols() < 2 {
        return Err(builder().invalid_data("signal", "conduction velocity needs at least two samples"));
    }
    if !(ied_mm.is_finite() && ied_mm > 0.0) || !(fsamp.is_finite() && fsamp > 0.0) {
        return Err(builder().configuration(&format!(
            "IED and sampling rate must be positive, got {} mm and {} Hz",
            ied_mm, fsamp
        )));
    }
    if channels.iter().any(|x| !x.is_finite()) {
        return Err(builder().invalid_data("signal", "non-finite sample"));
    }

    // with more than three channels the outer ones are skipped for the starting point
    let pair = if channels.nrows() > 3 { (1, 2) } else { (0, 1) };
    let start = initial_delay(channels.row(pair.0), channels.row(pair.1), ied_mm, fsamp);
    let (delay, iterations, converged) = mle_delay(channels, start);

    if !converged {
        warn!(delay, iterations, "conduction velocity estimate did not converge");
    }
    let cv_m_s = (ied_mm / MILLIMETRES_PER_METRE / (delay / fsamp)).abs();
    debug!(start, delay, iterations, cv_m_s, "estimated conduction velocity");

    Ok(ConductionVelocity { cv_m_s, delay_samples: delay, iterations, converged })
}

fn column_cells<'a, T>(grid: &'a ChannelGrid<T>, column: usize, rows: &Range<usize>) -> EmgResult<Vec<&'a T>> {
    let builder = || EmgErrorBuilder::new("conduction", "column_cells");
    let available = grid
        .columns()
        .get(column)
        .ok_or_else(|| builder().shape_mismatch("column out of range", format!("< {}", grid.n_columns()), column))?
        .rows
        .len();
    if rows.is_empty() || rows.end > available {
        return Err(builder().shape_mismatch(
            &format!("row range of column {} out of range", column),
            format!("within 0..{}", available),
            format!("{:?}", rows),
        ));
    }

    rows.clone()
        .map(|row| {
            grid.get(column, row).ok_or_else(|| {
                builder().invalid_data("MUAP map", &format!("no waveform at column {} row {}", column, row))
            })
        })
        .collect()
}

fn stacked(views: &[ArrayView1<f64>]) -> EmgResult<Array2<f64>> {
    stack(Axis(0), views).map_err(|err| {
        EmgErrorBuilder::new("conduction", "stack_channels").shape_mismatch(
            "channels differ in length",
            "equal lengths",
            err.to_string(),
        )
    })
}

/// Conduction velocity of one MU over `rows` of `column` of its MUAP map,
/// using the recording's IED and sampling rate
pub fn estimate_cv_via_mle(
    recording: &Recording,
    muap: &MuapMap,
    column: usize,
    rows: Range<usize>,
) -> EmgResult<ConductionVelocity> {
    let cells = column_cells(muap, column, &rows)?;
    let views: Vec<ArrayView1<f64>> = cells.iter().map(|cell| cell.view()).collect();
    estimate_cv(stacked(&views)?.view(), recording.ied_mm(), recording.fsamp())
}

/// One conduction velocity per firing of a spike-triggered ensemble
pub fn estimate_cv_per_firing(
    recording: &Recording,
    ensemble: &StMuapSet,
    column: usize,
    rows: Range<usize>,
) -> EmgResult<Vec<ConductionVelocity>> {
    let cells = column_cells(ensemble, column, &rows)?;
    let n_firings = cells.iter().map(|cell| cell.nrows()).min().unwrap_or(0);

    (0..n_firings)
        .map(|firing| {
            let views: Vec<ArrayView1<f64>> = cells.iter().map(|cell| cell.row(firing)).collect();
            estimate_cv(stacked(&views)?.view(), recording.ied_mm(), recording.fsamp())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    const FSAMP: f64 = 4000.0;

    /// Gaussian pulses whose centre moves by `delay` samples per channel
    fn propagating(n_channels: usize, n_samples: usize, delay: f64) -> Array2<f64> {
        Array2::from_shape_fn((n_channels, n_samples), |(c, t)| {
            let d = t as f64 - 50.0 - delay * c as f64;
            (-(d * d) / 18.0).exp() * (1.0 - 0.1 * c as f64)
        })
    }

    #[test]
    fn test_integer_delay_recovered() {
        let channels = propagating(4, 128, 2.0);
        let estimate = estimate_cv(channels.view(), 2.0, FSAMP).unwrap();

        assert!(estimate.converged);
        assert!((estimate.delay_samples - 2.0).abs() < 0.01, "{:?}", estimate);
        // 2 mm over 0.5 ms
        assert!((estimate.cv_m_s - 4.0).abs() < 0.05, "{:?}", estimate);
    }

    #[test]
    fn test_fractional_delay_recovered() {
        let channels = propagating(5, 128, 1.3);
        let estimate = estimate_cv(channels.view(), 2.0, FSAMP).unwrap();
        assert!((estimate.delay_samples - 1.3).abs() < 0.02, "{:?}", estimate);
    }

    #[test]
    fn test_reversed_propagation_keeps_speed() {
        let forward = propagating(3, 128, 2.0);
        let mut backward = forward.clone();
        backward.invert_axis(Axis(0));

        let f = estimate_cv(forward.view(), 2.0, FSAMP).unwrap();
        let b = estimate_cv(backward.view(), 2.0, FSAMP).unwrap();
        assert!(b.delay_samples < 0.0);
        assert!((f.cv_m_s - b.cv_m_s).abs() < 0.05);
    }

    #[test]
    fn test_initial_delay_parabola() {
        let channels = propagating(2, 128, 3.0);
        let start = initial_delay(channels.row(0), channels.row(1), 2.0, FSAMP);
        assert!((start - 3.0).abs() < 0.2, "{}", start);
    }

    #[test]
    fn test_invalid_inputs() {
        let one = propagating(1, 64, 0.0);
        assert_eq!(estimate_cv(one.view(), 5.0, FSAMP).unwrap_err().kind(), "InvalidConfiguration");

        let two = propagating(2, 64, 1.0);
        assert!(estimate_cv(two.view(), 0.0, FSAMP).is_err());

        let mut broken = two.clone();
        broken[[1, 3]] = f64::NAN;
        assert_eq!(estimate_cv(broken.view(), 5.0, FSAMP).unwrap_err().kind(), "InvalidData");
    }

    #[test]
    fn test_empty_cell_in_range_rejected() {
        let pulse = |c: usize| Some(propagating(3, 64, 2.0).row(c).to_owned());
        let muap: MuapMap = ChannelGrid::from_columns(vec![vec![pulse(0), None, pulse(2)]]);

        let err = column_cells(&muap, 0, &(0..3)).unwrap_err();
        assert_eq!(err.kind(), "InvalidData");
        assert_eq!(column_cells(&muap, 1, &(0..1)).unwrap_err().kind(), "ShapeMismatch");
        assert_eq!(column_cells(&muap, 0, &(2..4)).unwrap_err().kind(), "ShapeMismatch");
        assert_eq!(column_cells(&muap, 0, &(2..3)).unwrap().len(), 1);

        let uneven: MuapMap =
            ChannelGrid::from_columns(vec![vec![Some(Array1::zeros(10)), Some(Array1::zeros(12))]]);
        let views: Vec<ArrayView1<f64>> = column_cells(&uneven, 0, &(0..2)).unwrap().into_iter().map(|c| c.view()).collect();
        assert_eq!(stacked(&views).unwrap_err().kind(), "ShapeMismatch");
    }
}
