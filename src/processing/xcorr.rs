// src/processing/xcorr.rs
//! Energy-normalized cross-correlation of MUAP maps

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rustfft::{num_complex::Complex, FftDirection, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::config::constants::xcorr::DIRECT_XCORR_MAX_OPS;
use crate::error::{EmgErrorBuilder, EmgResult};
use crate::grid::{ChannelGrid, MuapMap};

/// Output extent of a 2D cross-correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    /// Every lag with any overlap
    Full,
    /// Centered on zero lag, same size as the first input
    Same,
    /// Only lags where one input lies entirely inside the other
    Valid,
}

/// Correlation surface with its peak
#[derive(Debug, Clone, PartialEq)]
pub struct XcorrResult {
    pub surface: Array2<f64>,
    /// Greatest finite value of the surface, NaN if there is none
    pub peak: f64,
    /// (time, channel) lag of `surface[[0, 0]]`
    pub first_lag: (isize, isize),
}

impl XcorrResult {
    /// Position of the first greatest value in row-major order, ignoring NaN
    pub fn peak_index(&self) -> Option<(usize, usize)> {
        let mut best: Option<((usize, usize), f64)> = None;
        for (index, &value) in self.surface.indexed_iter() {
            if value.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, current)| value > current) {
                best = Some((index, value));
            }
        }
        best.map(|(index, _)| index)
    }

    /// (time, channel) lag of the peak
    pub fn peak_lag(&self) -> Option<(isize, isize)> {
        self.peak_index()
            .map(|(r, c)| (self.first_lag.0 + r as isize, self.first_lag.1 + c as isize))
    }
}

/// Normalized 2D cross-correlation of two `(samples, channels)` maps
///
/// `full[k, l] = sum a[i, j] * b[i - k + m2 - 1, j - l + n2 - 1]`, scaled by
/// `1 / sqrt(sum a^2 * sum b^2)`. Both maps must have the same channel count.
pub fn norm_twod_xcorr(a: &Array2<f64>, b: &Array2<f64>, mode: CorrelationMode) -> EmgResult<XcorrResult> {
    let builder = || EmgErrorBuilder::new("xcorr", "norm_twod_xcorr");
    if a.ncols() != b.ncols() {
        return Err(builder().configuration(&format!(
            "compared maps have different channel counts: {} vs {}",
            a.ncols(),
            b.ncols()
        )));
    }
    if a.is_empty() || b.is_empty() {
        return Err(builder().invalid_data("MUAP map", "cannot correlate an empty map"));
    }

    let (m1, n1) = a.dim();
    let (m2, n2) = b.dim();
    let full = full_correlation(a.view(), b.view());

    let (start, shape) = match mode {
        CorrelationMode::Full => ((0, 0), full.dim()),
        CorrelationMode::Same => (((m2 - 1) / 2, (n2 - 1) / 2), (m1, n1)),
        CorrelationMode::Valid => (
            (m1.min(m2) - 1, n1.min(n2) - 1),
            (m1.abs_diff(m2) + 1, n1.abs_diff(n2) + 1),
        ),
    };
    let cropped = full.slice(s![start.0..start.0 + shape.0, start.1..start.1 + shape.1]);

    let energy = (a.mapv(|x| x * x).sum() * b.mapv(|x| x * x).sum()).sqrt();
    let surface = if energy > 0.0 && energy.is_finite() {
        cropped.mapv(|x| x / energy)
    } else {
        Array2::from_elem(cropped.dim(), f64::NAN)
    };

    let peak = surface.iter().copied().filter(|x| !x.is_nan()).fold(f64::NAN, f64::max);
    let first_lag = (
        start.0 as isize - (m2 as isize - 1),
        start.1 as isize - (n2 as isize - 1),
    );

    Ok(XcorrResult { surface, peak, first_lag })
}

/// Unnormalized full correlation, direct for small inputs and via FFT otherwise
pub(crate) fn full_correlation(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let (m1, n1) = a.dim();
    let (m2, n2) = b.dim();
    if m1 * n1 * m2 * n2 <= DIRECT_XCORR_MAX_OPS {
        direct_correlation(a, b)
    } else {
        fft_correlation(a, b)
    }
}

fn direct_correlation(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let (m1, n1) = a.dim();
    let (m2, n2) = b.dim();
    let mut out = Array2::<f64>::zeros((m1 + m2 - 1, n1 + n2 - 1));

    for ((i, j), &x) in a.indexed_iter() {
        if x == 0.0 {
            continue;
        }
        for ((p, q), &y) in b.indexed_iter() {
            out[[i + m2 - 1 - p, j + n2 - 1 - q]] += x * y;
        }
    }
    out
}

/// Correlation as the convolution of `a` with `b` flipped on both axes
fn fft_correlation(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let (m1, n1) = a.dim();
    let (m2, n2) = b.dim();
    let shape = (m1 + m2 - 1, n1 + n2 - 1);

    let mut planner = FftPlanner::<f64>::new();

    let mut fa = Array2::from_elem(shape, Complex::new(0.0, 0.0));
    fa.slice_mut(s![..m1, ..n1]).zip_mut_with(&a, |z, &x| *z = Complex::new(x, 0.0));
    let mut fb = Array2::from_elem(shape, Complex::new(0.0, 0.0));
    fb.slice_mut(s![..m2, ..n2])
        .zip_mut_with(&b.slice(s![..;-1, ..;-1]), |z, &x| *z = Complex::new(x, 0.0));

    fft2(&mut fa, &mut planner, FftDirection::Forward);
    fft2(&mut fb, &mut planner, FftDirection::Forward);
    fa.zip_mut_with(&fb, |x, &y| *x *= y);
    fft2(&mut fa, &mut planner, FftDirection::Inverse);

    let scale = (shape.0 * shape.1) as f64;
    fa.mapv(|z| z.re / scale)
}

/// In-place 2D transform: every row, then every column
fn fft2(data: &mut Array2<Complex<f64>>, planner: &mut FftPlanner<f64>, direction: FftDirection) {
    for axis in [Axis(1), Axis(0)] {
        let len = data.len_of(axis);
        let fft = planner.plan_fft(len, direction);
        let mut buffer = vec![Complex::new(0.0, 0.0); len];
        let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        for mut lane in data.lanes_mut(axis) {
            buffer.iter_mut().zip(lane.iter()).for_each(|(dst, &src)| *dst = src);
            fft.process_with_scratch(&mut buffer, &mut scratch);
            lane.iter_mut().zip(&buffer).for_each(|(dst, &src)| *dst = src);
        }
    }
}

/// How [`norm_xcorr`] summarizes the correlation sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormXcorrOutput {
    /// Greatest value
    #[default]
    Max,
    /// Value of greatest magnitude, sign kept
    GreatestMagnitude,
}

/// Normalized 1D cross-correlation coefficient of two signals
pub fn norm_xcorr(a: &Array1<f64>, b: &Array1<f64>, output: NormXcorrOutput) -> EmgResult<f64> {
    if a.is_empty() || b.is_empty() {
        return Err(EmgErrorBuilder::new("xcorr", "norm_xcorr").invalid_data("signal", "cannot correlate an empty signal"));
    }

    let norm = (a.dot(a) * b.dot(b)).sqrt();
    let correlation =
        full_correlation(a.view().insert_axis(Axis(1)), b.view().insert_axis(Axis(1))).mapv(|x| x / norm);

    let values = correlation.iter().copied().filter(|x| !x.is_nan());
    Ok(match output {
        NormXcorrOutput::Max => values.fold(f64::NAN, f64::max),
        NormXcorrOutput::GreatestMagnitude => values.fold(f64::NAN, |best, x| {
            if best.is_nan() || x.abs() > best.abs() { x } else { best }
        }),
    })
}

/// XCC between each electrode and the one above it in the same column
///
/// The first row of every column, and any row next to an empty cell, is `None`.
pub fn xcc_sta(muap: &MuapMap) -> EmgResult<ChannelGrid<f64>> {
    let columns = muap
        .columns()
        .iter()
        .map(|column| {
            (0..column.rows.len())
                .map(|row| match (row.checked_sub(1).and_then(|prev| column.rows[prev].as_ref()), &column.rows[row]) {
                    (Some(previous), Some(current)) => norm_xcorr(current, previous, NormXcorrOutput::Max).map(Some),
                    _ => Ok(None),
                })
                .collect::<EmgResult<Vec<_>>>()
        })
        .collect::<EmgResult<Vec<_>>>()?;

    Ok(ChannelGrid::from_columns(columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn bump(n: usize, center: f64) -> Array2<f64> {
        Array2::from_shape_fn((n, 3), |(t, c)| {
            let d = t as f64 - center;
            (-(d * d) / 8.0).exp() * (c as f64 + 1.0)
        })
    }

    #[test]
    fn test_self_correlation_peaks_at_one() {
        let a = bump(40, 20.0);
        let result = norm_twod_xcorr(&a, &a, CorrelationMode::Full).unwrap();
        assert_eq!(result.surface.dim(), (79, 5));
        assert!((result.peak - 1.0).abs() < 1e-12);
        assert_eq!(result.peak_lag(), Some((0, 0)));
    }

    #[test]
    fn test_same_mode_reports_shift() {
        let a = bump(40, 24.0);
        let b = bump(40, 20.0);
        let result = norm_twod_xcorr(&a, &b, CorrelationMode::Same).unwrap();
        assert_eq!(result.surface.dim(), (40, 3));
        assert_eq!(result.peak_lag(), Some((4, 0)));
    }

    #[test]
    fn test_valid_mode_extent() {
        let a = bump(40, 20.0);
        let b = bump(30, 15.0);
        let result = norm_twod_xcorr(&a, &b, CorrelationMode::Valid).unwrap();
        assert_eq!(result.surface.dim(), (11, 1));
        assert_eq!(result.first_lag, (0, 0));

        let swapped = norm_twod_xcorr(&b, &a, CorrelationMode::Valid).unwrap();
        assert_eq!(swapped.first_lag, (-10, 0));
    }

    #[test]
    fn test_fft_matches_direct() {
        let a = Array2::from_shape_fn((70, 9), |(t, c)| ((t * 7 + c * 3) % 11) as f64 - 5.0);
        let b = Array2::from_shape_fn((60, 9), |(t, c)| ((t * 5 + c) % 13) as f64 - 6.0);
        let direct = direct_correlation(a.view(), b.view());
        let fft = fft_correlation(a.view(), b.view());
        for (x, y) in direct.iter().zip(fft.iter()) {
            assert!((x - y).abs() < 1e-6, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_zero_energy_yields_nan() {
        let a = Array2::<f64>::zeros((5, 2));
        let result = norm_twod_xcorr(&a, &bump(5, 2.0).slice(s![.., ..2]).to_owned(), CorrelationMode::Full).unwrap();
        assert!(result.peak.is_nan());
        assert_eq!(result.peak_index(), None);
    }

    #[test]
    fn test_channel_count_mismatch() {
        let err = norm_twod_xcorr(&bump(5, 2.0), &Array2::zeros((5, 2)), CorrelationMode::Full).unwrap_err();
        assert_eq!(err.kind(), "InvalidConfiguration");
    }

    #[test]
    fn test_norm_xcorr_outputs() {
        let a = array![0.0, 1.0, 0.0];
        let b = array![0.0, -1.0, 0.0];
        assert!((norm_xcorr(&a, &a, NormXcorrOutput::Max).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(norm_xcorr(&a, &b, NormXcorrOutput::Max).unwrap(), 0.0);
        assert!((norm_xcorr(&a, &b, NormXcorrOutput::GreatestMagnitude).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_xcc_sta_first_row_undefined() {
        let muap: MuapMap = ChannelGrid::from_columns(vec![vec![
            Some(array![0.0, 1.0, 0.0]),
            Some(array![0.0, 2.0, 0.0]),
            None,
            Some(array![1.0, 0.0, 0.0]),
        ]]);
        let xcc = xcc_sta(&muap).unwrap();
        assert!(xcc.get(0, 0).is_none());
        assert!((xcc.get(0, 1).unwrap() - 1.0).abs() < 1e-12);
        assert!(xcc.get(0, 2).is_none());
        assert!(xcc.get(0, 3).is_none());
    }
}
