// src/processing/alignment.rs
//! Temporal alignment of two MUAP maps by cross-correlation

use ndarray::Array2;
use tracing::{debug, warn};

use crate::error::{EmgErrorBuilder, EmgResult};
use crate::grid::{joint_mask, MuapMap};
use crate::processing::xcorr::{norm_twod_xcorr, CorrelationMode};

/// Samples kept after aligning signals of `n_samples` to `final_fraction`
pub fn aligned_length(n_samples: usize, final_fraction: f64) -> EmgResult<usize> {
    let builder = || EmgErrorBuilder::new("alignment", "aligned_length");
    if !(final_fraction > 0.0 && final_fraction <= 1.0) {
        return Err(builder().configuration(&format!("final fraction must lie in (0, 1], got {}", final_fraction)));
    }

    let final_len = (n_samples as f64 * final_fraction).round_ties_even() as usize;
    if final_len == 0 {
        return Err(builder().configuration(&format!(
            "final fraction {} of {} samples leaves nothing to compare",
            final_fraction, n_samples
        )));
    }
    Ok(final_len)
}

/// Time lag of the global maximum of the "same" correlation surface.
///
/// Positive when `a` lags behind `b`. Zero if the surface has no finite value.
pub fn estimate_lag(a: &Array2<f64>, b: &Array2<f64>) -> EmgResult<isize> {
    let result = norm_twod_xcorr(a, b, CorrelationMode::Same)?;
    Ok(result.peak_lag().map_or(0, |(lag, _)| lag))
}

/// Shift `a` and `b` onto a common time axis and crop both to
/// `round(n_samples * final_fraction)` samples.
///
/// Cells empty in either map do not take part in the lag estimate but keep
/// their position in the output.
pub fn align_by_xcorr(a: &MuapMap, b: &MuapMap, final_fraction: f64) -> EmgResult<(MuapMap, MuapMap)> {
    let mask = joint_mask(a, b)?;
    let n_samples = a.n_samples();
    if b.n_samples() != n_samples {
        return Err(EmgErrorBuilder::new("alignment", "align_by_xcorr").shape_mismatch(
            "aligned maps differ in length",
            n_samples,
            b.n_samples(),
        ));
    }
    let final_len = aligned_length(n_samples, final_fraction)?;

    let raw_lag = if mask.iter().any(|&present| present) {
        estimate_lag(&a.unpack(&mask)?, &b.unpack(&mask)?)?
    } else {
        0
    };

    let max_shift = (final_len / 2).min(n_samples - final_len) as isize;
    let lag = raw_lag.clamp(-max_shift, max_shift);
    if lag != raw_lag {
        warn!(raw_lag, lag, max_shift, "alignment lag clamped");
    }

    let overlap = n_samples - lag.unsigned_abs();
    let crop_start = (overlap - final_len) / 2;
    let start_a = crop_start + lag.max(0) as usize;
    let start_b = crop_start + (-lag).max(0) as usize;
    debug!(lag, final_len, start_a, start_b, "aligned MUAP maps");

    Ok((a.crop(start_a, final_len)?, b.crop(start_b, final_len)?))
}
