// src/processing/differential.rs
//! Spatial differential derivations along matrix rows

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::grid::GridSignal;

/// Spatial filter applied before averaging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Derivation {
    #[serde(rename = "mono")]
    Monopolar,
    #[default]
    #[serde(rename = "sd")]
    SingleDifferential,
    #[serde(rename = "dd")]
    DoubleDifferential,
}

const SINGLE_DIFFERENTIAL: [f64; 2] = [1.0, -1.0];
const DOUBLE_DIFFERENTIAL: [f64; 3] = [-1.0, 2.0, -1.0];

/// Single differential: `out[i] = row[i] - row[i + 1]`, one row fewer per column
pub fn diff(sorted: &GridSignal) -> GridSignal {
    sorted.map_columns(|rows| apply_kernel(rows, &SINGLE_DIFFERENTIAL))
}

/// Double differential: `out[i] = -row[i] + 2 row[i + 1] - row[i + 2]`, two rows fewer
pub fn double_diff(sorted: &GridSignal) -> GridSignal {
    sorted.map_columns(|rows| apply_kernel(rows, &DOUBLE_DIFFERENTIAL))
}

pub fn derive(sorted: &GridSignal, derivation: Derivation) -> GridSignal {
    match derivation {
        Derivation::Monopolar => sorted.clone(),
        Derivation::SingleDifferential => diff(sorted),
        Derivation::DoubleDifferential => double_diff(sorted),
    }
}

/// Slide `kernel` down the rows; an output is empty if any input row under the kernel is
fn apply_kernel(rows: &[Option<Array1<f64>>], kernel: &[f64]) -> Vec<Option<Array1<f64>>> {
    rows.windows(kernel.len())
        .map(|window| {
            window.iter().zip(kernel).try_fold(None::<Array1<f64>>, |acc, (row, &weight)| {
                let row = row.as_ref()?;
                Some(Some(match acc {
                    Some(sum) => sum + &(row * weight),
                    None => row * weight,
                }))
            })?
        })
        .collect()
}
