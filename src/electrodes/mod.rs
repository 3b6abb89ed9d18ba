// src/electrodes/mod.rs
//! Electrode geometry catalog
//!
//! Maps a matrix code and orientation to the physical arrangement of its
//! channels. The catalog is a plain value built once and passed to every
//! sorting call, so callers can extend it with their own matrices.

pub mod sorter;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::constants::electrodes::{CUSTOM_ORDER_CODE, TRIGNO_GALILEO_CODE, UNSORTED_CODE};
use crate::error::{EmgErrorBuilder, EmgResult};

pub use sorter::{sort_rawemg, sort_signal, sort_with_layout};

/// Rotation of the matrix on the skin, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Orientation {
    Deg0,
    Deg180,
}

impl TryFrom<u16> for Orientation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Orientation::Deg0),
            180 => Ok(Orientation::Deg180),
            other => Err(format!("orientation must be 0 or 180 degrees, got {}", other)),
        }
    }
}

impl From<Orientation> for u16 {
    fn from(orientation: Orientation) -> Self {
        match orientation {
            Orientation::Deg0 => 0,
            Orientation::Deg180 => 180,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", u16::from(*self))
    }
}

/// Channel index per grid position, one inner list per matrix column.
/// `None` marks an empty electrode position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectrodeLayout {
    columns: Vec<Vec<Option<usize>>>,
}

impl ElectrodeLayout {
    pub fn new(columns: Vec<Vec<Option<usize>>>) -> Self {
        Self { columns }
    }

    /// Column-major partition of `n_rows * n_cols` channels without reordering
    pub fn unsorted(n_rows: usize, n_cols: usize) -> Self {
        let columns = (0..n_cols)
            .map(|c| (0..n_rows).map(|r| Some(c * n_rows + r)).collect())
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[Vec<Option<usize>>] {
        &self.columns
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn n_rows(&self) -> usize {
        self.columns.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Channel indices in grid order, skipping empty positions
    pub fn channels(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns.iter().flatten().filter_map(|cell| *cell)
    }

    /// Check the layout against a signal with `n_channels` channels.
    ///
    /// Indices must be unique and in range. With `full_coverage` every raw
    /// channel must also appear exactly once.
    pub fn validate(&self, n_channels: usize, full_coverage: bool) -> EmgResult<()> {
        let builder = || EmgErrorBuilder::new("electrodes", "validate_layout");

        let mut seen = HashSet::new();
        for channel in self.channels() {
            if channel >= n_channels {
                return Err(builder().shape_mismatch(
                    &format!("channel {} is out of range", channel),
                    format!("< {}", n_channels),
                    channel,
                ));
            }
            if !seen.insert(channel) {
                return Err(builder().shape_mismatch(
                    &format!("channel {} appears more than once", channel),
                    "unique channel indices",
                    channel,
                ));
            }
        }

        if full_coverage && seen.len() != n_channels {
            return Err(builder().shape_mismatch(
                "layout does not cover every raw channel",
                seen.len(),
                n_channels,
            ));
        }
        Ok(())
    }
}

/// How a catalog matrix arranges its channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixLayout {
    /// Arrangement depends on the matrix orientation
    Oriented { deg0: ElectrodeLayout, deg180: ElectrodeLayout },
    /// Arrangement ignores orientation
    Fixed(ElectrodeLayout),
}

impl MatrixLayout {
    pub fn for_orientation(&self, orientation: Orientation) -> &ElectrodeLayout {
        match (self, orientation) {
            (MatrixLayout::Oriented { deg0, .. }, Orientation::Deg0) => deg0,
            (MatrixLayout::Oriented { deg180, .. }, Orientation::Deg180) => deg180,
            (MatrixLayout::Fixed(layout), _) => layout,
        }
    }
}

/// Catalog entry for one electrode matrix
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSpec {
    pub code: String,
    /// Inter-electrode distance; `None` when the acquisition record carries it
    pub ied_mm: Option<f64>,
    pub n_electrodes: usize,
    /// `None` for matrices with known metadata but no sorting order
    pub layout: Option<MatrixLayout>,
}

/// Registry of known electrode matrices
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElectrodeCatalog {
    matrices: BTreeMap<String, MatrixSpec>,
}

impl ElectrodeCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the supported commercial matrices
    pub fn builtin() -> Self {
        let mut catalog = Self::new();

        let metadata_only: [(&str, f64, usize); 6] = [
            ("GR100ML1305", 2.5, 64),
            ("GR10MM0804", 10.0, 32),
            ("HD04MM1305", 4.0, 64),
            ("HD08MM1305", 8.0, 64),
            ("HD10MM0804", 10.0, 32),
            ("HD10MM0808", 10.0, 64),
        ];
        for (code, ied_mm, n_electrodes) in metadata_only {
            catalog.register(MatrixSpec {
                code: code.to_string(),
                ied_mm: Some(ied_mm),
                n_electrodes,
                layout: None,
            });
        }

        for (code, ied_mm) in [("GR08MM1305", 8.0), ("GR04MM1305", 4.0)] {
            catalog.register(MatrixSpec {
                code: code.to_string(),
                ied_mm: Some(ied_mm),
                n_electrodes: 64,
                layout: Some(layouts::grid_13x5()),
            });
        }

        catalog.register(MatrixSpec {
            code: "GR10MM0808".to_string(),
            ied_mm: Some(10.0),
            n_electrodes: 64,
            layout: Some(layouts::grid_8x8()),
        });

        catalog.register(MatrixSpec {
            code: TRIGNO_GALILEO_CODE.to_string(),
            ied_mm: None,
            n_electrodes: 4,
            layout: Some(MatrixLayout::Fixed(ElectrodeLayout::unsorted(4, 1))),
        });

        catalog
    }

    /// Add or replace a matrix
    pub fn register(&mut self, spec: MatrixSpec) {
        self.matrices.insert(spec.code.clone(), spec);
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.matrices.keys().map(String::as_str)
    }

    pub fn get(&self, code: &str) -> EmgResult<&MatrixSpec> {
        self.matrices
            .get(code)
            .ok_or_else(|| EmgErrorBuilder::new("electrodes", "catalog_lookup").unsupported_code(code))
    }

    pub fn ied_mm(&self, code: &str) -> EmgResult<Option<f64>> {
        Ok(self.get(code)?.ied_mm)
    }

    /// Sorting layout of a matrix, failing for codes without one
    pub fn layout(&self, code: &str, orientation: Orientation) -> EmgResult<&ElectrodeLayout> {
        let spec = self.get(code)?;
        spec.layout
            .as_ref()
            .map(|layout| layout.for_orientation(orientation))
            .ok_or_else(|| EmgErrorBuilder::new("electrodes", "catalog_layout").unsupported_code(code))
    }
}

/// Where a sorting layout comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectrodeSelection {
    Catalog { code: String, orientation: Orientation },
    /// Caller-supplied order, one inner list per column
    Custom { order: Vec<Vec<Option<usize>>> },
    /// Partition by explicit rows and columns, no reordering
    Unsorted { n_rows: usize, n_cols: usize },
}

impl ElectrodeSelection {
    pub fn catalog(code: &str, orientation: Orientation) -> Self {
        ElectrodeSelection::Catalog { code: code.to_string(), orientation }
    }

    /// Interpret the caller-facing arguments (`code`, orientation, rows, columns, custom order)
    pub fn parse(
        code: &str,
        orientation: Orientation,
        n_rows: Option<usize>,
        n_cols: Option<usize>,
        custom_order: Option<Vec<Vec<Option<usize>>>>,
    ) -> EmgResult<Self> {
        let builder = || EmgErrorBuilder::new("electrodes", "parse_selection");

        match code {
            CUSTOM_ORDER_CODE => {
                let order = custom_order
                    .ok_or_else(|| builder().configuration("\"Custom order\" requires a custom channel order"))?;
                if order.is_empty() || order.iter().any(Vec::is_empty) {
                    return Err(builder().shape_mismatch("custom order has an empty column", "R x C order", "empty column"));
                }
                let n_rows = order[0].len();
                if let Some(column) = order.iter().position(|c| c.len() != n_rows) {
                    return Err(builder().shape_mismatch(
                        &format!("custom order column {} has a different row count", column),
                        n_rows,
                        order[column].len(),
                    ));
                }
                Ok(ElectrodeSelection::Custom { order })
            }
            UNSORTED_CODE => match (n_rows, n_cols) {
                (Some(n_rows), Some(n_cols)) if n_rows > 0 && n_cols > 0 => {
                    Ok(ElectrodeSelection::Unsorted { n_rows, n_cols })
                }
                _ => Err(builder().configuration("code \"None\" requires positive n_rows and n_cols")),
            },
            _ => Ok(ElectrodeSelection::catalog(code, orientation)),
        }
    }

    /// Produce the layout for a signal with `n_channels` channels
    pub fn resolve(&self, catalog: &ElectrodeCatalog, n_channels: usize) -> EmgResult<ElectrodeLayout> {
        let layout = match self {
            ElectrodeSelection::Catalog { code, orientation } => {
                let layout = catalog.layout(code, *orientation)?.clone();
                layout.validate(n_channels, true)?;
                layout
            }
            ElectrodeSelection::Custom { order } => {
                let layout = ElectrodeLayout::new(order.clone());
                layout.validate(n_channels, false)?;
                layout
            }
            ElectrodeSelection::Unsorted { n_rows, n_cols } => {
                if n_rows * n_cols != n_channels {
                    return Err(EmgErrorBuilder::new("electrodes", "resolve_layout").shape_mismatch(
                        &format!("{} rows x {} columns does not match the signal", n_rows, n_cols),
                        n_rows * n_cols,
                        n_channels,
                    ));
                }
                ElectrodeLayout::unsorted(*n_rows, *n_cols)
            }
        };

        debug!(
            selection = ?self,
            n_rows = layout.n_rows(),
            n_cols = layout.n_cols(),
            n_channels,
            "resolved electrode layout"
        );
        Ok(layout)
    }
}

mod layouts {
    use super::{ElectrodeLayout, MatrixLayout};

    fn up(from: usize, to: usize) -> Vec<Option<usize>> {
        (from..=to).map(Some).collect()
    }

    fn down(from: usize, to: usize) -> Vec<Option<usize>> {
        (to..=from).rev().map(Some).collect()
    }

    fn with_empty_first(mut column: Vec<Option<usize>>) -> Vec<Option<usize>> {
        column.insert(0, None);
        column
    }

    fn with_empty_last(mut column: Vec<Option<usize>>) -> Vec<Option<usize>> {
        column.push(None);
        column
    }

    /// 13 x 5 matrices with the empty position in a corner
    pub fn grid_13x5() -> MatrixLayout {
        MatrixLayout::Oriented {
            deg0: ElectrodeLayout::new(vec![
                down(63, 51),
                up(38, 50),
                down(37, 25),
                up(12, 24),
                with_empty_last(down(11, 0)),
            ]),
            deg180: ElectrodeLayout::new(vec![
                with_empty_first(up(0, 11)),
                down(24, 12),
                up(25, 37),
                down(50, 38),
                up(51, 63),
            ]),
        }
    }

    /// 8 x 8 matrices
    pub fn grid_8x8() -> MatrixLayout {
        MatrixLayout::Oriented {
            deg0: ElectrodeLayout::new((0..8).map(|c| up((7 - c) * 8, (7 - c) * 8 + 7)).collect()),
            deg180: ElectrodeLayout::new((0..8).map(|c| down(c * 8 + 7, c * 8)).collect()),
        }
    }
}
