// src/grid.rs
//! Column-partitioned channel grids
//!
//! Sorted signals, differential signals, MUAP maps and per-firing ensembles
//! all share one shape: a list of labelled matrix columns, each holding one
//! optional cell per electrode row. A `None` cell marks an empty electrode
//! position (or a derivation that could not be computed there).

use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::constants::electrodes::COLUMN_LABEL_PREFIX;
use crate::error::{EmgErrorBuilder, EmgResult};

/// One matrix column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridColumn<T> {
    pub label: String,
    pub rows: Vec<Option<T>>,
}

/// Cells arranged as matrix columns of electrode rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGrid<T> {
    columns: Vec<GridColumn<T>>,
}

/// Sorted or differential signal: one sample sequence per electrode
pub type GridSignal = ChannelGrid<Array1<f64>>;
/// Averaged action potential of one MU: one waveform per electrode
pub type MuapMap = ChannelGrid<Array1<f64>>;
/// Un-averaged snippets of one MU, shape `(firings, window)` per electrode
pub type StMuapSet = ChannelGrid<Array2<f64>>;

pub fn column_label(index: usize) -> String {
    format!("{}{}", COLUMN_LABEL_PREFIX, index)
}

impl<T> ChannelGrid<T> {
    /// Build from raw columns, labelling them `col0`, `col1`, ...
    pub fn from_columns(columns: Vec<Vec<Option<T>>>) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(index, rows)| GridColumn { label: column_label(index), rows })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[GridColumn<T>] {
        &self.columns
    }

    pub fn column(&self, label: &str) -> Option<&GridColumn<T>> {
        self.columns.iter().find(|c| c.label == label)
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Row count of every column, in column order
    pub fn shape(&self) -> Vec<usize> {
        self.columns.iter().map(|c| c.rows.len()).collect()
    }

    /// Every cell in grid order (column by column, top row first)
    pub fn cells(&self) -> impl Iterator<Item = Option<&T>> + '_ {
        self.columns.iter().flat_map(|c| c.rows.iter().map(Option::as_ref))
    }

    pub fn get(&self, column: usize, row: usize) -> Option<&T> {
        self.columns.get(column)?.rows.get(row)?.as_ref()
    }

    pub fn n_present(&self) -> usize {
        self.cells().filter(Option::is_some).count()
    }

    /// `true` for every cell that holds a value, in grid order
    pub fn presence_mask(&self) -> Vec<bool> {
        self.cells().map(|c| c.is_some()).collect()
    }

    /// Transform every present cell; `None` from `f` leaves the cell empty
    pub fn map_cells<U, F>(&self, mut f: F) -> ChannelGrid<U>
    where
        F: FnMut(&T) -> Option<U>,
    {
        let columns = self
            .columns
            .iter()
            .map(|column| GridColumn {
                label: column.label.clone(),
                rows: column.rows.iter().map(|cell| cell.as_ref().and_then(&mut f)).collect(),
            })
            .collect();
        ChannelGrid { columns }
    }

    /// Rebuild each column from its rows, keeping labels
    pub fn map_columns<U, F>(&self, mut f: F) -> ChannelGrid<U>
    where
        F: FnMut(&[Option<T>]) -> Vec<Option<U>>,
    {
        let columns = self
            .columns
            .iter()
            .map(|column| GridColumn {
                label: column.label.clone(),
                rows: f(&column.rows),
            })
            .collect();
        ChannelGrid { columns }
    }
}

impl ChannelGrid<Array1<f64>> {
    /// Samples per cell, taken from the first present cell
    pub fn n_samples(&self) -> usize {
        self.cells().flatten().next().map(Array1::len).unwrap_or(0)
    }

    /// Flatten into a `(samples, cells)` matrix in grid order, empty cells as NaN
    pub fn to_flat(&self) -> EmgResult<Array2<f64>> {
        let mask = vec![true; self.shape().iter().sum()];
        self.unpack_with_fill(&mask)
    }

    /// Stack the cells selected by `mask` into a `(samples, selected)` matrix
    ///
    /// Fails if a selected cell is empty or the cells differ in length.
    pub fn unpack(&self, mask: &[bool]) -> EmgResult<Array2<f64>> {
        let builder = || EmgErrorBuilder::new("grid", "unpack");
        if let Some(position) = self.cells().zip(mask).position(|(cell, &keep)| keep && cell.is_none()) {
            return Err(builder().invalid_data("grid cell", &format!("selected cell {} is empty", position)));
        }
        self.unpack_with_fill(mask)
    }

    fn unpack_with_fill(&self, mask: &[bool]) -> EmgResult<Array2<f64>> {
        let n_cells: usize = self.shape().iter().sum();
        if mask.len() != n_cells {
            return Err(EmgErrorBuilder::new("grid", "unpack").shape_mismatch(
                "cell mask does not match the grid",
                n_cells,
                mask.len(),
            ));
        }

        let n_samples = self.n_samples();
        let selected = mask.iter().filter(|&&keep| keep).count();
        let mut out = Array2::from_elem((n_samples, selected), f64::NAN);

        for (target, cell) in self.cells().zip(mask).filter(|(_, &keep)| keep).map(|(c, _)| c).enumerate() {
            if let Some(values) = cell {
                if values.len() != n_samples {
                    return Err(EmgErrorBuilder::new("grid", "unpack").shape_mismatch(
                        "cells differ in length",
                        n_samples,
                        values.len(),
                    ));
                }
                out.column_mut(target).assign(values);
            }
        }

        Ok(out)
    }

    /// Keep `len` samples starting at `start` in every present cell
    pub fn crop(&self, start: usize, len: usize) -> EmgResult<Self> {
        let n_samples = self.n_samples();
        if start + len > n_samples {
            return Err(EmgErrorBuilder::new("grid", "crop").shape_mismatch(
                "crop window exceeds the signal",
                format!("<= {}", n_samples),
                start + len,
            ));
        }
        Ok(self.map_cells(|values| Some(values.slice(s![start..start + len]).to_owned())))
    }
}

/// Cells present in both grids; fails if the grids are arranged differently
pub fn joint_mask<T, U>(a: &ChannelGrid<T>, b: &ChannelGrid<U>) -> EmgResult<Vec<bool>> {
    let (shape_a, shape_b) = (a.shape(), b.shape());
    if shape_a != shape_b {
        return Err(EmgErrorBuilder::new("grid", "joint_mask").configuration(&format!(
            "compared maps have different channel arrangements: {:?} vs {:?}",
            shape_a, shape_b
        )));
    }

    Ok(a.cells().zip(b.cells()).map(|(x, y)| x.is_some() && y.is_some()).collect())
}
