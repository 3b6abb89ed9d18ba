// src/electrodes/sorter.rs
//! Re-map raw channels onto the physical electrode grid

use tracing::debug;

use crate::electrodes::{ElectrodeCatalog, ElectrodeLayout, ElectrodeSelection};
use crate::error::EmgResult;
use crate::grid::{ChannelGrid, GridSignal};
use crate::record::{RawSignal, Recording};

/// Partition `raw` into matrix columns following `layout`
pub fn sort_with_layout(raw: &RawSignal, layout: &ElectrodeLayout) -> EmgResult<GridSignal> {
    layout.validate(raw.n_channels(), false)?;

    let columns = layout
        .columns()
        .iter()
        .map(|column| {
            column
                .iter()
                .map(|cell| cell.map(|channel| raw.channel(channel).to_owned()))
                .collect()
        })
        .collect();

    Ok(ChannelGrid::from_columns(columns))
}

/// Resolve the selection against the catalog, then sort
pub fn sort_signal(
    raw: &RawSignal,
    catalog: &ElectrodeCatalog,
    selection: &ElectrodeSelection,
) -> EmgResult<GridSignal> {
    let layout = selection.resolve(catalog, raw.n_channels())?;
    let sorted = sort_with_layout(raw, &layout)?;
    debug!(columns = sorted.n_columns(), present = sorted.n_present(), "sorted raw signal");
    Ok(sorted)
}

/// Sort the raw signal of a recording
pub fn sort_rawemg(
    recording: &Recording,
    catalog: &ElectrodeCatalog,
    selection: &ElectrodeSelection,
) -> EmgResult<GridSignal> {
    sort_signal(recording.raw(), catalog, selection)
}
