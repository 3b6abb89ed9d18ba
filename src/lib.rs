//! HDEMG-Core: motor unit matching for high-density surface EMG decompositions
//!
//! This library works on decomposed HD-EMG recordings (raw multi-channel
//! signal plus one firing train per motor unit). It provides:
//!
//! - An injectable electrode geometry catalog and channel sorter
//! - Single and double spatial differential derivations
//! - Spike-triggered averaging of MU action potentials (MUAPs)
//! - Energy-normalized 2D cross-correlation and lag alignment of MUAP maps
//! - Conduction velocity estimation by maximum-likelihood delay
//! - Parallel MU tracking across recordings and duplicate resolution
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hdemg_core::config::TrackingConfig;
//! use hdemg_core::electrodes::ElectrodeCatalog;
//! use hdemg_core::simulation::SyntheticRecordingBuilder;
//! use hdemg_core::tracking::tracking;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let recording = SyntheticRecordingBuilder::new(4, 4).motor_units(3).build()?;
//!
//!     let mut config = TrackingConfig::default();
//!     config.muap.electrode.matrix_code = "None".to_string();
//!     config.muap.electrode.n_rows = Some(4);
//!     config.muap.electrode.n_cols = Some(4);
//!
//!     let catalog = ElectrodeCatalog::builtin();
//!     let matches = tracking(&recording, &recording, &catalog, &config)?;
//!     for row in matches.iter() {
//!         println!("MU {} <-> MU {}: XCC {:.3}", row.mu_a, row.mu_b, row.xcc);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod electrodes;
pub mod error;
pub mod grid;
pub mod processing;
pub mod record;
pub mod simulation;
pub mod tracking;

// Re-export commonly used types for convenience
pub use electrodes::{sort_rawemg, ElectrodeCatalog, ElectrodeLayout, ElectrodeSelection, Orientation};
pub use error::{EmgError, EmgResult};
pub use grid::{ChannelGrid, GridSignal, MuapMap, StMuapSet};
pub use processing::{
    align_by_xcorr, diff, double_diff, estimate_cv_via_mle, norm_twod_xcorr, st_muap, sta, ConductionVelocity, Derivation,
    FiringRange,
};
pub use record::{Decomposition, FiringTrain, RawSignal, Recording};
pub use tracking::{remove_duplicates_between, tracking, DuplicateStrategy, MatchTable, TrackingMatch};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: "Motor unit matching for high-density surface EMG decompositions".to_string(),
        features: vec![
            "Electrode geometry catalog".to_string(),
            "Spike-triggered MUAP estimation".to_string(),
            "Normalized 2D cross-correlation".to_string(),
            "Parallel MU tracking".to_string(),
            "Duplicate MU resolution".to_string(),
        ],
    }
}

/// Library version information
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Library name
    pub name: String,
    /// Version string
    pub version: String,
    /// Description
    pub description: String,
    /// List of features
    pub features: Vec<String>,
}
