// src/config/tracking_config.rs
//! MUAP estimation, tracking and duplicate-removal configuration structures

use serde::{Deserialize, Serialize};

use crate::config::constants::{electrodes, muap, tracking};
use crate::electrodes::{ElectrodeSelection, Orientation};
use crate::error::{EmgErrorBuilder, EmgResult};
use crate::processing::{Derivation, FiringRange};
use crate::tracking::DuplicateStrategy;

/// Complete analysis configuration as loaded from file
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub duplicates: DuplicateConfig,
}

/// Electrode grid selection
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ElectrodeConfig {
    #[serde(default = "defaults::matrix_code")]
    pub matrix_code: String,

    #[serde(default = "defaults::orientation")]
    pub orientation: Orientation,

    #[serde(default)]
    pub n_rows: Option<usize>,

    #[serde(default)]
    pub n_cols: Option<usize>,

    /// One inner list per matrix column; `EMPTY_CHANNEL_MARKER` marks an empty position
    #[serde(default)]
    pub custom_order: Option<Vec<Vec<i64>>>,
}

/// How MUAPs are obtained from a recording
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MuapConfig {
    #[serde(default)]
    pub derivation: Derivation,

    #[serde(default = "defaults::timewindow_ms")]
    pub timewindow_ms: f64,

    #[serde(default)]
    pub firings: FiringRange,

    #[serde(default)]
    pub electrode: ElectrodeConfig,
}

/// MU tracking between two recordings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TrackingConfig {
    #[serde(default = "defaults::tracking_threshold")]
    pub threshold: f64,

    #[serde(default = "defaults::enabled")]
    pub exclude_below_threshold: bool,

    #[serde(default = "defaults::enabled")]
    pub filter: bool,

    #[serde(default = "defaults::final_fraction")]
    pub final_fraction: f64,

    #[serde(default)]
    pub muap: MuapConfig,
}

/// Duplicate removal between two recordings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DuplicateConfig {
    #[serde(default = "defaults::duplicate_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub strategy: DuplicateStrategy,

    #[serde(default = "defaults::final_fraction")]
    pub final_fraction: f64,

    #[serde(default)]
    pub muap: MuapConfig,
}

mod defaults {
    use crate::config::constants::*;
    use crate::electrodes::Orientation;

    pub fn matrix_code() -> String {
        electrodes::DEFAULT_MATRIX_CODE.to_string()
    }

    pub fn orientation() -> Orientation {
        Orientation::Deg180
    }

    pub fn timewindow_ms() -> f64 {
        muap::DEFAULT_TIMEWINDOW_MS
    }

    pub fn tracking_threshold() -> f64 {
        tracking::DEFAULT_TRACKING_THRESHOLD
    }

    pub fn duplicate_threshold() -> f64 {
        tracking::DEFAULT_DUPLICATE_THRESHOLD
    }

    pub fn final_fraction() -> f64 {
        muap::DEFAULT_FINAL_FRACTION
    }

    pub fn enabled() -> bool {
        true
    }
}

impl Default for ElectrodeConfig {
    fn default() -> Self {
        Self {
            matrix_code: defaults::matrix_code(),
            orientation: defaults::orientation(),
            n_rows: None,
            n_cols: None,
            custom_order: None,
        }
    }
}

impl Default for MuapConfig {
    fn default() -> Self {
        Self {
            firings: FiringRange::All,
            derivation: Derivation::default(),
            timewindow_ms: defaults::timewindow_ms(),
            electrode: ElectrodeConfig::default(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            muap: MuapConfig::default(),
            threshold: defaults::tracking_threshold(),
            exclude_below_threshold: true,
            filter: true,
            final_fraction: defaults::final_fraction(),
        }
    }
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            muap: MuapConfig::default(),
            threshold: defaults::duplicate_threshold(),
            strategy: DuplicateStrategy::default(),
            final_fraction: defaults::final_fraction(),
        }
    }
}

impl ElectrodeConfig {
    /// Resolve into a typed selection, converting empty markers into sentinels
    pub fn to_selection(&self) -> EmgResult<ElectrodeSelection> {
        let custom_order = match &self.custom_order {
            Some(columns) => Some(
                columns
                    .iter()
                    .map(|column| column.iter().map(|&cell| decode_cell(cell)).collect::<EmgResult<Vec<_>>>())
                    .collect::<EmgResult<Vec<_>>>()?,
            ),
            None => None,
        };

        ElectrodeSelection::parse(
            &self.matrix_code,
            self.orientation,
            self.n_rows,
            self.n_cols,
            custom_order,
        )
    }
}

fn decode_cell(cell: i64) -> EmgResult<Option<usize>> {
    if cell == electrodes::EMPTY_CHANNEL_MARKER {
        Ok(None)
    } else if cell >= 0 {
        Ok(Some(cell as usize))
    } else {
        Err(EmgErrorBuilder::new("electrode_config", "to_selection").configuration(&format!(
            "custom order cell {} is neither a channel index nor the empty marker {}",
            cell,
            electrodes::EMPTY_CHANNEL_MARKER
        )))
    }
}

impl MuapConfig {
    /// Collect every violation instead of stopping at the first one
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !(self.timewindow_ms.is_finite() && self.timewindow_ms > 0.0) {
            errors.push(format!("timewindow_ms must be positive, got {}", self.timewindow_ms));
        }
        if let FiringRange::Span { start, stop } = self.firings {
            if start > stop {
                errors.push(format!("firing range start ({}) exceeds stop ({})", start, stop));
            }
        }
        if let Err(err) = self.electrode.to_selection() {
            errors.push(err.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validate_threshold(threshold: f64, errors: &mut Vec<String>) {
    if !(tracking::MIN_THRESHOLD..=tracking::MAX_THRESHOLD).contains(&threshold) {
        errors.push(format!(
            "threshold must lie in [{}, {}], got {}",
            tracking::MIN_THRESHOLD,
            tracking::MAX_THRESHOLD,
            threshold
        ));
    }
}

fn validate_fraction(fraction: f64, errors: &mut Vec<String>) {
    if !(fraction > 0.0 && fraction <= 1.0) {
        errors.push(format!("final_fraction must lie in (0, 1], got {}", fraction));
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = self.muap.validate().err().unwrap_or_default();
        validate_threshold(self.threshold, &mut errors);
        validate_fraction(self.final_fraction, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and surface the violations as a single `InvalidConfiguration`
    pub fn ensure_valid(&self, operation: &str) -> EmgResult<()> {
        self.validate()
            .map_err(|errors| EmgErrorBuilder::new("tracking_config", operation).configuration(&errors.join("; ")))
    }
}

impl DuplicateConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = self.muap.validate().err().unwrap_or_default();
        validate_threshold(self.threshold, &mut errors);
        validate_fraction(self.final_fraction, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn ensure_valid(&self, operation: &str) -> EmgResult<()> {
        self.validate()
            .map_err(|errors| EmgErrorBuilder::new("duplicate_config", operation).configuration(&errors.join("; ")))
    }

    /// Tracking settings used to find duplicates: only filtered matches above threshold
    pub fn tracking_config(&self) -> TrackingConfig {
        TrackingConfig {
            muap: self.muap.clone(),
            threshold: self.threshold,
            exclude_below_threshold: true,
            filter: true,
            final_fraction: self.final_fraction,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if let Err(tracking_errors) = self.tracking.validate() {
            errors.extend(tracking_errors.into_iter().map(|e| format!("tracking: {}", e)));
        }
        if let Err(duplicate_errors) = self.duplicates.validate() {
            errors.extend(duplicate_errors.into_iter().map(|e| format!("duplicates: {}", e)));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
