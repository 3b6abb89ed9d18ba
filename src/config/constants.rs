// src/config/constants.rs
//! Named defaults and limits shared across the crate

/// MUAP estimation constants
pub mod muap {
    /// STA timewindow used when none is configured
    pub const DEFAULT_TIMEWINDOW_MS: f64 = 50.0;
    /// Tracking computes its STAs over this multiple of the timewindow before alignment
    pub const TRACKING_WINDOW_FACTOR: f64 = 2.0;
    /// Fraction of the STA kept after alignment
    pub const DEFAULT_FINAL_FRACTION: f64 = 0.5;
    pub const MILLISECONDS_PER_SECOND: f64 = 1000.0;
}

/// MU matching constants
pub mod tracking {
    pub const DEFAULT_TRACKING_THRESHOLD: f64 = 0.8;
    pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.9;
    pub const MIN_THRESHOLD: f64 = 0.0;
    pub const MAX_THRESHOLD: f64 = 1.0;
}

/// Electrode catalog constants
pub mod electrodes {
    pub const DEFAULT_MATRIX_CODE: &str = "GR08MM1305";
    /// Code selecting a caller-supplied channel order
    pub const CUSTOM_ORDER_CODE: &str = "Custom order";
    /// Code selecting no reordering, only partitioning by explicit rows/columns
    pub const UNSORTED_CODE: &str = "None";
    /// Marker for an empty electrode position in configuration files
    pub const EMPTY_CHANNEL_MARKER: i64 = -1;
    pub const TRIGNO_GALILEO_CODE: &str = "Trigno Galileo Sensor";
    pub const COLUMN_LABEL_PREFIX: &str = "col";
}

/// Cross-correlation constants
pub mod xcorr {
    /// Above this many multiply-adds the full correlation is computed through the FFT
    pub const DIRECT_XCORR_MAX_OPS: usize = 1 << 20;
}

/// Conduction velocity estimation constants
pub mod conduction {
    /// Physiological bounds that limit the initial delay search
    pub const MIN_CV_M_S: f64 = 1.0;
    pub const MAX_CV_M_S: f64 = 10.0;
    pub const MAX_ITERATIONS: usize = 30;
    /// Newton iterations stop once the delay moves less than this, in samples
    pub const DELAY_TOLERANCE_SAMPLES: f64 = 5e-5;
    pub const MAX_NEWTON_STEP_SAMPLES: f64 = 0.5;
    pub const MILLIMETRES_PER_METRE: f64 = 1000.0;
}

/// Configuration file discovery
pub mod paths {
    pub const CONFIG_FILE_NAME: &str = "hdemg.toml";
    pub const CONFIG_DIR_NAME: &str = "config";
    pub const ENV_PREFIX: &str = "HDEMG";
    pub const ENV_SEPARATOR: &str = "__";
}
