// src/processing/mod.rs
//! MUAP estimation and comparison: derivations, STA, cross-correlation, alignment,
//! conduction velocity

pub mod alignment;
pub mod conduction;
pub mod differential;
pub mod sta;
pub mod xcorr;

pub use alignment::{align_by_xcorr, aligned_length, estimate_lag};
pub use conduction::{estimate_cv, estimate_cv_per_firing, estimate_cv_via_mle, initial_delay, mle_delay, ConductionVelocity};
pub use differential::{derive, diff, double_diff, Derivation};
pub use sta::{sta, sta_for_firings, sta_motor_unit, st_muap, FiringRange, StaWindow};
pub use xcorr::{norm_twod_xcorr, norm_xcorr, xcc_sta, CorrelationMode, NormXcorrOutput, XcorrResult};
