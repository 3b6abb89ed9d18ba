// src/tracking/mod.rs
//! MU identity matching across recordings and duplicate resolution

pub mod duplicates;
pub mod matcher;

pub use duplicates::{plan_removals, remove_duplicates_between, DuplicateRemoval, DuplicateStrategy};
pub use matcher::{
    compare_muaps, compute_muaps, execute_tasks, filter_best_matches, match_muaps, tracking, tracking_muaps,
    tracking_observed, ComparisonSettings, MatchSink, MatchTable, TrackingMatch, TrackingTask,
};
