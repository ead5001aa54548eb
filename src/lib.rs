//! Signal/background event selection.
//!
//! Event tables are loaded ([`data`]), augmented with derived features
//! ([`features`]), scored by pretrained classifiers ([`classifier`]) and
//! scanned over a score threshold for the best `S/sqrt(S+B)` ([`scan`]).
//! The winning selection is written back out by [`export`]; [`pipeline`]
//! chains the steps as configured by [`config`].

pub mod classifier;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod expr;
pub mod features;
pub mod pipeline;
pub mod scan;

pub use error::{PipelineError, Result};
