#![warn(clippy::all, rust_2018_idioms)]

//! Gamma-ray spectrum analysis: peak search, fit region search and multi-cycle
//! Gaussian fitting of regions, with energy and width calibration.

pub mod calibration;
pub mod config;
pub mod equations;
pub mod error;
pub mod fitter;
pub mod peak_search;
pub mod peaks;
pub mod pruning;
pub mod region_search;
pub mod spectrum;

pub use config::AnalysisConfig;
pub use error::{GaussError, Result};
pub use spectrum::{ChannelRange, Spectrum};
