pub mod common;
pub mod curve;
pub mod fit_info;
pub mod fit_settings;
pub mod gaussian;
pub mod least_squares;
pub mod region_fitter;
pub mod summary;

pub use common::{Background, Value};
pub use curve::Curve;
pub use fit_settings::{ConvergenceCriteria, ConvergenceType, FitParms, PeakWidthMode};
pub use region_fitter::{CycleReturn, FitRecord, best_records, fit_region};
pub use summary::{PeakSummary, Summary};
