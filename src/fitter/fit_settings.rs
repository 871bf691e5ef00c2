/// Whether the average peak width is a free parameter of the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
pub enum PeakWidthMode {
    #[default]
    Varies,
    Fixed,
}

/// Convergence criterion family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
pub enum ConvergenceType {
    #[default]
    Larger,
    Smaller,
    LargerInc,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct FitParms {
    /// Maximum number of fit cycles.
    pub ncycle: usize,
    /// Number of best records reported by [`super::best_records`].
    pub nout: usize,
    pub max_npeaks: usize,
    pub pkwd_mode: PeakWidthMode,
    pub cc_type: ConvergenceType,
    /// Weighted residual a channel needs before a peak is added there.
    pub max_resid: f64,
}

impl Default for FitParms {
    fn default() -> Self {
        Self {
            ncycle: 10,
            nout: 1,
            max_npeaks: 10,
            pkwd_mode: PeakWidthMode::Varies,
            cc_type: ConvergenceType::Larger,
            max_resid: 20.0,
        }
    }
}

/// Relative tolerances on the sum of squares (`ftol`) and on the parameters (`xtol`).
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ConvergenceCriteria {
    pub ftol: f64,
    pub xtol: f64,
}

impl ConvergenceCriteria {
    pub fn new(cc_type: ConvergenceType, pkwd_mode: PeakWidthMode) -> Self {
        let (ftol, xtol) = match (cc_type, pkwd_mode) {
            (ConvergenceType::Larger, PeakWidthMode::Varies) => (1.0e-5, 3.0e-5),
            (ConvergenceType::Larger, PeakWidthMode::Fixed) => (1.0e-4, 1.0e-4),
            (ConvergenceType::Smaller, _) => (1.0e-5, 1.0e-5),
            (ConvergenceType::LargerInc, _) => (1.0e-5, 3.0e-5),
        };
        Self { ftol, xtol }
    }
}

impl From<&FitParms> for ConvergenceCriteria {
    fn from(parms: &FitParms) -> Self {
        Self::new(parms.cc_type, parms.pkwd_mode)
    }
}
