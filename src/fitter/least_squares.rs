use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};

use super::fit_settings::ConvergenceCriteria;
use crate::error::{GaussError, Result};

/// Function evaluations allowed per free parameter (plus one).
pub const PATIENCE: usize = 100;

#[derive(Debug, Clone)]
pub struct Solution {
    pub params: DVector<f64>,
    pub residuals: DVector<f64>,
    pub sum_of_squares: f64,
    /// `(JᵀJ)⁻¹` at the solution.
    pub covariance: DMatrix<f64>,
    pub evaluations: usize,
}

fn evaluate<P>(problem: &P) -> Result<(DVector<f64>, DMatrix<f64>)>
where
    P: LeastSquaresProblem<
            f64,
            Dyn,
            Dyn,
            ResidualStorage = Owned<f64, Dyn>,
            JacobianStorage = Owned<f64, Dyn, Dyn>,
            ParameterStorage = Owned<f64, Dyn>,
        >,
{
    let residuals = problem
        .residuals()
        .ok_or_else(|| GaussError::ConvergenceFailure("residuals could not be evaluated".to_owned()))?;
    let jacobian = problem
        .jacobian()
        .ok_or_else(|| GaussError::ConvergenceFailure("derivatives could not be evaluated".to_owned()))?;
    if residuals.iter().chain(jacobian.iter()).any(|v| !v.is_finite()) {
        return Err(GaussError::ConvergenceFailure(
            "residuals or derivatives are not finite".to_owned(),
        ));
    }
    Ok((residuals, jacobian))
}

fn covariance(jacobian: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let jtj = jacobian.transpose() * jacobian;
    match jtj.clone().cholesky() {
        Some(cholesky) => Ok(cholesky.inverse()),
        None => jtj.try_inverse().ok_or_else(|| {
            GaussError::SingularSystem("covariance of the fitted parameters".to_owned())
        }),
    }
}

/// Minimizes the squared residuals of `problem` from its current parameters.
pub fn minimize<P>(problem: P, criteria: &ConvergenceCriteria) -> Result<Solution>
where
    P: LeastSquaresProblem<
            f64,
            Dyn,
            Dyn,
            ResidualStorage = Owned<f64, Dyn>,
            JacobianStorage = Owned<f64, Dyn, Dyn>,
            ParameterStorage = Owned<f64, Dyn>,
        >,
{
    minimize_with_patience(problem, criteria, PATIENCE)
}

/// As [`minimize`], giving up after `patience * (n + 1)` evaluations.
pub fn minimize_with_patience<P>(problem: P, criteria: &ConvergenceCriteria, patience: usize) -> Result<Solution>
where
    P: LeastSquaresProblem<
            f64,
            Dyn,
            Dyn,
            ResidualStorage = Owned<f64, Dyn>,
            JacobianStorage = Owned<f64, Dyn, Dyn>,
            ParameterStorage = Owned<f64, Dyn>,
        >,
{
    let nparams = problem.params().len();
    let (residuals, _) = evaluate(&problem).map_err(|e| {
        GaussError::ConvergenceFailure(format!("at the starting point: {e}"))
    })?;
    if residuals.len() < nparams {
        return Err(GaussError::InvalidInput(format!(
            "{} residuals cannot determine {nparams} parameters",
            residuals.len()
        )));
    }

    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(criteria.ftol)
        .with_xtol(criteria.xtol)
        .with_gtol(0.0)
        .with_patience(patience.max(1))
        .minimize(problem);

    match report.termination {
        TerminationReason::LostPatience => {
            return Err(GaussError::ConvergenceFailure(format!(
                "no convergence after {} function evaluations",
                report.number_of_evaluations
            )));
        }
        ref reason if !reason.was_successful() => {
            return Err(GaussError::ConvergenceFailure(format!(
                "{reason:?} after {} function evaluations",
                report.number_of_evaluations
            )));
        }
        _ => {}
    }

    let (residuals, jacobian) = evaluate(&problem)?;
    let covariance = covariance(&jacobian)?;
    let sum_of_squares = residuals.norm_squared();

    log::debug!(
        "Levenberg-Marquardt finished after {} evaluations: {:?}, chi2 sum {sum_of_squares}",
        report.number_of_evaluations,
        report.termination
    );

    Ok(Solution {
        params: problem.params(),
        residuals,
        sum_of_squares,
        covariance,
        evaluations: report.number_of_evaluations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y = a exp(-b t) sampled without noise.
    struct Decay {
        t: Vec<f64>,
        y: Vec<f64>,
        p: DVector<f64>,
    }

    impl Decay {
        fn new(a: f64, b: f64, start: [f64; 2]) -> Self {
            let t: Vec<f64> = (0..30).map(|i| f64::from(i) * 0.2).collect();
            let y = t.iter().map(|t| a * (-b * t).exp()).collect();
            Self {
                t,
                y,
                p: DVector::from_row_slice(&start),
            }
        }
    }

    impl LeastSquaresProblem<f64, Dyn, Dyn> for Decay {
        type ResidualStorage = Owned<f64, Dyn>;
        type JacobianStorage = Owned<f64, Dyn, Dyn>;
        type ParameterStorage = Owned<f64, Dyn>;

        fn set_params(&mut self, p: &DVector<f64>) {
            self.p.copy_from(p);
        }

        fn params(&self) -> DVector<f64> {
            self.p.clone()
        }

        fn residuals(&self) -> Option<DVector<f64>> {
            let p = &self.p;
            Some(DVector::from_iterator(
                self.t.len(),
                self.t
                    .iter()
                    .zip(&self.y)
                    .map(|(t, y)| y - p[0] * (-p[1] * t).exp()),
            ))
        }

        fn jacobian(&self) -> Option<DMatrix<f64>> {
            let p = &self.p;
            Some(DMatrix::from_fn(self.t.len(), 2, |i, j| {
                let e = (-p[1] * self.t[i]).exp();
                if j == 0 { -e } else { p[0] * self.t[i] * e }
            }))
        }
    }

    /// y = p t through noisy points; the derivative can be poisoned away from the start.
    struct Line {
        p: DVector<f64>,
        start: f64,
        nan_derivative: NanDerivative,
    }

    #[derive(Clone, Copy, PartialEq)]
    enum NanDerivative {
        Never,
        Always,
        AfterFirstStep,
    }

    const LINE_Y: [f64; 4] = [1.1, 1.9, 3.2, 3.9];

    impl Line {
        fn new(nan_derivative: NanDerivative) -> Self {
            Self {
                p: DVector::from_element(1, 0.0),
                start: 0.0,
                nan_derivative,
            }
        }
    }

    impl LeastSquaresProblem<f64, Dyn, Dyn> for Line {
        type ResidualStorage = Owned<f64, Dyn>;
        type JacobianStorage = Owned<f64, Dyn, Dyn>;
        type ParameterStorage = Owned<f64, Dyn>;

        fn set_params(&mut self, p: &DVector<f64>) {
            self.p.copy_from(p);
        }

        fn params(&self) -> DVector<f64> {
            self.p.clone()
        }

        fn residuals(&self) -> Option<DVector<f64>> {
            Some(DVector::from_iterator(
                LINE_Y.len(),
                LINE_Y.iter().enumerate().map(|(i, y)| y - self.p[0] * (i as f64 + 1.0)),
            ))
        }

        fn jacobian(&self) -> Option<DMatrix<f64>> {
            let poisoned = match self.nan_derivative {
                NanDerivative::Never => false,
                NanDerivative::Always => true,
                NanDerivative::AfterFirstStep => self.p[0] != self.start,
            };
            Some(DMatrix::from_fn(LINE_Y.len(), 1, |i, _| {
                if poisoned { f64::NAN } else { -(i as f64 + 1.0) }
            }))
        }
    }

    fn criteria() -> ConvergenceCriteria {
        ConvergenceCriteria {
            ftol: 1e-10,
            xtol: 1e-10,
        }
    }

    #[test]
    fn test_recovers_decay_parameters() {
        let solution = minimize(Decay::new(5.0, 0.7, [1.0, 0.1]), &criteria()).unwrap();
        assert!((solution.params[0] - 5.0).abs() < 1e-6);
        assert!((solution.params[1] - 0.7).abs() < 1e-6);
        assert!(solution.sum_of_squares < 1e-10);
        assert_eq!(solution.covariance.nrows(), 2);
        assert!(solution.evaluations <= PATIENCE * 3);
    }

    #[test]
    fn test_covariance_of_linear_problem() {
        let solution = minimize(Line::new(NanDerivative::Never), &criteria()).unwrap();
        // slope Σty / Σt² = 30.1 / 30, JᵀJ = Σt² = 30
        assert!((solution.params[0] - 30.1 / 30.0).abs() < 1e-8);
        assert!((solution.covariance[(0, 0)] - 1.0 / 30.0).abs() < 1e-12);
        assert!((solution.sum_of_squares - (30.27 - 30.1 * 30.1 / 30.0)).abs() < 1e-8);
    }

    #[test]
    fn test_too_few_residuals() {
        let problem = Decay {
            t: vec![0.0],
            y: vec![1.0],
            p: DVector::from_row_slice(&[1.0, 1.0]),
        };
        assert!(matches!(
            minimize(problem, &criteria()),
            Err(GaussError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_evaluation_budget() {
        let result = minimize_with_patience(Decay::new(5.0, 0.7, [1.0, 3.0]), &criteria(), 1);
        assert!(matches!(result, Err(GaussError::ConvergenceFailure(_))));
    }

    #[test]
    fn test_non_finite_derivatives_at_start() {
        let result = minimize(Line::new(NanDerivative::Always), &criteria());
        assert!(matches!(result, Err(GaussError::ConvergenceFailure(_))));
    }

    #[test]
    fn test_non_finite_derivatives_during_fit() {
        let result = minimize(Line::new(NanDerivative::AfterFirstStep), &criteria());
        assert!(matches!(result, Err(GaussError::ConvergenceFailure(_))));
    }
}
