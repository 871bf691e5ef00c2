use nalgebra::{DMatrix, DVector};

use crate::equations::{EnergyEquation, EnergyMode, WidthEquation, WidthMode};
use crate::error::{GaussError, Result};

/// A measured value (energy or width) at a channel, with its uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationSample {
    pub channel: f64,
    pub value: f64,
    pub sigma: f64,
}

impl CalibrationSample {
    pub fn new(channel: f64, value: f64, sigma: f64) -> Self {
        Self {
            channel,
            value,
            sigma,
        }
    }
}

/// Polynomial coefficients (lowest order first) and reduced chi-squared.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialFit {
    pub coefficients: Vec<f64>,
    pub chi_sq: f64,
}

/// Weighted least-squares polynomial through `(x, y, w)` points, minimizing
/// `Σ((y - p(x)) / w)²`. The normal equations are scaled by their diagonal
/// before inversion to keep high powers of the channel well conditioned.
pub fn polynomial_fit(points: &[(f64, f64, f64)], ncoeffs: usize) -> Result<PolynomialFit> {
    if ncoeffs == 0 {
        return Err(GaussError::InvalidInput("no coefficients to fit".to_owned()));
    }
    if points.len() < ncoeffs {
        return Err(GaussError::InvalidInput(format!(
            "{} points cannot determine {ncoeffs} coefficients",
            points.len()
        )));
    }
    if let Some((x, _, w)) = points.iter().find(|(_, _, w)| !(*w > 0.0)) {
        return Err(GaussError::InvalidInput(format!(
            "uncertainty {w} at channel {x} is not positive"
        )));
    }

    let mut alpha = DMatrix::<f64>::zeros(ncoeffs, ncoeffs);
    let mut beta = DVector::<f64>::zeros(ncoeffs);
    for &(x, y, w) in points {
        let weight = 1.0 / (w * w);
        for i in 0..ncoeffs {
            beta[i] += x.powi(i as i32) * y * weight;
            for j in 0..ncoeffs {
                alpha[(i, j)] += x.powi((i + j) as i32) * weight;
            }
        }
    }

    let diag: Vec<f64> = (0..ncoeffs).map(|i| alpha[(i, i)]).collect();
    if diag.iter().any(|d| !(*d > 0.0)) {
        return Err(GaussError::SingularSystem(
            "calibration normal equations have a zero diagonal".to_owned(),
        ));
    }
    let scaled = DMatrix::from_fn(ncoeffs, ncoeffs, |i, j| {
        alpha[(i, j)] / (diag[i] * diag[j]).sqrt()
    });
    let inverse = scaled.try_inverse().ok_or_else(|| {
        GaussError::SingularSystem("calibration normal equations".to_owned())
    })?;
    let inverse = DMatrix::from_fn(ncoeffs, ncoeffs, |i, j| {
        inverse[(i, j)] / (diag[i] * diag[j]).sqrt()
    });
    let solution = inverse * beta;

    if solution.iter().any(|c| !c.is_finite()) {
        return Err(GaussError::SingularSystem(
            "calibration solution is not finite".to_owned(),
        ));
    }

    let coefficients: Vec<f64> = solution.iter().copied().collect();
    let chi_sq = if points.len() == ncoeffs {
        0.0
    } else {
        let sum: f64 = points
            .iter()
            .map(|&(x, y, w)| {
                let fit: f64 = coefficients
                    .iter()
                    .enumerate()
                    .map(|(i, c)| c * x.powi(i as i32))
                    .sum();
                ((y - fit) / w).powi(2)
            })
            .sum();
        sum / (points.len() - ncoeffs) as f64
    };

    Ok(PolynomialFit {
        coefficients,
        chi_sq,
    })
}

/// Fits an energy equation to (channel, energy, sigma) samples.
pub fn calibrate_energy(
    samples: &[CalibrationSample],
    mode: EnergyMode,
    weighted: bool,
) -> Result<EnergyEquation> {
    let points: Vec<(f64, f64, f64)> = samples
        .iter()
        .map(|s| (s.channel, s.value, if weighted { s.sigma } else { 1.0 }))
        .collect();

    let ncoeffs = match mode {
        EnergyMode::Linear => 2,
        EnergyMode::Quadratic => 3,
    };
    let fit = polynomial_fit(&points, ncoeffs)?;

    let ex = EnergyEquation {
        a: fit.coefficients[0],
        b: fit.coefficients[1],
        c: fit.coefficients.get(2).copied().unwrap_or(0.0),
        chi_sq: fit.chi_sq,
        mode,
    };
    log::info!(
        "Energy calibration ({mode:?}, {} samples): a={}, b={}, c={}, chi2={}",
        samples.len(),
        ex.a,
        ex.b,
        ex.c,
        ex.chi_sq
    );
    Ok(ex)
}

/// Fits a width equation to (channel, width, sigma) samples. In square-root mode the
/// squared width is fitted, so the weight becomes the propagated `2 w σ`.
pub fn calibrate_width(
    samples: &[CalibrationSample],
    mode: WidthMode,
    weighted: bool,
) -> Result<WidthEquation> {
    let points: Vec<(f64, f64, f64)> = samples
        .iter()
        .map(|s| {
            let value = match mode {
                WidthMode::Linear => s.value,
                WidthMode::Sqrt => s.value * s.value,
            };
            let weight = if weighted { s.sigma * s.value * 2.0 } else { 1.0 };
            (s.channel, value, weight)
        })
        .collect();

    let fit = polynomial_fit(&points, 2)?;
    let wx = WidthEquation {
        alpha: fit.coefficients[0],
        beta: fit.coefficients[1],
        chi_sq: fit.chi_sq,
        mode,
    };
    log::info!(
        "Width calibration ({mode:?}, {} samples): alpha={}, beta={}, chi2={}",
        samples.len(),
        wx.alpha,
        wx.beta,
        wx.chi_sq
    );
    Ok(wx)
}
