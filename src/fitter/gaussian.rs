/// `sqrt(4 ln 2)`: converts a distance in FWHM units into the Gaussian exponent.
pub const MU_FACTOR: f64 = 1.665_109_222_315_395_4;

/// `sqrt(pi / (4 ln 2))`: area of a unit height peak per unit FWHM.
pub const AREA_FACTOR: f64 = 1.064_467_019_431_226_2;

/// Exponent argument beyond which the peak is treated as flat zero.
const MU_LIMIT: f64 = 10.0;

/// Gaussian peak described by height, centroid and full width at half maximum.
#[derive(Default, Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GaussianPeak {
    pub height: f64,
    pub centroid: f64,
    pub fwhm: f64,
}

/// Partial derivatives of a peak's value with respect to its parameters.
#[derive(Default, Clone, Copy, Debug, PartialEq)]
pub struct PeakGradient {
    pub height: f64,
    pub centroid: f64,
    pub fwhm: f64,
}

impl GaussianPeak {
    pub fn new(height: f64, centroid: f64, fwhm: f64) -> Self {
        Self {
            height,
            centroid,
            fwhm,
        }
    }

    fn mu(&self, x: f64) -> f64 {
        if self.fwhm == 0.0 {
            0.0
        } else {
            (x - self.centroid) * MU_FACTOR / self.fwhm
        }
    }

    pub fn value(&self, x: f64) -> f64 {
        let mu = self.mu(x).clamp(-MU_LIMIT, MU_LIMIT);
        self.height * (-mu * mu).exp()
    }

    pub fn gradient(&self, x: f64) -> PeakGradient {
        let mu = self.mu(x);
        let shape = (-mu.clamp(-MU_LIMIT, MU_LIMIT).powi(2)).exp();
        let g = self.height * shape;
        if self.fwhm == 0.0 {
            return PeakGradient {
                height: shape,
                ..PeakGradient::default()
            };
        }
        PeakGradient {
            height: shape,
            centroid: 2.0 * g * mu * MU_FACTOR / self.fwhm,
            fwhm: 2.0 * g * mu * mu / self.fwhm,
        }
    }

    pub fn area(&self) -> f64 {
        self.fwhm * self.height * AREA_FACTOR
    }

    pub fn sigma(&self) -> f64 {
        self.fwhm / (2.0 * (2.0 * f64::ln(2.0)).sqrt())
    }
}
