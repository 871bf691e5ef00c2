use crate::error::{GaussError, Result};
use crate::peaks::{PeakKind, PeakList};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum EnergyMode {
    Linear,
    #[default]
    Quadratic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum WidthMode {
    #[default]
    Linear,
    Sqrt,
}

/// Channel to energy: `e(x) = a + b x + c x²`, with `c` ignored in linear mode.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EnergyEquation {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub chi_sq: f64,
    pub mode: EnergyMode,
}

impl Default for EnergyEquation {
    fn default() -> Self {
        Self {
            a: 0.0,
            b: 1.0,
            c: 0.0,
            chi_sq: 0.0,
            mode: EnergyMode::Linear,
        }
    }
}

impl EnergyEquation {
    pub fn linear(a: f64, b: f64) -> Self {
        Self {
            a,
            b,
            c: 0.0,
            chi_sq: 0.0,
            mode: EnergyMode::Linear,
        }
    }

    pub fn quadratic(a: f64, b: f64, c: f64) -> Self {
        Self {
            a,
            b,
            c,
            chi_sq: 0.0,
            mode: EnergyMode::Quadratic,
        }
    }

    fn quad_coeff(&self) -> f64 {
        match self.mode {
            EnergyMode::Linear => 0.0,
            EnergyMode::Quadratic => self.c,
        }
    }

    pub fn energy(&self, channel: f64) -> f64 {
        self.a + self.b * channel + self.quad_coeff() * channel * channel
    }

    /// Derivative of energy with respect to channel.
    pub fn slope_at(&self, channel: f64) -> f64 {
        self.b + 2.0 * self.quad_coeff() * channel
    }

    pub fn channel(&self, energy: f64) -> Result<f64> {
        let c = self.quad_coeff();
        if c == 0.0 {
            if self.b == 0.0 {
                return Err(GaussError::DomainError(
                    "energy equation has zero slope".to_owned(),
                ));
            }
            return Ok((energy - self.a) / self.b);
        }

        let discriminant = self.b * self.b - 4.0 * c * (self.a - energy);
        if discriminant < 0.0 {
            return Err(GaussError::DomainError(format!(
                "no channel has energy {energy}"
            )));
        }
        let channel = (-self.b + discriminant.sqrt()) / (2.0 * c);
        Ok(channel.max(0.0))
    }
}

/// Channel to peak width (FWHM in channels): `alpha + beta x`, or its square root.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WidthEquation {
    pub alpha: f64,
    pub beta: f64,
    pub chi_sq: f64,
    pub mode: WidthMode,
}

impl Default for WidthEquation {
    fn default() -> Self {
        Self::linear(3.0, 0.0)
    }
}

impl WidthEquation {
    pub fn linear(alpha: f64, beta: f64) -> Self {
        Self {
            alpha,
            beta,
            chi_sq: 0.0,
            mode: WidthMode::Linear,
        }
    }

    pub fn sqrt(alpha: f64, beta: f64) -> Self {
        Self {
            alpha,
            beta,
            chi_sq: 0.0,
            mode: WidthMode::Sqrt,
        }
    }

    pub fn width(&self, channel: f64) -> Result<f64> {
        let value = self.alpha + self.beta * channel;
        match self.mode {
            WidthMode::Linear => Ok(value),
            WidthMode::Sqrt => {
                if value < 0.0 {
                    Err(GaussError::DomainError(format!(
                        "negative squared width at channel {channel}"
                    )))
                } else {
                    Ok(value.sqrt())
                }
            }
        }
    }

    /// Width at `channel`, or `fallback` when the equation cannot be evaluated.
    pub fn width_or(&self, channel: f64, fallback: f64) -> f64 {
        self.width(channel).unwrap_or(fallback)
    }
}

/// Fills in the derived coordinate of every peak from `ex`. Without an equation the
/// derived coordinate is marked invalid.
pub fn update_peak_list(ex: Option<&EnergyEquation>, peaks: &mut PeakList) {
    for peak in peaks.iter_mut() {
        match (peak.kind, ex) {
            (PeakKind::Channel, Some(ex)) => {
                peak.energy = ex.energy(peak.channel);
                peak.energy_valid = true;
                peak.sige = 0.0;
            }
            (PeakKind::Channel, None) => peak.energy_valid = false,
            (PeakKind::Energy, Some(ex)) => match ex.channel(peak.energy) {
                Ok(channel) => {
                    peak.channel = channel;
                    peak.channel_valid = true;
                }
                Err(e) => {
                    log::debug!("Peak at {} keV has no channel: {e}", peak.energy);
                    peak.channel_valid = false;
                }
            },
            (PeakKind::Energy, None) => peak.channel_valid = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_round_trip() {
        let equations = [
            EnergyEquation::linear(1.5, 0.75),
            EnergyEquation::quadratic(-2.0, 0.5, 1e-5),
            EnergyEquation::quadratic(10.0, 1.2, -2e-6),
        ];
        for ex in &equations {
            for channel in [0.0, 12.5, 100.0, 1024.0, 4000.0] {
                let energy = ex.energy(channel);
                let back = ex.channel(energy).unwrap();
                assert!(
                    (ex.energy(back) - energy).abs() < 1e-6,
                    "round trip failed for {ex:?} at {channel}"
                );
            }
        }
    }

    #[test]
    fn test_linear_mode_ignores_c() {
        let mut ex = EnergyEquation::linear(1.0, 2.0);
        ex.c = 5.0;
        assert!((ex.energy(10.0) - 21.0).abs() < 1e-12);
        assert!((ex.channel(21.0).unwrap() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_energy_inversion_fails() {
        let ex = EnergyEquation::linear(1.0, 0.0);
        assert!(matches!(ex.channel(5.0), Err(GaussError::DomainError(_))));

        // e(x) = x² + 10 never reaches 5 keV
        let ex = EnergyEquation::quadratic(10.0, 0.0, 1.0);
        assert!(ex.channel(5.0).is_err());
    }

    #[test]
    fn test_inversion_clamps_to_zero() {
        let ex = EnergyEquation::quadratic(0.0, 1.0, 0.01);
        assert!((ex.channel(-0.5).unwrap() - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_width_linear_is_exact() {
        let wx = WidthEquation::linear(1.25, 0.001);
        for channel in [0.0, 10.0, 333.0, 4095.0] {
            assert_eq!(wx.width(channel).unwrap(), 1.25 + 0.001 * channel);
        }
    }

    #[test]
    fn test_width_sqrt() {
        let wx = WidthEquation::sqrt(4.0, 0.01);
        assert!((wx.width(500.0).unwrap() - 3.0).abs() < 1e-12);

        let wx = WidthEquation::sqrt(-4.0, 0.01);
        assert!(matches!(wx.width(100.0), Err(GaussError::DomainError(_))));
        assert!((wx.width_or(100.0, 1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_update_peak_list() {
        let mut peaks = PeakList::new(4);
        peaks.add_channel_peak(100.0, false).unwrap();
        peaks.add_energy_peak(250.0, 0.5).unwrap();

        let ex = EnergyEquation::linear(0.0, 2.0);
        update_peak_list(Some(&ex), &mut peaks);
        assert!(peaks.peaks()[0].energy_valid);
        assert!((peaks.peaks()[0].energy - 200.0).abs() < 1e-12);
        assert!(peaks.peaks()[1].channel_valid);
        assert!((peaks.peaks()[1].channel - 125.0).abs() < 1e-12);

        update_peak_list(None, &mut peaks);
        assert!(!peaks.peaks()[0].energy_valid);
        assert!(!peaks.peaks()[1].channel_valid);
        assert!(peaks.peaks()[0].channel_valid);
        assert!(peaks.peaks()[1].energy_valid);
    }
}
