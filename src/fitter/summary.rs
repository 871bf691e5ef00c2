use nalgebra::DMatrix;

use super::common::Value;
use super::fit_info::{FitInfo, FitVary};
use super::gaussian::AREA_FACTOR;
use crate::equations::EnergyEquation;

/// Fitted parameters of one peak with their uncertainties and alarms.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PeakSummary {
    pub channel: Value,
    pub height: Value,
    /// Full width at half maximum in channels.
    pub width: Value,
    pub area: Value,
    pub energy: Value,
    pub fixed_centroid: bool,
    pub negative_height: bool,
    pub outside_region: bool,
    pub pos_neg_pair: bool,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    /// Ordered by channel.
    pub peaks: Vec<PeakSummary>,
    /// Net region counts over the summed fitted peak area.
    pub ratio: f64,
}

fn variance(covariance: &DMatrix<f64>, i: Option<usize>) -> f64 {
    covariance_of(covariance, i, i)
}

fn covariance_of(covariance: &DMatrix<f64>, i: Option<usize>, j: Option<usize>) -> f64 {
    match (i, j) {
        (Some(i), Some(j)) => covariance[(i, j)],
        _ => 0.0,
    }
}

impl Summary {
    pub fn new(
        info: &FitInfo,
        vary: &FitVary,
        covariance: &DMatrix<f64>,
        ex: &EnergyEquation,
        counts: &[u32],
    ) -> Self {
        let mut peaks: Vec<PeakSummary> = info
            .peaks
            .iter()
            .zip(&vary.peaks)
            .map(|(peak, indices)| {
                let fwhm = info.fwhm(peak);
                let h = peak.height;

                let sigc = variance(covariance, indices.centroid).max(0.0).sqrt();
                let var_h = variance(covariance, Some(indices.height));

                let t1 = variance(covariance, indices.add_width)
                    + variance(covariance, vary.avg_width)
                    + 2.0 * covariance_of(covariance, vary.avg_width, indices.add_width);
                let t3 = covariance_of(covariance, Some(indices.height), indices.add_width)
                    + covariance_of(covariance, vary.avg_width, Some(indices.height));
                let area_var = AREA_FACTOR
                    * AREA_FACTOR
                    * (h * h * t1 + fwhm * fwhm * var_h + 2.0 * fwhm * h * t3);

                PeakSummary {
                    channel: Value::new(peak.centroid, sigc),
                    height: Value::new(h, var_h.max(0.0).sqrt()),
                    width: Value::new(fwhm, t1.max(0.0).sqrt()),
                    area: Value::new(info.gaussian(peak).area(), area_var.max(0.0).sqrt()),
                    energy: Value::new(
                        ex.energy(peak.centroid),
                        (ex.slope_at(peak.centroid) * sigc).abs(),
                    ),
                    fixed_centroid: peak.fixed_centroid,
                    negative_height: h < 0.0,
                    outside_region: !info.region.contains(peak.centroid),
                    pos_neg_pair: false,
                }
            })
            .collect();

        let pair_distance = info.avg_width.abs();
        for j in 0..peaks.len() {
            for k in j + 1..peaks.len() {
                let (hj, hk) = (peaks[j].height.value, peaks[k].height.value);
                let opposite = (hj > 0.0 && hk < 0.0) || (hj < 0.0 && hk > 0.0);
                if opposite && (peaks[j].channel.value - peaks[k].channel.value).abs() < pair_distance {
                    peaks[j].pos_neg_pair = true;
                    peaks[k].pos_neg_pair = true;
                }
            }
        }

        peaks.sort_by(|a, b| a.channel.value.total_cmp(&b.channel.value));

        for peak in peaks.iter().filter(|p| p.negative_height || p.pos_neg_pair) {
            log::warn!(
                "Suspicious peak at channel {}: negative height {}, pos/neg pair {}",
                peak.channel,
                peak.negative_height,
                peak.pos_neg_pair
            );
        }

        let region = info.region;
        let average_background =
            info.intercept + info.slope * f64::from(region.last - region.first) / 2.0;
        let net: f64 = counts
            .iter()
            .map(|&count| f64::from(count) - average_background)
            .sum();
        let total_area: f64 = peaks.iter().map(|p| p.area.value).sum();
        let ratio = if total_area == 0.0 { 0.0 } else { net / total_area };

        Self { peaks, ratio }
    }

    pub fn npeaks(&self) -> usize {
        self.peaks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::fit_info::PeakInfo;
    use crate::fitter::fit_settings::PeakWidthMode;
    use crate::spectrum::ChannelRange;

    fn info(heights: [f64; 2], centroids: [f64; 2]) -> FitInfo {
        FitInfo {
            region: ChannelRange::new(0, 30),
            intercept: 10.0,
            slope: 0.0,
            avg_width: 3.0,
            initial_width: 3.0,
            contains_511: false,
            peaks: heights
                .iter()
                .zip(centroids)
                .map(|(&height, centroid)| PeakInfo {
                    height,
                    centroid,
                    add_width_511: 0.0,
                    fixed_centroid: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_values_and_uncertainties() {
        let info = info([100.0, 50.0], [20.0, 8.0]);
        let vary = FitVary::new(PeakWidthMode::Varies, &info);
        // 0 intercept, 1 slope, 2 width, 3/4 first peak, 5/6 second peak
        let mut covariance = DMatrix::zeros(7, 7);
        covariance[(2, 2)] = 0.04;
        covariance[(3, 3)] = 25.0;
        covariance[(4, 4)] = 0.01;
        covariance[(2, 3)] = 0.1;
        covariance[(3, 2)] = 0.1;

        let counts = vec![10; 31];
        let summary = Summary::new(
            &info,
            &vary,
            &covariance,
            &EnergyEquation::quadratic(1.0, 2.0, 0.01),
            &counts,
        );

        assert_eq!(summary.npeaks(), 2);
        // sorted by channel
        assert!((summary.peaks[0].channel.value - 8.0).abs() < 1e-12);
        let first = &summary.peaks[1];
        assert!((first.channel.uncertainty - 0.1).abs() < 1e-12);
        assert!((first.height.uncertainty - 5.0).abs() < 1e-12);
        assert!((first.width.uncertainty - 0.2).abs() < 1e-12);
        assert!((first.area.value - 3.0 * 100.0 * AREA_FACTOR).abs() < 1e-9);

        let expected = AREA_FACTOR * (100.0_f64 * 100.0 * 0.04 + 9.0 * 25.0 + 2.0 * 3.0 * 100.0 * 0.1).sqrt();
        assert!((first.area.uncertainty - expected).abs() < 1e-9);

        // dE/dx = 2 + 2 * 0.01 * 20
        assert!((first.energy.value - (1.0 + 40.0 + 4.0)).abs() < 1e-12);
        assert!((first.energy.uncertainty - 2.4 * 0.1).abs() < 1e-12);
        assert!(!first.negative_height && !first.pos_neg_pair && !first.outside_region);

        // counts sit on the background, so nothing is left for the peaks
        assert!(summary.ratio.abs() < 1e-12);
    }

    #[test]
    fn test_alarms() {
        let info = info([100.0, -40.0], [15.0, 16.5]);
        let vary = FitVary::new(PeakWidthMode::Varies, &info);
        let covariance = DMatrix::zeros(vary.count(), vary.count());
        let summary = Summary::new(&info, &vary, &covariance, &EnergyEquation::default(), &[20; 31]);
        assert!(summary.peaks.iter().all(|p| p.pos_neg_pair));
        assert!(summary.peaks[1].negative_height);
        assert!(!summary.peaks[0].negative_height);

        let apart = self::info([100.0, -40.0], [15.0, 19.0]);
        let summary = Summary::new(&apart, &vary, &covariance, &EnergyEquation::default(), &[20; 31]);
        assert!(summary.peaks.iter().all(|p| !p.pos_neg_pair));

        let outside = self::info([100.0, 40.0], [15.0, 31.5]);
        let summary = Summary::new(&outside, &vary, &covariance, &EnergyEquation::default(), &[20; 31]);
        assert!(summary.peaks[1].outside_region);
    }

    #[test]
    fn test_ratio() {
        let info = info([100.0, 0.0], [15.0, 20.0]);
        let vary = FitVary::new(PeakWidthMode::Varies, &info);
        let covariance = DMatrix::zeros(vary.count(), vary.count());
        let mut counts = vec![10; 31];
        counts[15] = 10 + 319;
        let summary = Summary::new(&info, &vary, &covariance, &EnergyEquation::default(), &counts);
        let area = 3.0 * 100.0 * AREA_FACTOR;
        assert!((summary.ratio - 319.0 / area).abs() < 1e-9);
    }
}
