use nalgebra::DVector;

use super::fit_settings::PeakWidthMode;
use super::gaussian::GaussianPeak;
use crate::equations::{EnergyEquation, WidthEquation};
use crate::error::Result;
use crate::peaks::{Peak, PeakList};
use crate::spectrum::{ChannelRange, Spectrum};

/// Peaks closer than this to 511 keV get extra width freedom (annihilation line).
const PEAK_511_KEV_THRESHOLD: f64 = 0.6;

fn is_near_511_kev(energy: f64) -> bool {
    (energy - 511.0).abs() <= PEAK_511_KEV_THRESHOLD
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PeakInfo {
    pub height: f64,
    pub centroid: f64,
    /// Width added to the average width; only non-zero for the 511 keV peak.
    pub add_width_511: f64,
    pub fixed_centroid: bool,
}

impl PeakInfo {
    /// Pulls a surviving peak back into a sane starting point for the next cycle.
    pub fn constrain(&mut self, region: &ChannelRange, initial_width: f64) {
        if self.height < 10.0 && self.height != 0.0 {
            self.height = 10.0;
        }
        if self.add_width_511 < 0.0 {
            self.add_width_511 = initial_width;
        }
        let low = f64::from(region.first + 2);
        let high = f64::from(region.last - 2);
        if self.centroid < low {
            self.centroid = low;
        }
        if self.centroid > high {
            self.centroid = high;
        }
    }
}

/// Current state of a region fit: background, average width and the peaks.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FitInfo {
    pub region: ChannelRange,
    pub intercept: f64,
    pub slope: f64,
    pub avg_width: f64,
    pub initial_width: f64,
    pub contains_511: bool,
    pub peaks: Vec<PeakInfo>,
}

impl FitInfo {
    /// Starting values for a fit of `region`. Peaks whose rounded channel is outside
    /// the region are ignored; with no usable peaks one is seeded at the highest count.
    pub fn new(
        spectrum: &Spectrum,
        region: &ChannelRange,
        ex: &EnergyEquation,
        wx: &WidthEquation,
        peaks: &PeakList,
    ) -> Result<Self> {
        spectrum.check_range(region)?;
        let count = |channel: i32| f64::from(spectrum.count_at(channel).unwrap_or(0));

        let last_count = count(region.last);
        let before_last = spectrum
            .count_at(region.last - 1)
            .map(f64::from)
            .unwrap_or(last_count);
        let intercept = (before_last + last_count) / 2.0;

        let xmid = (region.first + region.last + 1) / 2;
        let avg_width = wx.width_or(f64::from(xmid), 1.0);

        let mut info = Self {
            region: *region,
            intercept,
            slope: 0.0,
            avg_width,
            initial_width: avg_width,
            contains_511: false,
            peaks: Vec::new(),
        };

        for peak in peaks.iter().filter(|p| p.channel_valid) {
            let rounded = peak.channel.round() as i32;
            if rounded < region.first || rounded > region.last {
                continue;
            }
            let add_width_511 = info.claim_511(ex.energy(peak.channel));
            info.peaks.push(PeakInfo {
                height: count(rounded) - intercept,
                centroid: peak.channel,
                add_width_511,
                fixed_centroid: peak.fixed_centroid,
            });
        }

        if info.peaks.is_empty() {
            let mut seed = region.first;
            let mut max_counts = 0.0;
            for channel in region.channels() {
                if count(channel) > max_counts {
                    max_counts = count(channel);
                    seed = channel;
                }
            }
            if seed < region.first + 2 || seed > region.last - 2 {
                seed = (region.first + region.last) / 2;
                max_counts = count(seed);
            }
            log::debug!("No usable peaks in {region}, seeding one at channel {seed}");
            let add_width_511 = info.claim_511(ex.energy(f64::from(seed)));
            info.peaks.push(PeakInfo {
                height: max_counts - intercept,
                centroid: f64::from(seed),
                add_width_511,
                fixed_centroid: false,
            });
        }

        Ok(info)
    }

    // only the first peak near 511 keV gets the extra width
    fn claim_511(&mut self, energy: f64) -> f64 {
        if !self.contains_511 && is_near_511_kev(energy) {
            self.contains_511 = true;
            self.avg_width
        } else {
            0.0
        }
    }

    pub fn fwhm(&self, peak: &PeakInfo) -> f64 {
        (self.avg_width + peak.add_width_511).abs()
    }

    pub fn gaussian(&self, peak: &PeakInfo) -> GaussianPeak {
        GaussianPeak::new(peak.height, peak.centroid, self.fwhm(peak))
    }

    pub fn background_at(&self, channel: f64) -> f64 {
        self.intercept + self.slope * (channel - f64::from(self.region.first))
    }

    pub fn model_at(&self, channel: f64) -> f64 {
        self.background_at(channel)
            + self
                .peaks
                .iter()
                .map(|p| self.gaussian(p).value(channel))
                .sum::<f64>()
    }

    pub fn add_peak(&mut self, centroid: f64, energy: f64, height: f64) {
        let add_width_511 = self.claim_511(energy);
        self.peaks.push(PeakInfo {
            height,
            centroid,
            add_width_511,
            fixed_centroid: false,
        });
    }

    pub fn delete_peak(&mut self, index: usize) -> PeakInfo {
        let removed = self.peaks.remove(index);
        if removed.add_width_511 != 0.0 {
            self.contains_511 = false;
        }
        removed
    }

    /// The current peaks as channel peaks.
    pub fn peak_list(&self, capacity: usize) -> Result<PeakList> {
        PeakList::from_peaks(
            capacity.max(self.peaks.len()),
            self.peaks
                .iter()
                .map(|p| Peak::at_channel(p.centroid, p.fixed_centroid)),
        )
    }
}

/// Positions of one peak's free parameters in the parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakIndices {
    pub height: usize,
    pub centroid: Option<usize>,
    pub add_width: Option<usize>,
}

/// Which parameters of a [`FitInfo`] the optimizer may change. Intercept and slope
/// always vary and take positions 0 and 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitVary {
    pub avg_width: Option<usize>,
    pub peaks: Vec<PeakIndices>,
    count: usize,
}

impl FitVary {
    pub const INTERCEPT: usize = 0;
    pub const SLOPE: usize = 1;

    pub fn new(mode: PeakWidthMode, info: &FitInfo) -> Self {
        let mut count = 2;
        let mut next = || {
            count += 1;
            count - 1
        };

        let any_free = info.peaks.iter().any(|p| !p.fixed_centroid);
        let avg_width = (mode == PeakWidthMode::Varies && any_free).then(&mut next);

        let several = info.peaks.len() > 1;
        let peaks = info
            .peaks
            .iter()
            .map(|p| PeakIndices {
                height: next(),
                centroid: (!p.fixed_centroid).then(&mut next),
                add_width: (p.add_width_511 != 0.0 && (several || mode == PeakWidthMode::Fixed))
                    .then(&mut next),
            })
            .collect();

        Self {
            avg_width,
            peaks,
            count,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn parameters(&self, info: &FitInfo) -> DVector<f64> {
        let mut x = DVector::zeros(self.count);
        x[Self::INTERCEPT] = info.intercept;
        x[Self::SLOPE] = info.slope;
        if let Some(i) = self.avg_width {
            x[i] = info.avg_width;
        }
        for (indices, peak) in self.peaks.iter().zip(&info.peaks) {
            x[indices.height] = peak.height;
            if let Some(i) = indices.centroid {
                x[i] = peak.centroid;
            }
            if let Some(i) = indices.add_width {
                x[i] = peak.add_width_511;
            }
        }
        x
    }

    pub fn apply(&self, x: &DVector<f64>, info: &mut FitInfo) {
        info.intercept = x[Self::INTERCEPT];
        info.slope = x[Self::SLOPE];
        if let Some(i) = self.avg_width {
            info.avg_width = x[i];
        }
        for (indices, peak) in self.peaks.iter().zip(info.peaks.iter_mut()) {
            peak.height = x[indices.height];
            if let Some(i) = indices.centroid {
                peak.centroid = x[i];
            }
            if let Some(i) = indices.add_width {
                peak.add_width_511 = x[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_spectrum() -> Spectrum {
        let mut counts = vec![50; 200];
        counts[100] = 450;
        counts[101] = 300;
        Spectrum::new(0, counts).unwrap()
    }

    #[test]
    fn test_initial_values() {
        let spectrum = flat_spectrum();
        let mut peaks = PeakList::new(4);
        peaks.add_channel_peak(100.3, false).unwrap();
        peaks.add_channel_peak(150.0, false).unwrap();
        peaks.add_energy_peak(10.0, 0.0).unwrap();

        let info = FitInfo::new(
            &spectrum,
            &ChannelRange::new(90, 110),
            &EnergyEquation::linear(0.0, 1.0),
            &WidthEquation::linear(2.0, 0.01),
            &peaks,
        )
        .unwrap();

        assert!((info.intercept - 50.0).abs() < 1e-12);
        // width evaluated at (90 + 110 + 1) / 2 = 100
        assert!((info.avg_width - 3.0).abs() < 1e-12);
        assert_eq!(info.peaks.len(), 1);
        assert!((info.peaks[0].height - 400.0).abs() < 1e-12);
        assert!(!info.contains_511);
    }

    #[test]
    fn test_seeds_peak_at_max_counts() {
        let spectrum = flat_spectrum();
        let info = FitInfo::new(
            &spectrum,
            &ChannelRange::new(90, 110),
            &EnergyEquation::linear(0.0, 1.0),
            &WidthEquation::linear(3.0, 0.0),
            &PeakList::new(4),
        )
        .unwrap();
        assert_eq!(info.peaks.len(), 1);
        assert!((info.peaks[0].centroid - 100.0).abs() < 1e-12);
        assert!((info.peaks[0].height - 400.0).abs() < 1e-12);

        // the maximum sits at the edge of this region, so the midpoint is used
        let info = FitInfo::new(
            &spectrum,
            &ChannelRange::new(60, 101),
            &EnergyEquation::linear(0.0, 1.0),
            &WidthEquation::linear(3.0, 0.0),
            &PeakList::new(4),
        )
        .unwrap();
        assert!((info.peaks[0].centroid - 80.0).abs() < 1e-12);
    }

    #[test]
    fn test_511_peak_gets_extra_width_once() {
        let spectrum = flat_spectrum();
        let mut peaks = PeakList::new(4);
        peaks.add_channel_peak(100.0, false).unwrap();
        peaks.add_channel_peak(101.0, false).unwrap();
        // 5.11 keV per channel puts channel 100 at 511 keV
        let ex = EnergyEquation::linear(0.0, 5.11);
        let info = FitInfo::new(
            &spectrum,
            &ChannelRange::new(90, 110),
            &ex,
            &WidthEquation::linear(3.0, 0.0),
            &peaks,
        )
        .unwrap();
        assert!(info.contains_511);
        assert!((info.peaks[0].add_width_511 - 3.0).abs() < 1e-12);
        assert!((info.peaks[1].add_width_511).abs() < 1e-12);
        assert!((info.fwhm(&info.peaks[0]) - 6.0).abs() < 1e-12);

        let vary = FitVary::new(PeakWidthMode::Varies, &info);
        // intercept, slope, width, (h, c, add), (h, c)
        assert_eq!(vary.count(), 8);
        assert_eq!(vary.peaks[0].add_width, Some(5));

        let mut info = info;
        info.delete_peak(1);
        assert!(info.contains_511);
        let removed = info.delete_peak(0);
        assert!((removed.centroid - 100.0).abs() < 1e-12);
        assert!(!info.contains_511);
    }

    #[test]
    fn test_vary_layout() {
        let info = FitInfo {
            region: ChannelRange::new(0, 40),
            intercept: 5.0,
            slope: 0.1,
            avg_width: 2.5,
            initial_width: 2.5,
            contains_511: false,
            peaks: vec![
                PeakInfo {
                    height: 100.0,
                    centroid: 10.0,
                    add_width_511: 0.0,
                    fixed_centroid: true,
                },
                PeakInfo {
                    height: 50.0,
                    centroid: 20.0,
                    add_width_511: 0.0,
                    fixed_centroid: false,
                },
            ],
        };

        let vary = FitVary::new(PeakWidthMode::Varies, &info);
        assert_eq!(vary.avg_width, Some(2));
        assert_eq!(vary.peaks[0].centroid, None);
        assert_eq!(vary.peaks[1].centroid, Some(5));
        assert_eq!(vary.count(), 6);

        let x = vary.parameters(&info);
        let mut copy = info.clone();
        copy.peaks[1].centroid = 0.0;
        vary.apply(&x, &mut copy);
        assert_eq!(copy, info);

        let fixed = FitVary::new(PeakWidthMode::Fixed, &info);
        assert_eq!(fixed.avg_width, None);
        assert_eq!(fixed.count(), 5);
    }

    #[test]
    fn test_constrain() {
        let region = ChannelRange::new(100, 130);
        let mut peak = PeakInfo {
            height: 3.0,
            centroid: 99.0,
            add_width_511: -1.0,
            fixed_centroid: false,
        };
        peak.constrain(&region, 2.0);
        assert!((peak.height - 10.0).abs() < 1e-12);
        assert!((peak.centroid - 102.0).abs() < 1e-12);
        assert!((peak.add_width_511 - 2.0).abs() < 1e-12);

        peak.centroid = 140.0;
        peak.height = 0.0;
        peak.constrain(&region, 2.0);
        assert!((peak.centroid - 128.0).abs() < 1e-12);
        assert!(peak.height.abs() < 1e-12);
    }
}
