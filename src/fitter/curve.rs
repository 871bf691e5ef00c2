use super::fit_info::FitInfo;
use crate::error::{GaussError, Result, zeroed};
use crate::spectrum::ChannelRange;

/// Fitted curve of a region sampled `nplots_per_chan` times per channel.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Curve {
    pub chanrange: ChannelRange,
    pub nplots_per_chan: usize,
    pub npoints: usize,
    /// Sample positions relative to the first channel of the region.
    pub x_offsets: Vec<f64>,
    pub fit: Vec<f64>,
    pub background: Vec<f64>,
    /// One array per peak, background included.
    pub peaks: Vec<Vec<f64>>,
    /// Weighted residual `(count - fit) / sigma` for every channel of the region.
    pub residuals: Vec<f64>,
}

impl Curve {
    pub fn new(info: &FitInfo, counts: &[u32], sigmas: &[f64], nplots_per_chan: usize) -> Result<Self> {
        if nplots_per_chan == 0 {
            return Err(GaussError::InvalidInput(
                "at least one plot point per channel is needed".to_owned(),
            ));
        }
        let region = info.region;
        let nchannels = region.width() as usize;
        if counts.len() != nchannels || sigmas.len() != nchannels {
            return Err(GaussError::InvalidInput(format!(
                "region {region} has {nchannels} channels but {} counts and {} sigmas were given",
                counts.len(),
                sigmas.len()
            )));
        }

        let npoints = (nchannels - 1) * nplots_per_chan + 1;
        let step = 1.0 / nplots_per_chan as f64;
        let origin = f64::from(region.first);

        let mut x_offsets = zeroed(npoints)?;
        let mut fit = zeroed(npoints)?;
        let mut background = zeroed(npoints)?;
        let mut peaks = Vec::new();
        peaks.try_reserve_exact(info.peaks.len())?;
        for _ in &info.peaks {
            peaks.push(zeroed(npoints)?);
        }

        for j in 0..npoints {
            let offset = j as f64 * step;
            let x = origin + offset;
            let bg = info.background_at(x);
            x_offsets[j] = offset;
            background[j] = bg;
            fit[j] = bg;
            for (component, peak) in peaks.iter_mut().zip(&info.peaks) {
                let value = info.gaussian(peak).value(x);
                component[j] = bg + value;
                fit[j] += value;
            }
        }

        let mut residuals = zeroed(nchannels)?;
        for (i, channel) in region.channels().enumerate() {
            residuals[i] = (f64::from(counts[i]) - info.model_at(f64::from(channel))) / sigmas[i];
        }

        Ok(Self {
            chanrange: region,
            nplots_per_chan,
            npoints,
            x_offsets,
            fit,
            background,
            peaks,
            residuals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::fit_info::PeakInfo;

    fn info() -> FitInfo {
        FitInfo {
            region: ChannelRange::new(10, 20),
            intercept: 10.0,
            slope: 1.0,
            avg_width: 2.0,
            initial_width: 2.0,
            contains_511: false,
            peaks: vec![
                PeakInfo {
                    height: 100.0,
                    centroid: 13.0,
                    add_width_511: 0.0,
                    fixed_centroid: false,
                },
                PeakInfo {
                    height: 40.0,
                    centroid: 17.5,
                    add_width_511: 0.0,
                    fixed_centroid: false,
                },
            ],
        }
    }

    #[test]
    fn test_curve_layout() {
        let info = info();
        let counts: Vec<u32> = (10..=20)
            .map(|ch| info.model_at(f64::from(ch)).round() as u32)
            .collect();
        let sigmas = vec![2.0; 11];
        let curve = Curve::new(&info, &counts, &sigmas, 4).unwrap();

        assert_eq!(curve.npoints, 41);
        assert_eq!(curve.x_offsets.len(), 41);
        assert_eq!(curve.peaks.len(), 2);
        assert_eq!(curve.residuals.len(), 11);
        assert!((curve.x_offsets[4] - 1.0).abs() < 1e-12);
        assert!((curve.x_offsets[40] - 10.0).abs() < 1e-12);

        // offset 3 is channel 13, the top of the first peak
        let j = 12;
        assert!((curve.background[j] - 13.0).abs() < 1e-12);
        assert!((curve.peaks[0][j] - 113.0).abs() < 1e-9);
        let sum = curve.peaks[0][j] + curve.peaks[1][j] - curve.background[j];
        assert!((curve.fit[j] - sum).abs() < 1e-9);

        for r in &curve.residuals {
            assert!(r.abs() <= 0.25 + 1e-12);
        }
    }

    #[test]
    fn test_single_plot_per_channel() {
        let info = info();
        let counts = vec![0; 11];
        let sigmas = vec![1.0; 11];
        let curve = Curve::new(&info, &counts, &sigmas, 1).unwrap();
        assert_eq!(curve.npoints, 11);
        assert!((curve.residuals[0] + info.model_at(10.0)).abs() < 1e-9);
        assert!(matches!(
            Curve::new(&info, &counts, &sigmas, 0),
            Err(GaussError::InvalidInput(_))
        ));
    }
}
