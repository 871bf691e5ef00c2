use std::collections::BTreeSet;

use crate::equations::WidthEquation;
use crate::error::{GaussError, Result, zeroed};
use crate::peaks::{Peak, PeakList};
use crate::spectrum::{ChannelRange, Spectrum};

/// Channels between re-evaluations of the square wave width.
const UPDATE_INTERVAL: i32 = 10;
const MIN_PEAK_WIDTH: f64 = 1.0;
/// Peaks narrower than this are marked at a local maximum of the cross-correlation.
const MAX_PEAK_WIDTH: f64 = 10.0;
const MIN_SQUARE_WAVE: i32 = 3;
const MAX_FIT_WIDTH_ODD: i32 = 1001;
/// Raw peaks this close to either end of the spectrum are not refined.
const REFINE_END_MARGIN: i32 = 10;
const SIDE_BACKGROUND_CHANNELS: i32 = 5;

/// How a raw peak position was refined by a parabola fit to the log of its net counts.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PeakRefinement {
    pub raw_channel: i32,
    /// Channels used for the refinement; `None` when the peak was too close to an end.
    pub refine_region: Option<ChannelRange>,
    pub net_area: f64,
    pub background: f64,
    pub refined_channel: f64,
    pub use_refinement: bool,
}

impl PeakRefinement {
    fn raw(raw_channel: i32) -> Self {
        Self {
            raw_channel,
            refine_region: None,
            net_area: 0.0,
            background: 0.0,
            refined_channel: f64::from(raw_channel),
            use_refinement: false,
        }
    }

    pub fn channel(&self) -> f64 {
        if self.use_refinement {
            self.refined_channel
        } else {
            f64::from(self.raw_channel)
        }
    }

    /// Net area in units of its counting uncertainty.
    pub fn significance(&self) -> f64 {
        let uncertainty = (self.net_area.abs() + 2.0 * self.background.abs()).sqrt();
        if uncertainty < 1e-5 {
            self.net_area
        } else {
            self.net_area / uncertainty
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PeakSearchResults {
    pub peaks: PeakList,
    /// Parallel to `peaks`.
    pub refinements: Vec<PeakRefinement>,
    /// Square wave cross-correlation for every channel of the spectrum.
    pub cross_correlation: Vec<i32>,
}

fn peak_width(wx: &WidthEquation, channel: f64) -> f64 {
    wx.width_or(channel, MIN_PEAK_WIDTH)
}

fn square_wave_width(wx: &WidthEquation, channel: f64) -> i32 {
    let width = peak_width(wx, channel);
    if width > 0.0 {
        let odd = (width as i32 / 2) * 2 + 1;
        odd.max(MIN_SQUARE_WAVE)
    } else {
        MIN_SQUARE_WAVE
    }
}

/// Looks for peaks in `range` by cross-correlating the count uncertainties with a
/// zero-area square wave one peak width per lobe.
pub fn search(
    spectrum: &Spectrum,
    range: &ChannelRange,
    wx: &WidthEquation,
    threshold: i32,
) -> Result<PeakSearchResults> {
    spectrum.check_range(range)?;
    if threshold <= 0 {
        return Err(GaussError::InvalidInput(format!(
            "peak search threshold must be positive, got {threshold}"
        )));
    }

    let cross_correlation = cross_correlate(spectrum, range, wx)?;
    let raw_peaks = mark_raw_peaks(spectrum, range, wx, threshold, &cross_correlation);

    let mut refinements: Vec<PeakRefinement> = raw_peaks
        .iter()
        .map(|&raw| refine(spectrum, raw, peak_width(wx, f64::from(raw))))
        .collect();
    refinements.sort_by(|a, b| {
        compare_close(a.channel(), b.channel()).then(compare_close(a.net_area, b.net_area))
    });
    refinements.dedup_by(|a, b| {
        compare_close(a.channel(), b.channel()).is_eq() && compare_close(a.net_area, b.net_area).is_eq()
    });

    let peaks = PeakList::from_peaks(
        refinements.len(),
        refinements.iter().map(|r| Peak::at_channel(r.channel(), false)),
    )?;

    log::info!(
        "Peak search over {range} found {} peak(s) ({} raw)",
        peaks.len(),
        raw_peaks.len()
    );

    Ok(PeakSearchResults {
        peaks,
        refinements,
        cross_correlation,
    })
}

fn compare_close(a: f64, b: f64) -> std::cmp::Ordering {
    if (a - b).abs() > 1e-5 {
        a.total_cmp(&b)
    } else {
        std::cmp::Ordering::Equal
    }
}

/// Last channel (exclusive) at which the square wave still fits inside `range`.
fn high_channel(range: &ChannelRange, wx: &WidthEquation) -> i32 {
    range.last - 3 * square_wave_width(wx, f64::from(range.last))
}

fn cross_correlate(spectrum: &Spectrum, range: &ChannelRange, wx: &WidthEquation) -> Result<Vec<i32>> {
    // integer part of sigma, as the detection thresholds were tuned for it
    let sigmas: Vec<i32> = spectrum.sigcounts().iter().map(|&s| s as i32).collect();
    let lobe = |start: i32, width: i32| -> i32 {
        (start..start + width)
            .filter_map(|ch| usize::try_from(ch - spectrum.first_channel()).ok())
            .filter_map(|i| sigmas.get(i))
            .sum()
    };

    let mut cross_correlation = zeroed(spectrum.len())?;

    let mut width = square_wave_width(wx, f64::from(range.first));
    let mut next_update = (range.first / UPDATE_INTERVAL + 1) * UPDATE_INTERVAL;
    let high = high_channel(range, wx);

    for channel in range.first..high {
        if channel == next_update {
            width = square_wave_width(wx, f64::from(channel));
            next_update += UPDATE_INTERVAL;
        }
        let value = -lobe(channel, width) + 2 * lobe(channel + width, width)
            - lobe(channel + 2 * width, width);
        cross_correlation[(channel - spectrum.first_channel()) as usize] = value;
    }

    Ok(cross_correlation)
}

fn mark_raw_peaks(
    spectrum: &Spectrum,
    range: &ChannelRange,
    wx: &WidthEquation,
    threshold: i32,
    cross_correlation: &[i32],
) -> BTreeSet<i32> {
    let mut raw_peaks = BTreeSet::new();
    let mut mark = |found: i32, width: f64| {
        if let Some(&previous) = raw_peaks.last() {
            if f64::from(previous) + width >= f64::from(found) {
                return;
            }
        }
        raw_peaks.insert(found);
    };

    let cc = |channel: i32| cross_correlation[(channel - spectrum.first_channel()) as usize];
    let mut pass_count = 0;

    for channel in range.first + 2..high_channel(range, wx) {
        let width = peak_width(wx, f64::from(channel));
        let square_wave = f64::from(square_wave_width(wx, f64::from(channel)));

        if width < MAX_PEAK_WIDTH {
            let previous = cc(channel - 1);
            if previous > threshold && previous > cc(channel) && previous >= cc(channel - 2) {
                mark(channel - 1 + (1.5 * square_wave) as i32, width);
                pass_count = 0;
            }
        } else if cc(channel) >= threshold {
            pass_count += 1;
        } else if pass_count > 0 {
            let found = (f64::from(channel) - 0.5 * f64::from(pass_count) + 1.5 * square_wave) as i32;
            mark(found, width);
            pass_count = 0;
        }
    }

    raw_peaks
}

/// Fits a parabola to the log of the net counts around `raw` and moves the peak to
/// its vertex.
fn refine(spectrum: &Spectrum, raw: i32, width: f64) -> PeakRefinement {
    if raw < spectrum.first_channel() + REFINE_END_MARGIN
        || raw > spectrum.last_channel() - REFINE_END_MARGIN
    {
        return PeakRefinement::raw(raw);
    }

    let half = (width as i32).min(MAX_FIT_WIDTH_ODD) / 2;
    let pcw = half * 2 + 1;
    let low = raw - half;
    let high = raw + half + 1;

    let pre = ChannelRange::new(low - SIDE_BACKGROUND_CHANNELS, low - 1);
    let post = ChannelRange::new(high + 1, high + SIDE_BACKGROUND_CHANNELS);
    if spectrum.check_range(&pre).is_err() || spectrum.check_range(&post).is_err() {
        return PeakRefinement::raw(raw);
    }
    let side_mean = |side: &ChannelRange| -> i64 {
        spectrum.region_counts(side).iter().map(|&c| i64::from(c)).sum::<i64>()
            / i64::from(SIDE_BACKGROUND_CHANNELS)
    };
    let average_background = side_mean(&pre).min(side_mean(&post)) as f64;

    let window = ChannelRange::new(low, low + pcw - 1);
    let mut net_area = 0.0;
    let mut background = 0.0;
    // moments of x and of y = ln(net) against x, x measured from `low`
    let mut sx = [0.0; 5];
    let mut sy = [0.0; 3];
    for (i, &count) in spectrum.region_counts(&window).iter().enumerate() {
        let net = f64::from(count) - average_background;
        let x = i as f64;
        let y = net.max(1.0).ln();
        net_area += net;
        background += average_background;
        for (k, moment) in sx.iter_mut().enumerate() {
            *moment += x.powi(k as i32);
        }
        for (k, moment) in sy.iter_mut().enumerate() {
            *moment += y * x.powi(k as i32);
        }
    }

    // Cramer's rule on the normal equations of y = a1 + a2 x + a3 x²
    let det_a3 = sx[0] * sx[2] * sy[2] - sx[0] * sx[3] * sy[1] - sx[1] * sx[1] * sy[2]
        + sx[1] * sy[1] * sx[2]
        + sy[0] * sx[1] * sx[3]
        - sy[0] * sx[2] * sx[2];

    let mut refinement = PeakRefinement {
        raw_channel: raw,
        refine_region: Some(ChannelRange::new(raw - half, raw + half)),
        net_area,
        background,
        refined_channel: f64::from(raw),
        use_refinement: false,
    };
    if det_a3 == 0.0 {
        return refinement;
    }

    let det_a2 = sx[0] * sy[1] * sx[4] - sx[0] * sx[3] * sy[2] - sy[0] * sx[1] * sx[4]
        + sy[0] * sx[3] * sx[2]
        + sx[2] * sx[1] * sy[2]
        - sx[2] * sy[1] * sx[2];

    refinement.refined_channel = -det_a2 / (2.0 * det_a3) + f64::from(low);
    refinement.use_refinement = (f64::from(raw) - refinement.refined_channel).abs() <= f64::from(half)
        && net_area > 0.0;
    refinement
}
