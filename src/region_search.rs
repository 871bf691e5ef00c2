use crate::equations::WidthEquation;
use crate::error::{GaussError, Result, zeroed};
use crate::peaks::{PeakList, Regions};
use crate::spectrum::{ChannelRange, Spectrum};

/// Passes of the running background before the intensity flags are taken as final.
const MAX_BACKGROUND_PASSES: usize = 30;
const MIN_PEAK_WIDTH: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum RegionSearchMode {
    /// Keep only regions that contain one of the given peaks.
    ForPeaks,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RegionSearchParms {
    /// Sigmas above the running background a channel needs to be flagged.
    pub threshold: f64,
    /// Padding of a span in peak widths.
    pub irw: i32,
    /// Channels taken off the padding that faces a neighbouring span.
    pub irch: i32,
    pub mode: RegionSearchMode,
    pub max_width: i32,
}

impl Default for RegionSearchParms {
    fn default() -> Self {
        Self {
            threshold: 2.0,
            irw: 3,
            irch: 2,
            mode: RegionSearchMode::All,
            max_width: 150,
        }
    }
}

impl RegionSearchParms {
    fn validate(&self) -> Result<()> {
        if !(self.threshold >= 0.0) {
            return Err(GaussError::InvalidInput(format!(
                "region search threshold must not be negative, got {}",
                self.threshold
            )));
        }
        if self.irw < 0 || self.irch < 0 {
            return Err(GaussError::InvalidInput(format!(
                "region padding must not be negative (irw {}, irch {})",
                self.irw, self.irch
            )));
        }
        if self.max_width < 1 {
            return Err(GaussError::InvalidInput(format!(
                "maximum region width must be at least one channel, got {}",
                self.max_width
            )));
        }
        Ok(())
    }
}

fn valid_width(wx: &WidthEquation, channel: f64) -> f64 {
    wx.width_or(channel, MIN_PEAK_WIDTH).max(MIN_PEAK_WIDTH)
}

/// Finds the fit regions of `range` and stores them in `regions`, which is cleared
/// first. When more regions are found than `regions` can hold, the ones that fit are
/// kept and `CapacityExceeded` is returned.
pub fn search(
    spectrum: &Spectrum,
    range: &ChannelRange,
    wx: &WidthEquation,
    parms: &RegionSearchParms,
    peaks: &PeakList,
    regions: &mut Regions,
) -> Result<()> {
    spectrum.check_range(range)?;
    parms.validate()?;
    regions.clear();

    let flags = intensity_flags(spectrum, range, wx, parms)?;
    let spans = spans_of(range, spectrum.first_channel(), &flags);
    let padded = pad_and_merge(range, wx, parms, &spans);

    let mut found = Vec::new();
    for region in padded {
        split(spectrum, region, parms.max_width, &mut found);
    }

    if parms.mode == RegionSearchMode::ForPeaks {
        found.retain(|region| {
            peaks
                .iter()
                .any(|p| p.channel_valid && region.contains(p.channel))
        });
    }

    log::info!(
        "Region search over {range} found {} span(s) and {} region(s)",
        spans.len(),
        found.len()
    );

    for region in found {
        if let Err(e) = regions.push(region) {
            log::warn!(
                "Region list is full at {} regions, dropping the rest",
                regions.capacity()
            );
            return Err(e);
        }
    }
    Ok(())
}

/// Flags channels of `range` that stand out of an iterated running background.
fn intensity_flags(
    spectrum: &Spectrum,
    range: &ChannelRange,
    wx: &WidthEquation,
    parms: &RegionSearchParms,
) -> Result<Vec<bool>> {
    let counts = spectrum.counts();
    let sigmas = spectrum.sigcounts();
    let origin = spectrum.first_channel();
    let nchannels = counts.len() as i32;

    let mut flags = zeroed(counts.len())?;
    let mut background: Vec<i64> = zeroed(counts.len())?;

    for pass in 0..MAX_BACKGROUND_PASSES {
        for channel in range.channels() {
            let j = channel - origin;
            let half = (1.5 * (valid_width(wx, f64::from(channel)) + 0.1)) as i32;
            let low = (j - half).max(0);
            let high = (j + half).min(nchannels - 1);
            let sum: i64 = (low..=high)
                .map(|k| {
                    let k = k as usize;
                    if flags[k] { background[k] } else { i64::from(counts[k]) }
                })
                .sum();
            // clipped at the spectrum ends
            let n = i64::from(high - low + 1);
            background[j as usize] = (sum + n / 2) / n;
        }

        let mut changed = false;
        for channel in range.channels() {
            let j = (channel - origin) as usize;
            let count = i64::from(counts[j]);
            let limit = background[j] + (parms.threshold * sigmas[j]) as i64;
            if !flags[j] && count >= limit && count > 1 {
                flags[j] = true;
                changed = true;
            }
        }
        if !changed {
            log::debug!("Running background settled after {} pass(es)", pass + 1);
            break;
        }
    }

    let first = (range.first - origin) as usize;
    let last = (range.last - origin) as usize;

    // a lone flagged channel is noise
    for j in first..=last {
        let before = j > first && flags[j - 1];
        let after = j < last && flags[j + 1];
        if flags[j] && !before && !after {
            flags[j] = false;
        }
    }

    // bridge one channel gaps when the joined span stays narrow enough
    let mut run = 0;
    for j in first..=last {
        if !flags[j] && j > first && j < last && flags[j - 1] && flags[j + 1] {
            let next_run = flags[j + 1..=last].iter().take_while(|&&f| f).count();
            if run + 1 + next_run <= parms.max_width as usize {
                flags[j] = true;
            }
        }
        run = if flags[j] { run + 1 } else { 0 };
    }

    Ok(flags)
}

/// Runs of flagged channels inside `range`. `flags` is indexed from `origin`.
fn spans_of(range: &ChannelRange, origin: i32, flags: &[bool]) -> Vec<ChannelRange> {
    let mut spans = Vec::new();
    let mut start = None;
    for channel in range.channels() {
        let flagged = flags[(channel - origin) as usize];
        match (flagged, start) {
            (true, None) => start = Some(channel),
            (false, Some(s)) => {
                spans.push(ChannelRange::new(s, channel - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push(ChannelRange::new(s, range.last));
    }
    spans
}

/// Pads every span by `irw` peak widths, less `irch` on a side facing another span,
/// and joins padded spans that overlap or touch.
fn pad_and_merge(
    range: &ChannelRange,
    wx: &WidthEquation,
    parms: &RegionSearchParms,
    spans: &[ChannelRange],
) -> Vec<ChannelRange> {
    let padding = |channel: i32, facing_neighbour: bool| {
        let width = (valid_width(wx, f64::from(channel)).round() as i32).max(1);
        let pad = parms.irw * width;
        if facing_neighbour {
            (pad - parms.irch).max(0)
        } else {
            pad
        }
    };

    let mut merged: Vec<ChannelRange> = Vec::with_capacity(spans.len());
    for (i, span) in spans.iter().enumerate() {
        let low = padding(span.first, i > 0);
        let high = padding(span.last, i + 1 < spans.len());
        let first = (span.first - low).max(range.first);
        let last = (span.last + high).min(range.last);

        match merged.last_mut() {
            Some(previous) if first <= previous.last + 1 => {
                previous.last = previous.last.max(last);
            }
            _ => merged.push(ChannelRange::new(first, last)),
        }
    }
    merged
}

/// Splits `region` at its lowest internal count until every piece is at most
/// `max_width` channels wide. Pieces are appended in channel order.
fn split(spectrum: &Spectrum, region: ChannelRange, max_width: i32, out: &mut Vec<ChannelRange>) {
    if region.width() <= max_width {
        out.push(region);
        return;
    }

    let count = |channel: i32| spectrum.count_at(channel).unwrap_or(0);
    let middle_twice = region.first + region.last;
    let at = (region.first + 1..region.last)
        .min_by_key(|&ch| (count(ch), (2 * ch - middle_twice).abs(), ch))
        .unwrap_or(region.first);

    log::debug!("Splitting region {region} at channel {at}");
    split(spectrum, ChannelRange::new(region.first, at), max_width, out);
    split(spectrum, ChannelRange::new(at + 1, region.last), max_width, out);
}
