use crate::error::{GaussError, Result};

/// Contiguous range of channels, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ChannelRange {
    pub first: i32,
    pub last: i32,
}

impl ChannelRange {
    pub fn new(end1: i32, end2: i32) -> Self {
        Self {
            first: end1.min(end2),
            last: end1.max(end2),
        }
    }

    pub fn width(&self) -> i32 {
        self.last - self.first + 1
    }

    pub fn contains(&self, channel: f64) -> bool {
        channel >= f64::from(self.first) && channel <= f64::from(self.last)
    }

    /// True when this range lies completely within `outer`.
    pub fn inside(&self, outer: &ChannelRange) -> bool {
        outer.first <= self.first && outer.last >= self.last
    }

    pub fn overlaps(&self, other: &ChannelRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    pub fn channels(&self) -> std::ops::RangeInclusive<i32> {
        self.first..=self.last
    }
}

impl std::fmt::Display for ChannelRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.first, self.last)
    }
}

/// Channel-count histogram with per-channel count uncertainties.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Spectrum {
    first_channel: i32,
    counts: Vec<u32>,
    sigcounts: Vec<f64>,
}

impl Spectrum {
    pub fn new(first_channel: i32, counts: Vec<u32>) -> Result<Self> {
        if first_channel < 0 {
            return Err(GaussError::InvalidInput(format!(
                "first channel {first_channel} is negative"
            )));
        }
        let sigcounts = Self::poisson_uncertainties(&counts);
        Ok(Self {
            first_channel,
            counts,
            sigcounts,
        })
    }

    pub fn with_uncertainties(first_channel: i32, counts: Vec<u32>, sigcounts: Vec<f64>) -> Result<Self> {
        if first_channel < 0 {
            return Err(GaussError::InvalidInput(format!(
                "first channel {first_channel} is negative"
            )));
        }
        if counts.len() != sigcounts.len() {
            return Err(GaussError::InvalidInput(format!(
                "{} counts but {} uncertainties",
                counts.len(),
                sigcounts.len()
            )));
        }
        if sigcounts.iter().any(|s| !(*s > 0.0)) {
            return Err(GaussError::InvalidInput(
                "count uncertainties must be positive".to_owned(),
            ));
        }
        Ok(Self {
            first_channel,
            counts,
            sigcounts,
        })
    }

    pub fn first_channel(&self) -> i32 {
        self.first_channel
    }

    pub fn last_channel(&self) -> i32 {
        self.first_channel + self.counts.len() as i32 - 1
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn range(&self) -> ChannelRange {
        ChannelRange::new(self.first_channel, self.last_channel())
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn sigcounts(&self) -> &[f64] {
        &self.sigcounts
    }

    fn index(&self, channel: i32) -> Option<usize> {
        let offset = channel.checked_sub(self.first_channel)?;
        usize::try_from(offset).ok().filter(|i| *i < self.counts.len())
    }

    pub fn count_at(&self, channel: i32) -> Option<u32> {
        self.index(channel).map(|i| self.counts[i])
    }

    pub fn sigma_at(&self, channel: i32) -> Option<f64> {
        self.index(channel).map(|i| self.sigcounts[i])
    }

    /// Counts of the part of `range` that overlaps the spectrum.
    pub fn region_counts(&self, range: &ChannelRange) -> &[u32] {
        if range.first > self.last_channel() || range.last < self.first_channel {
            return &[];
        }
        let bottom = range.first.max(self.first_channel);
        let top = range.last.min(self.last_channel());
        match (self.index(bottom), self.index(top)) {
            (Some(lo), Some(hi)) => &self.counts[lo..=hi],
            _ => &[],
        }
    }

    /// Checks that `range` is a non-empty subrange of this spectrum.
    pub fn check_range(&self, range: &ChannelRange) -> Result<()> {
        if self.is_empty() || !range.inside(&self.range()) {
            return Err(GaussError::InvalidInput(format!(
                "channel range {range} is outside the spectrum {}",
                self.range()
            )));
        }
        Ok(())
    }

    // sqrt(N) except in low count channels, where the local mean stands in for N
    fn poisson_uncertainties(counts: &[u32]) -> Vec<f64> {
        let n = counts.len();
        let c = |i: usize| f64::from(counts[i]);

        let mut sig: Vec<f64> = counts
            .iter()
            .map(|&count| {
                let s = f64::from(count).sqrt();
                if s > 0.0 { s } else { 0.3 }
            })
            .collect();

        if n < 5 {
            return sig;
        }

        for i in 0..n {
            if counts[i] > 10 {
                continue;
            }
            let (mean, floor) = if i < 2 {
                ((c(i) + c(i + 1) + c(i + 2)) / 3.0, 0.577_350_3)
            } else if i >= n - 2 {
                ((c(i - 2) + c(i - 1) + c(i)) / 3.0, 0.577_350_3)
            } else {
                let weighted =
                    c(i - 2) + c(i + 2) + 2.0 * (c(i - 1) + c(i + 1)) + 3.0 * c(i);
                (weighted / 9.0, 0.333_333_3)
            };
            let s = mean.max(0.0).sqrt();
            sig[i] = if s > 0.0 { s } else { floor };
        }

        sig
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_range_orders_ends() {
        let range = ChannelRange::new(20, 10);
        assert_eq!(range.first, 10);
        assert_eq!(range.last, 20);
        assert_eq!(range.width(), 11);
        assert!(range.contains(10.0));
        assert!(range.contains(20.0));
        assert!(!range.contains(20.5));
    }

    #[test]
    fn test_uncertainties_high_counts_are_sqrt() {
        let spectrum = Spectrum::new(0, vec![100; 20]).unwrap();
        assert!(spectrum.sigcounts().iter().all(|s| (s - 10.0).abs() < 1e-12));
    }

    #[test]
    fn test_uncertainties_empty_channels_floor() {
        let spectrum = Spectrum::new(0, vec![0; 10]).unwrap();
        let sig = spectrum.sigcounts();
        assert!((sig[0] - 0.577_350_3).abs() < 1e-9);
        assert!((sig[5] - 0.333_333_3).abs() < 1e-9);
        assert!((sig[9] - 0.577_350_3).abs() < 1e-9);
    }

    #[test]
    fn test_uncertainties_low_counts_are_smoothed() {
        let spectrum = Spectrum::new(0, vec![9, 9, 0, 9, 9, 9]).unwrap();
        // (9 + 9 + 2 * (9 + 9) + 0) / 9 = 6
        assert!((spectrum.sigcounts()[2] - 6.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_region_counts_clips() {
        let spectrum = Spectrum::new(100, (0..10).collect()).unwrap();
        assert_eq!(spectrum.region_counts(&ChannelRange::new(95, 102)), &[0, 1, 2]);
        assert_eq!(spectrum.region_counts(&ChannelRange::new(108, 120)), &[8, 9]);
        assert!(spectrum.region_counts(&ChannelRange::new(0, 50)).is_empty());
        assert_eq!(spectrum.count_at(104), Some(4));
        assert_eq!(spectrum.count_at(99), None);
        assert_eq!(spectrum.count_at(110), None);
    }

    #[test]
    fn test_check_range() {
        let spectrum = Spectrum::new(0, vec![1; 50]).unwrap();
        assert!(spectrum.check_range(&ChannelRange::new(0, 49)).is_ok());
        assert!(spectrum.check_range(&ChannelRange::new(10, 50)).is_err());
    }

    #[test]
    fn test_with_uncertainties_checks_lengths() {
        assert!(Spectrum::with_uncertainties(0, vec![1, 2], vec![1.0]).is_err());
        assert!(Spectrum::with_uncertainties(0, vec![1, 2], vec![1.0, 0.0]).is_err());
        assert!(Spectrum::with_uncertainties(0, vec![1, 2], vec![1.0, 1.5]).is_ok());
        assert!(Spectrum::new(-1, vec![1]).is_err());
    }
}
