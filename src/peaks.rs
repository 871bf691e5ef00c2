use std::cmp::Ordering;

use crate::error::{GaussError, Result};
use crate::spectrum::ChannelRange;

/// Channel or energy values closer than this are the same peak.
pub const PEAK_MATCH_THRESHOLD: f64 = 0.00001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PeakKind {
    Channel,
    Energy,
}

/// A peak known by its channel or by its energy. The other coordinate is derived
/// from the energy calibration and may be invalid.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Peak {
    pub kind: PeakKind,
    pub channel: f64,
    pub channel_valid: bool,
    pub energy: f64,
    pub energy_valid: bool,
    pub sige: f64,
    pub fixed_centroid: bool,
}

impl Peak {
    pub fn at_channel(channel: f64, fixed_centroid: bool) -> Self {
        Self {
            kind: PeakKind::Channel,
            channel,
            channel_valid: true,
            energy: 0.0,
            energy_valid: false,
            sige: 0.0,
            fixed_centroid,
        }
    }

    /// Energy peaks pin their centroid: the channel comes from the calibration.
    pub fn at_energy(energy: f64, sige: f64) -> Self {
        Self {
            kind: PeakKind::Energy,
            channel: 0.0,
            channel_valid: false,
            energy,
            energy_valid: true,
            sige,
            fixed_centroid: true,
        }
    }

    pub fn in_range(&self, range: &ChannelRange) -> bool {
        self.channel_valid && range.contains(self.channel)
    }

    /// Ordering used to sort and de-duplicate peaks: channel when both channels are
    /// known, energy when both energies are, otherwise a known channel against zero.
    pub fn compare(&self, other: &Peak) -> Ordering {
        if self.kind == other.kind {
            return match self.kind {
                PeakKind::Channel => compare_values(self.channel, other.channel),
                PeakKind::Energy => compare_values(self.energy, other.energy),
            };
        }
        if self.channel_valid && other.channel_valid {
            compare_values(self.channel, other.channel)
        } else if self.energy_valid && other.energy_valid {
            compare_values(self.energy, other.energy)
        } else if self.channel_valid {
            compare_values(self.channel, 0.0)
        } else {
            compare_values(0.0, other.channel)
        }
    }

    pub fn same_as(&self, other: &Peak) -> bool {
        self.kind == other.kind
            && self.fixed_centroid == other.fixed_centroid
            && self.compare(other) == Ordering::Equal
    }
}

fn compare_values(this: f64, other: f64) -> Ordering {
    if (this - other).abs() > PEAK_MATCH_THRESHOLD {
        this.total_cmp(&other)
    } else {
        Ordering::Equal
    }
}

/// Peaks with a fixed capacity. Adding past the capacity fails and leaves the list
/// as it was.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PeakList {
    capacity: usize,
    peaks: Vec<Peak>,
}

impl PeakList {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            peaks: Vec::new(),
        }
    }

    pub fn from_peaks(capacity: usize, peaks: impl IntoIterator<Item = Peak>) -> Result<Self> {
        let mut list = Self::new(capacity);
        for peak in peaks {
            list.push(peak)?;
        }
        Ok(list)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Peak> {
        self.peaks.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Peak> {
        self.peaks.iter_mut()
    }

    pub fn push(&mut self, peak: Peak) -> Result<()> {
        if self.peaks.len() + 1 > self.capacity {
            return Err(GaussError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.peaks.push(peak);
        Ok(())
    }

    pub fn add_channel_peak(&mut self, channel: f64, fixed_centroid: bool) -> Result<()> {
        self.push(Peak::at_channel(channel, fixed_centroid))
    }

    pub fn add_energy_peak(&mut self, energy: f64, sige: f64) -> Result<()> {
        self.push(Peak::at_energy(energy, sige))
    }

    pub fn clear(&mut self) {
        self.peaks.clear();
    }

    pub fn contains(&self, peak: &Peak) -> bool {
        self.peaks.iter().any(|p| p.same_as(peak))
    }

    /// Sorts with [`Peak::compare`] and drops entries that compare equal.
    pub fn sort(&mut self) {
        self.peaks.sort_by(Peak::compare);
        self.peaks.dedup_by(|later, earlier| later.same_as(earlier));
    }

    /// Peaks with a known channel inside `range`, in the same capacity.
    pub fn in_range(&self, range: &ChannelRange) -> PeakList {
        Self {
            capacity: self.capacity,
            peaks: self
                .peaks
                .iter()
                .filter(|p| p.in_range(range))
                .cloned()
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PeakList {
    type Item = &'a Peak;
    type IntoIter = std::slice::Iter<'a, Peak>;

    fn into_iter(self) -> Self::IntoIter {
        self.peaks.iter()
    }
}

/// Fit regions with a fixed capacity, kept in the order they were added.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Regions {
    capacity: usize,
    regions: Vec<ChannelRange>,
}

impl Regions {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            regions: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[ChannelRange] {
        &self.regions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChannelRange> {
        self.regions.iter()
    }

    pub fn push(&mut self, region: ChannelRange) -> Result<()> {
        if self.regions.len() + 1 > self.capacity {
            return Err(GaussError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.regions.push(region);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }

    /// True if any region spans more than `max_width` channels.
    pub fn exceeds_width(&self, max_width: i32) -> bool {
        self.regions.iter().any(|r| r.width() > max_width)
    }
}

impl<'a> IntoIterator for &'a Regions {
    type Item = &'a ChannelRange;
    type IntoIter = std::slice::Iter<'a, ChannelRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}
