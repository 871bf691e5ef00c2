use crate::equations::WidthEquation;
use crate::peaks::PeakList;

/// Width used around a searched peak when the width equation gives nothing usable.
const FALLBACK_WIDTH: f64 = 3.0;

/// Drops required peaks that a search already found: any required peak closer than
/// one peak width to a searched peak, and any required peak without a channel.
pub fn prune_required(wx: &WidthEquation, search_peaks: &PeakList, required: &PeakList) -> PeakList {
    let mut kept = PeakList::new(required.capacity());

    for peak in required.iter().filter(|p| p.channel_valid) {
        let duplicate = search_peaks.iter().filter(|s| s.channel_valid).any(|s| {
            let width = match wx.width(s.channel) {
                Ok(w) if w > 0.0 => w,
                _ => FALLBACK_WIDTH,
            };
            (peak.channel - s.channel).abs() < width
        });

        if duplicate {
            log::debug!("Required peak at {:.2} is already in the search results", peak.channel);
        } else if kept.push(peak.clone()).is_err() {
            // cannot happen, `kept` is as large as `required`
            break;
        }
    }

    kept.sort();
    kept
}
