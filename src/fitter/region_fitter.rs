use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};

use super::common::{Background, Value};
use super::curve::Curve;
use super::fit_info::{FitInfo, FitVary};
use super::fit_settings::{ConvergenceCriteria, FitParms};
use super::least_squares;
use super::summary::Summary;
use crate::equations::{EnergyEquation, WidthEquation};
use crate::error::{GaussError, Result, zeroed};
use crate::peaks::PeakList;
use crate::spectrum::{ChannelRange, Spectrum};

/// Peaks closer than this fraction of the initial width are merged by deleting one.
const DELETE_DISTANCE_FACTOR: f64 = 0.2;

/// A residual closer than this many channels to a peak does not get its own peak.
const ADD_PEAK_MIN_DISTANCE: f64 = 1.0;

/// What the fitter decided after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CycleReturn {
    Done,
    Delete,
    Add,
    /// The peak set changed but the cycle budget is used up.
    Continue,
}

/// Inputs and results of one fit cycle.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FitRecord {
    pub cycle_number: usize,
    pub used_chanrange: ChannelRange,
    pub used_parms: FitParms,
    pub used_ex: EnergyEquation,
    pub used_wx: WidthEquation,
    pub used_spectrum: Vec<u32>,
    pub input_peaks: PeakList,
    /// Reduced chi-squared of the cycle.
    pub chi_sq: f64,
    pub cycle_return: CycleReturn,
    pub cycle_exception: Option<String>,
    pub background: Background,
    pub summary: Summary,
    pub curve: Option<Curve>,
}

/// Weighted residuals of a region against the model described by a [`FitInfo`].
struct RegionModel<'a> {
    counts: &'a [u32],
    sigmas: &'a [f64],
    template: &'a FitInfo,
    vary: &'a FitVary,
    params: DVector<f64>,
}

impl RegionModel<'_> {
    fn info(&self) -> FitInfo {
        let mut info = self.template.clone();
        self.vary.apply(&self.params, &mut info);
        info
    }

    fn channels(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.template
            .region
            .channels()
            .zip(self.counts.iter().zip(self.sigmas))
            .map(|(ch, (&count, &sigma))| (f64::from(ch), f64::from(count), sigma))
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for RegionModel<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let info = self.info();
        Some(DVector::from_iterator(
            self.counts.len(),
            self.channels()
                .map(|(channel, count, sigma)| (count - info.model_at(channel)) / sigma),
        ))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let info = self.info();
        let first = f64::from(info.region.first);
        let mut jac = DMatrix::zeros(self.counts.len(), self.vary.count());

        for (row, (channel, _, sigma)) in self.channels().enumerate() {
            jac[(row, FitVary::INTERCEPT)] = -1.0 / sigma;
            jac[(row, FitVary::SLOPE)] = -(channel - first) / sigma;

            for (peak, indices) in info.peaks.iter().zip(&self.vary.peaks) {
                let gradient = info.gaussian(peak).gradient(channel);
                // fwhm is |avg + add|
                let sign = if info.avg_width + peak.add_width_511 < 0.0 { -1.0 } else { 1.0 };
                let dwidth = -sign * gradient.fwhm / sigma;

                jac[(row, indices.height)] = -gradient.height / sigma;
                if let Some(i) = indices.centroid {
                    jac[(row, i)] = -gradient.centroid / sigma;
                }
                if let Some(i) = self.vary.avg_width {
                    jac[(row, i)] += dwidth;
                }
                if let Some(i) = indices.add_width {
                    jac[(row, i)] = dwidth;
                }
            }
        }
        Some(jac)
    }
}

/// Peak set change decided after a successful cycle.
enum Change {
    Delete(usize),
    Add { channel: i32, height: f64 },
}

impl Change {
    fn cycle_return(&self) -> CycleReturn {
        match self {
            Change::Delete(_) => CycleReturn::Delete,
            Change::Add { .. } => CycleReturn::Add,
        }
    }
}

/// Two peaks sitting on top of each other: drop the lower one, unless the fit
/// already ran with one peak fewer.
fn find_delete(info: &FitInfo, peak_counts: &[usize]) -> Option<usize> {
    let npeaks = info.peaks.len();
    if let Some((_, previous)) = peak_counts.split_last() {
        if peak_counts.len() > 1 && previous.contains(&npeaks.saturating_sub(1)) {
            return None;
        }
    }
    let distance = DELETE_DISTANCE_FACTOR * info.initial_width;
    for j in 0..npeaks {
        for k in j + 1..npeaks {
            let (pj, pk) = (&info.peaks[j], &info.peaks[k]);
            if pj.height == 0.0 || pk.height == 0.0 {
                continue;
            }
            if (pj.centroid - pk.centroid).abs() < distance {
                return Some(if pk.height < pj.height { k } else { j });
            }
        }
    }
    None
}

/// A new peak goes where the largest positive residual is, when it is large enough.
fn find_add(info: &FitInfo, curve: &Curve, counts: &[u32], parms: &FitParms) -> Option<(i32, f64)> {
    if info.peaks.len() + 1 > parms.max_npeaks {
        return None;
    }
    let mut index = 0;
    let mut max_resid = 0.0;
    for (i, &residual) in curve.residuals.iter().enumerate() {
        if residual > max_resid {
            max_resid = residual;
            index = i;
        }
    }
    if max_resid < parms.max_resid {
        return None;
    }

    let region = info.region;
    let channel = region.first + index as i32;
    if info
        .peaks
        .iter()
        .any(|p| (p.centroid - f64::from(channel)).abs() < ADD_PEAK_MIN_DISTANCE)
    {
        log::debug!("Residual {max_resid:.1} at channel {channel} is already covered by a peak");
        return None;
    }
    if channel - 1 < region.first || channel + 1 >= region.last {
        return None;
    }
    if curve.residuals[index - 1] <= 0.0 && curve.residuals[index + 1] <= 0.0 {
        return None;
    }

    let height = f64::from(counts[index]) - info.model_at(f64::from(channel));
    Some((channel, height))
}

/// Fits `region` with Gaussian peaks on a linear background. Each cycle is recorded;
/// between cycles close peaks are deleted or a peak is added at a large residual.
pub fn fit_region(
    region: &ChannelRange,
    spectrum: &Spectrum,
    peaks: &PeakList,
    parms: &FitParms,
    ex: &EnergyEquation,
    wx: &WidthEquation,
    nplots_per_chan: usize,
) -> Result<Vec<FitRecord>> {
    if nplots_per_chan == 0 {
        return Err(GaussError::InvalidInput(
            "at least one plot point per channel is needed".to_owned(),
        ));
    }
    if peaks.len() > parms.max_npeaks {
        return Err(GaussError::CapacityExceeded {
            capacity: parms.max_npeaks,
        });
    }

    let mut info = FitInfo::new(spectrum, region, ex, wx, peaks)?;
    let counts = spectrum.region_counts(region);
    let mut sigmas: Vec<f64> = zeroed(counts.len())?;
    for (sigma, channel) in sigmas.iter_mut().zip(region.channels()) {
        *sigma = spectrum.sigma_at(channel).unwrap_or(1.0);
    }
    let mut used_spectrum: Vec<u32> = zeroed(counts.len())?;
    used_spectrum.copy_from_slice(counts);

    let criteria = ConvergenceCriteria::from(parms);
    let nchannels = counts.len();
    let mut records = Vec::new();
    let mut peak_counts = Vec::new();

    log::info!(
        "Fitting region {region} with {} starting peak(s)",
        info.peaks.len()
    );

    for cycle_number in 1..=parms.ncycle {
        let input_peaks = info.peak_list(parms.max_npeaks)?;
        let vary = FitVary::new(parms.pkwd_mode, &info);
        let nvary = vary.count();

        let mut record = FitRecord {
            cycle_number,
            used_chanrange: *region,
            used_parms: *parms,
            used_ex: *ex,
            used_wx: *wx,
            used_spectrum: used_spectrum.clone(),
            input_peaks,
            chi_sq: 0.0,
            cycle_return: CycleReturn::Done,
            cycle_exception: None,
            background: Background {
                origin: region.first,
                ..Background::default()
            },
            summary: Summary::default(),
            curve: None,
        };

        if nchannels <= nvary + 1 {
            log::warn!("Region {region} is too narrow for {nvary} free parameters");
            record.cycle_exception = Some("too many variables, overdefined".to_owned());
            records.push(record);
            break;
        }

        let model = RegionModel {
            counts,
            sigmas: &sigmas,
            template: &info,
            vary: &vary,
            params: vary.parameters(&info),
        };
        let solution = match least_squares::minimize(model, &criteria) {
            Ok(solution) => solution,
            Err(GaussError::AllocationFailure(message)) => {
                return Err(GaussError::AllocationFailure(message));
            }
            Err(e) => {
                log::error!("Cycle {cycle_number} of region {region} failed: {e}");
                record.cycle_exception = Some(e.to_string());
                records.push(record);
                break;
            }
        };

        vary.apply(&solution.params, &mut info);
        let covariance = &solution.covariance;
        record.chi_sq = solution.sum_of_squares / (nchannels - nvary) as f64;
        record.background = Background {
            intercept: Value::new(
                info.intercept,
                covariance[(FitVary::INTERCEPT, FitVary::INTERCEPT)].max(0.0).sqrt(),
            ),
            slope: Value::new(
                info.slope,
                covariance[(FitVary::SLOPE, FitVary::SLOPE)].max(0.0).sqrt(),
            ),
            origin: region.first,
        };
        record.summary = Summary::new(&info, &vary, covariance, ex, counts);
        let curve = Curve::new(&info, counts, &sigmas, nplots_per_chan)?;

        peak_counts.push(info.peaks.len());
        let change = find_delete(&info, &peak_counts)
            .map(Change::Delete)
            .or_else(|| {
                find_add(&info, &curve, counts, parms)
                    .map(|(channel, height)| Change::Add { channel, height })
            });
        record.curve = Some(curve);

        let Some(change) = change else {
            log::info!(
                "Region {region} converged after {cycle_number} cycle(s), chi2 {:.3}",
                record.chi_sq
            );
            records.push(record);
            break;
        };

        if cycle_number == parms.ncycle {
            log::info!("Region {region} used all {cycle_number} cycles");
            record.cycle_return = CycleReturn::Continue;
            records.push(record);
            break;
        }

        record.cycle_return = change.cycle_return();
        records.push(record);

        let old_peaks = info.peaks.len();
        match change {
            Change::Delete(index) => {
                let removed = info.delete_peak(index);
                log::debug!("Cycle {cycle_number}: deleting peak at {:.2}", removed.centroid);
            }
            Change::Add { channel, height } => {
                log::debug!("Cycle {cycle_number}: adding peak at channel {channel}");
                info.add_peak(f64::from(channel), ex.energy(f64::from(channel)), height);
            }
        }
        let (initial_width, region) = (info.initial_width, info.region);
        let nold = old_peaks.min(info.peaks.len());
        for peak in info.peaks.iter_mut().take(nold) {
            peak.constrain(&region, initial_width);
        }
    }

    Ok(records)
}

/// The `nout` records with the smallest chi-squared, best first. Records that ended
/// in an exception carry no fit and are skipped.
pub fn best_records(records: &[FitRecord], nout: usize) -> Vec<&FitRecord> {
    let mut best: Vec<&FitRecord> = records
        .iter()
        .filter(|r| r.cycle_exception.is_none())
        .collect();
    best.sort_by(|a, b| a.chi_sq.total_cmp(&b.chi_sq));
    best.truncate(nout);
    best
}
