use std::path::{Path, PathBuf};
use std::process::ExitCode;

use gauss_algs::fitter::{FitRecord, best_records, fit_region};
use gauss_algs::peaks::{PeakList, Regions};
use gauss_algs::{AnalysisConfig, ChannelRange, GaussError, Result, Spectrum, peak_search, region_search};

#[derive(serde::Deserialize)]
struct SpectrumFile {
    #[serde(default)]
    first_channel: i32,
    counts: Vec<u32>,
}

#[derive(serde::Serialize)]
struct RegionReport {
    region: ChannelRange,
    cycles: usize,
    best: Vec<FitRecord>,
    error: Option<String>,
}

#[derive(serde::Serialize)]
struct Report {
    search_range: ChannelRange,
    peaks: PeakList,
    regions: Vec<RegionReport>,
}

fn load_spectrum(path: &Path) -> Result<Spectrum> {
    let file = std::fs::File::open(path)?;
    let data: SpectrumFile = serde_json::from_reader(std::io::BufReader::new(file))?;
    Spectrum::new(data.first_channel, data.counts)
}

fn analyse(config: &AnalysisConfig, spectrum: &Spectrum) -> Result<Report> {
    let search_range = config.search_range.unwrap_or_else(|| spectrum.range());

    let found = peak_search::search(spectrum, &search_range, &config.width, config.peak_threshold())?;

    let mut regions = Regions::new(config.region.max_regions);
    match region_search::search(
        spectrum,
        &search_range,
        &config.width,
        &config.region_search_parms(),
        &found.peaks,
        &mut regions,
    ) {
        Ok(()) => {}
        Err(GaussError::CapacityExceeded { capacity }) => {
            log::warn!("More than {capacity} regions found, fitting the first {capacity}");
        }
        Err(e) => return Err(e),
    }

    let mut reports = Vec::with_capacity(regions.len());
    for region in &regions {
        let region_peaks = found.peaks.in_range(region);
        let report = match fit_region(
            region,
            spectrum,
            &region_peaks,
            &config.fit,
            &config.energy,
            &config.width,
            config.plots_per_channel,
        ) {
            Ok(records) => RegionReport {
                region: *region,
                cycles: records.len(),
                best: best_records(&records, config.fit.nout).into_iter().cloned().collect(),
                error: None,
            },
            Err(GaussError::AllocationFailure(msg)) => return Err(GaussError::AllocationFailure(msg)),
            Err(e) => {
                log::error!("Fit of region {region} failed: {e}");
                RegionReport {
                    region: *region,
                    cycles: 0,
                    best: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        reports.push(report);
    }

    Ok(Report {
        search_range,
        peaks: found.peaks,
        regions: reports,
    })
}

fn run(config_path: &Path, spectrum_path: &Path) -> Result<()> {
    let config = AnalysisConfig::load(config_path)?;
    let spectrum = load_spectrum(spectrum_path)?;
    log::info!(
        "Analysing {} channels from {}",
        spectrum.len(),
        spectrum_path.display()
    );

    let report = analyse(&config, &spectrum)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init(); // Log to stderr (if you run with `RUST_LOG=debug`)

    let args: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    let [config_path, spectrum_path] = args.as_slice() else {
        eprintln!("usage: gauss-algs <config.yaml> <spectrum.json>");
        return ExitCode::from(2);
    };

    match run(config_path, spectrum_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
