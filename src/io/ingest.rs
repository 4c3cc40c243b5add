//! Spectrum CSV ingest and cleaning.
//!
//! This module turns a per-bin spectrum table (`WAVE`, `FLUX`, `FLUX_ERR`) into
//! a clean [`Spectrum`] that is safe to rebin and fit.
//!
//! Design goals:
//! - **Strict schema**: missing columns or unparsable values are data errors,
//!   since a dropped row would break the alignment of the three arrays
//! - **Deterministic cleaning**: border trimming, uncertainty repair and
//!   template-range restriction always happen in that order
//! - **Separation of concerns**: no rebinning or fitting logic here

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{MIN_SPECTRUM_SAMPLES, Spectrum, WaveUnit};
use crate::error::AppError;
use crate::io::atomic::write_atomic;

const COL_WAVE: &str = "wave";
const COL_FLUX: &str = "flux";
const COL_FLUX_ERR: &str = "flux_err";

/// Read a spectrum table, converting wavelengths from `unit` to angstrom.
///
/// The spectrum is named after the file stem.
pub fn read_spectrum_csv(path: &Path, unit: WaveUnit) -> Result<Spectrum, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open spectrum '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::data(format!("Failed to read headers of '{}': {e}", path.display())))?
        .clone();
    let header_map = build_header_map(&headers);

    let idx_wave = column(&header_map, COL_WAVE, path)?;
    let idx_flux = column(&header_map, COL_FLUX, path)?;
    let idx_err = column(&header_map, COL_FLUX_ERR, path)?;

    let scale = unit.to_angstrom();
    let mut wave = Vec::new();
    let mut flux = Vec::new();
    let mut flux_err = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        // +2: records start after the header line, and lines are 1-based.
        let line = idx + 2;
        let record = result.map_err(|e| {
            AppError::data(format!("CSV parse error in '{}' line {line}: {e}", path.display()))
        })?;
        wave.push(parse_value(&record, idx_wave, COL_WAVE, line)? * scale);
        flux.push(parse_value(&record, idx_flux, COL_FLUX, line)?);
        flux_err.push(parse_value(&record, idx_err, COL_FLUX_ERR, line)?);
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("spectrum")
        .to_string();

    Ok(Spectrum {
        name,
        wave,
        flux,
        flux_err,
    })
}

/// Write a spectrum table with wavelengths expressed in `unit`.
pub fn write_spectrum_csv(path: &Path, spec: &Spectrum, unit: WaveUnit) -> Result<(), AppError> {
    let scale = unit.to_angstrom();
    write_atomic(path, |w| {
        let mut writer = csv::Writer::from_writer(w);
        writer
            .write_record(["WAVE", "FLUX", "FLUX_ERR"])
            .map_err(|e| AppError::io(format!("Failed to write spectrum header: {e}")))?;
        for i in 0..spec.len() {
            writer
                .write_record([
                    (spec.wave[i] / scale).to_string(),
                    spec.flux[i].to_string(),
                    spec.flux_err[i].to_string(),
                ])
                .map_err(|e| AppError::io(format!("Failed to write spectrum row: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| AppError::io(format!("Failed to write spectrum '{}': {e}", path.display())))
    })
}

/// Clean a raw spectrum and restrict it to the template coverage.
///
/// - drop leading/trailing zero-flux samples
/// - replace zero uncertainties by the largest uncertainty
/// - keep only `template_range.0 < λ < template_range.1`
pub fn prepare_spectrum(raw: Spectrum, template_range: (f64, f64)) -> Result<Spectrum, AppError> {
    if raw.flux.len() != raw.wave.len() || raw.flux_err.len() != raw.wave.len() {
        return Err(AppError::data(format!(
            "Spectrum '{}' has misaligned columns (wave={}, flux={}, flux_err={}).",
            raw.name,
            raw.wave.len(),
            raw.flux.len(),
            raw.flux_err.len()
        )));
    }
    if raw.wave.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(AppError::data(format!(
            "Spectrum '{}' wavelengths are not strictly increasing.",
            raw.name
        )));
    }

    let mut spec = trim_zero_borders(raw);
    repair_uncertainties(&mut spec)?;

    let (lo, hi) = template_range;
    let keep: Vec<usize> = (0..spec.len())
        .filter(|&i| spec.wave[i] > lo && spec.wave[i] < hi)
        .collect();
    let spec = Spectrum {
        name: spec.name,
        wave: keep.iter().map(|&i| spec.wave[i]).collect(),
        flux: keep.iter().map(|&i| spec.flux[i]).collect(),
        flux_err: keep.iter().map(|&i| spec.flux_err[i]).collect(),
    };

    if spec.len() < MIN_SPECTRUM_SAMPLES {
        return Err(AppError::data(format!(
            "Spectrum '{}' keeps only {} samples inside the template range [{lo:.1}, {hi:.1}] Å (minimum {}).",
            spec.name,
            spec.len(),
            MIN_SPECTRUM_SAMPLES
        )));
    }
    Ok(spec)
}

/// Drop zero-flux samples at both ends of the spectrum.
pub fn trim_zero_borders(spec: Spectrum) -> Spectrum {
    let first = spec.flux.iter().position(|&f| f != 0.0);
    let last = spec.flux.iter().rposition(|&f| f != 0.0);
    let (start, end) = match (first, last) {
        (Some(a), Some(b)) => (a, b + 1),
        _ => (0, 0),
    };
    Spectrum {
        name: spec.name,
        wave: spec.wave[start..end].to_vec(),
        flux: spec.flux[start..end].to_vec(),
        flux_err: spec.flux_err[start..end].to_vec(),
    }
}

/// Replace zero uncertainties with the maximum one (avoids infinite weights).
pub fn repair_uncertainties(spec: &mut Spectrum) -> Result<(), AppError> {
    if spec.flux_err.iter().any(|e| *e < 0.0) {
        return Err(AppError::data(format!(
            "Spectrum '{}' has negative uncertainties.",
            spec.name
        )));
    }
    let max = spec
        .flux_err
        .iter()
        .copied()
        .filter(|e| e.is_finite())
        .fold(0.0, f64::max);
    if spec.is_empty() {
        return Ok(());
    }
    if max <= 0.0 {
        return Err(AppError::data(format!(
            "Spectrum '{}' has no non-zero uncertainty.",
            spec.name
        )));
    }
    for e in spec.flux_err.iter_mut() {
        if *e == 0.0 {
            *e = max;
        }
    }
    Ok(())
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Strip a UTF-8 BOM some exporters put on the first header.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn column(header_map: &HashMap<String, usize>, name: &str, path: &Path) -> Result<usize, AppError> {
    header_map.get(name).copied().ok_or_else(|| {
        AppError::data(format!(
            "Missing required column `{}` in '{}'.",
            name.to_ascii_uppercase(),
            path.display()
        ))
    })
}

fn parse_value(record: &StringRecord, idx: usize, name: &str, line: usize) -> Result<f64, AppError> {
    let raw = record
        .get(idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::data(format!("Line {line}: missing value for `{name}`.")))?;
    raw.parse::<f64>()
        .map_err(|_| AppError::data(format!("Line {line}: invalid number '{raw}' for `{name}`.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spectrum(wave: Vec<f64>, flux: Vec<f64>, flux_err: Vec<f64>) -> Spectrum {
        Spectrum {
            name: "bin".to_string(),
            wave,
            flux,
            flux_err,
        }
    }

    #[test]
    fn reads_micrometer_table_with_bom_and_mixed_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin0001.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "\u{feff}Wave,FLUX,flux_err").unwrap();
        writeln!(f, "0.85,1.0,0.1").unwrap();
        writeln!(f, "0.86,NaN,0.2").unwrap();
        drop(f);

        let spec = read_spectrum_csv(&path, WaveUnit::Micrometer).unwrap();
        assert_eq!(spec.name, "bin0001");
        assert_eq!(spec.wave, vec![8500.0, 8600.0]);
        assert!(spec.flux[1].is_nan());
        assert_eq!(spec.flux_err, vec![0.1, 0.2]);
    }

    #[test]
    fn missing_column_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.csv");
        std::fs::write(&path, "WAVE,FLUX\n1,2\n").unwrap();
        let err = read_spectrum_csv(&path, WaveUnit::Angstrom).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_spectrum_csv(Path::new("/nonexistent/spec.csv"), WaveUnit::Angstrom).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn trims_zero_borders_but_keeps_interior_zeros() {
        let s = spectrum(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            vec![0.0, 0.0, 1.0, 0.0, 2.0, 0.0],
            vec![1.0; 6],
        );
        let t = trim_zero_borders(s);
        assert_eq!(t.wave, vec![3.0, 4.0, 5.0]);
        assert_eq!(t.flux, vec![1.0, 0.0, 2.0]);
    }

    #[test]
    fn zero_uncertainties_become_the_maximum() {
        let mut s = spectrum(vec![1.0, 2.0, 3.0], vec![1.0; 3], vec![0.0, 0.5, 0.2]);
        repair_uncertainties(&mut s).unwrap();
        assert_eq!(s.flux_err, vec![0.5, 0.5, 0.2]);
    }

    #[test]
    fn prepare_restricts_to_open_template_range() {
        let wave: Vec<f64> = (0..40).map(|i| 5000.0 + i as f64).collect();
        let s = spectrum(wave, vec![1.0; 40], vec![0.1; 40]);
        let out = prepare_spectrum(s, (5005.0, 5030.0)).unwrap();
        assert_eq!(out.wave.first(), Some(&5006.0));
        assert_eq!(out.wave.last(), Some(&5029.0));
        assert_eq!(out.len(), 24);
    }

    #[test]
    fn prepare_rejects_spectra_that_become_too_short() {
        let wave: Vec<f64> = (0..40).map(|i| 5000.0 + i as f64).collect();
        let mut flux = vec![0.0; 40];
        for f in flux.iter_mut().skip(10).take(5) {
            *f = 1.0;
        }
        let s = spectrum(wave, flux, vec![0.1; 40]);
        let err = prepare_spectrum(s, (0.0, 1.0e6)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
    }

    #[test]
    fn written_table_reads_back_in_the_same_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim_0003.csv");
        let s = spectrum(vec![5000.0, 5000.5, 5001.0], vec![1.0, 0.9, 1.1], vec![0.01; 3]);
        write_spectrum_csv(&path, &s, WaveUnit::Nanometer).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("WAVE,FLUX,FLUX_ERR"));
        let back = read_spectrum_csv(&path, WaveUnit::Nanometer).unwrap();
        assert_eq!(back.name, "sim_0003");
        for (a, b) in back.wave.iter().zip(&s.wave) {
            assert!((a - b).abs() < 1e-9);
        }
        assert_eq!(back.flux, s.flux);
    }
}
