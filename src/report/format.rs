//! Formatted terminal output for batch runs.
//!
//! Formatting lives here so that the pipeline code only deals with data and
//! output changes stay localized.

use crate::report::{BatchReport, SpectrumOutcome, SummaryRow};

/// Batch header plus one line per spectrum.
pub fn format_batch_report(report: &BatchReport) -> String {
    let mut out = String::new();

    out.push_str("=== specfit - batch kinematics ===\n");
    out.push_str(&format!("Fit dir: {}\n", report.fit_dir.display()));
    out.push_str(&format!(
        "Spectra: n={} | fitted={} | skipped={} | failed={}\n",
        report.outcomes.len(),
        report.fitted(),
        report.skipped(),
        report.failed()
    ));

    if !report.outcomes.is_empty() {
        out.push('\n');
    }
    for o in &report.outcomes {
        let line = match o {
            SpectrumOutcome::Fitted { name, v, sigma, sn } => {
                format!("  {:<24} V={v:>9.1} σ={sigma:>7.1} S/N={}", truncate(name, 24), fmt_sn(*sn))
            }
            SpectrumOutcome::Skipped { name } => format!("  {:<24} (exists, skipped)", truncate(name, 24)),
            SpectrumOutcome::Failed { name, reason } => format!("  {:<24} FAILED: {reason}", truncate(name, 24)),
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }

    if let Some(path) = &report.summary {
        out.push_str(&format!("\nSummary: {}\n", path.display()));
    }
    out
}

/// Fixed-width rendering of summary rows.
pub fn format_summary_table(rows: &[SummaryRow]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<24} {:>9} {:>7} {:>8} {:>7} {:>7} {:>7} {:>8} {:>8}\n",
            "spec", "v", "verr", "sigma", "sigerr", "h3", "h4", "chi2", "snr"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<24} {:-<9} {:-<7} {:-<8} {:-<7} {:-<7} {:-<7} {:-<8} {:-<8}\n",
            "", "", "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in rows {
        out.push_str(
            format!(
                "{:<24} {:>9.1} {:>7.1} {:>8.1} {:>7.1} {:>7} {:>7} {:>8.3} {:>8}\n",
                truncate(&r.spec, 24),
                r.v,
                r.verr,
                r.sigma,
                r.sigmaerr,
                fmt_opt(r.h3),
                fmt_opt(r.h4),
                r.chi2,
                fmt_sn(r.snr),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.3}")).unwrap_or_else(|| "-".to_string())
}

fn fmt_sn(sn: f64) -> String {
    if sn.is_infinite() { "inf".to_string() } else { format!("{sn:.1}") }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn report_lists_every_outcome() {
        let report = BatchReport {
            fit_dir: PathBuf::from("/data/ppxf_vel30_w4700_5500_sn250"),
            outcomes: vec![
                SpectrumOutcome::Fitted { name: "sn250_0001".into(), v: 1520.25, sigma: 210.0, sn: f64::INFINITY },
                SpectrumOutcome::Failed { name: "sn250_0002".into(), reason: "empty spectrum".into() },
            ],
            summary: Some(PathBuf::from("/data/summary.csv")),
        };
        let text = format_batch_report(&report);
        assert!(text.contains("fitted=1 | skipped=0 | failed=1"));
        assert!(text.contains("S/N=inf"));
        assert!(text.contains("FAILED: empty spectrum"));
        assert!(text.ends_with("Summary: /data/summary.csv\n"));
    }

    #[test]
    fn summary_table_marks_missing_moments() {
        let row = SummaryRow {
            spec: "a_very_long_spectrum_name_that_overflows".into(),
            v: 10.0,
            verr: 1.0,
            sigma: 90.0,
            sigmaerr: 2.0,
            h3: None,
            h3err: None,
            h4: Some(0.05),
            h4err: Some(0.01),
            chi2: 1.0,
            snr: 45.0,
            adegree: 12,
            mdegree: 0,
        };
        let text = format_summary_table(&[row]);
        let line = text.lines().nth(2).unwrap();
        assert!(line.starts_with("a_very_long_spectrum_na."));
        assert!(line.contains(" - "));
        assert!(line.contains("0.050"));
    }
}
