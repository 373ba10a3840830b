use crate::models::{RejectionCounts, RowRejection};
use serde::Serialize;
use std::path::PathBuf;

/// Counts and outcome of one pipeline run. Serialized as the run manifest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub source: String,
    pub rows_read: u64,
    pub accepted: u64,
    pub rejected: RejectionCounts,
    pub stations: usize,
    pub hourly_groups: usize,
    pub percentile: f64,
    /// Largest per-station rank-error bound, as a fraction of that station's readings.
    pub max_rank_error: f64,
    pub elapsed_secs: f64,
    pub outputs: Vec<PathBuf>,
}

impl RunReport {
    pub fn rejected_total(&self) -> u64 {
        self.rejected.total()
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.rows_read == 0 {
            0.0
        } else {
            100.0 * self.accepted as f64 / self.rows_read as f64
        }
    }

    pub fn generate_summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str("=== PM2.5 Processing Report ===\n");
        summary.push_str(&format!("Source: {}\n", self.source));
        summary.push_str(&format!("Rows Read: {}\n", self.rows_read));
        summary.push_str(&format!(
            "Accepted Readings: {} ({:.1}%)\n",
            self.accepted,
            self.acceptance_rate()
        ));
        summary.push_str(&format!("Rejected Rows: {}\n", self.rejected_total()));

        for (reason, count) in self.rejected.iter() {
            if count > 0 {
                summary.push_str(&format!("  - {}: {}\n", describe(reason), count));
            }
        }

        if self.stations > 0 {
            summary.push_str(&format!("\nStations: {}\n", self.stations));
            summary.push_str(&format!("Station-hour groups: {}\n", self.hourly_groups));
            summary.push_str(&format!(
                "p{:.0} rank error bound: {:.3}%\n",
                self.percentile * 100.0,
                self.max_rank_error * 100.0
            ));
        }

        summary.push_str(&format!("Elapsed: {:.2}s\n", self.elapsed_secs));

        if !self.outputs.is_empty() {
            summary.push_str("\nOutputs:\n");
            for path in &self.outputs {
                summary.push_str(&format!("  {}\n", path.display()));
            }
        }

        summary
    }
}

fn describe(reason: RowRejection) -> &'static str {
    match reason {
        RowRejection::ParameterMismatch => "Other parameters",
        RowRejection::MissingStation => "Missing location",
        RowRejection::UnparsableTimestamp => "Unparsable datetime",
        RowRejection::InvalidValue => "Non-numeric value",
        RowRejection::OutOfRange => "Out of range value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lists_only_nonzero_reasons() {
        let mut rejected = RejectionCounts::default();
        rejected.record(RowRejection::ParameterMismatch);
        rejected.record(RowRejection::OutOfRange);

        let report = RunReport {
            source: "input.csv".to_string(),
            rows_read: 4,
            accepted: 2,
            rejected,
            stations: 1,
            hourly_groups: 1,
            percentile: 0.9,
            ..Default::default()
        };

        let summary = report.generate_summary();
        assert!(summary.contains("Accepted Readings: 2 (50.0%)"));
        assert!(summary.contains("Other parameters: 1"));
        assert!(summary.contains("Out of range value: 1"));
        assert!(!summary.contains("Non-numeric value"));
        assert!(summary.contains("p90 rank error bound"));
    }

    #[test]
    fn test_empty_run() {
        let report = RunReport::default();

        assert_eq!(report.acceptance_rate(), 0.0);
        assert_eq!(report.rejected_total(), 0);
        assert!(!report.generate_summary().contains("Stations"));
    }
}
