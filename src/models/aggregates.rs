use serde::{Deserialize, Serialize};

/// One row of the hourly aggregate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyAverage {
    pub station_id: String,
    pub hour: u8,
    pub pm25_avg: f64,
    pub reading_count: u64,
}

/// One row of the percentile aggregate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationPercentile {
    pub station_id: String,
    pub value: f64,
    pub reading_count: u64,
    /// Upper bound on how far the estimate's rank can be from the requested rank.
    pub rank_error_bound: u64,
}

/// Column label for a percentile target, e.g. `pm25_p90` for 0.9.
pub fn percentile_column_name(percentile: f64) -> String {
    let scaled = percentile * 100.0;
    if (scaled - scaled.round()).abs() < 1e-9 {
        format!("pm25_p{}", scaled.round() as u32)
    } else {
        format!("pm25_p{}", scaled.to_string().replace('.', "_"))
    }
}
