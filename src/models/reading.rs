use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A typed PM2.5 measurement.
///
/// `hour` and `day_of_week` are always derived from `timestamp` in UTC;
/// `day_of_week` counts 1 = Sunday through 7 = Saturday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub concentration: f64,
    pub hour: u8,
    pub day_of_week: u8,
}

impl Reading {
    pub fn new(station_id: impl Into<String>, timestamp: DateTime<Utc>, concentration: f64) -> Self {
        Self {
            station_id: station_id.into(),
            timestamp,
            concentration,
            hour: timestamp.hour() as u8,
            day_of_week: timestamp.weekday().number_from_sunday() as u8,
        }
    }
}
