use crate::error::{ProcessingError, Result};
use crate::models::{Reading, RowRejection};
use crate::utils::constants::{MAX_VALID_PM25, MIN_VALID_PM25};
use serde::{Deserialize, Serialize};

/// Inclusive range of concentrations treated as physically plausible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidityBounds {
    pub min: f64,
    pub max: f64,
}

impl ValidityBounds {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(ProcessingError::Config(format!(
                "Invalid validity bounds [{}, {}]",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl Default for ValidityBounds {
    fn default() -> Self {
        Self {
            min: MIN_VALID_PM25,
            max: MAX_VALID_PM25,
        }
    }
}

/// The single gate a reading passes before reaching any output.
///
/// Out-of-range values are sensor faults: the reading is dropped, never clamped.
#[derive(Debug, Clone, Default)]
pub struct ReadingValidator {
    bounds: ValidityBounds,
}

impl ReadingValidator {
    pub fn new(bounds: ValidityBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> ValidityBounds {
        self.bounds
    }

    pub fn accepts(&self, reading: &Reading) -> bool {
        self.check(reading).is_ok()
    }

    pub fn check(&self, reading: &Reading) -> std::result::Result<(), RowRejection> {
        if reading.station_id.trim().is_empty() {
            return Err(RowRejection::MissingStation);
        }
        if !self.bounds.contains(reading.concentration) {
            return Err(RowRejection::OutOfRange);
        }
        Ok(())
    }
}
