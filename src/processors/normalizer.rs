use crate::models::{RawRow, Reading, RowRejection};
use crate::processors::TimestampResolver;
use crate::utils::constants::{
    COLUMN_DATETIME, COLUMN_LOCATION, COLUMN_PARAMETER, COLUMN_VALUE, PM25_ALIASES,
};
use std::collections::HashSet;

/// Fold a parameter name for comparison: ASCII case and punctuation are ignored.
pub fn fold_parameter(parameter: &str) -> String {
    parameter
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Turns raw rows into typed readings.
///
/// Pure: a row either yields a [`Reading`] or a [`RowRejection`] saying why not.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    resolver: TimestampResolver,
    aliases: HashSet<String>,
}

impl RecordNormalizer {
    pub fn new<S: AsRef<str>>(resolver: TimestampResolver, aliases: &[S]) -> Self {
        Self {
            resolver,
            aliases: aliases
                .iter()
                .map(|alias| fold_parameter(alias.as_ref()))
                .filter(|alias| !alias.is_empty())
                .collect(),
        }
    }

    pub fn accepts_parameter(&self, parameter: &str) -> bool {
        self.aliases.contains(&fold_parameter(parameter))
    }

    pub fn normalize(&self, row: &RawRow) -> Option<Reading> {
        self.try_normalize(row).ok()
    }

    pub fn try_normalize(&self, row: &RawRow) -> Result<Reading, RowRejection> {
        match row.get(COLUMN_PARAMETER) {
            Some(parameter) if self.accepts_parameter(parameter) => {}
            _ => return Err(RowRejection::ParameterMismatch),
        }

        let station_id = row
            .get(COLUMN_LOCATION)
            .filter(|location| !location.trim().is_empty())
            .ok_or(RowRejection::MissingStation)?;

        let timestamp = row
            .get(COLUMN_DATETIME)
            .and_then(|raw| self.resolver.resolve(raw).ok())
            .ok_or(RowRejection::UnparsableTimestamp)?;

        let concentration = row
            .get(COLUMN_VALUE)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .ok_or(RowRejection::InvalidValue)?;

        Ok(Reading::new(station_id, timestamp, concentration))
    }
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::new(TimestampResolver::default(), &PM25_ALIASES)
    }
}
