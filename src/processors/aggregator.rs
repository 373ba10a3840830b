use crate::models::{HourlyAverage, Reading, StationPercentile};
use crate::processors::quantile_sketch::{capacity_for_accuracy, QuantileSketch};
use crate::utils::constants::{DEFAULT_PERCENTILE, DEFAULT_RANK_ACCURACY};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

const HOURS_PER_DAY: usize = 24;

/// Count and sum of one group. Merging is plain addition, so any split of the
/// input merges back to the same mean up to floating-point summation order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    pub count: u64,
    pub sum: f64,
}

impl RunningMean {
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
    }

    pub fn merge(&mut self, other: &RunningMean) {
        self.count += other.count;
        self.sum += other.sum;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Finalized aggregate tables, sorted by group key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateTables {
    pub percentile: f64,
    pub hourly: Vec<HourlyAverage>,
    pub percentiles: Vec<StationPercentile>,
}

/// Accumulates the hourly means and per-station percentile sketches.
///
/// Each worker owns its own `Aggregator`; partial aggregators are combined with
/// [`merge`](Self::merge).
#[derive(Debug, Clone)]
pub struct Aggregator {
    percentile: f64,
    sketch_capacity: usize,
    hourly: HashMap<String, [RunningMean; HOURS_PER_DAY]>,
    sketches: HashMap<String, QuantileSketch>,
}

impl Aggregator {
    pub fn new(percentile: f64, accuracy: f64) -> Self {
        Self {
            percentile,
            sketch_capacity: capacity_for_accuracy(accuracy),
            hourly: HashMap::new(),
            sketches: HashMap::new(),
        }
    }

    pub fn percentile(&self) -> f64 {
        self.percentile
    }

    pub fn station_count(&self) -> usize {
        self.sketches.len()
    }

    pub fn hourly_group_count(&self) -> usize {
        self.hourly
            .values()
            .map(|hours| hours.iter().filter(|m| m.count > 0).count())
            .sum()
    }

    /// Largest rank-error bound of any station, as a fraction of its count.
    pub fn max_normalized_rank_error(&self) -> f64 {
        self.sketches
            .values()
            .map(QuantileSketch::normalized_rank_error)
            .fold(0.0, f64::max)
    }

    pub fn accumulate(&mut self, reading: &Reading) {
        let hour = usize::from(reading.hour).min(HOURS_PER_DAY - 1);
        match self.hourly.get_mut(reading.station_id.as_str()) {
            Some(hours) => hours[hour].add(reading.concentration),
            None => {
                let mut hours = [RunningMean::default(); HOURS_PER_DAY];
                hours[hour].add(reading.concentration);
                self.hourly.insert(reading.station_id.clone(), hours);
            }
        }

        match self.sketches.get_mut(reading.station_id.as_str()) {
            Some(sketch) => sketch.insert(reading.concentration),
            None => {
                let mut sketch = QuantileSketch::with_capacity(self.sketch_capacity);
                sketch.insert(reading.concentration);
                self.sketches.insert(reading.station_id.clone(), sketch);
            }
        }
    }

    pub fn merge(&mut self, other: Aggregator) {
        for (station_id, hours) in other.hourly {
            match self.hourly.entry(station_id) {
                Entry::Occupied(mut entry) => {
                    for (mine, theirs) in entry.get_mut().iter_mut().zip(hours.iter()) {
                        mine.merge(theirs);
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(hours);
                }
            }
        }

        for (station_id, sketch) in other.sketches {
            match self.sketches.entry(station_id) {
                Entry::Occupied(mut entry) => entry.get_mut().merge(&sketch),
                Entry::Vacant(entry) => {
                    entry.insert(sketch);
                }
            }
        }
    }

    pub fn finalize(self) -> AggregateTables {
        let mut hourly: Vec<HourlyAverage> = self
            .hourly
            .iter()
            .flat_map(|(station_id, hours)| {
                hours.iter().enumerate().filter_map(move |(hour, running)| {
                    running.mean().map(|pm25_avg| HourlyAverage {
                        station_id: station_id.clone(),
                        hour: hour as u8,
                        pm25_avg,
                        reading_count: running.count,
                    })
                })
            })
            .collect();
        hourly.sort_by(|a, b| {
            a.station_id
                .cmp(&b.station_id)
                .then_with(|| a.hour.cmp(&b.hour))
        });

        let percentile = self.percentile;
        let mut percentiles: Vec<StationPercentile> = self
            .sketches
            .iter()
            .filter_map(|(station_id, sketch)| {
                sketch.quantile(percentile).map(|value| StationPercentile {
                    station_id: station_id.clone(),
                    value,
                    reading_count: sketch.count(),
                    rank_error_bound: sketch.rank_error_bound(),
                })
            })
            .collect();
        percentiles.sort_by(|a, b| a.station_id.cmp(&b.station_id));

        AggregateTables {
            percentile,
            hourly,
            percentiles,
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_PERCENTILE, DEFAULT_RANK_ACCURACY)
    }
}
