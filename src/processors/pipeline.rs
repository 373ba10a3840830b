use crate::config::PipelineConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{RawRow, Reading, RejectionCounts};
use crate::processors::{Aggregator, ReadingValidator, RecordNormalizer, RunReport};
use crate::readers::RecordSource;
use crate::utils::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_PERCENTILE, DEFAULT_RANK_ACCURACY, MIN_PARTITION_SIZE,
};
use crate::utils::progress::ProgressReporter;
use crate::writers::ColumnarSink;
use crossbeam::channel::bounded;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Output of one partition of one batch.
struct PartitionResult {
    readings: Vec<Reading>,
    aggregator: Aggregator,
    rejected: RejectionCounts,
}

/// Runs read → normalize → validate → (cleansed, hourly, percentile).
///
/// The source is read on its own thread and handed over a bounded channel;
/// each batch is split across a rayon pool with one accumulator per
/// partition, and partition results are folded back in input order.
pub struct PipelineDriver {
    normalizer: RecordNormalizer,
    validator: ReadingValidator,
    percentile: f64,
    accuracy: f64,
    max_workers: usize,
    chunk_size: usize,
    cancel: Arc<AtomicBool>,
}

impl PipelineDriver {
    pub fn new(normalizer: RecordNormalizer, validator: ReadingValidator) -> Self {
        Self {
            normalizer,
            validator,
            percentile: DEFAULT_PERCENTILE,
            accuracy: DEFAULT_RANK_ACCURACY,
            max_workers: num_cpus::get(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(config.normalizer()?, config.validator()?)
            .with_max_workers(config.max_workers)
            .with_chunk_size(config.chunk_size)
            .with_percentile(config.percentile, config.accuracy))
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_percentile(mut self, percentile: f64, accuracy: f64) -> Self {
        self.percentile = percentile;
        self.accuracy = accuracy;
        self
    }

    /// Share a flag that aborts the run when set.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Process the whole source and commit all three tables to `sink`.
    ///
    /// On any error, including cancellation, the sink is left uncommitted.
    pub fn run<S, K>(
        &self,
        source: S,
        sink: &mut K,
        progress: Option<&ProgressReporter>,
    ) -> Result<RunReport>
    where
        S: RecordSource + Send,
        K: ColumnarSink,
    {
        let sink: &mut dyn ColumnarSink = sink;
        self.execute(source, Some(sink), progress)
    }

    /// Normalize, validate and aggregate without writing anything.
    pub fn scan<S>(&self, source: S, progress: Option<&ProgressReporter>) -> Result<RunReport>
    where
        S: RecordSource + Send,
    {
        self.execute(source, None, progress)
    }

    fn execute<S>(
        &self,
        mut source: S,
        mut sink: Option<&mut dyn ColumnarSink>,
        progress: Option<&ProgressReporter>,
    ) -> Result<RunReport>
    where
        S: RecordSource + Send,
    {
        let started = Instant::now();
        let mut report = RunReport {
            source: source.describe(),
            percentile: self.percentile,
            ..Default::default()
        };
        info!(
            "Processing {} with {} workers, {} rows per batch",
            report.source, self.max_workers, self.chunk_size
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        let mut aggregator = Aggregator::new(self.percentile, self.accuracy);

        self.drive(&mut source, |index, rows| {
            let partitions = pool.install(|| self.process_batch(&rows));

            for partition in partitions {
                if let Some(sink) = sink.as_deref_mut() {
                    sink.write_cleansed(&partition.readings)?;
                }
                report.accepted += partition.readings.len() as u64;
                report.rejected.merge(&partition.rejected);
                aggregator.merge(partition.aggregator);
            }
            report.rows_read += rows.len() as u64;

            debug!(
                "Batch {}: {} rows, {} accepted so far",
                index,
                rows.len(),
                report.accepted
            );
            if let Some(p) = progress {
                p.increment(rows.len() as u64);
            }
            Ok(())
        })?;

        report.stations = aggregator.station_count();
        report.hourly_groups = aggregator.hourly_group_count();
        report.max_rank_error = aggregator.max_normalized_rank_error();
        let tables = aggregator.finalize();

        if report.rejected_total() > report.accepted {
            warn!(
                "{} of {} rows were rejected",
                report.rejected_total(),
                report.rows_read
            );
        }

        if let Some(sink) = sink {
            sink.write_aggregates(&tables)?;
            report.elapsed_secs = started.elapsed().as_secs_f64();
            report.outputs = sink.commit(&report)?;
        } else {
            report.elapsed_secs = started.elapsed().as_secs_f64();
        }

        info!(
            "Accepted {} of {} rows across {} stations in {:.2}s",
            report.accepted, report.rows_read, report.stations, report.elapsed_secs
        );
        Ok(report)
    }

    /// Pull batches from `source` on a reader thread and hand each one to
    /// `on_batch` in order. Returns `Cancelled` if the flag was raised.
    fn drive<S, F>(&self, source: &mut S, mut on_batch: F) -> Result<()>
    where
        S: RecordSource + Send,
        F: FnMut(usize, Vec<RawRow>) -> Result<()>,
    {
        let (tx, rx) = bounded::<Result<Vec<RawRow>>>(self.max_workers);
        let chunk_size = self.chunk_size;
        let cancel = &self.cancel;

        std::thread::scope(|scope| {
            let reader = scope.spawn(move || {
                while !cancel.load(Ordering::Relaxed) {
                    match source.read_batch(chunk_size) {
                        Ok(rows) if rows.is_empty() => break,
                        Ok(rows) => {
                            if tx.send(Ok(rows)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            });

            let mut outcome = Ok(());
            for (index, batch) in rx.iter().enumerate() {
                if self.is_cancelled() {
                    break;
                }
                if let Err(e) = batch.and_then(|rows| on_batch(index, rows)) {
                    outcome = Err(e);
                    break;
                }
            }
            // Unblocks a reader waiting on a full channel.
            drop(rx);

            if let Err(panic) = reader.join() {
                std::panic::resume_unwind(panic);
            }

            if outcome.is_ok() && self.is_cancelled() {
                warn!("Run cancelled; discarding partial results");
                return Err(ProcessingError::Cancelled);
            }
            outcome
        })
    }

    fn process_batch(&self, rows: &[RawRow]) -> Vec<PartitionResult> {
        let partition_size = rows
            .len()
            .div_ceil(self.max_workers)
            .max(MIN_PARTITION_SIZE);

        rows.par_chunks(partition_size)
            .map(|partition| self.process_partition(partition))
            .collect()
    }

    fn process_partition(&self, rows: &[RawRow]) -> PartitionResult {
        let mut result = PartitionResult {
            readings: Vec::with_capacity(rows.len()),
            aggregator: Aggregator::new(self.percentile, self.accuracy),
            rejected: RejectionCounts::default(),
        };

        for row in rows {
            let checked = self
                .normalizer
                .try_normalize(row)
                .and_then(|reading| self.validator.check(&reading).map(|()| reading));

            match checked {
                Ok(reading) => {
                    result.aggregator.accumulate(&reading);
                    result.readings.push(reading);
                }
                Err(reason) => result.rejected.record(reason),
            }
        }

        result
    }
}

impl Default for PipelineDriver {
    fn default() -> Self {
        Self::new(RecordNormalizer::default(), ReadingValidator::default())
    }
}
