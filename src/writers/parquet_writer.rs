use crate::error::{ProcessingError, Result};
use crate::models::{percentile_column_name, HourlyAverage, Reading, StationPercentile};
use crate::processors::{AggregateTables, RunReport};
use crate::utils::constants::{
    COMPRESSION_GZIP, COMPRESSION_LZ4, COMPRESSION_NONE, COMPRESSION_SNAPPY, COMPRESSION_ZSTD,
    DEFAULT_PERCENTILE, DEFAULT_ROW_GROUP_SIZE, RUN_SUMMARY_FILE,
};
use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub fn parse_compression(compression: &str) -> Result<Compression> {
    Ok(match compression.to_lowercase().as_str() {
        COMPRESSION_SNAPPY => Compression::SNAPPY,
        COMPRESSION_GZIP => Compression::GZIP(GzipLevel::default()),
        COMPRESSION_LZ4 => Compression::LZ4,
        COMPRESSION_ZSTD => Compression::ZSTD(ZstdLevel::default()),
        COMPRESSION_NONE => Compression::UNCOMPRESSED,
        _ => {
            return Err(ProcessingError::Config(format!(
                "Unsupported compression: {}",
                compression
            )))
        }
    })
}

/// Schemas, batch conversion and file handling for the three output tables.
#[derive(Debug, Clone)]
pub struct ParquetWriter {
    compression: Compression,
    row_group_size: usize,
    percentile: f64,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            percentile: DEFAULT_PERCENTILE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = parse_compression(compression)?;
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size.max(1);
        self
    }

    /// Percentile the aggregate table reports; decides its column name.
    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = percentile;
        self
    }

    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build()
    }

    pub fn cleansed_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("station_id", DataType::Utf8, false),
            Field::new(
                "timestamp",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("pm25", DataType::Float64, false),
            Field::new("hour", DataType::Int32, false),
            Field::new("dow", DataType::Int32, false),
        ]))
    }

    pub fn hourly_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("station_id", DataType::Utf8, false),
            Field::new("hour", DataType::Int32, false),
            Field::new("pm25_avg", DataType::Float64, false),
        ]))
    }

    pub fn percentile_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("station_id", DataType::Utf8, false),
            Field::new(percentile_column_name(self.percentile), DataType::Float64, false),
        ]))
    }

    pub fn readings_to_batch(&self, readings: &[Reading]) -> Result<RecordBatch> {
        let station_ids: Vec<&str> = readings.iter().map(|r| r.station_id.as_str()).collect();
        let timestamps: Vec<i64> = readings.iter().map(|r| r.timestamp.timestamp_micros()).collect();
        let values: Vec<f64> = readings.iter().map(|r| r.concentration).collect();
        let hours: Vec<i32> = readings.iter().map(|r| i32::from(r.hour)).collect();
        let days: Vec<i32> = readings.iter().map(|r| i32::from(r.day_of_week)).collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(station_ids)),
            Arc::new(TimestampMicrosecondArray::from(timestamps).with_timezone("UTC")),
            Arc::new(Float64Array::from(values)),
            Arc::new(Int32Array::from(hours)),
            Arc::new(Int32Array::from(days)),
        ];

        Ok(RecordBatch::try_new(self.cleansed_schema(), columns)?)
    }

    pub fn hourly_to_batch(&self, rows: &[HourlyAverage]) -> Result<RecordBatch> {
        let station_ids: Vec<&str> = rows.iter().map(|r| r.station_id.as_str()).collect();
        let hours: Vec<i32> = rows.iter().map(|r| i32::from(r.hour)).collect();
        let averages: Vec<f64> = rows.iter().map(|r| r.pm25_avg).collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(station_ids)),
            Arc::new(Int32Array::from(hours)),
            Arc::new(Float64Array::from(averages)),
        ];

        Ok(RecordBatch::try_new(self.hourly_schema(), columns)?)
    }

    pub fn percentiles_to_batch(&self, rows: &[StationPercentile]) -> Result<RecordBatch> {
        let station_ids: Vec<&str> = rows.iter().map(|r| r.station_id.as_str()).collect();
        let values: Vec<f64> = rows.iter().map(|r| r.value).collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(station_ids)),
            Arc::new(Float64Array::from(values)),
        ];

        Ok(RecordBatch::try_new(self.percentile_schema(), columns)?)
    }

    /// Open a table that is written to a temporary file beside `target` and
    /// only appears at `target` once published.
    pub fn stage(&self, target: &Path, schema: Arc<Schema>) -> Result<StagedTable> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| ProcessingError::sink_write(target, e))?;

        let temp = NamedTempFile::new_in(&dir).map_err(|e| ProcessingError::sink_write(target, e))?;
        let writer = ArrowWriter::try_new(temp, schema, Some(self.properties()))
            .map_err(|e| ProcessingError::sink_write(target, e))?;

        Ok(StagedTable {
            target: target.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    /// Write a whole table to `path` in one go.
    pub fn write_batch(&self, batch: &RecordBatch, path: &Path) -> Result<()> {
        let mut table = self.stage(path, batch.schema())?;
        table.write(batch)?;
        table.finish()?.publish()?;
        Ok(())
    }

    /// Read up to `limit` rows back (0 = all).
    pub fn read_batches(&self, path: &Path, limit: usize) -> Result<Vec<RecordBatch>> {
        let file = File::open(path)?;
        let batch_size = if limit == 0 { 8192 } else { limit.min(8192) };
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(batch_size)
            .build()?;

        let mut batches = Vec::new();
        let mut total = 0;
        for batch in reader {
            let batch = batch?;
            if limit > 0 && total + batch.num_rows() >= limit {
                batches.push(batch.slice(0, limit - total));
                break;
            }
            total += batch.num_rows();
            batches.push(batch);
        }

        Ok(batches)
    }

    /// Get file statistics
    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let file_metadata = metadata.file_metadata();
        let row_groups = metadata.num_row_groups();
        let total_rows = file_metadata.num_rows();
        let file_size = std::fs::metadata(path)?.len();

        let mut row_group_sizes = Vec::new();
        let mut compression = self.compression;
        for i in 0..row_groups {
            let rg_metadata = metadata.row_group(i);
            row_group_sizes.push(rg_metadata.num_rows());
            if i == 0 && rg_metadata.num_columns() > 0 {
                compression = rg_metadata.column(0).compression();
            }
        }

        let columns = file_metadata
            .schema_descr()
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        Ok(ParquetFileInfo {
            total_rows,
            row_groups: row_groups as i32,
            row_group_sizes,
            file_size,
            compression,
            columns,
        })
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// A table being written to a temporary file.
pub struct StagedTable {
    target: PathBuf,
    writer: ArrowWriter<NamedTempFile>,
    rows: usize,
}

impl StagedTable {
    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.writer
            .write(batch)
            .map_err(|e| ProcessingError::sink_write(&self.target, e))?;
        self.rows += batch.num_rows();
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Write the footer. The file stays temporary until [`StagedFile::publish`].
    pub fn finish(self) -> Result<StagedFile> {
        let temp = self
            .writer
            .into_inner()
            .map_err(|e| ProcessingError::sink_write(&self.target, e))?;
        Ok(StagedFile {
            temp,
            target: self.target,
            rows: self.rows,
        })
    }
}

/// A complete temporary file waiting to replace its target.
#[derive(Debug)]
pub struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
    rows: usize,
}

impl StagedFile {
    pub fn write_json<T: serde::Serialize>(target: &Path, value: &T) -> Result<Self> {
        let dir = target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| ProcessingError::sink_write(target, e))?;

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| ProcessingError::sink_write(target, e))?;
        serde_json::to_writer_pretty(temp.as_file_mut(), value)
            .map_err(|e| ProcessingError::sink_write(target, e))?;
        temp.as_file_mut()
            .flush()
            .map_err(|e| ProcessingError::sink_write(target, e))?;

        Ok(Self {
            temp,
            target: target.to_path_buf(),
            rows: 0,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Fail early when the target cannot be replaced by a rename.
    pub fn check_target(&self) -> Result<()> {
        if self.target.is_dir() {
            return Err(ProcessingError::sink_write(
                &self.target,
                "target exists and is a directory",
            ));
        }
        Ok(())
    }

    /// Atomically replace the target with the staged file.
    pub fn publish(self) -> Result<PathBuf> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| ProcessingError::sink_write(&target, e.error))?;
        Ok(target)
    }
}

/// Destination for the three output tables of a run.
///
/// Nothing written through a sink is visible until [`commit`](Self::commit)
/// succeeds; dropping an uncommitted sink discards everything staged.
pub trait ColumnarSink {
    fn write_cleansed(&mut self, readings: &[Reading]) -> Result<()>;
    fn write_aggregates(&mut self, tables: &AggregateTables) -> Result<()>;
    fn commit(&mut self, report: &RunReport) -> Result<Vec<PathBuf>>;
}

/// Output locations of the three tables.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutputPaths {
    pub cleansed: PathBuf,
    pub hourly: PathBuf,
    pub percentiles: PathBuf,
}

impl OutputPaths {
    pub fn in_dir(dir: &Path) -> Self {
        use crate::utils::constants::{CLEANSED_FILE, HOURLY_FILE, PERCENTILES_FILE};
        Self {
            cleansed: dir.join(CLEANSED_FILE),
            hourly: dir.join(HOURLY_FILE),
            percentiles: dir.join(PERCENTILES_FILE),
        }
    }

    /// The run manifest lives next to the cleansed table.
    pub fn summary(&self) -> PathBuf {
        match self.cleansed.parent() {
            Some(parent) => parent.join(RUN_SUMMARY_FILE),
            None => PathBuf::from(RUN_SUMMARY_FILE),
        }
    }
}

/// Parquet implementation of [`ColumnarSink`].
pub struct ParquetSink {
    writer: ParquetWriter,
    paths: OutputPaths,
    cleansed: Option<StagedTable>,
    aggregates: Vec<StagedFile>,
}

impl ParquetSink {
    pub fn create(writer: ParquetWriter, paths: OutputPaths) -> Result<Self> {
        let cleansed = writer.stage(&paths.cleansed, writer.cleansed_schema())?;
        Ok(Self {
            writer,
            paths,
            cleansed: Some(cleansed),
            aggregates: Vec::new(),
        })
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }
}

impl ColumnarSink for ParquetSink {
    fn write_cleansed(&mut self, readings: &[Reading]) -> Result<()> {
        if readings.is_empty() {
            return Ok(());
        }
        let batch = self.writer.readings_to_batch(readings)?;
        let table = self.cleansed.as_mut().ok_or_else(|| {
            ProcessingError::sink_write(&self.paths.cleansed, "cleansed table already committed")
        })?;
        table.write(&batch)
    }

    fn write_aggregates(&mut self, tables: &AggregateTables) -> Result<()> {
        let writer = self.writer.clone().with_percentile(tables.percentile);

        let mut hourly = writer.stage(&self.paths.hourly, writer.hourly_schema())?;
        hourly.write(&writer.hourly_to_batch(&tables.hourly)?)?;

        let mut percentiles = writer.stage(&self.paths.percentiles, writer.percentile_schema())?;
        percentiles.write(&writer.percentiles_to_batch(&tables.percentiles)?)?;

        self.aggregates = vec![hourly.finish()?, percentiles.finish()?];
        debug!(
            "Staged {} hourly rows and {} percentile rows",
            tables.hourly.len(),
            tables.percentiles.len()
        );
        Ok(())
    }

    fn commit(&mut self, report: &RunReport) -> Result<Vec<PathBuf>> {
        let cleansed = self.cleansed.take().ok_or_else(|| {
            ProcessingError::sink_write(&self.paths.cleansed, "cleansed table already committed")
        })?;
        if self.aggregates.len() != 2 {
            return Err(ProcessingError::sink_write(
                &self.paths.hourly,
                "aggregate tables were never written",
            ));
        }

        // Stage everything before publishing anything.
        let mut staged = vec![cleansed.finish()?];
        staged.append(&mut self.aggregates);

        // A manifest only ever sits next to a complete set of tables.
        let summary_path = self.paths.summary();
        match std::fs::remove_file(&summary_path) {
            Ok(()) => debug!("Removed previous manifest {}", summary_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ProcessingError::sink_write(&summary_path, e)),
        }
        for file in &staged {
            file.check_target()?;
        }

        let mut published = Vec::with_capacity(staged.len() + 1);
        for file in staged {
            let rows = file.rows();
            let path = file.publish()?;
            info!("Wrote {} rows to {}", rows, path.display());
            published.push(path);
        }

        let mut manifest = report.clone();
        manifest.outputs = published.clone();
        let summary = StagedFile::write_json(&summary_path, &manifest)?.publish()?;
        published.push(summary);

        Ok(published)
    }
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: i32,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Compression,
    pub columns: Vec<String>,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        let avg_rows = if self.row_groups > 0 {
            self.total_rows as f64 / self.row_groups as f64
        } else {
            0.0
        };
        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}\n\
            - Avg rows per group: {:.0}\n\
            - Columns: {}",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0, // Convert to MB
            self.compression,
            avg_rows,
            self.columns.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn sample_readings() -> Vec<Reading> {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        vec![Reading::new("S1", ts, 10.0), Reading::new("S2", ts, 20.0)]
    }

    fn sample_tables() -> AggregateTables {
        AggregateTables {
            percentile: 0.9,
            hourly: vec![HourlyAverage {
                station_id: "S1".to_string(),
                hour: 0,
                pm25_avg: 15.0,
                reading_count: 2,
            }],
            percentiles: vec![StationPercentile {
                station_id: "S1".to_string(),
                value: 19.0,
                reading_count: 2,
                rank_error_bound: 0,
            }],
        }
    }

    #[test]
    fn test_cleansed_batch_layout() -> Result<()> {
        let writer = ParquetWriter::new();
        let batch = writer.readings_to_batch(&sample_readings())?;

        assert_eq!(batch.num_rows(), 2);
        let names: Vec<String> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, vec!["station_id", "timestamp", "pm25", "hour", "dow"]);

        let dow = batch.column(4).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(dow.value(0), 2);
        Ok(())
    }

    #[test]
    fn test_percentile_column_follows_target() {
        let writer = ParquetWriter::new().with_percentile(0.5);
        assert_eq!(writer.percentile_schema().field(1).name(), "pm25_p50");
        assert_eq!(ParquetWriter::new().percentile_schema().field(1).name(), "pm25_p90");
    }

    #[test]
    fn test_different_compressions() -> Result<()> {
        let dir = TempDir::new()?;

        for compression in ["snappy", "gzip", "lz4", "zstd", "none"] {
            let writer = ParquetWriter::new().with_compression(compression)?;
            let path = dir.path().join(format!("{}.parquet", compression));
            let batch = writer.readings_to_batch(&sample_readings())?;

            writer.write_batch(&batch, &path)?;
            assert_eq!(writer.get_file_info(&path)?.total_rows, 2, "{}", compression);
        }

        assert!(ParquetWriter::new().with_compression("brotli-9000").is_err());
        Ok(())
    }

    #[test]
    fn test_sink_publishes_only_on_commit() -> Result<()> {
        let dir = TempDir::new()?;
        let paths = OutputPaths::in_dir(&dir.path().join("out"));
        let mut sink = ParquetSink::create(ParquetWriter::new(), paths.clone())?;

        sink.write_cleansed(&sample_readings())?;
        sink.write_aggregates(&sample_tables())?;
        assert!(!paths.cleansed.exists());
        assert!(!paths.hourly.exists());

        let written = sink.commit(&RunReport::default())?;
        assert_eq!(written.len(), 4);
        assert!(paths.cleansed.exists());
        assert!(paths.hourly.exists());
        assert!(paths.percentiles.exists());
        assert!(paths.summary().exists());

        let writer = ParquetWriter::new();
        assert_eq!(writer.get_file_info(&paths.cleansed)?.total_rows, 2);
        let batches = writer.read_batches(&paths.percentiles, 0)?;
        let values = batches[0].column(1).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(values.value(0), 19.0);
        Ok(())
    }

    #[test]
    fn test_dropped_sink_leaves_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("out");
        let paths = OutputPaths::in_dir(&out);

        {
            let mut sink = ParquetSink::create(ParquetWriter::new(), paths.clone())?;
            sink.write_cleansed(&sample_readings())?;
            sink.write_aggregates(&sample_tables())?;
        }

        assert_eq!(std::fs::read_dir(&out)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_unpublishable_target_withdraws_manifest() -> Result<()> {
        let dir = TempDir::new()?;
        let paths = OutputPaths::in_dir(dir.path());
        let writer = ParquetWriter::new();

        let mut first = ParquetSink::create(writer.clone(), paths.clone())?;
        first.write_cleansed(&sample_readings())?;
        first.write_aggregates(&sample_tables())?;
        first.commit(&RunReport::default())?;
        assert!(paths.summary().exists());

        // A non-empty directory where a table should go cannot be renamed over.
        std::fs::remove_file(&paths.percentiles)?;
        std::fs::create_dir(&paths.percentiles)?;
        std::fs::write(paths.percentiles.join("keep"), b"x")?;

        let mut second = ParquetSink::create(writer.clone(), paths.clone())?;
        second.write_cleansed(&sample_readings()[..1])?;
        second.write_aggregates(&sample_tables())?;
        assert!(matches!(
            second.commit(&RunReport::default()),
            Err(ProcessingError::SinkWrite { .. })
        ));
        drop(second);

        assert!(!paths.summary().exists());
        assert_eq!(writer.get_file_info(&paths.cleansed)?.total_rows, 2);
        Ok(())
    }

    #[test]
    fn test_commit_requires_aggregates() -> Result<()> {
        let dir = TempDir::new()?;
        let paths = OutputPaths::in_dir(dir.path());
        let mut sink = ParquetSink::create(ParquetWriter::new(), paths.clone())?;

        assert!(matches!(
            sink.commit(&RunReport::default()),
            Err(ProcessingError::SinkWrite { .. })
        ));
        assert!(!paths.cleansed.exists());
        Ok(())
    }

    #[test]
    fn test_read_batches_limit() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("cleansed.parquet");
        let writer = ParquetWriter::new();
        writer.write_batch(&writer.readings_to_batch(&sample_readings())?, &path)?;

        let batches = writer.read_batches(&path, 1)?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 1);
        assert!(batches[0].column(0).len() == 1);

        let info = writer.get_file_info(&path)?;
        assert_eq!(info.columns, vec!["station_id", "timestamp", "pm25", "hour", "dow"]);
        assert!(info.summary().contains("Total rows: 2"));
        Ok(())
    }
}
