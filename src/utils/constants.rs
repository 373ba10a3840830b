/// Input column names
pub const COLUMN_PARAMETER: &str = "parameter";
pub const COLUMN_LOCATION: &str = "location";
pub const COLUMN_DATETIME: &str = "datetime";
pub const COLUMN_VALUE: &str = "value";

/// Output file names
pub const CLEANSED_FILE: &str = "cleansed.parquet";
pub const HOURLY_FILE: &str = "aggregates_hourly.parquet";
pub const PERCENTILES_FILE: &str = "aggregates_percentiles.parquet";
pub const RUN_SUMMARY_FILE: &str = "_run_summary.json";
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Parameter spellings accepted as PM2.5, compared after folding
pub const PM25_ALIASES: [&str; 3] = ["pm25", "PM2.5", "pm2.5"];

/// Concentration plausibility bounds (µg/m³)
pub const MIN_VALID_PM25: f64 = 0.0;
pub const MAX_VALID_PM25: f64 = 1000.0;

/// Aggregation defaults
pub const DEFAULT_PERCENTILE: f64 = 0.90;
pub const DEFAULT_RANK_ACCURACY: f64 = 0.01;

/// Timestamp format names understood besides chrono strftime patterns
pub const FORMAT_RFC3339: &str = "rfc3339";
pub const FORMAT_FREEFORM: &str = "freeform";
pub const DEFAULT_TIMESTAMP_FORMATS: [&str; 5] = [
    FORMAT_RFC3339,
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    FORMAT_FREEFORM,
];

/// Processing defaults
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 100_000;
pub const DEFAULT_BUFFER_SIZE: usize = 8192 * 16; // 128KB
pub const MIN_PARTITION_SIZE: usize = 1024;

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
