//! Run configuration.
//!
//! Settings are layered: built-in defaults, then an optional file, then
//! `OPENAQ_*` environment variables (nested keys joined with `__`, e.g.
//! `OPENAQ_BOUNDS__MAX=500`), then whatever the CLI overrides.

use crate::error::{ProcessingError, Result};
use crate::processors::{ReadingValidator, RecordNormalizer, TimestampResolver, ValidityBounds};
use crate::utils::constants::{
    COMPRESSION_SNAPPY, DEFAULT_CHUNK_SIZE, DEFAULT_OUTPUT_DIR, DEFAULT_PERCENTILE,
    DEFAULT_RANK_ACCURACY, DEFAULT_ROW_GROUP_SIZE, DEFAULT_TIMESTAMP_FORMATS, PM25_ALIASES,
};
use crate::writers::{parse_compression, OutputPaths, ParquetWriter};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use validator::Validate;

pub const ENV_PREFIX: &str = "OPENAQ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// Input CSV; required by `process` and `validate`
    pub input: Option<PathBuf>,

    pub output: OutputPaths,

    /// Timestamp patterns in the order they are tried
    #[validate(length(min = 1))]
    pub timestamp_formats: Vec<String>,

    #[validate(length(min = 1))]
    pub parameter_aliases: Vec<String>,

    pub bounds: ValidityBounds,

    #[validate(range(min = 0.0, max = 1.0))]
    pub percentile: f64,

    /// Target normalized rank error of the percentile sketch
    #[validate(range(exclusive_min = 0.0, max = 0.5))]
    pub accuracy: f64,

    #[validate(range(min = 1))]
    pub max_workers: usize,

    #[validate(range(min = 1))]
    pub chunk_size: usize,

    pub compression: String,

    #[validate(range(min = 1))]
    pub row_group_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: None,
            output: OutputPaths::in_dir(Path::new(DEFAULT_OUTPUT_DIR)),
            timestamp_formats: DEFAULT_TIMESTAMP_FORMATS.iter().map(|s| s.to_string()).collect(),
            parameter_aliases: PM25_ALIASES.iter().map(|s| s.to_string()).collect(),
            bounds: ValidityBounds::default(),
            percentile: DEFAULT_PERCENTILE,
            accuracy: DEFAULT_RANK_ACCURACY,
            max_workers: num_cpus::get(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: COMPRESSION_SNAPPY.to_string(),
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Load defaults, the optional file and the environment. Not yet validated;
    /// apply CLI overrides first, then call [`validated`](Self::validated).
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with_env(file, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("timestamp_formats")
            .with_list_parse_key("parameter_aliases")
            .try_parsing(true)
    }

    fn load_with_env(file: Option<&Path>, env: Environment) -> Result<Self> {
        let defaults = Config::try_from(&Self::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = file {
            if !path.exists() {
                return Err(ProcessingError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path));
        }

        let config: PipelineConfig = builder.add_source(env).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check every setting, including the ones the derive cannot express.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        ValidityBounds::new(self.bounds.min, self.bounds.max)?;
        self.resolver()?;
        parse_compression(&self.compression)?;
        Ok(self)
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_output_dir(mut self, dir: &Path) -> Self {
        self.output = OutputPaths::in_dir(dir);
        self
    }

    pub fn input_path(&self) -> Result<&Path> {
        self.input
            .as_deref()
            .ok_or_else(|| ProcessingError::Config("No input file configured".to_string()))
    }

    pub fn resolver(&self) -> Result<TimestampResolver> {
        TimestampResolver::from_formats(&self.timestamp_formats)
    }

    pub fn normalizer(&self) -> Result<RecordNormalizer> {
        Ok(RecordNormalizer::new(self.resolver()?, &self.parameter_aliases))
    }

    pub fn validator(&self) -> Result<ReadingValidator> {
        Ok(ReadingValidator::new(ValidityBounds::new(
            self.bounds.min,
            self.bounds.max,
        )?))
    }

    pub fn parquet_writer(&self) -> Result<ParquetWriter> {
        Ok(ParquetWriter::new()
            .with_compression(&self.compression)?
            .with_row_group_size(self.row_group_size)
            .with_percentile(self.percentile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env() -> Environment {
        Environment::with_prefix(ENV_PREFIX).source(Some(HashMap::new()))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default().validated().unwrap();

        assert_eq!(config.percentile, 0.9);
        assert_eq!(config.chunk_size, 50_000);
        assert_eq!(config.bounds, ValidityBounds::default());
        assert_eq!(config.output.cleansed, Path::new("output").join("cleansed.parquet"));
    }

    #[test]
    fn test_load_without_file_matches_defaults() {
        let config = PipelineConfig::load_with_env(None, no_env()).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "percentile = 0.5\nchunk_size = 10\ncompression = \"zstd\"\n\n[bounds]\nmin = 0.0\nmax = 500.0"
        )
        .unwrap();

        let config = PipelineConfig::load_with_env(Some(file.path()), no_env())
            .unwrap()
            .validated()
            .unwrap();

        assert_eq!(config.percentile, 0.5);
        assert_eq!(config.chunk_size, 10);
        assert_eq!(config.compression, "zstd");
        assert_eq!(config.bounds.max, 500.0);
        assert_eq!(config.timestamp_formats.len(), DEFAULT_TIMESTAMP_FORMATS.len());
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let env = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(HashMap::from([
                ("OPENAQ_BOUNDS__MAX".to_string(), "250".to_string()),
                ("OPENAQ_CHUNK_SIZE".to_string(), "7".to_string()),
            ])));

        let config = PipelineConfig::load_with_env(None, env).unwrap();
        assert_eq!(config.bounds.max, 250.0);
        assert_eq!(config.chunk_size, 7);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = PipelineConfig::load_with_env(Some(Path::new("/no/such/openaq.toml")), no_env());
        assert!(matches!(result, Err(ProcessingError::Config(_))));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let bad_percentile = PipelineConfig {
            percentile: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            bad_percentile.validated(),
            Err(ProcessingError::Validation(_))
        ));

        let inverted = PipelineConfig {
            bounds: ValidityBounds { min: 10.0, max: 1.0 },
            ..Default::default()
        };
        assert!(inverted.validated().is_err());

        let unknown_format = PipelineConfig {
            timestamp_formats: vec!["%Q-nonsense".to_string()],
            ..Default::default()
        };
        assert!(unknown_format.validated().is_err());

        let compression = PipelineConfig {
            compression: "bz2".to_string(),
            ..Default::default()
        };
        assert!(compression.validated().is_err());

        let workers = PipelineConfig {
            max_workers: 0,
            ..Default::default()
        };
        assert!(workers.validated().is_err());
    }

    #[test]
    fn test_builder_helpers() {
        let config = PipelineConfig::default()
            .with_input("data.csv")
            .with_output_dir(Path::new("/tmp/out"));

        assert_eq!(config.input_path().unwrap(), Path::new("data.csv"));
        assert_eq!(config.output.summary(), Path::new("/tmp/out/_run_summary.json"));
        assert!(PipelineConfig::default().input_path().is_err());
        assert!(config.normalizer().is_ok());
        assert!(config.validator().is_ok());
        assert!(config.parquet_writer().is_ok());
    }
}
