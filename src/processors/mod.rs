pub mod aggregator;
pub mod normalizer;
pub mod pipeline;
pub mod quantile_sketch;
pub mod run_report;
pub mod timestamp_resolver;
pub mod validation;

pub use aggregator::{AggregateTables, Aggregator, RunningMean};
pub use normalizer::RecordNormalizer;
pub use pipeline::PipelineDriver;
pub use quantile_sketch::QuantileSketch;
pub use run_report::RunReport;
pub use timestamp_resolver::{TimestampPattern, TimestampResolver};
pub use validation::{ReadingValidator, ValidityBounds};
