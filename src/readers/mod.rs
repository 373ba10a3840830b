pub mod csv_reader;
pub mod record_source;

pub use csv_reader::CsvRecordSource;
pub use record_source::{MemorySource, RecordSource};
