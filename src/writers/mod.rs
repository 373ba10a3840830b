pub mod parquet_writer;

pub use parquet_writer::{
    parse_compression, ColumnarSink, OutputPaths, ParquetFileInfo, ParquetSink, ParquetWriter,
};
