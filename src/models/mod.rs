pub mod aggregates;
pub mod raw_row;
pub mod reading;
pub mod rejection;

pub use aggregates::{percentile_column_name, HourlyAverage, StationPercentile};
pub use raw_row::RawRow;
pub use reading::Reading;
pub use rejection::{RejectionCounts, RowRejection};
