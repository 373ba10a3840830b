use crate::error::Result;
use crate::models::RawRow;

/// Anything that can hand out raw rows in batches.
pub trait RecordSource {
    /// Read up to `max_rows` rows. An empty batch means the source is exhausted.
    fn read_batch(&mut self, max_rows: usize) -> Result<Vec<RawRow>>;

    /// Human-readable name used in logs and the run report.
    fn describe(&self) -> String;
}

/// Rows already in memory.
#[derive(Debug)]
pub struct MemorySource {
    rows: std::vec::IntoIter<RawRow>,
}

impl MemorySource {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RecordSource for MemorySource {
    fn read_batch(&mut self, max_rows: usize) -> Result<Vec<RawRow>> {
        Ok(self.rows.by_ref().take(max_rows.max(1)).collect())
    }

    fn describe(&self) -> String {
        "in-memory rows".to_string()
    }
}
