use crate::error::{ProcessingError, Result};
use crate::models::RawRow;
use crate::readers::RecordSource;
use crate::utils::constants::{
    COLUMN_DATETIME, COLUMN_LOCATION, COLUMN_PARAMETER, COLUMN_VALUE, DEFAULT_BUFFER_SIZE,
};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reads raw rows from a CSV file with a header line.
///
/// Rows may be ragged; missing trailing cells read as absent. Cells that are not
/// valid UTF-8 are decoded as Windows-1252.
pub struct CsvRecordSource<R: Read> {
    name: String,
    reader: csv::Reader<R>,
    headers: Vec<String>,
    record: csv::ByteRecord,
}

impl CsvRecordSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| ProcessingError::SourceUnavailable {
            path: PathBuf::from(path),
            source,
        })?;
        let reader = BufReader::with_capacity(DEFAULT_BUFFER_SIZE, file);
        Self::from_reader(reader, path.display().to_string())
    }
}

impl<R: Read> CsvRecordSource<R> {
    pub fn from_reader(reader: R, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .byte_headers()?
            .iter()
            .map(|cell| decode_cell(cell).trim().to_string())
            .collect();

        let missing: Vec<&str> = [COLUMN_PARAMETER, COLUMN_LOCATION, COLUMN_DATETIME, COLUMN_VALUE]
            .into_iter()
            .filter(|column| !headers.iter().any(|h| h.eq_ignore_ascii_case(column)))
            .collect();
        if !missing.is_empty() {
            warn!(
                "{} has no column(s) {}; those fields read as null",
                name,
                missing.join(", ")
            );
        }
        debug!("Opened {} with columns {:?}", name, headers);

        Ok(Self {
            name,
            reader,
            headers,
            record: csv::ByteRecord::new(),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl<R: Read> RecordSource for CsvRecordSource<R> {
    fn read_batch(&mut self, max_rows: usize) -> Result<Vec<RawRow>> {
        let mut rows = Vec::with_capacity(max_rows.min(DEFAULT_BUFFER_SIZE));

        while rows.len() < max_rows.max(1) {
            if !self.reader.read_byte_record(&mut self.record)? {
                break;
            }

            let mut row = RawRow::new();
            for (header, cell) in self.headers.iter().zip(self.record.iter()) {
                row.insert(header, decode_cell(cell));
            }
            rows.push(row);
        }

        Ok(rows)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

fn decode_cell(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "location,parameter,value,datetime\n\
        S1,pm25,10,2024-01-01T00:00:00Z\n\
        S1,o3,5,2024-01-01T01:00:00Z\n\
        S2,PM2.5,,2024-01-01 02:00:00\n";

    #[test]
    fn test_read_batches() -> Result<()> {
        let mut source = CsvRecordSource::from_reader(SAMPLE.as_bytes(), "sample")?;

        let first = source.read_batch(2)?;
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].get("location"), Some("S1"));
        assert_eq!(first[1].get("parameter"), Some("o3"));

        let second = source.read_batch(2)?;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].get("value"), None);

        assert!(source.read_batch(2)?.is_empty());
        assert_eq!(source.describe(), "sample");
        Ok(())
    }

    #[test]
    fn test_ragged_rows_and_header_case() -> Result<()> {
        let data = " Location ,PARAMETER,Value,DateTime\nS1,pm25\n";
        let mut source = CsvRecordSource::from_reader(data.as_bytes(), "ragged")?;

        let rows = source.read_batch(10)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("location"), Some("S1"));
        assert_eq!(rows[0].get("parameter"), Some("pm25"));
        assert_eq!(rows[0].get("datetime"), None);
        Ok(())
    }

    #[test]
    fn test_latin1_cells_are_decoded() -> Result<()> {
        let mut bytes = b"location,parameter,value,datetime\n".to_vec();
        bytes.extend_from_slice(b"Medell\xedn,pm25,3,2024-01-01 00:00:00\n");
        let mut source = CsvRecordSource::from_reader(bytes.as_slice(), "latin1")?;

        let rows = source.read_batch(10)?;
        assert_eq!(rows[0].get("location"), Some("Medellín"));
        Ok(())
    }

    #[test]
    fn test_open_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(file, "{}", SAMPLE)?;

        let mut source = CsvRecordSource::open(file.path())?;
        assert_eq!(source.headers().len(), 4);
        assert_eq!(source.read_batch(100)?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_source_unavailable() {
        let result = CsvRecordSource::open(Path::new("/definitely/not/here.csv"));
        assert!(matches!(result, Err(ProcessingError::SourceUnavailable { .. })));
    }
}
