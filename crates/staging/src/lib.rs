//! Bounded intermediate storage for parsed FAERS rows. Each (quarter, table)
//! is staged as a sequence of chunk files that are individually small enough
//! to buffer, written in Parquet (preferred) or CSV, and later re-read in
//! order by the deduplicator.

mod csv_chunk;
mod parquet_chunk;
mod writer;

pub use self::writer::{ChunkWriter, StagedTables, StagingArea, TableChunks};

use models::{StagingFormat, Table};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("staging i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode csv chunk: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to encode parquet chunk: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("row has {actual} values but table '{table}' has {expected} columns")]
    RowShape {
        table: Table,
        expected: usize,
        actual: usize,
    },

    #[error("chunk file {path} does not match the '{table}' layout")]
    ChunkLayout { table: Table, path: PathBuf },
}

/// A parsed row, with values aligned to `table.columns()` order. Absent and
/// empty fields are both `None`; the loader renders `None` as its NULL
/// sentinel.
pub type Row = Vec<Option<String>>;

/// A fallible stream of rows read back from one chunk file.
pub type RowIter = Box<dyn Iterator<Item = Result<Row, StagingError>>>;

/// Opens one staged chunk for reading. Chunks must be consumed with the same
/// `(table, format)` they were written with.
pub fn read_chunk(path: &Path, table: Table, format: StagingFormat) -> Result<RowIter, StagingError> {
    match format {
        StagingFormat::Parquet => parquet_chunk::read_chunk(path, table),
        StagingFormat::Csv => csv_chunk::read_chunk(path, table),
    }
}

fn file_extension(format: StagingFormat) -> &'static str {
    match format {
        StagingFormat::Parquet => "parquet",
        StagingFormat::Csv => "csv",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{StagingFormat, Table};

    fn row(values: &[Option<&str>]) -> Row {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    fn outc_row(primaryid: &str, caseid: &str, outcome: Option<&str>) -> Row {
        row(&[Some(primaryid), Some(caseid), outcome])
    }

    fn roundtrip(format: StagingFormat) {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::create(dir.path().join("stage"), format, 2).unwrap();

        let mut writer = area.writer(Table::Outc).unwrap();
        writer.push(outc_row("1001", "100", Some("HO"))).unwrap();
        writer.push(outc_row("1002", "100", None)).unwrap();
        writer.push(outc_row("1010", "101", Some("DE"))).unwrap();
        let chunks = writer.finish().unwrap();

        // Three rows with a threshold of two rows per chunk.
        assert_eq!(2, chunks.files.len());
        assert_eq!(3, chunks.rows);

        let mut rows = Vec::new();
        for file in &chunks.files {
            for r in read_chunk(file, Table::Outc, format).unwrap() {
                rows.push(r.unwrap());
            }
        }
        assert_eq!(
            vec![
                outc_row("1001", "100", Some("HO")),
                outc_row("1002", "100", None),
                outc_row("1010", "101", Some("DE")),
            ],
            rows
        );
    }

    #[test]
    fn csv_chunks_roundtrip_with_bounded_size() {
        roundtrip(StagingFormat::Csv);
    }

    #[test]
    fn parquet_chunks_roundtrip_with_bounded_size() {
        roundtrip(StagingFormat::Parquet);
    }

    #[test]
    fn misshapen_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::create(dir.path(), StagingFormat::Csv, 10).unwrap();
        let mut writer = area.writer(Table::Outc).unwrap();
        let err = writer.push(row(&[Some("1001")])).unwrap_err();
        assert!(matches!(err, StagingError::RowShape { .. }));
    }

    #[test]
    fn empty_tables_produce_no_chunk_files() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::create(dir.path(), StagingFormat::Parquet, 10).unwrap();
        let chunks = area.writer(Table::Rpsr).unwrap().finish().unwrap();
        assert!(chunks.files.is_empty());
        assert_eq!(0, chunks.rows);
    }
}
