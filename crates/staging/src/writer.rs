use crate::{csv_chunk, file_extension, parquet_chunk, Row, StagingError};
use models::{StagingFormat, Table};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The staging directory owned by one load. Chunks live under
/// `<root>/<table>/chunk-NNNNN.<ext>`.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    format: StagingFormat,
    chunk_rows: usize,
}

impl StagingArea {
    pub fn create(
        root: impl Into<PathBuf>,
        format: StagingFormat,
        chunk_rows: usize,
    ) -> Result<StagingArea, StagingError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(StagingArea {
            root,
            format,
            chunk_rows: chunk_rows.max(1),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> StagingFormat {
        self.format
    }

    pub fn writer(&self, table: Table) -> Result<ChunkWriter, StagingError> {
        let dir = self.root.join(table.as_str());
        fs::create_dir_all(&dir)?;
        Ok(ChunkWriter {
            table,
            dir,
            format: self.format,
            chunk_rows: self.chunk_rows,
            buffer: Vec::new(),
            files: Vec::new(),
            rows: 0,
        })
    }
}

/// Writes one table's rows as a sequence of bounded chunk files. Rows are
/// buffered up to the configured threshold and flushed as one chunk (one
/// Parquet row group, or one headered CSV file).
pub struct ChunkWriter {
    table: Table,
    dir: PathBuf,
    format: StagingFormat,
    chunk_rows: usize,
    buffer: Vec<Row>,
    files: Vec<PathBuf>,
    rows: u64,
}

impl ChunkWriter {
    pub fn table(&self) -> Table {
        self.table
    }

    pub fn push(&mut self, row: Row) -> Result<(), StagingError> {
        let expected = self.table.columns().len();
        if row.len() != expected {
            return Err(StagingError::RowShape {
                table: self.table,
                expected,
                actual: row.len(),
            });
        }
        self.buffer.push(row);
        self.rows += 1;
        if self.buffer.len() >= self.chunk_rows {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StagingError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let path = self.dir.join(format!(
            "chunk-{:05}.{}",
            self.files.len(),
            file_extension(self.format)
        ));
        match self.format {
            StagingFormat::Parquet => parquet_chunk::write_chunk(&path, self.table, &self.buffer)?,
            StagingFormat::Csv => csv_chunk::write_chunk(&path, self.table, &self.buffer)?,
        }
        tracing::debug!(
            table = %self.table,
            rows = self.buffer.len(),
            chunk = %path.display(),
            "flushed staging chunk"
        );
        self.buffer.clear();
        self.files.push(path);
        Ok(())
    }

    /// Flushes any buffered tail and returns the ordered chunk file set.
    pub fn finish(mut self) -> Result<TableChunks, StagingError> {
        self.flush()?;
        Ok(TableChunks {
            table: self.table,
            files: self.files,
            rows: self.rows,
        })
    }
}

/// The ordered chunk files staged for one table, with the total row count.
#[derive(Debug, Clone)]
pub struct TableChunks {
    pub table: Table,
    pub files: Vec<PathBuf>,
    pub rows: u64,
}

/// Everything staged for one quarter: the per-table chunk sets and the
/// format they were written in.
#[derive(Debug, Clone)]
pub struct StagedTables {
    pub format: StagingFormat,
    pub tables: BTreeMap<Table, TableChunks>,
}

impl StagedTables {
    pub fn new(format: StagingFormat) -> StagedTables {
        StagedTables {
            format,
            tables: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, chunks: TableChunks) {
        self.tables.insert(chunks.table, chunks);
    }

    pub fn rows_in(&self, table: Table) -> u64 {
        self.tables.get(&table).map(|c| c.rows).unwrap_or(0)
    }

    pub fn files(&self, table: Table) -> &[PathBuf] {
        self.tables
            .get(&table)
            .map(|c| c.files.as_slice())
            .unwrap_or(&[])
    }
}
