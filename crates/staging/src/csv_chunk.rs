use crate::{Row, RowIter, StagingError};
use models::Table;
use std::fs;
use std::path::Path;

pub fn write_chunk(path: &Path, table: Table, rows: &[Row]) -> Result<(), StagingError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(table.columns())?;
    for row in rows {
        writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_chunk(path: &Path, table: Table) -> Result<RowIter, StagingError> {
    let mut reader = csv::Reader::from_reader(fs::File::open(path)?);
    let headers = reader.headers()?;
    if headers.len() != table.columns().len() {
        return Err(StagingError::ChunkLayout {
            table,
            path: path.to_path_buf(),
        });
    }

    let iter = reader.into_records().map(|record| {
        let record = record?;
        Ok(record
            .iter()
            .map(|v| Some(v.to_string()).filter(|v| !v.is_empty()))
            .collect())
    });
    Ok(Box::new(iter))
}
