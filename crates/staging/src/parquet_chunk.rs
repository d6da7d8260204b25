use crate::{Row, RowIter, StagingError};
use models::Table;
use parquet::basic::Compression;
use parquet::data_type::{ByteArray, ByteArrayType};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::Field;
use parquet::schema::parser::parse_message_type;
use std::fs;
use std::path::Path;
use std::sync::Arc;

// Every column is an optional UTF-8 byte array; FAERS values are opaque
// strings and typing happens, if at all, downstream of the load.
fn message_type(table: Table) -> String {
    let mut message = String::from("message faers_chunk {\n");
    for column in table.columns() {
        message.push_str(&format!("  optional binary {column} (UTF8);\n"));
    }
    message.push('}');
    message
}

pub fn write_chunk(path: &Path, table: Table, rows: &[Row]) -> Result<(), StagingError> {
    let schema = Arc::new(parse_message_type(&message_type(table))?);
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build(),
    );

    let file = fs::File::create(path)?;
    let mut writer = SerializedFileWriter::new(file, schema, props)?;

    // One row group per chunk: the chunk row threshold is the memory bound.
    let mut row_group = writer.next_row_group()?;
    let mut index = 0usize;
    while let Some(mut column) = row_group.next_column()? {
        let mut values: Vec<ByteArray> = Vec::new();
        let mut def_levels: Vec<i16> = Vec::with_capacity(rows.len());
        for row in rows {
            match row[index].as_deref() {
                Some(value) => {
                    def_levels.push(1);
                    values.push(ByteArray::from(value));
                }
                None => def_levels.push(0),
            }
        }
        column
            .typed::<ByteArrayType>()
            .write_batch(&values, Some(&def_levels), None)?;
        column.close()?;
        index += 1;
    }
    row_group.close()?;
    writer.close()?;
    Ok(())
}

pub fn read_chunk(path: &Path, table: Table) -> Result<RowIter, StagingError> {
    let file = fs::File::open(path)?;
    let reader = SerializedFileReader::new(file)?;

    let columns = reader.metadata().file_metadata().schema().get_fields().len();
    if columns != table.columns().len() {
        return Err(StagingError::ChunkLayout {
            table,
            path: path.to_path_buf(),
        });
    }

    let rows = parquet::record::reader::RowIter::from_file_into(Box::new(reader));
    let iter = rows.map(|row| {
        let row = row?;
        Ok(row
            .get_column_iter()
            .map(|(_, field)| match field {
                Field::Str(s) => Some(s.clone()),
                Field::Null => None,
                other => Some(other.to_string()),
            })
            .collect())
    });
    Ok(Box::new(iter))
}
