//! Streaming parsers for FAERS quarterly archives. An archive is either the
//! legacy ASCII layout (`$`-delimited text members, one per table, plus a
//! `DELE*.TXT` deletion list) or an ICH E2B XML layout (one or more members
//! of `<safetyreport>` elements). Both paths stream rows into per-table
//! staging chunks and collect the quarter's nullification set.

mod ascii;
mod decode;
mod xml;

pub use self::decode::decode_field;

use models::{NullificationSet, PartialDatePolicy, Table};
use staging::{ChunkWriter, Row, StagedTables, StagingArea, StagingError};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unrecoverable xml failure: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("archive contains no recognizable FAERS members")]
    UnknownFormat,

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("csv parsing failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Detected archive layout, by member extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Ascii,
    Xml,
}

/// What a parse pass produced: staged chunk files per table, the quarter's
/// nullification set, and the count of malformed rows that were skipped.
#[derive(Debug)]
pub struct ParseOutcome {
    pub staged: StagedTables,
    pub nullified: NullificationSet,
    pub malformed_rows: u64,
}

/// Classifies an archive by its member names. XML members win over text
/// members when both are present, which does not occur in practice.
pub fn detect_format(member_names: &[String]) -> Result<ArchiveFormat, ParseError> {
    let has = |suffix: &str| {
        member_names
            .iter()
            .any(|n| n.to_ascii_lowercase().ends_with(suffix))
    };
    if has(".xml") {
        Ok(ArchiveFormat::Xml)
    } else if has(".txt") {
        Ok(ArchiveFormat::Ascii)
    } else {
        Err(ParseError::UnknownFormat)
    }
}

/// Parses a quarterly archive, streaming every table member into `staging`.
/// Row-level problems are skipped and counted, never fatal; structural
/// problems (unreadable zip, broken XML) abort the parse.
pub fn parse_archive(
    archive: &Path,
    staging: &StagingArea,
    policy: PartialDatePolicy,
) -> Result<ParseOutcome, ParseError> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;

    let member_names: Vec<String> = zip.file_names().map(str::to_string).collect();
    let format = detect_format(&member_names)?;
    tracing::info!(archive = %archive.display(), ?format, members = member_names.len(), "parsing archive");

    let mut emitter = Emitter::new(staging)?;
    match format {
        ArchiveFormat::Ascii => ascii::parse_members(&mut zip, &mut emitter, policy)?,
        ArchiveFormat::Xml => xml::parse_members(&mut zip, &mut emitter, policy)?,
    }
    emitter.finish()
}

/// Routes parsed rows to per-table chunk writers and accumulates the
/// nullification set and malformed-row count.
pub(crate) struct Emitter {
    writers: BTreeMap<Table, ChunkWriter>,
    format: models::StagingFormat,
    pub(crate) nullified: NullificationSet,
    pub(crate) malformed: u64,
}

impl Emitter {
    fn new(staging: &StagingArea) -> Result<Emitter, ParseError> {
        let mut writers = BTreeMap::new();
        for table in Table::ALL {
            writers.insert(table, staging.writer(table)?);
        }
        Ok(Emitter {
            writers,
            format: staging.format(),
            nullified: NullificationSet::new(),
            malformed: 0,
        })
    }

    pub(crate) fn push(&mut self, table: Table, row: Row) -> Result<(), ParseError> {
        let writer = self
            .writers
            .get_mut(&table)
            .expect("writers cover all tables");
        writer.push(row)?;
        Ok(())
    }

    fn finish(self) -> Result<ParseOutcome, ParseError> {
        let mut staged = StagedTables::new(self.format);
        for (_, writer) in self.writers {
            staged.insert(writer.finish()?);
        }
        Ok(ParseOutcome {
            staged,
            nullified: self.nullified,
            malformed_rows: self.malformed,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn format_detection_prefers_recognized_extensions() {
        let ascii = vec!["ascii/DEMO23Q1.TXT".to_string(), "FAQs.doc".to_string()];
        assert_eq!(ArchiveFormat::Ascii, detect_format(&ascii).unwrap());

        let xml = vec!["xml/ADR23Q1.xml".to_string()];
        assert_eq!(ArchiveFormat::Xml, detect_format(&xml).unwrap());

        let junk = vec!["README.doc".to_string()];
        assert!(matches!(detect_format(&junk), Err(ParseError::UnknownFormat)));
    }
}
