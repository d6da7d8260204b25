use crate::decode::decode_field;
use crate::{Emitter, ParseError};
use models::{normalize_fda_dt, PartialDatePolicy, Table};
use std::io::{Read, Seek};

/// Parses every table member and deletion member of an ASCII release.
pub(crate) fn parse_members<R: Read + Seek>(
    zip: &mut zip::ZipArchive<R>,
    emitter: &mut Emitter,
    policy: PartialDatePolicy,
) -> Result<(), ParseError> {
    for index in 0..zip.len() {
        let member = zip.by_index(index)?;
        if member.is_dir() {
            continue;
        }
        let name = member.name().to_string();
        let base = name.rsplit(['/', '\\']).next().unwrap_or(&name).to_ascii_uppercase();

        if base.starts_with("DELE") && base.ends_with(".TXT") {
            parse_deletions(member, &name, emitter)?;
        } else if base.ends_with(".TXT") {
            match Table::from_member_name(&name) {
                Some(table) => parse_table_member(member, &name, table, emitter, policy)?,
                None => tracing::debug!(member = %name, "skipping unrecognized text member"),
            }
        } else {
            tracing::debug!(member = %name, "skipping non-data member");
        }
    }
    Ok(())
}

fn new_reader(member: impl Read) -> csv::Reader<impl Read> {
    // FAERS text members are '$'-delimited and unquoted; `flexible` lets us
    // count and skip short or long rows instead of aborting the member.
    csv::ReaderBuilder::new()
        .delimiter(b'$')
        .quoting(false)
        .flexible(true)
        .has_headers(false)
        .from_reader(member)
}

fn parse_table_member(
    member: impl Read,
    name: &str,
    table: Table,
    emitter: &mut Emitter,
    policy: PartialDatePolicy,
) -> Result<(), ParseError> {
    let mut reader = new_reader(member);
    let mut records = reader.byte_records();

    let header = match records.next() {
        Some(header) => header?,
        None => {
            tracing::warn!(member = %name, "member is empty");
            return Ok(());
        }
    };
    let header: Vec<String> = header
        .iter()
        .map(|raw| decode_field(raw).trim().to_ascii_lowercase())
        .collect();

    // Positions of this member's columns within the canonical layout. File
    // columns with no canonical counterpart are dropped (once, loudly).
    let projection: Vec<Option<usize>> = table
        .columns()
        .iter()
        .map(|canonical| header.iter().position(|h| h == canonical))
        .collect();
    for (position, column) in header.iter().enumerate() {
        if !column.is_empty() && table.column_index(column).is_none() {
            tracing::debug!(member = %name, column = %column, position, "dropping unmapped column");
        }
    }

    let fda_dt_index = (table == Table::Demo)
        .then(|| table.column_index("fda_dt"))
        .flatten();

    let mut rows = 0u64;
    let mut malformed = 0u64;
    for (line, record) in records.enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                malformed += 1;
                tracing::warn!(member = %name, line = line + 2, error = %err, "skipping malformed line");
                continue;
            }
        };
        if record.len() != header.len() {
            malformed += 1;
            tracing::warn!(
                member = %name,
                line = line + 2,
                fields = record.len(),
                expected = header.len(),
                "skipping line with wrong field count"
            );
            continue;
        }

        let mut row: Vec<Option<String>> = projection
            .iter()
            .map(|source| {
                source
                    .and_then(|position| record.get(position))
                    .map(decode_field)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
            .collect();
        if let Some(index) = fda_dt_index {
            if let Some(value) = row[index].take() {
                row[index] = Some(normalize_fda_dt(&value, policy));
            }
        }

        emitter.push(table, row)?;
        rows += 1;
    }

    emitter.malformed += malformed;
    tracing::info!(member = %name, table = %table, rows, malformed, "parsed member");
    Ok(())
}

/// A deletion member lists nullified CASEIDs, one per line, under a
/// `caseid` header in recent quarters and bare in older ones.
fn parse_deletions(member: impl Read, name: &str, emitter: &mut Emitter) -> Result<(), ParseError> {
    let mut reader = new_reader(member);
    for record in reader.byte_records() {
        let record = record?;
        let Some(first) = record.get(0) else { continue };
        let value = decode_field(first);
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("caseid") {
            continue;
        }
        emitter.nullified.insert(value);
    }
    tracing::info!(member = %name, nullified = emitter.nullified.len(), "parsed deletion member");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use models::StagingFormat;
    use staging::{read_chunk, StagingArea};
    use std::io::Write;
    use zip::write::FileOptions;

    fn archive(members: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in members {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn parse(members: &[(&str, &str)]) -> (crate::ParseOutcome, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faers.zip");
        std::fs::write(&path, archive(members)).unwrap();
        let area = StagingArea::create(dir.path().join("stage"), StagingFormat::Csv, 100).unwrap();
        let outcome = crate::parse_archive(&path, &area, PartialDatePolicy::Raw).unwrap();
        (outcome, dir)
    }

    #[test]
    fn table_members_stage_rows_in_canonical_order() {
        let demo = "primaryid$caseid$caseversion$fda_dt$sex\n\
                    1001$100$1$20230115$F\n\
                    1002$100$2$20230220$F\n";
        let (outcome, _dir) = parse(&[("ascii/DEMO23Q1.TXT", demo)]);

        assert_eq!(2, outcome.staged.rows_in(Table::Demo));
        assert_eq!(0, outcome.malformed_rows);

        let files = outcome.staged.files(Table::Demo);
        let rows: Vec<_> = read_chunk(&files[0], Table::Demo, StagingFormat::Csv)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        let fda_dt = Table::Demo.column_index("fda_dt").unwrap();
        let sex = Table::Demo.column_index("sex").unwrap();
        assert_eq!(Some("1001"), rows[0][0].as_deref());
        assert_eq!(Some("100"), rows[0][1].as_deref());
        assert_eq!(Some("20230115"), rows[0][fda_dt].as_deref());
        assert_eq!(Some("F"), rows[0][sex].as_deref());
        // Columns the member does not carry are null.
        let age = Table::Demo.column_index("age").unwrap();
        assert_eq!(None, rows[0][age]);
    }

    #[test]
    fn malformed_lines_are_counted_and_skipped() {
        let reac = "primaryid$caseid$pt\n\
                    1001$100$Nausea\n\
                    too$few\n\
                    1002$100$Headache\n";
        let (outcome, _dir) = parse(&[("REAC23Q1.TXT", reac)]);
        assert_eq!(2, outcome.staged.rows_in(Table::Reac));
        assert_eq!(1, outcome.malformed_rows);
    }

    #[test]
    fn deletion_members_feed_the_nullification_set() {
        let dele = "caseid\n100\n101\n";
        let demo = "primaryid$caseid\n1001$100\n";
        let (outcome, _dir) = parse(&[("DEMO23Q1.TXT", demo), ("DELE23Q1.TXT", dele)]);
        assert_eq!(2, outcome.nullified.len());
        assert!(outcome.nullified.contains("100"));
        assert!(outcome.nullified.contains("101"));
    }

    #[test]
    fn latin1_members_are_coerced() {
        // 0xC9 is 'É' in Latin-1 and makes the member invalid as UTF-8.
        let mut raw = b"primaryid$caseid$drug_seq$role_cod$drugname\n1001$100$1$PS$".to_vec();
        raw.push(0xC9);
        raw.extend_from_slice(b"PINEPHRINE\n");
        assert!(std::str::from_utf8(&raw).is_err());

        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("DRUG23Q1.TXT", FileOptions::default())
            .unwrap();
        writer.write_all(&raw).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faers.zip");
        std::fs::write(&path, bytes).unwrap();
        let area = StagingArea::create(dir.path().join("stage"), StagingFormat::Csv, 100).unwrap();
        let outcome = crate::parse_archive(&path, &area, PartialDatePolicy::Raw).unwrap();

        let files = outcome.staged.files(Table::Drug);
        let rows: Vec<_> = read_chunk(&files[0], Table::Drug, StagingFormat::Csv)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        let drugname = Table::Drug.column_index("drugname").unwrap();
        assert_eq!(Some("\u{c9}PINEPHRINE"), rows[0][drugname].as_deref());
    }
}
