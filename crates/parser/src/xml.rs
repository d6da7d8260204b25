use crate::{Emitter, ParseError};
use models::{normalize_fda_dt, PartialDatePolicy, Table};
use quick_xml::events::Event;
use std::collections::BTreeMap;
use std::io::{BufReader, Read, Seek};

/// Parses every XML member of an E2B release. Reports are processed one
/// `<safetyreport>` element at a time and released before the next begins.
pub(crate) fn parse_members<R: Read + Seek>(
    zip: &mut zip::ZipArchive<R>,
    emitter: &mut Emitter,
    policy: PartialDatePolicy,
) -> Result<(), ParseError> {
    for index in 0..zip.len() {
        let member = zip.by_index(index)?;
        if member.is_dir() || !member.name().to_ascii_lowercase().ends_with(".xml") {
            continue;
        }
        let name = member.name().to_string();
        parse_member(BufReader::new(member), &name, emitter, policy)?;
    }
    Ok(())
}

/// One `<safetyreport>` in flight: its report-level leaf values plus the
/// repeated `<drug>` and `<reaction>` blocks.
#[derive(Default)]
struct Report {
    fields: BTreeMap<String, String>,
    drugs: Vec<BTreeMap<String, String>>,
    reactions: Vec<BTreeMap<String, String>>,
    in_drug: bool,
    in_reaction: bool,
}

impl Report {
    fn scope_mut(&mut self) -> &mut BTreeMap<String, String> {
        if self.in_drug {
            self.drugs.last_mut().expect("in_drug implies a drug entry")
        } else if self.in_reaction {
            self.reactions
                .last_mut()
                .expect("in_reaction implies a reaction entry")
        } else {
            &mut self.fields
        }
    }
}

fn parse_member(
    member: impl std::io::BufRead,
    name: &str,
    emitter: &mut Emitter,
    policy: PartialDatePolicy,
) -> Result<(), ParseError> {
    let mut reader = quick_xml::Reader::from_reader(member);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut report: Option<Report> = None;
    let mut leaf: Option<String> = None;
    let mut reports = 0u64;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => {
                let element = String::from_utf8_lossy(start.local_name().as_ref()).to_lowercase();
                match element.as_str() {
                    "safetyreport" => report = Some(Report::default()),
                    "drug" => {
                        if let Some(report) = report.as_mut() {
                            report.drugs.push(BTreeMap::new());
                            report.in_drug = true;
                        }
                    }
                    "reaction" => {
                        if let Some(report) = report.as_mut() {
                            report.reactions.push(BTreeMap::new());
                            report.in_reaction = true;
                        }
                    }
                    _ => leaf = Some(element),
                }
            }
            Event::Text(text) => {
                if let (Some(report), Some(leaf)) = (report.as_mut(), leaf.as_deref()) {
                    let value = text.unescape()?.trim().to_string();
                    if !value.is_empty() {
                        report.scope_mut().entry(leaf.to_string()).or_insert(value);
                    }
                }
            }
            Event::End(end) => {
                let element = String::from_utf8_lossy(end.local_name().as_ref()).to_lowercase();
                match element.as_str() {
                    "safetyreport" => {
                        if let Some(report) = report.take() {
                            emit_report(report, emitter, policy)?;
                            reports += 1;
                        }
                    }
                    "drug" => {
                        if let Some(report) = report.as_mut() {
                            report.in_drug = false;
                        }
                    }
                    "reaction" => {
                        if let Some(report) = report.as_mut() {
                            report.in_reaction = false;
                        }
                    }
                    _ => leaf = None,
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    tracing::info!(member = %name, reports, "parsed xml member");
    Ok(())
}

fn is_nullification(value: Option<&String>) -> bool {
    matches!(
        value.map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

/// A report's CASEID: an explicit `<caseid>` when present, otherwise the
/// `safetyreportid` with its `safetyreportversion` suffix stripped (FAERS
/// primaryids are the caseid concatenated with the version number).
fn derive_caseid(fields: &BTreeMap<String, String>, primaryid: &str) -> String {
    if let Some(caseid) = fields.get("caseid").filter(|v| !v.is_empty()) {
        return caseid.clone();
    }
    if let Some(version) = fields.get("safetyreportversion") {
        let version = version.trim();
        if !version.is_empty()
            && primaryid.len() > version.len()
            && primaryid.ends_with(version)
        {
            return primaryid[..primaryid.len() - version.len()].to_string();
        }
    }
    primaryid.to_string()
}

fn emit_report(
    report: Report,
    emitter: &mut Emitter,
    policy: PartialDatePolicy,
) -> Result<(), ParseError> {
    let Some(primaryid) = report
        .fields
        .get("safetyreportid")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    else {
        emitter.malformed += 1;
        tracing::warn!("skipping safetyreport without a safetyreportid");
        return Ok(());
    };
    let caseid = derive_caseid(&report.fields, &primaryid);

    if is_nullification(report.fields.get("safetyreportnullification")) {
        emitter.nullified.insert(caseid);
        return Ok(());
    }

    let get = |element: &str| report.fields.get(element).cloned();

    let mut demo = RowBuilder::new(Table::Demo, &primaryid, &caseid);
    demo.set("caseversion", get("safetyreportversion"));
    demo.set("fda_dt", get("receiptdate").map(|v| normalize_fda_dt(&v, policy)));
    demo.set("init_fda_dt", get("receivedate"));
    demo.set("rept_dt", get("transmissiondate"));
    demo.set("age", get("patientonsetage"));
    demo.set("age_cod", get("patientonsetageunit"));
    demo.set("sex", get("patientsex"));
    demo.set("wt", get("patientweight"));
    demo.set("occp_cod", get("qualification"));
    demo.set("reporter_country", get("reportercountry"));
    demo.set("occr_country", get("occurcountry"));
    emitter.push(Table::Demo, demo.finish())?;

    for (index, drug) in report.drugs.iter().enumerate() {
        let seq = (index + 1).to_string();
        let get = |element: &str| drug.get(element).cloned();

        let mut row = RowBuilder::new(Table::Drug, &primaryid, &caseid);
        row.set("drug_seq", Some(seq.clone()));
        row.set("role_cod", get("drugcharacterization"));
        row.set("drugname", get("medicinalproduct"));
        row.set("prod_ai", get("activesubstancename"));
        row.set("route", get("drugadministrationroute"));
        row.set("dose_vbm", get("drugdosagetext"));
        row.set("dose_form", get("drugdosageform"));
        row.set("lot_num", get("drugbatchnumb"));
        row.set("nda_num", get("drugauthorizationnumb"));
        emitter.push(Table::Drug, row.finish())?;

        if ["drugstartdate", "drugenddate", "drugtreatmentduration"]
            .iter()
            .any(|e| drug.contains_key(*e))
        {
            let mut row = RowBuilder::new(Table::Ther, &primaryid, &caseid);
            row.set("dsg_drug_seq", Some(seq.clone()));
            row.set("start_dt", get("drugstartdate"));
            row.set("end_dt", get("drugenddate"));
            row.set("dur", get("drugtreatmentduration"));
            row.set("dur_cod", get("drugtreatmentdurationunit"));
            emitter.push(Table::Ther, row.finish())?;
        }

        if let Some(indication) = get("drugindication") {
            let mut row = RowBuilder::new(Table::Indi, &primaryid, &caseid);
            row.set("indi_drug_seq", Some(seq.clone()));
            row.set("indi_pt", Some(indication));
            emitter.push(Table::Indi, row.finish())?;
        }
    }

    for reaction in &report.reactions {
        if let Some(pt) = reaction.get("reactionmeddrapt") {
            let mut row = RowBuilder::new(Table::Reac, &primaryid, &caseid);
            row.set("pt", Some(pt.clone()));
            emitter.push(Table::Reac, row.finish())?;
        }
        if let Some(outcome) = reaction.get("reactionoutcome") {
            let mut row = RowBuilder::new(Table::Outc, &primaryid, &caseid);
            row.set("outc_cod", Some(outcome.clone()));
            emitter.push(Table::Outc, row.finish())?;
        }
    }

    Ok(())
}

struct RowBuilder {
    table: Table,
    values: Vec<Option<String>>,
}

impl RowBuilder {
    fn new(table: Table, primaryid: &str, caseid: &str) -> RowBuilder {
        let mut builder = RowBuilder {
            table,
            values: vec![None; table.columns().len()],
        };
        builder.set("primaryid", Some(primaryid.to_string()));
        builder.set("caseid", Some(caseid.to_string()));
        builder
    }

    fn set(&mut self, column: &str, value: Option<String>) {
        let index = self
            .table
            .column_index(column)
            .expect("projection uses canonical column names");
        self.values[index] = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    }

    fn finish(self) -> Vec<Option<String>> {
        self.values
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::StagingFormat;
    use staging::{read_chunk, StagingArea};
    use std::io::Write;
    use zip::write::FileOptions;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ichicsr>
  <safetyreport>
    <safetyreportversion>2</safetyreportversion>
    <safetyreportid>100232</safetyreportid>
    <receiptdate>20230220</receiptdate>
    <primarysource>
      <reportercountry>US</reportercountry>
      <qualification>1</qualification>
    </primarysource>
    <patient>
      <patientonsetage>64</patientonsetage>
      <patientsex>2</patientsex>
      <drug>
        <drugcharacterization>1</drugcharacterization>
        <medicinalproduct>LIPITOR</medicinalproduct>
        <drugindication>Hyperlipidaemia</drugindication>
        <drugstartdate>20230101</drugstartdate>
        <activesubstance>
          <activesubstancename>ATORVASTATIN</activesubstancename>
        </activesubstance>
      </drug>
      <drug>
        <drugcharacterization>2</drugcharacterization>
        <medicinalproduct>ASPIRIN</medicinalproduct>
      </drug>
      <reaction>
        <reactionmeddrapt>Myalgia</reactionmeddrapt>
        <reactionoutcome>6</reactionoutcome>
      </reaction>
    </patient>
  </safetyreport>
  <safetyreport>
    <safetyreportnullification>1</safetyreportnullification>
    <safetyreportversion>3</safetyreportversion>
    <safetyreportid>1003</safetyreportid>
  </safetyreport>
</ichicsr>
"#;

    fn parse(xml: &str) -> (crate::ParseOutcome, tempfile::TempDir) {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("xml/ADR23Q1.xml", FileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faers_xml.zip");
        std::fs::write(&path, bytes).unwrap();
        let area = StagingArea::create(dir.path().join("stage"), StagingFormat::Csv, 100).unwrap();
        let outcome = crate::parse_archive(&path, &area, PartialDatePolicy::Raw).unwrap();
        (outcome, dir)
    }

    fn rows(outcome: &crate::ParseOutcome, table: Table) -> Vec<Vec<Option<String>>> {
        outcome
            .staged
            .files(table)
            .iter()
            .flat_map(|f| {
                read_chunk(f, table, StagingFormat::Csv)
                    .unwrap()
                    .map(|r| r.unwrap())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn reports_project_into_all_seven_tables() {
        let (outcome, _dir) = parse(SAMPLE);

        let demo = rows(&outcome, Table::Demo);
        assert_eq!(1, demo.len());
        assert_eq!(Some("100232"), demo[0][0].as_deref());
        // caseid = safetyreportid with the version suffix stripped.
        assert_eq!(Some("10023"), demo[0][1].as_deref());
        let fda_dt = Table::Demo.column_index("fda_dt").unwrap();
        assert_eq!(Some("20230220"), demo[0][fda_dt].as_deref());

        let drug = rows(&outcome, Table::Drug);
        assert_eq!(2, drug.len());
        let drugname = Table::Drug.column_index("drugname").unwrap();
        let prod_ai = Table::Drug.column_index("prod_ai").unwrap();
        assert_eq!(Some("LIPITOR"), drug[0][drugname].as_deref());
        assert_eq!(Some("ATORVASTATIN"), drug[0][prod_ai].as_deref());
        assert_eq!(Some("ASPIRIN"), drug[1][drugname].as_deref());
        // The second drug has no active substance of its own.
        assert_eq!(None, drug[1][prod_ai]);

        assert_eq!(1, rows(&outcome, Table::Reac).len());
        assert_eq!(1, rows(&outcome, Table::Outc).len());
        assert_eq!(1, rows(&outcome, Table::Ther).len());
        assert_eq!(1, rows(&outcome, Table::Indi).len());
        assert_eq!(0, rows(&outcome, Table::Rpsr).len());
    }

    #[test]
    fn nullified_reports_are_collected_and_not_emitted() {
        let (outcome, _dir) = parse(SAMPLE);
        assert_eq!(1, outcome.nullified.len());
        // 1003 with version 3 stripped.
        assert!(outcome.nullified.contains("100"));
        assert_eq!(1, rows(&outcome, Table::Demo).len());
    }

    #[test]
    fn reports_without_ids_are_counted_malformed() {
        let xml = r#"<ichicsr><safetyreport><receiptdate>20230101</receiptdate></safetyreport></ichicsr>"#;
        let (outcome, _dir) = parse(xml);
        assert_eq!(1, outcome.malformed_rows);
        assert_eq!(0, rows(&outcome, Table::Demo).len());
    }
}
