use std::fmt;
use std::str::FromStr;

/// One of the seven FAERS relational tables. `Demo` holds one row per case
/// version; the rest are children keyed by `primaryid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Demo,
    Drug,
    Reac,
    Outc,
    Rpsr,
    Ther,
    Indi,
}

// Column layouts follow the published FAERS ASCII file descriptions. Values
// are loaded as opaque text; these lists fix the column order used by staged
// chunks, bulk loads, and the create-if-absent DDL.
const DEMO_COLUMNS: &[&str] = &[
    "primaryid",
    "caseid",
    "caseversion",
    "i_f_code",
    "event_dt",
    "mfr_dt",
    "init_fda_dt",
    "fda_dt",
    "rept_cod",
    "auth_num",
    "mfr_num",
    "mfr_sndr",
    "lit_ref",
    "age",
    "age_cod",
    "age_grp",
    "sex",
    "e_sub",
    "wt",
    "wt_cod",
    "rept_dt",
    "to_mfr",
    "occp_cod",
    "reporter_country",
    "occr_country",
];

const DRUG_COLUMNS: &[&str] = &[
    "primaryid",
    "caseid",
    "drug_seq",
    "role_cod",
    "drugname",
    "prod_ai",
    "val_vbm",
    "route",
    "dose_vbm",
    "cum_dose_chr",
    "cum_dose_unit",
    "dechal",
    "rechal",
    "lot_num",
    "exp_dt",
    "nda_num",
    "dose_amt",
    "dose_unit",
    "dose_form",
    "dose_freq",
];

const REAC_COLUMNS: &[&str] = &["primaryid", "caseid", "pt", "drug_rec_act"];

const OUTC_COLUMNS: &[&str] = &["primaryid", "caseid", "outc_cod"];

const RPSR_COLUMNS: &[&str] = &["primaryid", "caseid", "rpsr_cod"];

const THER_COLUMNS: &[&str] = &[
    "primaryid",
    "caseid",
    "dsg_drug_seq",
    "start_dt",
    "end_dt",
    "dur",
    "dur_cod",
];

const INDI_COLUMNS: &[&str] = &["primaryid", "caseid", "indi_drug_seq", "indi_pt"];

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Demo,
        Table::Drug,
        Table::Reac,
        Table::Outc,
        Table::Rpsr,
        Table::Ther,
        Table::Indi,
    ];

    /// The six child tables, every one keyed by `primaryid` (and carrying a
    /// materialized `caseid`).
    pub const CHILDREN: [Table; 6] = [
        Table::Drug,
        Table::Reac,
        Table::Outc,
        Table::Rpsr,
        Table::Ther,
        Table::Indi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Demo => "demo",
            Table::Drug => "drug",
            Table::Reac => "reac",
            Table::Outc => "outc",
            Table::Rpsr => "rpsr",
            Table::Ther => "ther",
            Table::Indi => "indi",
        }
    }

    /// Canonical column names, lower-cased, in staged/loaded order. The
    /// first two columns of every table are `primaryid` and `caseid`.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Demo => DEMO_COLUMNS,
            Table::Drug => DRUG_COLUMNS,
            Table::Reac => REAC_COLUMNS,
            Table::Outc => OUTC_COLUMNS,
            Table::Rpsr => RPSR_COLUMNS,
            Table::Ther => THER_COLUMNS,
            Table::Indi => INDI_COLUMNS,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns().iter().position(|c| *c == name)
    }

    /// Classifies an archive member name like `DEMO23Q1.TXT` or
    /// `ADR23Q1.xml`. Deletion files (`DELE*.TXT`) are not table members.
    pub fn from_member_name(name: &str) -> Option<Table> {
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let upper = base.to_ascii_uppercase();
        Table::ALL
            .iter()
            .copied()
            .find(|t| upper.starts_with(&t.as_str().to_ascii_uppercase()))
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Table::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("unknown FAERS table: '{s}'"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn member_names_classify_to_tables() {
        assert_eq!(Some(Table::Demo), Table::from_member_name("DEMO23Q1.TXT"));
        assert_eq!(Some(Table::Drug), Table::from_member_name("ascii/DRUG23Q1.txt"));
        assert_eq!(Some(Table::Indi), Table::from_member_name("INDI12Q4.TXT"));
        assert_eq!(None, Table::from_member_name("DELE23Q1.TXT"));
        assert_eq!(None, Table::from_member_name("README.doc"));
    }

    #[test]
    fn every_table_leads_with_primaryid_and_caseid() {
        for table in Table::ALL {
            assert_eq!("primaryid", table.columns()[0], "{table}");
            assert_eq!("caseid", table.columns()[1], "{table}");
        }
    }
}
