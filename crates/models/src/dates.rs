use crate::config::PartialDatePolicy;
use chrono::NaiveDate;
use std::cmp::Ordering;

/// Parses an `FDA_DT` value in the full `YYYYMMDD` form. Partial dates
/// (`YYYY`, `YYYYMM`) and anything unparseable yield `None`, which sorts
/// below every present date when selecting case versions.
pub fn parse_fda_dt(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

/// Applies the configured partial-date normalization to a raw `FDA_DT`
/// value before it is loaded. Under `Raw` the string passes through
/// untouched; under `PadWith01`, `YYYY` becomes `YYYY0101` and `YYYYMM`
/// becomes `YYYYMM01`.
pub fn normalize_fda_dt(raw: &str, policy: PartialDatePolicy) -> String {
    let trimmed = raw.trim();
    if policy == PartialDatePolicy::Raw || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return trimmed.to_string();
    }
    match trimmed.len() {
        4 => format!("{trimmed}0101"),
        6 => format!("{trimmed}01"),
        _ => trimmed.to_string(),
    }
}

/// The FDA case-version ordering key: greatest `fda_dt` wins, missing or
/// partial dates rank below any present date, and ties break toward the
/// greatest `primaryid` (numerically, when both sides are digit strings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionKey {
    pub fda_dt: Option<NaiveDate>,
    pub primaryid: String,
}

impl VersionKey {
    pub fn new(fda_dt_raw: Option<&str>, primaryid: &str) -> VersionKey {
        VersionKey {
            fda_dt: fda_dt_raw.and_then(parse_fda_dt),
            primaryid: primaryid.trim().to_string(),
        }
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fda_dt
            .cmp(&other.fda_dt)
            .then_with(|| compare_primaryids(&self.primaryid, &other.primaryid))
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Primaryids are digit strings in practice; comparing (length, lexical)
// orders them numerically without overflow concerns. Non-digit ids fall
// back to plain lexical order so the result stays total and deterministic.
fn compare_primaryids(a: &str, b: &str) -> Ordering {
    let a_digits = !a.is_empty() && a.bytes().all(|c| c.is_ascii_digit());
    let b_digits = !b.is_empty() && b.bytes().all(|c| c.is_ascii_digit());
    if a_digits && b_digits {
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn full_dates_parse_and_partials_do_not() {
        assert!(parse_fda_dt("20230315").is_some());
        assert_eq!(None, parse_fda_dt("2023"));
        assert_eq!(None, parse_fda_dt("202303"));
        assert_eq!(None, parse_fda_dt(""));
        assert_eq!(None, parse_fda_dt("20231341"));
        assert_eq!(None, parse_fda_dt("not-a-date"));
    }

    #[test]
    fn missing_dates_sort_below_any_present_date() {
        let partial = VersionKey::new(Some("2022"), "9001");
        let full = VersionKey::new(Some("20220315"), "1");
        assert!(partial < full);
    }

    #[test]
    fn ties_on_date_break_by_numeric_primaryid() {
        let a = VersionKey::new(Some("20230301"), "500");
        let b = VersionKey::new(Some("20230301"), "501");
        assert!(a < b);

        // Numeric, not lexical: 99 < 500.
        let small = VersionKey::new(Some("20230301"), "99");
        let large = VersionKey::new(Some("20230301"), "500");
        assert!(small < large);
    }

    #[test]
    fn padding_policy_normalizes_partial_dates() {
        assert_eq!("20220101", normalize_fda_dt("2022", PartialDatePolicy::PadWith01));
        assert_eq!("20220301", normalize_fda_dt("202203", PartialDatePolicy::PadWith01));
        assert_eq!("20220315", normalize_fda_dt("20220315", PartialDatePolicy::PadWith01));
        assert_eq!("2022", normalize_fda_dt("2022", PartialDatePolicy::Raw));
    }
}
