use serde::{de, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A FAERS release quarter, like `2023Q1`. Quarters are totally ordered by
/// `(year, quarter)` and always render in canonical upper-case form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quarter {
    year: u16,
    quarter: u8,
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("invalid quarter identifier: '{0}', expected the form YYYYQn with n in 1..=4")]
pub struct QuarterParseError(pub String);

impl Quarter {
    pub fn new(year: u16, quarter: u8) -> Result<Quarter, QuarterParseError> {
        if !(1..=4).contains(&quarter) || !(1969..=2999).contains(&year) {
            return Err(QuarterParseError(format!("{year}Q{quarter}")));
        }
        Ok(Quarter { year, quarter })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn quarter(&self) -> u8 {
        self.quarter
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

impl FromStr for Quarter {
    type Err = QuarterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || QuarterParseError(s.to_string());

        let (year, quarter) = s.split_once(['q', 'Q']).ok_or_else(err)?;
        if year.len() != 4 || quarter.len() != 1 {
            return Err(err());
        }
        let year: u16 = year.parse().map_err(|_| err())?;
        let quarter: u8 = quarter.parse().map_err(|_| err())?;
        Quarter::new(year, quarter).map_err(|_| err())
    }
}

impl Serialize for Quarter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quarter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quarters_parse_case_insensitively_and_render_canonically() {
        for raw in ["2023q1", "2023Q1"] {
            let q: Quarter = raw.parse().unwrap();
            assert_eq!("2023Q1", q.to_string());
        }
        for raw in ["2023Q5", "2023Q0", "23Q1", "2023", "Q1", "2023Q11"] {
            assert!(raw.parse::<Quarter>().is_err(), "accepted: {raw}");
        }
    }

    #[test]
    fn quarters_order_by_year_then_quarter() {
        let mut quarters: Vec<Quarter> = ["2023Q4", "2012Q1", "2023Q1", "2022Q3"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        quarters.sort();
        let rendered: Vec<String> = quarters.iter().map(Quarter::to_string).collect();
        assert_eq!(vec!["2012Q1", "2022Q3", "2023Q1", "2023Q4"], rendered);
    }

}
