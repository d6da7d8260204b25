use crate::AcquireError;
use lazy_static::lazy_static;
use models::Quarter;
use regex::Regex;
use std::collections::BTreeMap;
use url::Url;

lazy_static! {
    static ref HREF: Regex = Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref QUARTER_TOKEN: Regex = Regex::new(r"(?i)(19|20)\d{2}\s*q\s*[1-4]").unwrap();
}

/// One advertised release: the quarter and its download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub quarter: Quarter,
    pub url: Url,
}

/// Fetches the upstream index page and returns the advertised quarters in
/// ascending order.
pub async fn discover(
    client: &reqwest::Client,
    index_url: &str,
) -> Result<Vec<CatalogEntry>, AcquireError> {
    let url = Url::parse(index_url)?;
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AcquireError::Status { status, url });
    }
    let body = response.text().await?;
    let entries = parse_catalog(&body, &url)?;
    tracing::info!(quarters = entries.len(), index = %url, "discovered upstream catalog");
    Ok(entries)
}

/// Scrapes zip links carrying a `YYYYQn` token out of the index HTML.
/// A quarter advertised by several links keeps the longest target, then the
/// lexically smallest; output is sorted ascending by quarter.
pub fn parse_catalog(html: &str, base: &Url) -> Result<Vec<CatalogEntry>, AcquireError> {
    let mut chosen: BTreeMap<Quarter, String> = BTreeMap::new();

    for capture in HREF.captures_iter(html) {
        let target = capture[1].trim();
        if !target.to_ascii_lowercase().contains(".zip") {
            continue;
        }
        let Some(token) = QUARTER_TOKEN.find(target) else {
            continue;
        };
        let normalized: String = token
            .as_str()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let Ok(quarter) = normalized.parse::<Quarter>() else {
            continue;
        };

        let replaces = match chosen.get(&quarter) {
            Some(current) => {
                target.len() > current.len()
                    || (target.len() == current.len() && target < current.as_str())
            }
            None => true,
        };
        if replaces {
            chosen.insert(quarter, target.to_string());
        }
    }

    let mut entries = Vec::with_capacity(chosen.len());
    for (quarter, target) in chosen {
        entries.push(CatalogEntry {
            quarter,
            url: base.join(&target)?,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod test {
    use super::*;

    fn base() -> Url {
        Url::parse("https://fis.fda.gov/content/Exports/index.html").unwrap()
    }

    #[test]
    fn links_are_scraped_sorted_and_joined() {
        let html = r#"
            <a href="faers_ascii_2023q2.zip">ASCII</a>
            <a HREF='faers_ascii_2012Q4.zip'>older</a>
            <a href="notes.pdf">notes</a>
            <a href="faers_xml_2023q1.zip">XML</a>
        "#;
        let entries = parse_catalog(html, &base()).unwrap();
        let quarters: Vec<String> = entries.iter().map(|e| e.quarter.to_string()).collect();
        assert_eq!(vec!["2012Q4", "2023Q1", "2023Q2"], quarters);
        assert_eq!(
            "https://fis.fda.gov/content/Exports/faers_ascii_2023q2.zip",
            entries[2].url.as_str()
        );
    }

    #[test]
    fn duplicate_quarters_deconflict_by_longest_then_lexical() {
        let html = r#"
            <a href="2023q1.zip">short</a>
            <a href="faers_ascii_2023q1.zip">long</a>
            <a href="faers_ascii_2023q1.zip">long, lexically later</a>
        "#;
        let entries = parse_catalog(html, &base()).unwrap();
        assert_eq!(1, entries.len());
        assert!(entries[0].url.as_str().ends_with("faers_ascii_2023q1.zip"));
    }

    #[test]
    fn non_zip_links_are_ignored() {
        let html = r#"<a href="report_2023q1.html">not an archive</a>"#;
        assert!(parse_catalog(html, &base()).unwrap().is_empty());
    }
}
