//! Indicator extraction from report-document tables
//!
//! The document format itself (PDF pagination, table geometry) is an
//! external concern; this module consumes the rows a [`TableSource`]
//! yields and turns them into the canonical indicator set.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::models::ioc_utils::{contains_url, find_urls};
use crate::models::Indicator;

/// Column headers recognized in extracted tables
pub const COL_INDICATOR: &str = "Indicator";
pub const COL_SHA256: &str = "SHA256 Hash";
pub const COL_TYPE: &str = "Indicator Type";
pub const COL_DESCRIPTION: &str = "Description";
pub const COL_FIRST_SEEN: &str = "First Seen";

/// One table row as the document collaborator yields it: header -> cell text
pub type RawRow = BTreeMap<String, String>;

/// Trait for document table sources
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Source name, for logs
    fn name(&self) -> &'static str;

    /// Yield every table row of the document, in document order
    async fn rows(&self) -> Result<Vec<RawRow>>;
}

/// Table source backed by a JSON file holding an array of row objects.
///
/// Stands in for the PDF table extractor so batch runs and tests share one
/// row format.
pub struct JsonTableSource {
    path: PathBuf,
}

impl JsonTableSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TableSource for JsonTableSource {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn rows(&self) -> Result<Vec<RawRow>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read rows from {}", self.path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse rows in {}", self.path.display()))
    }
}

/// Fetch a source's rows and extract the canonical indicator set.
pub async fn collect_from_source(source: &dyn TableSource) -> Result<Vec<Indicator>> {
    let rows = source.rows().await?;
    tracing::info!(source = source.name(), rows = rows.len(), "Extracted table rows");
    Ok(extract_indicators(&rows))
}

/// Turn raw table rows into the ordered indicator set.
///
/// Row-derived indicators whose sanitized text itself contains a URL are
/// superseded by the blob-level URL pass, which recovers URLs buried in
/// free text and is authoritative for them. Blob URLs come first, then the
/// remaining row-derived indicators in row order.
pub fn extract_indicators(rows: &[RawRow]) -> Vec<Indicator> {
    let mut row_derived = Vec::new();
    let mut blob = String::new();

    for row in rows {
        let Some(raw) = cell(row, COL_INDICATOR).or_else(|| cell(row, COL_SHA256)) else {
            tracing::debug!("Skipping row without indicator or hash cell");
            continue;
        };
        let raw = raw.replace(['\n', '\r'], "").trim().to_string();

        let declared_type = cell(row, COL_TYPE)
            .map(str::to_string)
            .or_else(|| cell(row, COL_SHA256).map(|_| "Hash".to_string()));

        let mut indicator = Indicator::from_raw(&raw);
        indicator.declared_type = declared_type;
        indicator.description = cell(row, COL_DESCRIPTION).map(str::to_string);
        indicator.first_seen = cell(row, COL_FIRST_SEEN).map(str::to_string);

        blob.push_str(&indicator.normalized_text);
        blob.push('\n');
        row_derived.push(indicator);
    }

    let mut indicators: Vec<Indicator> =
        find_urls(&blob).iter().map(|u| Indicator::from_url(u)).collect();
    indicators.extend(
        row_derived
            .into_iter()
            .filter(|i| !contains_url(&i.normalized_text)),
    );
    indicators
}

fn cell<'a>(row: &'a RawRow, column: &str) -> Option<&'a str> {
    row.get(column).map(String::as_str).filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IocKind;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn takes_indicator_cell_then_hash_cell_and_skips_bare_rows() {
        let hash = "d".repeat(64);
        let rows = vec![
            row(&[(COL_INDICATOR, "8.8.8.8"), (COL_TYPE, "IP")]),
            row(&[(COL_SHA256, hash.as_str())]),
            row(&[(COL_DESCRIPTION, "no indicator at all")]),
        ];

        let indicators = extract_indicators(&rows);
        assert_eq!(indicators.len(), 2);
        assert_eq!(indicators[0].normalized_text, "8.8.8.8");
        assert_eq!(indicators[0].kind, IocKind::Ip);
        assert_eq!(indicators[1].normalized_text, hash);
        assert_eq!(indicators[1].kind, IocKind::Hash);
        assert_eq!(indicators[1].declared_type.as_deref(), Some("Hash"));
    }

    #[test]
    fn url_rows_are_superseded_by_the_blob_pass() {
        let rows = vec![row(&[
            (COL_INDICATOR, "hxxps://bad[.]example[.]com"),
            (COL_TYPE, "URL"),
            (COL_DESCRIPTION, "phishing landing page"),
        ])];

        let indicators = extract_indicators(&rows);
        assert_eq!(indicators.len(), 1, "expected exactly one entry for the URL");
        assert_eq!(indicators[0].normalized_text, "https://bad.example.com");
        assert_eq!(indicators[0].kind, IocKind::Url);
        // the blob pass carries no row provenance
        assert_eq!(indicators[0].description, None);
    }

    #[test]
    fn blob_urls_come_first_then_row_order() {
        let hash = "a1".repeat(32);
        let rows = vec![
            row(&[(COL_SHA256, hash.as_str())]),
            row(&[(COL_INDICATOR, "1.2.3.4"), (COL_TYPE, "IP")]),
            row(&[(
                COL_INDICATOR,
                "C2 beacon at https://evil[.]com/gate observed twice",
            )]),
        ];

        let indicators = extract_indicators(&rows);
        assert_eq!(indicators.len(), 3);
        assert_eq!(indicators[0].normalized_text, "https://evil.com/gate");
        assert_eq!(indicators[0].kind, IocKind::Url);
        assert_eq!(indicators[1].normalized_text, hash);
        assert_eq!(indicators[2].normalized_text, "1.2.3.4");
    }

    #[test]
    fn carries_provenance_for_row_derived_indicators() {
        let rows = vec![row(&[
            (COL_INDICATOR, "8.8.8.8"),
            (COL_TYPE, "IP"),
            (COL_DESCRIPTION, "resolver"),
            (COL_FIRST_SEEN, "2024-01-02"),
        ])];

        let indicators = extract_indicators(&rows);
        assert_eq!(indicators[0].description.as_deref(), Some("resolver"));
        assert_eq!(indicators[0].first_seen.as_deref(), Some("2024-01-02"));
        assert_eq!(indicators[0].declared_type.as_deref(), Some("IP"));
    }

    #[tokio::test]
    async fn collects_via_a_table_source() {
        let mut source = MockTableSource::new();
        source.expect_name().return_const("mock");
        source.expect_rows().returning(|| {
            Ok(vec![
                [(COL_INDICATOR.to_string(), "hxxp://evil[.]com".to_string())]
                    .into_iter()
                    .collect(),
            ])
        });

        let indicators = collect_from_source(&source).await.unwrap();
        assert_eq!(indicators.len(), 1);
        assert_eq!(indicators[0].normalized_text, "http://evil.com");
    }
}
