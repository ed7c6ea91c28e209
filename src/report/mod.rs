//! Result aggregation and export
//!
//! Accumulates per-indicator reputation records into one table, validates
//! it, and projects it into the export artifacts: a plain indicator list,
//! a CSV table, and a printable Markdown report.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::models::{AggregatedResult, Indicator, ReputationRecord};
use crate::sources::SourceAdapter;

/// Name of the mandatory first column of the finalized table
pub const INDICATOR_COLUMN: &str = "indicator";

/// Result fields rendered first, in this order, when present
const PREFERRED_FIELDS: [&str; 5] = ["status", "categorization", "trust", "categories", "url"];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AggregationError {
    #[error("no aggregated results to export")]
    Empty,
    #[error("result table is missing the indicator column")]
    MissingIndicatorColumn,
}

/// Accumulates one [`AggregatedResult`] per indicator across the run
pub struct ResultAggregator {
    source_names: Vec<String>,
    results: Vec<AggregatedResult>,
}

impl ResultAggregator {
    pub fn new(registry: &[SourceAdapter]) -> Self {
        Self {
            source_names: registry.iter().map(|a| a.name().to_string()).collect(),
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, indicator: Indicator, sources: BTreeMap<String, ReputationRecord>) {
        self.results.push(AggregatedResult {
            indicator,
            sources,
            checked_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Project the accumulated results into the export table. Read-only
    /// over the results; fails when the table would be structurally
    /// unusable for export.
    pub fn finalize(self) -> Result<ResultTable, AggregationError> {
        let mut columns = vec![INDICATOR_COLUMN.to_string()];
        columns.extend(self.source_names);
        let table = ResultTable {
            columns,
            rows: self.results,
        };
        table.validate()?;
        Ok(table)
    }
}

/// Finalized export table: one row per indicator, one column per source
#[derive(Debug, Clone)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<AggregatedResult>,
}

impl ResultTable {
    pub fn validate(&self) -> Result<(), AggregationError> {
        if self.rows.is_empty() {
            return Err(AggregationError::Empty);
        }
        if !self.columns.iter().any(|c| c == INDICATOR_COLUMN) {
            return Err(AggregationError::MissingIndicatorColumn);
        }
        Ok(())
    }

    fn source_columns(&self) -> impl Iterator<Item = &String> {
        self.columns.iter().filter(|c| *c != INDICATOR_COLUMN)
    }
}

/// Write one normalized indicator per line.
pub fn write_indicator_list(path: &Path, indicators: &[Indicator]) -> Result<()> {
    let mut out = String::new();
    for indicator in indicators {
        out.push_str(&indicator.normalized_text);
        out.push('\n');
    }
    fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), count = indicators.len(), "Indicator list written");
    Ok(())
}

/// Write the finalized table as CSV, one cell per source verdict.
pub fn write_results_csv(path: &Path, table: &ResultTable) -> Result<()> {
    let mut out = String::new();
    out.push_str(
        &table
            .columns
            .iter()
            .map(|c| csv_escape(c))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');

    for row in &table.rows {
        let mut cells = vec![csv_escape(&row.indicator.normalized_text)];
        for source in table.source_columns() {
            cells.push(csv_escape(&render_record(row.sources.get(source))));
        }
        out.push_str(&cells.join(","));
        out.push('\n');
    }

    fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = table.rows.len(), "Results CSV written");
    Ok(())
}

/// Write the printable report: one section per indicator, one subsection
/// per source, one field per line.
pub fn write_results_report(path: &Path, table: &ResultTable) -> Result<()> {
    let mut out = String::new();
    out.push_str("# IOC Reputation Report\n\n");
    out.push_str(&format!("- Generated: {}\n", Utc::now().to_rfc3339()));
    out.push_str(&format!("- Indicators: {}\n\n", table.rows.len()));

    for row in &table.rows {
        out.push_str(&format!("## {}\n", row.indicator.normalized_text));
        out.push_str(&format!("- Kind: {}\n", row.indicator.kind));
        if let Some(desc) = &row.indicator.description {
            out.push_str(&format!("- Description: {desc}\n"));
        }
        if let Some(first_seen) = &row.indicator.first_seen {
            out.push_str(&format!("- First seen: {first_seen}\n"));
        }
        out.push('\n');

        for source in table.source_columns() {
            out.push_str(&format!("### {source}\n"));
            match row.sources.get(source) {
                Some(ReputationRecord::Verdict { fields, .. }) => {
                    for (key, value) in ordered_fields(fields) {
                        out.push_str(&format!("- {}: {}\n", field_label(key), value));
                    }
                }
                Some(ReputationRecord::Manual { category, risk }) => {
                    if category.is_empty() {
                        out.push_str("- Manual review required\n");
                    } else {
                        out.push_str(&format!("- Category: {category}\n"));
                    }
                    if let Some(risk) = risk {
                        out.push_str(&format!("- Risk: {risk}\n"));
                    }
                    out.push_str("- Entered manually\n");
                }
                Some(ReputationRecord::Failed {
                    reason,
                    verification,
                }) => {
                    out.push_str(&format!("- FAILED: {reason}\n"));
                    out.push_str(&format!(
                        "- Last checkpoint: {}\n",
                        verification.last_checkpoint()
                    ));
                }
                None => out.push_str("- Not checked\n"),
            }
            out.push('\n');
        }
    }

    fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Printable report written");
    Ok(())
}

/// Render one source's record into a single cell of text.
fn render_record(record: Option<&ReputationRecord>) -> String {
    match record {
        None => "-".to_string(),
        Some(ReputationRecord::Verdict { fields, .. }) => {
            let parts: Vec<String> = ordered_fields(fields)
                .into_iter()
                .map(|(key, value)| format!("{}: {}", field_label(key), value))
                .collect();
            if parts.is_empty() {
                "No result fields".to_string()
            } else {
                parts.join("; ")
            }
        }
        Some(ReputationRecord::Manual { category, risk }) => {
            let mut parts = Vec::new();
            if category.is_empty() {
                parts.push("Manual review required".to_string());
            } else {
                parts.push(format!("Category: {category}"));
            }
            if let Some(risk) = risk {
                parts.push(format!("Risk: {risk}"));
            }
            parts.push("(manual)".to_string());
            parts.join("; ")
        }
        Some(ReputationRecord::Failed {
            reason,
            verification,
        }) => format!(
            "FAILED: {reason} (last checkpoint: {})",
            verification.last_checkpoint()
        ),
    }
}

/// Non-empty fields, preferred names first, the rest in map order.
fn ordered_fields(fields: &BTreeMap<String, String>) -> Vec<(&str, &str)> {
    let mut out: Vec<(&str, &str)> = Vec::new();
    for key in PREFERRED_FIELDS {
        if let Some(value) = fields.get(key) {
            if !value.is_empty() {
                out.push((key, value.as_str()));
            }
        }
    }
    for (key, value) in fields {
        if !PREFERRED_FIELDS.contains(&key.as_str()) && !value.is_empty() {
            out.push((key.as_str(), value.as_str()));
        }
    }
    out
}

fn field_label(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureReason, VerificationState};
    use crate::sources::builtin_registry;

    fn verdict(pairs: &[(&str, &str)]) -> ReputationRecord {
        ReputationRecord::Verdict {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            verification: VerificationState {
                page_loaded: true,
                input_found: true,
                submit_clicked: true,
                result_extracted: true,
            },
        }
    }

    fn sample_sources() -> BTreeMap<String, ReputationRecord> {
        let mut sources = BTreeMap::new();
        sources.insert(
            "mcafee".to_string(),
            verdict(&[
                ("status", "Malicious"),
                ("categorization", "Malicious Sites"),
                ("trust", "Minimal"),
            ]),
        );
        sources.insert(
            "symantec".to_string(),
            ReputationRecord::Manual {
                category: "Phishing".to_string(),
                risk: None,
            },
        );
        sources.insert(
            "trendmicro".to_string(),
            ReputationRecord::Failed {
                reason: FailureReason::Exception,
                verification: VerificationState {
                    page_loaded: true,
                    ..VerificationState::default()
                },
            },
        );
        sources
    }

    #[test]
    fn finalizing_without_results_fails() {
        let aggregator = ResultAggregator::new(&builtin_registry());
        assert_eq!(aggregator.finalize().unwrap_err(), AggregationError::Empty);
    }

    #[test]
    fn finalized_table_has_indicator_column_first() {
        let mut aggregator = ResultAggregator::new(&builtin_registry());
        aggregator.push(Indicator::from_raw("8.8.8.8"), sample_sources());

        let table = aggregator.finalize().unwrap();
        assert_eq!(table.columns[0], INDICATOR_COLUMN);
        assert_eq!(
            table.columns,
            vec!["indicator", "mcafee", "trendmicro", "trellix", "symantec"]
        );
        assert!(table.validate().is_ok());
    }

    #[test]
    fn missing_indicator_column_is_rejected() {
        let mut aggregator = ResultAggregator::new(&builtin_registry());
        aggregator.push(Indicator::from_raw("8.8.8.8"), sample_sources());
        let mut table = aggregator.finalize().unwrap();
        table.columns.retain(|c| c != INDICATOR_COLUMN);
        assert_eq!(
            table.validate().unwrap_err(),
            AggregationError::MissingIndicatorColumn
        );
    }

    #[test]
    fn cells_render_each_outcome_visibly() {
        let sources = sample_sources();
        assert_eq!(
            render_record(sources.get("mcafee")),
            "Status: Malicious; Categorization: Malicious Sites; Trust: Minimal"
        );
        assert_eq!(
            render_record(sources.get("symantec")),
            "Category: Phishing; (manual)"
        );
        assert_eq!(
            render_record(sources.get("trendmicro")),
            "FAILED: EXCEPTION (last checkpoint: page_loaded)"
        );
        assert_eq!(render_record(None), "-");
    }

    #[test]
    fn csv_escapes_delimiters_and_quotes() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn exports_write_all_three_artifacts() {
        let dir = std::env::temp_dir().join(format!("iocforge-report-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let mut aggregator = ResultAggregator::new(&builtin_registry());
        let indicator = Indicator::from_raw("hxxp://evil[.]com");
        aggregator.push(indicator.clone(), sample_sources());
        let table = aggregator.finalize().unwrap();

        let list = dir.join("extracted_iocs.txt");
        let csv = dir.join("ioc_results.csv");
        let report = dir.join("ioc_results.md");
        write_indicator_list(&list, std::slice::from_ref(&indicator)).unwrap();
        write_results_csv(&csv, &table).unwrap();
        write_results_report(&report, &table).unwrap();

        assert_eq!(fs::read_to_string(&list).unwrap(), "http://evil.com\n");

        let csv_text = fs::read_to_string(&csv).unwrap();
        assert!(csv_text.starts_with("indicator,mcafee,trendmicro,trellix,symantec\n"));
        assert!(csv_text.contains("http://evil.com"));
        assert!(csv_text.contains("FAILED: EXCEPTION"));
        assert!(csv_text.contains("-")); // trellix was never attempted

        let report_text = fs::read_to_string(&report).unwrap();
        assert!(report_text.contains("## http://evil.com"));
        assert!(report_text.contains("### mcafee"));
        assert!(report_text.contains("- Status: Malicious"));
        assert!(report_text.contains("- Not checked"));

        fs::remove_dir_all(&dir).ok();
    }
}
