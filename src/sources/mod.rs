//! Reputation source adapter configurations
//!
//! Every per-source behavior lives here as data: how to reach the lookup
//! form, how to fill and submit it, and how to read the verdict back.
//! Adding a source means adding a registry entry; the orchestrator never
//! branches on source names.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::surface::Locator;

/// How to read the verdict from a rendered result page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultStrategy {
    /// One primary status label plus zero or more category labels at fixed
    /// locations
    LabeledText {
        status: Locator,
        categories: Locator,
    },
    /// A positional row in a positional table, columns mapped to fields
    Tabular {
        table_index: usize,
        row_index: usize,
        cells: Vec<CellField>,
    },
}

/// Maps one table column position to a named result field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellField {
    pub field: String,
    pub column: usize,
}

impl CellField {
    pub fn new(field: impl Into<String>, column: usize) -> Self {
        Self {
            field: field.into(),
            column,
        }
    }
}

/// Extra interaction required before data entry on some lookup forms
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreSubmitStep {
    /// Pick an option from a multi-choice control by visible text
    SelectOption { locator: Locator, option: String },
}

/// An automated lookup source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutomatedSource {
    pub name: String,
    /// Address of the lookup form
    pub entry_point: String,
    /// Query input field
    pub input: Locator,
    /// Control that triggers the lookup
    pub submit: Locator,
    /// Time to allow the source to render its verdict after submission
    pub settle_delay_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_submit: Option<PreSubmitStep>,
    pub result: ResultStrategy,
}

impl AutomatedSource {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// A source that requires human judgment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManualSource {
    pub name: String,
    /// Address the operator checks by hand
    pub entry_point: String,
}

/// One entry of the source registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SourceAdapter {
    Automated(AutomatedSource),
    Manual(ManualSource),
}

impl SourceAdapter {
    pub fn name(&self) -> &str {
        match self {
            SourceAdapter::Automated(src) => &src.name,
            SourceAdapter::Manual(src) => &src.name,
        }
    }

    pub fn entry_point(&self) -> &str {
        match self {
            SourceAdapter::Automated(src) => &src.entry_point,
            SourceAdapter::Manual(src) => &src.entry_point,
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, SourceAdapter::Manual(_))
    }
}

/// The built-in source registry, in attempt order.
///
/// Order is stable and identical for every indicator.
pub fn builtin_registry() -> Vec<SourceAdapter> {
    let check_url_submit = Locator::xpath("//input[@type='submit' and @value='Check URL']");
    let sitelookup_cells = vec![
        CellField::new("url", 1),
        CellField::new("status", 2),
        CellField::new("categorization", 3),
        CellField::new("trust", 4),
    ];

    vec![
        SourceAdapter::Automated(AutomatedSource {
            name: "mcafee".to_string(),
            entry_point: "https://sitelookup.mcafee.com/".to_string(),
            input: Locator::name("url"),
            submit: check_url_submit.clone(),
            settle_delay_secs: 5,
            pre_submit: None,
            result: ResultStrategy::Tabular {
                table_index: 1,
                row_index: 1,
                cells: sitelookup_cells.clone(),
            },
        }),
        SourceAdapter::Automated(AutomatedSource {
            name: "trendmicro".to_string(),
            entry_point: "https://global.sitesafety.trendmicro.com/result.php".to_string(),
            input: Locator::name("urlname"),
            submit: Locator::css("input[type='submit']"),
            settle_delay_secs: 5,
            pre_submit: None,
            result: ResultStrategy::LabeledText {
                status: Locator::css(".labeltitleresult"),
                categories: Locator::css(".labeltitlesmallresult"),
            },
        }),
        SourceAdapter::Automated(AutomatedSource {
            name: "trellix".to_string(),
            entry_point: "https://trustedsource.org/en/feedback/url?action=checksingle"
                .to_string(),
            input: Locator::name("url"),
            submit: check_url_submit,
            settle_delay_secs: 7,
            pre_submit: Some(PreSubmitStep::SelectOption {
                locator: Locator::name("product"),
                option: "Trellix Endpoint Security Web Control".to_string(),
            }),
            result: ResultStrategy::Tabular {
                table_index: 1,
                row_index: 1,
                cells: sitelookup_cells,
            },
        }),
        SourceAdapter::Manual(ManualSource {
            name: "symantec".to_string(),
            entry_point: "https://sitereview.symantec.com/#/".to_string(),
        }),
    ]
}

/// Load a registry from a JSON file in the same schema as the built-ins.
pub async fn load_registry(path: &Path) -> Result<Vec<SourceAdapter>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read registry from {}", path.display()))?;
    let registry: Vec<SourceAdapter> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse registry in {}", path.display()))?;
    validate_registry(&registry)?;
    Ok(registry)
}

/// Reject registries whose entries would collide in the result mapping.
pub fn validate_registry(registry: &[SourceAdapter]) -> Result<()> {
    if registry.is_empty() {
        bail!("Source registry is empty");
    }
    let mut seen = std::collections::BTreeSet::new();
    for adapter in registry {
        if !seen.insert(adapter.name()) {
            bail!("Duplicate source name in registry: {}", adapter.name());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_order_and_modes() {
        let registry = builtin_registry();
        let names: Vec<&str> = registry.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["mcafee", "trendmicro", "trellix", "symantec"]);

        let manual: Vec<&str> = registry
            .iter()
            .filter(|a| a.is_manual())
            .map(|a| a.name())
            .collect();
        assert_eq!(manual, vec!["symantec"]);

        let with_pre_submit: Vec<&str> = registry
            .iter()
            .filter_map(|a| match a {
                SourceAdapter::Automated(src) if src.pre_submit.is_some() => {
                    Some(src.name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(with_pre_submit, vec!["trellix"]);

        assert!(validate_registry(&registry).is_ok());
    }

    #[test]
    fn registry_entries_parse_from_json() {
        let json = r#"[
            {
                "mode": "automated",
                "name": "example",
                "entry_point": "https://lookup.example.com/",
                "input": { "by": "name", "value": "q" },
                "submit": { "by": "css", "value": "input[type='submit']" },
                "settle_delay_secs": 3,
                "result": {
                    "kind": "tabular",
                    "table_index": 0,
                    "row_index": 1,
                    "cells": [ { "field": "status", "column": 2 } ]
                }
            },
            { "mode": "manual", "name": "analyst", "entry_point": "https://review.example.com/" }
        ]"#;

        let registry: Vec<SourceAdapter> = serde_json::from_str(json).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(!registry[0].is_manual());
        assert!(registry[1].is_manual());
        match &registry[0] {
            SourceAdapter::Automated(src) => {
                assert_eq!(src.settle_delay(), Duration::from_secs(3));
                assert!(matches!(src.result, ResultStrategy::Tabular { .. }));
            }
            _ => panic!("expected automated source"),
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = vec![
            SourceAdapter::Manual(ManualSource {
                name: "twin".to_string(),
                entry_point: "https://a.example.com/".to_string(),
            }),
            SourceAdapter::Manual(ManualSource {
                name: "twin".to_string(),
                entry_point: "https://b.example.com/".to_string(),
            }),
        ];
        assert!(validate_registry(&registry).is_err());
        assert!(validate_registry(&[]).is_err());
    }
}
