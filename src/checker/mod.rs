//! Multi-source reputation check orchestrator
//!
//! Drives every registered source through the verification state machine
//! for one indicator at a time. Sources fail independently: a failed
//! attempt becomes a `Failed` record, never an error to the caller, so the
//! result mapping always covers the whole registry.

pub mod decision;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::{FailureReason, Indicator, ReputationRecord, VerificationState};
use crate::sources::{
    AutomatedSource, ManualSource, PreSubmitStep, ResultStrategy, SourceAdapter,
};
use crate::surface::{ElementHandle, InteractionSurface, Locator, SurfaceError};
use decision::DecisionChannel;

/// Tuning knobs for the verification state machine
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Upper bound on waiting for any one element to appear
    pub locate_timeout: Duration,
    /// Interval between readiness probes
    pub poll_interval: Duration,
    /// Pause between source attempts, success or failure
    pub cooldown: Duration,
    /// Where result markup and failure snapshots land; `None` disables
    /// diagnostics
    pub artifacts_dir: Option<PathBuf>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            locate_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            cooldown: Duration::from_secs(2),
            artifacts_dir: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum AttemptError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("result extraction failed: {0}")]
    Extraction(String),
}

impl AttemptError {
    fn reason(&self) -> FailureReason {
        match self {
            AttemptError::Surface(e) if e.is_interruption() => {
                FailureReason::UnexpectedInterruption
            }
            _ => FailureReason::Exception,
        }
    }
}

/// Orchestrates reputation checks across the source registry
pub struct ReputationChecker {
    registry: Vec<SourceAdapter>,
    options: CheckOptions,
}

impl ReputationChecker {
    pub fn new(registry: Vec<SourceAdapter>, options: CheckOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &[SourceAdapter] {
        &self.registry
    }

    /// Check one indicator against every registered source, in registry
    /// order. The returned mapping has exactly one entry per source.
    pub async fn check_indicator(
        &self,
        indicator: &Indicator,
        surface: &mut dyn InteractionSurface,
        decisions: &dyn DecisionChannel,
    ) -> BTreeMap<String, ReputationRecord> {
        let mut records = BTreeMap::new();

        for adapter in &self.registry {
            let record = match adapter {
                SourceAdapter::Manual(source) => {
                    self.run_manual(indicator, source, decisions).await
                }
                SourceAdapter::Automated(source) => {
                    self.run_automated(indicator, source, surface).await
                }
            };
            records.insert(adapter.name().to_string(), record);
            tokio::time::sleep(self.options.cooldown).await;
        }

        records
    }

    async fn run_manual(
        &self,
        indicator: &Indicator,
        source: &ManualSource,
        decisions: &dyn DecisionChannel,
    ) -> ReputationRecord {
        match decisions.request_verdict(indicator, source).await {
            Ok(verdict) => ReputationRecord::Manual {
                category: verdict.category,
                risk: verdict.risk,
            },
            Err(e) => {
                tracing::error!(
                    source = %source.name,
                    indicator = %indicator.normalized_text,
                    error = %e,
                    "Manual verdict unavailable"
                );
                ReputationRecord::Failed {
                    reason: FailureReason::Exception,
                    verification: VerificationState::default(),
                }
            }
        }
    }

    async fn run_automated(
        &self,
        indicator: &Indicator,
        source: &AutomatedSource,
        surface: &mut dyn InteractionSurface,
    ) -> ReputationRecord {
        let mut verification = VerificationState::default();

        match self
            .attempt(indicator, source, surface, &mut verification)
            .await
        {
            Ok(fields) => ReputationRecord::Verdict {
                fields,
                verification,
            },
            Err(err) => {
                let reason = err.reason();
                tracing::error!(
                    source = %source.name,
                    indicator = %indicator.normalized_text,
                    error = %err,
                    checkpoint = verification.last_checkpoint(),
                    "Source attempt failed"
                );
                self.capture_failure_snapshot(source, surface, reason).await;
                ReputationRecord::Failed {
                    reason,
                    verification,
                }
            }
        }
    }

    /// One pass through the verification state machine. Checkpoints are
    /// set as soon as the corresponding step completes; on error the state
    /// handed back shows how far the attempt progressed.
    async fn attempt(
        &self,
        indicator: &Indicator,
        source: &AutomatedSource,
        surface: &mut dyn InteractionSurface,
        verification: &mut VerificationState,
    ) -> Result<BTreeMap<String, String>, AttemptError> {
        surface.navigate(&source.entry_point).await?;
        verification.page_loaded = true;
        tracing::info!(source = %source.name, "Page loaded");

        if let Some(PreSubmitStep::SelectOption { locator, option }) = &source.pre_submit {
            let control = self.wait_for_element(surface, locator).await?;
            surface.select_option(&control, option).await?;
            tracing::debug!(source = %source.name, option = %option, "Pre-submit option selected");
        }

        if let Some(text) = surface.dismiss_interruption().await? {
            tracing::warn!(source = %source.name, alert = %text, "Dismissed interruption");
        }

        let input = self.wait_for_element(surface, &source.input).await?;
        verification.input_found = true;
        tracing::info!(source = %source.name, "Input field found");

        surface.clear(&input).await?;
        surface
            .type_text(&input, &indicator.normalized_text)
            .await?;

        let submit = self.wait_for_element(surface, &source.submit).await?;
        surface.click(&submit).await?;
        verification.submit_clicked = true;
        tracing::info!(source = %source.name, "Submit clicked");

        let outcome = self.wait_for_result(source, surface).await;
        self.persist_markup(source, surface).await;
        let fields = outcome?;
        verification.result_extracted = true;
        tracing::info!(source = %source.name, "Result extracted");

        Ok(fields)
    }

    /// Poll for an element until it appears or the locate timeout elapses.
    async fn wait_for_element(
        &self,
        surface: &mut dyn InteractionSurface,
        locator: &Locator,
    ) -> Result<ElementHandle, AttemptError> {
        let deadline = Instant::now() + self.options.locate_timeout;
        loop {
            match surface.locate(locator).await {
                Ok(element) => return Ok(element),
                Err(SurfaceError::NotFound(desc)) => {
                    if Instant::now() >= deadline {
                        return Err(SurfaceError::NotFound(desc).into());
                    }
                    tokio::time::sleep(self.options.poll_interval).await;
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Poll the result strategy until it extracts or the source's settle
    /// delay elapses. Interruptions abort immediately; anything else is
    /// treated as "not rendered yet" until the deadline.
    async fn wait_for_result(
        &self,
        source: &AutomatedSource,
        surface: &mut dyn InteractionSurface,
    ) -> Result<BTreeMap<String, String>, AttemptError> {
        let deadline = Instant::now() + source.settle_delay();
        loop {
            match try_extract(&source.result, surface).await {
                Ok(fields) => return Ok(fields),
                Err(AttemptError::Surface(e)) if e.is_interruption() => {
                    return Err(AttemptError::Surface(e));
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(err);
                    }
                    tokio::time::sleep(self.options.poll_interval).await;
                }
            }
        }
    }

    /// Persist the rendered result page for diagnostics. Best effort.
    async fn persist_markup(&self, source: &AutomatedSource, surface: &mut dyn InteractionSurface) {
        let Some(dir) = &self.options.artifacts_dir else {
            return;
        };
        match surface.current_markup().await {
            Ok(markup) => {
                let path = dir.join(format!("{}_result.html", source.name));
                if let Err(e) = tokio::fs::write(&path, markup).await {
                    tracing::warn!(source = %source.name, error = %e, "Failed to persist result markup");
                }
            }
            Err(e) => {
                tracing::warn!(source = %source.name, error = %e, "Failed to read result markup");
            }
        }
    }

    /// Capture a screenshot of the failed attempt. Best effort.
    async fn capture_failure_snapshot(
        &self,
        source: &AutomatedSource,
        surface: &mut dyn InteractionSurface,
        reason: FailureReason,
    ) {
        let Some(dir) = &self.options.artifacts_dir else {
            return;
        };
        let suffix = match reason {
            FailureReason::UnexpectedInterruption => "interruption",
            FailureReason::Exception => "failure",
        };
        let path = dir.join(format!("{}_{}.png", source.name, suffix));
        if let Err(e) = surface.capture_snapshot(&path).await {
            tracing::warn!(source = %source.name, error = %e, "Failed to capture failure snapshot");
        }
    }
}

async fn try_extract(
    strategy: &ResultStrategy,
    surface: &mut dyn InteractionSurface,
) -> Result<BTreeMap<String, String>, AttemptError> {
    match strategy {
        ResultStrategy::LabeledText { status, categories } => {
            let status_el = surface.locate(status).await?;
            let status_text = surface.read_text(&status_el).await?.trim().to_string();
            if status_text.is_empty() {
                return Err(AttemptError::Extraction("status label is empty".to_string()));
            }
            let joined = surface
                .read_text_all(categories)
                .await?
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(", ");

            let mut fields = BTreeMap::new();
            fields.insert("status".to_string(), status_text);
            fields.insert("categories".to_string(), joined);
            Ok(fields)
        }
        ResultStrategy::Tabular {
            table_index,
            row_index,
            cells,
        } => {
            let tables = surface.read_tables().await?;
            let table = tables.get(*table_index).ok_or_else(|| {
                AttemptError::Extraction(format!("result table {table_index} not rendered"))
            })?;
            let row = table.get(*row_index).ok_or_else(|| {
                AttemptError::Extraction(format!("result row {row_index} not rendered"))
            })?;
            let needed = cells.iter().map(|c| c.column).max().map_or(0, |m| m + 1);
            if row.len() < needed {
                return Err(AttemptError::Extraction(format!(
                    "result row has {} cells, need {}",
                    row.len(),
                    needed
                )));
            }

            let mut fields = BTreeMap::new();
            for cell in cells {
                fields.insert(cell.field.clone(), row[cell.column].trim().to_string());
            }
            Ok(fields)
        }
    }
}
