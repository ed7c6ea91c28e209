//! Decision channel for manual reputation sources

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::models::Indicator;
use crate::sources::ManualSource;

/// Operator-entered verdict for one indicator at one manual source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualVerdict {
    pub category: String,
    pub risk: Option<String>,
}

/// Trait for deferring a verdict to an external decision maker.
///
/// Batch runs wire the console channel; tests wire stubs, which keeps the
/// orchestrator testable end-to-end without a human present.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionChannel: Send + Sync {
    async fn request_verdict(
        &self,
        indicator: &Indicator,
        source: &ManualSource,
    ) -> Result<ManualVerdict>;
}

/// Decision channel that prompts the operator on the console
pub struct ConsoleDecisionChannel;

#[async_trait]
impl DecisionChannel for ConsoleDecisionChannel {
    async fn request_verdict(
        &self,
        indicator: &Indicator,
        source: &ManualSource,
    ) -> Result<ManualVerdict> {
        let banner = format!(
            "\n--- MANUAL CHECK: {} ---\nIOC: {}\nCheck by hand at: {}\nPaste the result below (or press Enter to leave blank).",
            source.name.to_uppercase(),
            indicator.normalized_text,
            source.entry_point,
        );

        tokio::task::spawn_blocking(move || -> Result<ManualVerdict> {
            println!("{banner}");
            let category = read_line("Category: ")?;
            let risk = read_line("Risk (if any): ")?;
            Ok(ManualVerdict {
                category,
                risk: (!risk.is_empty()).then_some(risk),
            })
        })
        .await
        .context("Console input task failed")?
    }
}

fn read_line(prompt: &str) -> Result<String> {
    use std::io::Write;

    print!("{prompt}");
    std::io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read operator input")?;
    Ok(line.trim().to_string())
}
