//! IOCForge
//!
//! Batch tool that extracts indicators of compromise from a report
//! document and verifies their reputation against multiple lookup
//! sources.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iocforge::checker::decision::ConsoleDecisionChannel;
use iocforge::checker::{CheckOptions, ReputationChecker};
use iocforge::extract::{collect_from_source, JsonTableSource};
use iocforge::report::{
    write_indicator_list, write_results_csv, write_results_report, ResultAggregator,
};
use iocforge::sources::{builtin_registry, load_registry};
use iocforge::surface::webdriver::WebDriverSurface;

/// IOCForge
#[derive(Parser, Debug)]
#[command(name = "iocforge")]
#[command(about = "Extract, verify, and report on indicators of compromise")]
struct Args {
    /// Extracted table rows of the report document (JSON array of row objects)
    #[arg(long, env = "IOC_DOCUMENT")]
    document: PathBuf,

    /// Write the indicator list and stop, skipping reputation checks
    #[arg(long, default_value = "false")]
    extract_only: bool,

    /// Source registry file overriding the built-in sources
    #[arg(long, env = "IOC_REGISTRY")]
    registry: Option<PathBuf>,

    /// WebDriver server endpoint
    #[arg(long, env = "WEBDRIVER_URL", default_value = "http://localhost:9515")]
    webdriver_url: String,

    /// Directory for export artifacts
    #[arg(long, env = "IOC_OUT_DIR", default_value = ".")]
    out_dir: PathBuf,

    /// Directory for diagnostics (result markup, failure snapshots)
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Seconds to pause between source attempts
    #[arg(long, default_value = "2")]
    cooldown_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iocforge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting IOCForge");

    let table_source = JsonTableSource::new(&args.document);
    let indicators = collect_from_source(&table_source)
        .await
        .context("Indicator extraction failed")?;
    tracing::info!(count = indicators.len(), "Indicators extracted");

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;
    write_indicator_list(&args.out_dir.join("extracted_iocs.txt"), &indicators)?;

    if args.extract_only {
        return Ok(());
    }

    let registry = match &args.registry {
        Some(path) => load_registry(path).await?,
        None => builtin_registry(),
    };
    tracing::info!(sources = registry.len(), "Source registry loaded");

    if let Some(dir) = &args.artifacts_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let options = CheckOptions {
        cooldown: Duration::from_secs(args.cooldown_secs),
        artifacts_dir: args.artifacts_dir.clone(),
        ..CheckOptions::default()
    };
    let checker = ReputationChecker::new(registry, options);
    let mut aggregator = ResultAggregator::new(checker.registry());
    let decisions = ConsoleDecisionChannel;

    let mut surface = WebDriverSurface::connect(&args.webdriver_url)
        .await
        .context("Failed to open WebDriver session")?;

    for indicator in indicators {
        tracing::info!(
            indicator = %indicator.normalized_text,
            kind = %indicator.kind,
            "Checking indicator"
        );
        let records = checker
            .check_indicator(&indicator, &mut surface, &decisions)
            .await;
        aggregator.push(indicator, records);
    }

    // The surface holds a real browser; release it before export can fail.
    if let Err(e) = surface.close().await {
        tracing::warn!(error = %e, "Failed to close WebDriver session");
    }
    tracing::info!(indicators = aggregator.len(), "All indicators checked");

    let table = aggregator.finalize().context("Result validation failed")?;
    write_results_csv(&args.out_dir.join("ioc_results.csv"), &table)?;
    write_results_report(&args.out_dir.join("ioc_results.md"), &table)?;

    tracing::info!("Run complete");
    Ok(())
}
