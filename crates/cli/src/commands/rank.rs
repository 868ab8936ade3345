//! Rank-vs-DOM suite

use std::time::Instant;

use anyhow::Result;
use clap::Args;
use personalizer_common::{ObservedResult, SuiteConfig};
use personalizer_e2e::loader::load_items_or_empty;
use personalizer_e2e::{PlaywrightDriver, RunSummary, SuiteRunner};
use tracing::warn;

use super::playwright_config;
use crate::output::{mark, print_info, print_item, print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Debug, Clone, Default, Args)]
pub struct RankArgs {
    /// Worksheet (or document key) holding the items
    #[arg(long)]
    pub section: Option<String>,

    /// Items per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Global retry rounds after the batches
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Pages open at once within a batch
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Only run these identifiers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,
}

impl RankArgs {
    pub fn apply(&self, config: &mut SuiteConfig) {
        if let Some(section) = &self.section {
            config.input.items_section = section.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.retry.batch_size = batch_size;
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if let Some(concurrency) = self.concurrency {
            config.retry.concurrency = concurrency;
        }
    }
}

impl TableDisplay for ObservedResult {
    fn headers() -> Vec<&'static str> {
        vec!["PersonalizerId", "Type", "Batch", "Retry", "Rank API", "Reward API", "Order", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.identifier.clone(),
            self.flow_type.to_string(),
            self.batch_number.to_string(),
            self.retry_attempt.to_string(),
            mark(self.rank_api_observed),
            mark(self.reward_api_observed),
            mark(self.order_matches),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

impl TableDisplay for RunSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Items", "Attempts", "Passed", "Failed", "Retried", "Duration"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.items.to_string(),
            self.attempts.to_string(),
            self.passed.to_string(),
            self.failed.to_string(),
            self.retried.to_string(),
            format!("{:.1}s", self.duration_ms as f64 / 1000.0),
        ]
    }
}

/// Run the suite; `Ok(false)` when any item failed after its retries
pub async fn execute(args: RankArgs, mut config: SuiteConfig, format: OutputFormat) -> Result<bool> {
    args.apply(&mut config);
    config.validate()?;

    let mut items = load_items_or_empty(&config.input.path, &config.input.items_section);
    if !args.only.is_empty() {
        items.retain(|item| args.only.contains(&item.identifier));
    }
    if items.is_empty() {
        print_warning("No personalizer items loaded; nothing to run");
        return Ok(true);
    }
    print_info(&format!(
        "Loaded {} personalizer item(s) from {}",
        items.len(),
        config.input.path.display()
    ));

    let driver = PlaywrightDriver::new(playwright_config(&config))?;
    let runner = SuiteRunner::new(driver, config);

    let started = Instant::now();
    let context = runner.run(&items).await;
    let summary = context.summary(started.elapsed());

    if let Some(path) = runner.persist_report(&context) {
        print_success(&format!("Report written to {}", path.display()));
    }
    if let Err(e) = runner.write_summary(&summary) {
        warn!("Failed to write run summary: {}", e);
    }

    print_list(context.results(), format);
    print_item(&summary, format);
    Ok(summary.all_passed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let mut config = SuiteConfig::default();
        RankArgs {
            section: Some("Items".into()),
            batch_size: Some(2),
            max_retries: Some(0),
            concurrency: None,
            only: vec![],
        }
        .apply(&mut config);

        assert_eq!(config.input.items_section, "Items");
        assert_eq!(config.retry.batch_size, 2);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.concurrency, 1);
    }

    #[tokio::test]
    async fn test_empty_input_skips_browser() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SuiteConfig::default();
        config.input.path = dir.path().join("absent.xlsx");
        config.output.reports_dir = dir.path().join("report");

        let passed = execute(RankArgs::default(), config, OutputFormat::Plain).await.unwrap();
        assert!(passed);
        assert!(!dir.path().join("report").exists());
    }
}
