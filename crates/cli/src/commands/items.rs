//! Inspect the input without a browser

use anyhow::{Context, Result};
use clap::Args;
use personalizer_common::{SuiteConfig, TestItem};
use personalizer_e2e::InputWorkbook;

use crate::output::{mark, print_list, OutputFormat, TableDisplay};

#[derive(Debug, Clone, Default, Args)]
pub struct ItemsArgs {
    /// Worksheet (or document key) to read
    #[arg(long)]
    pub section: Option<String>,

    /// List console audit targets instead of personalizer items
    #[arg(long)]
    pub console: bool,
}

impl TableDisplay for TestItem {
    fn headers() -> Vec<&'static str> {
        vec!["PersonalizerId", "Type", "Locale", "Selector", "Recommendation", "Weights", "URL"]
    }

    fn row(&self) -> Vec<String> {
        let weights: Vec<String> = self.expected_weights.iter().map(|w| w.to_string()).collect();
        vec![
            self.identifier.clone(),
            self.flow_type().to_string(),
            self.locale().unwrap_or("-").to_string(),
            self.element_selector.clone(),
            mark(self.recommendation),
            weights.join(","),
            self.url.clone(),
        ]
    }
}

/// Print the items (or console targets); fails on unreadable input
pub fn execute(args: ItemsArgs, config: &SuiteConfig, format: OutputFormat) -> Result<bool> {
    let path = &config.input.path;
    let book = InputWorkbook::open(path).with_context(|| format!("reading {}", path.display()))?;

    if args.console {
        let section = args.section.as_deref().unwrap_or(&config.input.console_section);
        print_list(&book.console_targets(section)?, format);
    } else {
        let section = args.section.as_deref().unwrap_or(&config.input.items_section);
        print_list(&book.test_items(section)?, format);
    }
    Ok(true)
}
