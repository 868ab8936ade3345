//! Personalizer browser checks
//!
//! This crate drives a real browser against pages carrying personalizer
//! recommendations and checks that:
//! - The rendered card order matches the ranking returned by the rank API
//! - The first card is the API's reward action
//! - Pages under experiment do not log errors mentioning the experiment id
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Personalizer Checks (Rust)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  InputWorkbook (xlsx | json | yaml)                         │
//! │    ├── test_items(section) -> [TestItem]                    │
//! │    └── console_targets(section) -> [ConsoleTarget]          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SuiteRunner<D: BrowserDriver>                              │
//! │    ├── batches -> run_item() -> ObservedResult              │
//! │    ├── retry rounds 1..=max_retries (FailureTracker)        │
//! │    └── compare(dom_order, rank_order, reward_action_id)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ConsoleAuditor<D: BrowserDriver>                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserDriver / PageSession + Observers                    │
//! │    └── PlaywrightDriver (node bridge, JSON lines)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ReportWriter -> report/report_<label>_<timestamp>.xlsx     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod comparator;
pub mod console;
pub mod driver;
pub mod error;
pub mod loader;
pub mod playwright;
pub mod report;
pub mod runner;

pub use comparator::{compare, Comparison, RankResponse};
pub use console::{ConsoleAuditor, ConsoleCheck};
pub use driver::{BrowserDriver, Observers, PageEvent, PageSession, WaitUntil};
pub use error::{E2eError, E2eResult};
pub use loader::InputWorkbook;
pub use playwright::{PlaywrightConfig, PlaywrightDriver};
pub use report::ReportWriter;
pub use runner::{FailureTracker, ItemState, RetryPolicy, RunContext, RunSummary, SuiteRunner};
