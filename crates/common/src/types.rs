//! Core types for the personalizer suite

use serde::{Deserialize, Serialize};

/// Which page flow a personalizer item exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Recommendation,
    CardShuffle,
}

impl FlowType {
    pub fn from_recommendation(recommendation: bool) -> Self {
        if recommendation {
            FlowType::Recommendation
        } else {
            FlowType::CardShuffle
        }
    }
}

impl std::fmt::Display for FlowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowType::Recommendation => write!(f, "Recommendation"),
            FlowType::CardShuffle => write!(f, "Card Shuffle"),
        }
    }
}

/// A page to check, loaded once from the input workbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestItem {
    pub url: String,
    pub identifier: String,
    pub element_selector: String,
    pub recommendation: bool,
    #[serde(default)]
    pub expected_weights: Vec<f64>,
}

impl TestItem {
    pub fn flow_type(&self) -> FlowType {
        FlowType::from_recommendation(self.recommendation)
    }

    /// First path segment of the item URL (`en-us` for `https://ex.com/en-us/page`)
    pub fn locale(&self) -> Option<&str> {
        let rest = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let path = rest.split_once('/').map(|(_, path)| path)?;
        let path = path.split(['?', '#']).next().unwrap_or_default();
        path.split('/').find(|segment| !segment.is_empty())
    }

    /// Human-readable title used in logs
    pub fn title(&self) -> String {
        let flow = match self.flow_type() {
            FlowType::Recommendation => "Recommendation Flow",
            FlowType::CardShuffle => "Card Shuffle Flow",
        };
        format!(
            "{} - personalizerId: {} & locale: {}",
            flow,
            self.identifier,
            self.locale().unwrap_or("-")
        )
    }
}

/// Everything observed during one attempt at one item.
///
/// Every attempt, retries included, produces its own record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedResult {
    pub identifier: String,
    pub flow_type: FlowType,
    pub url: String,
    pub selector: String,
    pub recommendation_not_loaded: bool,
    pub dom_order: Vec<String>,
    pub rank_order: Vec<String>,
    pub rank_api_observed: bool,
    pub reward_api_observed: bool,
    pub first_ranked_id: Option<String>,
    pub first_dom_id: Option<String>,
    pub order_matches: bool,
    pub rank_event_id: Option<String>,
    pub reward_event_id: Option<String>,
    pub reward_weights: Vec<f64>,
    pub reward_weight: Option<f64>,
    pub page_errors: Vec<String>,
    pub error: Option<String>,
    pub screenshot_path: Option<String>,
    pub batch_number: usize,
    pub retry_attempt: u32,
}

impl ObservedResult {
    pub fn new(item: &TestItem, batch_number: usize, retry_attempt: u32) -> Self {
        Self {
            identifier: item.identifier.clone(),
            flow_type: item.flow_type(),
            url: item.url.clone(),
            selector: item.element_selector.clone(),
            recommendation_not_loaded: false,
            dom_order: Vec::new(),
            rank_order: Vec::new(),
            rank_api_observed: false,
            reward_api_observed: false,
            first_ranked_id: None,
            first_dom_id: None,
            order_matches: false,
            rank_event_id: None,
            reward_event_id: None,
            reward_weights: item.expected_weights.clone(),
            reward_weight: None,
            page_errors: Vec::new(),
            error: None,
            screenshot_path: None,
            batch_number,
            retry_attempt,
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// A page to audit for console output, from the error-data section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleTarget {
    pub url: String,
    pub experiment_id: String,
    pub error_types: Vec<String>,
}

impl ConsoleTarget {
    /// Fallback used when the input carries no console targets
    pub fn fixture() -> Self {
        Self {
            url: "https://example.com".to_string(),
            experiment_id: "test-exp-1".to_string(),
            error_types: vec!["log".to_string(), "pageerror".to_string()],
        }
    }

    pub fn watches(&self, kind: &str) -> bool {
        self.error_types.iter().any(|t| t.eq_ignore_ascii_case(kind))
    }
}

/// Kind of message collected by the console audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleMessageKind {
    Console,
    PageError,
    RequestFailed,
}

/// One message collected by the console audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub kind: ConsoleMessageKind,
    /// Console level (`log`, `error`, ...) or the upper-case tag for non-console kinds
    pub level: String,
    pub message: String,
    pub url: String,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str) -> TestItem {
        TestItem {
            url: url.to_string(),
            identifier: "p1".to_string(),
            element_selector: ".card".to_string(),
            recommendation: true,
            expected_weights: vec![1.0, 0.5],
        }
    }

    #[test]
    fn test_locale_is_first_path_segment() {
        assert_eq!(item("https://ex.com/en-us/page").locale(), Some("en-us"));
        assert_eq!(item("https://ex.com//de-de?x=1").locale(), Some("de-de"));
        assert_eq!(item("https://ex.com/").locale(), None);
        assert_eq!(item("https://ex.com").locale(), None);
    }

    #[test]
    fn test_title_names_flow_and_locale() {
        let mut it = item("https://ex.com/en-us/page");
        assert_eq!(
            it.title(),
            "Recommendation Flow - personalizerId: p1 & locale: en-us"
        );
        it.recommendation = false;
        assert!(it.title().starts_with("Card Shuffle Flow"));
    }

    #[test]
    fn test_new_result_copies_item_fields() {
        let result = ObservedResult::new(&item("https://ex.com/en-us/page"), 3, 1);
        assert_eq!(result.identifier, "p1");
        assert_eq!(result.flow_type, FlowType::Recommendation);
        assert_eq!(result.reward_weights, vec![1.0, 0.5]);
        assert_eq!(result.batch_number, 3);
        assert_eq!(result.retry_attempt, 1);
        assert!(result.passed());
    }

    #[test]
    fn test_console_target_watches_case_insensitive() {
        let target = ConsoleTarget::fixture();
        assert!(target.watches("PageError"));
        assert!(!target.watches("requestfailed"));
    }
}
