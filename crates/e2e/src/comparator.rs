//! Rank-vs-DOM comparison

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{E2eError, E2eResult};

/// Default number of ranked entries compared against the DOM
pub const DEFAULT_RANK_PREFIX: usize = 4;

/// Payload returned by the rank endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankResponse {
    #[serde(default, deserialize_with = "optional_id")]
    pub event_id: Option<String>,
    /// Absent when the personalizer did not produce a ranking
    #[serde(default)]
    pub ranking: Option<Vec<RankedAction>>,
    #[serde(default, deserialize_with = "optional_id")]
    pub reward_action_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAction {
    #[serde(deserialize_with = "required_id")]
    pub id: String,
    #[serde(default)]
    pub probability: Option<f64>,
}

/// Text form of an id the API may send as a string or a number
pub fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    id_text(&value).ok_or_else(|| de::Error::custom(format!("expected string or number id, got {value}")))
}

fn optional_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => id_text(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected string or number id, got {value}"))),
    }
}

impl RankResponse {
    /// Ranked ids, truncated to `max_len`
    pub fn rank_order(&self, max_len: usize) -> Vec<String> {
        self.ranking
            .as_deref()
            .unwrap_or_default()
            .iter()
            .take(max_len)
            .map(|action| action.id.clone())
            .collect()
    }

    pub fn has_ranking(&self) -> bool {
        self.ranking.is_some()
    }
}

/// Successful comparison outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub first_ranked_id: Option<String>,
    pub first_dom_id: Option<String>,
    /// Number of positions compared
    pub prefix_len: usize,
}

/// Check the DOM order against the ranking.
///
/// The first DOM element must be the reward action, and the DOM prefix must equal
/// the ranking over `min(dom_order.len(), rank_order.len(), max_prefix)` positions.
pub fn compare(
    dom_order: &[String],
    rank_order: &[String],
    reward_action_id: Option<&str>,
    max_prefix: usize,
) -> E2eResult<Comparison> {
    let mismatch = |reason: String| E2eError::RankMismatch {
        reason,
        dom_order: dom_order.to_vec(),
        rank_order: rank_order.to_vec(),
    };

    let first_dom_id = dom_order.first().cloned();
    let first_ranked_id = rank_order.first().cloned();

    match (first_dom_id.as_deref(), reward_action_id) {
        (Some(dom), Some(reward)) if dom == reward => {}
        (dom, reward) => {
            return Err(mismatch(format!(
                "first DOM element {:?} is not the reward action {:?}",
                dom, reward
            )));
        }
    }

    let prefix_len = dom_order.len().min(rank_order.len()).min(max_prefix);
    if let Some(position) = (0..prefix_len).find(|&i| dom_order[i] != rank_order[i]) {
        return Err(mismatch(format!(
            "DOM order diverges from ranking at position {}",
            position
        )));
    }

    Ok(Comparison {
        first_ranked_id,
        first_dom_id,
        prefix_len,
    })
}
