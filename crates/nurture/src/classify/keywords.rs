//! Keyword-based reply classification

use serde::{Deserialize, Serialize};

use crate::config::ResponseKeywords;

/// Category assigned to an inbound reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Interested,
    NotInterested,
    Neutral,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interested => "interested",
            Self::NotInterested => "not_interested",
            Self::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a reply body by case-insensitive substring match
///
/// Interested keywords are checked first and win when a body matches both
/// lists, so "not interested" in a body that also says "demo" counts as
/// interested. A body matching neither list is neutral.
pub fn classify(body: &str, keywords: &ResponseKeywords) -> Outcome {
    let body = body.to_lowercase();

    if contains_any(&body, &keywords.interested) {
        Outcome::Interested
    } else if contains_any(&body, &keywords.not_interested) {
        Outcome::NotInterested
    } else {
        Outcome::Neutral
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .filter(|k| !k.is_empty())
        .any(|k| haystack.contains(&k.to_lowercase()))
}
