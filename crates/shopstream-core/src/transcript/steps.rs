//! Stage classification and step labeling for `state` messages.
//!
//! Backend node names are an open vocabulary, so classification is an ordered
//! list of substring rules evaluated first-match-wins with a fallback stage.
//! Which nodes and keys are visible is policy, not protocol, and is loaded
//! from the `[steps]` config table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Human-facing processing phase of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Accepted,
    Intent,
    Generation,
    ProductSearch,
    ReviewSearch,
    Fusion,
    Response,
}

impl Stage {
    /// Order in which stage groups are displayed.
    pub const DISPLAY_ORDER: [Stage; 7] = [
        Stage::Accepted,
        Stage::Intent,
        Stage::Generation,
        Stage::ProductSearch,
        Stage::ReviewSearch,
        Stage::Fusion,
        Stage::Response,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Stage::Accepted => "Request received",
            Stage::Intent => "Intent analysis",
            Stage::Generation => "Generating recommendations",
            Stage::ProductSearch => "Product search",
            Stage::ReviewSearch => "Review search",
            Stage::Fusion => "Combining results",
            Stage::Response => "Response",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Maps node names containing any of `patterns` to `stage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRule {
    pub patterns: Vec<String>,
    pub stage: Stage,
}

impl StageRule {
    pub fn new(patterns: &[&str], stage: Stage) -> Self {
        Self {
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            stage,
        }
    }

    pub fn matches(&self, node: &str) -> bool {
        self.patterns.iter().any(|p| node.contains(p.as_str()))
    }
}

/// The built-in rule table. Order matters: `unstructured_*` nodes hit the
/// `structured` rule first.
pub fn default_stage_rules() -> Vec<StageRule> {
    vec![
        StageRule::new(&["accept"], Stage::Accepted),
        StageRule::new(&["structured"], Stage::ProductSearch),
        StageRule::new(&["unstructured", "rag"], Stage::ReviewSearch),
        StageRule::new(&["fusion"], Stage::Fusion),
        StageRule::new(&["final", "respond", "answer"], Stage::Response),
        StageRule::new(&["intent"], Stage::Intent),
    ]
}

/// Outcome of labeling one `state` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepLabel {
    /// Record this label in the step log.
    Visible(String),
    /// Node is suppressed; only stage bookkeeping applies.
    Hidden,
    /// Nothing to label (no node and no keys).
    Empty,
}

/// Classification and visibility rules for progress steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepPolicy {
    /// Ordered classification rules, first match wins.
    pub rules: Vec<StageRule>,
    /// Stage for nodes no rule matches.
    pub default_stage: Stage,
    /// Nodes containing any of these substrings get no visible step.
    pub hidden_nodes: Vec<String>,
    /// Auxiliary key names left out of labels.
    pub hidden_keys: Vec<String>,
    /// Maximum number of auxiliary keys shown in a label.
    pub max_keys: usize,
    /// Separator between the node name and its keys.
    pub separator: String,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            rules: default_stage_rules(),
            default_stage: Stage::Generation,
            hidden_nodes: Vec::new(),
            hidden_keys: Vec::new(),
            max_keys: Self::DEFAULT_MAX_KEYS,
            separator: Self::DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl StepPolicy {
    const DEFAULT_MAX_KEYS: usize = 3;
    const DEFAULT_SEPARATOR: &str = " · ";

    /// Resolves the stage for a node name. Always succeeds.
    pub fn classify(&self, node: &str) -> Stage {
        self.rules
            .iter()
            .find(|rule| rule.matches(node))
            .map_or(self.default_stage, |rule| rule.stage)
    }

    /// Builds the visible label for a node and its updated keys.
    pub fn label(&self, node: &str, keys: &[String]) -> StepLabel {
        if node.is_empty() && keys.is_empty() {
            return StepLabel::Empty;
        }
        if self
            .hidden_nodes
            .iter()
            .any(|p| !p.is_empty() && node.contains(p.as_str()))
        {
            return StepLabel::Hidden;
        }

        let shown: Vec<String> = keys
            .iter()
            .filter(|key| !self.hidden_keys.contains(key))
            .take(self.max_keys)
            .map(|key| key.replace('_', " "))
            .collect();

        if shown.is_empty() {
            if node.is_empty() {
                return StepLabel::Hidden;
            }
            return StepLabel::Visible(node.to_string());
        }
        StepLabel::Visible(format!("{node}{}{}", self.separator, shown.join(", ")))
    }
}
