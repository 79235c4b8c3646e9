//! Condition trees for rule-based algorithms.
//!
//! Only the shape is checked here. Whether a predicate makes sense for
//! the instrument is up to the simulation engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::StratlabError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConditionNode {
    And { blocks: Vec<ConditionNode> },
    Or { blocks: Vec<ConditionNode> },
    If(Signal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySource {
    Value,
    PriceChanging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AverageType {
    Ema,
    Sma,
    Cma,
}

/// Series a predicate reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalColumn {
    Open,
    Close,
    High,
    Low,
    Value,
    Volume,
    GreenCandlesRatio,
    RedCandlesRatio,
    PriceChanging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsiThreshold {
    pub period: u32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limit {
    pub feature_name: SignalColumn,
    pub limit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AverageCross {
    pub average_type: AverageType,
    pub feature_name: SignalColumn,
    pub n_fast: u32,
    pub n_slow: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MacdCross {
    pub feature_name: SignalColumn,
    pub n_fast: u32,
    pub n_slow: u32,
}

/// Leaf predicate, tagged by the `feature` key of an `if` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "feature", rename_all = "snake_case")]
pub enum Signal {
    Anomaly {
        condition: Direction,
        param: AnomalySource,
    },
    AnomalRsi {
        param: RsiThreshold,
    },
    OutOfLimits {
        condition: Direction,
        param: Limit,
    },
    AverageCross {
        param: AverageCross,
    },
    MacdCross {
        param: MacdCross,
    },
}

impl ConditionNode {
    /// Number of leaf predicates under this node.
    pub fn leaf_count(&self) -> usize {
        match self {
            ConditionNode::And { blocks } | ConditionNode::Or { blocks } => {
                blocks.iter().map(ConditionNode::leaf_count).sum()
            }
            ConditionNode::If(_) => 1,
        }
    }

    fn check_blocks(&self, path: &str) -> Result<(), StratlabError> {
        match self {
            ConditionNode::And { blocks } | ConditionNode::Or { blocks } => {
                if blocks.is_empty() {
                    return Err(StratlabError::validation(
                        format!("{path}.blocks"),
                        "combinator must contain at least one block",
                    ));
                }
                for (i, block) in blocks.iter().enumerate() {
                    block.check_blocks(&format!("{path}.blocks[{i}]"))?;
                }
                Ok(())
            }
            ConditionNode::If(_) => Ok(()),
        }
    }
}

/// Parse a list of raw nodes, naming the first offending element.
pub fn parse_tree(items: &[Value]) -> Result<Vec<ConditionNode>, StratlabError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let path = format!("features[{i}]");
            let node: ConditionNode = serde_json::from_value(item.clone())
                .map_err(|e| StratlabError::validation(&path, e.to_string()))?;
            node.check_blocks(&path)?;
            Ok(node)
        })
        .collect()
}
