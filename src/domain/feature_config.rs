//! Feature configuration attached to a version, keyed by algorithm kind.

use serde::Serialize;
use serde_json::Value;

use crate::domain::algorithm::AlgoKind;
use crate::domain::condition::{ConditionNode, parse_tree};
use crate::domain::error::StratlabError;
use crate::domain::features::MlFeatures;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureConfig {
    Ml(MlFeatures),
    Rules(Vec<ConditionNode>),
}

impl FeatureConfig {
    /// Validate a raw payload against the schema for `kind`.
    ///
    /// A payload of the wrong top-level shape for the kind is reported as
    /// [`StratlabError::WrongShape`] before any field-level checks run.
    pub fn validate(kind: AlgoKind, raw: &Value) -> Result<Self, StratlabError> {
        match (kind, raw) {
            (AlgoKind::Ml, Value::Object(_)) => MlFeatures::from_value(raw).map(FeatureConfig::Ml),
            (AlgoKind::Ml, _) => Err(StratlabError::WrongShape {
                kind,
                expected: "a feature object",
            }),
            (AlgoKind::RuleBased, Value::Array(items)) => {
                parse_tree(items).map(FeatureConfig::Rules)
            }
            (AlgoKind::RuleBased, _) => Err(StratlabError::WrongShape {
                kind,
                expected: "a list of condition nodes",
            }),
        }
    }

    pub fn kind(&self) -> AlgoKind {
        match self {
            FeatureConfig::Ml(_) => AlgoKind::Ml,
            FeatureConfig::Rules(_) => AlgoKind::RuleBased,
        }
    }

    pub fn as_ml(&self) -> Option<&MlFeatures> {
        match self {
            FeatureConfig::Ml(f) => Some(f),
            FeatureConfig::Rules(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            FeatureConfig::Ml(f) => f.to_value(),
            FeatureConfig::Rules(nodes) => serde_json::to_value(nodes).unwrap_or(Value::Null),
        }
    }
}
