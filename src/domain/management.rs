//! Risk-management parameters applied during simulation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::StratlabError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskManagement {
    pub balance: f64,
    pub max_balance_for_trading: f64,
    pub min_balance_for_trading: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_balance_for_buy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_for_buy_rur: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_for_buy_num: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_balance_for_sell: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_for_sell_rur: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_for_sell_num: Option<f64>,
    #[serde(default)]
    pub sell_all: bool,
}

impl RiskManagement {
    pub fn from_value(raw: &Value) -> Result<Self, StratlabError> {
        let parsed: RiskManagement = serde_json::from_value(raw.clone())
            .map_err(|e| StratlabError::validation("management", e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Check the numeric limits, naming the first field that fails.
    pub fn validate(&self) -> Result<(), StratlabError> {
        if !self.balance.is_finite() || self.balance <= 0.0 {
            return Err(StratlabError::validation(
                "management.balance",
                "must be positive",
            ));
        }
        non_negative("max_balance_for_trading", Some(self.max_balance_for_trading))?;
        non_negative("min_balance_for_trading", Some(self.min_balance_for_trading))?;
        if self.min_balance_for_trading > self.max_balance_for_trading {
            return Err(StratlabError::validation(
                "management.min_balance_for_trading",
                "must not exceed max_balance_for_trading",
            ));
        }

        fraction("part_of_balance_for_buy", self.part_of_balance_for_buy)?;
        fraction("part_of_balance_for_sell", self.part_of_balance_for_sell)?;

        non_negative("sum_for_buy_rur", self.sum_for_buy_rur)?;
        non_negative("sum_for_buy_num", self.sum_for_buy_num)?;
        non_negative("sum_for_sell_rur", self.sum_for_sell_rur)?;
        non_negative("sum_for_sell_num", self.sum_for_sell_num)?;

        Ok(())
    }
}

fn non_negative(name: &str, value: Option<f64>) -> Result<(), StratlabError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(StratlabError::validation(
            format!("management.{name}"),
            "must be non-negative",
        )),
        _ => Ok(()),
    }
}

fn fraction(name: &str, value: Option<f64>) -> Result<(), StratlabError> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(StratlabError::validation(
            format!("management.{name}"),
            "must be between 0 and 1",
        )),
        _ => Ok(()),
    }
}
