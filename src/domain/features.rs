//! ML feature configuration.
//!
//! A closed set of feature groups, each either disabled (`false` on the
//! wire) or enabled with its settings, plus the model family and an
//! optional decision threshold learned during training. The optional
//! groups (`rsi`, `macd`, `bollinger`) may also be `true`, which enables
//! them with the engine's defaults.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::domain::error::StratlabError;

/// Candle column a feature group is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    Open,
    Close,
    High,
    Low,
    Value,
    Volume,
    Target,
}

/// Lookback length, restricted to the periods the engine precomputes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Lookback(u32);

impl Lookback {
    pub const ALLOWED: [u32; 9] = [1, 2, 3, 4, 10, 14, 20, 50, 100];

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Lookback {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if Self::ALLOWED.contains(&value) {
            Ok(Lookback(value))
        } else {
            Err(format!(
                "period {value} is not one of 1, 2, 3, 4, 10, 14, 20, 50, 100"
            ))
        }
    }
}

impl From<Lookback> for u32 {
    fn from(value: Lookback) -> Self {
        value.0
    }
}

/// MACD fast/slow pair. Only the canonical (12, 26) pair is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(u32, u32)", into = "(u32, u32)")]
pub struct MacdPair;

impl TryFrom<(u32, u32)> for MacdPair {
    type Error = String;

    fn try_from(value: (u32, u32)) -> Result<Self, Self::Error> {
        match value {
            (12, 26) => Ok(MacdPair),
            (fast, slow) => Err(format!("macd period ({fast}, {slow}) must be (12, 26)")),
        }
    }
}

impl From<MacdPair> for (u32, u32) {
    fn from(_: MacdPair) -> Self {
        (12, 26)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Lightgbm,
    Catboost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnWindows {
    pub features: Vec<Column>,
    pub period: Vec<Lookback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Columns {
    pub features: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Windows {
    pub period: Vec<Lookback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MacdSettings {
    #[serde(default = "canonical_macd")]
    pub period: Vec<MacdPair>,
}

fn canonical_macd() -> Vec<MacdPair> {
    vec![MacdPair]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BollingerSettings {
    pub period: Lookback,
    pub degree_of_lift: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeFeatures {
    pub month: bool,
    pub week: bool,
    pub day_of_month: bool,
    pub day_of_week: bool,
    pub hour: bool,
    pub minute: bool,
}

/// A feature group that is switched off, on with the engine's defaults,
/// or configured.
#[derive(Debug, Clone, PartialEq)]
pub enum Toggle<T> {
    Off,
    /// `true` on the wire.
    Defaults,
    On(T),
}

impl<T> Toggle<T> {
    pub fn is_on(&self) -> bool {
        !matches!(self, Toggle::Off)
    }

    /// Explicit settings; `None` when off or left to the engine.
    pub fn settings(&self) -> Option<&T> {
        match self {
            Toggle::On(t) => Some(t),
            Toggle::Off | Toggle::Defaults => None,
        }
    }
}

impl<T: Serialize> Serialize for Toggle<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Toggle::Off => serializer.serialize_bool(false),
            Toggle::Defaults => serializer.serialize_bool(true),
            Toggle::On(settings) => settings.serialize(serializer),
        }
    }
}

impl<T: DeserializeOwned> Toggle<T> {
    fn from_value(
        field: &str,
        value: &Value,
        allow_defaults: bool,
    ) -> Result<Self, StratlabError> {
        match value {
            Value::Bool(false) => Ok(Toggle::Off),
            Value::Bool(true) if allow_defaults => Ok(Toggle::Defaults),
            Value::Bool(true) => Err(StratlabError::validation(
                field,
                "expected a settings object or false",
            )),
            other => serde_json::from_value(other.clone())
                .map(Toggle::On)
                .map_err(|e| StratlabError::validation(field, e.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MlFeatures {
    pub lags: Toggle<ColumnWindows>,
    pub cma: Toggle<Columns>,
    pub sma: Toggle<ColumnWindows>,
    pub ema: Toggle<ColumnWindows>,
    pub green_candles_ratio: Toggle<Windows>,
    pub red_candles_ratio: Toggle<Windows>,
    pub rsi: Toggle<Windows>,
    pub macd: Toggle<MacdSettings>,
    pub bollinger: Toggle<BollingerSettings>,
    pub time_features: Toggle<TimeFeatures>,
    pub model: ModelFamily,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

const GROUPS: [&str; 12] = [
    "lags",
    "cma",
    "sma",
    "ema",
    "green_candles_ratio",
    "red_candles_ratio",
    "rsi",
    "macd",
    "bollinger",
    "time_features",
    "model",
    "threshold",
];

impl MlFeatures {
    /// Validate a raw payload, naming the offending group on failure.
    pub fn from_value(value: &Value) -> Result<Self, StratlabError> {
        let obj = value
            .as_object()
            .ok_or_else(|| StratlabError::validation("features", "expected an object"))?;

        if let Some(unknown) = obj.keys().find(|k| !GROUPS.contains(&k.as_str())) {
            return Err(StratlabError::validation(
                format!("features.{unknown}"),
                "unknown feature group",
            ));
        }

        let model = match obj.get("model") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| StratlabError::validation("features.model", e.to_string()))?,
            None => {
                return Err(StratlabError::validation(
                    "features.model",
                    "model selector is required",
                ));
            }
        };

        let threshold = match obj.get("threshold") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_f64() {
                Some(t) if t.is_finite() => Some(t),
                _ => {
                    return Err(StratlabError::validation(
                        "features.threshold",
                        "expected a finite number",
                    ));
                }
            },
        };

        Ok(MlFeatures {
            lags: required(obj, "lags")?,
            cma: required(obj, "cma")?,
            sma: required(obj, "sma")?,
            ema: required(obj, "ema")?,
            green_candles_ratio: required(obj, "green_candles_ratio")?,
            red_candles_ratio: required(obj, "red_candles_ratio")?,
            rsi: optional(obj, "rsi")?,
            macd: optional(obj, "macd")?,
            bollinger: optional(obj, "bollinger")?,
            time_features: required(obj, "time_features")?,
            model,
            threshold,
        })
    }

    pub fn to_value(&self) -> Value {
        // Every field serializes to plain JSON; nothing here can fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Names of the groups that are switched on.
    pub fn enabled_groups(&self) -> Vec<&'static str> {
        let flags = [
            ("lags", self.lags.is_on()),
            ("cma", self.cma.is_on()),
            ("sma", self.sma.is_on()),
            ("ema", self.ema.is_on()),
            ("green_candles_ratio", self.green_candles_ratio.is_on()),
            ("red_candles_ratio", self.red_candles_ratio.is_on()),
            ("rsi", self.rsi.is_on()),
            ("macd", self.macd.is_on()),
            ("bollinger", self.bollinger.is_on()),
            ("time_features", self.time_features.is_on()),
        ];
        flags
            .into_iter()
            .filter_map(|(name, on)| on.then_some(name))
            .collect()
    }
}

fn required<T: DeserializeOwned>(
    obj: &Map<String, Value>,
    name: &str,
) -> Result<Toggle<T>, StratlabError> {
    let field = format!("features.{name}");
    match obj.get(name) {
        Some(v) => Toggle::from_value(&field, v, false),
        None => Err(StratlabError::validation(field, "feature group is required")),
    }
}

fn optional<T: DeserializeOwned>(
    obj: &Map<String, Value>,
    name: &str,
) -> Result<Toggle<T>, StratlabError> {
    match obj.get(name) {
        Some(v) => Toggle::from_value(&format!("features.{name}"), v, true),
        None => Ok(Toggle::Off),
    }
}
