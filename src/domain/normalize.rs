//! Normalization of raw simulation statistics.
//!
//! The simulation engine reports a flat table keyed by display labels
//! ("Return [%]", "# Trades", ...) whose values mix timestamps, durations
//! and floats with NaN sentinels. [`normalize`] turns that table into a
//! [`BacktestStats`] record with fixed field names, integral floats
//! narrowed to integers and NaN replaced by null.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeDelta};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::domain::error::StratlabError;

/// One cell of the raw statistics table.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Timestamp(NaiveDateTime),
    Duration(TimeDelta),
    Number(f64),
}

pub type RawStats = BTreeMap<String, RawValue>;

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

impl RawValue {
    /// Decode a JSON cell as sent by the engine bridge.
    pub fn from_json(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(RawValue::Number(f64::NAN)),
            Value::Number(n) => n
                .as_f64()
                .map(RawValue::Number)
                .ok_or_else(|| format!("number {n} out of range")),
            Value::String(s) => Self::from_text(s),
            other => Err(format!("unsupported statistic value {other}")),
        }
    }

    fn from_text(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if matches!(s, "NaN" | "nan" | "NaT" | "") {
            return Ok(RawValue::Number(f64::NAN));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(RawValue::Timestamp(dt.naive_utc()));
        }
        for format in TIMESTAMP_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(RawValue::Timestamp(dt));
            }
        }
        if let Ok(d) = s.parse::<StatDuration>() {
            return Ok(RawValue::Duration(d.0));
        }
        s.parse::<f64>()
            .map(RawValue::Number)
            .map_err(|_| format!("unrecognized statistic value '{s}'"))
    }
}

/// Decode a whole JSON statistics object.
///
/// Cells under labels outside [`LABELS`] that do not decode are dropped;
/// the engine also reports strategy names and other non-numeric entries.
pub fn raw_stats_from_json(
    table: &serde_json::Map<String, Value>,
) -> Result<RawStats, StratlabError> {
    let mut stats = RawStats::new();
    for (label, value) in table {
        match RawValue::from_json(value) {
            Ok(v) => {
                stats.insert(label.clone(), v);
            }
            Err(reason) if LABELS.contains(&label.as_str()) => {
                return Err(fail(label, &reason));
            }
            Err(_) => debug!(label = %label, "skipping undecodable statistic"),
        }
    }
    Ok(stats)
}

/// A finite number, serialized as an integer when it has no fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatNumber(f64);

impl StatNumber {
    pub fn new(value: f64) -> Option<Self> {
        value.is_finite().then_some(StatNumber(value))
    }

    pub fn get(&self) -> f64 {
        self.0
    }

    fn as_integer(&self) -> Option<i64> {
        let v = self.0;
        (v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64).then_some(v as i64)
    }
}

impl Serialize for StatNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_integer() {
            Some(i) => serializer.serialize_i64(i),
            None => serializer.serialize_f64(self.0),
        }
    }
}

impl<'de> Deserialize<'de> for StatNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = f64::deserialize(deserializer)?;
        StatNumber::new(v).ok_or_else(|| D::Error::custom("statistic must be finite"))
    }
}

/// Elapsed time rendered as `D days HH:MM:SS[.ffffff]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatDuration(pub TimeDelta);

impl fmt::Display for StatDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let micros = self
            .0
            .num_microseconds()
            .unwrap_or_else(|| self.0.num_milliseconds().saturating_mul(1000));
        let days = micros.div_euclid(86_400_000_000);
        let rest = micros.rem_euclid(86_400_000_000);
        let secs = rest / 1_000_000;
        let frac = rest % 1_000_000;
        write!(
            f,
            "{days} days {:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        )?;
        if frac != 0 {
            write!(f, ".{frac:06}")?;
        }
        Ok(())
    }
}

impl FromStr for StatDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("invalid duration '{s}'");
        let s = s.trim();
        let (days, clock) = match s.split_once(' ') {
            Some((days, rest)) => {
                let rest = rest.trim_start();
                let clock = rest
                    .strip_prefix("days")
                    .or_else(|| rest.strip_prefix("day"))
                    .ok_or_else(bad)?;
                (days.parse::<i64>().map_err(|_| bad())?, clock.trim())
            }
            None => (0, s),
        };

        let mut parts = clock.split(':');
        let (Some(h), Some(m), Some(sec), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(bad());
        };
        let hours: i64 = h.parse().map_err(|_| bad())?;
        let minutes: i64 = m.parse().map_err(|_| bad())?;
        let (whole, frac) = sec.split_once('.').unwrap_or((sec, ""));
        let seconds: i64 = whole.parse().map_err(|_| bad())?;
        let micros: i64 = if frac.is_empty() {
            0
        } else {
            if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            let padded = format!("{frac:0<6}");
            padded[..6].parse().map_err(|_| bad())?
        };
        if minutes >= 60 || seconds >= 60 {
            return Err(bad());
        }

        Ok(StatDuration(
            TimeDelta::days(days)
                + TimeDelta::hours(hours)
                + TimeDelta::minutes(minutes)
                + TimeDelta::seconds(seconds)
                + TimeDelta::microseconds(micros),
        ))
    }
}

impl Serialize for StatDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StatDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStats {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub duration: StatDuration,
    pub exposure_time: StatNumber,
    pub equity_final: StatNumber,
    pub equity_peak: StatNumber,
    pub backtest_return: StatNumber,
    pub buy_hold_return: StatNumber,
    pub return_annualized: Option<StatNumber>,
    pub volatility: Option<StatNumber>,
    pub sharpe_ratio: Option<StatNumber>,
    pub sortino_ratio: Option<StatNumber>,
    pub calmar_ratio: Option<StatNumber>,
    pub max_drawdown: Option<StatNumber>,
    pub avg_drawdown: Option<StatNumber>,
    pub max_drawdown_duration: Option<StatDuration>,
    pub avg_drawdown_duration: Option<StatDuration>,
    pub trades: u64,
    pub win_rate: Option<StatNumber>,
    pub best_trade: Option<StatNumber>,
    pub worst_trade: Option<StatNumber>,
    pub avg_trade: Option<StatNumber>,
    pub max_trade_duration: Option<StatDuration>,
    pub avg_trade_duration: Option<StatDuration>,
    pub profit_factor: Option<StatNumber>,
    pub expectancy: Option<StatNumber>,
    pub sqn: Option<StatNumber>,
}

/// Engine labels understood by [`normalize`].
pub const LABELS: [&str; 27] = [
    "Start",
    "End",
    "Duration",
    "Exposure Time [%]",
    "Equity Final [$]",
    "Equity Peak [$]",
    "Return [%]",
    "Buy & Hold Return [%]",
    "Return (Ann.) [%]",
    "Volatility (Ann.) [%]",
    "Sharpe Ratio",
    "Sortino Ratio",
    "Calmar Ratio",
    "Max. Drawdown [%]",
    "Avg. Drawdown [%]",
    "Max. Drawdown Duration",
    "Avg. Drawdown Duration",
    "# Trades",
    "Win Rate [%]",
    "Best Trade [%]",
    "Worst Trade [%]",
    "Avg. Trade [%]",
    "Max. Trade Duration",
    "Avg. Trade Duration",
    "Profit Factor",
    "Expectancy [%]",
    "SQN",
];

fn fail(label: &str, reason: &str) -> StratlabError {
    StratlabError::Engine {
        stage: "normalize",
        reason: format!("{label}: {reason}"),
    }
}

struct Lookup<'a>(&'a RawStats);

impl Lookup<'_> {
    fn number(&self, label: &str) -> Result<Option<StatNumber>, StratlabError> {
        match self.0.get(label) {
            None => Ok(None),
            Some(RawValue::Number(v)) => Ok(StatNumber::new(*v)),
            Some(_) => Err(fail(label, "expected a number")),
        }
    }

    fn required_number(&self, label: &str) -> Result<StatNumber, StratlabError> {
        self.number(label)?
            .ok_or_else(|| fail(label, "missing or not a number"))
    }

    fn timestamp(&self, label: &str) -> Result<NaiveDateTime, StratlabError> {
        match self.0.get(label) {
            Some(RawValue::Timestamp(t)) => Ok(*t),
            Some(_) => Err(fail(label, "expected a timestamp")),
            None => Err(fail(label, "missing")),
        }
    }

    fn duration(&self, label: &str) -> Result<Option<StatDuration>, StratlabError> {
        match self.0.get(label) {
            None => Ok(None),
            Some(RawValue::Duration(d)) => Ok(Some(StatDuration(*d))),
            Some(RawValue::Number(v)) if v.is_nan() => Ok(None),
            Some(_) => Err(fail(label, "expected a duration")),
        }
    }

    fn count(&self, label: &str) -> Result<u64, StratlabError> {
        let n = self.required_number(label)?.get();
        if n < 0.0 || n.fract() != 0.0 {
            return Err(fail(label, "expected a whole non-negative count"));
        }
        Ok(n as u64)
    }
}

/// Map a raw engine table onto [`BacktestStats`].
pub fn normalize(raw: &RawStats) -> Result<BacktestStats, StratlabError> {
    for label in raw.keys().filter(|k| !LABELS.contains(&k.as_str())) {
        debug!(label = %label, "ignoring unknown statistic");
    }

    let l = Lookup(raw);
    Ok(BacktestStats {
        start: l.timestamp("Start")?,
        end: l.timestamp("End")?,
        duration: l
            .duration("Duration")?
            .ok_or_else(|| fail("Duration", "missing"))?,
        exposure_time: l.required_number("Exposure Time [%]")?,
        equity_final: l.required_number("Equity Final [$]")?,
        equity_peak: l.required_number("Equity Peak [$]")?,
        backtest_return: l.required_number("Return [%]")?,
        buy_hold_return: l.required_number("Buy & Hold Return [%]")?,
        return_annualized: l.number("Return (Ann.) [%]")?,
        volatility: l.number("Volatility (Ann.) [%]")?,
        sharpe_ratio: l.number("Sharpe Ratio")?,
        sortino_ratio: l.number("Sortino Ratio")?,
        calmar_ratio: l.number("Calmar Ratio")?,
        max_drawdown: l.number("Max. Drawdown [%]")?,
        avg_drawdown: l.number("Avg. Drawdown [%]")?,
        max_drawdown_duration: l.duration("Max. Drawdown Duration")?,
        avg_drawdown_duration: l.duration("Avg. Drawdown Duration")?,
        trades: l.count("# Trades")?,
        win_rate: l.number("Win Rate [%]")?,
        best_trade: l.number("Best Trade [%]")?,
        worst_trade: l.number("Worst Trade [%]")?,
        avg_trade: l.number("Avg. Trade [%]")?,
        max_trade_duration: l.duration("Max. Trade Duration")?,
        avg_trade_duration: l.duration("Avg. Trade Duration")?,
        profit_factor: l.number("Profit Factor")?,
        expectancy: l.number("Expectancy [%]")?,
        sqn: l.number("SQN")?,
    })
}
