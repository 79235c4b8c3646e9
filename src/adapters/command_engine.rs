//! Engine bridge that runs external executables.
//!
//! Each call spawns the configured command, writes one JSON request to its
//! stdin and reads one JSON response from its stdout. A non-zero exit
//! status or an unreadable response fails the call.
//!
//! Commands are split into arguments the way a POSIX shell would split
//! them, without expansion: single quotes are literal, double quotes
//! honour `\"` and `\\`, and a bare backslash escapes the next
//! character.

use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::domain::error::StratlabError;
use crate::domain::features::MlFeatures;
use crate::domain::normalize::raw_stats_from_json;
use crate::ports::config_port::ConfigPort;
use crate::ports::engine_port::{
    BacktestEngine, SimulationInput, SimulationJob, SimulationOutput, TrainingEngine, TrainingJob,
};

pub struct CommandEngine {
    train_command: Option<Vec<String>>,
    backtest_command: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct SimulationResponse {
    stats: Map<String, Value>,
    #[serde(default)]
    report: String,
}

fn split_command(raw: &str) -> Result<Vec<String>, String> {
    let mut argv = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => word.push(ch),
                        None => return Err("unterminated single quote".into()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\')) => word.push(ch),
                            Some(ch) => {
                                word.push('\\');
                                word.push(ch);
                            }
                            None => return Err("unterminated double quote".into()),
                        },
                        Some(ch) => word.push(ch),
                        None => return Err("unterminated double quote".into()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(ch) => word.push(ch),
                    None => return Err("trailing backslash".into()),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    argv.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        argv.push(word);
    }
    Ok(argv)
}

fn parse_command(key: &str, raw: Option<&str>) -> Result<Option<Vec<String>>, StratlabError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let argv = split_command(raw).map_err(|reason| StratlabError::ConfigInvalid {
        section: "engine".into(),
        key: key.into(),
        reason,
    })?;
    Ok(Some(argv).filter(|argv| !argv.is_empty()))
}

impl CommandEngine {
    pub fn new(
        train_command: Option<&str>,
        backtest_command: Option<&str>,
    ) -> Result<Self, StratlabError> {
        Ok(Self {
            train_command: parse_command("train_command", train_command)?,
            backtest_command: parse_command("backtest_command", backtest_command)?,
        })
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StratlabError> {
        Self::new(
            config.get_string("engine", "train_command").as_deref(),
            config.get_string("engine", "backtest_command").as_deref(),
        )
    }

    fn invoke(
        stage: &'static str,
        argv: Option<&Vec<String>>,
        request: &Value,
    ) -> Result<Vec<u8>, StratlabError> {
        let fail = |reason: String| StratlabError::Engine { stage, reason };
        let argv = argv.ok_or_else(|| fail(format!("no [engine] {stage}_command configured")))?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| fail("empty command".to_string()))?;

        debug!(program = %program, stage, "spawning engine");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| fail(format!("cannot start {program}: {e}")))?;

        let payload = request.to_string().into_bytes();
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| fail("engine stdin unavailable".to_string()))?;
        // Written from a separate thread so a chatty engine cannot block us.
        let writer = thread::spawn(move || stdin.write_all(&payload));

        let output = child
            .wait_with_output()
            .map_err(|e| fail(format!("engine did not finish: {e}")))?;
        if let Ok(Err(e)) = writer.join() {
            debug!(error = %e, stage, "engine closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl TrainingEngine for CommandEngine {
    fn train(&self, job: &TrainingJob) -> Result<MlFeatures, StratlabError> {
        let request = json!({
            "instrument": job.instrument,
            "period": job.period,
            "features": job.features.to_value(),
            "artifact_path": job.artifact_path,
        });
        let stdout = Self::invoke("train", self.train_command.as_ref(), &request)?;

        let value: Value = serde_json::from_slice(&stdout).map_err(|e| StratlabError::Engine {
            stage: "train",
            reason: format!("unreadable response: {e}"),
        })?;
        MlFeatures::from_value(&value).map_err(|e| StratlabError::Engine {
            stage: "train",
            reason: format!("trained configuration rejected: {e}"),
        })
    }
}

impl BacktestEngine for CommandEngine {
    fn simulate(&self, job: &SimulationJob) -> Result<SimulationOutput, StratlabError> {
        let mut request = json!({
            "model": job.input.model_name(),
            "instrument": job.instrument,
            "period": job.period,
            "trading_fee": job.trading_fee,
            "lookback": job.lookback,
            "balance": job.balance,
            "leverage": job.leverage,
            "management": job.management,
        });
        match &job.input {
            SimulationInput::Model {
                artifact_path,
                features,
            } => {
                request["artifact_path"] = json!(artifact_path);
                request["features"] = features.to_value();
            }
            SimulationInput::ConditionTree(nodes) => {
                request["artifact_path"] = Value::Null;
                request["condition_tree"] = json!(nodes);
            }
        }
        let stdout = Self::invoke("backtest", self.backtest_command.as_ref(), &request)?;

        let response: SimulationResponse =
            serde_json::from_slice(&stdout).map_err(|e| StratlabError::Engine {
                stage: "backtest",
                reason: format!("unreadable response: {e}"),
            })?;
        Ok(SimulationOutput {
            stats: raw_stats_from_json(&response.stats)?,
            report: response.report.into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::algorithm::Period;
    use crate::domain::management::RiskManagement;
    use std::path::PathBuf;

    fn management() -> RiskManagement {
        RiskManagement {
            balance: 1000.0,
            max_balance_for_trading: 1000.0,
            min_balance_for_trading: 0.0,
            part_of_balance_for_buy: None,
            sum_for_buy_rur: None,
            sum_for_buy_num: None,
            part_of_balance_for_sell: None,
            sum_for_sell_rur: None,
            sum_for_sell_num: None,
            sell_all: false,
        }
    }

    fn rule_job() -> SimulationJob {
        SimulationJob {
            input: SimulationInput::ConditionTree(vec![]),
            instrument: "SBER".into(),
            period: Period::OneMinute,
            trading_fee: 0.1,
            lookback: 6,
            balance: 1000.0,
            leverage: 2.0,
            management: management(),
        }
    }

    #[test]
    fn missing_command_is_engine_error() {
        let engine = CommandEngine::new(None, None).unwrap();
        match engine.simulate(&rule_job()) {
            Err(StratlabError::Engine { stage, reason }) => {
                assert_eq!(stage, "backtest");
                assert!(reason.contains("backtest_command"));
            }
            other => panic!("expected Engine error, got: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unknown_program_is_engine_error() {
        let engine = CommandEngine::new(Some("/nonexistent/stratlab-train"), None).unwrap();
        let features = MlFeatures::from_value(&json!({
            "lags": false, "cma": false, "sma": false, "ema": false,
            "green_candles_ratio": false, "red_candles_ratio": false,
            "time_features": false, "model": "lightgbm"
        }))
        .unwrap();
        let job = TrainingJob {
            instrument: "SBER".into(),
            period: Period::OneMinute,
            features,
            artifact_path: PathBuf::from("/tmp/none.model"),
        };
        assert!(matches!(
            engine.train(&job),
            Err(StratlabError::Engine { stage: "train", .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn script_engine_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("engine.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\necho '{\"stats\": {\"# Trades\": 3.0, \"SQN\": \"NaN\", \"_strategy\": \"IfModel\"}, \"report\": \"<html/>\"}'\n",
        )
        .unwrap();
        let command = format!("sh {}", script.display());

        let engine = CommandEngine::new(None, Some(&command)).unwrap();
        let output = engine.simulate(&rule_job()).unwrap();
        assert_eq!(output.report, b"<html/>");
        assert_eq!(output.stats.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn failing_script_reports_stderr() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("engine.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\necho 'not enough candles' >&2\nexit 3\n",
        )
        .unwrap();
        let command = format!("sh {}", script.display());

        let engine = CommandEngine::new(None, Some(&command)).unwrap();
        match engine.simulate(&rule_job()) {
            Err(StratlabError::Engine { reason, .. }) => {
                assert!(reason.contains("not enough candles"))
            }
            other => panic!("expected Engine error, got: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn splits_like_a_shell() {
        assert_eq!(
            split_command(r#"python3 -m engine --flag"#).unwrap(),
            vec!["python3", "-m", "engine", "--flag"]
        );
        assert_eq!(
            split_command(r#"sh '/opt/my engines/run.sh' "a \"b\"" c\ d ''"#).unwrap(),
            vec!["sh", "/opt/my engines/run.sh", r#"a "b""#, "c d", ""]
        );
        assert_eq!(split_command("  \t ").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn unbalanced_quote_is_config_error() {
        assert!(split_command("sh 'unterminated").is_err());
        assert!(split_command(r#"sh "unterminated"#).is_err());
        match CommandEngine::new(None, Some("sh \"/opt/run.sh")) {
            Err(StratlabError::ConfigInvalid { section, key, .. }) => {
                assert_eq!(section, "engine");
                assert_eq!(key, "backtest_command");
            }
            other => panic!("expected ConfigInvalid, got: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn blank_command_counts_as_unset() {
        let engine = CommandEngine::new(Some("   "), None).unwrap();
        assert!(engine.train_command.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn script_path_with_spaces_runs() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("engine scripts");
        std::fs::create_dir(&nested).unwrap();
        let script = nested.join("run engine.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\necho '{\"stats\": {\"# Trades\": 1.0}, \"report\": \"ok\"}'\n",
        )
        .unwrap();
        let command = format!("sh '{}'", script.display());

        let engine = CommandEngine::new(None, Some(&command)).unwrap();
        let output = engine.simulate(&rule_job()).unwrap();
        assert_eq!(output.report, b"ok");
    }
}
