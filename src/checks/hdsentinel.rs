use crate::checks::{Check, CheckError};
use crate::config::HdSentinelConfig;
use crate::report::{CheckResult, CheckStatus};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::warn;

/// Hard Disk Sentinel wrapper. `-solid` prints one line per disk:
/// temperature, health percent, power-on days, model, serial, device.
pub struct HdSentinelCheck {
    exec: String,
    timeout_secs: u64,
}

impl HdSentinelCheck {
    pub fn build(cfg: &HdSentinelConfig) -> Result<Self, CheckError> {
        let exec = match &cfg.exec {
            Some(path) => path.clone(),
            None => ["hdsentinel", "HDSentinel"]
                .iter()
                .find_map(|name| which::which(name).ok())
                .map(|p| p.to_string_lossy().to_string())
                .ok_or_else(|| CheckError::DriverInit {
                    check: "hdsentinel".to_string(),
                    reason: "hdsentinel not found on PATH and hdsentinel.exec is unset"
                        .to_string(),
                })?,
        };
        Ok(Self {
            exec,
            timeout_secs: cfg.timeout_secs,
        })
    }
}

#[async_trait]
impl Check for HdSentinelCheck {
    fn name(&self) -> &'static str {
        "hdsentinel"
    }

    async fn run(&self) -> Vec<CheckResult> {
        let output = time::timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new(&self.exec)
                .arg("-solid")
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match output {
            Ok(Ok(out)) if out.status.success() => {
                parse_solid_output(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(Ok(out)) => {
                warn!(exit = %out.status, "hdsentinel failed");
                vec![
                    CheckResult::new(self.name(), "hdsentinel", CheckStatus::Error)
                        .with_message(format!("hdsentinel exited with {}", out.status)),
                ]
            }
            Ok(Err(err)) => vec![
                CheckResult::new(self.name(), "hdsentinel", CheckStatus::Error)
                    .with_message(format!("failed to run {}: {err}", self.exec)),
            ],
            Err(_) => vec![CheckResult::new(
                self.name(),
                "hdsentinel",
                CheckStatus::Timeout,
            )
            .with_message(format!("hdsentinel exceeded {}s", self.timeout_secs))],
        }
    }
}

pub fn parse_solid_output(text: &str) -> Vec<CheckResult> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_solid_line)
        .collect()
}

fn parse_solid_line(line: &str) -> CheckResult {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return CheckResult::new("hdsentinel", line.trim(), CheckStatus::Error)
            .with_message("unrecognized hdsentinel output line");
    }

    let temperature: Option<i64> = fields[0].parse().ok();
    let health: Option<i64> = fields[1].parse().ok();
    let power_on_days: Option<i64> = fields[2].parse().ok();
    let device = fields[fields.len() - 1];
    let serial = fields[fields.len() - 2];
    let model = fields[3..fields.len() - 2].join(" ");

    let status = match health {
        Some(h) if h <= 50 => CheckStatus::Fail,
        Some(h) if h < 100 => CheckStatus::Warn,
        Some(_) => CheckStatus::Ok,
        None => CheckStatus::Error,
    };

    let mut result = CheckResult::new("hdsentinel", device, status).with_details(json!({
        "temperature_celsius": temperature,
        "health_percent": health,
        "power_on_days": power_on_days,
        "model": model,
        "serial": serial,
    }));
    match health {
        Some(h) if h < 100 => {
            result = result.with_message(format!("disk health at {h}%"));
        }
        None => {
            result = result.with_message("cannot parse health percentage");
        }
        _ => {}
    }
    result
}
