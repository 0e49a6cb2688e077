use crate::checks::{Check, CheckError};
use crate::config::SmartConfig;
use crate::pool::{run_probes, TargetId};
use crate::report::{CheckResult, CheckStatus};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

/// Meaning of smartctl's exit status bits, in bit order.
const RETURN_CODES: [&str; 8] = [
    "command line did not parse",
    "device open failed or device did not return an IDENTIFY DEVICE structure",
    "some SMART or other ATA command to the disk failed",
    "SMART status check returned DISK FAILING",
    "prefail attributes found at or below threshold",
    "attributes have been at or below threshold at some time in the past",
    "the device error log contains records of errors",
    "the device self-test log contains records of errors",
];

pub struct SmartCheck {
    exec: String,
    cfg: SmartConfig,
}

impl SmartCheck {
    pub fn build(cfg: &SmartConfig) -> Result<Self, CheckError> {
        let exec = match &cfg.exec {
            Some(path) => path.clone(),
            None => which::which("smartctl")
                .map(|p| p.to_string_lossy().to_string())
                .map_err(|_| CheckError::DriverInit {
                    check: "smart".to_string(),
                    reason: "smartctl not found on PATH and smart.exec is unset".to_string(),
                })?,
        };
        Ok(Self {
            exec,
            cfg: cfg.clone(),
        })
    }

    /// Runs smartctl for the version gate and device scan, bounded by the
    /// per-device timeout so a wedged binary cannot stall the whole run.
    async fn smartctl_output(&self, args: &[&str]) -> Result<std::process::Output, CheckResult> {
        let output = time::timeout(
            Duration::from_secs(self.cfg.timeout_secs),
            Command::new(&self.exec).args(args).kill_on_drop(true).output(),
        )
        .await;
        match output {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(err)) => {
                Err(self.setup_error(
                    CheckStatus::Error,
                    format!("failed to run {}: {err}", self.exec),
                ))
            }
            Err(_) => Err(self.setup_error(
                CheckStatus::Timeout,
                format!(
                    "{} {} exceeded {}s",
                    self.exec,
                    args.join(" "),
                    self.cfg.timeout_secs
                ),
            )),
        }
    }

    fn setup_error(&self, status: CheckStatus, message: String) -> CheckResult {
        CheckResult::new("smart", "smartctl", status).with_message(message)
    }

    /// smartctl 7.0 introduced --json; older versions cannot be parsed.
    async fn check_version(&self) -> Result<(), CheckResult> {
        let out = self.smartctl_output(&["-V"]).await?;
        if !out.status.success() {
            return Err(self.setup_error(
                CheckStatus::Error,
                format!("{} -V exited with {}", self.exec, out.status),
            ));
        }
        let text = String::from_utf8_lossy(&out.stdout);
        let major = parse_major_version(&text).ok_or_else(|| {
            self.setup_error(
                CheckStatus::Error,
                format!("cannot parse smartctl version from '{}'", self.exec),
            )
        })?;
        if major < 7 {
            return Err(self.setup_error(
                CheckStatus::Error,
                format!("smartctl >= 7.0 required for --json output, found major version {major}"),
            ));
        }
        Ok(())
    }

    async fn scan_devices(&self) -> Result<Vec<SmartDevice>, CheckResult> {
        let out = self.smartctl_output(&["--json=c", "--scan"]).await?;
        if !out.status.success() {
            return Err(self.setup_error(
                CheckStatus::Error,
                format!("{} --scan exited with {}", self.exec, out.status),
            ));
        }
        let scan: ScanOutput = serde_json::from_slice(&out.stdout).map_err(|err| {
            self.setup_error(
                CheckStatus::Error,
                format!("cannot parse smartctl --scan output: {err}"),
            )
        })?;
        Ok(scan.devices)
    }

    async fn probe_device(&self, device: SmartDevice) -> CheckResult {
        let mut cmd = Command::new(&self.exec);
        cmd.args(["--json=c", "--all"]);
        // megaraid-attached disks need explicit --device passthrough
        if device.device_type.contains("megaraid") {
            cmd.args(["--device", &device.device_type]);
        }
        cmd.arg(&device.name);
        cmd.kill_on_drop(true);

        match cmd.output().await {
            Ok(out) => {
                let exit_code = out.status.code().unwrap_or(-1);
                evaluate_device(&device.name, exit_code, &out.stdout)
            }
            Err(err) => CheckResult::new("smart", device.name, CheckStatus::Error)
                .with_message(format!("failed to run smartctl: {err}")),
        }
    }
}

#[async_trait]
impl Check for SmartCheck {
    fn name(&self) -> &'static str {
        "smart"
    }

    async fn run(&self) -> Vec<CheckResult> {
        if let Err(result) = self.check_version().await {
            warn!(error = ?result.message, "smart check unavailable");
            return vec![result];
        }

        let devices = match self.scan_devices().await {
            Ok(devices) => devices,
            Err(result) => {
                warn!(error = ?result.message, "smartctl device scan failed");
                return vec![result];
            }
        };
        debug!(devices = devices.len(), "probing SMART devices");

        run_probes(
            self.name(),
            devices,
            self.cfg.concurrency,
            Duration::from_secs(self.cfg.timeout_secs),
            |device| self.probe_device(device),
        )
        .await
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmartDevice {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
}

impl TargetId for SmartDevice {
    fn target_id(&self) -> String {
        self.name.clone()
    }
}

#[derive(Deserialize)]
struct ScanOutput {
    #[serde(default)]
    devices: Vec<SmartDevice>,
}

#[derive(Deserialize)]
struct DeviceOutput {
    model_name: Option<String>,
    serial_number: Option<String>,
    smart_status: Option<SmartStatus>,
    temperature: Option<SmartTemperature>,
    ata_smart_attributes: Option<AttributeTable>,
}

#[derive(Deserialize)]
struct SmartStatus {
    passed: bool,
}

#[derive(Deserialize)]
struct SmartTemperature {
    current: Option<i64>,
}

#[derive(Deserialize)]
struct AttributeTable {
    #[serde(default)]
    table: Vec<SmartAttribute>,
}

#[derive(Deserialize)]
struct SmartAttribute {
    name: String,
    value: i64,
    thresh: i64,
    #[serde(default)]
    when_failed: String,
    flags: AttributeFlags,
}

#[derive(Deserialize)]
struct AttributeFlags {
    #[serde(default)]
    prefailure: bool,
}

/// Maps one device's smartctl exit code and JSON output to a result.
/// Exit bits 0..2 mean smartctl itself failed; bit 3 is a failing disk;
/// bits 4..7 are warnings. Prefail attributes at or below threshold are
/// flagged even when the overall status passed.
fn evaluate_device(device: &str, exit_code: i32, stdout: &[u8]) -> CheckResult {
    let failed_bits = decode_exit_bits(exit_code);

    let parsed: Option<DeviceOutput> = serde_json::from_slice(stdout).ok();
    let Some(output) = parsed else {
        let message = if failed_bits.is_empty() {
            "no parseable smartctl output".to_string()
        } else {
            bit_messages(&failed_bits).join("; ")
        };
        return CheckResult::new("smart", device, CheckStatus::Error).with_message(message);
    };

    let passed = output.smart_status.as_ref().map(|s| s.passed);
    let prefail_attrs: Vec<String> = output
        .ata_smart_attributes
        .as_ref()
        .map(|attrs| {
            attrs
                .table
                .iter()
                .filter(|a| {
                    a.flags.prefailure && (!a.when_failed.is_empty() || a.value <= a.thresh)
                })
                .map(|a| a.name.clone())
                .collect()
        })
        .unwrap_or_default();

    let tool_failure = failed_bits.iter().any(|b| *b <= 2);
    let disk_failing = failed_bits.contains(&3) || passed == Some(false);
    let has_warnings = !prefail_attrs.is_empty() || failed_bits.iter().any(|b| *b >= 4);

    let status = if tool_failure {
        CheckStatus::Error
    } else if disk_failing {
        CheckStatus::Fail
    } else if has_warnings {
        CheckStatus::Warn
    } else {
        CheckStatus::Ok
    };

    let mut messages = bit_messages(&failed_bits);
    if passed == Some(false) {
        messages.push("SMART overall-health assessment failed".to_string());
    }
    if !prefail_attrs.is_empty() {
        messages.push(format!("prefail attributes: {}", prefail_attrs.join(", ")));
    }

    let mut result = CheckResult::new("smart", device, status).with_details(json!({
        "model": output.model_name,
        "serial": output.serial_number,
        "temperature_celsius": output.temperature.and_then(|t| t.current),
        "smart_passed": passed,
        "exit_bits": failed_bits,
        "prefail_attributes": prefail_attrs,
    }));
    if !messages.is_empty() {
        result = result.with_message(messages.join("; "));
    }
    result
}

fn decode_exit_bits(exit_code: i32) -> Vec<u8> {
    if exit_code <= 0 {
        return Vec::new();
    }
    (0..8).filter(|bit| (exit_code >> bit) & 1 == 1).collect()
}

fn bit_messages(bits: &[u8]) -> Vec<String> {
    bits.iter()
        .map(|bit| RETURN_CODES[*bit as usize].to_string())
        .collect()
}

fn parse_major_version(version_output: &str) -> Option<u32> {
    let first_line = version_output.lines().next()?;
    let version = first_line.split_whitespace().nth(1)?;
    version.split('.').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEALTHY: &str = r#"{
        "model_name": "Samsung SSD 870 EVO 1TB",
        "serial_number": "S5Y1NG0R123456",
        "smart_status": {"passed": true},
        "temperature": {"current": 31},
        "ata_smart_attributes": {"table": [
            {"name": "Raw_Read_Error_Rate", "value": 100, "thresh": 51,
             "when_failed": "", "flags": {"prefailure": true}},
            {"name": "Power_On_Hours", "value": 97, "thresh": 0,
             "when_failed": "", "flags": {"prefailure": false}}
        ]}
    }"#;

    const PREFAILING: &str = r#"{
        "model_name": "WDC WD40EFRX",
        "serial_number": "WD-WCC4E0123456",
        "smart_status": {"passed": true},
        "ata_smart_attributes": {"table": [
            {"name": "Reallocated_Sector_Ct", "value": 5, "thresh": 140,
             "when_failed": "FAILING_NOW", "flags": {"prefailure": true}}
        ]}
    }"#;

    #[test]
    fn healthy_device_is_ok() {
        let result = evaluate_device("/dev/sda", 0, HEALTHY.as_bytes());
        assert_eq!(result.status, CheckStatus::Ok);
        let details = result.details.unwrap();
        assert_eq!(details["model"], "Samsung SSD 870 EVO 1TB");
        assert_eq!(details["temperature_celsius"], 31);
        assert_eq!(details["smart_passed"], true);
    }

    #[test]
    fn prefail_attribute_is_flagged_as_warning() {
        let result = evaluate_device("/dev/sdb", 1 << 4, PREFAILING.as_bytes());
        assert_eq!(result.status, CheckStatus::Warn);
        let message = result.message.unwrap();
        assert!(message.contains("Reallocated_Sector_Ct"));
    }

    #[test]
    fn failing_smart_status_is_fail() {
        let json = r#"{"smart_status": {"passed": false}}"#;
        let result = evaluate_device("/dev/sdc", 1 << 3, json.as_bytes());
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result
            .message
            .unwrap()
            .contains("SMART status check returned DISK FAILING"));
    }

    #[test]
    fn unopenable_device_is_error() {
        let result = evaluate_device("/dev/sdd", 1 << 1, b"not json");
        assert_eq!(result.status, CheckStatus::Error);
        assert!(result.message.unwrap().contains("device open failed"));
    }

    #[test]
    fn exit_bits_decode_as_set_bits() {
        assert_eq!(decode_exit_bits(0), Vec::<u8>::new());
        assert_eq!(decode_exit_bits(0b0001_1000), vec![3, 4]);
        assert_eq!(decode_exit_bits(-1), Vec::<u8>::new());
    }

    #[test]
    fn major_version_parses_from_banner() {
        let banner = "smartctl 7.3 2022-02-28 r5338 [x86_64-linux] (local build)\n";
        assert_eq!(parse_major_version(banner), Some(7));
        assert_eq!(parse_major_version("smartctl 6.6 2017-11-05\n"), Some(6));
        assert_eq!(parse_major_version(""), None);
    }

    #[tokio::test]
    async fn hung_smartctl_binary_times_out_instead_of_stalling() {
        use crate::config::SmartConfig;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("smartctl");
        std::fs::write(&stub, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let check = SmartCheck::build(&SmartConfig {
            exec: Some(stub.to_string_lossy().to_string()),
            timeout_secs: 1,
            concurrency: 2,
        })
        .unwrap();

        let started = std::time::Instant::now();
        let results = check.run().await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CheckStatus::Timeout);
        assert_eq!(results[0].target, "smartctl");
    }

    #[test]
    fn scan_output_parses_device_list() {
        let json = r#"{"devices": [
            {"name": "/dev/sda", "type": "sat", "protocol": "ATA"},
            {"name": "/dev/bus/0", "type": "megaraid,4", "protocol": "SCSI"}
        ]}"#;
        let scan: ScanOutput = serde_json::from_str(json).unwrap();
        assert_eq!(scan.devices.len(), 2);
        assert_eq!(scan.devices[1].device_type, "megaraid,4");
    }
}
