pub mod md;
pub mod megacli;
pub mod omreport;

use crate::checks::{Check, CheckError};
use crate::config::{PoolConfig, RaidConfig, RaidType};
use crate::report::{CheckResult, CheckStatus};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::{info, warn};

/// Normalized health of a physical RAID member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveHealth {
    Good,
    Failing,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Adapter {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct LogicalDrive {
    pub id: String,
    pub raid_level: String,
    pub size: String,
    pub state: String,
    pub degraded: bool,
    pub members: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PhysicalDrive {
    pub id: String,
    pub state: String,
    pub size: String,
    pub model: String,
    pub health: DriveHealth,
    pub hotspare: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RaidInventory {
    pub adapters: Vec<Adapter>,
    pub logical: Vec<LogicalDrive>,
    pub physical: Vec<PhysicalDrive>,
}

/// Standardized interface over the vendor RAID CLI tools.
#[async_trait]
pub trait RaidCli: Send + Sync {
    fn manager(&self) -> &'static str;
    async fn inventory(&self) -> Result<RaidInventory, String>;
}

pub struct RaidCheck {
    cli: Box<dyn RaidCli>,
}

#[async_trait]
impl Check for RaidCheck {
    fn name(&self) -> &'static str {
        "raid"
    }

    async fn run(&self) -> Vec<CheckResult> {
        match self.cli.inventory().await {
            Ok(inventory) => inventory_results(self.name(), self.cli.manager(), &inventory),
            Err(reason) => {
                warn!(manager = %self.cli.manager(), error = %reason, "raid inventory failed");
                vec![
                    CheckResult::new(self.name(), self.cli.manager(), CheckStatus::Error)
                        .with_message(reason),
                ]
            }
        }
    }
}

/// Sub-driver selection: explicit `raid.type`, or the first tool found on
/// PATH in megacli, omreport, mdadm order.
pub fn build(cfg: &RaidConfig, md_cfg: &PoolConfig) -> Result<Box<dyn Check>, CheckError> {
    let cli: Box<dyn RaidCli> = match cfg.raid_type {
        Some(RaidType::MegaCli) => Box::new(megacli::MegaCli::detect(cfg)?),
        Some(RaidType::Omreport) => Box::new(omreport::Omreport::detect(cfg)?),
        Some(RaidType::Md) => Box::new(md::MdRaid::detect(md_cfg)?),
        None => autodetect(cfg, md_cfg)?,
    };
    info!(manager = %cli.manager(), "selected RAID manager");
    Ok(Box::new(RaidCheck { cli }))
}

fn autodetect(cfg: &RaidConfig, md_cfg: &PoolConfig) -> Result<Box<dyn RaidCli>, CheckError> {
    if let Ok(cli) = megacli::MegaCli::detect(cfg) {
        return Ok(Box::new(cli));
    }
    if let Ok(cli) = omreport::Omreport::detect(cfg) {
        return Ok(Box::new(cli));
    }
    if let Ok(cli) = md::MdRaid::detect(md_cfg) {
        return Ok(Box::new(cli));
    }
    Err(CheckError::DriverInit {
        check: "raid".to_string(),
        reason: "no supported RAID manager found on PATH (megacli, omreport, mdadm)".to_string(),
    })
}

fn inventory_results(check: &str, manager: &str, inventory: &RaidInventory) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(inventory.logical.len() + inventory.physical.len());

    for ld in &inventory.logical {
        let status = if ld.degraded {
            CheckStatus::Fail
        } else {
            CheckStatus::Ok
        };
        results.push(
            CheckResult::new(check, ld.id.clone(), status)
                .with_message(format!("{} {} {}", ld.raid_level, ld.size, ld.state))
                .with_details(json!({
                    "kind": "logical_drive",
                    "manager": manager,
                    "raid_level": ld.raid_level,
                    "size": ld.size,
                    "state": ld.state,
                    "members": ld.members,
                })),
        );
    }

    for pd in &inventory.physical {
        let status = match pd.health {
            DriveHealth::Good => CheckStatus::Ok,
            DriveHealth::Failing => CheckStatus::Warn,
            DriveHealth::Failed => CheckStatus::Fail,
        };
        let mut result = CheckResult::new(check, pd.id.clone(), status).with_details(json!({
            "kind": "physical_drive",
            "manager": manager,
            "state": pd.state,
            "size": pd.size,
            "model": pd.model,
            "hotspare": pd.hotspare,
        }));
        if status != CheckStatus::Ok {
            result = result.with_message(pd.state.clone());
        }
        results.push(result);
    }

    results
}

/// First executable from `candidates` found on PATH.
pub(crate) fn find_executable(candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|name| which::which(name).ok())
        .map(|path| path.to_string_lossy().to_string())
}

pub(crate) fn init_error(reason: impl Into<String>) -> CheckError {
    CheckError::DriverInit {
        check: "raid".to_string(),
        reason: reason.into(),
    }
}

/// `Key : Value` line used throughout the vendor tools' output.
pub(crate) fn prop_line(line: &str) -> Option<(String, String)> {
    static PROP_RE: OnceLock<Regex> = OnceLock::new();
    let re = PROP_RE.get_or_init(|| Regex::new(r"^(.*?)\s*:\s*(.+)$").expect("static regex"));
    let caps = re.captures(line.trim())?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Runs a RAID CLI tool, bounded by `timeout`. Non-zero exit or expiry is
/// an error string for the caller to surface.
pub(crate) async fn run_tool(
    exec: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, String> {
    let output = time::timeout(
        timeout,
        Command::new(exec).args(args).kill_on_drop(true).output(),
    )
    .await;
    match output {
        Ok(Ok(out)) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout).to_string()),
        Ok(Ok(out)) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            Err(format!(
                "{exec} {} exited with {}: {}",
                args.join(" "),
                out.status,
                stderr.trim()
            ))
        }
        Ok(Err(err)) => Err(format!("failed to run {exec}: {err}")),
        Err(_) => Err(format!(
            "{exec} {} timed out after {}s",
            args.join(" "),
            timeout.as_secs()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prop_line_splits_on_first_colon_group() {
        assert_eq!(
            prop_line("Product Name    : PERC H710 Mini"),
            Some(("Product Name".to_string(), "PERC H710 Mini".to_string()))
        );
        assert_eq!(
            prop_line("Raid Level : Primary-1, Secondary-0, RAID Level Qualifier-0"),
            Some((
                "Raid Level".to_string(),
                "Primary-1, Secondary-0, RAID Level Qualifier-0".to_string()
            ))
        );
        assert_eq!(prop_line("no colon here"), None);
    }

    #[test]
    fn degraded_logical_drive_maps_to_fail() {
        let inventory = RaidInventory {
            adapters: vec![],
            logical: vec![LogicalDrive {
                id: "a0:vd0".to_string(),
                raid_level: "RAID5".to_string(),
                size: "3.6TB".to_string(),
                state: "Degraded".to_string(),
                degraded: true,
                members: vec!["a0:pd4".to_string()],
            }],
            physical: vec![
                PhysicalDrive {
                    id: "a0:pd4".to_string(),
                    state: "Online, Spun Up".to_string(),
                    size: "1.819 TB".to_string(),
                    model: "SEAGATE ST2000NM0023".to_string(),
                    health: DriveHealth::Good,
                    hotspare: false,
                },
                PhysicalDrive {
                    id: "a0:pd5".to_string(),
                    state: "Failed".to_string(),
                    size: "1.819 TB".to_string(),
                    model: "SEAGATE ST2000NM0023".to_string(),
                    health: DriveHealth::Failed,
                    hotspare: false,
                },
            ],
        };

        let results = inventory_results("raid", "megacli", &inventory);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, CheckStatus::Fail);
        assert_eq!(results[1].status, CheckStatus::Ok);
        assert!(results[1].message.is_none());
        assert_eq!(results[2].status, CheckStatus::Fail);
        assert_eq!(results[2].message.as_deref(), Some("Failed"));
    }

    #[tokio::test]
    async fn timed_out_tool_child_does_not_linger() {
        let marker = "8642.97531";
        let err = run_tool("sleep", &[marker], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.contains("timed out"));

        // SIGKILL is sent when the timed-out future is dropped
        time::sleep(Duration::from_millis(300)).await;
        assert!(
            !any_process_running(marker),
            "sleep {marker} survived the timeout"
        );
    }

    fn any_process_running(marker: &str) -> bool {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return false;
        };
        entries
            .flatten()
            .filter_map(|entry| std::fs::read(entry.path().join("cmdline")).ok())
            .any(|raw| String::from_utf8_lossy(&raw).contains(marker))
    }

    #[tokio::test]
    async fn missing_tool_reports_error_result() {
        struct Broken;
        #[async_trait]
        impl RaidCli for Broken {
            fn manager(&self) -> &'static str {
                "megacli"
            }
            async fn inventory(&self) -> Result<RaidInventory, String> {
                Err("MegaCli could not get adapter info".to_string())
            }
        }

        let check = RaidCheck { cli: Box::new(Broken) };
        let results = check.run().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CheckStatus::Error);
        assert_eq!(results[0].target, "megacli");
    }
}
