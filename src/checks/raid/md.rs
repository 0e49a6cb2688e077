use super::{
    find_executable, init_error, prop_line, run_tool, Adapter, DriveHealth, LogicalDrive,
    PhysicalDrive, RaidCli, RaidInventory,
};
use crate::checks::CheckError;
use crate::config::PoolConfig;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

const LSBLK_ARGS: [&str; 6] = [
    "--ascii",
    "--nodeps",
    "--noheadings",
    "--raw",
    "--output",
    "NAME,MAJ:MIN,MODEL,SIZE,STATE",
];

/// Linux software RAID via mdadm. Member disks are examined concurrently
/// since a dying disk can make `mdadm --examine` hang.
pub struct MdRaid {
    exec: String,
    timeout: Duration,
    concurrency: usize,
    mtab_path: PathBuf,
}

#[derive(Debug, Clone)]
struct MemberDisk {
    path: String,
    model: String,
    size: String,
    state: String,
    health: DriveHealth,
}

impl MdRaid {
    pub fn detect(cfg: &PoolConfig) -> Result<Self, CheckError> {
        let exec =
            find_executable(&["mdadm"]).ok_or_else(|| init_error("mdadm not found on PATH"))?;
        Ok(Self {
            exec,
            timeout: Duration::from_secs(cfg.timeout_secs),
            concurrency: cfg.concurrency,
            mtab_path: PathBuf::from("/etc/mtab"),
        })
    }

    async fn list_arrays(&self) -> Result<Vec<String>, String> {
        let out = run_tool(&self.exec, &["--detail", "--scan"], self.timeout)
            .await
            .map_err(|err| format!("mdadm could not get list of arrays: {err}"))?;
        let arrays = parse_array_scan(&out);
        if arrays.is_empty() {
            return Err("mdadm is not managing any arrays".to_string());
        }
        Ok(arrays)
    }

    async fn list_member_disks(&self) -> Result<Vec<MemberDisk>, String> {
        let os_drives = match std::fs::read_to_string(&self.mtab_path) {
            Ok(text) => parse_os_drives(&text),
            Err(err) => {
                warn!(path = %self.mtab_path.display(), error = %err, "cannot read mtab");
                HashSet::new()
            }
        };
        debug!(?os_drives, "ignoring drives with OS partitions on them");

        let out = run_tool("lsblk", &LSBLK_ARGS, self.timeout)
            .await
            .map_err(|err| format!("error running lsblk: {err}"))?;
        Ok(parse_lsblk(&out, &os_drives, |path| {
            Path::new(path).exists()
        }))
    }

    async fn examine(&self, path: &str) -> Option<HashMap<String, String>> {
        let output = time::timeout(
            self.timeout,
            Command::new(&self.exec)
                .args(["--examine", path])
                .kill_on_drop(true)
                .output(),
        )
        .await;
        match output {
            Ok(Ok(out)) if out.status.success() => Some(
                String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .filter_map(prop_line)
                    .collect(),
            ),
            Ok(Ok(_)) | Ok(Err(_)) => None,
            Err(_) => {
                warn!(device = %path, "mdadm --examine timeout");
                None
            }
        }
    }
}

#[async_trait]
impl RaidCli for MdRaid {
    fn manager(&self) -> &'static str {
        "md"
    }

    async fn inventory(&self) -> Result<RaidInventory, String> {
        let arrays = self.list_arrays().await?;
        let disks = self.list_member_disks().await?;

        let examined: Vec<(MemberDisk, Option<HashMap<String, String>>)> =
            stream::iter(disks.into_iter().map(|disk| async move {
                let props = self.examine(&disk.path).await;
                (disk, props)
            }))
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;

        let mut physical = Vec::new();
        let mut members_by_uuid: HashMap<String, Vec<String>> = HashMap::new();

        for (disk, props) in examined {
            let mut health = disk.health;
            let mut state = disk.state.clone();
            let mut hotspare = false;

            match props {
                Some(props) => {
                    hotspare = props.get("Device Role").map(String::as_str) == Some("spare");
                    if let Some(uuid) = props.get("Array UUID") {
                        if !hotspare {
                            members_by_uuid
                                .entry(uuid.clone())
                                .or_default()
                                .push(disk.path.clone());
                        }
                    }
                }
                None => {
                    // examine failed or hung; treat the member as suspect
                    health = DriveHealth::Failing;
                    state = format!("{state} (examine failed)");
                }
            }

            physical.push(PhysicalDrive {
                id: disk.path,
                state,
                size: disk.size,
                model: disk.model,
                health,
                hotspare,
            });
        }

        let mut logical = Vec::new();
        for array in &arrays {
            let out = run_tool(&self.exec, &["--detail", array], self.timeout)
                .await
                .map_err(|err| format!("mdadm could not get details for {array}: {err}"))?;
            logical.push(parse_array_detail(array, &out, &members_by_uuid));
        }

        Ok(RaidInventory {
            adapters: vec![Adapter {
                id: "md".to_string(),
                name: "Linux Software RAID".to_string(),
            }],
            logical,
            physical,
        })
    }
}

/// `mdadm --detail --scan` lines look like
/// `ARRAY /dev/md0 metadata=1.2 UUID=...`; the device is the second field.
fn parse_array_scan(out: &str) -> Vec<String> {
    out.lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

/// Devices with OS partitions, derived from mtab: `/dev/sda2` mounted
/// anywhere means `/dev/sda` is off limits.
fn parse_os_drives(mtab: &str) -> HashSet<String> {
    let mut drives = HashSet::new();
    for line in mtab.lines() {
        if line.starts_with("/dev/sd") {
            if let Some(partition) = line.split_whitespace().next() {
                drives.insert(partition.trim_end_matches(|c: char| c.is_ascii_digit()).to_string());
            }
        }
    }
    drives
}

fn parse_lsblk(
    out: &str,
    os_drives: &HashSet<String>,
    partition_exists: impl Fn(&str) -> bool,
) -> Vec<MemberDisk> {
    let hex_escape = Regex::new(r"\\x[0-9a-fA-F]{2}").expect("static regex");

    let mut disks = Vec::new();
    for line in out.lines() {
        let line = hex_escape.replace_all(line, "_");
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (name, _majmin, model, size) = (fields[0], fields[1], fields[2], fields[3]);
        let state = fields.get(4).copied().unwrap_or("");

        let mut path = format!("/dev/{name}");
        if os_drives.contains(&path) {
            continue;
        }

        let health = if state.is_empty() || state == "running" {
            DriveHealth::Good
        } else {
            DriveHealth::Failed
        };

        // arrays built on partitions rather than whole disks
        let partition = format!("{path}1");
        if partition_exists(&partition) {
            path = partition;
        }

        disks.push(MemberDisk {
            path,
            model: model.to_string(),
            size: size.to_string(),
            state: state.to_string(),
            health,
        });
    }
    disks
}

fn parse_array_detail(
    array: &str,
    out: &str,
    members_by_uuid: &HashMap<String, Vec<String>>,
) -> LogicalDrive {
    let props: HashMap<String, String> = out.lines().filter_map(prop_line).collect();

    // failed arrays do not report a size
    let size = props
        .get("Array Size")
        .and_then(|s| s.split('(').next())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|kib| format!("{:.1}TB", kib as f64 / 1024_f64.powi(3)))
        .unwrap_or_default();

    let state = props.get("State").cloned().unwrap_or_default();
    let members = props
        .get("UUID")
        .and_then(|uuid| members_by_uuid.get(uuid))
        .cloned()
        .unwrap_or_default();

    LogicalDrive {
        id: array.to_string(),
        raid_level: props
            .get("Raid Level")
            .map(|l| l.to_uppercase())
            .unwrap_or_default(),
        size,
        degraded: state.contains("FAILED") || state.contains("degraded"),
        state,
        members,
    }
}
