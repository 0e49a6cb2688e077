use super::{
    find_executable, init_error, prop_line, run_tool, Adapter, DriveHealth, LogicalDrive,
    PhysicalDrive, RaidCli, RaidInventory,
};
use crate::checks::CheckError;
use crate::config::RaidConfig;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

/// LSI MegaRAID controllers via the MegaCli tool.
pub struct MegaCli {
    exec: String,
    timeout: Duration,
}

impl MegaCli {
    pub fn detect(cfg: &RaidConfig) -> Result<Self, CheckError> {
        let exec = find_executable(&["megacli", "MegaCli", "MegaCli64"])
            .ok_or_else(|| init_error("megacli not found on PATH"))?;
        Ok(Self {
            exec,
            timeout: Duration::from_secs(cfg.timeout_secs),
        })
    }
}

#[async_trait]
impl RaidCli for MegaCli {
    fn manager(&self) -> &'static str {
        "megacli"
    }

    async fn inventory(&self) -> Result<RaidInventory, String> {
        let adapters = run_tool(&self.exec, &["adpallinfo", "aall", "nolog"], self.timeout)
            .await
            .map_err(|err| format!("MegaCli could not get adapter info: {err}"))?;
        let pdisks = run_tool(&self.exec, &["pdlist", "aall", "nolog"], self.timeout)
            .await
            .map_err(|err| format!("MegaCli could not get physical drives info: {err}"))?;
        let ldisks = run_tool(&self.exec, &["ldpdinfo", "aall", "nolog"], self.timeout)
            .await
            .map_err(|err| format!("MegaCli could not get logical drives info: {err}"))?;

        Ok(RaidInventory {
            adapters: parse_adapters(&adapters),
            physical: parse_physical_drives(&pdisks),
            logical: parse_logical_drives(&ldisks),
        })
    }
}

fn parse_adapters(out: &str) -> Vec<Adapter> {
    let mut adapters = Vec::new();
    let mut current: Option<(String, HashMap<String, String>)> = None;

    for line in out.lines() {
        let line = line.trim_end();
        if let Some(id) = line.strip_prefix("Adapter #") {
            if let Some(block) = current.take() {
                adapters.push(adapter_from_block(block));
            }
            current = Some((id.trim().to_string(), HashMap::new()));
        } else if let Some((_, props)) = current.as_mut() {
            if let Some((key, value)) = prop_line(line) {
                props.insert(key, value);
            }
        }
    }
    if let Some(block) = current.take() {
        adapters.push(adapter_from_block(block));
    }
    adapters
}

fn adapter_from_block((id, props): (String, HashMap<String, String>)) -> Adapter {
    Adapter {
        id,
        name: props.get("Product Name").cloned().unwrap_or_default(),
    }
}

/// pdlist output: one `Enclosure Device ID:` block per drive, grouped under
/// `Adapter #N` headers.
fn parse_physical_drives(out: &str) -> Vec<PhysicalDrive> {
    let mut drives = Vec::new();
    let mut adapter = String::new();
    let mut current: Option<(String, HashMap<String, String>, bool)> = None;

    fn flush(
        block: Option<(String, HashMap<String, String>, bool)>,
        drives: &mut Vec<PhysicalDrive>,
    ) {
        if let Some((adapter_id, props, hotspare)) = block {
            drives.push(physical_from_block(&adapter_id, &props, hotspare));
        }
    }

    for line in out.lines() {
        let line = line.trim_end();
        if let Some(id) = line.strip_prefix("Adapter #") {
            flush(current.take(), &mut drives);
            adapter = id.trim().to_string();
        } else if line.starts_with("Enclosure Device ID:") {
            flush(current.take(), &mut drives);
            let mut props = HashMap::new();
            if let Some((key, value)) = prop_line(line) {
                props.insert(key, value);
            }
            current = Some((adapter.clone(), props, false));
        } else if let Some((_, props, hotspare)) = current.as_mut() {
            if line.starts_with("Hotspare Information:") {
                *hotspare = true;
            } else if let Some((key, value)) = prop_line(line) {
                props.insert(key, value);
            }
        }
    }
    flush(current.take(), &mut drives);
    drives
}

fn physical_from_block(
    adapter: &str,
    props: &HashMap<String, String>,
    hotspare: bool,
) -> PhysicalDrive {
    let device_id = props.get("Device Id").cloned().unwrap_or_default();
    let firmware_state = props.get("Firmware state").cloned().unwrap_or_default();
    let predictive_failures = props
        .get("Predictive Failure Count")
        .map(String::as_str)
        .unwrap_or("0");

    let mut health = DriveHealth::Good;
    if predictive_failures != "0" {
        health = DriveHealth::Failing;
    }
    if firmware_state.contains("bad") || firmware_state.contains("Failed") {
        health = DriveHealth::Failed;
    }

    PhysicalDrive {
        id: format!("a{adapter}:pd{device_id}"),
        state: firmware_state,
        size: props
            .get("Raw Size")
            .map(|s| s.split('[').next().unwrap_or("").trim().to_string())
            .unwrap_or_default(),
        model: props
            .get("Inquiry Data")
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default(),
        health,
        hotspare,
    }
}

/// MegaCli reports RAID levels as primary/secondary qualifier tuples.
fn raid_level_label(raw: &str) -> String {
    match raw {
        "Primary-1, Secondary-0, RAID Level Qualifier-0" => "RAID1".to_string(),
        "Primary-5, Secondary-0, RAID Level Qualifier-3" => "RAID5".to_string(),
        _ => "?".to_string(),
    }
}

fn parse_logical_drives(out: &str) -> Vec<LogicalDrive> {
    let re_adapter = Regex::new(r"^Adapter #(\d+)").expect("static regex");
    let re_vd = Regex::new(r"^Virtual Drive:\s*(\d+)").expect("static regex");

    struct Block {
        adapter: String,
        id: String,
        props: HashMap<String, String>,
        members: Vec<String>,
    }

    let mut blocks: Vec<Block> = Vec::new();
    let mut adapter = String::new();
    let mut parse_opts = false;

    for line in out.lines() {
        let line = line.trim_end();
        if let Some(caps) = re_adapter.captures(line) {
            adapter = caps[1].to_string();
        } else if let Some(caps) = re_vd.captures(line) {
            blocks.push(Block {
                adapter: adapter.clone(),
                id: caps[1].to_string(),
                props: HashMap::new(),
                members: Vec::new(),
            });
            parse_opts = true;
        } else if line.starts_with("PD:") {
            parse_opts = false;
        } else if let Some(block) = blocks.last_mut() {
            if parse_opts {
                if let Some((key, value)) = prop_line(line) {
                    block.props.insert(key, value);
                }
            } else if line.starts_with("Device Id:") {
                if let Some((_, value)) = prop_line(line) {
                    block.members.push(format!("a{}:pd{}", block.adapter, value));
                }
            }
        }
    }

    blocks
        .into_iter()
        .map(|block| {
            let state = block.props.get("State").cloned().unwrap_or_default();
            LogicalDrive {
                id: format!("a{}:vd{}", block.adapter, block.id),
                raid_level: raid_level_label(
                    block.props.get("RAID Level").map(String::as_str).unwrap_or(""),
                ),
                size: block.props.get("Size").cloned().unwrap_or_default(),
                degraded: state != "Optimal",
                state,
                members: block.members,
            }
        })
        .collect()
}
