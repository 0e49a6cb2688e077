use super::{
    find_executable, init_error, prop_line, run_tool, Adapter, DriveHealth, LogicalDrive,
    PhysicalDrive, RaidCli, RaidInventory,
};
use crate::checks::CheckError;
use crate::config::RaidConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Dell PERC controllers via OpenManage's omreport tool.
pub struct Omreport {
    exec: String,
    timeout: Duration,
}

impl Omreport {
    pub fn detect(cfg: &RaidConfig) -> Result<Self, CheckError> {
        let exec = find_executable(&["omreport"])
            .ok_or_else(|| init_error("omreport not found on PATH"))?;
        Ok(Self {
            exec,
            timeout: Duration::from_secs(cfg.timeout_secs),
        })
    }

    async fn storage(&self, args: &[&str]) -> Result<String, String> {
        let mut full = vec!["storage"];
        full.extend_from_slice(args);
        run_tool(&self.exec, &full, self.timeout).await
    }
}

#[async_trait]
impl RaidCli for Omreport {
    fn manager(&self) -> &'static str {
        "omreport"
    }

    async fn inventory(&self) -> Result<RaidInventory, String> {
        let controllers_out = self
            .storage(&["controller"])
            .await
            .map_err(|err| format!("omreport could not get controller info: {err}"))?;
        let adapters = parse_controllers(&controllers_out);
        if adapters.is_empty() {
            return Err("omreport reports no storage controllers".to_string());
        }

        let mut physical = Vec::new();
        let mut logical = Vec::new();

        for adapter in &adapters {
            let controller_arg = format!("controller={}", adapter.id);

            let pdisk_out = self
                .storage(&["pdisk", &controller_arg])
                .await
                .map_err(|err| {
                    format!(
                        "omreport could not get pdisk info for controller {}: {err}",
                        adapter.id
                    )
                })?;
            physical.extend(
                parse_blocks(&pdisk_out)
                    .iter()
                    .map(|block| physical_from_block(&adapter.id, block)),
            );

            let vdisk_out = self
                .storage(&["vdisk", &controller_arg])
                .await
                .map_err(|err| {
                    format!(
                        "omreport could not get vdisk info for controller {}: {err}",
                        adapter.id
                    )
                })?;
            for block in parse_blocks(&vdisk_out) {
                let vdisk_id = block.get("ID").cloned().unwrap_or_default();
                // member pdisks come from a per-vdisk query
                let members_out = self
                    .storage(&[
                        "pdisk",
                        &controller_arg,
                        &format!("vdisk={vdisk_id}"),
                    ])
                    .await
                    .unwrap_or_default();
                let members = parse_blocks(&members_out)
                    .iter()
                    .filter_map(|b| b.get("ID"))
                    .map(|id| format!("c{}:pd{}", adapter.id, id))
                    .collect();
                logical.push(logical_from_block(&adapter.id, &block, members));
            }
        }

        Ok(RaidInventory {
            adapters,
            logical,
            physical,
        })
    }
}

fn parse_controllers(out: &str) -> Vec<Adapter> {
    parse_blocks_started_by(out, |line| line.starts_with("Controller"))
        .into_iter()
        .filter(|props| props.contains_key("ID"))
        .map(|props| Adapter {
            id: props.get("ID").cloned().unwrap_or_default(),
            name: props.get("Name").cloned().unwrap_or_default(),
        })
        .collect()
}

/// omreport lists one block per device, each beginning with its `ID` row.
fn parse_blocks(out: &str) -> Vec<HashMap<String, String>> {
    let mut blocks = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;

    for line in out.lines() {
        let line = line.trim();
        if line.starts_with("ID") && prop_line(line).map(|(k, _)| k == "ID").unwrap_or(false) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(HashMap::new());
        }
        if let (Some(block), Some((key, value))) = (current.as_mut(), prop_line(line)) {
            block.insert(key, value);
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }
    blocks
}

fn parse_blocks_started_by(
    out: &str,
    starts: impl Fn(&str) -> bool,
) -> Vec<HashMap<String, String>> {
    let mut blocks = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;

    for line in out.lines() {
        let line = line.trim();
        if starts(line) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(HashMap::new());
        } else if let (Some(block), Some((key, value))) = (current.as_mut(), prop_line(line)) {
            block.insert(key, value);
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }
    blocks
}

fn physical_from_block(controller: &str, props: &HashMap<String, String>) -> PhysicalDrive {
    let id = props.get("ID").cloned().unwrap_or_default();
    let status = props.get("Status").cloned().unwrap_or_default();
    let state = props.get("State").cloned().unwrap_or_else(|| status.clone());

    let health = match status.as_str() {
        "Critical" => DriveHealth::Failed,
        "Non-Critical" => DriveHealth::Failing,
        _ => DriveHealth::Good,
    };

    PhysicalDrive {
        id: format!("c{controller}:pd{id}"),
        state,
        size: props
            .get("Capacity")
            .map(|s| s.split('(').next().unwrap_or("").trim().to_string())
            .unwrap_or_default(),
        model: props.get("Product ID").cloned().unwrap_or_default(),
        health,
        hotspare: props.get("Hot Spare").map(String::as_str).unwrap_or("No") != "No",
    }
}

fn logical_from_block(
    controller: &str,
    props: &HashMap<String, String>,
    members: Vec<String>,
) -> LogicalDrive {
    let id = props.get("ID").cloned().unwrap_or_default();
    let state = props.get("State").cloned().unwrap_or_default();
    LogicalDrive {
        id: format!("c{controller}:vd{id}"),
        raid_level: props.get("Layout").cloned().unwrap_or_default(),
        size: props
            .get("Size")
            .map(|s| s.split('(').next().unwrap_or("").trim().to_string())
            .unwrap_or_default(),
        degraded: state != "Ready",
        state,
        members,
    }
}
