use crate::checks::Check;
use crate::report::{CheckResult, CheckStatus};
use async_trait::async_trait;
use serde_json::json;
use sysinfo::{DiskExt, System, SystemExt};

/// Local filesystem usage per mounted volume. Synchronous, no pool or
/// timeout needed.
pub struct DiskUsageCheck;

impl DiskUsageCheck {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Check for DiskUsageCheck {
    fn name(&self) -> &'static str {
        "disk_usage"
    }

    async fn run(&self) -> Vec<CheckResult> {
        let mut system = System::new();
        system.refresh_disks_list();
        system.refresh_disks();

        system
            .disks()
            .iter()
            .map(|disk| {
                let total = disk.total_space();
                let available = disk.available_space();
                let used = total.saturating_sub(available);
                let mount = disk.mount_point().to_string_lossy().to_string();

                CheckResult::new(self.name(), mount, CheckStatus::Ok)
                    .with_message(format!(
                        "{} used of {}",
                        byte_to_human(used),
                        byte_to_human(total)
                    ))
                    .with_details(json!({
                        "device": disk.name().to_string_lossy(),
                        "fs_type": String::from_utf8_lossy(disk.file_system()),
                        "size_bytes": total,
                        "used_bytes": used,
                        "available_bytes": available,
                    }))
            })
            .collect()
    }
}

/// MB/GB/... rendering for log and stdout output.
pub fn byte_to_human(val: u64) -> String {
    if val == 0 {
        return "0".to_string();
    }
    let mut val = val as f64;
    let mut unit = "k";
    for u in ["k", "M", "G", "T", "P"] {
        unit = u;
        val /= 1024.0;
        if val < 1024.0 {
            break;
        }
    }
    format!("{val:.1}{unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_to_human_picks_sensible_units() {
        assert_eq!(byte_to_human(0), "0");
        assert_eq!(byte_to_human(512), "0.5k");
        assert_eq!(byte_to_human(1024 * 1024), "1.0M");
        assert_eq!(byte_to_human(3 * 1024 * 1024 * 1024), "3.0G");
        assert_eq!(byte_to_human(2 * 1024_u64.pow(4)), "2.0T");
    }

    #[tokio::test]
    async fn results_carry_usage_details() {
        let results = DiskUsageCheck::new().run().await;
        for result in results {
            assert_eq!(result.status, CheckStatus::Ok);
            let details = result.details.expect("disk results carry details");
            let size = details["size_bytes"].as_u64().unwrap();
            let used = details["used_bytes"].as_u64().unwrap();
            let available = details["available_bytes"].as_u64().unwrap();
            assert!(used <= size);
            assert!(available <= size);
        }
    }
}
