use crate::checks::Check;
use crate::config::NfsConfig;
use crate::pool::run_probes;
use crate::report::{CheckResult, CheckStatus};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const MTAB: &str = "/etc/mtab";

/// Stale NFS mount detector: lists each NFS mount point under a timeout.
/// A listing that hangs past `stale_timeout` marks the mount stale.
pub struct NfsCheck {
    cfg: NfsConfig,
    mtab_path: PathBuf,
}

impl NfsCheck {
    pub fn new(cfg: NfsConfig) -> Self {
        Self {
            cfg,
            mtab_path: PathBuf::from(MTAB),
        }
    }

    #[cfg(test)]
    fn with_mtab(cfg: NfsConfig, mtab_path: PathBuf) -> Self {
        Self { cfg, mtab_path }
    }

    fn discover_mounts(&self) -> Vec<String> {
        match std::fs::read_to_string(&self.mtab_path) {
            Ok(text) => parse_nfs_mounts(&text),
            Err(err) => {
                warn!(path = %self.mtab_path.display(), error = %err, "cannot read mtab");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Check for NfsCheck {
    fn name(&self) -> &'static str {
        "nfs"
    }

    async fn run(&self) -> Vec<CheckResult> {
        let mounts = self.discover_mounts();
        debug!(mounts = mounts.len(), "probing NFS mounts");

        run_probes(
            self.name(),
            mounts,
            self.cfg.concurrency,
            Duration::from_secs(self.cfg.stale_timeout_secs),
            |mount| async move { probe_mount(mount).await },
        )
        .await
    }
}

/// Permission denied (exit 2) still proves the server responds; only a
/// hang (pool timeout) or a spawn failure is a problem.
async fn probe_mount(mount: String) -> CheckResult {
    let status = Command::new("ls")
        .arg(&mount)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;

    match status {
        Ok(exit) => {
            let code = exit.code().unwrap_or(-1);
            debug!(mount = %mount, code, "ls returned");
            let status = match code {
                0 | 2 => CheckStatus::Ok,
                _ => CheckStatus::Error,
            };
            let mut result = CheckResult::new("nfs", mount, status)
                .with_details(json!({ "exit_code": code, "is_stale": false }));
            if status == CheckStatus::Error {
                result = result.with_message(format!("ls exited with code {code}"));
            }
            result
        }
        Err(err) => CheckResult::new("nfs", mount, CheckStatus::Error)
            .with_message(format!("failed to run ls: {err}")),
    }
}

/// NFS mount points from mtab text: fs type starts with `nfs`, `nfsd` is
/// the server-side pseudo filesystem and is excluded.
pub fn parse_nfs_mounts(mtab: &str) -> Vec<String> {
    let mut mounts = Vec::new();
    for line in mtab.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_dev), Some(mount_point), Some(fs_type)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if fs_type.starts_with("nfs") && fs_type != "nfsd" {
            mounts.push(mount_point.to_string());
        }
    }
    mounts
}
