use ini::Ini;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Check names that `enabled_checks` may reference.
pub const KNOWN_CHECKS: &[&str] = &["nfs", "disk_usage", "raid", "smart", "hdsentinel"];

#[derive(Debug, Clone)]
pub struct Config {
    pub enabled_checks: Vec<String>,
    pub hostname: String,
    /// POST target with `%(hostname)s` already interpolated. None disables delivery.
    pub post_url: Option<String>,
    pub nfs: NfsConfig,
    pub raid: RaidConfig,
    pub raid_md: PoolConfig,
    pub smart: SmartConfig,
    pub hdsentinel: HdSentinelConfig,
}

#[derive(Debug, Clone)]
pub struct NfsConfig {
    pub stale_timeout_secs: u64,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaidType {
    MegaCli,
    Omreport,
    Md,
}

impl RaidType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "megacli" => Some(RaidType::MegaCli),
            "omreport" => Some(RaidType::Omreport),
            "md" => Some(RaidType::Md),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RaidConfig {
    /// Explicit sub-driver selection; None means auto-detect on PATH.
    pub raid_type: Option<RaidType>,
    pub timeout_secs: u64,
    pub concurrency: usize,
}

/// Pool settings for the md sub-driver; absent keys fall back to `[raid]`.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub timeout_secs: u64,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct SmartConfig {
    pub exec: Option<String>,
    pub timeout_secs: u64,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct HdSentinelConfig {
    pub exec: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse INI in {path}: {source}")]
    Parse {
        path: String,
        source: ini::ParseError,
    },
    #[error("config validation error: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;
        Self::from_ini_str(&text, &path_display)
    }

    pub fn from_ini_str(text: &str, path: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;

        let enabled_checks = parse_enabled_checks(get(&ini, "DEFAULT", "enabled_checks"))?;

        let hostname = match get(&ini, "DEFAULT", "hostname") {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => default_hostname(),
        };

        let post_url = get(&ini, "DEFAULT", "post_url")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|template| interpolate_hostname(template, &hostname));

        let raid_timeout = positive(&ini, "raid", "timeout", 10)?;
        let raid_concurrency = positive(&ini, "raid", "concurrency", 4)? as usize;

        let raid_type = match get(&ini, "raid", "type")
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            Some(raw) => Some(RaidType::parse(raw).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "raid.type '{raw}' is not one of megacli, omreport, md"
                ))
            })?),
            None => None,
        };

        Ok(Config {
            enabled_checks,
            hostname,
            post_url,
            nfs: NfsConfig {
                stale_timeout_secs: positive(&ini, "nfs", "stale_timeout", 2)?,
                concurrency: positive(&ini, "nfs", "concurrency", 4)? as usize,
            },
            raid: RaidConfig {
                raid_type,
                timeout_secs: raid_timeout,
                concurrency: raid_concurrency,
            },
            raid_md: PoolConfig {
                timeout_secs: positive(&ini, "raid_md", "timeout", raid_timeout)?,
                concurrency: positive(&ini, "raid_md", "concurrency", raid_concurrency as u64)?
                    as usize,
            },
            smart: SmartConfig {
                exec: exec_path(&ini, "smart"),
                timeout_secs: positive(&ini, "smart", "timeout", 30)?,
                concurrency: positive(&ini, "smart", "concurrency", 2)? as usize,
            },
            hdsentinel: HdSentinelConfig {
                exec: exec_path(&ini, "hdsentinel"),
                timeout_secs: positive(&ini, "hdsentinel", "timeout", 30)?,
            },
        })
    }

    /// CLI --checks override, validated against the same registry names.
    pub fn override_enabled_checks(&mut self, list: &str) -> Result<(), ConfigError> {
        self.enabled_checks = parse_enabled_checks(Some(list))?;
        Ok(())
    }

    pub fn example_ini() -> &'static str {
        include_str!("../servcheck.ini.example")
    }
}

fn get<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    ini.section(Some(section)).and_then(|props| props.get(key))
}

fn exec_path(ini: &Ini, section: &str) -> Option<String> {
    get(ini, section, "exec")
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn positive(ini: &Ini, section: &str, key: &str, default: u64) -> Result<u64, ConfigError> {
    match get(ini, section, key).map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(ConfigError::Validation(format!(
                "{section}.{key} must be a positive integer, got '{raw}'"
            ))),
        },
    }
}

fn parse_enabled_checks(raw: Option<&str>) -> Result<Vec<String>, ConfigError> {
    let raw = raw.unwrap_or_default();
    let mut checks = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !KNOWN_CHECKS.contains(&name) {
            return Err(ConfigError::Validation(format!(
                "enabled_checks contains unknown check '{name}', known checks: {}",
                KNOWN_CHECKS.join(", ")
            )));
        }
        if !checks.iter().any(|c| c == name) {
            checks.push(name.to_string());
        }
    }
    Ok(checks)
}

/// Python configparser style `%(hostname)s` substitution in the post URL.
fn interpolate_hostname(template: &str, hostname: &str) -> String {
    template.replace("%(hostname)s", hostname)
}

fn default_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| h.split('.').next().unwrap_or_default().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[DEFAULT]
enabled_checks = nfs,disk_usage,raid
hostname = node7
post_url = https://mon.example.org/report/%(hostname)s

[nfs]
stale_timeout = 3
concurrency = 8

[raid]
type = megacli
timeout = 15

[smart]
exec = /opt/smartmontools/sbin/smartctl
";

    #[test]
    fn parses_sections_and_interpolates_hostname() {
        let cfg = Config::from_ini_str(SAMPLE, "test.ini").unwrap();
        assert_eq!(cfg.enabled_checks, vec!["nfs", "disk_usage", "raid"]);
        assert_eq!(cfg.hostname, "node7");
        assert_eq!(
            cfg.post_url.as_deref(),
            Some("https://mon.example.org/report/node7")
        );
        assert_eq!(cfg.nfs.stale_timeout_secs, 3);
        assert_eq!(cfg.nfs.concurrency, 8);
        assert_eq!(cfg.raid.raid_type, Some(RaidType::MegaCli));
        assert_eq!(cfg.raid.timeout_secs, 15);
        assert_eq!(
            cfg.smart.exec.as_deref(),
            Some("/opt/smartmontools/sbin/smartctl")
        );
    }

    #[test]
    fn raid_md_falls_back_to_raid_settings() {
        let cfg = Config::from_ini_str(SAMPLE, "test.ini").unwrap();
        assert_eq!(cfg.raid_md.timeout_secs, 15);
        assert_eq!(cfg.raid_md.concurrency, 4);
    }

    #[test]
    fn unknown_check_is_rejected() {
        let text = "[DEFAULT]\nenabled_checks = nfs,bogus\n";
        let err = Config::from_ini_str(text, "test.ini").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn non_numeric_timeout_is_rejected() {
        let text = "[DEFAULT]\nenabled_checks = nfs\n[nfs]\nstale_timeout = soon\n";
        let err = Config::from_ini_str(text, "test.ini").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let text = "[DEFAULT]\nenabled_checks = smart\n[smart]\nconcurrency = 0\n";
        let err = Config::from_ini_str(text, "test.ini").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn unknown_raid_type_is_rejected() {
        let text = "[DEFAULT]\nenabled_checks = raid\n[raid]\ntype = areca\n";
        let err = Config::from_ini_str(text, "test.ini").unwrap_err();
        assert!(err.to_string().contains("areca"));
    }

    #[test]
    fn empty_post_url_disables_delivery() {
        let text = "[DEFAULT]\nenabled_checks = disk_usage\nhostname = x\npost_url =\n";
        let cfg = Config::from_ini_str(text, "test.ini").unwrap();
        assert!(cfg.post_url.is_none());
    }

    #[test]
    fn checks_override_validates_names() {
        let mut cfg = Config::from_ini_str(SAMPLE, "test.ini").unwrap();
        cfg.override_enabled_checks("smart , hdsentinel").unwrap();
        assert_eq!(cfg.enabled_checks, vec!["smart", "hdsentinel"]);
        assert!(cfg.override_enabled_checks("smart,unknown").is_err());
    }

    #[test]
    fn example_ini_loads() {
        Config::from_ini_str(Config::example_ini(), "servcheck.ini.example").unwrap();
    }
}
