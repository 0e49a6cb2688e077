use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
    Timeout,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Timeout => "timeout",
            CheckStatus::Error => "error",
        }
    }
}

/// Outcome of probing a single target (mount point, disk, array) of a check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: String,
    pub target: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub checked_at_unix: i64,
}

impl CheckResult {
    pub fn new(check: &str, target: impl Into<String>, status: CheckStatus) -> Self {
        Self {
            check: check.to_string(),
            target: target.into(),
            status,
            message: None,
            details: None,
            checked_at_unix: now_unix(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub hostname: String,
    pub generated_at_unix: i64,
    pub results: Vec<CheckResult>,
}

impl Report {
    pub fn new(hostname: String, results: Vec<CheckResult>) -> Self {
        Self {
            hostname,
            generated_at_unix: now_unix(),
            results,
        }
    }

    /// Aligned-column plain text rendering for --offline / --print-reports.
    pub fn render_text(&self) -> String {
        let mut rows: Vec<[String; 4]> = vec![[
            "check".to_string(),
            "target".to_string(),
            "status".to_string(),
            "message".to_string(),
        ]];
        for r in &self.results {
            rows.push([
                r.check.clone(),
                r.target.clone(),
                r.status.as_str().to_string(),
                r.message.clone().unwrap_or_default(),
            ]);
        }

        let mut widths = [0_usize; 4];
        for row in &rows {
            for (w, cell) in widths.iter_mut().zip(row.iter()) {
                *w = (*w).max(cell.len());
            }
        }

        let mut out = String::new();
        for row in &rows {
            let line: Vec<String> = widths
                .iter()
                .zip(row.iter())
                .map(|(&w, cell)| format!("{cell:<w$}"))
                .collect();
            out.push_str(line.join(" | ").trim_end());
            out.push('\n');
        }
        out
    }
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
