//! disk-usage: space used on a filesystem

use deskcheck_tools::{ResultMap, StrategyError};
use serde::Serialize;
use std::io::ErrorKind;
use std::process::Command;

#[derive(Debug, Serialize)]
struct Output {
    path: String,
    total_gb: f64,
    used_gb: f64,
    available_gb: f64,
    percent: f64,
}

pub fn execute(path: &str) -> Result<ResultMap, StrategyError> {
    let path = if path.is_empty() { "/" } else { path };

    // -k: 1K blocks for consistent parsing
    let output = Command::new("df")
        .args(["-k", path])
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => StrategyError::NotSupported,
            ErrorKind::PermissionDenied => StrategyError::PermissionDenied,
            _ => StrategyError::Unknown(format!("failed to run df: {e}")),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StrategyError::Unknown(format!(
            "df failed for path {path}: {}",
            stderr.trim()
        )));
    }

    parse_df(path, &String::from_utf8_lossy(&output.stdout))
}

/// Parse the first data line of `df -k`.
///
/// Linux and macOS agree on the first five columns:
/// Filesystem  1K-blocks  Used  Available  Use%/Capacity  ...
fn parse_df(path: &str, stdout: &str) -> Result<ResultMap, StrategyError> {
    let data_line = stdout
        .lines()
        .nth(1)
        .ok_or_else(|| StrategyError::Unknown("unexpected df output format".into()))?;

    let parts: Vec<&str> = data_line.split_whitespace().collect();
    if parts.len() < 6 {
        return Err(StrategyError::Unknown(
            "unexpected df output format: insufficient columns".into(),
        ));
    }

    let total_kb = parts[1].parse::<u64>().unwrap_or(0);
    let used_kb = parts[2].parse::<u64>().unwrap_or(0);
    let available_kb = parts[3].parse::<u64>().unwrap_or(0);
    let percent = parts[4].trim_end_matches('%').parse::<f64>().unwrap_or(0.0);

    let result = Output {
        path: path.to_string(),
        total_gb: kb_to_gb(total_kb),
        used_gb: kb_to_gb(used_kb),
        available_gb: kb_to_gb(available_kb),
        percent,
    };

    match serde_json::to_value(result) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(StrategyError::Unknown("disk usage is not an object".into())),
        Err(e) => Err(StrategyError::Unknown(e.to_string())),
    }
}

fn kb_to_gb(kb: u64) -> f64 {
    let gb = kb as f64 / (1024.0 * 1024.0);
    (gb * 100.0).round() / 100.0
}
