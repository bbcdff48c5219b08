//! Politeness gate: the precondition check consulted before every unit
//! of work.
//!
//! Evaluated in order:
//! 1. exclusive-session lock file; if present, the whole pipeline yields;
//! 2. system load average against `gate.max_load`;
//! 3. accelerator memory pressure against `gate.accel_threshold`.
//!
//! None of these are errors: a busy gate is a scheduling signal. Waiting
//! is a fixed-interval bounded poll; after `max_wait_secs` the run ends
//! and queued items stay queued for the next pass.

use std::process::Command;
use std::time::Duration;

use crate::config::GateConfig;

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Clear,
    Busy(String),
}

impl GateDecision {
    pub fn is_clear(&self) -> bool {
        matches!(self, GateDecision::Clear)
    }
}

/// Instantaneous resource readings fed into [`evaluate`]. Gathered by
/// [`read_signals`] in production and constructed directly in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateSignals {
    pub lock_present: bool,
    pub load_average: f64,
    /// Accelerator memory pressure as a fraction of total, 0.0..=1.0.
    pub accel_pressure: f64,
}

/// Pure gate decision over a set of signals, in priority order.
pub fn evaluate(config: &GateConfig, signals: GateSignals) -> GateDecision {
    if signals.lock_present {
        return GateDecision::Busy("exclusive session lock held".to_string());
    }
    if signals.load_average > config.max_load {
        return GateDecision::Busy(format!(
            "system load high ({:.2} > {:.2})",
            signals.load_average, config.max_load
        ));
    }
    if config.check_accel && signals.accel_pressure > config.accel_threshold {
        return GateDecision::Busy(format!(
            "accelerator memory high ({:.0}%)",
            signals.accel_pressure * 100.0
        ));
    }
    GateDecision::Clear
}

/// Gather live signals from the host.
pub async fn read_signals(config: &GateConfig) -> GateSignals {
    let lock_present = config
        .lock_file
        .as_ref()
        .map(|p| p.exists())
        .unwrap_or(false);

    GateSignals {
        lock_present,
        load_average: load_average(config).await,
        accel_pressure: accel_pressure(),
    }
}

/// Evaluate the gate once against live signals.
pub async fn check(config: &GateConfig) -> GateDecision {
    evaluate(config, read_signals(config).await)
}

/// Block until the gate is clear, polling at `poll_secs` intervals.
/// Returns `false` when `max_wait_secs` elapses first.
pub async fn wait_until_clear(config: &GateConfig) -> bool {
    let mut waited = 0u64;
    loop {
        match check(config).await {
            GateDecision::Clear => return true,
            GateDecision::Busy(reason) => {
                if waited >= config.max_wait_secs {
                    tracing::warn!("gate still busy after {}s ({}); yielding", waited, reason);
                    return false;
                }
                tracing::info!("gate busy ({}); re-checking in {}s", reason, config.poll_secs);
                tokio::time::sleep(Duration::from_secs(config.poll_secs)).await;
                waited += config.poll_secs;
            }
        }
    }
}

/// 1-minute load average: metrics endpoint when configured, OS fallback
/// otherwise. An unreadable signal reads as 0.0 (assume safe) so a dead
/// metrics stack never wedges the pipeline.
async fn load_average(config: &GateConfig) -> f64 {
    if let Some(url) = &config.metrics_url {
        if let Some(load) = query_metrics_load(url).await {
            return load;
        }
    }
    os_load_average().unwrap_or(0.0)
}

/// Prometheus-style instant query for `node_load1`.
async fn query_metrics_load(url: &str) -> Option<f64> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .ok()?;
    let json: serde_json::Value = client
        .get(url)
        .query(&[("query", "node_load1")])
        .send()
        .await
        .ok()?
        .json()
        .await
        .ok()?;

    if json.get("status")?.as_str()? != "success" {
        return None;
    }
    json.get("data")?
        .get("result")?
        .get(0)?
        .get("value")?
        .get(1)?
        .as_str()?
        .parse()
        .ok()
}

#[cfg(target_os = "linux")]
fn os_load_average() -> Option<f64> {
    let content = std::fs::read_to_string("/proc/loadavg").ok()?;
    content.split_whitespace().next()?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn os_load_average() -> Option<f64> {
    None
}

/// Accelerator memory pressure via `nvidia-smi`. Hosts without an
/// accelerator (or the tool) read as 0.0.
fn accel_pressure() -> f64 {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=memory.used,memory.total",
            "--format=csv,nounits,noheader",
        ])
        .output();

    let Ok(output) = output else {
        return 0.0;
    };
    if !output.status.success() {
        return 0.0;
    }
    parse_accel_output(&String::from_utf8_lossy(&output.stdout)).unwrap_or(0.0)
}

fn parse_accel_output(stdout: &str) -> Option<f64> {
    let line = stdout.lines().next()?;
    let mut parts = line.split(',');
    let used: f64 = parts.next()?.trim().parse().ok()?;
    let total: f64 = parts.next()?.trim().parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some(used / total)
}
