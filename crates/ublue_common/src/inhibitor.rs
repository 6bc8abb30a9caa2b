//! Hardware inhibitors - conditions under which automatic updates must wait
//!
//! Each check is independent; the gate runs all of them in order and keeps
//! every failure reason so the report shows the full picture.

use crate::command::{CommandRunner, CommandSpec};
use crate::config::{CheckSettings, UpdateConfig};
use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::{debug, warn};

const SYS_CLASS_NET: &str = "/sys/class/net";
const SYS_CLASS_POWER_SUPPLY: &str = "/sys/class/power_supply";

/// Result of a single inhibitor check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Fail(String),
}

/// A precondition for automatic updates
pub trait InhibitorCheck {
    fn name(&self) -> &str;
    fn check(&self) -> CheckOutcome;
}

/// Aggregated gate result
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InhibitorResult {
    pub passed: bool,
    /// Failure reasons in check order
    pub failure_reasons: Vec<String>,
}

/// Runs an ordered set of inhibitor checks
pub struct InhibitorGate<'a> {
    checks: Vec<Box<dyn InhibitorCheck + 'a>>,
}

impl<'a> InhibitorGate<'a> {
    pub fn new(checks: Vec<Box<dyn InhibitorCheck + 'a>>) -> Self {
        Self { checks }
    }

    /// Network, metered network, battery, CPU load and memory, in that order
    pub fn standard<R: CommandRunner + 'a>(runner: R, config: &UpdateConfig) -> Self {
        let CheckSettings {
            min_battery_percent,
            max_cpu_load_percent,
            max_mem_percent,
        } = config.checks;

        Self::new(vec![
            Box::new(NetworkUpCheck::new(SYS_CLASS_NET)),
            Box::new(MeteredNetworkCheck::new(runner, config.tools.busctl.clone())),
            Box::new(BatteryCheck::new(SYS_CLASS_POWER_SUPPLY, min_battery_percent)),
            Box::new(CpuLoadCheck::new(max_cpu_load_percent)),
            Box::new(MemoryCheck::new(max_mem_percent)),
        ])
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn check(&self) -> InhibitorResult {
        let mut failure_reasons = Vec::new();
        for check in &self.checks {
            match check.check() {
                CheckOutcome::Pass => debug!(check = check.name(), "inhibitor passed"),
                CheckOutcome::Fail(reason) => {
                    warn!(check = check.name(), "inhibitor failed: {}", reason);
                    failure_reasons.push(reason);
                }
            }
        }
        InhibitorResult {
            passed: failure_reasons.is_empty(),
            failure_reasons,
        }
    }
}

// ============================================================================
// Network
// ============================================================================

/// Some non-loopback interface must be up
pub struct NetworkUpCheck {
    net_dir: PathBuf,
}

impl NetworkUpCheck {
    pub fn new(net_dir: impl Into<PathBuf>) -> Self {
        Self {
            net_dir: net_dir.into(),
        }
    }
}

impl InhibitorCheck for NetworkUpCheck {
    fn name(&self) -> &str {
        "network"
    }

    fn check(&self) -> CheckOutcome {
        let any_up = fs::read_dir(&self.net_dir)
            .map(|entries| {
                entries.flatten().any(|entry| {
                    entry.file_name().to_str() != Some("lo")
                        && read_trimmed(&entry.path().join("operstate")).as_deref() == Some("up")
                })
            })
            .unwrap_or(false);

        if any_up {
            CheckOutcome::Pass
        } else {
            CheckOutcome::Fail("Network not enabled".to_string())
        }
    }
}

/// NetworkManager must not report the connection as metered
pub struct MeteredNetworkCheck<R> {
    runner: R,
    busctl: PathBuf,
}

impl<R: CommandRunner> MeteredNetworkCheck<R> {
    pub fn new(runner: R, busctl: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            busctl: busctl.into(),
        }
    }
}

/// NMMetered values 1 (yes) and 3 (guess-yes) count as metered
fn is_metered(property: &str) -> bool {
    // busctl prints "u <value>"
    matches!(property.split_whitespace().last(), Some("1") | Some("3"))
}

impl<R: CommandRunner> InhibitorCheck for MeteredNetworkCheck<R> {
    fn name(&self) -> &str {
        "metered"
    }

    fn check(&self) -> CheckOutcome {
        let spec = CommandSpec::new(&self.busctl).args([
            "get-property",
            "org.freedesktop.NetworkManager",
            "/org/freedesktop/NetworkManager",
            "org.freedesktop.NetworkManager",
            "Metered",
        ]);
        match self.runner.run(&spec) {
            Ok(out) if out.success() && is_metered(&out.stdout) => {
                CheckOutcome::Fail("Network is metered".to_string())
            }
            Ok(out) if !out.success() => {
                debug!("metered state unavailable: {}", out.stderr.trim());
                CheckOutcome::Pass
            }
            Ok(_) => CheckOutcome::Pass,
            Err(e) => {
                debug!("metered state unavailable: {}", e);
                CheckOutcome::Pass
            }
        }
    }
}

// ============================================================================
// Battery
// ============================================================================

/// Battery must be charged enough, unless on mains power
pub struct BatteryCheck {
    supply_dir: PathBuf,
    min_percent: f64,
}

impl BatteryCheck {
    pub fn new(supply_dir: impl Into<PathBuf>, min_percent: f64) -> Self {
        Self {
            supply_dir: supply_dir.into(),
            min_percent,
        }
    }
}

impl InhibitorCheck for BatteryCheck {
    fn name(&self) -> &str {
        "battery"
    }

    fn check(&self) -> CheckOutcome {
        let Ok(entries) = fs::read_dir(&self.supply_dir) else {
            return CheckOutcome::Pass;
        };

        let mut on_mains = false;
        let mut lowest: Option<f64> = None;

        for entry in entries.flatten() {
            let path = entry.path();
            match read_trimmed(&path.join("type")).as_deref() {
                Some("Mains") => {
                    if read_trimmed(&path.join("online")).as_deref() == Some("1") {
                        on_mains = true;
                    }
                }
                Some("Battery") => {
                    if matches!(
                        read_trimmed(&path.join("status")).as_deref(),
                        Some("Charging") | Some("Full")
                    ) {
                        on_mains = true;
                    }
                    if let Some(capacity) =
                        read_trimmed(&path.join("capacity")).and_then(|c| c.parse::<f64>().ok())
                    {
                        lowest = Some(lowest.map_or(capacity, |l: f64| l.min(capacity)));
                    }
                }
                _ => {}
            }
        }

        match lowest {
            Some(capacity) if !on_mains && capacity < self.min_percent => {
                CheckOutcome::Fail(format!("Battery is below {}%", self.min_percent))
            }
            _ => CheckOutcome::Pass,
        }
    }
}

// ============================================================================
// CPU and memory
// ============================================================================

/// 5-minute load average, normalised to all CPUs, must stay under the limit
pub struct CpuLoadCheck {
    max_percent: f64,
}

impl CpuLoadCheck {
    pub fn new(max_percent: f64) -> Self {
        Self { max_percent }
    }

    pub fn evaluate(&self, load_five: f64, cpus: usize) -> CheckOutcome {
        let load_percent = load_five / cpus.max(1) as f64 * 100.0;
        if load_percent < self.max_percent {
            CheckOutcome::Pass
        } else {
            CheckOutcome::Fail(format!("CPU load is above {}%", self.max_percent))
        }
    }
}

impl InhibitorCheck for CpuLoadCheck {
    fn name(&self) -> &str {
        "cpu_load"
    }

    fn check(&self) -> CheckOutcome {
        self.evaluate(System::load_average().five, num_cpus::get())
    }
}

/// Memory usage must stay under the limit
pub struct MemoryCheck {
    max_percent: f64,
}

impl MemoryCheck {
    pub fn new(max_percent: f64) -> Self {
        Self { max_percent }
    }

    pub fn evaluate(&self, used: u64, total: u64) -> CheckOutcome {
        if total == 0 {
            return CheckOutcome::Pass;
        }
        let used_percent = used as f64 / total as f64 * 100.0;
        if used_percent < self.max_percent {
            CheckOutcome::Pass
        } else {
            CheckOutcome::Fail(format!("Memory usage is above {}%", self.max_percent))
        }
    }
}

impl InhibitorCheck for MemoryCheck {
    fn name(&self) -> &str {
        "memory"
    }

    fn check(&self) -> CheckOutcome {
        let mut sys = System::new();
        sys.refresh_memory();
        self.evaluate(sys.used_memory(), sys.total_memory())
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
