//! ublue-update configuration
//!
//! Configuration lives in /etc/ublue-update/ublue-update.toml, with the vendor
//! default in /usr/etc/ublue-update/ublue-update.toml. Every key is optional;
//! missing keys fall back to the defaults below.

use crate::error::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Config files searched when no explicit path is given, in priority order
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "/etc/ublue-update/ublue-update.toml",
    "/usr/etc/ublue-update/ublue-update.toml",
];

/// Hardware inhibitor thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSettings {
    /// Minimum battery charge when not on mains power
    #[serde(default = "default_min_battery_percent")]
    pub min_battery_percent: f64,

    /// Maximum 5-minute load average, as a percentage of all CPUs
    #[serde(default = "default_max_cpu_load_percent")]
    pub max_cpu_load_percent: f64,

    /// Maximum memory usage percentage
    #[serde(default = "default_max_mem_percent")]
    pub max_mem_percent: f64,
}

fn default_min_battery_percent() -> f64 {
    50.0
}

fn default_max_cpu_load_percent() -> f64 {
    50.0
}

fn default_max_mem_percent() -> f64 {
    90.0
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            min_battery_percent: default_min_battery_percent(),
            max_cpu_load_percent: default_max_cpu_load_percent(),
            max_mem_percent: default_max_mem_percent(),
        }
    }
}

/// Desktop notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    /// Send notifications over the session D-Bus
    #[serde(default = "default_dbus_notify")]
    pub dbus_notify: bool,
}

fn default_dbus_notify() -> bool {
    true
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            dbus_notify: default_dbus_notify(),
        }
    }
}

/// External programs invoked by the updater
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_topgrade")]
    pub topgrade: PathBuf,

    /// Topgrade profile for the system pass
    #[serde(default = "default_system_profile")]
    pub system_profile: PathBuf,

    /// Topgrade profile for per-user passes
    #[serde(default = "default_user_profile")]
    pub user_profile: PathBuf,

    #[serde(default = "default_rpm_ostree")]
    pub rpm_ostree: PathBuf,

    #[serde(default = "default_notify_send")]
    pub notify_send: PathBuf,

    #[serde(default = "default_sudo")]
    pub sudo: PathBuf,

    #[serde(default = "default_systemctl")]
    pub systemctl: PathBuf,

    #[serde(default = "default_loginctl")]
    pub loginctl: PathBuf,

    #[serde(default = "default_busctl")]
    pub busctl: PathBuf,
}

fn default_topgrade() -> PathBuf {
    PathBuf::from("/usr/bin/topgrade")
}

fn default_system_profile() -> PathBuf {
    PathBuf::from("/usr/share/ublue-update/topgrade-system.toml")
}

fn default_user_profile() -> PathBuf {
    PathBuf::from("/usr/share/ublue-update/topgrade-user.toml")
}

fn default_rpm_ostree() -> PathBuf {
    PathBuf::from("/usr/bin/rpm-ostree")
}

fn default_notify_send() -> PathBuf {
    PathBuf::from("/usr/bin/notify-send")
}

fn default_sudo() -> PathBuf {
    PathBuf::from("/usr/bin/sudo")
}

fn default_systemctl() -> PathBuf {
    PathBuf::from("/usr/bin/systemctl")
}

fn default_loginctl() -> PathBuf {
    PathBuf::from("/usr/bin/loginctl")
}

fn default_busctl() -> PathBuf {
    PathBuf::from("/usr/bin/busctl")
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            topgrade: default_topgrade(),
            system_profile: default_system_profile(),
            user_profile: default_user_profile(),
            rpm_ostree: default_rpm_ostree(),
            notify_send: default_notify_send(),
            sudo: default_sudo(),
            systemctl: default_systemctl(),
            loginctl: default_loginctl(),
            busctl: default_busctl(),
        }
    }
}

/// Single-instance lock locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// Lock used by root runs
    #[serde(default = "default_system_lock_path")]
    pub system_path: PathBuf,

    /// File name of the per-user lock inside the user's runtime directory
    #[serde(default = "default_lock_file_name")]
    pub file_name: String,
}

fn default_system_lock_path() -> PathBuf {
    PathBuf::from("/run/ublue-update.lock")
}

fn default_lock_file_name() -> String {
    "ublue-update.lock".to_string()
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            system_path: default_system_lock_path(),
            file_name: default_lock_file_name(),
        }
    }
}

/// rpm-ostree transaction polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    1
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl TransactionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Complete updater configuration, built once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default)]
    pub checks: CheckSettings,

    #[serde(default)]
    pub notify: NotifySettings,

    #[serde(default)]
    pub tools: ToolSettings,

    #[serde(default)]
    pub lock: LockSettings,

    #[serde(default)]
    pub transaction: TransactionSettings,
}

impl UpdateConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist and parse. Without one, the first existing
    /// file in [`CONFIG_SEARCH_PATHS`] is used, else the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        for candidate in CONFIG_SEARCH_PATHS {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::from_file(path);
            }
        }

        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Parse a specific config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            UpdateError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content)
            .map_err(|e| UpdateError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
