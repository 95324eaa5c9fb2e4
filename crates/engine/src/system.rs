//! Master kill switch for the scheduler and tracker, persisted as `ON`/`OFF`

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

pub const DEFAULT_STATE_FILE: &str = "system_state.txt";

#[derive(Debug, Clone, Serialize)]
pub struct SwitchStatus {
    pub enabled: bool,
    pub status: &'static str,
    pub message: &'static str,
}

pub struct SystemSwitch {
    path: PathBuf,
    enabled: AtomicBool,
}

impl SystemSwitch {
    /// Read the state file; a missing or unreadable file means ON and is
    /// written back on first load
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let enabled = match std::fs::read_to_string(&path) {
            Ok(state) => state.trim() == "ON",
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No system state file, defaulting to ON");
                true
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read system state");
                true
            }
        };

        let switch = Self {
            path,
            enabled: AtomicBool::new(enabled),
        };
        if !switch.path.exists() {
            switch.persist();
        }
        info!(enabled, "System switch loaded");
        switch
    }

    fn persist(&self) {
        let state = if self.is_enabled() { "ON" } else { "OFF" };
        if let Err(e) = std::fs::write(&self.path, state) {
            error!(path = %self.path.display(), error = %e, "Failed to save system state");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable(&self) -> bool {
        if !self.enabled.swap(true, Ordering::Relaxed) {
            self.persist();
            warn!("System enabled: scheduled scans and tracker will run");
        }
        true
    }

    pub fn disable(&self) -> bool {
        if self.enabled.swap(false, Ordering::Relaxed) {
            self.persist();
            warn!("System disabled: scheduled scans and tracker are paused");
        }
        false
    }

    /// Returns the new state
    pub fn toggle(&self) -> bool {
        if self.is_enabled() {
            self.disable()
        } else {
            self.enable()
        }
    }

    pub fn status(&self) -> SwitchStatus {
        if self.is_enabled() {
            SwitchStatus {
                enabled: true,
                status: "online",
                message: "System is running normally",
            }
        } else {
            SwitchStatus {
                enabled: false,
                status: "offline",
                message: "System is disabled, no automatic scans running",
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_state(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "trade-scout-{}-{}.txt",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_defaults_on_and_creates_file() {
        let path = temp_state("default");
        let switch = SystemSwitch::load(&path);
        assert!(switch.is_enabled());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ON");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_toggle_persists_across_loads() {
        let path = temp_state("toggle");
        let switch = SystemSwitch::load(&path);
        assert!(!switch.toggle());
        assert_eq!(switch.status().status, "offline");

        let reloaded = SystemSwitch::load(&path);
        assert!(!reloaded.is_enabled());
        assert!(reloaded.enable());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ON");
        std::fs::remove_file(&path).ok();
    }
}
