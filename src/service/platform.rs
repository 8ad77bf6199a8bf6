//! Host platform detection.

use std::fmt;
use std::path::Path;

/// Operating system family, as far as service control cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Arch or Manjaro (systemd).
    ArchLinux,
    /// Any other Linux or Unix (SysV `service` wrapper).
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub fn detect() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if Path::new("/etc/arch-release").exists()
            || Path::new("/etc/manjaro-release").exists()
        {
            Platform::ArchLinux
        } else {
            Platform::Linux
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::ArchLinux => write!(f, "arch-linux"),
            Platform::Linux => write!(f, "linux"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Windows => write!(f, "windows"),
        }
    }
}
