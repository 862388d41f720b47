use std::path::{Path, PathBuf};

use aya::programs::XdpFlags;
use clap::ValueEnum;

use seg6_pot_common::{EGRESS_PROGRAM, INGRESS_PROGRAM, KEY_MAP_NAME};

/// Where the data plane's key map lives. Both planes must agree on this path.
pub const DEFAULT_KEY_MAP_PIN: &str = "/sys/fs/bpf/seg6_pot_keys";

/// tc filter handle and priority for the egress classifier.
pub const DEFAULT_TC_HANDLE: u32 = 1;
pub const DEFAULT_TC_PRIORITY: u16 = 1;

/// `Auto` passes no mode flag and lets the kernel prefer native XDP.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum XdpMode {
    #[default]
    Auto,
    Skb,
    Driver,
    Hw,
}

impl XdpMode {
    pub fn flags(self) -> XdpFlags {
        match self {
            Self::Auto => XdpFlags::default(),
            Self::Skb => XdpFlags::SKB_MODE,
            Self::Driver => XdpFlags::DRV_MODE,
            Self::Hw => XdpFlags::HW_MODE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

/// Settings every component receives explicitly; nothing reads globals.
#[derive(Clone, Debug)]
pub struct Seg6Config {
    pub key_map_pin: PathBuf,
    pub key_map_name: String,
    pub ingress_program: String,
    pub egress_program: String,
    pub tc_handle: u32,
    pub tc_priority: u16,
    pub xdp_mode: XdpMode,
}

impl Seg6Config {
    pub fn with_pin_path(path: impl Into<PathBuf>) -> Self {
        Self {
            key_map_pin: path.into(),
            ..Self::default()
        }
    }

    /// Directory the loader hands to aya for by-name map pinning.
    pub fn pin_dir(&self) -> &Path {
        self.key_map_pin
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("/sys/fs/bpf"))
    }
}

impl Default for Seg6Config {
    fn default() -> Self {
        Self {
            key_map_pin: PathBuf::from(DEFAULT_KEY_MAP_PIN),
            key_map_name: KEY_MAP_NAME.to_string(),
            ingress_program: INGRESS_PROGRAM.to_string(),
            egress_program: EGRESS_PROGRAM.to_string(),
            tc_handle: DEFAULT_TC_HANDLE,
            tc_priority: DEFAULT_TC_PRIORITY,
            xdp_mode: XdpMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pin_path_matches_map_name() {
        let cfg = Seg6Config::default();
        assert_eq!(cfg.pin_dir(), Path::new("/sys/fs/bpf"));
        assert_eq!(
            cfg.key_map_pin.file_name().and_then(|n| n.to_str()),
            Some(cfg.key_map_name.as_str())
        );
    }

    #[test]
    fn pin_dir_follows_custom_path() {
        let cfg = Seg6Config::with_pin_path("/run/seg6/keys");
        assert_eq!(cfg.pin_dir(), Path::new("/run/seg6"));
        assert_eq!(cfg.egress_program, EGRESS_PROGRAM);
    }

    #[test]
    fn bare_file_name_falls_back_to_bpffs_root() {
        let cfg = Seg6Config::with_pin_path("seg6_pot_keys");
        assert_eq!(cfg.pin_dir(), Path::new("/sys/fs/bpf"));
    }

    #[test]
    fn xdp_mode_flags() {
        assert_eq!(XdpMode::default(), XdpMode::Auto);
        assert_eq!(XdpMode::Auto.flags().bits(), 0);
        assert_eq!(XdpMode::Skb.flags().bits(), XdpFlags::SKB_MODE.bits());
        assert_eq!(XdpMode::Driver.flags().bits(), XdpFlags::DRV_MODE.bits());
        assert_eq!(XdpMode::Hw.flags().bits(), XdpFlags::HW_MODE.bits());
    }
}
