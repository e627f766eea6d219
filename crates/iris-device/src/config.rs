//! TOML-based device configuration.
//!
//! Identity, hardware capabilities, and protocol tunables for one device.
//! Everything has a default so an empty file (or no file) yields a working
//! configuration.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use iris_protocol::Capabilities;

use crate::error::ConfigError;
use crate::info::{DeviceInfo, HardwareCaps};

/// Top-level device configuration.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub hardware: HardwareSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    #[serde(default)]
    pub listen: ListenSection,
}

impl DeviceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Build the SYS_INFO record from this configuration.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            cpu_id: self.device.cpu_id,
            dev_id: fixed_bytes(&self.device.dev_id),
            chip_id: fixed_bytes(&self.device.chip_id),
            hardware: self.hardware.caps(),
            flash_size_kb: self.device.flash_kb,
            ram_size_kb: self.device.ram_kb,
            framebuffer_size_kb: self.device.framebuffer_kb,
            stream_buffer_size_kb: self.device.stream_buffer_kb,
            firmware_version: self.device.firmware_version,
            bootloader_version: self.device.bootloader_version,
        }
    }

    /// Build the initial link capabilities from this configuration.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            crc: self.protocol.crc,
            seq: self.protocol.seq,
            ack: self.protocol.ack,
            events: self.protocol.events,
            max_retries: self.protocol.max_retries,
            max_payload: self.protocol.max_payload,
            frame_timeout_ms: self.protocol.frame_timeout_ms,
            rtx_timeout_ms: self.protocol.rtx_timeout_ms,
        }
        .clamped()
    }
}

fn fixed_bytes<const N: usize>(s: &str) -> [u8; N] {
    let mut bytes = [0u8; N];
    let take = s.len().min(N);
    bytes[..take].copy_from_slice(&s.as_bytes()[..take]);
    bytes
}

/// The `[device]` section: identity and memory sizes.
#[derive(Debug, Deserialize)]
pub struct DeviceSection {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub cpu_id: u32,
    #[serde(default)]
    pub dev_id: String,
    #[serde(default)]
    pub chip_id: String,
    #[serde(default)]
    pub flash_kb: u32,
    #[serde(default)]
    pub ram_kb: u32,
    #[serde(default)]
    pub framebuffer_kb: u32,
    #[serde(default)]
    pub stream_buffer_kb: u32,
    #[serde(default)]
    pub firmware_version: [u8; 3],
    #[serde(default)]
    pub bootloader_version: [u8; 3],
}

fn default_name() -> String {
    "iris".into()
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            cpu_id: 0,
            dev_id: String::new(),
            chip_id: String::new(),
            flash_kb: 0,
            ram_kb: 0,
            framebuffer_kb: 0,
            stream_buffer_kb: 0,
            firmware_version: [0; 3],
            bootloader_version: [0; 3],
        }
    }
}

/// The `[hardware]` section: capability bits for SYS_INFO.
#[derive(Debug, Default, Deserialize)]
pub struct HardwareSection {
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub npu: bool,
    #[serde(default)]
    pub isp: bool,
    #[serde(default)]
    pub video_encoder: bool,
    #[serde(default)]
    pub jpeg: bool,
    #[serde(default)]
    pub dram: bool,
    #[serde(default)]
    pub hw_crc: bool,
    #[serde(default)]
    pub pmu: bool,
    #[serde(default)]
    pub pmu_event_count: u8,
    #[serde(default)]
    pub wifi: bool,
    #[serde(default)]
    pub bluetooth: bool,
    #[serde(default)]
    pub sdcard: bool,
    #[serde(default)]
    pub ethernet: bool,
    #[serde(default)]
    pub usb_hs: bool,
    #[serde(default)]
    pub multicore: bool,
}

impl HardwareSection {
    fn caps(&self) -> HardwareCaps {
        HardwareCaps {
            gpu: self.gpu,
            npu: self.npu,
            isp: self.isp,
            video_encoder: self.video_encoder,
            jpeg: self.jpeg,
            dram: self.dram,
            hw_crc: self.hw_crc,
            pmu: self.pmu,
            pmu_event_count: self.pmu_event_count,
            wifi: self.wifi,
            bluetooth: self.bluetooth,
            sdcard: self.sdcard,
            ethernet: self.ethernet,
            usb_hs: self.usb_hs,
            multicore: self.multicore,
        }
    }
}

/// The `[protocol]` section: initial link capabilities.
#[derive(Debug, Deserialize)]
pub struct ProtocolSection {
    #[serde(default = "default_true")]
    pub crc: bool,
    #[serde(default = "default_true")]
    pub seq: bool,
    #[serde(default = "default_true")]
    pub ack: bool,
    #[serde(default = "default_true")]
    pub events: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_max_payload")]
    pub max_payload: u16,
    #[serde(default = "default_timeout_ms")]
    pub frame_timeout_ms: u16,
    #[serde(default = "default_timeout_ms")]
    pub rtx_timeout_ms: u16,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u8 {
    3
}

fn default_max_payload() -> u16 {
    iris_core::constants::MAX_PAYLOAD as u16
}

fn default_timeout_ms() -> u16 {
    500
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            crc: true,
            seq: true,
            ack: true,
            events: true,
            max_retries: default_max_retries(),
            max_payload: default_max_payload(),
            frame_timeout_ms: default_timeout_ms(),
            rtx_timeout_ms: default_timeout_ms(),
        }
    }
}

/// The `[listen]` section.
#[derive(Debug, Deserialize)]
pub struct ListenSection {
    #[serde(default = "default_listen_addr")]
    pub addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3443))
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            addr: default_listen_addr(),
        }
    }
}
