//! The SYS_INFO identification record.
//!
//! 80 bytes describing the device: ids, hardware capability bits, memory
//! sizes, and version triples. The protocol version is fixed at compile
//! time; everything else comes from the device configuration.

use iris_core::constants::PROTOCOL_VERSION;

/// Size of the SYS_INFO record on the wire.
pub const SYS_INFO_SIZE: usize = 80;

/// Hardware capability bits packed into a 64-bit word.
///
/// Bits 0-7 are feature flags, bits 8-15 carry the PMU event counter count,
/// bits 16-21 are connectivity flags. The rest is reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareCaps {
    pub gpu: bool,
    pub npu: bool,
    pub isp: bool,
    pub video_encoder: bool,
    pub jpeg: bool,
    pub dram: bool,
    pub hw_crc: bool,
    pub pmu: bool,
    pub pmu_event_count: u8,
    pub wifi: bool,
    pub bluetooth: bool,
    pub sdcard: bool,
    pub ethernet: bool,
    pub usb_hs: bool,
    pub multicore: bool,
}

impl HardwareCaps {
    pub fn to_bits(&self) -> u64 {
        (self.gpu as u64)
            | (self.npu as u64) << 1
            | (self.isp as u64) << 2
            | (self.video_encoder as u64) << 3
            | (self.jpeg as u64) << 4
            | (self.dram as u64) << 5
            | (self.hw_crc as u64) << 6
            | (self.pmu as u64) << 7
            | (self.pmu_event_count as u64) << 8
            | (self.wifi as u64) << 16
            | (self.bluetooth as u64) << 17
            | (self.sdcard as u64) << 18
            | (self.ethernet as u64) << 19
            | (self.usb_hs as u64) << 20
            | (self.multicore as u64) << 21
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            gpu: bits & 1 != 0,
            npu: bits >> 1 & 1 != 0,
            isp: bits >> 2 & 1 != 0,
            video_encoder: bits >> 3 & 1 != 0,
            jpeg: bits >> 4 & 1 != 0,
            dram: bits >> 5 & 1 != 0,
            hw_crc: bits >> 6 & 1 != 0,
            pmu: bits >> 7 & 1 != 0,
            pmu_event_count: (bits >> 8 & 0xFF) as u8,
            wifi: bits >> 16 & 1 != 0,
            bluetooth: bits >> 17 & 1 != 0,
            sdcard: bits >> 18 & 1 != 0,
            ethernet: bits >> 19 & 1 != 0,
            usb_hs: bits >> 20 & 1 != 0,
            multicore: bits >> 21 & 1 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub cpu_id: u32,
    pub dev_id: [u8; 12],
    pub chip_id: [u8; 12],
    pub hardware: HardwareCaps,
    pub flash_size_kb: u32,
    pub ram_size_kb: u32,
    pub framebuffer_size_kb: u32,
    pub stream_buffer_size_kb: u32,
    pub firmware_version: [u8; 3],
    pub bootloader_version: [u8; 3],
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            cpu_id: 0,
            dev_id: [0; 12],
            chip_id: [0; 12],
            hardware: HardwareCaps::default(),
            flash_size_kb: 0,
            ram_size_kb: 0,
            framebuffer_size_kb: 0,
            stream_buffer_size_kb: 0,
            firmware_version: [0; 3],
            bootloader_version: [0; 3],
        }
    }
}

impl DeviceInfo {
    /// Encode the 80-byte SYS_INFO payload.
    pub fn encode(&self) -> [u8; SYS_INFO_SIZE] {
        let mut bytes = [0u8; SYS_INFO_SIZE];
        bytes[0..4].copy_from_slice(&self.cpu_id.to_le_bytes());
        bytes[4..16].copy_from_slice(&self.dev_id);
        bytes[16..28].copy_from_slice(&self.chip_id);
        // [28..36] id_reserved
        bytes[36..44].copy_from_slice(&self.hardware.to_bits().to_le_bytes());
        bytes[44..48].copy_from_slice(&self.flash_size_kb.to_le_bytes());
        bytes[48..52].copy_from_slice(&self.ram_size_kb.to_le_bytes());
        bytes[52..56].copy_from_slice(&self.framebuffer_size_kb.to_le_bytes());
        bytes[56..60].copy_from_slice(&self.stream_buffer_size_kb.to_le_bytes());
        // [60..68] memory_reserved
        bytes[68..71].copy_from_slice(&self.firmware_version);
        bytes[71..74].copy_from_slice(&PROTOCOL_VERSION);
        bytes[74..77].copy_from_slice(&self.bootloader_version);
        // [77..80] pad
        bytes
    }
}
