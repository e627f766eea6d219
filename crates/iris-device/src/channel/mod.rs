//! Channels: the uniform interface every addressable device resource
//! implements, plus the registry that maps 8-bit ids to live channels.
//!
//! A channel is polymorphic over a flat operation set; anything a concrete
//! channel does not support falls through to a default returning INVALID.

pub mod registry;
pub mod stream;

pub use registry::Registry;
pub use stream::StreamChannel;

use iris_core::Status;

use crate::event::EventSender;

/// Channel names occupy 14 NUL-terminated bytes in the 16-byte list record.
pub const CHANNEL_NAME_SIZE: usize = 14;
/// Size of one CHANNEL_LIST record.
pub const CHANNEL_RECORD_SIZE: usize = 16;

const FLAG_READ: u8 = 1 << 0;
const FLAG_WRITE: u8 = 1 << 1;
const FLAG_LOCK: u8 = 1 << 2;
const FLAG_DYNAMIC: u8 = 1 << 3;
const FLAG_PHYSICAL: u8 = 1 << 4;

/// Channel capability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFlags {
    pub read: bool,
    pub write: bool,
    pub lock: bool,
    pub dynamic: bool,
    pub physical: bool,
}

impl ChannelFlags {
    pub fn from_byte(byte: u8) -> Self {
        ChannelFlags {
            read: byte & FLAG_READ != 0,
            write: byte & FLAG_WRITE != 0,
            lock: byte & FLAG_LOCK != 0,
            dynamic: byte & FLAG_DYNAMIC != 0,
            physical: byte & FLAG_PHYSICAL != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.read as u8)
            | (self.write as u8) << 1
            | (self.lock as u8) << 2
            | (self.dynamic as u8) << 3
            | (self.physical as u8) << 4
    }

    pub fn rw() -> Self {
        ChannelFlags {
            read: true,
            write: true,
            ..Default::default()
        }
    }
}

/// Channel identity as reported by CHANNEL_LIST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: u8,
    pub flags: ChannelFlags,
    name: [u8; CHANNEL_NAME_SIZE],
}

impl ChannelInfo {
    /// Build an info record; the name is truncated to fit and NUL-padded.
    pub fn new(id: u8, flags: ChannelFlags, name: &str) -> Self {
        let mut bytes = [0u8; CHANNEL_NAME_SIZE];
        let take = name.len().min(CHANNEL_NAME_SIZE - 1);
        bytes[..take].copy_from_slice(&name.as_bytes()[..take]);
        Self {
            id,
            flags,
            name: bytes,
        }
    }

    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(CHANNEL_NAME_SIZE);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// Encode the 16-byte list record: id(1) + flags(1) + name(14).
    pub fn encode(&self) -> [u8; CHANNEL_RECORD_SIZE] {
        let mut bytes = [0u8; CHANNEL_RECORD_SIZE];
        bytes[0] = self.id;
        bytes[1] = self.flags.to_byte();
        bytes[2..].copy_from_slice(&self.name);
        bytes
    }
}

/// Channel dimensions, reported by CHANNEL_SHAPE as four `u32` values with
/// unused trailing dims zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    dims: [u32; 4],
    ndim: usize,
}

impl Shape {
    pub fn new(dims: &[u32]) -> Self {
        assert!((1..=4).contains(&dims.len()), "shape has 1 to 4 dims");
        let mut all = [0u32; 4];
        all[..dims.len()].copy_from_slice(dims);
        Self {
            dims: all,
            ndim: dims.len(),
        }
    }

    pub fn dims(&self) -> &[u32] {
        &self.dims[..self.ndim]
    }

    pub fn encode(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        for (i, dim) in self.dims.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&dim.to_le_bytes());
        }
        bytes
    }
}

/// The uniform channel operation set.
///
/// Default implementations return [`Status::Invalid`], so a channel only
/// implements what it supports. Handlers run inside a single command
/// dispatch and must not block; a channel that cannot make progress
/// returns [`Status::Busy`] for the host to retry.
pub trait Channel: Send {
    /// Called once at registration, after [`Channel::on_register`].
    fn init(&mut self) -> Status {
        Status::Success
    }

    /// Receive the assigned id and an emitter handle for channel events.
    fn on_register(&mut self, id: u8, events: EventSender) {
        let _ = (id, events);
    }

    /// Copy up to `out.len()` bytes starting at `offset` into `out`.
    fn read(&mut self, offset: u32, out: &mut [u8]) -> Result<usize, Status> {
        let _ = (offset, out);
        Err(Status::Invalid)
    }

    /// Borrow up to `len` bytes starting at `offset` without copying.
    ///
    /// The returned slice is valid until the next `&mut self` call on this
    /// channel; the engine transmits it before dispatch returns.
    fn readp(&mut self, offset: u32, len: usize) -> Result<&[u8], Status> {
        let _ = (offset, len);
        Err(Status::Invalid)
    }

    /// Whether [`Channel::readp`] is implemented; the dispatcher prefers it.
    fn supports_readp(&self) -> bool {
        false
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Status> {
        let _ = (offset, data);
        Err(Status::Invalid)
    }

    fn flush(&mut self) -> Result<(), Status> {
        Err(Status::Invalid)
    }

    /// Bytes currently readable (or acceptable, for write-only channels).
    fn available(&self) -> u32 {
        0
    }

    fn shape(&self) -> Result<Shape, Status> {
        Err(Status::Invalid)
    }

    fn ioctl(&mut self, request: u32, data: &[u8]) -> Result<Vec<u8>, Status> {
        let _ = (request, data);
        Err(Status::Invalid)
    }
}
