//! The channel registry: a sparse id → channel table with lock ownership.
//!
//! Ids 1..31 are allocated to the caller-requested slot or the lowest free
//! one. Id 0 is the built-in control channel over which protocol and system
//! responses travel; it cannot be unregistered. All mutation happens in the
//! engine's core loop.

use iris_core::constants::MAX_CHANNELS;
use iris_core::Status;

use crate::channel::{Channel, ChannelFlags, ChannelInfo};
use crate::error::RegistryError;
use crate::event::EventSender;

/// A registered channel with its lock state.
pub struct Entry {
    pub info: ChannelInfo,
    pub channel: Box<dyn Channel>,
    lock_owner: Option<u32>,
}

/// Placeholder behind id 0; every operation falls through to INVALID.
struct ControlChannel;
impl Channel for ControlChannel {}

pub struct Registry {
    slots: [Option<Entry>; MAX_CHANNELS],
}

impl Registry {
    pub fn new() -> Self {
        let mut slots: [Option<Entry>; MAX_CHANNELS] = std::array::from_fn(|_| None);
        slots[0] = Some(Entry {
            info: ChannelInfo::new(
                0,
                ChannelFlags {
                    physical: true,
                    ..Default::default()
                },
                "control",
            ),
            channel: Box::new(ControlChannel),
            lock_owner: None,
        });
        Self { slots }
    }

    /// Number of registered channels, including the control channel.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pick_id(&self, requested: Option<u8>) -> Result<u8, RegistryError> {
        match requested {
            Some(0) => Err(RegistryError::Reserved(0)),
            Some(id) if id as usize >= MAX_CHANNELS => Err(RegistryError::OutOfRange(id)),
            Some(id) if self.slots[id as usize].is_some() => Err(RegistryError::IdInUse(id)),
            Some(id) => Ok(id),
            None => (1..MAX_CHANNELS as u8)
                .find(|&id| self.slots[id as usize].is_none())
                .ok_or(RegistryError::NoFreeSlot),
        }
    }

    /// Register a channel, attach its event emitter, and run its init hook.
    pub fn register(
        &mut self,
        requested: Option<u8>,
        flags: ChannelFlags,
        name: &str,
        mut channel: Box<dyn Channel>,
        events: EventSender,
    ) -> Result<u8, RegistryError> {
        let id = self.pick_id(requested)?;
        channel.on_register(id, events);
        let status = channel.init();
        if status != Status::Success {
            return Err(RegistryError::InitFailed { id, status });
        }
        let info = ChannelInfo::new(id, flags, name);
        self.slots[id as usize] = Some(Entry {
            info,
            channel,
            lock_owner: None,
        });
        tracing::info!(id, name, "registry: channel registered");
        Ok(id)
    }

    pub fn unregister(&mut self, id: u8) -> Result<ChannelInfo, RegistryError> {
        if id == 0 {
            return Err(RegistryError::Reserved(0));
        }
        if id as usize >= MAX_CHANNELS {
            return Err(RegistryError::OutOfRange(id));
        }
        let entry = self.slots[id as usize]
            .take()
            .ok_or(RegistryError::NotFound(id))?;
        tracing::info!(id, name = entry.info.name(), "registry: channel unregistered");
        Ok(entry.info)
    }

    pub fn get(&self, id: u8) -> Option<&Entry> {
        self.slots.get(id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: u8) -> Option<&mut Entry> {
        self.slots.get_mut(id as usize)?.as_mut()
    }

    /// Registered channels in id order.
    pub fn list(&self) -> impl Iterator<Item = &ChannelInfo> {
        self.entries().map(|e| &e.info)
    }

    /// Registered entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    // ------------------------------------------------------------------ //
    // Locking
    // ------------------------------------------------------------------ //

    /// Acquire the channel lock. Reentrant for the current owner.
    pub fn lock(&mut self, id: u8, owner: u32) -> Status {
        let Some(entry) = self.get_mut(id) else {
            return Status::Invalid;
        };
        if !entry.info.flags.lock {
            return Status::Invalid;
        }
        match entry.lock_owner {
            None => {
                entry.lock_owner = Some(owner);
                tracing::debug!(id, owner, "registry: channel locked");
                Status::Success
            }
            Some(current) if current == owner => Status::Success,
            Some(_) => Status::Busy,
        }
    }

    /// Release the channel lock; only the owner may unlock.
    pub fn unlock(&mut self, id: u8, owner: u32) -> Status {
        let Some(entry) = self.get_mut(id) else {
            return Status::Invalid;
        };
        if !entry.info.flags.lock {
            return Status::Invalid;
        }
        match entry.lock_owner {
            Some(current) if current == owner => {
                entry.lock_owner = None;
                tracing::debug!(id, owner, "registry: channel unlocked");
                Status::Success
            }
            _ => Status::Invalid,
        }
    }

    /// Whether `owner` is barred from stream operations on this channel.
    pub fn locked_by_other(&self, id: u8, owner: u32) -> bool {
        self.get(id)
            .and_then(|e| e.lock_owner)
            .is_some_and(|current| current != owner)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
