//! Event queue and emission types.
//!
//! Events are unacknowledged notifications from device to host. They may be
//! produced outside the core loop (a channel handler running off an
//! interrupt on real hardware), so the queue is shareable and bounded;
//! overflow drops the event and counts it, never blocking the producer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use iris_core::constants::CONTROL_CHANNEL;
use iris_core::frame::Opcode;

/// Default bound on queued events.
pub const DEFAULT_EVENT_DEPTH: usize = 16;
/// System event payload: event_code(u32) + argument(u32).
pub const SYSTEM_EVENT_SIZE: usize = 8;

/// System-level events, carried on channel 0 with opcode SYS_EVENT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    ChannelRegistered { channel: u8 },
    ChannelUnregistered { channel: u8 },
    SoftReboot,
}

impl SystemEvent {
    pub fn code(&self) -> u32 {
        match self {
            SystemEvent::ChannelRegistered { .. } => 0x00,
            SystemEvent::ChannelUnregistered { .. } => 0x01,
            SystemEvent::SoftReboot => 0x02,
        }
    }

    pub fn argument(&self) -> u32 {
        match self {
            SystemEvent::ChannelRegistered { channel }
            | SystemEvent::ChannelUnregistered { channel } => *channel as u32,
            SystemEvent::SoftReboot => 0,
        }
    }

    pub fn encode(&self) -> [u8; SYSTEM_EVENT_SIZE] {
        let mut bytes = [0u8; SYSTEM_EVENT_SIZE];
        bytes[..4].copy_from_slice(&self.code().to_le_bytes());
        bytes[4..].copy_from_slice(&self.argument().to_le_bytes());
        bytes
    }
}

/// One queued outbound event frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub channel: u8,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn system(event: SystemEvent) -> Self {
        Self {
            channel: CONTROL_CHANNEL,
            opcode: Opcode::SysEvent as u8,
            payload: event.encode().to_vec(),
        }
    }

    pub fn channel(channel: u8, payload: Vec<u8>) -> Self {
        Self {
            channel,
            opcode: Opcode::ChannelEvent as u8,
            payload,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<Event>,
    dropped: u32,
}

/// Bounded event queue, drained by the engine's core loop.
#[derive(Debug, Clone)]
pub struct EventQueue {
    inner: Arc<Mutex<Inner>>,
    depth: usize,
}

impl EventQueue {
    pub fn new(depth: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            depth,
        }
    }

    /// An emitter handle for channels; opaque to the channel implementation.
    pub fn sender(&self) -> EventSender {
        EventSender {
            queue: self.clone(),
        }
    }

    /// Enqueue an event. Returns `false` (and counts a drop) when full.
    pub fn push(&self, event: Event) -> bool {
        let mut inner = self.lock();
        if inner.queue.len() >= self.depth {
            inner.dropped += 1;
            tracing::debug!(
                channel = event.channel,
                opcode = event.opcode,
                "event: queue full, dropping"
            );
            return false;
        }
        inner.queue.push_back(event);
        true
    }

    pub fn pop(&self) -> Option<Event> {
        self.lock().queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the drop counter (folded into the stats block by the engine).
    pub fn take_dropped(&self) -> u32 {
        let mut inner = self.lock();
        std::mem::take(&mut inner.dropped)
    }

    pub fn clear(&self) {
        self.lock().queue.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_DEPTH)
    }
}

/// The handle a channel receives at registration for emitting its events.
#[derive(Debug, Clone)]
pub struct EventSender {
    queue: EventQueue,
}

impl EventSender {
    /// Queue a channel event (opcode CHANNEL_EVENT on the source channel).
    /// Returns `false` if the event was dropped.
    pub fn emit(&self, channel: u8, payload: Vec<u8>) -> bool {
        self.queue.push(Event::channel(channel, payload))
    }
}
