//! The protocol engine.
//!
//! One engine owns all protocol state for one host link: the receive state
//! machine, sequence counters, reassembly buffer, retransmission queue,
//! statistics, channel registry, and event queue. [`Engine::poll`] is the
//! core loop body: it drains the transport, handles complete frames, runs
//! timers, and flushes pending retransmissions and events.

use std::time::{Duration, Instant};

use iris_core::crc::Crc32;
use iris_core::frame::{FrameFlags, Header, Opcode};
use iris_core::Status;
use iris_protocol::fragment::{fragments, Reassembler, DEFAULT_REASSEMBLY_CAPACITY};
use iris_protocol::recv::{RxEvent, RxMachine};
use iris_protocol::rtx::{RtxAction, RtxQueue};
use iris_protocol::{Capabilities, ProtocolError, SequenceState, Stats};
use iris_transport::Transport;

use crate::channel::{Channel, ChannelFlags, Registry};
use crate::error::EngineError;
use crate::event::{Event, EventQueue, SystemEvent};
use crate::info::DeviceInfo;

/// Lock owner token used for operations arriving over the wire.
pub const HOST_LOCK_OWNER: u32 = 0x0001;

/// Side effects requested by SYS_RESET / SYS_BOOT, surfaced to the caller
/// after the dispatch that scheduled them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    /// Soft-reboot into the firmware.
    Reset,
    /// Reboot into the bootloader.
    Bootloader,
}

pub struct Engine<T: Transport> {
    pub(crate) transport: T,
    pub(crate) caps: Capabilities,
    pub(crate) rx: RxMachine,
    pub(crate) seq: SequenceState,
    pub(crate) reasm: Reassembler,
    pub(crate) rtx: RtxQueue,
    pub(crate) stats: Stats,
    pub(crate) registry: Registry,
    pub(crate) events: EventQueue,
    pub(crate) info: DeviceInfo,
    /// Reset sequence/reassembly/RTX state after the in-flight response.
    pub(crate) pending_sync: bool,
    /// Capabilities accepted by SET_CAPS, applied after the echo response.
    pub(crate) pending_caps: Option<Capabilities>,
    pub(crate) pending_action: Option<SystemAction>,
    pub(crate) failed_sends: Vec<u8>,
}

impl<T: Transport> Engine<T> {
    pub fn new(transport: T, info: DeviceInfo) -> Self {
        let mut engine = Self {
            transport,
            caps: Capabilities::default(),
            rx: RxMachine::new(),
            seq: SequenceState::new(),
            reasm: Reassembler::new(DEFAULT_REASSEMBLY_CAPACITY),
            rtx: RtxQueue::default(),
            stats: Stats::new(),
            registry: Registry::new(),
            events: EventQueue::default(),
            info,
            pending_sync: false,
            pending_caps: None,
            pending_action: None,
            failed_sends: Vec::new(),
        };
        engine.apply_caps();
        engine
    }

    /// Override the initial capabilities (tests, preconfigured links).
    pub fn with_caps(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self.apply_caps();
        self
    }

    pub(crate) fn apply_caps(&mut self) {
        self.rx.set_check_crc(self.caps.crc);
        self.rx
            .set_frame_timeout(Duration::from_millis(self.caps.frame_timeout_ms as u64));
        self.rtx
            .set_timeout(Duration::from_millis(self.caps.rtx_timeout_ms as u64));
        self.rtx.set_max_retries(self.caps.max_retries);
    }

    // ------------------------------------------------------------------ //
    // Accessors
    // ------------------------------------------------------------------ //

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn tx_seq(&self) -> u8 {
        self.seq.tx_seq()
    }

    pub fn rx_seq(&self) -> Option<u8> {
        self.seq.rx_seq()
    }

    pub fn rtx_pending(&self) -> usize {
        self.rtx.len()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The side effect scheduled by the last SYS_RESET / SYS_BOOT, if any.
    pub fn take_system_action(&mut self) -> Option<SystemAction> {
        self.pending_action.take()
    }

    /// Sequence numbers of sends whose retries were exhausted.
    pub fn take_failed_sends(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.failed_sends)
    }

    // ------------------------------------------------------------------ //
    // Channel management
    // ------------------------------------------------------------------ //

    /// Register a channel, emitting CHANNEL_REGISTERED for dynamic ones.
    pub fn register_channel(
        &mut self,
        requested: Option<u8>,
        flags: ChannelFlags,
        name: &str,
        channel: Box<dyn Channel>,
    ) -> Result<u8, EngineError> {
        let sender = self.events.sender();
        let id = self
            .registry
            .register(requested, flags, name, channel, sender)?;
        if flags.dynamic {
            self.emit_system_event(SystemEvent::ChannelRegistered { channel: id });
        }
        Ok(id)
    }

    /// Unregister a channel, emitting CHANNEL_UNREGISTERED for dynamic ones.
    pub fn unregister_channel(&mut self, id: u8) -> Result<(), EngineError> {
        let info = self.registry.unregister(id)?;
        if info.flags.dynamic {
            self.emit_system_event(SystemEvent::ChannelUnregistered { channel: id });
        }
        Ok(())
    }

    /// Acquire a channel lock on behalf of a device-side owner.
    pub fn lock_channel(&mut self, id: u8, owner: u32) -> Status {
        self.registry.lock(id, owner)
    }

    pub fn unlock_channel(&mut self, id: u8, owner: u32) -> Status {
        self.registry.unlock(id, owner)
    }

    /// Queue a system event for emission.
    pub fn emit_system_event(&mut self, event: SystemEvent) {
        if !self.caps.events {
            return;
        }
        self.events.push(Event::system(event));
    }

    /// Queue a channel event for emission.
    pub fn emit_channel_event(&mut self, channel: u8, payload: Vec<u8>) {
        if !self.caps.events {
            return;
        }
        self.events.push(Event::channel(channel, payload));
    }

    // ------------------------------------------------------------------ //
    // Core loop
    // ------------------------------------------------------------------ //

    /// Run one iteration of the core loop.
    ///
    /// Drains available transport bytes through the receive state machine,
    /// handles every completed frame, services the per-frame and RTX
    /// timers, and flushes queued events.
    pub fn poll(&mut self, now: Instant) -> Result<(), EngineError> {
        // Inbound bytes
        let mut scratch = [0u8; 512];
        let mut rx_events = Vec::new();
        loop {
            match self.transport.read_nonblocking(&mut scratch) {
                Ok(0) => break,
                Ok(n) => self.rx.push(&scratch[..n], now, &mut rx_events),
                Err(e) => {
                    self.stats.transport_errors += 1;
                    return Err(e.into());
                }
            }
        }
        for event in rx_events {
            self.handle_rx_event(event, now)?;
        }

        // Per-frame receive timeout
        if let Some(RxEvent::Timeout) = self.rx.tick(now) {
            self.stats.transport_errors += 1;
        }

        // Retransmissions
        for action in self.rtx.poll(now) {
            match action {
                RtxAction::Resend {
                    seq,
                    channel,
                    opcode,
                    flags,
                    payload,
                } => {
                    let header = Header {
                        seq,
                        channel,
                        flags,
                        opcode,
                        length: payload.len() as u16,
                    };
                    transmit(&mut self.transport, &mut self.stats, &header, &[&payload])?;
                }
                RtxAction::Expired { seq } => {
                    self.stats.transport_errors += 1;
                    self.failed_sends.push(seq);
                }
            }
        }

        // Events: emitted only while the link is ready and the ACK queue
        // has headroom; anything else stays queued for the next poll.
        self.stats.events_dropped += self.events.take_dropped();
        if self.caps.events {
            while self.transport.ready() && self.rtx.has_headroom() {
                let Some(event) = self.events.pop() else { break };
                let header = Header {
                    seq: self.seq.next_tx(),
                    channel: event.channel,
                    flags: FrameFlags::event(),
                    opcode: event.opcode,
                    length: event.payload.len() as u16,
                };
                transmit(
                    &mut self.transport,
                    &mut self.stats,
                    &header,
                    &[&event.payload],
                )?;
            }
        }

        Ok(())
    }

    /// Send a device-initiated frame, optionally tracked for acknowledgment.
    ///
    /// With `ack_req`, the frame joins the RTX queue; a full queue fails
    /// the send immediately.
    pub fn send(
        &mut self,
        channel: u8,
        opcode: Opcode,
        payload: &[u8],
        ack_req: bool,
        now: Instant,
    ) -> Result<(), EngineError> {
        let flags = FrameFlags {
            ack_req,
            ..Default::default()
        };
        let Engine {
            transport,
            stats,
            seq,
            rtx,
            caps,
            ..
        } = self;
        TxContext {
            transport,
            stats,
            seq,
            rtx,
            caps,
        }
        .send(channel, opcode as u8, flags, payload, now)
    }
}

// ---------------------------------------------------------------------- //
// Transmit path
// ---------------------------------------------------------------------- //

/// Emit one frame as separate transport writes: header, payload segments,
/// then the payload CRC. Payload bytes are written from wherever they live
/// (a channel's borrowed slice included) without an intermediate copy.
pub(crate) fn transmit<T: Transport>(
    transport: &mut T,
    stats: &mut Stats,
    header: &Header,
    segments: &[&[u8]],
) -> Result<(), EngineError> {
    debug_assert_eq!(
        header.length as usize,
        segments.iter().map(|s| s.len()).sum::<usize>()
    );
    let result = (|| {
        transport.write_all(&header.encode())?;
        if header.length > 0 {
            let mut crc = Crc32::new();
            for segment in segments {
                transport.write_all(segment)?;
                crc.update(segment);
            }
            transport.write_all(&crc.finish().to_le_bytes())?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => {
            stats.frames_sent += 1;
            tracing::trace!(
                seq = header.seq,
                channel = header.channel,
                opcode = header.opcode,
                len = header.length,
                "tx: frame"
            );
            Ok(())
        }
        Err(e) => {
            stats.transport_errors += 1;
            tracing::warn!(seq = header.seq, "tx: transport write failed");
            Err(EngineError::Transport(e))
        }
    }
}

/// Borrowed view of the engine's transmit-side state.
///
/// Dispatch handlers destructure the engine into this plus the registry, so
/// a payload borrowed from a channel can be emitted while the transmit
/// machinery is live.
pub(crate) struct TxContext<'a, T: Transport> {
    pub transport: &'a mut T,
    pub stats: &'a mut Stats,
    pub seq: &'a mut SequenceState,
    pub rtx: &'a mut RtxQueue,
    pub caps: &'a Capabilities,
}

impl<T: Transport> TxContext<'_, T> {
    /// Send a payload, splitting it into FRAGMENT-chained frames when it
    /// exceeds the negotiated `max_payload`.
    pub fn send(
        &mut self,
        channel: u8,
        opcode: u8,
        flags: FrameFlags,
        payload: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        for fragment in fragments(payload, self.caps.max_payload as usize) {
            let mut frame_flags = flags;
            frame_flags.fragment = fragment.more;
            if frame_flags.ack_req && !self.rtx.has_headroom() {
                return Err(EngineError::Protocol(ProtocolError::RtxQueueFull {
                    depth: self.rtx.len(),
                }));
            }
            let header = Header {
                seq: self.seq.next_tx(),
                channel,
                flags: frame_flags,
                opcode,
                length: fragment.data.len() as u16,
            };
            transmit(self.transport, self.stats, &header, &[fragment.data])?;
            if frame_flags.ack_req {
                self.rtx
                    .push(
                        header.seq,
                        channel,
                        opcode,
                        frame_flags,
                        fragment.data.to_vec(),
                        now,
                    )
                    .map_err(EngineError::Protocol)?;
                self.stats.note_ack_depth(self.rtx.len());
            }
        }
        Ok(())
    }

    /// Send a NAK carrying a 2-byte status.
    pub fn send_nak(
        &mut self,
        channel: u8,
        opcode: u8,
        status: Status,
        now: Instant,
    ) -> Result<(), EngineError> {
        tracing::debug!(channel, opcode, ?status, "tx: nak");
        self.send(channel, opcode, FrameFlags::nak(), &status.to_wire(), now)
    }

    /// Send a bare ACK (no payload) for a duplicate frame.
    pub fn send_bare_ack(
        &mut self,
        channel: u8,
        opcode: u8,
        now: Instant,
    ) -> Result<(), EngineError> {
        self.send(channel, opcode, FrameFlags::ack(), &[], now)
    }
}
