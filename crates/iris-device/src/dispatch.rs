//! Command dispatch.
//!
//! Routes validated inbound frames through sequence checking, reassembly,
//! and the per-opcode handlers, then builds the response: ACK with a
//! payload, NAK with a 2-byte status, or nothing for no-response commands.
//! Responses to channel operations travel on the originating channel;
//! protocol and system responses travel on channel 0.

use std::time::Instant;

use iris_core::frame::{FrameFlags, Header, Opcode, OpcodeKind};
use iris_core::Status;
use iris_protocol::recv::RxEvent;
use iris_protocol::RxCheck;
use iris_transport::Transport;

use crate::channel::CHANNEL_RECORD_SIZE;
use crate::engine::{Engine, SystemAction, TxContext, HOST_LOCK_OWNER};
use crate::error::EngineError;
use crate::event::SystemEvent;

/// Upper bound on a single CHANNEL_READ into an owned buffer.
const MAX_READ_LEN: usize = 1 << 20;

/// What a handler decided to send back.
enum Reply {
    /// ACK frame with this payload (fragmented when large).
    Payload(Vec<u8>),
    /// NAK frame with a 2-byte status.
    Nak(Status),
    /// The handler already transmitted (zero-copy read path).
    Sent,
}

impl<T: Transport> Engine<T> {
    pub(crate) fn handle_rx_event(
        &mut self,
        event: RxEvent,
        now: Instant,
    ) -> Result<(), EngineError> {
        match event {
            RxEvent::Frame { header, payload } => self.handle_frame(header, payload, now),
            RxEvent::HeaderChecksum | RxEvent::HeaderInvalid => {
                self.stats.checksum_errors += 1;
                Ok(())
            }
            RxEvent::PayloadChecksum { header } => {
                self.stats.checksum_errors += 1;
                // The header survived, so the sender can be told
                if self.caps.ack && header.flags.ack_req {
                    self.tx(|tx| tx.send_nak(header.channel, header.opcode, Status::Checksum, now))?;
                }
                Ok(())
            }
            RxEvent::Timeout => {
                self.stats.transport_errors += 1;
                Ok(())
            }
        }
    }

    fn handle_frame(
        &mut self,
        header: Header,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<(), EngineError> {
        self.stats.frames_received += 1;

        if self.caps.seq {
            match self.seq.check_rx(header.seq, header.flags.rtx) {
                RxCheck::Accept => self.seq.commit_rx(header.seq),
                RxCheck::Bypass => {}
                RxCheck::Duplicate => {
                    tracing::debug!(seq = header.seq, "rx: duplicate frame, re-acking");
                    if self.caps.ack {
                        self.tx(|tx| tx.send_bare_ack(header.channel, header.opcode, now))?;
                    }
                    return Ok(());
                }
                RxCheck::Mismatch { expected } => {
                    self.stats.sequence_errors += 1;
                    tracing::debug!(seq = header.seq, expected, "rx: sequence mismatch");
                    if self.caps.ack && header.flags.ack_req {
                        self.tx(|tx| {
                            tx.send_nak(header.channel, header.opcode, Status::Sequence, now)
                        })?;
                    }
                    return Ok(());
                }
            }
        }

        // Acknowledgment frames settle pending sends; they carry no command
        if (header.flags.ack || header.flags.nak) && !header.flags.ack_req {
            if header.flags.nak {
                let status = Status::from_wire(&payload).unwrap_or(Status::Unknown);
                tracing::debug!(seq = header.seq, ?status, "rx: nak received");
            }
            self.rtx
                .acknowledge(header.seq, header.channel, header.opcode);
            return Ok(());
        }

        // The device is the event producer; inbound events are not defined
        if header.flags.event {
            tracing::trace!(opcode = header.opcode, "rx: ignoring host event frame");
            return Ok(());
        }

        let assembled = if header.flags.fragment || self.reasm.in_progress() {
            match self
                .reasm
                .push(header.channel, header.opcode, &payload, header.flags.fragment)
            {
                Ok(Some(data)) => data,
                Ok(None) => {
                    // Mid-reassembly fragment: acknowledge receipt if asked
                    if self.caps.ack && header.flags.ack_req {
                        self.tx(|tx| tx.send_bare_ack(header.channel, header.opcode, now))?;
                    }
                    return Ok(());
                }
                Err(err) => {
                    self.stats.fragment_errors += 1;
                    tracing::debug!(%err, "rx: reassembly failed");
                    if self.caps.ack && header.flags.ack_req {
                        self.tx(|tx| {
                            tx.send_nak(header.channel, header.opcode, Status::Fragment, now)
                        })?;
                    }
                    return Ok(());
                }
            }
        } else {
            payload
        };

        self.dispatch(header, &assembled, now)
    }

    fn dispatch(
        &mut self,
        header: Header,
        payload: &[u8],
        now: Instant,
    ) -> Result<(), EngineError> {
        let opcode = match Opcode::from_u8(header.opcode) {
            Ok(opcode) => opcode,
            Err(_) => {
                tracing::debug!(opcode = header.opcode, "dispatch: unknown opcode");
                return self.send_reply(&header, Reply::Nak(Status::Unknown), now);
            }
        };

        // Commands declared no-response never produce a frame, not even a NAK
        if opcode.is_no_response() {
            self.handle_notification(opcode);
            return Ok(());
        }

        let reply = match opcode.kind() {
            OpcodeKind::Protocol => self.dispatch_protocol(opcode, payload),
            OpcodeKind::System => self.dispatch_system(opcode),
            OpcodeKind::Channel => self.dispatch_channel(opcode, &header, payload, now)?,
        };

        self.send_reply(&header, reply, now)?;

        // Deferred side effects gated on the response having been sent
        if self.pending_sync {
            self.pending_sync = false;
            self.seq.reset();
            self.reasm.reset();
            self.rtx.clear();
            self.rx.reset();
            tracing::info!("proto: sync, sequence and queues reset");
        }
        if let Some(caps) = self.pending_caps.take() {
            self.caps = caps;
            self.apply_caps();
            tracing::info!(
                crc = caps.crc,
                seq = caps.seq,
                ack = caps.ack,
                events = caps.events,
                max_payload = caps.max_payload,
                "proto: capabilities updated"
            );
        }
        Ok(())
    }

    /// SYS_RESET, SYS_BOOT, and inbound event frames: side effects only.
    fn handle_notification(&mut self, opcode: Opcode) {
        match opcode {
            Opcode::SysReset => {
                tracing::info!("sys: reset requested");
                self.pending_action = Some(SystemAction::Reset);
                self.emit_system_event(SystemEvent::SoftReboot);
            }
            Opcode::SysBoot => {
                tracing::info!("sys: bootloader requested");
                self.pending_action = Some(SystemAction::Bootloader);
                self.emit_system_event(SystemEvent::SoftReboot);
            }
            _ => {
                tracing::trace!(opcode = opcode as u8, "dispatch: ignoring inbound event");
            }
        }
    }

    fn dispatch_protocol(&mut self, opcode: Opcode, payload: &[u8]) -> Reply {
        match opcode {
            Opcode::ProtoSync => {
                // Counters reset only after the response is on the wire
                self.pending_sync = true;
                Reply::Payload(Status::Success.to_wire().to_vec())
            }
            Opcode::ProtoGetCaps => Reply::Payload(self.caps.encode().to_vec()),
            Opcode::ProtoSetCaps => self.proto_set_caps(payload),
            Opcode::ProtoStats => {
                self.stats.note_ack_depth(self.rtx.len());
                Reply::Payload(self.stats.encode().to_vec())
            }
            _ => Reply::Nak(Status::Unknown),
        }
    }

    fn dispatch_system(&mut self, opcode: Opcode) -> Reply {
        match opcode {
            Opcode::SysInfo => Reply::Payload(self.info.encode().to_vec()),
            _ => Reply::Nak(Status::Unknown),
        }
    }

    fn dispatch_channel(
        &mut self,
        opcode: Opcode,
        header: &Header,
        payload: &[u8],
        now: Instant,
    ) -> Result<Reply, EngineError> {
        Ok(match opcode {
            Opcode::ChannelList => self.channel_list(),
            Opcode::ChannelPoll => self.channel_poll(),
            Opcode::ChannelLock => self.channel_lock(header),
            Opcode::ChannelUnlock => self.channel_unlock(header),
            Opcode::ChannelShape => self.channel_shape(header),
            Opcode::ChannelSize => self.channel_size(header),
            Opcode::ChannelRead => self.channel_read(header, payload, now)?,
            Opcode::ChannelWrite => self.channel_write(header, payload),
            Opcode::ChannelIoctl => self.channel_ioctl(header, payload),
            _ => Reply::Nak(Status::Unknown),
        })
    }

    fn send_reply(
        &mut self,
        header: &Header,
        reply: Reply,
        now: Instant,
    ) -> Result<(), EngineError> {
        match reply {
            Reply::Payload(payload) => self.tx(|tx| {
                tx.send(header.channel, header.opcode, FrameFlags::ack(), &payload, now)
            }),
            Reply::Nak(status) => {
                self.tx(|tx| tx.send_nak(header.channel, header.opcode, status, now))
            }
            Reply::Sent => Ok(()),
        }
    }

    /// Run a closure over the transmit-side borrow of the engine.
    fn tx<R>(&mut self, f: impl FnOnce(&mut TxContext<'_, T>) -> R) -> R {
        let Engine {
            transport,
            stats,
            seq,
            rtx,
            caps,
            ..
        } = self;
        let mut tx = TxContext {
            transport,
            stats,
            seq,
            rtx,
            caps,
        };
        f(&mut tx)
    }

    // ------------------------------------------------------------------ //
    // Protocol handlers
    // ------------------------------------------------------------------ //

    fn proto_set_caps(&mut self, payload: &[u8]) -> Reply {
        match iris_protocol::Capabilities::decode(payload) {
            Ok(requested) => {
                let accepted = requested.clamped();
                // Applied after the echo goes out under the old settings
                self.pending_caps = Some(accepted);
                Reply::Payload(accepted.encode().to_vec())
            }
            Err(err) => {
                tracing::debug!(%err, "proto: malformed SET_CAPS");
                Reply::Nak(Status::Invalid)
            }
        }
    }

    // ------------------------------------------------------------------ //
    // Channel handlers
    // ------------------------------------------------------------------ //

    fn channel_list(&self) -> Reply {
        let mut payload = Vec::with_capacity(self.registry.len() * CHANNEL_RECORD_SIZE);
        for info in self.registry.list() {
            payload.extend_from_slice(&info.encode());
        }
        Reply::Payload(payload)
    }

    fn channel_poll(&self) -> Reply {
        let mut bitmap = 0u32;
        for entry in self.registry.entries() {
            let readable = entry.info.flags.read && entry.channel.available() > 0;
            let writable = entry.info.flags.write;
            if readable || writable {
                bitmap |= 1 << entry.info.id;
            }
        }
        Reply::Payload(bitmap.to_le_bytes().to_vec())
    }

    fn channel_lock(&mut self, header: &Header) -> Reply {
        match self.registry.lock(header.channel, HOST_LOCK_OWNER) {
            Status::Success => Reply::Payload(Status::Success.to_wire().to_vec()),
            status => Reply::Nak(status),
        }
    }

    fn channel_unlock(&mut self, header: &Header) -> Reply {
        match self.registry.unlock(header.channel, HOST_LOCK_OWNER) {
            Status::Success => Reply::Payload(Status::Success.to_wire().to_vec()),
            status => Reply::Nak(status),
        }
    }

    fn channel_shape(&self, header: &Header) -> Reply {
        let Some(entry) = self.registry.get(header.channel) else {
            return Reply::Nak(Status::Invalid);
        };
        match entry.channel.shape() {
            Ok(shape) => Reply::Payload(shape.encode().to_vec()),
            Err(status) => Reply::Nak(status),
        }
    }

    fn channel_size(&self, header: &Header) -> Reply {
        let Some(entry) = self.registry.get(header.channel) else {
            return Reply::Nak(Status::Invalid);
        };
        Reply::Payload(entry.channel.available().to_le_bytes().to_vec())
    }

    /// CHANNEL_READ: offset(u32) + length(u32). Prefers the channel's
    /// zero-copy `readp`, emitting the borrowed slice straight onto the
    /// wire; falls back to `read` into an owned buffer.
    fn channel_read(
        &mut self,
        header: &Header,
        payload: &[u8],
        now: Instant,
    ) -> Result<Reply, EngineError> {
        if payload.len() < 8 {
            return Ok(Reply::Nak(Status::Invalid));
        }
        let offset = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let len = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
        if self.registry.locked_by_other(header.channel, HOST_LOCK_OWNER) {
            return Ok(Reply::Nak(Status::Busy));
        }

        let Engine {
            transport,
            stats,
            seq,
            rtx,
            caps,
            registry,
            ..
        } = self;
        let Some(entry) = registry.get_mut(header.channel) else {
            return Ok(Reply::Nak(Status::Invalid));
        };
        if !entry.info.flags.read {
            return Ok(Reply::Nak(Status::Invalid));
        }
        let mut tx = TxContext {
            transport,
            stats,
            seq,
            rtx,
            caps,
        };
        if entry.channel.supports_readp() {
            match entry.channel.readp(offset, len) {
                Ok(data) => {
                    tx.send(header.channel, header.opcode, FrameFlags::ack(), data, now)?;
                    Ok(Reply::Sent)
                }
                Err(status) => Ok(Reply::Nak(status)),
            }
        } else {
            // Only the copying path allocates; readp serves any length the
            // channel can back with a borrowed slice
            if len > MAX_READ_LEN {
                return Ok(Reply::Nak(Status::Invalid));
            }
            let mut buf = vec![0u8; len];
            match entry.channel.read(offset, &mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    tx.send(header.channel, header.opcode, FrameFlags::ack(), &buf, now)?;
                    Ok(Reply::Sent)
                }
                Err(status) => Ok(Reply::Nak(status)),
            }
        }
    }

    /// CHANNEL_WRITE: offset(u32) + length(u32) + data.
    fn channel_write(&mut self, header: &Header, payload: &[u8]) -> Reply {
        if payload.len() < 8 {
            return Reply::Nak(Status::Invalid);
        }
        let offset = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let length =
            u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
        let data = &payload[8..];
        if data.len() != length {
            return Reply::Nak(Status::Invalid);
        }
        if self.registry.locked_by_other(header.channel, HOST_LOCK_OWNER) {
            return Reply::Nak(Status::Busy);
        }
        let Some(entry) = self.registry.get_mut(header.channel) else {
            return Reply::Nak(Status::Invalid);
        };
        if !entry.info.flags.write {
            return Reply::Nak(Status::Invalid);
        }
        match entry.channel.write(offset, data) {
            Ok(()) => Reply::Payload(Status::Success.to_wire().to_vec()),
            Err(status) => Reply::Nak(status),
        }
    }

    /// CHANNEL_IOCTL: request(u32) + opaque data, passed through.
    fn channel_ioctl(&mut self, header: &Header, payload: &[u8]) -> Reply {
        if payload.len() < 4 {
            return Reply::Nak(Status::Invalid);
        }
        let request = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let data = &payload[4..];
        if self.registry.locked_by_other(header.channel, HOST_LOCK_OWNER) {
            return Reply::Nak(Status::Busy);
        }
        let Some(entry) = self.registry.get_mut(header.channel) else {
            return Reply::Nak(Status::Invalid);
        };
        match entry.channel.ioctl(request, data) {
            Ok(response) => Reply::Payload(response),
            Err(status) => Reply::Nak(status),
        }
    }
}
