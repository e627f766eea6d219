//! The Iris device daemon.
//!
//! Listens for one host connection at a time and runs the protocol engine
//! over it. The socket reader runs on its own thread and feeds a bounded
//! byte ring, mirroring the interrupt-fed receive path on real hardware;
//! the core loop drains the ring through the engine.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

use iris_device::channel::{ChannelFlags, StreamChannel};
use iris_device::{DeviceConfig, Engine, EngineError, SystemAction};
use iris_transport::ring::DEFAULT_RING_CAPACITY;
use iris_transport::{SharedByteRing, Transport, TransportError};

#[derive(Parser)]
#[command(name = "iris-device", about = "Iris camera protocol device daemon")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    listen: Option<std::net::SocketAddr>,
}

/// Transport over an accepted socket: reads come from the ring the reader
/// thread fills, writes go straight to the socket.
struct SessionTransport {
    ring: SharedByteRing,
    writer: TcpStream,
    alive: Arc<AtomicBool>,
}

impl Transport for SessionTransport {
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.ring.pop_slice(buf);
        if n == 0 && !self.alive.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(buf)?;
        Ok(())
    }

    fn ready(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

fn main() {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        iris_device::logging::init_json();
    } else {
        iris_device::logging::init();
    }

    let config = match &cli.config {
        Some(path) => match DeviceConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => DeviceConfig::default(),
    };

    let addr = cli.listen.unwrap_or(config.listen.addr);
    let listener = match TcpListener::bind(addr) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, "failed to bind listener: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, device = config.device.name, "listening for host");

    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                continue;
            }
        };
        tracing::info!(%peer, "host connected");
        match serve(stream, &config) {
            Ok(Some(SystemAction::Bootloader)) => {
                tracing::info!("bootloader requested, exiting");
                break;
            }
            Ok(Some(SystemAction::Reset)) => {
                tracing::info!("soft reset, awaiting reconnection");
            }
            Ok(None) => tracing::info!(%peer, "host disconnected"),
            Err(e) => tracing::warn!(%peer, "session ended: {e}"),
        }
    }
}

/// Run the engine over one accepted connection until the host disconnects
/// or a system action is requested.
fn serve(stream: TcpStream, config: &DeviceConfig) -> Result<Option<SystemAction>, EngineError> {
    stream.set_nodelay(true).map_err(TransportError::Io)?;
    let reader = stream.try_clone().map_err(TransportError::Io)?;
    let control = stream.try_clone().map_err(TransportError::Io)?;

    let ring = SharedByteRing::new(DEFAULT_RING_CAPACITY);
    let alive = Arc::new(AtomicBool::new(true));
    let reader_handle = spawn_reader(reader, ring.clone(), Arc::clone(&alive));

    let transport = SessionTransport {
        ring,
        writer: stream,
        alive: Arc::clone(&alive),
    };

    let mut engine = Engine::new(transport, config.device_info())
        .with_caps(config.capabilities());
    engine.register_channel(
        None,
        ChannelFlags::rw(),
        "console",
        Box::new(StreamChannel::default()),
    )?;
    engine.register_channel(
        None,
        ChannelFlags {
            read: true,
            write: true,
            lock: true,
            dynamic: true,
            ..Default::default()
        },
        "scratch",
        Box::new(StreamChannel::default()),
    )?;

    let result = loop {
        match engine.poll(Instant::now()) {
            Ok(()) => {}
            Err(EngineError::Transport(TransportError::Closed)) => break Ok(None),
            Err(e) => break Err(e),
        }
        if let Some(action) = engine.take_system_action() {
            // Flush the SOFT_REBOOT event and anything else still queued
            let drain_deadline = Instant::now() + Duration::from_millis(200);
            while Instant::now() < drain_deadline {
                if engine.poll(Instant::now()).is_err() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            break Ok(Some(action));
        }
        std::thread::sleep(Duration::from_millis(1));
    };

    alive.store(false, Ordering::Release);
    // Unblock the reader thread if it is still parked in read()
    let _ = control.shutdown(std::net::Shutdown::Both);
    let _ = reader_handle.join();
    result
}

/// Blocking socket reader feeding the receive ring, standing in for the
/// transport ISR on real hardware.
fn spawn_reader(
    mut reader: TcpStream,
    ring: SharedByteRing,
    alive: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; 2048];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut offset = 0;
                    while offset < n {
                        if !alive.load(Ordering::Acquire) {
                            return;
                        }
                        let pushed = ring.push_slice(&buf[offset..n]);
                        offset += pushed;
                        if pushed == 0 {
                            // Core loop is behind; give it a moment
                            std::thread::sleep(Duration::from_millis(1));
                        }
                    }
                }
            }
        }
        alive.store(false, Ordering::Release);
    })
}
