use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluefusion_types::{Address, MetadataValue, Packet, PacketKind, SourceTag};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::source::{CollectorError, PacketSource};

const SYNC_BYTE_DEFAULT: u8 = 0xAA;
const CHANNEL_CAPACITY: usize = 1024;

const KEYWORDS: [&str; 5] = ["sniffer", "ble", "nordic", "ti", "bluetooth"];
const KNOWN_VID_PID: [(u16, u16); 3] = [(0x0451, 0x16AA), (0x1366, 0x0105), (0x1915, 0x520F)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Parameterizes the sniffer's length-prefix framing so the same reader
/// loop serves dongles whose firmware disagrees on sync byte or length
/// byte order.
#[derive(Debug, Clone, Copy)]
pub struct SnifferWireConfig {
    pub sync_byte: u8,
    pub length_endian: Endian,
}

impl Default for SnifferWireConfig {
    fn default() -> Self {
        SnifferWireConfig { sync_byte: SYNC_BYTE_DEFAULT, length_endian: Endian::Big }
    }
}

fn packet_kind_from_type(ty: u8) -> (PacketKind, bool) {
    match ty {
        0x01 => (PacketKind::Advertisement, true),
        0x02 => (PacketKind::ScanRequest, true),
        0x03 => (PacketKind::ScanResponse, true),
        0x04 => (PacketKind::ConnectionEvent, true),
        0x05 => (PacketKind::Data, true),
        0x06 => (PacketKind::GattRead, true),
        0x07 => (PacketKind::GattWrite, true),
        0x08 => (PacketKind::Disconnection, true),
        0x09 => (PacketKind::ServiceDiscovery, true),
        other => (PacketKind::Unknown(other), false),
    }
}

/// Scan available serial ports for a likely BLE sniffer dongle, by
/// keyword match against the port description or a known VID/PID, then
/// confirm the candidate with an exclusive open-close probe.
pub fn auto_detect() -> Result<String, CollectorError> {
    let ports = serialport::available_ports()?;
    for port in &ports {
        let matches_keyword = port_description(port)
            .map(|desc| {
                let lower = desc.to_lowercase();
                KEYWORDS.iter().any(|kw| lower.contains(kw))
            })
            .unwrap_or(false);
        let matches_vid_pid = port_vid_pid(port)
            .map(|(vid, pid)| KNOWN_VID_PID.contains(&(vid, pid)))
            .unwrap_or(false);

        if matches_keyword || matches_vid_pid {
            if probe(&port.port_name) {
                return Ok(port.port_name.clone());
            }
            debug!(port = %port.port_name, "candidate sniffer port failed open-close probe, skipping");
        }
    }
    Err(CollectorError::PortNotFound)
}

fn port_description(port: &serialport::SerialPortInfo) -> Option<String> {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(info) => info.product.clone(),
        _ => None,
    }
}

fn port_vid_pid(port: &serialport::SerialPortInfo) -> Option<(u16, u16)> {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(info) => Some((info.vid, info.pid)),
        _ => None,
    }
}

fn probe(path: &str) -> bool {
    match serialport::new(path, 115_200).timeout(Duration::from_millis(50)).open() {
        Ok(port) => {
            drop(port);
            true
        }
        Err(_) => false,
    }
}

/// Passive USB sniffer source, driven over a length-prefixed serial
/// protocol. Commands are newline-terminated ASCII; a read error
/// or framing desync never implicitly closes the port.
pub struct SerialSnifferSource {
    port_path: String,
    wire: SnifferWireConfig,
    tx: broadcast::Sender<Packet>,
    writer: std::sync::Mutex<Box<dyn serialport::SerialPort>>,
    running: Arc<AtomicBool>,
}

impl SerialSnifferSource {
    pub fn open(path: &str, baud: u32, wire: SnifferWireConfig) -> Result<Arc<Self>, CollectorError> {
        let reader_port = serialport::new(path, baud).timeout(Duration::from_millis(200)).open()?;
        let writer_port = reader_port.try_clone()?;

        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        let source = Arc::new(SerialSnifferSource {
            port_path: path.to_string(),
            wire,
            tx,
            writer: std::sync::Mutex::new(writer_port),
            running: Arc::new(AtomicBool::new(true)),
        });

        let reader_source = source.clone();
        tokio::task::spawn_blocking(move || reader_source.read_loop(reader_port));

        Ok(source)
    }

    fn read_loop(self: Arc<Self>, mut port: Box<dyn serialport::SerialPort>) {
        let mut byte = [0u8; 1];
        while self.running.load(Ordering::Relaxed) {
            match port.read_exact(&mut byte) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    warn!(port = %self.port_path, error = %e, "sniffer read failed, port left open for operator reconnect");
                    continue;
                }
            }
            if byte[0] != self.wire.sync_byte {
                continue;
            }

            let mut len_bytes = [0u8; 2];
            if port.read_exact(&mut len_bytes).is_err() {
                continue;
            }
            let length = match self.wire.length_endian {
                Endian::Big => u16::from_be_bytes(len_bytes),
                Endian::Little => u16::from_le_bytes(len_bytes),
            } as usize;

            let mut payload = vec![0u8; length];
            if port.read_exact(&mut payload).is_err() {
                continue;
            }

            if let Some(packet) = self.decode_payload(&payload) {
                let _ = self.tx.send(packet);
            }
        }
    }

    fn decode_payload(&self, payload: &[u8]) -> Option<Packet> {
        if payload.len() < 13 {
            return None;
        }
        let ty = payload[0];
        let channel = payload[5];
        let rssi = payload[6] as i8 as i16;
        let mut addr_bytes = [0u8; 6];
        addr_bytes.copy_from_slice(&payload[7..13]);
        let address = Address::from_bytes(addr_bytes);
        let sdu = payload[13..].to_vec();

        let (kind, known) = packet_kind_from_type(ty);
        let mut packet = Packet::new(SourceTag::Sniffer, address, rssi, kind, sdu);
        packet = packet.with_metadata("channel", MetadataValue::Int(channel as i64));
        if !known {
            packet = packet.with_metadata("unknown_type", MetadataValue::Int(ty as i64));
        }
        Some(packet)
    }
}

#[async_trait]
impl PacketSource for SerialSnifferSource {
    fn name(&self) -> String {
        format!("sniffer:{}", self.port_path)
    }

    fn subscribe(&self) -> broadcast::Receiver<Packet> {
        self.tx.subscribe()
    }

    async fn send_command(&self, cmd: &str) -> Result<(), CollectorError> {
        let mut line = cmd.as_bytes().to_vec();
        line.push(b'\n');
        let port_path = self.port_path.clone();
        let mut guard = self.writer.lock().expect("sniffer writer mutex poisoned");
        std::io::Write::write_all(&mut *guard, &line).map_err(|e| CollectorError::WriteFailed(format!("{port_path}: {e}")))
    }
}

/// Implemented by collectors the channel hopper can drive.
pub trait HopTarget: Send + Sync {
    fn hop(&self, channel: u8);

    /// Pin the dongle to `address`'s traffic, halting normal hopping.
    /// Default no-op for targets that don't support following.
    fn follow(&self, _address: Address) {}

    /// Release a previous `follow`, letting the hopper resume its schedule.
    /// Default no-op for targets that don't support following.
    fn unfollow(&self) {}
}

impl HopTarget for SerialSnifferSource {
    fn hop(&self, channel: u8) {
        let cmd = format!("CHANNEL {channel}");
        self.write_command_line(&cmd);
    }

    fn follow(&self, address: Address) {
        self.write_command_line(&format!("FOLLOW {address}"));
    }

    fn unfollow(&self) {
        self.write_command_line("MODE PASSIVE");
    }
}

impl SerialSnifferSource {
    fn write_command_line(&self, cmd: &str) {
        let line = format!("{cmd}\n").into_bytes();
        if let Ok(mut guard) = self.writer.lock() {
            if let Err(e) = std::io::Write::write_all(&mut *guard, &line) {
                warn!(port = %self.port_path, error = %e, "sniffer command write failed: {cmd}");
            }
        }
    }
}

impl Drop for SerialSnifferSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
