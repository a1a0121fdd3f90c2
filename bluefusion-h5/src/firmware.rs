use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

const SIGNATURE: &[u8; 8] = b"Realtech";
const PATCHED_LMP_SUBVERSION: u16 = 0x8723;
const MAX_CHUNK_LEN: usize = 252;

const OPCODE_RESET: u16 = 0x0C03;
const OPCODE_READ_LOCAL_VERSION: u16 = 0x1001;
const OPCODE_DOWNLOAD_FW: u16 = 0xFC20;
const OPCODE_DOWNLOAD_CONFIG: u16 = 0xFC61;
const OPCODE_CHANGE_BAUD: u16 = 0xFC17;
const OPCODE_DISABLE_ESCO: u16 = 0xFC1B;
const OPCODE_SET_EVENT_MASK: u16 = 0x0C01;

const VENDOR_ENTER_DOWNLOAD: [u8; 5] = [0x01, 0x00, 0xFC, 0x01, 0x01];
const VENDOR_LAUNCH: [u8; 5] = [0x01, 0x00, 0xFC, 0x01, 0x00];

/// The bring-up step a `FirmwareLoadError` occurred at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    InitialReset,
    ReadVersion,
    EnterDownloadMode,
    ParseFirmwareHeader,
    StreamPatches,
    LoadConfig,
    LaunchFirmware,
    VerifyVersion,
    RenegotiateBaud,
    DisableEscoAndSetEventMask,
}

#[derive(Debug, Error)]
pub enum FirmwareLoadError {
    #[error("bring-up failed at {step:?}: {reason}")]
    Failed { step: Step, reason: String },
}

impl FirmwareLoadError {
    fn at(step: Step, reason: impl Into<String>) -> Self {
        FirmwareLoadError::Failed { step, reason: reason.into() }
    }
}

/// A link capable of exchanging HCI commands with the controller and, for
/// production use, reconfiguring the serial port's baud rate. `H5Transport`
/// (see [`crate::frame`]) is the production implementation; tests supply a
/// scripted mock so the bring-up state machine is fully unit-testable.
pub trait HciLink {
    /// Issue an HCI command and return the Command Complete event's return
    /// parameters, laid out as
    /// `[event_code, param_len, num_hci_command_packets, opcode_lo, opcode_hi,
    ///   status, ...return params]`.
    fn command(&mut self, opcode: u16, params: &[u8]) -> Result<Vec<u8>, String>;

    /// Write bytes directly to the wire, bypassing H5 framing — used only
    /// for the vendor enter-download and launch-firmware raw byte sequences.
    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), String>;

    fn set_baud(&mut self, baud: u32) -> Result<(), String>;
}

/// Injectable delay so tests don't pay the bring-up sequence's real-time
/// waits.
pub trait Clock {
    fn sleep(&self, d: Duration);
}

pub struct RealClock;

impl Clock for RealClock {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Parsed `{signature, version, num_patches, patch_length}` header of an
/// RTL8723D firmware blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareHeader {
    pub version: u16,
    pub num_patches: u16,
    pub patch_length: u32,
}

pub struct FirmwareImage<'a> {
    pub header: FirmwareHeader,
    pub body: &'a [u8],
}

impl<'a> FirmwareImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, FirmwareLoadError> {
        if data.len() < 16 {
            return Err(FirmwareLoadError::at(Step::ParseFirmwareHeader, "blob shorter than 16-byte header"));
        }
        if &data[0..8] != SIGNATURE {
            return Err(FirmwareLoadError::at(Step::ParseFirmwareHeader, "signature mismatch"));
        }
        let version = u16::from_le_bytes([data[8], data[9]]);
        let num_patches = u16::from_le_bytes([data[10], data[11]]);
        let patch_length = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        Ok(FirmwareImage { header: FirmwareHeader { version, num_patches, patch_length }, body: &data[16..] })
    }
}

/// Local version information, as reported by `HCI_Read_Local_Version_Information`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVersion {
    pub hci_version: u8,
    pub hci_revision: u16,
    pub lmp_version: u8,
    pub manufacturer: u16,
    pub lmp_subversion: u16,
}

fn parse_local_version(event: &[u8]) -> Result<LocalVersion, FirmwareLoadError> {
    if event.len() < 14 {
        return Err(FirmwareLoadError::at(Step::ReadVersion, "version event payload too short"));
    }
    Ok(LocalVersion {
        hci_version: event[6],
        hci_revision: u16::from_le_bytes([event[7], event[8]]),
        lmp_version: event[9],
        manufacturer: u16::from_le_bytes([event[10], event[11]]),
        lmp_subversion: u16::from_le_bytes([event[12], event[13]]),
    })
}

/// Whether the bring-up sequence ran to completion or short-circuited
/// because the controller was already patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    AlreadyPatched,
    Loaded,
}

/// Drives the RTL8723D bring-up state machine over any [`HciLink`].
pub struct FirmwareLoader<'a, L, C> {
    link: L,
    clock: C,
    fw_path: &'a str,
    config_path: &'a str,
}

impl<'a, L: HciLink, C: Clock> FirmwareLoader<'a, L, C> {
    pub fn new(link: L, clock: C, fw_path: &'a str, config_path: &'a str) -> Self {
        FirmwareLoader { link, clock, fw_path, config_path }
    }

    fn command(&mut self, step: Step, opcode: u16, params: &[u8]) -> Result<Vec<u8>, FirmwareLoadError> {
        self.link.command(opcode, params).map_err(|reason| FirmwareLoadError::at(step, reason))
    }

    /// Run the full bring-up sequence, short-circuiting at step 2 if the
    /// controller is already running patched firmware.
    pub fn run(&mut self) -> Result<LoadOutcome, FirmwareLoadError> {
        info!("sending HCI_Reset");
        self.command(Step::InitialReset, OPCODE_RESET, &[])?;
        self.clock.sleep(Duration::from_millis(500));

        let version_event = self.command(Step::ReadVersion, OPCODE_READ_LOCAL_VERSION, &[])?;
        let version = parse_local_version(&version_event)?;
        if version.lmp_subversion == PATCHED_LMP_SUBVERSION {
            info!("controller already running patched firmware, nothing to do");
            return Ok(LoadOutcome::AlreadyPatched);
        }

        info!("entering vendor download mode");
        self.link
            .write_raw(&VENDOR_ENTER_DOWNLOAD)
            .map_err(|reason| FirmwareLoadError::at(Step::EnterDownloadMode, reason))?;
        self.clock.sleep(Duration::from_millis(100));

        let fw_bytes = std::fs::read(self.fw_path)
            .map_err(|e| FirmwareLoadError::at(Step::ParseFirmwareHeader, e.to_string()))?;
        let image = FirmwareImage::parse(&fw_bytes)?;
        info!(num_patches = image.header.num_patches, patch_length = image.header.patch_length, "parsed firmware header");

        for (index, chunk) in image.body.chunks(MAX_CHUNK_LEN).enumerate() {
            let mut params = Vec::with_capacity(3 + chunk.len());
            params.push(index as u8);
            params.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
            params.extend_from_slice(chunk);
            self.command(Step::StreamPatches, OPCODE_DOWNLOAD_FW, &params)?;
        }

        let config_bytes = std::fs::read(self.config_path)
            .map_err(|e| FirmwareLoadError::at(Step::LoadConfig, e.to_string()))?;
        self.command(Step::LoadConfig, OPCODE_DOWNLOAD_CONFIG, &config_bytes)?;

        info!("launching firmware");
        self.link
            .write_raw(&VENDOR_LAUNCH)
            .map_err(|reason| FirmwareLoadError::at(Step::LaunchFirmware, reason))?;
        self.clock.sleep(Duration::from_secs(2));

        self.command(Step::InitialReset, OPCODE_RESET, &[])?;
        self.clock.sleep(Duration::from_millis(500));

        let new_version_event = self.command(Step::VerifyVersion, OPCODE_READ_LOCAL_VERSION, &[])?;
        let new_version = parse_local_version(&new_version_event)?;
        if new_version.lmp_subversion == version.lmp_subversion {
            warn!("lmp_subversion unchanged after firmware load");
            return Err(FirmwareLoadError::at(Step::VerifyVersion, "version unchanged after firmware load"));
        }

        info!("firmware loaded successfully");
        Ok(LoadOutcome::Loaded)
    }

    /// Optional step 9: renegotiate to a higher baud rate and confirm the
    /// controller is still reachable afterward.
    pub fn renegotiate_baud(&mut self, new_baud: u32) -> Result<(), FirmwareLoadError> {
        self.command(Step::RenegotiateBaud, OPCODE_CHANGE_BAUD, &new_baud.to_le_bytes())?;
        self.clock.sleep(Duration::from_millis(100));
        self.link
            .set_baud(new_baud)
            .map_err(|reason| FirmwareLoadError::at(Step::RenegotiateBaud, reason))?;
        self.command(Step::RenegotiateBaud, OPCODE_READ_LOCAL_VERSION, &[])?;
        Ok(())
    }

    /// Optional step 10: route SCO over HCI and enable the full event mask.
    pub fn disable_esco_and_set_event_mask(&mut self) -> Result<(), FirmwareLoadError> {
        self.command(Step::DisableEscoAndSetEventMask, OPCODE_DISABLE_ESCO, &[0x00, 0x00])?;
        self.command(Step::DisableEscoAndSetEventMask, OPCODE_SET_EVENT_MASK, &[0xFF; 8])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopClock;
    impl Clock for NoopClock {
        fn sleep(&self, _d: Duration) {}
    }

    struct MockLink {
        lmp_subversion_before: u16,
        lmp_subversion_after: u16,
        commands_sent: Vec<u16>,
        raw_writes: Vec<Vec<u8>>,
        version_calls: usize,
    }

    fn version_event(lmp_subversion: u16) -> Vec<u8> {
        let mut event = vec![0u8; 14];
        event[12..14].copy_from_slice(&lmp_subversion.to_le_bytes());
        event
    }

    impl HciLink for MockLink {
        fn command(&mut self, opcode: u16, _params: &[u8]) -> Result<Vec<u8>, String> {
            self.commands_sent.push(opcode);
            if opcode == OPCODE_READ_LOCAL_VERSION {
                self.version_calls += 1;
                let lmp = if self.version_calls <= 1 { self.lmp_subversion_before } else { self.lmp_subversion_after };
                return Ok(version_event(lmp));
            }
            Ok(vec![0u8; 14])
        }

        fn write_raw(&mut self, bytes: &[u8]) -> Result<(), String> {
            self.raw_writes.push(bytes.to_vec());
            Ok(())
        }

        fn set_baud(&mut self, _baud: u32) -> Result<(), String> {
            Ok(())
        }
    }

    #[test]
    fn scenario_e_already_patched_short_circuits() {
        let link = MockLink {
            lmp_subversion_before: PATCHED_LMP_SUBVERSION,
            lmp_subversion_after: PATCHED_LMP_SUBVERSION,
            commands_sent: Vec::new(),
            raw_writes: Vec::new(),
            version_calls: 0,
        };
        let mut loader = FirmwareLoader::new(link, NoopClock, "/nonexistent/fw", "/nonexistent/cfg");
        let outcome = loader.run().unwrap();
        assert_eq!(outcome, LoadOutcome::AlreadyPatched);
        assert_eq!(loader.link.commands_sent, vec![OPCODE_RESET, OPCODE_READ_LOCAL_VERSION]);
        assert!(loader.link.raw_writes.is_empty(), "no vendor traffic should follow an already-patched version read");
    }

    #[test]
    fn firmware_header_parses_fixed_layout() {
        let mut blob = Vec::new();
        blob.extend_from_slice(SIGNATURE);
        blob.extend_from_slice(&7u16.to_le_bytes());
        blob.extend_from_slice(&3u16.to_le_bytes());
        blob.extend_from_slice(&9u32.to_le_bytes());
        blob.extend_from_slice(&[0xAB; 9]);

        let image = FirmwareImage::parse(&blob).unwrap();
        assert_eq!(image.header, FirmwareHeader { version: 7, num_patches: 3, patch_length: 9 });
        assert_eq!(image.body, &[0xAB; 9]);
    }

    #[test]
    fn rejects_bad_signature() {
        let blob = vec![0u8; 16];
        assert!(FirmwareImage::parse(&blob).is_err());
    }

    #[test]
    fn full_bring_up_streams_chunks_and_verifies_new_version() {
        let link = MockLink {
            lmp_subversion_before: 0x1234,
            lmp_subversion_after: PATCHED_LMP_SUBVERSION,
            commands_sent: Vec::new(),
            raw_writes: Vec::new(),
            version_calls: 0,
        };

        let dir = tempfile::tempdir().unwrap();
        let fw_path = dir.path().join("rtl8723d_fw");
        let cfg_path = dir.path().join("rtl8723d_config");

        let mut blob = Vec::new();
        blob.extend_from_slice(SIGNATURE);
        blob.extend_from_slice(&1u16.to_le_bytes());
        blob.extend_from_slice(&1u16.to_le_bytes());
        blob.extend_from_slice(&600u32.to_le_bytes());
        blob.extend_from_slice(&vec![0xAAu8; 600]);
        std::fs::write(&fw_path, &blob).unwrap();
        std::fs::write(&cfg_path, &[0x01, 0x02, 0x03]).unwrap();

        let mut loader = FirmwareLoader::new(
            link,
            NoopClock,
            fw_path.to_str().unwrap(),
            cfg_path.to_str().unwrap(),
        );
        let outcome = loader.run().unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded);

        let chunk_sends = loader.link.commands_sent.iter().filter(|&&op| op == OPCODE_DOWNLOAD_FW).count();
        assert_eq!(chunk_sends, 3, "600 bytes over a 252-byte chunk size needs 3 chunks");
        assert_eq!(loader.link.raw_writes, vec![VENDOR_ENTER_DOWNLOAD.to_vec(), VENDOR_LAUNCH.to_vec()]);
    }

    #[test]
    fn unchanged_version_after_load_is_an_error() {
        let link = MockLink {
            lmp_subversion_before: 0x1234,
            lmp_subversion_after: 0x1234,
            commands_sent: Vec::new(),
            raw_writes: Vec::new(),
            version_calls: 0,
        };
        let dir = tempfile::tempdir().unwrap();
        let fw_path = dir.path().join("rtl8723d_fw");
        let cfg_path = dir.path().join("rtl8723d_config");

        let mut blob = Vec::new();
        blob.extend_from_slice(SIGNATURE);
        blob.extend_from_slice(&1u16.to_le_bytes());
        blob.extend_from_slice(&1u16.to_le_bytes());
        blob.extend_from_slice(&4u32.to_le_bytes());
        blob.extend_from_slice(&[0xAA; 4]);
        std::fs::write(&fw_path, &blob).unwrap();
        std::fs::write(&cfg_path, &[0x01]).unwrap();

        let mut loader = FirmwareLoader::new(
            link,
            NoopClock,
            fw_path.to_str().unwrap(),
            cfg_path.to_str().unwrap(),
        );
        assert!(matches!(loader.run(), Err(FirmwareLoadError::Failed { step: Step::VerifyVersion, .. })));
    }
}
