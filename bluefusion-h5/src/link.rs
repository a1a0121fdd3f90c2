use std::io::{Read, Write};

use crate::firmware::HciLink;
use crate::frame::{FrameType, H5Transport};

/// Production [`HciLink`] backed by a real [`H5Transport`]. Raw writes for
/// the enter-download and launch-firmware vendor sequences bypass H5
/// framing entirely, matching the bring-up sequence's literal wording;
/// `set_baud` is supplied by the
/// caller since reconfiguring a live serial port is outside H5Transport's
/// concern.
pub struct H5Link<T, S> {
    transport: H5Transport<T>,
    set_baud: S,
}

impl<T: Read + Write, S: FnMut(u32) -> std::io::Result<()>> H5Link<T, S> {
    pub fn new(io: T, set_baud: S) -> Self {
        H5Link { transport: H5Transport::new(io), set_baud }
    }
}

impl<T: Read + Write, S: FnMut(u32) -> std::io::Result<()>> HciLink for H5Link<T, S> {
    fn command(&mut self, opcode: u16, params: &[u8]) -> Result<Vec<u8>, String> {
        let mut payload = Vec::with_capacity(3 + params.len());
        payload.extend_from_slice(&opcode.to_le_bytes());
        payload.push(params.len() as u8);
        payload.extend_from_slice(params);

        self.transport
            .send(FrameType::HciCommand, true, &payload)
            .map_err(|e| e.to_string())?;

        loop {
            let frame = self.transport.recv().map_err(|e| e.to_string())?;
            if frame.ty == FrameType::Event {
                return Ok(frame.payload);
            }
        }
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.transport.write_raw(bytes).map_err(|e| e.to_string())
    }

    fn set_baud(&mut self, baud: u32) -> Result<(), String> {
        (self.set_baud)(baud).map_err(|e| e.to_string())
    }
}
