/*
Copyright 2026  The bcm4377-cipc Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! The seam towards the Bluetooth HCI stack.
//!
//! Outbound frames enter through [`Bcm4377::send`](crate::Bcm4377::send),
//! inbound frames leave through an [`HciSink`]. Vendor commands issued
//! during setup go through the stack's synchronous command path, modelled
//! by [`HciCommandSender`].

use bytes::Bytes;
use tracing::{debug, error};

use crate::error::Result;
use crate::invalid_arg;
use crate::wire::{CalibrationCmd, PtbCmd};

pub const OP_SEND_CALIBRATION: u16 = 0xfd97;
pub const OP_SEND_PTB: u16 = 0xfd98;
pub const OP_SEND_PTB_CHUNK: u16 = 0xfe0d;
pub const OP_SET_BDADDR: u16 = 0xfc01;

/// HCI packet indicator.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HciPacketType {
    Command = 0x01,
    AclData = 0x02,
    ScoData = 0x03,
    Event = 0x04,
    IsoData = 0x05,
}

impl HciPacketType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::Command),
            0x02 => Some(Self::AclData),
            0x03 => Some(Self::ScoData),
            0x04 => Some(Self::Event),
            0x05 => Some(Self::IsoData),
            _ => None,
        }
    }

    /// Label used in logs and metrics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Command => "cmd",
            Self::AclData => "acl",
            Self::ScoData => "sco",
            Self::Event => "event",
            Self::IsoData => "iso",
        }
    }
}

/// Receives frames produced by the controller.
///
/// Called from the interrupt path; implementations must not block.
pub trait HciSink: Send + Sync {
    fn receive(&self, kind: HciPacketType, frame: Bytes);
}

/// Synchronous HCI command execution, provided by the HCI stack.
pub trait HciCommandSender {
    /// Issue `opcode` with `params` and wait for its completion. Returns
    /// the return parameters of the command complete event.
    fn command_sync(&self, opcode: u16, params: &[u8]) -> Result<Bytes>;
}

fn command(sender: &dyn HciCommandSender, opcode: u16, params: &[u8]) -> Result<()> {
    sender.command_sync(opcode, params).map(drop).inspect_err(|e| {
        error!("command {:#06x} failed: {}", opcode, e);
    })
}

/// Blocks of `chunk` bytes needed for `len` bytes, minus one: the value
/// the first chunk carries in its `blocks_left` field.
fn first_blocks_left(len: usize, chunk: usize) -> Result<u16> {
    u16::try_from(len.div_ceil(chunk).saturating_sub(1))
        .map_err(|_| invalid_arg!("{len} byte blob needs too many chunks"))
}

/// Upload a calibration blob in vendor-command sized chunks.
pub fn send_calibration(sender: &dyn HciCommandSender, blob: &[u8]) -> Result<()> {
    let mut blocks_left = first_blocks_left(blob.len(), CalibrationCmd::CHUNK)?;

    for chunk in blob.chunks(CalibrationCmd::CHUNK) {
        debug!(
            "sending calibration chunk, {} chunks and {} bytes left",
            blocks_left,
            chunk.len() + blocks_left as usize * CalibrationCmd::CHUNK
        );
        let cmd = CalibrationCmd::new(blocks_left, chunk);
        command(sender, OP_SEND_CALIBRATION, bytemuck::bytes_of(&cmd))?;
        blocks_left = blocks_left.saturating_sub(1);
    }
    Ok(())
}

/// Upload a PTB blob with a single vendor command.
pub fn send_ptb(sender: &dyn HciCommandSender, blob: &[u8]) -> Result<()> {
    command(sender, OP_SEND_PTB, blob)
}

/// Upload a PTB blob in chunks.
pub fn send_ptb_chunked(sender: &dyn HciCommandSender, blob: &[u8]) -> Result<()> {
    let mut blocks_left = first_blocks_left(blob.len(), PtbCmd::CHUNK)?;

    for chunk in blob.chunks(PtbCmd::CHUNK) {
        debug!("sending ptb chunk, {} chunks left", blocks_left);
        let cmd = PtbCmd::new(blocks_left, chunk);
        command(sender, OP_SEND_PTB_CHUNK, bytemuck::bytes_of(&cmd))?;
        blocks_left = blocks_left.saturating_sub(1);
    }
    Ok(())
}

/// Program the public device address. `bdaddr` is in HCI byte order.
pub fn set_bdaddr(sender: &dyn HciCommandSender, bdaddr: &[u8; 6]) -> Result<()> {
    command(sender, OP_SET_BDADDR, bdaddr)
}
