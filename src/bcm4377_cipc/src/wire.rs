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

//! Wire formats shared with the firmware.
//!
//! Every structure here is read or written by the device through DMA and
//! must match the firmware layout bit for bit. Multi-byte fields hold their
//! little-endian representation; use the accessors rather than the raw
//! fields.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// Size of every control message carried by the control transfer ring.
pub const CONTROL_MSG_SIZE: usize = 0x34;

bitflags! {
    /// Per-entry flags of a transfer ring slot.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u8 {
        /// Payload lives in a separate buffer whose address is in the entry.
        const PAYLOAD_MAPPED    = 1 << 0;
        /// Payload directly follows the entry in the slot footer.
        const PAYLOAD_IN_FOOTER = 1 << 1;
    }
}

bitflags! {
    /// Transfer ring flags as announced in [`CreateTransferRingMsg`].
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RingWireFlags: u16 {
        /// No host-resident slots, the ring only tracks credit.
        const VIRTUAL = 1 << 7;
        /// The device does not expect doorbells for new entries.
        const SYNC    = 1 << 8;
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMsgType {
    CreateTransferRing = 1,
    CreateCompletionRing = 2,
    DestroyTransferRing = 3,
    DestroyCompletionRing = 4,
}

impl ControlMsgType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::CreateTransferRing),
            2 => Some(Self::CreateCompletionRing),
            3 => Some(Self::DestroyTransferRing),
            4 => Some(Self::DestroyCompletionRing),
            _ => None,
        }
    }
}

/// A transfer ring slot header.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct XferRingEntry {
    flags: u8,
    len: u16,
    _unk0: u8,
    payload: u64,
    id: u16,
    _unk1: [u8; 2],
}

const _: () = assert!(core::mem::size_of::<XferRingEntry>() == 16);
const _: () = assert!(core::mem::offset_of!(XferRingEntry, len) == 1);
const _: () = assert!(core::mem::offset_of!(XferRingEntry, payload) == 4);
const _: () = assert!(core::mem::offset_of!(XferRingEntry, id) == 12);

impl XferRingEntry {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// Entry whose payload sits in the slot footer.
    pub fn in_footer(raw_msgid: u16, len: u16) -> Self {
        Self {
            flags: EntryFlags::PAYLOAD_IN_FOOTER.bits(),
            len: len.to_le(),
            id: raw_msgid.to_le(),
            ..Self::zeroed()
        }
    }

    /// Entry whose payload lives at `payload` in a mapped buffer.
    pub fn mapped(raw_msgid: u16, len: u16, payload: u64) -> Self {
        Self {
            flags: EntryFlags::PAYLOAD_MAPPED.bits(),
            len: len.to_le(),
            payload: payload.to_le(),
            id: raw_msgid.to_le(),
            ..Self::zeroed()
        }
    }

    #[inline]
    pub fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn len(&self) -> u16 {
        u16::from_le(self.len)
    }

    #[inline]
    pub fn payload(&self) -> u64 {
        u64::from_le(self.payload)
    }

    #[inline]
    pub fn id(&self) -> u16 {
        u16::from_le(self.id)
    }
}

/// A completion ring slot header. Inline event data, if any, follows it.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct CompletionRingEntry {
    flags: u8,
    _unk0: u8,
    ring_id: u16,
    msg_id: u16,
    len: u32,
    _unk1: [u8; 6],
}

const _: () = assert!(core::mem::size_of::<CompletionRingEntry>() == 16);
const _: () = assert!(core::mem::offset_of!(CompletionRingEntry, ring_id) == 2);
const _: () = assert!(core::mem::offset_of!(CompletionRingEntry, msg_id) == 4);
const _: () = assert!(core::mem::offset_of!(CompletionRingEntry, len) == 6);

impl CompletionRingEntry {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn new(flags: EntryFlags, ring_id: u16, msg_id: u16, len: u32) -> Self {
        Self {
            flags: flags.bits(),
            ring_id: ring_id.to_le(),
            msg_id: msg_id.to_le(),
            len: len.to_le(),
            ..Self::zeroed()
        }
    }

    #[inline]
    pub fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn ring_id(&self) -> u16 {
        u16::from_le(self.ring_id)
    }

    #[inline]
    pub fn msg_id(&self) -> u16 {
        u16::from_le(self.msg_id)
    }

    #[inline]
    pub fn len(&self) -> u32 {
        u32::from_le(self.len)
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CreateCompletionRingMsg {
    msg_type: u8,
    header_size: u8,
    footer_size: u8,
    _unk0: u8,
    id: u16,
    id_again: u16,
    ring_iova: u64,
    n_elements: u16,
    unk: u32,
    _unk1: [u8; 6],
    msi: u16,
    intmod_delay: u16,
    intmod_bytes: u32,
    accum_delay: u16,
    accum_bytes: u32,
    _unk2: [u8; 10],
}

const _: () = assert!(core::mem::size_of::<CreateCompletionRingMsg>() == CONTROL_MSG_SIZE);
const _: () = assert!(core::mem::offset_of!(CreateCompletionRingMsg, ring_iova) == 8);
const _: () = assert!(core::mem::offset_of!(CreateCompletionRingMsg, intmod_delay) == 30);

impl CreateCompletionRingMsg {
    pub fn new(id: u16, ring_iova: u64, n_elements: u16, payload_size: usize, delay: u16) -> Self {
        Self {
            msg_type: ControlMsgType::CreateCompletionRing as u8,
            footer_size: (payload_size / 4) as u8,
            id: id.to_le(),
            id_again: id.to_le(),
            ring_iova: ring_iova.to_le(),
            n_elements: n_elements.to_le(),
            unk: 0xffff_ffffu32.to_le(),
            intmod_delay: delay.to_le(),
            intmod_bytes: 0xffff_ffffu32.to_le(),
            ..Self::zeroed()
        }
    }

    pub fn id(&self) -> u16 {
        u16::from_le(self.id)
    }

    pub fn id_again(&self) -> u16 {
        u16::from_le(self.id_again)
    }

    pub fn ring_iova(&self) -> u64 {
        u64::from_le(self.ring_iova)
    }

    pub fn n_elements(&self) -> u16 {
        u16::from_le(self.n_elements)
    }

    pub fn footer_size(&self) -> u8 {
        self.footer_size
    }

    pub fn intmod_delay(&self) -> u16 {
        u16::from_le(self.intmod_delay)
    }
}

/// Destroy message; the same layout serves both ring kinds.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DestroyRingMsg {
    msg_type: u8,
    _pad0: u8,
    ring_id: u16,
    _pad1: [u8; 48],
}

const _: () = assert!(core::mem::size_of::<DestroyRingMsg>() == CONTROL_MSG_SIZE);

impl DestroyRingMsg {
    pub fn completion(ring_id: u16) -> Self {
        Self::new(ControlMsgType::DestroyCompletionRing, ring_id)
    }

    pub fn transfer(ring_id: u16) -> Self {
        Self::new(ControlMsgType::DestroyTransferRing, ring_id)
    }

    fn new(kind: ControlMsgType, ring_id: u16) -> Self {
        Self {
            msg_type: kind as u8,
            ring_id: ring_id.to_le(),
            ..Self::zeroed()
        }
    }

    pub fn ring_id(&self) -> u16 {
        u16::from_le(self.ring_id)
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CreateTransferRingMsg {
    msg_type: u8,
    header_size: u8,
    footer_size: u8,
    _unk0: u8,
    ring_id: u16,
    ring_id_again: u16,
    ring_iova: u64,
    _unk1: [u8; 8],
    n_elements: u16,
    completion_ring_id: u16,
    doorbell: u16,
    flags: u16,
    _unk2: [u8; 20],
}

const _: () = assert!(core::mem::size_of::<CreateTransferRingMsg>() == CONTROL_MSG_SIZE);
const _: () = assert!(core::mem::offset_of!(CreateTransferRingMsg, n_elements) == 24);
const _: () = assert!(core::mem::offset_of!(CreateTransferRingMsg, flags) == 30);

/// Parameters of a [`CreateTransferRingMsg`].
#[derive(Debug, Clone, Copy)]
pub struct TransferRingParams {
    pub ring_id: u16,
    pub ring_iova: u64,
    pub n_elements: u16,
    pub completion_ring_id: u16,
    pub doorbell: u16,
    pub flags: RingWireFlags,
    pub payload_size: usize,
}

impl CreateTransferRingMsg {
    pub fn new(p: TransferRingParams) -> Self {
        Self {
            msg_type: ControlMsgType::CreateTransferRing as u8,
            footer_size: (p.payload_size / 4) as u8,
            ring_id: p.ring_id.to_le(),
            ring_id_again: p.ring_id.to_le(),
            ring_iova: p.ring_iova.to_le(),
            n_elements: p.n_elements.to_le(),
            completion_ring_id: p.completion_ring_id.to_le(),
            doorbell: p.doorbell.to_le(),
            flags: p.flags.bits().to_le(),
            ..Self::zeroed()
        }
    }

    pub fn ring_id(&self) -> u16 {
        u16::from_le(self.ring_id)
    }

    pub fn ring_id_again(&self) -> u16 {
        u16::from_le(self.ring_id_again)
    }

    pub fn ring_iova(&self) -> u64 {
        u64::from_le(self.ring_iova)
    }

    pub fn n_elements(&self) -> u16 {
        u16::from_le(self.n_elements)
    }

    pub fn completion_ring_id(&self) -> u16 {
        u16::from_le(self.completion_ring_id)
    }

    pub fn doorbell(&self) -> u16 {
        u16::from_le(self.doorbell)
    }

    pub fn flags(&self) -> RingWireFlags {
        RingWireFlags::from_bits_truncate(u16::from_le(self.flags))
    }

    pub fn footer_size(&self) -> u8 {
        self.footer_size
    }
}

/// The "Converged IPC" context handed to the firmware when RTI moves to
/// state 2.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Context {
    pub version: u16,
    pub size: u16,
    pub enabled_caps: u32,

    pub peripheral_info_addr: u64,

    pub completion_ring_heads_addr: u64,
    pub xfer_ring_tails_addr: u64,
    pub completion_ring_tails_addr: u64,
    pub xfer_ring_heads_addr: u64,
    pub n_completion_rings: u16,
    pub n_xfer_rings: u16,

    pub control_completion_ring_addr: u64,
    pub control_xfer_ring_addr: u64,
    pub control_xfer_ring_n_entries: u16,
    pub control_completion_ring_n_entries: u16,
    pub control_xfer_ring_doorbell: u16,
    pub control_completion_ring_doorbell: u16,
    pub control_xfer_ring_msi: u16,
    pub control_completion_ring_msi: u16,
    pub control_xfer_ring_header_size: u8,
    pub control_xfer_ring_footer_size: u8,
    pub control_completion_ring_header_size: u8,
    pub control_completion_ring_footer_size: u8,

    pub _unk0: u16,
    pub _unk1: u16,

    pub scratch_pad: u64,
    pub scratch_pad_size: u32,

    pub res: u32,
}

const _: () = assert!(core::mem::size_of::<Context>() == 0x68);
const _: () = assert!(core::mem::offset_of!(Context, n_completion_rings) == 48);
const _: () = assert!(core::mem::offset_of!(Context, control_completion_ring_addr) == 52);
const _: () = assert!(core::mem::offset_of!(Context, control_xfer_ring_footer_size) == 81);
const _: () = assert!(core::mem::offset_of!(Context, scratch_pad) == 88);

/// Vendor command carrying one chunk of a calibration blob.
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct CalibrationCmd {
    unk: u8,
    blocks_left: u16,
    data: [u8; CalibrationCmd::CHUNK],
}

const _: () = assert!(core::mem::size_of::<CalibrationCmd>() == 3 + 0xe6);

impl CalibrationCmd {
    pub const CHUNK: usize = 0xe6;

    pub fn new(blocks_left: u16, chunk: &[u8]) -> Self {
        let mut cmd = Self {
            unk: 0x03,
            blocks_left: blocks_left.to_le(),
            ..Self::zeroed()
        };
        let n = chunk.len().min(Self::CHUNK);
        cmd.data[..n].copy_from_slice(&chunk[..n]);
        cmd
    }
}

/// Vendor command carrying one chunk of a PTB blob.
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct PtbCmd {
    blocks_left: u16,
    data: [u8; PtbCmd::CHUNK],
}

const _: () = assert!(core::mem::size_of::<PtbCmd>() == 2 + 0xcf);

impl PtbCmd {
    pub const CHUNK: usize = 0xcf;

    pub fn new(blocks_left: u16, chunk: &[u8]) -> Self {
        let mut cmd = Self {
            blocks_left: blocks_left.to_le(),
            ..Self::zeroed()
        };
        let n = chunk.len().min(Self::CHUNK);
        cmd.data[..n].copy_from_slice(&chunk[..n]);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xfer_entry_bytes_are_little_endian() {
        let entry = XferRingEntry::mapped(0x0305, 0x0102, 0x1122_3344_5566_7788);
        let bytes = bytemuck::bytes_of(&entry);
        assert_eq!(bytes[0], EntryFlags::PAYLOAD_MAPPED.bits());
        assert_eq!(&bytes[1..3], &[0x02, 0x01]);
        assert_eq!(
            &bytes[4..12],
            &[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
        assert_eq!(&bytes[12..14], &[0x05, 0x03]);
    }

    #[test]
    fn completion_entry_from_device_bytes() {
        let mut raw = [0u8; 16];
        raw[0] = 0x01;
        raw[2..4].copy_from_slice(&6u16.to_le_bytes());
        raw[4..6].copy_from_slice(&0x0210u16.to_le_bytes());
        raw[6..10].copy_from_slice(&1028u32.to_le_bytes());
        let entry: CompletionRingEntry = bytemuck::pod_read_unaligned(&raw);
        assert!(entry.flags().contains(EntryFlags::PAYLOAD_MAPPED));
        assert_eq!(entry.ring_id(), 6);
        assert_eq!(entry.msg_id(), 0x0210);
        assert_eq!(entry.len(), 1028);
    }

    #[test]
    fn create_completion_ring_fields() {
        let msg = CreateCompletionRingMsg::new(2, 0xdead_0000, 256, 260, 1000);
        let bytes = bytemuck::bytes_of(&msg);
        assert_eq!(bytes[0], ControlMsgType::CreateCompletionRing as u8);
        assert_eq!(bytes[2], 65);
        assert_eq!(&bytes[4..8], &[2, 0, 2, 0]);
        assert_eq!(&bytes[16..18], &256u16.to_le_bytes());
        assert_eq!(&bytes[18..22], &[0xff; 4]);
        assert_eq!(&bytes[30..32], &1000u16.to_le_bytes());
        assert_eq!(&bytes[32..36], &[0xff; 4]);
    }

    #[test]
    fn create_transfer_ring_fields() {
        let msg = CreateTransferRingMsg::new(TransferRingParams {
            ring_id: 4,
            ring_iova: 0,
            n_elements: 128,
            completion_ring_id: 4,
            doorbell: 6,
            flags: RingWireFlags::VIRTUAL | RingWireFlags::SYNC,
            payload_size: 0,
        });
        let bytes = bytemuck::bytes_of(&msg);
        assert_eq!(bytes[0], ControlMsgType::CreateTransferRing as u8);
        assert_eq!(&bytes[24..26], &128u16.to_le_bytes());
        assert_eq!(&bytes[28..30], &6u16.to_le_bytes());
        assert_eq!(&bytes[30..32], &0x0180u16.to_le_bytes());
        assert_eq!(msg.flags(), RingWireFlags::VIRTUAL | RingWireFlags::SYNC);
    }

    #[test]
    fn calibration_chunk_is_zero_padded() {
        let cmd = CalibrationCmd::new(1, &[0xaa; 10]);
        let bytes = bytemuck::bytes_of(&cmd);
        assert_eq!(&bytes[..3], &[0x03, 0x01, 0x00]);
        assert!(bytes[3..13].iter().all(|b| *b == 0xaa));
        assert!(bytes[13..].iter().all(|b| *b == 0));
    }
}
