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

//! Transfer and completion rings.
//!
//! Transfer rings carry host-to-device messages (and, for the `d2h` rings,
//! the credit the device needs to produce data). Completion rings carry
//! device-to-host acknowledgements and inbound data; each completion entry
//! names the transfer ring it belongs to and the interrupt dispatcher
//! routes it there.

use std::time::Duration;

use tracing::error;

use crate::bus::Bus;
use crate::error::{CipcError, Result};
use crate::hci::HciPacketType;
use crate::regs::Registers;

pub mod completion;
pub mod cursors;
pub mod transfer;

pub use completion::{CompletionRing, CompletionRingConfig, TransferRingSet};
pub use cursors::{CursorBlock, DeviceCursors, HostCursors};
pub use transfer::{TransferRing, TransferRingConfig, TransferRingFlags};

/// Number of transfer ring cursors the firmware expects in the state block.
pub const N_TRANSFER_RINGS: usize = 9;
/// Number of completion ring cursors the firmware expects in the state block.
pub const N_COMPLETION_RINGS: usize = 6;
pub const MAX_RING_SIZE: u16 = 256;
/// Largest payload that fits in a slot footer.
pub const MAX_INPLACE_PAYLOAD_SIZE: usize = 4 * 0xff;

/// Transfer ring ids, fixed by the firmware.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferRingId {
    Control = 0,
    HciH2d = 1,
    HciD2h = 2,
    ScoH2d = 3,
    ScoD2h = 4,
    AclH2d = 5,
    AclD2h = 6,
}

impl TransferRingId {
    pub const ALL: [TransferRingId; 7] = [
        TransferRingId::Control,
        TransferRingId::HciH2d,
        TransferRingId::HciD2h,
        TransferRingId::ScoH2d,
        TransferRingId::ScoD2h,
        TransferRingId::AclH2d,
        TransferRingId::AclD2h,
    ];

    pub fn from_raw(raw: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|id| *id as u16 == raw)
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TransferRingId::Control => "control",
            TransferRingId::HciH2d => "hci-h2d",
            TransferRingId::HciD2h => "hci-d2h",
            TransferRingId::ScoH2d => "sco-h2d",
            TransferRingId::ScoD2h => "sco-d2h",
            TransferRingId::AclH2d => "acl-h2d",
            TransferRingId::AclD2h => "acl-d2h",
        }
    }

    /// The packet type of data the device produces on this ring, or `None`
    /// for host-to-device rings, whose completions are acknowledgements.
    pub fn event_type(self) -> Option<HciPacketType> {
        match self {
            TransferRingId::HciD2h => Some(HciPacketType::Event),
            TransferRingId::AclD2h => Some(HciPacketType::AclData),
            TransferRingId::ScoD2h => Some(HciPacketType::ScoData),
            TransferRingId::Control
            | TransferRingId::HciH2d
            | TransferRingId::ScoH2d
            | TransferRingId::AclH2d => None,
        }
    }
}

/// Completion ring ids, fixed by the firmware. HCI and ACL traffic share
/// rings.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionRingId {
    ControlAck = 0,
    HciAclAck = 1,
    HciAclEvent = 2,
    ScoAck = 3,
    ScoEvent = 4,
}

impl CompletionRingId {
    pub const ALL: [CompletionRingId; 5] = [
        CompletionRingId::ControlAck,
        CompletionRingId::HciAclAck,
        CompletionRingId::HciAclEvent,
        CompletionRingId::ScoAck,
        CompletionRingId::ScoEvent,
    ];

    pub fn from_raw(raw: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|id| *id as u16 == raw)
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            CompletionRingId::ControlAck => "control-ack",
            CompletionRingId::HciAclAck => "hci/acl-ack",
            CompletionRingId::HciAclEvent => "hci/acl-event",
            CompletionRingId::ScoAck => "sco-ack",
            CompletionRingId::ScoEvent => "sco-event",
        }
    }
}

/// Host-side lifecycle of a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingStatus {
    Unconfigured,
    Creating,
    Enabled,
    Destroying,
}

impl RingStatus {
    pub fn name(self) -> &'static str {
        match self {
            RingStatus::Unconfigured => "unconfigured",
            RingStatus::Creating => "creating",
            RingStatus::Enabled => "enabled",
            RingStatus::Destroying => "destroying",
        }
    }
}

/// Everything a ring operation touches besides the ring itself.
pub(crate) struct RingIo<'a, B: Bus> {
    pub(crate) bus: &'a B,
    pub(crate) cursors: CursorBlock,
    /// Bound on a blocking send
    pub(crate) timeout: Duration,
}

impl<'a, B: Bus> RingIo<'a, B> {
    pub(crate) fn new(bus: &'a B, cursors: CursorBlock, timeout: Duration) -> Self {
        Self {
            bus,
            cursors,
            timeout,
        }
    }

    #[inline]
    pub(crate) fn mem(&self) -> &'a B::Mem {
        self.bus.mem()
    }

    #[inline]
    pub(crate) fn host(&self) -> HostCursors<'a, B::Mem> {
        self.cursors.host(self.bus.mem())
    }

    #[inline]
    pub(crate) fn regs(&self) -> Registers<'a, B> {
        Registers::new(self.bus)
    }
}

/// Checks a position read from the ring state block before it is used to
/// index a ring of `n_entries` slots.
pub(crate) fn checked_cursor(
    ring: &'static str,
    cursor: &'static str,
    value: u16,
    n_entries: u16,
) -> Result<u16> {
    if value < n_entries {
        return Ok(value);
    }
    error!("ring {ring}: {cursor} {value} is outside the ring ({n_entries} entries)");
    Err(CipcError::CorruptCursor {
        ring,
        cursor,
        value,
        n_entries,
    })
}

/// The slot after `pos` in a ring of `n_entries` slots.
#[inline]
pub(crate) fn next_slot(pos: u16, n_entries: u16) -> u16 {
    pos.wrapping_add(1) % n_entries
}

#[inline]
pub(crate) const fn align4(n: usize) -> usize {
    (n + 3) & !3
}
