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

//! Register map and the thin doorbell/status interface on top of [`Bus`].

use tracing::debug;

use crate::bus::{Bar, Bus};
use crate::mem::DmaBuffer;

pub(crate) const BAR0_FW_DOORBELL: u32 = 0x140;
pub(crate) const BAR0_RTI_CONTROL: u32 = 0x144;
pub(crate) const BAR0_DOORBELL: u32 = 0x174;
pub(crate) const BAR0_HOST_WINDOW_LO: u32 = 0x590;
pub(crate) const BAR0_HOST_WINDOW_HI: u32 = 0x594;
pub(crate) const BAR0_HOST_WINDOW_SIZE: u32 = 0x598;

pub(crate) const BAR2_BOOTSTAGE: u32 = 0x200454;
pub(crate) const BAR2_FW_LO: u32 = 0x200478;
pub(crate) const BAR2_FW_HI: u32 = 0x20047c;
pub(crate) const BAR2_FW_SIZE: u32 = 0x200480;
pub(crate) const BAR2_CONTEXT_ADDR_LO: u32 = 0x20048c;
pub(crate) const BAR2_CONTEXT_ADDR_HI: u32 = 0x200450;
pub(crate) const BAR2_RTI_STATUS: u32 = 0x20045c;
pub(crate) const BAR2_RTI_WINDOW_LO: u32 = 0x200494;
pub(crate) const BAR2_RTI_WINDOW_HI: u32 = 0x200498;
pub(crate) const BAR2_RTI_WINDOW_SIZE: u32 = 0x20049c;

/// Size of the host address window the firmware may reach.
pub(crate) const DMA_MASK: u32 = 0xfffffe00;

const DOORBELL_VALUE_SHIFT: u32 = 16;
const DOORBELL_IDX_SHIFT: u32 = 8;
const DOORBELL_RING: u32 = 1 << 5;

/// Doorbell indices. They are fixed by the firmware; both SCO rings share
/// one.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Doorbell {
    Control = 0,
    HciH2d = 1,
    HciD2h = 2,
    AclH2d = 3,
    AclD2h = 4,
    Sco = 6,
}

/// Encode a doorbell register write for `doorbell` announcing `val`.
#[inline]
pub const fn doorbell_value(doorbell: Doorbell, val: u16) -> u32 {
    ((val as u32) << DOORBELL_VALUE_SHIFT)
        | ((doorbell as u32) << DOORBELL_IDX_SHIFT)
        | DOORBELL_RING
}

/// Register-level operations. Stateless: every call is a single MMIO
/// access or a fixed sequence of them.
pub(crate) struct Registers<'a, B: Bus> {
    bus: &'a B,
}

impl<'a, B: Bus> Registers<'a, B> {
    pub(crate) fn new(bus: &'a B) -> Self {
        Self { bus }
    }

    pub(crate) fn ring_doorbell(&self, doorbell: Doorbell, val: u16) {
        let db = doorbell_value(doorbell, val);
        debug!("write {} to doorbell #{} ({:#x})", val, doorbell as u8, db);
        self.bus.write32(Bar::Bar0, BAR0_DOORBELL, db);
    }

    pub(crate) fn bootstage(&self) -> u32 {
        self.bus.read32(Bar::Bar2, BAR2_BOOTSTAGE)
    }

    pub(crate) fn rti_status(&self) -> u32 {
        self.bus.read32(Bar::Bar2, BAR2_RTI_STATUS)
    }

    pub(crate) fn rti_control(&self, state: u32) {
        self.bus.write32(Bar::Bar0, BAR0_RTI_CONTROL, state);
    }

    /// Let the firmware reach the whole host address window.
    pub(crate) fn open_host_window(&self) {
        self.bus.write32(Bar::Bar0, BAR0_HOST_WINDOW_LO, 0);
        self.bus.write32(Bar::Bar0, BAR0_HOST_WINDOW_HI, 0);
        self.bus.write32(Bar::Bar0, BAR0_HOST_WINDOW_SIZE, DMA_MASK);
    }

    pub(crate) fn open_rti_window(&self) {
        self.bus.write32(Bar::Bar2, BAR2_RTI_WINDOW_LO, 0);
        self.bus.write32(Bar::Bar2, BAR2_RTI_WINDOW_HI, 0);
        self.bus.write32(Bar::Bar2, BAR2_RTI_WINDOW_SIZE, DMA_MASK);
    }

    /// Point the boot ROM at the firmware image and kick it.
    pub(crate) fn start_firmware(&self, image: &DmaBuffer) {
        self.bus.write32(Bar::Bar2, BAR2_FW_LO, image.lo32());
        self.bus.write32(Bar::Bar2, BAR2_FW_HI, image.hi32());
        self.bus.write32(Bar::Bar2, BAR2_FW_SIZE, image.len as u32);
        self.bus.write32(Bar::Bar0, BAR0_FW_DOORBELL, 0);
    }

    pub(crate) fn set_context(&self, context: &DmaBuffer) {
        self.bus.write32(Bar::Bar2, BAR2_CONTEXT_ADDR_LO, context.lo32());
        self.bus.write32(Bar::Bar2, BAR2_CONTEXT_ADDR_HI, context.hi32());
    }
}
