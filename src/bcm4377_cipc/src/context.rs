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

//! The context block: the one structure the firmware reads to find the
//! ring state block and the control rings.

use bytemuck::Zeroable;

use crate::bus::{Bus, DmaGuard};
use crate::error::Result;
use crate::invalid_arg;
use crate::mem::{DmaBuffer, MemOpsExt};
use crate::ring::{CompletionRing, CursorBlock, N_COMPLETION_RINGS, N_TRANSFER_RINGS, TransferRing};
use crate::wire::Context;

const CONTEXT_VERSION: u16 = 1;
const CONTEXT_CAPS: u32 = 2;
/// The firmware writes this many bytes of undocumented peripheral data.
const PERIPHERAL_INFO_SIZE: usize = 0x20;
const NO_DOORBELL: u16 = 0xffff;

/// Fill in a context for the given rings.
pub fn build_context(
    cursors: &CursorBlock,
    peripheral_info: &DmaBuffer,
    control_ack: &CompletionRing,
    control: &TransferRing,
) -> Result<Context> {
    let Some(control_slots) = control.slots() else {
        return Err(invalid_arg!("control ring has no slots"));
    };
    let control_cfg = control.config();

    Ok(Context {
        version: CONTEXT_VERSION.to_le(),
        size: (core::mem::size_of::<Context>() as u16).to_le(),
        enabled_caps: CONTEXT_CAPS.to_le(),
        peripheral_info_addr: peripheral_info.addr.to_le(),

        completion_ring_heads_addr: cursors.completion_heads_addr().to_le(),
        xfer_ring_tails_addr: cursors.xfer_tails_addr().to_le(),
        completion_ring_tails_addr: cursors.completion_tails_addr().to_le(),
        xfer_ring_heads_addr: cursors.xfer_heads_addr().to_le(),
        n_completion_rings: (N_COMPLETION_RINGS as u16).to_le(),
        n_xfer_rings: (N_TRANSFER_RINGS as u16).to_le(),

        control_completion_ring_addr: control_ack.slots().addr.to_le(),
        control_completion_ring_n_entries: control_ack.config().n_entries.to_le(),
        control_completion_ring_doorbell: NO_DOORBELL.to_le(),

        control_xfer_ring_addr: control_slots.addr.to_le(),
        control_xfer_ring_n_entries: control_cfg.n_entries.to_le(),
        control_xfer_ring_doorbell: (control_cfg.doorbell as u16).to_le(),
        control_xfer_ring_footer_size: (control_cfg.payload_size / 4) as u8,

        ..Context::zeroed()
    })
}

/// DMA home of the context and of the peripheral info scratch buffer.
pub(crate) struct ContextBlock {
    context: DmaBuffer,
    peripheral_info: DmaBuffer,
}

impl ContextBlock {
    pub(crate) fn alloc<B: Bus>(
        bus: &B,
        cursors: &CursorBlock,
        control_ack: &CompletionRing,
        control: &TransferRing,
    ) -> Result<Self> {
        let context = DmaGuard::alloc(bus, core::mem::size_of::<Context>())?;
        let peripheral_info = DmaGuard::alloc(bus, PERIPHERAL_INFO_SIZE)?;

        let ctx = build_context(cursors, &peripheral_info, control_ack, control)?;
        bus.mem().put(context.addr, ctx)?;

        Ok(Self {
            context: context.dismiss(),
            peripheral_info: peripheral_info.dismiss(),
        })
    }

    pub(crate) fn context(&self) -> &DmaBuffer {
        &self.context
    }

    pub(crate) fn free<B: Bus>(&self, bus: &B) {
        bus.free_dma(self.peripheral_info);
        bus.free_dma(self.context);
    }
}
