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

//! The bus collaborator: register windows, config space and coherent DMA
//! allocations of the PCIe function the controller sits behind.

use crate::error::Result;
use crate::mem::{DmaBuffer, MemOps};

/// One of the two memory BARs the controller exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bar {
    /// Doorbells, RTI control and the host DMA window
    Bar0,
    /// Boot stage, RTI status, firmware and context addresses
    Bar2,
}

/// Result of an interrupt handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt was not raised by this device
    None,
    /// The interrupt was handled
    Handled,
}

/// Platform services the transport needs from the PCIe function.
///
/// Register accessors must not be reordered with respect to each other or
/// to accesses made through [`Bus::mem`], matching MMIO semantics.
pub trait Bus: Send + Sync {
    type Mem: MemOps + Send + Sync;

    /// Accessor for memory returned by [`Bus::alloc_dma`].
    fn mem(&self) -> &Self::Mem;

    /// Allocate `len` bytes of zeroed, device-visible coherent memory.
    fn alloc_dma(&self, len: usize) -> Result<DmaBuffer>;

    /// Return an allocation made by [`Bus::alloc_dma`].
    fn free_dma(&self, buf: DmaBuffer);

    fn read32(&self, bar: Bar, offset: u32) -> u32;

    fn write32(&self, bar: Bar, offset: u32, val: u32);

    fn read_config(&self, offset: u32) -> Result<u32>;

    fn write_config(&self, offset: u32, val: u32) -> Result<()>;
}

/// A DMA allocation that is handed back to the bus when dropped, unless
/// dismissed.
pub(crate) struct DmaGuard<'a, B: Bus + ?Sized> {
    bus: &'a B,
    buf: DmaBuffer,
    armed: bool,
}

impl<'a, B: Bus + ?Sized> DmaGuard<'a, B> {
    pub(crate) fn alloc(bus: &'a B, len: usize) -> Result<Self> {
        let buf = bus.alloc_dma(len)?;
        Ok(Self {
            bus,
            buf,
            armed: true,
        })
    }

    /// Keep the allocation alive past the guard.
    pub(crate) fn dismiss(mut self) -> DmaBuffer {
        self.armed = false;
        self.buf
    }
}

impl<B: Bus + ?Sized> core::ops::Deref for DmaGuard<'_, B> {
    type Target = DmaBuffer;

    fn deref(&self) -> &DmaBuffer {
        &self.buf
    }
}

impl<B: Bus + ?Sized> Drop for DmaGuard<'_, B> {
    fn drop(&mut self) {
        if self.armed {
            self.bus.free_dma(self.buf)
        }
    }
}
