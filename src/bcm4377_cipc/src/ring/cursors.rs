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

//! The shared ring state block.
//!
//! A single DMA allocation holds the head and tail cursor of every ring.
//! The host owns transfer ring heads and completion ring tails; the device
//! owns the other half. [`HostCursors`] and [`DeviceCursors`] are the two
//! views over the block and each only writes the fields its side owns.
//! Fields written by the other side are always read with acquire
//! semantics and fields handed to the other side are published with
//! release semantics.

use crate::error::Result;
use crate::mem::{DmaBuffer, MemOps, MemOpsExt};
use crate::ring::{CompletionRingId, N_COMPLETION_RINGS, N_TRANSFER_RINGS, TransferRingId};

const COMPLETION_HEAD: usize = 0;
const COMPLETION_TAIL: usize = COMPLETION_HEAD + 2 * N_COMPLETION_RINGS;
const XFER_HEAD: usize = COMPLETION_TAIL + 2 * N_COMPLETION_RINGS;
const XFER_TAIL: usize = XFER_HEAD + 2 * N_TRANSFER_RINGS;

/// Size in bytes of the ring state block.
pub const STATE_SIZE: usize = XFER_TAIL + 2 * N_TRANSFER_RINGS;

const _: () = assert!(STATE_SIZE == 60);

/// Location of the ring state block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorBlock {
    buf: DmaBuffer,
}

impl CursorBlock {
    pub fn new(buf: DmaBuffer) -> Self {
        debug_assert!(buf.len >= STATE_SIZE);
        Self { buf }
    }

    pub fn buf(&self) -> DmaBuffer {
        self.buf
    }

    pub fn completion_heads_addr(&self) -> u64 {
        self.buf.at(COMPLETION_HEAD)
    }

    pub fn completion_tails_addr(&self) -> u64 {
        self.buf.at(COMPLETION_TAIL)
    }

    pub fn xfer_heads_addr(&self) -> u64 {
        self.buf.at(XFER_HEAD)
    }

    pub fn xfer_tails_addr(&self) -> u64 {
        self.buf.at(XFER_TAIL)
    }

    pub fn host<'a, M: MemOps>(&self, mem: &'a M) -> HostCursors<'a, M> {
        HostCursors { mem, block: *self }
    }

    pub fn device<'a, M: MemOps>(&self, mem: &'a M) -> DeviceCursors<'a, M> {
        DeviceCursors { mem, block: *self }
    }

    #[inline]
    fn xfer_head(&self, ring: TransferRingId) -> u64 {
        self.xfer_heads_addr() + 2 * ring.index() as u64
    }

    #[inline]
    fn xfer_tail(&self, ring: TransferRingId) -> u64 {
        self.xfer_tails_addr() + 2 * ring.index() as u64
    }

    #[inline]
    fn completion_head(&self, ring: CompletionRingId) -> u64 {
        self.completion_heads_addr() + 2 * ring.index() as u64
    }

    #[inline]
    fn completion_tail(&self, ring: CompletionRingId) -> u64 {
        self.completion_tails_addr() + 2 * ring.index() as u64
    }
}

/// The host's view of the ring state block.
pub struct HostCursors<'a, M: MemOps> {
    mem: &'a M,
    block: CursorBlock,
}

impl<M: MemOps> HostCursors<'_, M> {
    /// Host-owned; the last value this side published.
    pub fn xfer_head(&self, ring: TransferRingId) -> Result<u16> {
        let raw: u16 = self.mem.get(self.block.xfer_head(ring))?;
        Ok(u16::from_le(raw))
    }

    pub fn publish_xfer_head(&self, ring: TransferRingId, head: u16) -> Result<()> {
        self.mem.release16(self.block.xfer_head(ring), head.to_le())
    }

    pub fn xfer_tail(&self, ring: TransferRingId) -> Result<u16> {
        Ok(u16::from_le(self.mem.acquire16(self.block.xfer_tail(ring))?))
    }

    pub fn completion_head(&self, ring: CompletionRingId) -> Result<u16> {
        Ok(u16::from_le(
            self.mem.acquire16(self.block.completion_head(ring))?,
        ))
    }

    /// Host-owned; the last value this side published.
    pub fn completion_tail(&self, ring: CompletionRingId) -> Result<u16> {
        let raw: u16 = self.mem.get(self.block.completion_tail(ring))?;
        Ok(u16::from_le(raw))
    }

    pub fn publish_completion_tail(&self, ring: CompletionRingId, tail: u16) -> Result<()> {
        self.mem
            .release16(self.block.completion_tail(ring), tail.to_le())
    }

    /// Zero both cursors of a transfer ring. Only valid while the device
    /// does not know the ring, i.e. before its create message is sent.
    pub fn reset_transfer(&self, ring: TransferRingId) -> Result<()> {
        self.mem.release16(self.block.xfer_tail(ring), 0)?;
        self.mem.release16(self.block.xfer_head(ring), 0)
    }

    /// Zero both cursors of a completion ring. Same restriction as
    /// [`HostCursors::reset_transfer`].
    pub fn reset_completion(&self, ring: CompletionRingId) -> Result<()> {
        self.mem.release16(self.block.completion_head(ring), 0)?;
        self.mem.release16(self.block.completion_tail(ring), 0)
    }
}

/// The device's view of the ring state block. Only a device model (or a
/// test standing in for one) has a use for it.
pub struct DeviceCursors<'a, M: MemOps> {
    mem: &'a M,
    block: CursorBlock,
}

impl<M: MemOps> DeviceCursors<'_, M> {
    pub fn xfer_head(&self, ring: TransferRingId) -> Result<u16> {
        Ok(u16::from_le(self.mem.acquire16(self.block.xfer_head(ring))?))
    }

    pub fn xfer_tail(&self, ring: TransferRingId) -> Result<u16> {
        let raw: u16 = self.mem.get(self.block.xfer_tail(ring))?;
        Ok(u16::from_le(raw))
    }

    pub fn publish_xfer_tail(&self, ring: TransferRingId, tail: u16) -> Result<()> {
        self.mem.release16(self.block.xfer_tail(ring), tail.to_le())
    }

    pub fn completion_head(&self, ring: CompletionRingId) -> Result<u16> {
        let raw: u16 = self.mem.get(self.block.completion_head(ring))?;
        Ok(u16::from_le(raw))
    }

    pub fn publish_completion_head(&self, ring: CompletionRingId, head: u16) -> Result<()> {
        self.mem
            .release16(self.block.completion_head(ring), head.to_le())
    }

    pub fn completion_tail(&self, ring: CompletionRingId) -> Result<u16> {
        Ok(u16::from_le(
            self.mem.acquire16(self.block.completion_tail(ring))?,
        ))
    }
}
