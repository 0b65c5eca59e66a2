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

//! DMA memory access.
//!
//! Every byte the transport shares with the controller (ring slots, payload
//! pools, the ring state block, the context block) is reached through
//! [`MemOps`], addressed by the device-visible bus address of the
//! allocation. Keeping the access behind a trait lets the same ring code
//! run against a real coherent DMA mapping or an in-process fake.

use bytemuck::Pod;

use crate::error::{CipcError, Result};

/// Backend-provided access to coherent DMA memory.
///
/// Implementations must ensure that:
/// - addresses handed out by [`Bus::alloc_dma`](crate::bus::Bus::alloc_dma)
///   stay valid until freed
/// - the acquire/release accessors provide the documented ordering against
///   every other access made through the same backend
pub trait MemOps {
    type Error: core::fmt::Debug;

    /// Read `dst.len()` bytes starting at `addr`.
    fn read(&self, addr: u64, dst: &mut [u8]) -> core::result::Result<usize, Self::Error>;

    /// Write `src` starting at `addr`.
    fn write(&self, addr: u64, src: &[u8]) -> core::result::Result<usize, Self::Error>;

    /// Load a u16 with acquire semantics.
    ///
    /// `addr` must be 2-byte aligned. Used for cursors the device publishes.
    fn load_acquire(&self, addr: u64) -> core::result::Result<u16, Self::Error>;

    /// Store a u16 with release semantics.
    ///
    /// `addr` must be 2-byte aligned. Every write made before this call is
    /// visible to the device once the new value is.
    fn store_release(&self, addr: u64, val: u16) -> core::result::Result<(), Self::Error>;

    /// Read a Pod type at the given address.
    fn read_val<T: Pod>(&self, addr: u64) -> core::result::Result<T, Self::Error> {
        let mut val = T::zeroed();
        let bytes = bytemuck::bytes_of_mut(&mut val);

        self.read(addr, bytes)?;
        Ok(val)
    }

    /// Write a Pod type at the given address.
    fn write_val<T: Pod>(&self, addr: u64, val: T) -> core::result::Result<(), Self::Error> {
        let bytes = bytemuck::bytes_of(&val);
        self.write(addr, bytes)?;
        Ok(())
    }

    /// Zero `len` bytes starting at `addr`.
    fn zero(&self, addr: u64, len: usize) -> core::result::Result<(), Self::Error> {
        const CHUNK: [u8; 256] = [0; 256];
        let mut off = 0;
        while off < len {
            let n = (len - off).min(CHUNK.len());
            self.write(addr + off as u64, &CHUNK[..n])?;
            off += n;
        }
        Ok(())
    }
}

/// Convenience wrappers that fold backend errors into [`CipcError`].
pub(crate) trait MemOpsExt: MemOps {
    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(addr, &mut buf).map_err(|e| fault(addr, e))?;
        Ok(buf)
    }

    fn write_bytes(&self, addr: u64, src: &[u8]) -> Result<()> {
        self.write(addr, src).map_err(|e| fault(addr, e))?;
        Ok(())
    }

    fn get<T: Pod>(&self, addr: u64) -> Result<T> {
        self.read_val(addr).map_err(|e| fault(addr, e))
    }

    fn put<T: Pod>(&self, addr: u64, val: T) -> Result<()> {
        self.write_val(addr, val).map_err(|e| fault(addr, e))
    }

    fn acquire16(&self, addr: u64) -> Result<u16> {
        self.load_acquire(addr).map_err(|e| fault(addr, e))
    }

    fn release16(&self, addr: u64, val: u16) -> Result<()> {
        self.store_release(addr, val).map_err(|e| fault(addr, e))
    }

    fn clear(&self, addr: u64, len: usize) -> Result<()> {
        self.zero(addr, len).map_err(|e| fault(addr, e))
    }
}

impl<M: MemOps + ?Sized> MemOpsExt for M {}

fn fault<E: core::fmt::Debug>(addr: u64, err: E) -> CipcError {
    tracing::error!(addr = format_args!("{addr:#x}"), ?err, "DMA access failed");
    CipcError::MemoryAccess(addr)
}

/// A coherent DMA allocation: the bus address the device uses and its
/// length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBuffer {
    pub addr: u64,
    pub len: usize,
}

impl DmaBuffer {
    /// Bus address `offset` bytes into the buffer.
    #[inline]
    pub fn at(&self, offset: usize) -> u64 {
        debug_assert!(offset <= self.len);
        self.addr + offset as u64
    }

    pub fn lo32(&self) -> u32 {
        self.addr as u32
    }

    pub fn hi32(&self) -> u32 {
        (self.addr >> 32) as u32
    }
}
