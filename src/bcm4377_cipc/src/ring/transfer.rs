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

//! Host-to-device transfer rings.
//!
//! A transfer ring is a circular array of [`XferRingEntry`] slots. The host
//! owns the head, the device owns the tail. Payloads up to the ring's
//! inline size sit in the slot footer; bigger ones go to a per-ring pool of
//! mapped buffers indexed by message id.
//!
//! The `*-d2h` rings run the other way: the host never sends on them but
//! hands the device credit (and, for buffers-only rings, empty receive
//! buffers) by advancing the head. The device reports produced data on the
//! ring's completion ring.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bitflags::bitflags;
use bytes::Bytes;
use spin::Mutex;
use tracing::{debug, warn};

use crate::bus::{Bus, DmaGuard};
use crate::error::{CipcError, Result};
use crate::invalid_arg;
use crate::mem::{DmaBuffer, MemOpsExt};
use crate::metrics::{EmittableMetric, HistogramMetric};
use crate::msgid::{MsgIdAllocator, tag, untag};
use crate::regs::Doorbell;
use crate::ring::{
    CompletionRingId, MAX_INPLACE_PAYLOAD_SIZE, MAX_RING_SIZE, RingIo, RingStatus,
    TransferRingId, align4, checked_cursor, next_slot,
};
use crate::wait::Event;
use crate::wire::{
    CONTROL_MSG_SIZE, CompletionRingEntry, CreateTransferRingMsg, DestroyRingMsg, EntryFlags,
    RingWireFlags, TransferRingParams, XferRingEntry,
};

/// Head value that hands a freshly created device-to-host ring its first
/// batch of credit.
const D2H_PRIMING_HEAD: u16 = 0xf;

/// `HCI_MAX_FRAME_SIZE` plus the packet type word the firmware prepends.
const ACL_MAPPED_PAYLOAD_SIZE: usize = 1028 + 4;
const HCI_MAX_EVENT_SIZE: usize = 260;
const HCI_MAX_SCO_SIZE: usize = 255;
const DEFAULT_ENTRIES: u16 = 128;

bitflags! {
    /// Host-side behaviour of a transfer ring.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TransferRingFlags: u8 {
        /// No slot memory; the ring only tracks device-to-host credit
        const VIRTUAL          = 1 << 0;
        /// The device polls the ring, no doorbell after an enqueue
        const SYNC             = 1 << 1;
        /// The host only posts empty receive buffers
        const D2H_BUFFERS_ONLY = 1 << 2;
        /// Senders may block until the device acknowledges
        const ALLOW_WAIT       = 1 << 3;
    }
}

/// Static description of a transfer ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRingConfig {
    pub id: TransferRingId,
    pub doorbell: Doorbell,
    pub completion_ring: CompletionRingId,
    pub n_entries: u16,
    /// Bytes available in each slot footer
    pub payload_size: usize,
    /// Bytes of each mapped buffer, zero if the ring has no pool
    pub mapped_payload_size: usize,
    pub flags: TransferRingFlags,
}

impl TransferRingConfig {
    /// The firmware's fixed layout for `id`.
    pub fn for_ring(id: TransferRingId) -> Self {
        let base = Self {
            id,
            doorbell: Doorbell::Control,
            completion_ring: CompletionRingId::ControlAck,
            n_entries: DEFAULT_ENTRIES,
            payload_size: 0,
            mapped_payload_size: 0,
            flags: TransferRingFlags::empty(),
        };
        match id {
            TransferRingId::Control => Self {
                payload_size: CONTROL_MSG_SIZE,
                flags: TransferRingFlags::ALLOW_WAIT,
                ..base
            },
            TransferRingId::HciH2d => Self {
                doorbell: Doorbell::HciH2d,
                completion_ring: CompletionRingId::HciAclAck,
                payload_size: HCI_MAX_EVENT_SIZE,
                ..base
            },
            TransferRingId::HciD2h => Self {
                doorbell: Doorbell::HciD2h,
                completion_ring: CompletionRingId::HciAclEvent,
                flags: TransferRingFlags::VIRTUAL,
                ..base
            },
            TransferRingId::ScoH2d => Self {
                doorbell: Doorbell::Sco,
                completion_ring: CompletionRingId::ScoAck,
                payload_size: HCI_MAX_SCO_SIZE,
                flags: TransferRingFlags::SYNC,
                ..base
            },
            TransferRingId::ScoD2h => Self {
                doorbell: Doorbell::Sco,
                completion_ring: CompletionRingId::ScoEvent,
                flags: TransferRingFlags::VIRTUAL | TransferRingFlags::SYNC,
                ..base
            },
            TransferRingId::AclH2d => Self {
                doorbell: Doorbell::AclH2d,
                completion_ring: CompletionRingId::HciAclAck,
                mapped_payload_size: ACL_MAPPED_PAYLOAD_SIZE,
                ..base
            },
            TransferRingId::AclD2h => Self {
                doorbell: Doorbell::AclD2h,
                completion_ring: CompletionRingId::HciAclEvent,
                mapped_payload_size: ACL_MAPPED_PAYLOAD_SIZE,
                flags: TransferRingFlags::D2H_BUFFERS_ONLY,
                ..base
            },
        }
    }

    /// Round sizes up to what the firmware accepts and reject combinations
    /// it cannot run.
    pub fn validate(mut self) -> Result<Self> {
        self.payload_size = align4(self.payload_size);
        self.mapped_payload_size = align4(self.mapped_payload_size);
        let name = self.id.name();

        if self.payload_size > MAX_INPLACE_PAYLOAD_SIZE {
            return Err(invalid_arg!(
                "{name}: inline payload {} exceeds {MAX_INPLACE_PAYLOAD_SIZE}",
                self.payload_size
            ));
        }
        if self.n_entries == 0 || self.n_entries > MAX_RING_SIZE {
            return Err(invalid_arg!("{name}: {} entries", self.n_entries));
        }
        if self.mapped_payload_size > u16::MAX as usize {
            return Err(invalid_arg!(
                "{name}: mapped payload {} does not fit an entry",
                self.mapped_payload_size
            ));
        }
        if self.flags.contains(TransferRingFlags::VIRTUAL | TransferRingFlags::ALLOW_WAIT) {
            return Err(invalid_arg!("{name}: virtual rings cannot be waited on"));
        }
        if self.flags.contains(TransferRingFlags::D2H_BUFFERS_ONLY) {
            if self.flags.contains(TransferRingFlags::VIRTUAL) {
                return Err(invalid_arg!("{name}: buffers-only ring cannot be virtual"));
            }
            if self.payload_size != 0 || self.mapped_payload_size == 0 {
                return Err(invalid_arg!(
                    "{name}: buffers-only ring needs mapped buffers and no inline payload"
                ));
            }
        }
        Ok(self)
    }

    /// Bytes between consecutive slots.
    #[inline]
    pub fn slot_size(&self) -> usize {
        XferRingEntry::SIZE + self.payload_size
    }

    fn is_virtual(&self) -> bool {
        self.flags.contains(TransferRingFlags::VIRTUAL)
    }

    fn wire_flags(&self) -> RingWireFlags {
        let mut flags = RingWireFlags::empty();
        flags.set(RingWireFlags::VIRTUAL, self.is_virtual());
        flags.set(
            RingWireFlags::SYNC,
            self.flags.contains(TransferRingFlags::SYNC),
        );
        flags
    }
}

/// A sender blocked on an acknowledgement.
struct Waiter {
    done: Event,
    /// Set before `done` is signalled if the ring went away instead
    reset: AtomicBool,
}

impl Waiter {
    fn new() -> Self {
        Self {
            done: Event::new(),
            reset: AtomicBool::new(false),
        }
    }
}

struct Inner {
    status: RingStatus,
    generation: u8,
    ids: MsgIdAllocator,
    /// Blocking senders, indexed by message id
    pending: Vec<Option<Arc<Waiter>>>,
}

impl Inner {
    /// Drop every outstanding id and wake blocked senders with a reset.
    fn forget_outstanding(&mut self) {
        self.ids.reset();
        for waiter in self.pending.iter_mut().filter_map(Option::take) {
            waiter.reset.store(true, Ordering::Release);
            waiter.done.signal();
        }
    }
}

pub struct TransferRing {
    cfg: TransferRingConfig,
    slots: Option<DmaBuffer>,
    payloads: Option<DmaBuffer>,
    inner: Mutex<Inner>,
}

impl TransferRing {
    /// Validate `cfg` and allocate the ring's DMA memory. Virtual rings get
    /// none.
    pub(crate) fn alloc<B: Bus>(bus: &B, cfg: TransferRingConfig) -> Result<Self> {
        let cfg = cfg.validate()?;
        let n = cfg.n_entries as usize;

        let (slots, payloads) = if cfg.is_virtual() {
            (None, None)
        } else {
            let slots = DmaGuard::alloc(bus, n * cfg.slot_size())?;
            let payloads = match cfg.mapped_payload_size {
                0 => None,
                size => Some(DmaGuard::alloc(bus, n * size)?),
            };
            (Some(slots.dismiss()), payloads.map(DmaGuard::dismiss))
        };

        Ok(Self {
            cfg,
            slots,
            payloads,
            inner: Mutex::new(Inner {
                status: RingStatus::Unconfigured,
                generation: 0,
                ids: MsgIdAllocator::new(cfg.n_entries),
                pending: vec![None; n],
            }),
        })
    }

    pub(crate) fn free<B: Bus>(&self, bus: &B) {
        self.slots.into_iter().chain(self.payloads).for_each(|buf| bus.free_dma(buf));
    }

    pub fn id(&self) -> TransferRingId {
        self.cfg.id
    }

    pub fn config(&self) -> &TransferRingConfig {
        &self.cfg
    }

    pub fn status(&self) -> RingStatus {
        self.inner.lock().status
    }

    pub fn generation(&self) -> u8 {
        self.inner.lock().generation
    }

    /// Message ids currently awaiting an acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().ids.in_use()
    }

    pub(crate) fn slots(&self) -> Option<DmaBuffer> {
        self.slots
    }

    /// Queue `data` for the device.
    ///
    /// With `wait` set, blocks until the device acknowledges the entry or
    /// the configured timeout expires.
    pub(crate) fn enqueue<B: Bus>(&self, io: &RingIo<'_, B>, data: &[u8], wait: bool) -> Result<()> {
        let cfg = &self.cfg;
        let ring = cfg.id;

        if cfg.is_virtual() {
            return Err(invalid_arg!("{}: cannot send on a virtual ring", ring.name()));
        }
        if wait && !cfg.flags.contains(TransferRingFlags::ALLOW_WAIT) {
            return Err(invalid_arg!("{}: ring does not support waiting", ring.name()));
        }
        if data.len() > cfg.payload_size.max(cfg.mapped_payload_size) {
            return Err(invalid_arg!(
                "{}: {} byte payload does not fit",
                ring.name(),
                data.len()
            ));
        }
        let Some(slots) = self.slots else {
            return Err(invalid_arg!("{}: ring has no slots", ring.name()));
        };
        let len = data.len() as u16;

        let waiter = wait.then(|| Arc::new(Waiter::new()));
        let id = {
            let mut inner = self.inner.lock();
            if inner.status != RingStatus::Enabled {
                return Err(CipcError::RingState {
                    ring: ring.name(),
                    state: inner.status.name(),
                    op: "enqueue",
                });
            }

            let host = io.host();
            let n = cfg.n_entries;
            let head = checked_cursor(ring.name(), "head", host.xfer_head(ring)?, n)?;
            let tail = checked_cursor(ring.name(), "tail", host.xfer_tail(ring)?, n)?;
            let new_head = next_slot(head, n);
            if new_head == tail {
                warn!("can't send message because ring {} is full", ring.name());
                return Err(CipcError::RingFull(ring));
            }

            let Some(id) = inner.ids.allocate() else {
                warn!("can't find free message id for ring {}", ring.name());
                return Err(CipcError::NoFreeId(ring));
            };

            let slot = slots.at(head as usize * cfg.slot_size());
            if let Err(e) = self.write_entry(io, slot, tag(id, inner.generation), id, data, len) {
                inner.ids.release(id);
                return Err(e);
            }
            inner.pending[id as usize] = waiter.clone();

            if let Err(e) = host.publish_xfer_head(ring, new_head) {
                inner.pending[id as usize] = None;
                inner.ids.release(id);
                return Err(e);
            }
            if !cfg.flags.contains(TransferRingFlags::SYNC) {
                io.regs().ring_doorbell(cfg.doorbell, new_head);
            }
            id
        };

        match waiter {
            Some(waiter) => self.wait_for_ack(io, id, &waiter),
            None => Ok(()),
        }
    }

    fn write_entry<B: Bus>(
        &self,
        io: &RingIo<'_, B>,
        slot: u64,
        raw_msgid: u16,
        id: u8,
        data: &[u8],
        len: u16,
    ) -> Result<()> {
        let mem = io.mem();
        match self.payloads {
            Some(pool) if data.len() > self.cfg.payload_size => {
                let payload = pool.at(id as usize * self.cfg.mapped_payload_size);
                mem.write_bytes(payload, data)?;
                mem.put(slot, XferRingEntry::mapped(raw_msgid, len, payload))
            }
            _ => {
                mem.write_bytes(slot + XferRingEntry::SIZE as u64, data)?;
                mem.put(slot, XferRingEntry::in_footer(raw_msgid, len))
            }
        }
    }

    fn wait_for_ack<B: Bus>(&self, io: &RingIo<'_, B>, id: u8, waiter: &Arc<Waiter>) -> Result<()> {
        let ring = self.cfg.id;
        let start = Instant::now();

        if !waiter.done.wait_timeout(io.timeout) {
            let mut inner = self.inner.lock();
            // the ack may have landed between the timeout and the lock
            if !waiter.done.try_wait() {
                inner.pending[id as usize] = None;
                inner.ids.release(id);
                warn!("timeout while waiting for ACK on ring {}", ring.name());
                return Err(CipcError::Timeout("transfer ring acknowledgement"));
            }
        }

        if waiter.reset.load(Ordering::Acquire) {
            return Err(CipcError::RingReset(ring));
        }
        HistogramMetric::ack_wait(ring.name(), start.elapsed()).emit();
        Ok(())
    }

    /// The device consumed the entry carrying `raw_msgid`.
    pub(crate) fn handle_ack(&self, raw_msgid: u16) -> Result<()> {
        let mut inner = self.inner.lock();
        let id = untag(raw_msgid, inner.generation, self.cfg.n_entries)?;

        if !inner.ids.is_allocated(id) {
            return Err(CipcError::InvalidEntry {
                ring: self.cfg.id as u16,
                reason: "unused message id",
            });
        }

        if let Some(waiter) = inner.pending[id as usize].take() {
            waiter.done.signal();
        }
        inner.ids.release(id);
        Ok(())
    }

    /// The device produced data on this ring. `inline` is the data area of
    /// the completion slot that reported it.
    ///
    /// The slot is handed back to the device whether or not the data could
    /// be read.
    pub(crate) fn handle_event<B: Bus>(
        &self,
        io: &RingIo<'_, B>,
        entry: &CompletionRingEntry,
        inline: DmaBuffer,
    ) -> Result<Bytes> {
        let ring = self.cfg.id;
        let inner = self.inner.lock();
        let data = self.read_event(io, &inner, entry, inline);

        let host = io.host();
        let n = self.cfg.n_entries;
        let head = next_slot(checked_cursor(ring.name(), "head", host.xfer_head(ring)?, n)?, n);
        host.publish_xfer_head(ring, head)?;
        io.regs().ring_doorbell(self.cfg.doorbell, head);

        data
    }

    fn read_event<B: Bus>(
        &self,
        io: &RingIo<'_, B>,
        inner: &Inner,
        entry: &CompletionRingEntry,
        inline: DmaBuffer,
    ) -> Result<Bytes> {
        let invalid = |reason| CipcError::InvalidEntry {
            ring: self.cfg.id as u16,
            reason,
        };
        if inner.status != RingStatus::Enabled {
            return Err(invalid("disabled ring"));
        }

        let len = entry.len() as usize;
        let addr = match self.payloads {
            Some(pool)
                if self.cfg.flags.contains(TransferRingFlags::D2H_BUFFERS_ONLY)
                    && entry.flags().contains(EntryFlags::PAYLOAD_MAPPED) =>
            {
                let id = untag(entry.msg_id(), inner.generation, self.cfg.n_entries)?;
                if len > self.cfg.mapped_payload_size {
                    return Err(invalid("oversized event"));
                }
                pool.at(id as usize * self.cfg.mapped_payload_size)
            }
            _ => {
                if len > inline.len {
                    return Err(invalid("oversized event"));
                }
                inline.addr
            }
        };

        Ok(Bytes::from(io.mem().read_bytes(addr, len)?))
    }

    /// First half of ring creation: reset the cursors, start a new
    /// generation and build the message announcing the ring.
    pub(crate) fn begin_create<B: Bus>(&self, io: &RingIo<'_, B>) -> Result<CreateTransferRingMsg> {
        let cfg = &self.cfg;
        let mut inner = self.inner.lock();
        if inner.status != RingStatus::Unconfigured {
            return Err(CipcError::RingState {
                ring: cfg.id.name(),
                state: inner.status.name(),
                op: "create",
            });
        }

        io.host().reset_transfer(cfg.id)?;
        inner.generation = inner.generation.wrapping_add(1);
        inner.forget_outstanding();
        inner.status = RingStatus::Creating;
        debug!(
            "creating transfer ring {} generation {}",
            cfg.id.name(),
            inner.generation
        );

        Ok(CreateTransferRingMsg::new(TransferRingParams {
            ring_id: cfg.id as u16,
            ring_iova: self.slots.map_or(0, |s| s.addr),
            n_elements: cfg.n_entries,
            completion_ring_id: cfg.completion_ring as u16,
            doorbell: cfg.doorbell as u16,
            flags: cfg.wire_flags(),
            payload_size: cfg.payload_size,
        }))
    }

    /// Second half of ring creation, once the device accepted it: post the
    /// receive buffers and prime device-to-host rings.
    pub(crate) fn finish_create<B: Bus>(&self, io: &RingIo<'_, B>) -> Result<()> {
        let cfg = &self.cfg;
        let mut inner = self.inner.lock();

        if let (true, Some(slots), Some(pool)) = (
            cfg.flags.contains(TransferRingFlags::D2H_BUFFERS_ONLY),
            self.slots,
            self.payloads,
        ) {
            let mapped = cfg.mapped_payload_size;
            for i in 0..cfg.n_entries as usize {
                let entry = XferRingEntry::mapped(
                    tag(i as u8, inner.generation),
                    mapped as u16,
                    pool.at(i * mapped),
                );
                io.mem().put(slots.at(i * cfg.slot_size()), entry)?;
            }
        }

        if cfg.flags.intersects(TransferRingFlags::VIRTUAL | TransferRingFlags::D2H_BUFFERS_ONLY) {
            io.host().publish_xfer_head(cfg.id, D2H_PRIMING_HEAD)?;
            io.regs().ring_doorbell(cfg.doorbell, D2H_PRIMING_HEAD);
        }

        inner.status = RingStatus::Enabled;
        Ok(())
    }

    /// The device refused the ring.
    pub(crate) fn abort_create(&self) {
        self.inner.lock().status = RingStatus::Unconfigured;
    }

    pub(crate) fn begin_destroy(&self) -> Result<DestroyRingMsg> {
        let mut inner = self.inner.lock();
        if inner.status != RingStatus::Enabled {
            return Err(CipcError::RingState {
                ring: self.cfg.id.name(),
                state: inner.status.name(),
                op: "destroy",
            });
        }
        inner.status = RingStatus::Destroying;
        Ok(DestroyRingMsg::transfer(self.cfg.id as u16))
    }

    /// Marks the ring unconfigured whatever the device answered. Blocked
    /// senders observe [`CipcError::RingReset`].
    pub(crate) fn finish_destroy(&self) {
        let mut inner = self.inner.lock();
        inner.forget_outstanding();
        inner.status = RingStatus::Unconfigured;
    }

    /// Enable a ring the device learns about out of band. Only the control
    /// ring, which is described by the context block.
    pub(crate) fn enable<B: Bus>(&self, io: &RingIo<'_, B>) -> Result<()> {
        let mut inner = self.inner.lock();
        io.host().reset_transfer(self.cfg.id)?;
        inner.forget_outstanding();
        inner.status = RingStatus::Enabled;
        Ok(())
    }
}
