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

//! In-process stand-ins for the PCIe function and the controller.
//!
//! [`FakeBus`] backs DMA with a private arena and keeps register values in
//! a map. Every released u16 store and every register write is appended to
//! one ordered log so tests can check publication order. [`SimDevice`]
//! runs a thread that plays the firmware side: it answers the boot and RTI
//! handshake, consumes control and data rings and posts completions.

use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::bus::{Bar, Bus};
use crate::error::{CipcError, Result};
use crate::hci::{HciPacketType, HciSink};
use crate::mem::{DmaBuffer, MemOps, MemOpsExt};
use crate::regs::*;
use crate::ring::{CompletionRingId, CursorBlock, TransferRingId};
use crate::wire::{
    CompletionRingEntry, Context, ControlMsgType, CreateCompletionRingMsg, CreateTransferRingMsg,
    DestroyRingMsg, EntryFlags, RingWireFlags, XferRingEntry,
};

const ARENA_BASE: u64 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Store16 { addr: u64, val: u16 },
    Reg { bar: Bar, offset: u32, val: u32 },
}

#[derive(Debug)]
pub(crate) struct OutOfRange(#[allow(dead_code)] pub u64);

/// DMA arena with a bump allocator.
pub(crate) struct TestMem {
    _storage: Box<[u64]>,
    base: *mut u8,
    size: usize,
    next: Mutex<usize>,
    log: Mutex<Vec<Access>>,
}

// SAFETY: the arena is only reached through `base`, which stays valid while
// `_storage` lives. Concurrent users touch disjoint bytes or synchronise
// through the acquire/release accessors.
unsafe impl Send for TestMem {}
// SAFETY: see above.
unsafe impl Sync for TestMem {}

impl TestMem {
    pub(crate) fn new(size: usize) -> Self {
        let mut storage = vec![0u64; size.div_ceil(8)].into_boxed_slice();
        let base = storage.as_mut_ptr().cast::<u8>();
        Self {
            _storage: storage,
            base,
            size,
            next: Mutex::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn alloc(&self, len: usize) -> DmaBuffer {
        self.try_alloc(len).unwrap()
    }

    fn try_alloc(&self, len: usize) -> Option<DmaBuffer> {
        let mut next = self.next.lock().unwrap();
        let start = next.next_multiple_of(64);
        if start + len > self.size {
            return None;
        }
        *next = start + len;
        Some(DmaBuffer {
            addr: ARENA_BASE + start as u64,
            len,
        })
    }

    fn ptr_for(&self, addr: u64, len: usize) -> core::result::Result<*mut u8, OutOfRange> {
        let off = addr.checked_sub(ARENA_BASE).ok_or(OutOfRange(addr))? as usize;
        if off + len > self.size {
            return Err(OutOfRange(addr));
        }
        Ok(self.base.wrapping_add(off))
    }

    pub(crate) fn accesses(&self) -> Vec<Access> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, access: Access) {
        self.log.lock().unwrap().push(access);
    }
}

impl MemOps for TestMem {
    type Error = OutOfRange;

    fn read(&self, addr: u64, dst: &mut [u8]) -> core::result::Result<usize, Self::Error> {
        let src = self.ptr_for(addr, dst.len())?;
        // SAFETY: bounds checked by ptr_for
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
        Ok(dst.len())
    }

    fn write(&self, addr: u64, src: &[u8]) -> core::result::Result<usize, Self::Error> {
        let dst = self.ptr_for(addr, src.len())?;
        // SAFETY: bounds checked by ptr_for
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
        Ok(src.len())
    }

    fn load_acquire(&self, addr: u64) -> core::result::Result<u16, Self::Error> {
        let ptr = self.ptr_for(addr, 2)?.cast::<AtomicU16>();
        // SAFETY: in bounds, and cursor fields are 2-byte aligned
        Ok(unsafe { (*ptr).load(Ordering::Acquire) })
    }

    fn store_release(&self, addr: u64, val: u16) -> core::result::Result<(), Self::Error> {
        let ptr = self.ptr_for(addr, 2)?.cast::<AtomicU16>();
        // SAFETY: in bounds, and cursor fields are 2-byte aligned
        unsafe { (*ptr).store(val, Ordering::Release) };
        self.record(Access::Store16 { addr, val });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegWrite {
    pub bar: Bar,
    pub offset: u32,
    pub val: u32,
}

struct BusState {
    mem: TestMem,
    regs: Mutex<HashMap<(Bar, u32), u32>>,
    config: Mutex<HashMap<u32, u32>>,
    freed: Mutex<Vec<DmaBuffer>>,
    listener: Mutex<Option<Sender<RegWrite>>>,
}

#[derive(Clone)]
pub(crate) struct FakeBus(Arc<BusState>);

impl FakeBus {
    pub(crate) fn new() -> Self {
        Self::with_arena(4 << 20)
    }

    pub(crate) fn with_arena(size: usize) -> Self {
        Self(Arc::new(BusState {
            mem: TestMem::new(size),
            regs: Mutex::new(HashMap::new()),
            config: Mutex::new(HashMap::new()),
            freed: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
        }))
    }

    /// Device-side register update; not logged.
    pub(crate) fn set_reg(&self, bar: Bar, offset: u32, val: u32) {
        self.0.regs.lock().unwrap().insert((bar, offset), val);
    }

    pub(crate) fn reg(&self, bar: Bar, offset: u32) -> u32 {
        self.0
            .regs
            .lock()
            .unwrap()
            .get(&(bar, offset))
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn set_config(&self, offset: u32, val: u32) {
        self.0.config.lock().unwrap().insert(offset, val);
    }

    pub(crate) fn config(&self, offset: u32) -> u32 {
        self.0
            .config
            .lock()
            .unwrap()
            .get(&offset)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn accesses(&self) -> Vec<Access> {
        self.0.mem.accesses()
    }

    /// Doorbell writes in order, as `(doorbell index, value)`.
    pub(crate) fn doorbells(&self) -> Vec<(u8, u16)> {
        self.accesses()
            .into_iter()
            .filter_map(|a| match a {
                Access::Reg {
                    bar: Bar::Bar0,
                    offset: BAR0_DOORBELL,
                    val,
                } => Some(((val >> 8) as u8, (val >> 16) as u16)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn freed(&self) -> Vec<DmaBuffer> {
        self.0.freed.lock().unwrap().clone()
    }

    fn subscribe(&self) -> Receiver<RegWrite> {
        let (tx, rx) = unbounded();
        *self.0.listener.lock().unwrap() = Some(tx);
        rx
    }
}

impl Bus for FakeBus {
    type Mem = TestMem;

    fn mem(&self) -> &TestMem {
        &self.0.mem
    }

    fn alloc_dma(&self, len: usize) -> Result<DmaBuffer> {
        self.0
            .mem
            .try_alloc(len)
            .ok_or_else(|| CipcError::Bus(format!("arena exhausted allocating {len} bytes")))
    }

    fn free_dma(&self, buf: DmaBuffer) {
        self.0.freed.lock().unwrap().push(buf);
    }

    fn read32(&self, bar: Bar, offset: u32) -> u32 {
        self.reg(bar, offset)
    }

    fn write32(&self, bar: Bar, offset: u32, val: u32) {
        self.0.mem.record(Access::Reg { bar, offset, val });
        self.set_reg(bar, offset, val);
        if let Some(tx) = self.0.listener.lock().unwrap().as_ref() {
            let _ = tx.send(RegWrite { bar, offset, val });
        }
    }

    fn read_config(&self, offset: u32) -> Result<u32> {
        Ok(self.config(offset))
    }

    fn write_config(&self, offset: u32, val: u32) -> Result<()> {
        self.set_config(offset, val);
        Ok(())
    }
}

/// HCI sink that keeps every frame.
#[derive(Default)]
pub(crate) struct RecordingSink {
    frames: Mutex<Vec<(HciPacketType, Bytes)>>,
}

impl RecordingSink {
    pub(crate) fn frames(&self) -> Vec<(HciPacketType, Bytes)> {
        self.frames.lock().unwrap().clone()
    }
}

impl HciSink for RecordingSink {
    fn receive(&self, kind: HciPacketType, frame: Bytes) {
        self.frames.lock().unwrap().push((kind, frame));
    }
}

/// How the simulated firmware behaves.
#[derive(Clone, Copy)]
pub(crate) struct DeviceOptions {
    /// Boot stage reported after the firmware doorbell
    pub bootstage: u32,
    /// RTI status reported after a write to RTI control, `None` to stay quiet
    pub rti_reply: fn(u32) -> Option<u32>,
    /// Leave control messages about this ring id unacknowledged
    pub ignore_control_for: Option<u16>,
    /// Acknowledge entries on host-to-device data rings
    pub ack_data: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            bootstage: 2,
            rti_reply: Some,
            ignore_control_for: None,
            ack_data: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct XferModel {
    iova: u64,
    n: u16,
    footer: usize,
    completion: u16,
    doorbell: u16,
    flags: RingWireFlags,
    consumed: u16,
}

#[derive(Debug, Clone, Copy)]
struct CompletionModel {
    iova: u64,
    n: u16,
    payload: usize,
    head: u16,
}

/// Firmware-side knowledge of the rings.
struct Model {
    opts: DeviceOptions,
    cursors: Option<CursorBlock>,
    xfer: HashMap<u16, XferModel>,
    completion: HashMap<u16, CompletionModel>,
    received: Vec<(TransferRingId, Vec<u8>)>,
    control: Vec<(ControlMsgType, u16)>,
}

impl Model {
    /// React to a host register write. Returns whether to raise an
    /// interrupt.
    fn on_write(&mut self, bus: &FakeBus, w: RegWrite) -> bool {
        match (w.bar, w.offset) {
            (Bar::Bar0, BAR0_FW_DOORBELL) => {
                bus.set_reg(Bar::Bar2, BAR2_BOOTSTAGE, self.opts.bootstage);
                true
            }
            (Bar::Bar0, BAR0_RTI_CONTROL) => {
                if w.val == 2 {
                    self.learn_context(bus);
                }
                match (self.opts.rti_reply)(w.val) {
                    Some(status) => {
                        bus.set_reg(Bar::Bar2, BAR2_RTI_STATUS, status);
                        true
                    }
                    None => false,
                }
            }
            (Bar::Bar0, BAR0_DOORBELL) => {
                let idx = ((w.val >> 8) & 0xff) as u16;
                let rings: Vec<u16> = self
                    .xfer
                    .iter()
                    .filter(|(id, m)| {
                        m.doorbell == idx
                            && !m.flags.contains(RingWireFlags::VIRTUAL)
                            && TransferRingId::from_raw(**id)
                                .is_some_and(|r| r.event_type().is_none())
                    })
                    .map(|(id, _)| *id)
                    .collect();
                let mut raised = false;
                for id in rings {
                    if id == TransferRingId::Control as u16 || self.opts.ack_data {
                        raised |= self.consume(bus, id).unwrap();
                    }
                }
                raised
            }
            _ => false,
        }
    }

    fn learn_context(&mut self, bus: &FakeBus) {
        let addr = u64::from(bus.reg(Bar::Bar2, BAR2_CONTEXT_ADDR_LO))
            | (u64::from(bus.reg(Bar::Bar2, BAR2_CONTEXT_ADDR_HI)) << 32);
        let ctx: Context = bus.mem().get(addr).unwrap();
        self.cursors = Some(CursorBlock::new(DmaBuffer {
            addr: u64::from_le(ctx.completion_ring_heads_addr),
            len: crate::ring::cursors::STATE_SIZE,
        }));
        self.xfer.insert(
            0,
            XferModel {
                iova: u64::from_le(ctx.control_xfer_ring_addr),
                n: u16::from_le(ctx.control_xfer_ring_n_entries),
                footer: ctx.control_xfer_ring_footer_size as usize * 4,
                completion: 0,
                doorbell: u16::from_le(ctx.control_xfer_ring_doorbell),
                flags: RingWireFlags::empty(),
                consumed: 0,
            },
        );
        self.completion.insert(
            0,
            CompletionModel {
                iova: u64::from_le(ctx.control_completion_ring_addr),
                n: u16::from_le(ctx.control_completion_ring_n_entries),
                payload: 0,
                head: 0,
            },
        );
    }

    fn cursors(&self) -> CursorBlock {
        self.cursors.unwrap()
    }

    /// Consume everything the host queued on `ring` and acknowledge it.
    fn consume(&mut self, bus: &FakeBus, ring: u16) -> Result<bool> {
        let id = TransferRingId::from_raw(ring).unwrap();
        let dev = self.cursors().device(bus.mem());
        let head = dev.xfer_head(id)?;
        let m = self.xfer[&ring];
        let stride = XferRingEntry::SIZE + m.footer;
        let mut tail = m.consumed;
        let mut raised = false;

        while tail != head {
            let slot = m.iova + (tail as usize * stride) as u64;
            let entry: XferRingEntry = bus.mem().get(slot)?;
            let data = if entry.flags().contains(EntryFlags::PAYLOAD_MAPPED) {
                bus.mem().read_bytes(entry.payload(), entry.len() as usize)?
            } else {
                bus.mem()
                    .read_bytes(slot + XferRingEntry::SIZE as u64, entry.len() as usize)?
            };

            let acked = if id == TransferRingId::Control {
                self.apply_control(&data)
            } else {
                self.received.push((id, data));
                true
            };
            if acked {
                raised |= self.post(bus, m.completion, ring, entry.id(), EntryFlags::empty(), &[])?;
            }
            tail = (tail + 1) % m.n;
        }

        if let Some(m) = self.xfer.get_mut(&ring) {
            m.consumed = tail;
        }
        dev.publish_xfer_tail(id, tail)?;
        Ok(raised)
    }

    /// Returns whether the message should be acknowledged.
    fn apply_control(&mut self, msg: &[u8]) -> bool {
        let Some(kind) = ControlMsgType::from_raw(msg[0]) else {
            return false;
        };
        let ring = match kind {
            ControlMsgType::CreateCompletionRing => {
                let m: CreateCompletionRingMsg = bytemuck::pod_read_unaligned(msg);
                assert_eq!(m.id(), m.id_again());
                self.completion.insert(
                    m.id(),
                    CompletionModel {
                        iova: m.ring_iova(),
                        n: m.n_elements(),
                        payload: m.footer_size() as usize * 4,
                        head: 0,
                    },
                );
                m.id()
            }
            ControlMsgType::CreateTransferRing => {
                let m: CreateTransferRingMsg = bytemuck::pod_read_unaligned(msg);
                assert_eq!(m.ring_id(), m.ring_id_again());
                self.xfer.insert(
                    m.ring_id(),
                    XferModel {
                        iova: m.ring_iova(),
                        n: m.n_elements(),
                        footer: m.footer_size() as usize * 4,
                        completion: m.completion_ring_id(),
                        doorbell: m.doorbell(),
                        flags: m.flags(),
                        consumed: 0,
                    },
                );
                m.ring_id()
            }
            ControlMsgType::DestroyCompletionRing => {
                let m: DestroyRingMsg = bytemuck::pod_read_unaligned(msg);
                self.completion.remove(&m.ring_id());
                m.ring_id()
            }
            ControlMsgType::DestroyTransferRing => {
                let m: DestroyRingMsg = bytemuck::pod_read_unaligned(msg);
                self.xfer.remove(&m.ring_id());
                m.ring_id()
            }
        };
        self.control.push((kind, ring));
        self.opts.ignore_control_for != Some(ring)
    }

    /// Append an entry to completion ring `cring`. Returns `false` if the
    /// ring is unknown or full.
    fn post(
        &mut self,
        bus: &FakeBus,
        cring: u16,
        ring_id: u16,
        msg_id: u16,
        flags: EntryFlags,
        data: &[u8],
    ) -> Result<bool> {
        let Some(c) = self.completion.get(&cring).copied() else {
            return Ok(false);
        };
        let cid = CompletionRingId::from_raw(cring).unwrap();
        let dev = self.cursors().device(bus.mem());
        let next = (c.head + 1) % c.n;
        if next == dev.completion_tail(cid)? {
            return Ok(false);
        }

        let slot = c.iova + (c.head as usize * (CompletionRingEntry::SIZE + c.payload)) as u64;
        let entry = CompletionRingEntry::new(flags, ring_id, msg_id, data.len() as u32);
        bus.mem().put(slot, entry)?;
        let inline = data.len().min(c.payload);
        bus.mem()
            .write_bytes(slot + CompletionRingEntry::SIZE as u64, &data[..inline])?;

        if let Some(c) = self.completion.get_mut(&cring) {
            c.head = next;
        }
        dev.publish_completion_head(cid, next)?;
        Ok(true)
    }

    /// Produce inbound data on a device-to-host ring.
    fn deliver(&mut self, bus: &FakeBus, ring: TransferRingId, data: &[u8]) -> Result<bool> {
        let m = self.xfer[&(ring as u16)];
        if m.flags.contains(RingWireFlags::VIRTUAL) {
            return self.post(bus, m.completion, ring as u16, 0, EntryFlags::empty(), data);
        }

        // buffers-only ring: fill the next pre-posted buffer
        let slot = m.iova + (m.consumed as usize * XferRingEntry::SIZE) as u64;
        let entry: XferRingEntry = bus.mem().get(slot)?;
        assert!(data.len() <= entry.len() as usize);
        bus.mem().write_bytes(entry.payload(), data)?;
        if let Some(m) = self.xfer.get_mut(&(ring as u16)) {
            m.consumed = (m.consumed + 1) % m.n;
        }
        self.post(
            bus,
            m.completion,
            ring as u16,
            entry.id(),
            EntryFlags::PAYLOAD_MAPPED,
            data,
        )
    }
}

/// The firmware side of the fake, running on its own thread.
pub(crate) struct SimDevice {
    bus: FakeBus,
    model: Arc<Mutex<Model>>,
    irq: Arc<dyn Fn() + Send + Sync>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimDevice {
    pub(crate) fn spawn(
        bus: FakeBus,
        opts: DeviceOptions,
        irq: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let model = Arc::new(Mutex::new(Model {
            opts,
            cursors: None,
            xfer: HashMap::new(),
            completion: HashMap::new(),
            received: Vec::new(),
            control: Vec::new(),
        }));
        let irq: Arc<dyn Fn() + Send + Sync> = Arc::new(irq);
        let stop = Arc::new(AtomicBool::new(false));
        let rx = bus.subscribe();

        let thread = {
            let (bus, model, irq, stop) = (bus.clone(), model.clone(), irq.clone(), stop.clone());
            std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    match rx.recv_timeout(Duration::from_millis(5)) {
                        Ok(w) => {
                            let raise = model.lock().unwrap().on_write(&bus, w);
                            if raise {
                                irq();
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
        };

        Self {
            bus,
            model,
            irq,
            stop,
            thread: Some(thread),
        }
    }

    /// Produce `data` on a device-to-host ring and interrupt the host.
    pub(crate) fn deliver(&self, ring: TransferRingId, data: &[u8]) {
        let raised = self
            .model
            .lock()
            .unwrap()
            .deliver(&self.bus, ring, data)
            .unwrap();
        assert!(raised, "completion ring for {ring:?} is full or unknown");
        (self.irq)();
    }

    pub(crate) fn received(&self) -> Vec<(TransferRingId, Vec<u8>)> {
        self.model.lock().unwrap().received.clone()
    }

    pub(crate) fn control_log(&self) -> Vec<(ControlMsgType, u16)> {
        self.model.lock().unwrap().control.clone()
    }

    pub(crate) fn knows_transfer_ring(&self, ring: TransferRingId) -> bool {
        self.model.lock().unwrap().xfer.contains_key(&(ring as u16))
    }

    pub(crate) fn knows_completion_ring(&self, ring: CompletionRingId) -> bool {
        self.model
            .lock()
            .unwrap()
            .completion
            .contains_key(&(ring as u16))
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}
