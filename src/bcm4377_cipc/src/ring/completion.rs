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

//! Device-to-host completion rings.

use spin::Mutex;
use tracing::{debug, error, warn};

use crate::bus::{Bus, DmaGuard};
use crate::error::{CipcError, Result};
use crate::invalid_arg;
use crate::mem::{DmaBuffer, MemOpsExt};
use crate::metrics::{CounterMetric, EmittableMetric};
use crate::ring::{
    CompletionRingId, MAX_INPLACE_PAYLOAD_SIZE, MAX_RING_SIZE, RingIo, RingStatus,
    TransferRingId, align4, checked_cursor, next_slot,
};
use crate::wire::{CompletionRingEntry, CreateCompletionRingMsg, DestroyRingMsg};

const HCI_MAX_EVENT_SIZE: usize = 260;
const HCI_MAX_SCO_SIZE: usize = 255;

/// The transfer rings whose completions a completion ring may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferRingSet(u16);

impl TransferRingSet {
    pub const fn of(rings: &[TransferRingId]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < rings.len() {
            bits |= 1 << rings[i] as u16;
            i += 1;
        }
        Self(bits)
    }

    #[inline]
    pub fn contains(&self, ring: TransferRingId) -> bool {
        self.0 & (1 << ring as u16) != 0
    }
}

/// Static description of a completion ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRingConfig {
    pub id: CompletionRingId,
    pub n_entries: u16,
    /// Inline event bytes following each entry
    pub payload_size: usize,
    /// Interrupt moderation delay announced at creation
    pub delay: u16,
    pub transfer_rings: TransferRingSet,
}

impl CompletionRingConfig {
    /// The firmware's fixed layout for `id`. `intmod_delay` applies to the
    /// HCI/ACL rings only.
    pub fn for_ring(id: CompletionRingId, intmod_delay: u16) -> Self {
        use TransferRingId::*;

        let (n_entries, payload_size, delay, rings) = match id {
            CompletionRingId::ControlAck => (32, 0, 0, TransferRingSet::of(&[Control])),
            CompletionRingId::HciAclAck => {
                (256, 0, intmod_delay, TransferRingSet::of(&[HciH2d, AclH2d]))
            }
            CompletionRingId::HciAclEvent => (
                256,
                HCI_MAX_EVENT_SIZE,
                intmod_delay,
                TransferRingSet::of(&[HciD2h, AclD2h]),
            ),
            CompletionRingId::ScoAck => (128, 0, 0, TransferRingSet::of(&[ScoH2d])),
            CompletionRingId::ScoEvent => {
                (128, HCI_MAX_SCO_SIZE, 0, TransferRingSet::of(&[ScoD2h]))
            }
        };

        Self {
            id,
            n_entries,
            payload_size,
            delay,
            transfer_rings: rings,
        }
    }

    pub fn validate(mut self) -> Result<Self> {
        self.payload_size = align4(self.payload_size);
        if self.payload_size > MAX_INPLACE_PAYLOAD_SIZE {
            return Err(invalid_arg!(
                "{}: inline payload {} exceeds {MAX_INPLACE_PAYLOAD_SIZE}",
                self.id.name(),
                self.payload_size
            ));
        }
        if self.n_entries == 0 || self.n_entries > MAX_RING_SIZE {
            return Err(invalid_arg!("{}: {} entries", self.id.name(), self.n_entries));
        }
        Ok(self)
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        CompletionRingEntry::SIZE + self.payload_size
    }
}

pub struct CompletionRing {
    cfg: CompletionRingConfig,
    slots: DmaBuffer,
    /// Also serialises drains of this ring
    status: Mutex<RingStatus>,
}

impl CompletionRing {
    pub(crate) fn alloc<B: Bus>(bus: &B, cfg: CompletionRingConfig) -> Result<Self> {
        let cfg = cfg.validate()?;
        let slots = DmaGuard::alloc(bus, cfg.n_entries as usize * cfg.slot_size())?;
        Ok(Self {
            cfg,
            slots: slots.dismiss(),
            status: Mutex::new(RingStatus::Unconfigured),
        })
    }

    pub(crate) fn free<B: Bus>(&self, bus: &B) {
        bus.free_dma(self.slots);
    }

    pub fn id(&self) -> CompletionRingId {
        self.cfg.id
    }

    pub fn config(&self) -> &CompletionRingConfig {
        &self.cfg
    }

    pub fn status(&self) -> RingStatus {
        *self.status.lock()
    }

    pub(crate) fn slots(&self) -> DmaBuffer {
        self.slots
    }

    /// Consume every entry the device posted since the last call and hand
    /// each to `dispatch`. Entries that fail are logged and counted, never
    /// retried. Returns how many entries were dispatched successfully.
    pub(crate) fn poll<B, F>(&self, io: &RingIo<'_, B>, mut dispatch: F) -> Result<usize>
    where
        B: Bus,
        F: FnMut(TransferRingId, &CompletionRingEntry, DmaBuffer) -> Result<()>,
    {
        let cfg = &self.cfg;
        let status = self.status.lock();
        if *status != RingStatus::Enabled {
            return Ok(0);
        }

        let host = io.host();
        let name = cfg.id.name();
        let tail = host.completion_tail(cfg.id)?;
        let mut tail = checked_cursor(name, "tail", tail, cfg.n_entries)?;
        let mut handled = 0;

        loop {
            let head = host.completion_head(cfg.id)?;
            if head >= cfg.n_entries {
                warn!("completion ring {} head {} is past the ring end", name, head);
                break;
            }
            if tail == head {
                break;
            }

            let slot = self.slots.at(tail as usize * cfg.slot_size());
            let inline = DmaBuffer {
                addr: slot + CompletionRingEntry::SIZE as u64,
                len: cfg.payload_size,
            };
            let entry: CompletionRingEntry = io.mem().get(slot)?;

            match TransferRingId::from_raw(entry.ring_id()) {
                Some(ring) if cfg.transfer_rings.contains(ring) => {
                    match dispatch(ring, &entry, inline) {
                        Ok(()) => handled += 1,
                        Err(e) => {
                            warn!("dropping entry {} on completion ring {}: {}", tail, name, e);
                            CounterMetric::dropped_completion(e.drop_reason()).emit();
                        }
                    }
                }
                _ => {
                    error!(
                        "completion ring {} entry {} names unexpected transfer ring {}",
                        name,
                        tail,
                        entry.ring_id()
                    );
                    CounterMetric::dropped_completion("unexpected transfer ring").emit();
                }
            }

            tail = next_slot(tail, cfg.n_entries);
            host.publish_completion_tail(cfg.id, tail)?;
        }

        Ok(handled)
    }

    /// Start creating the ring. `None` if it already exists.
    pub(crate) fn begin_create<B: Bus>(
        &self,
        io: &RingIo<'_, B>,
    ) -> Result<Option<CreateCompletionRingMsg>> {
        let cfg = &self.cfg;
        let mut status = self.status.lock();
        match *status {
            RingStatus::Unconfigured => {}
            RingStatus::Enabled => {
                debug!("completion ring {} already enabled", cfg.id.name());
                return Ok(None);
            }
            other => {
                return Err(CipcError::RingState {
                    ring: cfg.id.name(),
                    state: other.name(),
                    op: "create",
                });
            }
        }

        io.mem().clear(self.slots.addr, self.slots.len)?;
        io.host().reset_completion(cfg.id)?;
        *status = RingStatus::Creating;

        Ok(Some(CreateCompletionRingMsg::new(
            cfg.id as u16,
            self.slots.addr,
            cfg.n_entries,
            cfg.payload_size,
            cfg.delay,
        )))
    }

    pub(crate) fn finish_create(&self) {
        *self.status.lock() = RingStatus::Enabled;
    }

    pub(crate) fn abort_create(&self) {
        *self.status.lock() = RingStatus::Unconfigured;
    }

    pub(crate) fn begin_destroy(&self) -> Result<DestroyRingMsg> {
        let mut status = self.status.lock();
        if *status != RingStatus::Enabled {
            return Err(CipcError::RingState {
                ring: self.cfg.id.name(),
                state: status.name(),
                op: "destroy",
            });
        }
        *status = RingStatus::Destroying;
        Ok(DestroyRingMsg::completion(self.cfg.id as u16))
    }

    pub(crate) fn finish_destroy(&self) {
        *self.status.lock() = RingStatus::Unconfigured;
    }

    /// Enable the control completion ring, which the device learns about
    /// from the context block.
    pub(crate) fn enable<B: Bus>(&self, io: &RingIo<'_, B>) -> Result<()> {
        let mut status = self.status.lock();
        io.mem().clear(self.slots.addr, self.slots.len)?;
        io.host().reset_completion(self.cfg.id)?;
        *status = RingStatus::Enabled;
        Ok(())
    }
}
