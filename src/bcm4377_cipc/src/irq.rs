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

//! Interrupt dispatch.

use bytes::Bytes;
use smallvec::SmallVec;
use tracing::{debug, error};

use crate::bus::{Bus, IrqReturn};
use crate::device::{Bcm4377, DeviceStatus};
use crate::hci::HciPacketType;
use crate::metrics::{CounterMetric, EmittableMetric};
use crate::regs::Registers;
use crate::ring::CompletionRingId;

/// Rings drained on every interrupt, in this order. Control acks go first
/// so a blocked ring operation is released as early as possible.
const DRAIN_ORDER: [CompletionRingId; 5] = [
    CompletionRingId::ControlAck,
    CompletionRingId::HciAclEvent,
    CompletionRingId::HciAclAck,
    CompletionRingId::ScoAck,
    CompletionRingId::ScoEvent,
];

impl<B: Bus> Bcm4377<B> {
    /// Service an interrupt from the controller.
    ///
    /// Picks up boot stage and RTI status changes and drains every enabled
    /// completion ring. Inbound frames are handed to the sink once the
    /// drain is over, so the sink never runs with a ring lock held.
    pub fn handle_interrupt(&self) -> IrqReturn {
        self.update_status();

        let io = self.io();
        let mut frames: SmallVec<[(HciPacketType, Bytes); 4]> = SmallVec::new();

        for id in DRAIN_ORDER {
            let res = self.completion_ring(id).poll(&io, |ring, entry, inline| {
                let xfer = self.transfer_ring(ring);
                match ring.event_type() {
                    None => xfer.handle_ack(entry.msg_id()),
                    Some(kind) => {
                        frames.push((kind, xfer.handle_event(&io, entry, inline)?));
                        Ok(())
                    }
                }
            });
            if let Err(e) = res {
                error!("failed to drain completion ring {}: {}", id.name(), e);
            }
        }

        for (kind, frame) in frames {
            CounterMetric::rx_packet(kind.name()).emit();
            self.sink.receive(kind, frame);
        }

        IrqReturn::Handled
    }

    fn update_status(&self) {
        let regs = Registers::new(&self.bus);
        let now = DeviceStatus {
            bootstage: regs.bootstage(),
            rti_status: regs.rti_status(),
        };

        let mut status = self.status.lock();
        if *status != now {
            debug!(
                "bootstage {} -> {}, RTI status {} -> {}",
                status.bootstage, now.bootstage, status.rti_status, now.rti_status
            );
            *status = now;
            self.status_changed.signal();
        }
    }
}
