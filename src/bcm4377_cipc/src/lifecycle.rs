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

//! Creating and destroying the data rings over the control ring.

use bytemuck::{Pod, bytes_of};
use tracing::{Span, debug, error, instrument, warn};

use crate::bus::Bus;
use crate::device::Bcm4377;
use crate::error::Result;
use crate::ring::{CompletionRingId, RingStatus, TransferRingId};

/// Completion rings are created before the transfer rings that report to
/// them and destroyed after them.
const COMPLETION_OPEN_ORDER: [CompletionRingId; 4] = [
    CompletionRingId::HciAclAck,
    CompletionRingId::HciAclEvent,
    CompletionRingId::ScoAck,
    CompletionRingId::ScoEvent,
];

const TRANSFER_OPEN_ORDER: [TransferRingId; 6] = [
    TransferRingId::HciH2d,
    TransferRingId::HciD2h,
    TransferRingId::ScoH2d,
    TransferRingId::ScoD2h,
    TransferRingId::AclH2d,
    TransferRingId::AclD2h,
];

#[derive(Debug, Clone, Copy)]
enum Ring {
    Completion(CompletionRingId),
    Transfer(TransferRingId),
}

impl<B: Bus> Bcm4377<B> {
    /// Send a control message and wait for the device to acknowledge it.
    fn control_send<M: Pod>(&self, msg: &M) -> Result<()> {
        self.transfer_ring(TransferRingId::Control)
            .enqueue(&self.io(), bytes_of(msg), true)
    }

    /// Announce a completion ring to the device. A ring that is already
    /// enabled is left alone.
    pub fn create_completion_ring(&self, id: CompletionRingId) -> Result<()> {
        let ring = self.completion_ring(id);
        let Some(msg) = ring.begin_create(&self.io())? else {
            return Ok(());
        };

        if let Err(e) = self.control_send(&msg) {
            error!("failed to create completion ring {}: {}", id.name(), e);
            ring.abort_create();
            return Err(e);
        }
        ring.finish_create();
        debug!("created completion ring {}", id.name());
        Ok(())
    }

    /// Tell the device to forget a completion ring. The host forgets it
    /// whatever the device answers.
    pub fn destroy_completion_ring(&self, id: CompletionRingId) -> Result<()> {
        let ring = self.completion_ring(id);
        let msg = ring.begin_destroy()?;

        let res = self.control_send(&msg);
        if let Err(e) = &res {
            warn!("failed to destroy completion ring {}: {}", id.name(), e);
        }
        ring.finish_destroy();
        res
    }

    /// Announce a transfer ring to the device. Device-to-host rings are
    /// handed their receive buffers once the device accepted the ring.
    pub fn create_transfer_ring(&self, id: TransferRingId) -> Result<()> {
        let ring = self.transfer_ring(id);
        let io = self.io();
        let msg = ring.begin_create(&io)?;

        let res = self
            .control_send(&msg)
            .and_then(|()| ring.finish_create(&io));
        if let Err(e) = res {
            error!("failed to create transfer ring {}: {}", id.name(), e);
            ring.abort_create();
            return Err(e);
        }
        debug!(
            "created transfer ring {} generation {}",
            id.name(),
            ring.generation()
        );
        Ok(())
    }

    /// Tell the device to forget a transfer ring. Senders still waiting
    /// for an acknowledgement on it observe a reset.
    pub fn destroy_transfer_ring(&self, id: TransferRingId) -> Result<()> {
        let ring = self.transfer_ring(id);
        let msg = ring.begin_destroy()?;

        let res = self.control_send(&msg);
        if let Err(e) = &res {
            warn!("failed to destroy transfer ring {}: {}", id.name(), e);
        }
        ring.finish_destroy();
        res
    }

    fn destroy(&self, ring: Ring) -> Result<()> {
        match ring {
            Ring::Completion(id) => self.destroy_completion_ring(id),
            Ring::Transfer(id) => self.destroy_transfer_ring(id),
        }
    }

    /// Create every data ring. On failure the rings created so far are
    /// destroyed again, newest first, and the first error is returned.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn open(&self) -> Result<()> {
        let mut created: Vec<Ring> = Vec::with_capacity(10);

        let res: Result<()> = (|| {
            for id in COMPLETION_OPEN_ORDER {
                if self.completion_ring(id).status() == RingStatus::Enabled {
                    continue;
                }
                self.create_completion_ring(id)?;
                created.push(Ring::Completion(id));
            }
            for id in TRANSFER_OPEN_ORDER {
                self.create_transfer_ring(id)?;
                created.push(Ring::Transfer(id));
            }
            Ok(())
        })();

        if res.is_err() {
            for ring in created.into_iter().rev() {
                // already logged by destroy
                let _ = self.destroy(ring);
            }
        }
        res
    }

    /// Destroy every enabled data ring, transfer rings first.
    #[instrument(skip_all, parent = Span::current(), level = "Trace")]
    pub fn close(&self) {
        let transfer = TRANSFER_OPEN_ORDER.into_iter().rev().map(Ring::Transfer);
        let completion = COMPLETION_OPEN_ORDER.into_iter().rev().map(Ring::Completion);

        for ring in transfer.chain(completion) {
            let status = match ring {
                Ring::Completion(id) => self.completion_ring(id).status(),
                Ring::Transfer(id) => self.transfer_ring(id).status(),
            };
            if status == RingStatus::Enabled {
                let _ = self.destroy(ring);
            }
        }
    }
}
