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

//! Firmware boot and the RTI handshake.
//!
//! The boot ROM loads the firmware image from host memory and reports a
//! new boot stage. The firmware then walks the RTI ("runtime interface")
//! through two states, the second of which hands it the context block and
//! with it the control rings.

use tracing::{Span, debug, error, instrument};

use crate::bus::{Bus, DmaGuard};
use crate::device::{Bcm4377, DeviceStatus};
use crate::error::{CipcError, Result};
use crate::firmware::{FirmwareLoader, request_blob};
use crate::mem::MemOpsExt;
use crate::regs::Registers;
use crate::ring::{CompletionRingId, TransferRingId};

const BOOTSTAGE_RUNNING: u32 = 2;
const RTI_STATE_1: u32 = 1;
const RTI_STATE_2: u32 = 2;

/// Bring-up progress of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    PoweredOff,
    FirmwareLoading,
    FirmwareBooted,
    RtiState1,
    /// The control rings are usable
    RtiState2,
}

impl<B: Bus> Bcm4377<B> {
    /// Load the firmware and walk the RTI to state 2. Any failure leaves
    /// the device powered off from the host's point of view.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn boot(&self, loader: &dyn FirmwareLoader) -> Result<()> {
        let res = request_blob(loader, self.hw, &self.board_type, &self.board, "bin")
            .and_then(|image| self.load_firmware(&image))
            .and_then(|()| self.start_rti())
            .and_then(|()| self.enable_control_rings());

        if res.is_err() {
            self.set_boot_state(BootState::PoweredOff);
        }
        res
    }

    fn set_boot_state(&self, state: BootState) {
        let mut cur = self.boot_state.lock();
        debug!("boot state {:?} -> {:?}", *cur, state);
        *cur = state;
    }

    /// Wait for the interrupt handler to report a status change, then read
    /// the status registers again.
    fn wait_for_status(&self, what: &'static str) -> Result<DeviceStatus> {
        if !self.status_changed.wait_timeout(self.config.wait_timeout()) {
            error!("timeout while waiting for {}", what);
            return Err(CipcError::Timeout(what));
        }
        let regs = Registers::new(&self.bus);
        Ok(DeviceStatus {
            bootstage: regs.bootstage(),
            rti_status: regs.rti_status(),
        })
    }

    /// Copy `image` to DMA memory and let the boot ROM start it.
    fn load_firmware(&self, image: &[u8]) -> Result<()> {
        self.set_boot_state(BootState::FirmwareLoading);
        let regs = Registers::new(&self.bus);

        // the boot ROM is done with the copy once it reported back
        let fw = DmaGuard::alloc(&self.bus, image.len())?;
        self.bus.mem().write_bytes(fw.addr, image)?;

        self.status_changed.reset();
        regs.open_host_window();
        regs.start_firmware(&fw);

        let status = self.wait_for_status("firmware boot")?;
        if status.bootstage != BOOTSTAGE_RUNNING {
            error!(
                "boot stage is {} instead of {}",
                status.bootstage, BOOTSTAGE_RUNNING
            );
            return Err(CipcError::Protocol {
                what: "boot stage",
                expected: BOOTSTAGE_RUNNING,
                actual: status.bootstage,
            });
        }

        debug!("firmware has booted (stage = {:#x})", status.bootstage);
        self.set_boot_state(BootState::FirmwareBooted);
        Ok(())
    }

    fn rti_transition(&self, state: u32, what: &'static str) -> Result<()> {
        self.status_changed.reset();
        Registers::new(&self.bus).rti_control(state);

        let status = self.wait_for_status(what)?;
        if status.rti_status != state {
            error!("RTI did not ack state {} ({:#x})", state, status.rti_status);
            return Err(CipcError::Protocol {
                what: "RTI status",
                expected: state,
                actual: status.rti_status,
            });
        }
        Ok(())
    }

    fn start_rti(&self) -> Result<()> {
        self.rti_transition(RTI_STATE_1, "RTI state 1")?;
        self.set_boot_state(BootState::RtiState1);
        Ok(())
    }

    /// Hand the context block to the firmware. The control rings it
    /// describes are usable afterwards.
    fn enable_control_rings(&self) -> Result<()> {
        let regs = Registers::new(&self.bus);
        regs.open_rti_window();
        regs.set_context(self.context.context());

        self.rti_transition(RTI_STATE_2, "RTI state 2")?;

        let io = self.io();
        self.completion_ring(CompletionRingId::ControlAck).enable(&io)?;
        self.transfer_ring(TransferRingId::Control).enable(&io)?;
        self.set_boot_state(BootState::RtiState2);
        debug!("RTI is in state 2, control rings are up");
        Ok(())
    }
}
