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

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]

//! Host side of the Converged IPC transport spoken by Broadcom BCM4377,
//! BCM4378 and BCM4387 PCIe Bluetooth controllers.
//!
//! The controller and the host share rings in host memory. Transfer rings
//! carry entries from one side to the other, completion rings report what
//! the other side did with them. A fixed context block hands the firmware
//! the control rings, over which every other ring is created.
//!
//! The platform supplies a [`Bus`] (register access, DMA memory) and an
//! [`HciSink`] for inbound frames, then drives a [`Bcm4377`] through
//! [`Bcm4377::boot`], [`Bcm4377::open`] and [`Bcm4377::send`], calling
//! [`Bcm4377::handle_interrupt`] from its interrupt path.

/// Firmware boot and the RTI handshake
mod boot;
/// The platform interface: registers, config space and DMA memory
pub mod bus;
/// Tunables and board description
pub mod config;
/// The context block handed to the firmware at RTI state 2
pub mod context;
mod device;
/// Error types
pub mod error;
/// Locating firmware images and board blobs
pub mod firmware;
/// HCI packet types and the vendor commands used during setup
pub mod hci;
/// Per-chip quirks
pub mod hw;
mod irq;
mod lifecycle;
/// Raw memory access for DMA buffers
pub mod mem;
/// Metric definitions
mod metrics;
/// Generation-tagged message ids
pub mod msgid;
/// Register map and doorbells
pub mod regs;
/// Transfer and completion rings
pub mod ring;
mod wait;
/// On-wire layouts of ring entries and control messages
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use boot::BootState;
pub use bus::{Bar, Bus, IrqReturn};
pub use config::{BoardInfo, DeviceConfiguration};
pub use device::Bcm4377;
pub use error::{CipcError, Result};
pub use firmware::{DirectoryLoader, FirmwareLoader};
pub use hci::{HciCommandSender, HciPacketType, HciSink};
pub use hw::ChipVariant;
pub use mem::{DmaBuffer, MemOps};
