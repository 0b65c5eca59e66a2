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

use thiserror::Error;

use crate::ring::TransferRingId;

/// The error type for transport operations
#[derive(Error, Debug)]
pub enum CipcError {
    /// A bus operation (register access, DMA allocation, interrupt
    /// registration) failed
    #[error("Bus operation failed: {0}")]
    Bus(String),

    /// A DMA read or write at the given device address failed
    #[error("DMA access at {0:#x} failed")]
    MemoryAccess(u64),

    /// No firmware blob could be found under any of the candidate names
    #[error("Firmware not found, tried {0:?}")]
    FirmwareNotFound(Vec<String>),

    /// A synchronous HCI command issued during setup failed
    #[error("HCI command {opcode:#06x} failed: {reason}")]
    HciCommand {
        /// The HCI opcode
        opcode: u16,
        /// What went wrong
        reason: String,
    },

    /// A caller supplied an argument the transport cannot use
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The device reported a value other than the one the protocol requires
    #[error("Unexpected {what}: expected {expected:#x}, device reported {actual:#x}")]
    Protocol {
        /// Which status was checked
        what: &'static str,
        /// The required value
        expected: u32,
        /// The value the device reported
        actual: u32,
    },

    /// The transfer ring has no free slot
    #[error("Transfer ring {0:?} is full")]
    RingFull(TransferRingId),

    /// All message ids of the transfer ring are in use
    #[error("No free message id on transfer ring {0:?}")]
    NoFreeId(TransferRingId),

    /// The ring was recreated while a caller was waiting on it
    #[error("Transfer ring {0:?} was reset while a send was outstanding")]
    RingReset(TransferRingId),

    /// A ring operation was requested in a lifecycle state that forbids it
    #[error("Ring {ring} is {state}, cannot {op}")]
    RingState {
        /// Human readable ring name
        ring: &'static str,
        /// The current lifecycle state
        state: &'static str,
        /// The rejected operation
        op: &'static str,
    },

    /// A message id carried a generation other than the current one, or an
    /// index outside the ring
    #[error("Stale message id {raw:#06x} (current generation {generation})")]
    Stale {
        /// The tagged id as read from the device
        raw: u16,
        /// The generation the ring is currently on
        generation: u8,
    },

    /// A completion entry the device posted cannot be used
    #[error("Invalid completion for transfer ring {ring}: {reason}")]
    InvalidEntry {
        /// The raw transfer ring id from the entry
        ring: u16,
        /// Why the entry was rejected
        reason: &'static str,
    },

    /// A ring position read from the shared ring state block lies outside
    /// the ring
    #[error("Ring {ring} {cursor} {value} is outside the ring ({n_entries} entries)")]
    CorruptCursor {
        /// Human readable ring name
        ring: &'static str,
        /// Which cursor was read
        cursor: &'static str,
        /// The value found in shared memory
        value: u16,
        /// Size of the ring
        n_entries: u16,
    },

    /// The device did not answer within the configured timeout
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

impl CipcError {
    /// Whether the error leaves the device in a state that requires a
    /// full re-probe.
    pub fn is_fatal(&self) -> bool {
        // wildcard _ or matches! not used here purposefully to ensure that new error variants
        // are explicitly considered.
        match self {
            // The boot or control path is out of sync with the firmware.
            CipcError::Protocol { .. } | CipcError::FirmwareNotFound(_) | CipcError::Bus(_) => {
                true
            }

            // Shared ring state can no longer be trusted.
            CipcError::CorruptCursor { .. } => true,

            // Everything else is scoped to a single operation.
            CipcError::MemoryAccess(_)
            | CipcError::HciCommand { .. }
            | CipcError::InvalidArgument(_)
            | CipcError::RingFull(_)
            | CipcError::NoFreeId(_)
            | CipcError::RingReset(_)
            | CipcError::RingState { .. }
            | CipcError::Stale { .. }
            | CipcError::InvalidEntry { .. }
            | CipcError::Timeout(_) => false,
        }
    }
}

impl CipcError {
    /// Short label for a completion that was dropped, used for logs and
    /// metrics.
    pub(crate) fn drop_reason(&self) -> &'static str {
        match self {
            CipcError::Stale { .. } => "stale",
            CipcError::InvalidEntry { reason, .. } => reason,
            CipcError::CorruptCursor { .. } => "corrupt cursor",
            _ => "error",
        }
    }
}

/// The result type used throughout the crate
pub type Result<T> = core::result::Result<T, CipcError>;

/// Creates a `CipcError::InvalidArgument` from a string literal or format string
#[macro_export]
macro_rules! invalid_arg {
    ($msg:literal $(,)?) => {{
        let __args = std::format_args!($msg);
        let __err_msg = match __args.as_str() {
            Some(msg) => String::from(msg),
            None => std::format!($msg),
        };
        $crate::error::CipcError::InvalidArgument(__err_msg)
    }};
    ($fmtstr:expr, $($arg:tt)*) => {{
           let __err_msg = std::format!($fmtstr, $($arg)*);
           $crate::error::CipcError::InvalidArgument(__err_msg)
    }};
}
