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

//! Per-chip hardware description.

use tracing::debug;

use crate::bus::Bus;
use crate::config::BoardInfo;
use crate::error::Result;
use crate::hci::{self, HciCommandSender};
use crate::invalid_arg;

pub const BCM4377_DEVICE_ID: u16 = 0x5fa0;
pub const BCM4378_DEVICE_ID: u16 = 0x5f69;
pub const BCM4387_DEVICE_ID: u16 = 0x5f71;

const PCIECFG_BAR0_WINDOW1: u32 = 0x70;
const PCIECFG_BAR0_WINDOW4: u32 = 0x74;
const PCIECFG_BAR0_WINDOW5: u32 = 0x78;
const PCIECFG_BAR0_WINDOW0: u32 = 0x80;
const PCIECFG_BAR2_WINDOW: u32 = 0x84;
const PCIECFG_SUBSYSTEM_CTRL: u32 = 0x88;

const BAR0_WINDOW4_DEFAULT: u32 = 0x18011000;
const BAR2_WINDOW_DEFAULT: u32 = 0x19000000;
const SUBSYSTEM_CTRL_M2M_RESET_ON_SS_RESET: u32 = 1 << 19;
const SUBSYSTEM_CTRL_BIT16: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipVariant {
    Bcm4377,
    Bcm4378,
    Bcm4387,
}

impl ChipVariant {
    pub fn from_device_id(device_id: u16) -> Option<Self> {
        match device_id {
            BCM4377_DEVICE_ID => Some(Self::Bcm4377),
            BCM4378_DEVICE_ID => Some(Self::Bcm4378),
            BCM4387_DEVICE_ID => Some(Self::Bcm4387),
            _ => None,
        }
    }

    pub fn hw(self) -> &'static HwVariant {
        match self {
            Self::Bcm4377 => &BCM4377,
            Self::Bcm4378 => &BCM4378,
            Self::Bcm4387 => &BCM4387,
        }
    }
}

/// Which calibration blob a chip wants, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStrategy {
    None,
    /// Upload the beamforming blob on the listed steppings and the plain
    /// blob otherwise.
    Taurus {
        beamforming_steppings: &'static [&'static str],
    },
}

/// How a chip takes its PTB blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtbStrategy {
    Single,
    Chunked,
}

#[derive(Debug, PartialEq, Eq)]
pub struct HwVariant {
    /// Chip part of firmware file names
    pub name: &'static str,
    pub otp_offset: u32,
    pub bar0_window0: u32,
    pub bar0_window1: u32,
    pub bar0_window5: Option<u32>,
    pub m2m_reset_on_ss_reset_disabled: bool,
    /// Board type used when the platform does not provide one
    pub board_type: Option<&'static str>,
    pub calibration: CalibrationStrategy,
    pub ptb: PtbStrategy,
}

static BCM4377: HwVariant = HwVariant {
    name: "4377",
    otp_offset: 0x4120,
    bar0_window0: 0x1800b000,
    bar0_window1: 0x1810c000,
    bar0_window5: None,
    m2m_reset_on_ss_reset_disabled: false,
    board_type: Some("apple,formosa"),
    calibration: CalibrationStrategy::None,
    ptb: PtbStrategy::Single,
};

static BCM4378: HwVariant = HwVariant {
    name: "4378",
    otp_offset: 0x4120,
    bar0_window0: 0x18002000,
    bar0_window1: 0x1810a000,
    bar0_window5: Some(0x18107000),
    m2m_reset_on_ss_reset_disabled: false,
    board_type: None,
    calibration: CalibrationStrategy::Taurus {
        beamforming_steppings: &["b1", "b3"],
    },
    ptb: PtbStrategy::Chunked,
};

static BCM4387: HwVariant = HwVariant {
    name: "4387",
    otp_offset: 0x413c,
    bar0_window0: 0x18002000,
    bar0_window1: 0x18109000,
    bar0_window5: Some(0x18106000),
    m2m_reset_on_ss_reset_disabled: true,
    board_type: None,
    calibration: CalibrationStrategy::Taurus {
        beamforming_steppings: &["c2"],
    },
    ptb: PtbStrategy::Chunked,
};

impl HwVariant {
    /// Program the vendor BAR windows and the subsystem control register.
    pub(crate) fn init_config_space<B: Bus>(&self, bus: &B) -> Result<()> {
        bus.write_config(PCIECFG_BAR0_WINDOW0, self.bar0_window0)?;
        bus.write_config(PCIECFG_BAR0_WINDOW1, self.bar0_window1)?;
        bus.write_config(PCIECFG_BAR0_WINDOW4, BAR0_WINDOW4_DEFAULT)?;
        if let Some(window5) = self.bar0_window5 {
            bus.write_config(PCIECFG_BAR0_WINDOW5, window5)?;
        }
        bus.write_config(PCIECFG_BAR2_WINDOW, BAR2_WINDOW_DEFAULT)?;

        let mut ctrl = bus.read_config(PCIECFG_SUBSYSTEM_CTRL)?;
        if self.m2m_reset_on_ss_reset_disabled {
            ctrl &= !SUBSYSTEM_CTRL_M2M_RESET_ON_SS_RESET;
        }
        ctrl |= SUBSYSTEM_CTRL_BIT16;
        bus.write_config(PCIECFG_SUBSYSTEM_CTRL, ctrl)
    }

    /// The calibration blob for `board`. `Ok(None)` if the chip takes
    /// none; an error if it needs one the platform did not provide.
    pub fn calibration_blob<'a>(&self, board: &'a BoardInfo) -> Result<Option<&'a [u8]>> {
        let CalibrationStrategy::Taurus {
            beamforming_steppings,
        } = self.calibration
        else {
            return Ok(None);
        };

        let beamforming = beamforming_steppings.contains(&board.stepping.as_str());
        let blob = if beamforming {
            board.taurus_beamforming_cal.as_deref()
        } else {
            board.taurus_cal.as_deref()
        };
        match blob {
            Some(blob) => Ok(Some(blob)),
            None => Err(invalid_arg!(
                "no {}calibration data available for stepping {}",
                if beamforming { "beamforming " } else { "" },
                board.stepping
            )),
        }
    }

    pub(crate) fn send_calibration(
        &self,
        sender: &dyn HciCommandSender,
        board: &BoardInfo,
    ) -> Result<()> {
        match self.calibration_blob(board)? {
            Some(blob) => {
                debug!("uploading {} bytes of calibration data", blob.len());
                hci::send_calibration(sender, blob)
            }
            None => Ok(()),
        }
    }

    pub(crate) fn send_ptb(&self, sender: &dyn HciCommandSender, blob: &[u8]) -> Result<()> {
        match self.ptb {
            PtbStrategy::Single => hci::send_ptb(sender, blob),
            PtbStrategy::Chunked => hci::send_ptb_chunked(sender, blob),
        }
    }
}
