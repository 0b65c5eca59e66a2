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

use std::cmp::{max, min};
use std::time::Duration;

/// Tunables of a transport instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceConfiguration {
    /// Bound on a blocking send and on each boot/RTI handshake step, in
    /// milliseconds.
    wait_timeout: u16,
    /// Interrupt moderation delay announced for the HCI/ACL completion
    /// rings.
    interrupt_moderation_delay: u16,
}

impl DeviceConfiguration {
    /// The default wait timeout (in milliseconds)
    pub const DEFAULT_WAIT_TIMEOUT: u16 = 1000;
    /// The minimum wait timeout (in milliseconds)
    pub const MIN_WAIT_TIMEOUT: u16 = 1;
    /// The maximum wait timeout (in milliseconds)
    pub const MAX_WAIT_TIMEOUT: u16 = u16::MAX;
    /// The default interrupt moderation delay of the HCI/ACL completion rings
    pub const DEFAULT_INTERRUPT_MODERATION_DELAY: u16 = 1000;

    /// Set the timeout of blocking sends and boot handshake steps. A zero
    /// duration selects `DEFAULT_WAIT_TIMEOUT`; other values are clamped to
    /// `MIN_WAIT_TIMEOUT..=MAX_WAIT_TIMEOUT`.
    pub fn set_wait_timeout(&mut self, timeout: Duration) {
        self.wait_timeout = match timeout.as_millis() {
            0 => Self::DEFAULT_WAIT_TIMEOUT,
            1.. => min(
                Self::MAX_WAIT_TIMEOUT.into(),
                max(timeout.as_millis(), Self::MIN_WAIT_TIMEOUT.into()),
            ) as u16,
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout.into())
    }

    pub fn set_interrupt_moderation_delay(&mut self, delay: u16) {
        self.interrupt_moderation_delay = delay;
    }

    pub fn interrupt_moderation_delay(&self) -> u16 {
        self.interrupt_moderation_delay
    }
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        Self {
            wait_timeout: Self::DEFAULT_WAIT_TIMEOUT,
            interrupt_moderation_delay: Self::DEFAULT_INTERRUPT_MODERATION_DELAY,
        }
    }
}

/// Board identification, resolved by the platform before attach.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BoardInfo {
    /// Board type such as `apple,formosa`. `None` uses the chip's default,
    /// if it has one.
    pub board_type: Option<String>,
    /// Chip stepping as read from OTP, e.g. `b1`
    pub stepping: String,
    /// Module vendor as read from OTP, e.g. `u`
    pub vendor: String,
    /// Calibration blob from the device tree
    pub taurus_cal: Option<Vec<u8>>,
    /// Beamforming calibration blob from the device tree
    pub taurus_beamforming_cal: Option<Vec<u8>>,
}
