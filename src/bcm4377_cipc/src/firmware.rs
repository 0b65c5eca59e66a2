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

//! Firmware and board blob lookup.

use std::path::PathBuf;

use tracing::{error, info};

use crate::config::BoardInfo;
use crate::error::{CipcError, Result};
use crate::hw::HwVariant;

/// Source of firmware files, addressed by their `brcm/...` name.
pub trait FirmwareLoader {
    /// Contents of `name`, or `None` if there is no such file.
    fn request(&self, name: &str) -> Option<Vec<u8>>;
}

/// Loads firmware from a directory tree laid out like `/lib/firmware`.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FirmwareLoader for DirectoryLoader {
    fn request(&self, name: &str) -> Option<Vec<u8>> {
        std::fs::read(self.root.join(name)).ok()
    }
}

/// Candidate names for a blob, most specific first.
pub fn blob_names(hw: &HwVariant, board_type: &str, board: &BoardInfo, suffix: &str) -> [String; 2] {
    let (chip, stepping) = (hw.name, &board.stepping);
    [
        format!(
            "brcm/brcmbt{chip}{stepping}-{board_type}-{}.{suffix}",
            board.vendor
        ),
        format!("brcm/brcmbt{chip}{stepping}-{board_type}.{suffix}"),
    ]
}

/// Load the `suffix` blob for this chip and board, trying each name from
/// [`blob_names`] in turn.
pub fn request_blob(
    loader: &dyn FirmwareLoader,
    hw: &HwVariant,
    board_type: &str,
    board: &BoardInfo,
    suffix: &str,
) -> Result<Vec<u8>> {
    let names = blob_names(hw, board_type, board, suffix);
    for name in &names {
        info!("Trying to load '{}'", name);
        if let Some(blob) = loader.request(name) {
            return Ok(blob);
        }
    }

    error!(
        "Unable to load firmware (type: {}, chip: {}, board: {}, stepping: {}, vendor: {})",
        suffix, hw.name, board_type, board.stepping, board.vendor
    );
    Err(CipcError::FirmwareNotFound(names.into()))
}
