// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fs::File, io::ErrorKind, os::unix::fs::FileExt, path::Path};

use marmot_ds::{DataStorage, IoError, Result};

/// Volume image backed by a regular file or block device.
///
/// `base_offset` shifts every read, which addresses a volume that does not
/// start at the beginning of the image (partitioned disk dumps).
pub struct FileDataStorage {
    file: File,
    base_offset: u64,
}

impl FileDataStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_at(path, 0)
    }

    pub fn open_at(path: impl AsRef<Path>, base_offset: u64) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file, base_offset })
    }
}

impl DataStorage for FileDataStorage {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let offset = self
            .base_offset
            .checked_add(offset)
            .ok_or(IoError::EndOfMedia { offset })?;
        self.file
            .read_exact_at(buffer, offset)
            .map_err(|error| match error.kind() {
                ErrorKind::UnexpectedEof => IoError::EndOfMedia { offset }.into(),
                _ => error.into(),
            })
    }
}
