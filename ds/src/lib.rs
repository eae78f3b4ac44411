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

pub use marmot_err::{Error, FormatError, IoError, Result};

/// Positioned byte source over a volume image.
///
/// Reads are absolute, synchronous and reentrancy-safe: there is no cursor,
/// so concurrent callers only have to agree on offsets. A read that cannot
/// fill the whole buffer fails with [`IoError::EndOfMedia`].
pub trait DataStorage {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;
}

impl DataStorage for &[u8] {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| IoError::EndOfMedia { offset })?;
        let end = start
            .checked_add(buffer.len())
            .filter(|&end| end <= self.len())
            .ok_or(IoError::EndOfMedia { offset })?;
        buffer.copy_from_slice(&self[start..end]);
        Ok(())
    }
}

impl DataStorage for Vec<u8> {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        self.as_slice().read(offset, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_read() {
        let data: &[u8] = &[0x10, 0x20, 0x30, 0x40];
        let mut buffer = [0u8; 2];
        data.read(1, &mut buffer).unwrap();
        assert_eq!(buffer, [0x20, 0x30]);
    }

    #[test]
    fn slice_read_past_end() {
        let data: &[u8] = &[0x10, 0x20];
        let mut buffer = [0u8; 4];
        assert!(matches!(
            data.read(1, &mut buffer),
            Err(Error::Io(IoError::EndOfMedia { offset: 1 }))
        ));
    }
}
