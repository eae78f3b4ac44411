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

use std::sync::atomic::{AtomicBool, Ordering};

use marmot_err::{FormatError, IoError, Result};

use crate::volume_header::VolumeHeader;

/// Major on-disk format revision. Fixes the shape of every versioned
/// structure (block headers, block references, checkpoint trailers), so it
/// is resolved once per volume instead of once per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V1,
    V3,
}

impl FormatVersion {
    pub(crate) fn block_header_size(self) -> usize {
        match self {
            Self::V1 => 48,
            Self::V3 => 80,
        }
    }

    pub(crate) fn block_reference_size(self) -> usize {
        match self {
            Self::V1 => 16,
            Self::V3 => 40,
        }
    }
}

/// Format-wide invariants shared by every decoder of an open volume.
///
/// Created once from the volume header and borrowed read-only for the
/// lifetime of the volume handle. The abort flag is the only mutable state;
/// it is polled before each metadata block read.
#[derive(Debug)]
pub struct IoContext {
    pub bytes_per_sector: u32,
    pub cluster_block_size: u32,
    pub metadata_block_size: u32,
    pub volume_size: u64,
    pub major_format_version: u8,
    pub minor_format_version: u8,
    /// Container size in metadata blocks, zero when absent (v1).
    pub container_size: u64,
    version: FormatVersion,
    abort: AtomicBool,
}

impl IoContext {
    pub fn new(volume_header: &VolumeHeader) -> Result<Self> {
        let version = match volume_header.major_format_version {
            1 => FormatVersion::V1,
            3 => FormatVersion::V3,
            _ => {
                log::error!(
                    "Unsupported format version {}.{}",
                    volume_header.major_format_version,
                    volume_header.minor_format_version
                );
                return Err(FormatError::UnsupportedVersion {
                    major: volume_header.major_format_version,
                    minor: volume_header.minor_format_version,
                }
                .into());
            }
        };
        let metadata_block_size: u32 = match version {
            FormatVersion::V1 => 16384,
            FormatVersion::V3 => 4096,
        };
        if metadata_block_size % volume_header.bytes_per_sector != 0 {
            return Err(FormatError::InvalidFormat {
                context: "metadata block size shall be a multiple of the sector size",
            }
            .into());
        }
        let cluster_block_size = volume_header
            .bytes_per_sector
            .checked_mul(volume_header.sectors_per_cluster_block)
            .ok_or(FormatError::InvalidFormat {
                context: "cluster block size overflow",
            })?;

        Ok(Self {
            bytes_per_sector: volume_header.bytes_per_sector,
            cluster_block_size,
            metadata_block_size,
            volume_size: volume_header.volume_size,
            major_format_version: volume_header.major_format_version,
            minor_format_version: volume_header.minor_format_version,
            container_size: volume_header.container_size / u64::from(metadata_block_size),
            version,
            abort: AtomicBool::new(false),
        })
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Metadata blocks the volume spans, used to locate the trailing
    /// superblock copy.
    pub fn metadata_block_count(&self) -> u64 {
        self.volume_size / u64::from(self.metadata_block_size)
    }

    /// Size of the logical block carrying a ministore node. The v3 4 KiB
    /// format composes a node out of four physical blocks.
    pub fn node_block_size(&self) -> u32 {
        if self.metadata_block_size == 4096 {
            self.metadata_block_size * 4
        } else {
            self.metadata_block_size
        }
    }

    pub fn block_offset(&self, block_number: u64) -> u64 {
        block_number * u64::from(self.metadata_block_size)
    }

    pub fn signal_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub(crate) fn check_abort(&self) -> Result<()> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(IoError::Aborted.into());
        }
        Ok(())
    }
}
