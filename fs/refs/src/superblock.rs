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

use log::{debug, error};
use marmot_ds::DataStorage;
use marmot_err::{FormatError, Result};
use zerocopy::{
    little_endian::U32,
    FromBytes, IntoBytes, KnownLayout,
};

use crate::{
    block::{read_block, BlockReference, BlockRole, MetadataBlockHeader},
    bytes::{le_u64, read_struct},
    context::IoContext,
};

/// Metadata block number of the primary superblock copy.
pub const PRIMARY_SUPERBLOCK_BLOCK_NUMBER: u64 = 30;

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct SuperblockHeader {
    /// The volume identifier.
    volume_identifier: [u8; 16],
    unknown1: [u8; 8],
    unknown2: [u8; 8],
    /// Offset of the checkpoint references, relative to the start of the
    /// metadata block.
    checkpoint_references_data_offset: U32,
    /// Number of checkpoint references.
    number_of_checkpoint_references: U32,
    /// Offset of the self reference, relative to the start of the metadata
    /// block.
    self_reference_data_offset: U32,
    /// Size of the self reference.
    self_reference_data_size: U32,
}

/// The root on-disk structure: names the volume and locates the two
/// checkpoints.
#[derive(Debug)]
pub struct Superblock {
    pub volume_identifier: [u8; 16],
    pub primary_checkpoint_block_number: u64,
    pub secondary_checkpoint_block_number: u64,
}

impl Superblock {
    pub fn read<DS: DataStorage>(
        context: &IoContext,
        data_storage: &DS,
        block_number: u64,
    ) -> Result<Self> {
        let block_offset = context.block_offset(block_number);
        let data = read_block(context, data_storage, block_number)?;
        MetadataBlockHeader::read(context, &data, BlockRole::Superblock, block_offset)?;

        let header_size = context.version().block_header_size();
        Self::read_data(context, &data[header_size..])
    }

    fn read_data(context: &IoContext, data: &[u8]) -> Result<Self> {
        let header = read_struct::<SuperblockHeader>(data, "superblock")?;
        let block_header_size = context.version().block_header_size();

        // Both data offsets include the metadata block header and are
        // re-based onto the post-header payload before use.
        let references_data_offset =
            header.checkpoint_references_data_offset.get() as usize;
        if references_data_offset < block_header_size
            || references_data_offset >= context.metadata_block_size as usize
        {
            error!("Checkpoint references data offset 0x{references_data_offset:04x} out of bounds");
            return Err(FormatError::OutOfBounds {
                field: "checkpoint references data offset",
                value: references_data_offset as u64,
                limit: context.metadata_block_size as u64,
            }
            .into());
        }
        let references_data_offset = references_data_offset - block_header_size;

        let number_of_references = header.number_of_checkpoint_references.get();
        if number_of_references < 2 {
            error!("Superblock references {number_of_references} checkpoints, expected 2");
            return Err(FormatError::InvalidFormat {
                context: "superblock shall reference two checkpoints",
            }
            .into());
        }

        let primary_checkpoint_block_number = le_u64(
            data,
            references_data_offset,
            "primary checkpoint block number",
        )?;
        let secondary_checkpoint_block_number = le_u64(
            data,
            references_data_offset + 8,
            "secondary checkpoint block number",
        )?;
        debug!(
            "Checkpoints at blocks {primary_checkpoint_block_number} and {secondary_checkpoint_block_number}"
        );

        let self_reference_data_offset = header.self_reference_data_offset.get() as usize;
        let self_reference_data_size = header.self_reference_data_size.get() as usize;
        if self_reference_data_offset < block_header_size
            || self_reference_data_offset >= context.metadata_block_size as usize
        {
            return Err(FormatError::OutOfBounds {
                field: "self reference data offset",
                value: self_reference_data_offset as u64,
                limit: context.metadata_block_size as u64,
            }
            .into());
        }
        if self_reference_data_size != context.version().block_reference_size() {
            return Err(FormatError::OutOfBounds {
                field: "self reference data size",
                value: self_reference_data_size as u64,
                limit: context.version().block_reference_size() as u64,
            }
            .into());
        }
        let self_reference_data_offset = self_reference_data_offset - block_header_size;
        if self_reference_data_offset > data.len() {
            return Err(FormatError::OutOfBounds {
                field: "self reference data offset",
                value: self_reference_data_offset as u64,
                limit: data.len() as u64,
            }
            .into());
        }
        BlockReference::read(context, &data[self_reference_data_offset..])?;

        Ok(Self {
            volume_identifier: header.volume_identifier,
            primary_checkpoint_block_number,
            secondary_checkpoint_block_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{build_superblock_payload, context};

    #[test]
    fn read_v1_payload() {
        let context = context(1);
        let payload = build_superblock_payload(&context, [0xab; 16], 19, 21);
        let superblock = Superblock::read_data(&context, &payload).unwrap();
        assert_eq!(superblock.volume_identifier, [0xab; 16]);
        assert_eq!(superblock.primary_checkpoint_block_number, 19);
        assert_eq!(superblock.secondary_checkpoint_block_number, 21);
    }

    #[test]
    fn reference_offset_inside_header_is_rejected() {
        let context = context(1);
        let mut payload = build_superblock_payload(&context, [0; 16], 19, 21);
        payload[32..36].copy_from_slice(&8u32.to_le_bytes());
        assert!(matches!(
            Superblock::read_data(&context, &payload),
            Err(marmot_err::Error::Format(FormatError::OutOfBounds { .. }))
        ));
    }

    #[test]
    fn single_checkpoint_is_rejected() {
        let context = context(1);
        let mut payload = build_superblock_payload(&context, [0; 16], 19, 21);
        payload[36..40].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            Superblock::read_data(&context, &payload),
            Err(marmot_err::Error::Format(FormatError::InvalidFormat { .. }))
        ));
    }
}
