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

use log::{debug, error, warn};
use marmot_ds::DataStorage;
use marmot_err::{FormatError, Result};
use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, IntoBytes, KnownLayout,
};

use crate::{
    block::{read_block, BlockReference, BlockRole, MetadataBlockHeader},
    bytes::{le_u32, le_u64, read_struct},
    context::{FormatVersion, IoContext},
    superblock::Superblock,
};

/// Checkpoint slot of the objects tree.
pub const OBJECTS_TREE_INDEX: usize = 0;
/// Checkpoint slots of the v3 container tables.
pub const CONTAINER_TREE_INDEXES: [usize; 2] = [7, 8];

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct CheckpointHeader {
    unknown1: U32,
    /// The major format version.
    major_format_version: U16,
    /// The minor format version.
    minor_format_version: U16,
    /// Offset of the self reference, relative to the start of the metadata
    /// block.
    self_reference_data_offset: U32,
    /// Size of the self reference.
    self_reference_data_size: U32,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct CheckpointTrailerV1 {
    /// The checkpoint sequence number.
    sequence_number: U64,
    unknown3: U32,
    unknown4: U32,
    unknown5: U64,
    /// Number of ministore tree block reference offsets that follow.
    number_of_offsets: U32,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct CheckpointTrailerV3 {
    /// The checkpoint sequence number.
    sequence_number: U64,
    unknown3: U64,
    unknown4: U32,
    unknown5: U32,
    unknown6: U64,
    unknown7: U64,
    unknown8: U32,
    unknown9: U32,
    /// Number of ministore tree block reference offsets that follow.
    number_of_offsets: U32,
}

/// A superblock-referenced metadata block naming the roots of every
/// top-level ministore tree at a consistent point in time.
#[derive(Debug)]
pub struct Checkpoint {
    pub sequence_number: u64,
    pub major_format_version: u16,
    pub minor_format_version: u16,
    tree_references: Vec<BlockReference>,
}

impl Checkpoint {
    pub fn read<DS: DataStorage>(
        context: &IoContext,
        data_storage: &DS,
        block_number: u64,
    ) -> Result<Self> {
        let block_offset = context.block_offset(block_number);
        let data = read_block(context, data_storage, block_number)?;
        MetadataBlockHeader::read(context, &data, BlockRole::Checkpoint, block_offset)?;

        let header_size = context.version().block_header_size();
        Self::read_data(context, &data[header_size..])
    }

    fn read_data(context: &IoContext, data: &[u8]) -> Result<Self> {
        let block_header_size = context.version().block_header_size();
        let header = read_struct::<CheckpointHeader>(data, "checkpoint header")?;

        let self_reference_data_offset = header.self_reference_data_offset.get() as usize;
        if self_reference_data_offset < size_of::<CheckpointHeader>() + block_header_size
            || self_reference_data_offset >= data.len() + block_header_size
        {
            error!("Checkpoint self reference data offset 0x{self_reference_data_offset:04x} out of bounds");
            return Err(FormatError::OutOfBounds {
                field: "self reference data offset",
                value: self_reference_data_offset as u64,
                limit: (data.len() + block_header_size) as u64,
            }
            .into());
        }
        let self_reference_data_offset = self_reference_data_offset - block_header_size;
        if data.len() - self_reference_data_offset
            < header.self_reference_data_size.get() as usize
        {
            return Err(FormatError::OutOfBounds {
                field: "self reference data size",
                value: header.self_reference_data_size.get() as u64,
                limit: (data.len() - self_reference_data_offset) as u64,
            }
            .into());
        }
        BlockReference::read(context, &data[self_reference_data_offset..])?;

        let (sequence_number, number_of_offsets, trailer_size) = match context.version() {
            FormatVersion::V1 => {
                let trailer = read_struct::<CheckpointTrailerV1>(
                    &data[size_of::<CheckpointHeader>()..],
                    "checkpoint trailer",
                )?;
                (
                    trailer.sequence_number.get(),
                    trailer.number_of_offsets.get() as usize,
                    size_of::<CheckpointTrailerV1>(),
                )
            }
            FormatVersion::V3 => {
                let trailer = read_struct::<CheckpointTrailerV3>(
                    &data[size_of::<CheckpointHeader>()..],
                    "checkpoint trailer",
                )?;
                (
                    trailer.sequence_number.get(),
                    trailer.number_of_offsets.get() as usize,
                    size_of::<CheckpointTrailerV3>(),
                )
            }
        };
        let mut offsets_data_offset = size_of::<CheckpointHeader>() + trailer_size;
        if (data.len() - offsets_data_offset) / 4 < number_of_offsets {
            return Err(FormatError::OutOfBounds {
                field: "number of offsets",
                value: number_of_offsets as u64,
                limit: ((data.len() - offsets_data_offset) / 4) as u64,
            }
            .into());
        }
        debug!("Checkpoint sequence {sequence_number}, {number_of_offsets} tree references");

        let mut tree_references = Vec::with_capacity(number_of_offsets);
        for index in 0..number_of_offsets {
            let reference_offset =
                le_u32(data, offsets_data_offset, "block reference offset")? as usize;
            offsets_data_offset += 4;

            // Tree block references follow the self reference; the offsets
            // include the metadata block header.
            if reference_offset < self_reference_data_offset + block_header_size
                || reference_offset >= data.len() + block_header_size
            {
                error!("Block reference {index} offset 0x{reference_offset:04x} out of bounds");
                return Err(FormatError::OutOfBounds {
                    field: "block reference offset",
                    value: reference_offset as u64,
                    limit: (data.len() + block_header_size) as u64,
                }
                .into());
            }
            let reference_offset = reference_offset - block_header_size;
            tree_references.push(BlockReference::read(context, &data[reference_offset..])?);
        }

        Ok(Self {
            sequence_number,
            major_format_version: header.major_format_version.get(),
            minor_format_version: header.minor_format_version.get(),
            tree_references,
        })
    }

    pub fn number_of_tree_references(&self) -> usize {
        self.tree_references.len()
    }

    pub fn tree_reference(&self, index: usize) -> Option<&BlockReference> {
        self.tree_references.get(index)
    }
}

/// Loads both checkpoint copies and selects the authoritative one: the
/// higher sequence number wins, the primary wins ties. A copy that fails to
/// decode forfeits; when both fail, the error of the copy whose raw
/// sequence field reads higher is surfaced, and the primary's error when
/// neither sequence is readable.
pub fn read_checkpoints<DS: DataStorage>(
    context: &IoContext,
    data_storage: &DS,
    superblock: &Superblock,
) -> Result<Checkpoint> {
    let primary = Checkpoint::read(
        context,
        data_storage,
        superblock.primary_checkpoint_block_number,
    );
    let secondary = Checkpoint::read(
        context,
        data_storage,
        superblock.secondary_checkpoint_block_number,
    );
    match (primary, secondary) {
        (Ok(primary), Ok(secondary)) => {
            Ok(if primary.sequence_number >= secondary.sequence_number {
                primary
            } else {
                secondary
            })
        }
        (Ok(primary), Err(error)) => {
            warn!("Secondary checkpoint unreadable: {error}");
            Ok(primary)
        }
        (Err(error), Ok(secondary)) => {
            warn!("Primary checkpoint unreadable: {error}");
            Ok(secondary)
        }
        (Err(primary_error), Err(secondary_error)) => {
            let primary_sequence = peek_sequence_number(
                context,
                data_storage,
                superblock.primary_checkpoint_block_number,
            );
            let secondary_sequence = peek_sequence_number(
                context,
                data_storage,
                superblock.secondary_checkpoint_block_number,
            );
            match (primary_sequence, secondary_sequence) {
                (Some(primary), Some(secondary)) if secondary > primary => {
                    Err(secondary_error)
                }
                (None, Some(_)) => Err(secondary_error),
                _ => Err(primary_error),
            }
        }
    }
}

/// Best-effort read of the raw sequence field, used only to decide which
/// error to surface when both checkpoint copies fail to decode.
fn peek_sequence_number<DS: DataStorage>(
    context: &IoContext,
    data_storage: &DS,
    block_number: u64,
) -> Option<u64> {
    let data = read_block(context, data_storage, block_number).ok()?;
    let header_size = context.version().block_header_size();
    le_u64(
        &data,
        header_size + size_of::<CheckpointHeader>(),
        "sequence number",
    )
    .ok()
}
