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

use log::error;
use marmot_ds::DataStorage;
use marmot_err::{FormatError, Result};
use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, IntoBytes, KnownLayout,
};

use crate::{
    bytes::{read_struct, subslice},
    context::{FormatVersion, IoContext},
};

/// Role of a metadata block, stamped into the v3 block header signature.
/// v1 block headers carry no signature, so the expectation only binds on v3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    Superblock,
    Checkpoint,
    MinistoreNode,
}

impl BlockRole {
    fn signature(self) -> &'static [u8; 4] {
        match self {
            Self::Superblock => b"SUPB",
            Self::Checkpoint => b"CHKP",
            Self::MinistoreNode => b"MSB+",
        }
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct MetadataBlockHeaderV1 {
    /// The metadata block number.
    block_number: U64,
    /// The sequence number.
    sequence_number: U64,
    /// The object identifier of the tree the block belongs to.
    object_identifier: [u8; 16],
    unknown1: U64,
    unknown2: U64,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct MetadataBlockHeaderV3 {
    /// The block role signature, "SUPB", "CHKP" or "MSB+".
    signature: [u8; 4],
    unknown1: U32,
    unknown2: U32,
    unknown3: U32,
    unknown4: U64,
    unknown5: U64,
    /// The metadata block numbers. The second to fourth are either zero or
    /// strictly consecutive after the first.
    block_number1: U64,
    block_number2: U64,
    block_number3: U64,
    block_number4: U64,
    unknown6: U64,
    unknown7: U64,
}

/// Version-independent view of a decoded metadata block header.
#[derive(Debug)]
pub struct MetadataBlockHeader {
    pub block_numbers: [u64; 4],
    /// v1 only, zero on v3.
    pub sequence_number: u64,
}

impl MetadataBlockHeader {
    /// Decodes the header at the start of a metadata block and, for v3,
    /// validates the signature against the expected role. `block_offset` is
    /// the byte position of the block, used for error reporting only.
    pub fn read(
        context: &IoContext,
        data: &[u8],
        role: BlockRole,
        block_offset: u64,
    ) -> Result<Self> {
        match context.version() {
            FormatVersion::V1 => {
                let header =
                    read_struct::<MetadataBlockHeaderV1>(data, "metadata block header")?;
                Ok(Self {
                    block_numbers: [header.block_number.get(), 0, 0, 0],
                    sequence_number: header.sequence_number.get(),
                })
            }
            FormatVersion::V3 => {
                let header =
                    read_struct::<MetadataBlockHeaderV3>(data, "metadata block header")?;
                if &header.signature != role.signature() {
                    error!(
                        "Metadata block at offset 0x{block_offset:08x} has signature {:?}, expected {:?}",
                        header.signature,
                        role.signature()
                    );
                    return Err(FormatError::InvalidSignature {
                        offset: block_offset,
                    }
                    .into());
                }
                let block_numbers = [
                    header.block_number1.get(),
                    header.block_number2.get(),
                    header.block_number3.get(),
                    header.block_number4.get(),
                ];
                validate_block_numbers(&block_numbers)?;
                Ok(Self {
                    block_numbers,
                    sequence_number: 0,
                })
            }
        }
    }
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct BlockReferenceV1 {
    /// The referenced metadata block number.
    block_number: U64,
    unknown1: U16,
    /// The checksum type, 1 (CRC32-C) or 2 (CRC64).
    checksum_type: u8,
    /// Offset of the checksum, relative to the end of the fixed part of the
    /// checksum descriptor.
    checksum_data_offset: u8,
    /// Size of the checksum.
    checksum_data_size: U16,
    unknown2: U16,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct BlockReferenceV3 {
    /// The referenced metadata block numbers, consecutive-or-zero.
    block_number1: U64,
    block_number2: U64,
    block_number3: U64,
    block_number4: U64,
    unknown1: U16,
    /// The checksum type, 1 (CRC32-C) or 2 (CRC64).
    checksum_type: u8,
    /// Offset of the checksum, relative to the end of the fixed part of the
    /// checksum descriptor.
    checksum_data_offset: u8,
    /// Size of the checksum.
    checksum_data_size: U16,
    unknown2: U16,
}

/// Locates a metadata block elsewhere on the volume, together with the
/// checksum protecting it. The checksum is decoded and kept but not
/// verified.
#[derive(Debug, Clone)]
pub struct BlockReference {
    pub block_numbers: [u64; 4],
    pub checksum_type: u8,
    pub checksum: Vec<u8>,
}

impl BlockReference {
    pub fn read(context: &IoContext, data: &[u8]) -> Result<Self> {
        let (block_numbers, checksum_type, checksum_data_offset, checksum_data_size);
        let checksum_base;
        match context.version() {
            FormatVersion::V1 => {
                let reference = read_struct::<BlockReferenceV1>(data, "block reference")?;
                block_numbers = [reference.block_number.get(), 0, 0, 0];
                checksum_type = reference.checksum_type;
                checksum_data_offset = reference.checksum_data_offset;
                checksum_data_size = reference.checksum_data_size.get();
                checksum_base = 8;
            }
            FormatVersion::V3 => {
                let reference = read_struct::<BlockReferenceV3>(data, "block reference")?;
                block_numbers = [
                    reference.block_number1.get(),
                    reference.block_number2.get(),
                    reference.block_number3.get(),
                    reference.block_number4.get(),
                ];
                validate_block_numbers(&block_numbers)?;
                checksum_type = reference.checksum_type;
                checksum_data_offset = reference.checksum_data_offset;
                checksum_data_size = reference.checksum_data_size.get();
                checksum_base = 32;
            }
        }
        if checksum_type != 1 && checksum_type != 2 {
            error!("Unsupported checksum type {checksum_type}");
            return Err(FormatError::InvalidFormat {
                context: "block reference checksum type",
            }
            .into());
        }
        let checksum = subslice(
            data,
            checksum_base + usize::from(checksum_data_offset),
            usize::from(checksum_data_size),
            "block reference checksum",
        )?
        .to_vec();

        Ok(Self {
            block_numbers,
            checksum_type,
            checksum,
        })
    }

    pub fn block_number(&self) -> u64 {
        self.block_numbers[0]
    }
}

fn validate_block_numbers(block_numbers: &[u64; 4]) -> Result<()> {
    for (index, &block_number) in block_numbers.iter().enumerate().skip(1) {
        if block_number != 0 && block_number != block_numbers[0] + index as u64 {
            error!(
                "Metadata block number {} ({block_number}) shall be zero or {}",
                index + 1,
                block_numbers[0] + index as u64
            );
            return Err(FormatError::InvalidFormat {
                context: "metadata block numbers shall be consecutive or zero",
            }
            .into());
        }
    }
    Ok(())
}

/// Reads one physical metadata block (superblocks and checkpoints).
pub(crate) fn read_block<DS: DataStorage>(
    context: &IoContext,
    data_storage: &DS,
    block_number: u64,
) -> Result<Vec<u8>> {
    context.check_abort()?;
    let mut data = vec![0u8; context.metadata_block_size as usize];
    data_storage.read(context.block_offset(block_number), &mut data)?;
    Ok(data)
}

/// Reads the logical block of a ministore node. The v3 4 KiB format stores
/// a node as four physical blocks, normally consecutive; absent entries in
/// the reference fall back to the consecutive-or-zero rule.
pub(crate) fn read_node_block<DS: DataStorage>(
    context: &IoContext,
    data_storage: &DS,
    reference: &BlockReference,
) -> Result<Vec<u8>> {
    context.check_abort()?;
    let physical_size = context.metadata_block_size as usize;
    let logical_size = context.node_block_size() as usize;
    let mut data = vec![0u8; logical_size];
    for (index, chunk) in data.chunks_exact_mut(physical_size).enumerate() {
        let block_number = match reference.block_numbers[index] {
            0 if index > 0 => reference.block_numbers[0] + index as u64,
            block_number => block_number,
        };
        data_storage.read(context.block_offset(block_number), chunk)?;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;

    #[test]
    fn block_reference_v1() {
        let data: [u8; 24] = [
            0x1e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x08, 0x08,
            0x00, 0x00, 0x00, 0x5d, 0x5f, 0xe6, 0x46, 0x0a, 0xde, 0xe1, 0xc4,
        ];
        let reference = BlockReference::read(&context(1), &data).unwrap();
        assert_eq!(reference.block_numbers, [30, 0, 0, 0]);
        assert_eq!(reference.checksum_type, 2);
        assert_eq!(
            reference.checksum,
            [0x5d, 0x5f, 0xe6, 0x46, 0x0a, 0xde, 0xe1, 0xc4]
        );
    }

    #[test]
    fn block_reference_v3() {
        let mut data = [0u8; 44];
        data[0] = 0x1e;
        data[34] = 0x01;
        data[35] = 0x08;
        data[36] = 0x04;
        data[40..44].copy_from_slice(&[0xe2, 0xfb, 0xbe, 0x68]);
        let reference = BlockReference::read(&context(3), &data).unwrap();
        assert_eq!(reference.block_numbers, [30, 0, 0, 0]);
        assert_eq!(reference.checksum_type, 1);
        assert_eq!(reference.checksum, [0xe2, 0xfb, 0xbe, 0x68]);
    }

    #[test]
    fn block_reference_checksum_type() {
        let mut data = [0u8; 16];
        data[10] = 3;
        assert!(BlockReference::read(&context(1), &data).is_err());
    }

    #[test]
    fn block_header_v1() {
        let mut data = [0u8; 48];
        data[0] = 0x1e;
        data[32] = 0x01;
        let header =
            MetadataBlockHeader::read(&context(1), &data, BlockRole::Superblock, 0).unwrap();
        assert_eq!(header.block_numbers[0], 30);
    }

    #[test]
    fn block_header_v3_superblock() {
        let mut data = [0u8; 80];
        data[0..4].copy_from_slice(b"SUPB");
        data[4] = 0x02;
        data[12..16].copy_from_slice(&[0xbb, 0xa7, 0xe0, 0x68]);
        data[32] = 0x1e;
        let header =
            MetadataBlockHeader::read(&context(3), &data, BlockRole::Superblock, 0).unwrap();
        assert_eq!(header.block_numbers, [30, 0, 0, 0]);

        assert!(matches!(
            MetadataBlockHeader::read(&context(3), &data, BlockRole::MinistoreNode, 0),
            Err(marmot_err::Error::Format(
                FormatError::InvalidSignature { offset: 0 }
            ))
        ));
    }

    #[test]
    fn block_header_v3_mirror_rule() {
        let mut data = [0u8; 80];
        data[0..4].copy_from_slice(b"MSB+");
        data[32] = 0x20;
        data[40] = 0x21;
        data[48] = 0x22;
        data[56] = 0x23;
        assert!(
            MetadataBlockHeader::read(&context(3), &data, BlockRole::MinistoreNode, 0).is_ok()
        );

        data[56] = 0x27;
        assert!(matches!(
            MetadataBlockHeader::read(&context(3), &data, BlockRole::MinistoreNode, 0),
            Err(marmot_err::Error::Format(FormatError::InvalidFormat { .. }))
        ));
    }
}
