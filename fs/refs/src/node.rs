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

use std::{cmp::Ordering, ops::Range};

use log::{debug, error};
use marmot_ds::DataStorage;
use marmot_err::{FormatError, Result};
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, IntoBytes, KnownLayout,
};

use crate::{
    block::{read_node_block, BlockReference, BlockRole, MetadataBlockHeader},
    bytes::{le_u32, read_struct},
    context::{FormatVersion, IoContext},
};

/// Record value is stored out of line, either as an embedded sub-node or as
/// a data-run list.
pub const RECORD_FLAG_NON_RESIDENT: u16 = 0x0008;

/// Low two node-type bits marking a leaf node.
const NODE_TYPE_LEAF: u8 = 0x02;
/// Node-type bit marking the root node of a tree.
const NODE_TYPE_ROOT: u8 = 0x02;

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct TreeHeader {
    /// Offset of the table data, from the start of this header.
    table_data_offset: U16,
    unknown1: U16,
    unknown2: U32,
    unknown3: U32,
    unknown4: U32,
    unknown5: U32,
    unknown6: U32,
    unknown7: U32,
    unknown8: U32,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct NodeHeader {
    /// Start of the record data area, relative to this header.
    data_area_start_offset: U32,
    /// End of the record data area, relative to this header.
    data_area_end_offset: U32,
    /// Free space between the data area and the record offsets array.
    unused_data_size: U32,
    /// Level of the node within its tree, 0 for leaves.
    node_level: u8,
    /// Bit 0x02 marks the tree root; the low two bits are 0x02 for a leaf.
    node_type_flags: u8,
    unknown1: U16,
    /// Start of the record offsets array, relative to this header.
    record_offsets_start_offset: U32,
    /// Number of entries in the record offsets array.
    number_of_record_offsets: U32,
    /// End of the record offsets array, relative to this header, or zero.
    record_offsets_end_offset: U32,
    unknown2: U32,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct NodeRecordHeader {
    /// Size of the record, including this header.
    size: U32,
    /// Offset of the key, relative to the start of the record.
    key_data_offset: U16,
    /// Size of the key.
    key_data_size: U16,
    /// Record flags.
    flags: U16,
    /// Offset of the value, relative to the start of the record.
    value_data_offset: U16,
    /// Size of the value.
    value_data_size: U16,
}

/// One `(key, value, flags)` entry of a ministore node. The ranges index
/// into the node's backing bytes.
#[derive(Debug)]
pub struct NodeRecord {
    pub size: u32,
    pub flags: u16,
    key: Range<usize>,
    value: Range<usize>,
}

/// Borrowed view of a node record.
#[derive(Debug, Clone, Copy)]
pub struct Record<'node> {
    pub flags: u16,
    pub key: &'node [u8],
    pub value: &'node [u8],
}

/// A decoded ministore B+-tree node.
///
/// The node owns its backing bytes, so embedded sub-nodes (file values,
/// non-resident attributes) and block-backed nodes share one representation
/// and record slices stay valid as long as the node is reachable.
#[derive(Debug)]
pub struct MinistoreNode {
    data: Vec<u8>,
    header_blob: Option<Range<usize>>,
    pub node_level: u8,
    pub node_type_flags: u8,
    records: Vec<NodeRecord>,
}

impl MinistoreNode {
    /// Reads the node behind a block reference: loads the logical block,
    /// verifies the block header ("MSB+" on v3) and decodes the node from
    /// the post-header payload.
    pub fn read<DS: DataStorage>(
        context: &IoContext,
        data_storage: &DS,
        reference: &BlockReference,
    ) -> Result<Self> {
        let block_offset = context.block_offset(reference.block_number());
        let data = read_node_block(context, data_storage, reference)?;
        MetadataBlockHeader::read(context, &data, BlockRole::MinistoreNode, block_offset)?;

        let header_size = context.version().block_header_size();
        Self::parse(context, data[header_size..].to_vec())
    }

    /// Decodes a node embedded in the value of another node's record.
    pub fn from_embedded(context: &IoContext, data: &[u8]) -> Result<Self> {
        Self::parse(context, data.to_vec())
    }

    fn parse(context: &IoContext, data: Vec<u8>) -> Result<Self> {
        if data.len() < 8 {
            return Err(FormatError::OutOfBounds {
                field: "ministore node",
                value: 8,
                limit: data.len() as u64,
            }
            .into());
        }
        let node_header_offset = le_u32(&data, 0, "node header offset")? as usize;
        if node_header_offset < 4 || node_header_offset >= data.len() - 4 {
            error!("Node header offset 0x{node_header_offset:04x} out of bounds");
            return Err(FormatError::OutOfBounds {
                field: "node header offset",
                value: node_header_offset as u64,
                limit: (data.len() - 4) as u64,
            }
            .into());
        }

        // A tree header and a tree-specific header blob sit between the
        // offset field and the node header when the offset leaves room.
        let mut header_blob = None;
        if node_header_offset >= 4 + size_of::<TreeHeader>() {
            let tree_header = read_struct::<TreeHeader>(&data[4..], "tree header")?;
            debug!(
                "Tree header, table data offset 0x{:04x}",
                tree_header.table_data_offset.get()
            );
            let blob_start = 4 + size_of::<TreeHeader>();
            if node_header_offset > blob_start {
                header_blob = Some(blob_start..node_header_offset);
            }
        }

        let header = read_struct::<NodeHeader>(&data[node_header_offset..], "node header")?;
        let node_size = data.len() - node_header_offset;
        let data_area_start = header.data_area_start_offset.get() as usize;
        let data_area_end = header.data_area_end_offset.get() as usize;
        let record_offsets_start = header.record_offsets_start_offset.get() as usize;
        let number_of_record_offsets = header.number_of_record_offsets.get() as usize;
        let record_offsets_end = header.record_offsets_end_offset.get() as usize;

        for (field, value) in [
            ("data area start offset", data_area_start),
            ("data area end offset", data_area_end),
            ("record offsets start offset", record_offsets_start),
        ] {
            if value < size_of::<NodeHeader>() || value > node_size {
                error!("Node header {field} 0x{value:04x} out of bounds");
                return Err(FormatError::OutOfBounds {
                    field,
                    value: value as u64,
                    limit: node_size as u64,
                }
                .into());
            }
        }
        if record_offsets_end != 0
            && (record_offsets_end < size_of::<NodeHeader>() || record_offsets_end > node_size)
        {
            return Err(FormatError::OutOfBounds {
                field: "record offsets end offset",
                value: record_offsets_end as u64,
                limit: node_size as u64,
            }
            .into());
        }
        if number_of_record_offsets > (node_size - record_offsets_start) / 4 {
            return Err(FormatError::OutOfBounds {
                field: "number of record offsets",
                value: number_of_record_offsets as u64,
                limit: ((node_size - record_offsets_start) / 4) as u64,
            }
            .into());
        }
        if data_area_end + header.unused_data_size.get() as usize + number_of_record_offsets * 4
            > node_size
        {
            return Err(FormatError::InvalidFormat {
                context: "node data area and record offsets shall fit the node",
            }
            .into());
        }

        let mut records = Vec::with_capacity(number_of_record_offsets);
        let mut offsets_data_offset = node_header_offset + record_offsets_start;
        let mut previous_record_offset = 0;
        for index in 0..number_of_record_offsets {
            let mut record_offset =
                le_u32(&data, offsets_data_offset, "record offset")? as usize;
            offsets_data_offset += 4;

            // The high bits of a v3 record offset are flags.
            if context.version() == FormatVersion::V3 {
                record_offset &= 0xffff;
            }
            if record_offset < data_area_start || record_offset >= data_area_end {
                error!("Record {index} offset 0x{record_offset:04x} outside the data area");
                return Err(FormatError::OutOfBounds {
                    field: "record offset",
                    value: record_offset as u64,
                    limit: data_area_end as u64,
                }
                .into());
            }
            if index > 0 && record_offset <= previous_record_offset {
                error!("Record {index} offset 0x{record_offset:04x} not increasing");
                return Err(FormatError::InvalidFormat {
                    context: "record offsets shall be strictly increasing",
                }
                .into());
            }
            previous_record_offset = record_offset;

            records.push(read_node_record(
                &data,
                node_header_offset + record_offset,
            )?);
        }

        Ok(Self {
            data,
            header_blob,
            node_level: header.node_level,
            node_type_flags: header.node_type_flags,
            records,
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type_flags & 0x03 == NODE_TYPE_LEAF
    }

    pub fn is_root(&self) -> bool {
        self.node_type_flags & NODE_TYPE_ROOT != 0
    }

    /// The tree-specific header blob between the tree header and the node
    /// header (file values, non-resident attribute values).
    pub fn header_blob(&self) -> Option<&[u8]> {
        self.header_blob.clone().map(|range| &self.data[range])
    }

    pub fn number_of_records(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, index: usize) -> Option<Record<'_>> {
        self.records.get(index).map(|record| Record {
            flags: record.flags,
            key: &self.data[record.key.clone()],
            value: &self.data[record.value.clone()],
        })
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> + '_ {
        (0..self.records.len()).filter_map(|index| self.record(index))
    }

    /// Leaf lookup. Records are ordered by the right-to-left comparator, so
    /// the scan terminates at the first record comparing greater or equal.
    pub fn find(&self, key: &[u8]) -> Option<Record<'_>> {
        for record in self.records() {
            match compare_keys(key, record.key) {
                Ordering::Equal => return Some(record),
                Ordering::Less => return None,
                Ordering::Greater => {}
            }
        }
        None
    }

    /// Branch step: the largest record whose key compares less than or
    /// equal to the target. Its value locates the child node.
    pub fn find_branch(&self, key: &[u8]) -> Option<Record<'_>> {
        let mut child = None;
        for record in self.records() {
            match compare_keys(record.key, key) {
                Ordering::Greater => break,
                _ => child = Some(record),
            }
        }
        child
    }
}

fn read_node_record(data: &[u8], record_offset: usize) -> Result<NodeRecord> {
    let header = read_struct::<NodeRecordHeader>(&data[record_offset..], "node record")?;
    let size = header.size.get() as usize;
    if size < size_of::<NodeRecordHeader>() || record_offset + size > data.len() {
        return Err(FormatError::OutOfBounds {
            field: "node record size",
            value: size as u64,
            limit: (data.len() - record_offset) as u64,
        }
        .into());
    }
    let key_data_offset = usize::from(header.key_data_offset.get());
    let key_data_size = usize::from(header.key_data_size.get());
    if key_data_offset < size_of::<NodeRecordHeader>()
        || key_data_offset >= size
        || key_data_size > size - key_data_offset
    {
        return Err(FormatError::OutOfBounds {
            field: "node record key",
            value: (key_data_offset + key_data_size) as u64,
            limit: size as u64,
        }
        .into());
    }
    let value_data_offset = usize::from(header.value_data_offset.get());
    let value_data_size = usize::from(header.value_data_size.get());
    if value_data_offset < size_of::<NodeRecordHeader>()
        || value_data_offset >= size
        || value_data_size > size - value_data_offset
    {
        return Err(FormatError::OutOfBounds {
            field: "node record value",
            value: (value_data_offset + value_data_size) as u64,
            limit: size as u64,
        }
        .into());
    }

    let key_start = record_offset + key_data_offset;
    let value_start = record_offset + value_data_offset;
    Ok(NodeRecord {
        size: header.size.get(),
        flags: header.flags.get(),
        key: key_start..key_start + key_data_size,
        value: value_start..value_start + value_data_size,
    })
}

/// Compares two keys the way ReFS orders them: from the highest byte index
/// downward, so the least significant byte of a little-endian integer key is
/// the most significant comparison axis. A strict suffix orders before the
/// longer key.
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    for (lhs, rhs) in a.iter().rev().zip(b.iter().rev()) {
        match lhs.cmp(rhs) {
            Ordering::Equal => {}
            ordering => return ordering,
        }
    }
    a.len().cmp(&b.len())
}
