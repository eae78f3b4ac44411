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
use marmot_err::{FormatError, Result};
use zerocopy::{
    little_endian::{U32, U64},
    FromBytes, IntoBytes, KnownLayout,
};

use crate::{
    bytes::{le_u32, read_struct, subslice},
    context::IoContext,
    name::utf16le_to_string,
    node::{MinistoreNode, Record, RECORD_FLAG_NON_RESIDENT},
};

/// Attribute type of a $DATA stream.
pub const ATTRIBUTE_TYPE_DATA: u32 = 0x00000080;

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct ResidentAttributeHeader {
    unknown1: U32,
    /// Offset of the stream payload, relative to the start of the value.
    inline_data_offset: U32,
    /// Size of the stream payload.
    inline_data_size: U32,
    unknown3: U32,
    unknown4: U64,
    unknown5: U64,
    unknown6: U64,
    unknown7: U64,
    unknown8: U64,
    unknown9: U32,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct NonResidentAttributeHeader {
    unknown1: U32,
    unknown2: U64,
    /// Allocated size of the stream.
    allocated_data_size: U64,
    /// Size of the stream.
    data_size: U64,
    /// Size of the initialized part of the stream.
    valid_data_size: U64,
    unknown3: [u8; 60],
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct DataRunLayout {
    /// Offset within the stream, in metadata blocks.
    logical_offset: U64,
    /// Length of the run, in metadata blocks.
    size: U64,
    /// Position on the volume, in metadata blocks.
    physical_offset: U64,
    unknown1: U64,
}

/// One extent of a non-resident stream. All fields are in metadata-block
/// units.
#[derive(Debug, Clone, Copy)]
pub struct DataRun {
    pub logical_offset: u64,
    pub size: u64,
    pub physical_offset: u64,
}

impl DataRun {
    pub(crate) fn read(data: &[u8]) -> Result<Self> {
        if data.len() != size_of::<DataRunLayout>() {
            return Err(FormatError::OutOfBounds {
                field: "data run",
                value: data.len() as u64,
                limit: size_of::<DataRunLayout>() as u64,
            }
            .into());
        }
        let layout = read_struct::<DataRunLayout>(data, "data run")?;
        Ok(Self {
            logical_offset: layout.logical_offset.get(),
            size: layout.size.get(),
            physical_offset: layout.physical_offset.get(),
        })
    }

    /// Byte position of the run on the volume. Volumes spanning a storage
    /// pool would remap the physical block through the container table
    /// first; plain volumes address directly.
    pub fn physical_byte_offset(&self, context: &IoContext) -> u64 {
        self.physical_offset * u64::from(context.metadata_block_size)
    }

    pub fn logical_byte_offset(&self, context: &IoContext) -> u64 {
        self.logical_offset * u64::from(context.metadata_block_size)
    }

    pub fn byte_size(&self, context: &IoContext) -> u64 {
        self.size * u64::from(context.metadata_block_size)
    }
}

/// Where the payload of an attribute stream lives.
#[derive(Debug, Clone)]
pub enum AttributeData {
    /// Payload bytes stored inline in the attribute record.
    Resident { data: Vec<u8> },
    /// Payload stored elsewhere on the volume, located by data runs in
    /// record order.
    NonResident {
        allocated_data_size: u64,
        data_size: u64,
        valid_data_size: u64,
        data_runs: Vec<DataRun>,
    },
}

/// A single attribute stream of a file.
#[derive(Debug, Clone)]
pub struct AttributeValues {
    pub attribute_type: u32,
    name_data: Vec<u8>,
    pub data: AttributeData,
}

impl AttributeValues {
    /// Decodes one record of a file's attribute node. The key carries the
    /// attribute type and name; record flag 0x0008 selects the non-resident
    /// value shape.
    pub(crate) fn read_record(context: &IoContext, record: Record<'_>) -> Result<Self> {
        if record.key.len() < 14 {
            return Err(FormatError::OutOfBounds {
                field: "attribute record key",
                value: record.key.len() as u64,
                limit: 14,
            }
            .into());
        }
        let attribute_type = le_u32(record.key, 8, "attribute type")?;
        // Unnamed streams pad the key past the minimum record key size;
        // trailing NUL units are not part of the name.
        let mut name_data = &record.key[12..];
        while let [head @ .., 0, 0] = name_data {
            name_data = head;
        }
        let name_data = name_data.to_vec();

        let data = if record.flags & RECORD_FLAG_NON_RESIDENT != 0 {
            read_non_resident(context, record.value)?
        } else {
            read_resident(record.value)?
        };
        Ok(Self {
            attribute_type,
            name_data,
            data,
        })
    }

    pub fn name(&self) -> String {
        utf16le_to_string(&self.name_data)
    }

    pub fn name_data(&self) -> &[u8] {
        &self.name_data
    }

    /// The unnamed $DATA stream carries the file's default contents.
    pub fn is_unnamed_data(&self) -> bool {
        self.attribute_type == ATTRIBUTE_TYPE_DATA && self.name_data.is_empty()
    }
}

fn read_resident(data: &[u8]) -> Result<AttributeData> {
    let header = read_struct::<ResidentAttributeHeader>(data, "resident attribute")?;
    let inline_data_offset = header.inline_data_offset.get() as usize;
    let inline_data_size = header.inline_data_size.get() as usize;
    if inline_data_offset < size_of::<ResidentAttributeHeader>()
        || inline_data_offset > data.len()
    {
        error!("Inline data offset 0x{inline_data_offset:04x} out of bounds");
        return Err(FormatError::OutOfBounds {
            field: "inline data offset",
            value: inline_data_offset as u64,
            limit: data.len() as u64,
        }
        .into());
    }
    let payload = subslice(data, inline_data_offset, inline_data_size, "inline data")?;
    Ok(AttributeData::Resident {
        data: payload.to_vec(),
    })
}

fn read_non_resident(context: &IoContext, data: &[u8]) -> Result<AttributeData> {
    let node = MinistoreNode::from_embedded(context, data)?;
    if !node.is_leaf() {
        return Err(FormatError::InvalidFormat {
            context: "non-resident attribute node shall be a leaf",
        }
        .into());
    }
    let header_data = node.header_blob().ok_or(FormatError::InvalidFormat {
        context: "non-resident attribute node shall carry a header",
    })?;
    let header = read_struct::<NonResidentAttributeHeader>(
        header_data,
        "non-resident attribute header",
    )?;

    let mut data_runs = Vec::with_capacity(node.number_of_records());
    for record in node.records() {
        data_runs.push(DataRun::read(record.value)?);
    }
    Ok(AttributeData::NonResident {
        allocated_data_size: header.allocated_data_size.get(),
        data_size: header.data_size.get(),
        valid_data_size: header.valid_data_size.get(),
        data_runs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{build_node, context};

    #[test]
    fn data_run_layout() {
        let data: [u8; 32] = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0xe0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x08, 0x00, 0x00, 0x00, 0x00,
        ];
        let data_run = DataRun::read(&data).unwrap();
        assert_eq!(data_run.logical_offset, 0);
        assert_eq!(data_run.size, 4);
        assert_eq!(data_run.physical_offset, 0xe0);

        let context = context(1);
        assert_eq!(data_run.physical_byte_offset(&context), 0xe0 * 16384);
        assert!(DataRun::read(&data[..24]).is_err());
    }

    fn attribute_key(attribute_type: u32, name: &str) -> Vec<u8> {
        let mut key = vec![0u8; 12];
        key[8..12].copy_from_slice(&attribute_type.to_le_bytes());
        key.extend(name.encode_utf16().flat_map(|unit| unit.to_le_bytes()));
        if key.len() < 14 {
            key.resize(14, 0);
        }
        key
    }

    fn resident_value(payload: &[u8]) -> Vec<u8> {
        let mut value = vec![0u8; 60];
        value[4..8].copy_from_slice(&60u32.to_le_bytes());
        value[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        value.extend_from_slice(payload);
        value
    }

    #[test]
    fn resident_attribute() {
        let context = context(1);
        let key = attribute_key(ATTRIBUTE_TYPE_DATA, "");
        let value = resident_value(b"hello");
        let node_data = build_node(&[(&key, &value, 0)], 0, 0x02, None);
        let node = MinistoreNode::from_embedded(&context, &node_data).unwrap();

        let attribute = AttributeValues::read_record(&context, node.record(0).unwrap()).unwrap();
        assert!(attribute.is_unnamed_data());
        assert_eq!(attribute.name(), "");
        match &attribute.data {
            AttributeData::Resident { data } => assert_eq!(data, b"hello"),
            _ => panic!("expected a resident attribute"),
        }
    }

    #[test]
    fn resident_attribute_empty_payload() {
        let context = context(1);
        let key = attribute_key(ATTRIBUTE_TYPE_DATA, "zone");
        let value = resident_value(b"");
        let node_data = build_node(&[(&key, &value, 0)], 0, 0x02, None);
        let node = MinistoreNode::from_embedded(&context, &node_data).unwrap();

        let attribute = AttributeValues::read_record(&context, node.record(0).unwrap()).unwrap();
        assert!(!attribute.is_unnamed_data());
        assert_eq!(attribute.name(), "zone");
        match &attribute.data {
            AttributeData::Resident { data } => assert!(data.is_empty()),
            _ => panic!("expected a resident attribute"),
        }
    }

    #[test]
    fn non_resident_attribute_with_single_run() {
        let context = context(1);

        let mut run = [0u8; 32];
        run[8..16].copy_from_slice(&4u64.to_le_bytes());
        run[16..24].copy_from_slice(&0xe0u64.to_le_bytes());
        let run_key = [0u8; 8];
        let mut header = vec![0u8; 96];
        header[12..20].copy_from_slice(&65536u64.to_le_bytes());
        header[20..28].copy_from_slice(&60000u64.to_le_bytes());
        header[28..36].copy_from_slice(&60000u64.to_le_bytes());
        let value = build_node(&[(&run_key, &run, 0)], 0, 0x02, Some(&header));

        let key = attribute_key(ATTRIBUTE_TYPE_DATA, "");
        let node_data = build_node(
            &[(&key, &value, RECORD_FLAG_NON_RESIDENT)],
            0,
            0x02,
            None,
        );
        let node = MinistoreNode::from_embedded(&context, &node_data).unwrap();

        let attribute = AttributeValues::read_record(&context, node.record(0).unwrap()).unwrap();
        match &attribute.data {
            AttributeData::NonResident {
                allocated_data_size,
                data_size,
                valid_data_size,
                data_runs,
            } => {
                assert_eq!(*allocated_data_size, 65536);
                assert_eq!(*data_size, 60000);
                assert_eq!(*valid_data_size, 60000);
                assert_eq!(data_runs.len(), 1);
                assert_eq!(data_runs[0].logical_offset, 0);
                assert_eq!(data_runs[0].size, 4);
                assert_eq!(data_runs[0].physical_offset, 0xe0);
            }
            _ => panic!("expected a non-resident attribute"),
        }
    }

    #[test]
    fn short_attribute_key_is_rejected() {
        let context = context(1);
        let value = resident_value(b"x");
        let node_data = build_node(&[(&[0u8; 12], &value, 0)], 0, 0x02, None);
        let node = MinistoreNode::from_embedded(&context, &node_data).unwrap();
        assert!(AttributeValues::read_record(&context, node.record(0).unwrap()).is_err());
    }
}
