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

use log::debug;
use marmot_ds::DataStorage;
use marmot_err::{FormatError, Result};
use zerocopy::{
    little_endian::{U32, U64},
    FromBytes, IntoBytes, KnownLayout,
};

use crate::{
    attribute::AttributeValues,
    bytes::read_struct,
    context::IoContext,
    name::utf16le_to_string,
    node::{MinistoreNode, Record},
    object::ObjectsTree,
};

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct DirectoryValues {
    /// Object identifier of the subdirectory.
    object_identifier: U64,
    unknown1: U64,
    /// The creation date and time, as a FILETIME.
    creation_time: U64,
    /// The last modification date and time, as a FILETIME.
    modification_time: U64,
    /// The entry last modification date and time, as a FILETIME.
    entry_modification_time: U64,
    /// The last access date and time, as a FILETIME.
    access_time: U64,
    unknown2: [u8; 16],
    /// The file attribute flags.
    file_attribute_flags: U32,
    unknown3: U32,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct FileValues {
    /// The creation date and time, as a FILETIME.
    creation_time: U64,
    /// The last modification date and time, as a FILETIME.
    modification_time: U64,
    /// The entry last modification date and time, as a FILETIME.
    entry_modification_time: U64,
    /// The last access date and time, as a FILETIME.
    access_time: U64,
    /// The file attribute flags.
    file_attribute_flags: U32,
    unknown1: U32,
    /// The file system identifier, lower 64 bits.
    identifier_lower: U64,
    /// The file system identifier, upper 64 bits.
    identifier_upper: U64,
    unknown4: U32,
    unknown5: U32,
    /// The file data size.
    data_size: U64,
    /// The allocated file data size.
    allocated_data_size: U64,
    unknown6: [u8; 32],
    unknown7: U64,
    unknown8: U64,
}

/// FILETIMEs of a directory entry: 100-nanosecond ticks since
/// 1601-01-01 00:00:00 UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub creation: u64,
    pub modification: u64,
    pub access: u64,
    pub entry_modification: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
}

/// One decoded directory entry. Name bytes are copied out of the node, so
/// entries outlive the block they were decoded from.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub entry_type: EntryType,
    name_data: Vec<u8>,
    pub times: FileTimes,
    pub file_attribute_flags: u32,
    /// Target object identifier, subdirectories only.
    pub object_identifier: Option<u64>,
    /// File system identifier, files only.
    pub file_identifier: Option<u128>,
    pub data_size: u64,
    pub allocated_data_size: u64,
    attributes: Vec<AttributeValues>,
}

impl DirectoryEntry {
    /// Decodes a directory-entry record. Records of other types that share
    /// the directory node yield `None`.
    pub(crate) fn read_record(
        context: &IoContext,
        record: Record<'_>,
    ) -> Result<Option<Self>> {
        if record.key.len() < 6 {
            return Ok(None);
        }
        let entry_type = u16::from_le_bytes([record.key[2], record.key[3]]);
        let entry_type = match entry_type {
            1 => EntryType::File,
            2 => EntryType::Directory,
            _ => return Ok(None),
        };
        let name_data = record.key[4..].to_vec();

        let mut entry = Self {
            entry_type,
            name_data,
            times: FileTimes::default(),
            file_attribute_flags: 0,
            object_identifier: None,
            file_identifier: None,
            data_size: 0,
            allocated_data_size: 0,
            attributes: Vec::new(),
        };
        match entry_type {
            EntryType::Directory => entry.read_directory_values(record.value)?,
            EntryType::File => entry.read_file_values(context, record.value)?,
        }
        Ok(Some(entry))
    }

    fn read_directory_values(&mut self, data: &[u8]) -> Result<()> {
        let values = read_struct::<DirectoryValues>(data, "directory values")?;
        self.object_identifier = Some(values.object_identifier.get());
        self.times = FileTimes {
            creation: values.creation_time.get(),
            modification: values.modification_time.get(),
            access: values.access_time.get(),
            entry_modification: values.entry_modification_time.get(),
        };
        self.file_attribute_flags = values.file_attribute_flags.get();
        Ok(())
    }

    /// The value of a file entry is an embedded ministore leaf whose header
    /// blob carries the file values and whose records are the attribute
    /// streams.
    fn read_file_values(&mut self, context: &IoContext, data: &[u8]) -> Result<()> {
        let node = MinistoreNode::from_embedded(context, data)?;
        if !node.is_leaf() {
            return Err(FormatError::InvalidFormat {
                context: "file values node shall be a leaf",
            }
            .into());
        }
        let header_data = node.header_blob().ok_or(FormatError::InvalidFormat {
            context: "file values node shall carry a header",
        })?;
        let values = read_struct::<FileValues>(header_data, "file values")?;
        self.times = FileTimes {
            creation: values.creation_time.get(),
            modification: values.modification_time.get(),
            access: values.access_time.get(),
            entry_modification: values.entry_modification_time.get(),
        };
        self.file_attribute_flags = values.file_attribute_flags.get();
        self.file_identifier = Some(
            u128::from(values.identifier_lower.get())
                | u128::from(values.identifier_upper.get()) << 64,
        );
        self.data_size = values.data_size.get();
        self.allocated_data_size = values.allocated_data_size.get();

        if node.number_of_records() == 0 {
            return Err(FormatError::InvalidFormat {
                context: "file values node shall carry attribute records",
            }
            .into());
        }
        self.attributes.reserve(node.number_of_records());
        for record in node.records() {
            self.attributes
                .push(AttributeValues::read_record(context, record)?);
        }
        Ok(())
    }

    pub fn name(&self) -> String {
        utf16le_to_string(&self.name_data)
    }

    pub fn name_data(&self) -> &[u8] {
        &self.name_data
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    /// Attribute streams, files only; empty for subdirectories.
    pub fn attributes(&self) -> &[AttributeValues] {
        &self.attributes
    }
}

/// A directory: an object whose root ministore node holds directory-entry
/// records in key order.
#[derive(Debug)]
pub struct DirectoryObject {
    entries: Vec<DirectoryEntry>,
}

impl DirectoryObject {
    pub fn read<DS: DataStorage>(
        context: &IoContext,
        data_storage: &DS,
        objects_tree: &ObjectsTree,
        object_identifier: u64,
    ) -> Result<Self> {
        let root_node =
            objects_tree.object_root_node(context, data_storage, object_identifier)?;
        Self::from_node(context, &root_node)
    }

    pub(crate) fn from_node(context: &IoContext, node: &MinistoreNode) -> Result<Self> {
        let mut entries = Vec::new();
        for record in node.records() {
            if let Some(entry) = DirectoryEntry::read_record(context, record)? {
                entries.push(entry);
            }
        }
        debug!("Directory object with {} entries", entries.len());
        Ok(Self { entries })
    }

    pub fn number_of_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }
}
