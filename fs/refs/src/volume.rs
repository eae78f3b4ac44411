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

use log::{debug, warn};
use marmot_ds::DataStorage;
use marmot_err::{Error, FormatError, Result};

use crate::{
    checkpoint::{read_checkpoints, Checkpoint, CONTAINER_TREE_INDEXES},
    context::{FormatVersion, IoContext},
    file_entry::FileEntry,
    name::utf16le_to_string,
    node::MinistoreNode,
    object::{ObjectsTree, VOLUME_IDENTIFIER},
    superblock::{Superblock, PRIMARY_SUPERBLOCK_BLOCK_NUMBER},
    volume_header::VolumeHeader,
};

/// Value identifier of the volume label within the volume object.
const VOLUME_NAME_VALUE_IDENTIFIER: u64 = 0x510;

/// An open ReFS volume.
///
/// Owns the data storage and everything resolved at open time; file entry
/// handles borrow the volume, so it outlives all of them.
pub struct Volume<DS: DataStorage> {
    data_storage: DS,
    context: IoContext,
    volume_header: VolumeHeader,
    superblock: Superblock,
    checkpoint: Checkpoint,
    objects_tree: ObjectsTree,
    volume_name_data: Option<Vec<u8>>,
}

impl<DS: DataStorage> Volume<DS> {
    /// Opens a volume: decodes the volume header, locates the superblock
    /// and the authoritative checkpoint, and roots the objects tree.
    pub fn open(data_storage: DS) -> Result<Self> {
        let volume_header = VolumeHeader::read(&data_storage)?;
        let context = IoContext::new(&volume_header)?;
        debug!(
            "ReFS {}.{} volume, {} bytes",
            volume_header.major_format_version,
            volume_header.minor_format_version,
            volume_header.volume_size
        );

        let superblock = read_superblock(&context, &data_storage)?;
        let checkpoint = read_checkpoints(&context, &data_storage, &superblock)?;
        let objects_tree = ObjectsTree::read(&context, &data_storage, &checkpoint)?;
        if context.version() == FormatVersion::V3 {
            read_container_trees(&context, &data_storage, &checkpoint)?;
        }
        let volume_name_data = read_volume_name(&context, &data_storage, &objects_tree)?;

        Ok(Self {
            data_storage,
            context,
            volume_header,
            superblock,
            checkpoint,
            objects_tree,
            volume_name_data,
        })
    }

    pub fn volume_identifier(&self) -> [u8; 16] {
        self.superblock.volume_identifier
    }

    /// UTF-8 projection of the volume label, when the volume object carries
    /// one.
    pub fn volume_name(&self) -> Option<String> {
        self.volume_name_data
            .as_deref()
            .map(utf16le_to_string)
    }

    pub fn version(&self) -> (u8, u8) {
        (
            self.context.major_format_version,
            self.context.minor_format_version,
        )
    }

    pub fn serial_number(&self) -> u64 {
        self.volume_header.serial_number
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.context.bytes_per_sector
    }

    pub fn cluster_block_size(&self) -> u32 {
        self.context.cluster_block_size
    }

    pub fn metadata_block_size(&self) -> u32 {
        self.context.metadata_block_size
    }

    pub fn volume_size(&self) -> u64 {
        self.context.volume_size
    }

    pub fn checkpoint_sequence_number(&self) -> u64 {
        self.checkpoint.sequence_number
    }

    pub fn root_directory(&self) -> Result<FileEntry<'_, DS>> {
        FileEntry::root(self)
    }

    /// Makes the next metadata block read of any operation on this volume
    /// fail with `Aborted`.
    pub fn signal_abort(&self) {
        self.context.signal_abort();
    }

    pub(crate) fn context(&self) -> &IoContext {
        &self.context
    }

    pub(crate) fn data_storage(&self) -> &DS {
        &self.data_storage
    }

    pub(crate) fn objects_tree(&self) -> &ObjectsTree {
        &self.objects_tree
    }
}

/// Reads the primary superblock copy at block 30, falling back to the
/// trailing copy when the primary fails to decode.
fn read_superblock<DS: DataStorage>(
    context: &IoContext,
    data_storage: &DS,
) -> Result<Superblock> {
    match Superblock::read(context, data_storage, PRIMARY_SUPERBLOCK_BLOCK_NUMBER) {
        Ok(superblock) => Ok(superblock),
        Err(error) => {
            warn!("Primary superblock unreadable: {error}");
            let backup_block_number = context.metadata_block_count().saturating_sub(2);
            Superblock::read(context, data_storage, backup_block_number).map_err(|_| error)
        }
    }
}

/// Loads the v3 container-table trees (checkpoint slots 7 and 8). Their
/// contents are not interpreted; remapping is left to direct addressing.
fn read_container_trees<DS: DataStorage>(
    context: &IoContext,
    data_storage: &DS,
    checkpoint: &Checkpoint,
) -> Result<()> {
    for index in CONTAINER_TREE_INDEXES {
        let Some(reference) = checkpoint.tree_reference(index) else {
            continue;
        };
        let node = MinistoreNode::read(context, data_storage, reference)?;
        debug!(
            "Container tree {index} with {} records",
            node.number_of_records()
        );
    }
    Ok(())
}

fn read_volume_name<DS: DataStorage>(
    context: &IoContext,
    data_storage: &DS,
    objects_tree: &ObjectsTree,
) -> Result<Option<Vec<u8>>> {
    let node = match objects_tree.object_root_node(context, data_storage, VOLUME_IDENTIFIER) {
        Ok(node) => node,
        Err(Error::Format(FormatError::ObjectNotFound { .. })) => return Ok(None),
        Err(error) => return Err(error),
    };
    let key_data = VOLUME_NAME_VALUE_IDENTIFIER.to_le_bytes();
    Ok(node.find(&key_data).map(|record| record.value.to_vec()))
}
