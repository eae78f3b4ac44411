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

//! Read-only access to the ReFS (Resilient File System) on-disk format.
//!
//! The entry point is [`Volume::open`] over any [`marmot_ds::DataStorage`].
//! An open volume exposes its identity (identifier, label, format version,
//! geometry) and the directory tree as [`FileEntry`] handles, which borrow
//! the volume and enumerate children in on-disk key order.
//!
//! Both the v1 (Windows Server 2012) and v3 (Windows Server 2016 and
//! later) header and reference shapes are supported behind one traversal
//! model. Write support, allocator state and checksum verification are out
//! of scope; checksums are decoded and surfaced, never verified.

pub use marmot_err::{Error, FormatError, IoError, Result};

mod bytes;

pub mod attribute;
pub mod block;
pub mod checkpoint;
pub mod context;
pub mod directory;
pub mod file_entry;
pub mod name;
pub mod node;
pub mod object;
pub mod superblock;
pub mod volume;
pub mod volume_header;

pub use crate::{
    attribute::{AttributeData, AttributeValues, DataRun, ATTRIBUTE_TYPE_DATA},
    block::{BlockReference, BlockRole, MetadataBlockHeader},
    checkpoint::{Checkpoint, CONTAINER_TREE_INDEXES, OBJECTS_TREE_INDEX},
    context::{FormatVersion, IoContext},
    directory::{DirectoryEntry, DirectoryObject, EntryType, FileTimes},
    file_entry::{FileEntry, SubEntries},
    node::{compare_keys, MinistoreNode, Record, RECORD_FLAG_NON_RESIDENT},
    object::{ObjectsTree, ROOT_DIRECTORY_IDENTIFIER, VOLUME_IDENTIFIER},
    superblock::{Superblock, PRIMARY_SUPERBLOCK_BLOCK_NUMBER},
    volume::Volume,
    volume_header::VolumeHeader,
};
