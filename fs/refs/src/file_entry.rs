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

use marmot_ds::DataStorage;
use marmot_err::Result;

use crate::{
    attribute::AttributeValues,
    directory::{DirectoryEntry, DirectoryObject, FileTimes},
    object::ROOT_DIRECTORY_IDENTIFIER,
    volume::Volume,
};

/// A file or directory within an open volume.
///
/// Holds a shared read-only borrow of its volume; dropping the volume
/// handle invalidates every derived entry at compile time.
pub struct FileEntry<'volume, DS: DataStorage> {
    volume: &'volume Volume<DS>,
    /// `None` for the root directory, which has no entry of its own.
    entry: Option<DirectoryEntry>,
    directory: Option<DirectoryObject>,
}

impl<'volume, DS: DataStorage> FileEntry<'volume, DS> {
    pub(crate) fn root(volume: &'volume Volume<DS>) -> Result<Self> {
        let directory = DirectoryObject::read(
            volume.context(),
            volume.data_storage(),
            volume.objects_tree(),
            ROOT_DIRECTORY_IDENTIFIER,
        )?;
        Ok(Self {
            volume,
            entry: None,
            directory: Some(directory),
        })
    }

    fn from_entry(volume: &'volume Volume<DS>, entry: DirectoryEntry) -> Result<Self> {
        let directory = match entry.object_identifier {
            Some(object_identifier) if entry.is_directory() => Some(DirectoryObject::read(
                volume.context(),
                volume.data_storage(),
                volume.objects_tree(),
                object_identifier,
            )?),
            _ => None,
        };
        Ok(Self {
            volume,
            entry: Some(entry),
            directory,
        })
    }

    /// UTF-8 projection of the entry name; the root directory has none.
    pub fn name(&self) -> Option<String> {
        self.entry.as_ref().map(DirectoryEntry::name)
    }

    /// On-disk UTF-16LE name bytes.
    pub fn name_data(&self) -> Option<&[u8]> {
        self.entry.as_ref().map(DirectoryEntry::name_data)
    }

    pub fn times(&self) -> FileTimes {
        self.entry
            .as_ref()
            .map(|entry| entry.times)
            .unwrap_or_default()
    }

    pub fn file_attribute_flags(&self) -> u32 {
        self.entry
            .as_ref()
            .map(|entry| entry.file_attribute_flags)
            .unwrap_or_default()
    }

    pub fn is_directory(&self) -> bool {
        self.directory.is_some()
    }

    pub fn object_identifier(&self) -> Option<u64> {
        match &self.entry {
            Some(entry) => entry.object_identifier,
            None => Some(ROOT_DIRECTORY_IDENTIFIER),
        }
    }

    /// File system identifier, files only.
    pub fn file_identifier(&self) -> Option<u128> {
        self.entry.as_ref().and_then(|entry| entry.file_identifier)
    }

    pub fn data_size(&self) -> u64 {
        self.entry
            .as_ref()
            .map(|entry| entry.data_size)
            .unwrap_or_default()
    }

    pub fn allocated_data_size(&self) -> u64 {
        self.entry
            .as_ref()
            .map(|entry| entry.allocated_data_size)
            .unwrap_or_default()
    }

    /// Attribute streams of a file; empty for directories.
    pub fn attributes(&self) -> &[AttributeValues] {
        self.entry
            .as_ref()
            .map(DirectoryEntry::attributes)
            .unwrap_or_default()
    }

    /// Children of a directory in on-disk key order; empty for files.
    /// Resolving a child directory reads from the volume, so items are
    /// fallible; a corrupt child leaves its siblings readable. Yielded
    /// entries borrow only the volume and outlive this handle.
    pub fn sub_entries<'entry>(&'entry self) -> SubEntries<'volume, 'entry, DS> {
        let entries = match &self.directory {
            Some(directory) => directory.entries(),
            None => &[],
        };
        SubEntries {
            volume: self.volume,
            entries: entries.iter(),
        }
    }
}

/// Iterator over the children of a directory.
pub struct SubEntries<'volume, 'entry, DS: DataStorage> {
    volume: &'volume Volume<DS>,
    entries: std::slice::Iter<'entry, DirectoryEntry>,
}

impl<'volume, 'entry, DS: DataStorage> Iterator for SubEntries<'volume, 'entry, DS> {
    type Item = Result<FileEntry<'volume, DS>>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        Some(FileEntry::from_entry(self.volume, entry.clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}
