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

//! Drives the whole pipeline against a synthetic v1 volume image held in
//! memory: boot sector, superblock, two checkpoints with diverging
//! sequence numbers, objects tree, volume object and a root directory with
//! a file and an (empty) subdirectory.

use marmot_fs_refs::{AttributeData, Error, FileTimes, IoError, Volume};

const BLOCK_SIZE: usize = 16384;
const BLOCK_COUNT: usize = 40;
const HEADER_SIZE: usize = 48;

const SUPERBLOCK_BLOCK: u64 = 30;
const BACKUP_SUPERBLOCK_BLOCK: u64 = 38;
const PRIMARY_CHECKPOINT_BLOCK: u64 = 10;
const SECONDARY_CHECKPOINT_BLOCK: u64 = 11;
const OBJECTS_TREE_BLOCK: u64 = 12;
const ROOT_DIRECTORY_BLOCK: u64 = 13;
const VOLUME_OBJECT_BLOCK: u64 = 14;
const DOCS_DIRECTORY_BLOCK: u64 = 15;

const VOLUME_IDENTIFIER: [u8; 16] = [
    0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x10, 0x32, 0x54, 0x76, 0x98, 0xba,
    0xdc, 0xfe,
];

fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

fn boot_sector() -> [u8; 512] {
    let mut data = [0u8; 512];
    data[3..11].copy_from_slice(b"ReFS\x00\x00\x00\x00");
    data[16..20].copy_from_slice(b"FSRS");
    let number_of_sectors = (BLOCK_COUNT * BLOCK_SIZE / 512) as u64;
    data[24..32].copy_from_slice(&number_of_sectors.to_le_bytes());
    data[32..36].copy_from_slice(&512u32.to_le_bytes());
    data[36..40].copy_from_slice(&8u32.to_le_bytes());
    data[40] = 1;
    data[41] = 2;
    data[56..64].copy_from_slice(&0xfeed_beef_u64.to_le_bytes());
    data
}

/// v1 block reference with a trailing 4-byte checksum.
fn reference(block_number: u64) -> Vec<u8> {
    let mut data = vec![0u8; 20];
    data[0..8].copy_from_slice(&block_number.to_le_bytes());
    data[10] = 1;
    data[11] = 8;
    data[12..14].copy_from_slice(&4u16.to_le_bytes());
    data
}

/// Post-header payload of a ministore node.
fn node_payload(
    records: &[(Vec<u8>, Vec<u8>, u16)],
    node_type_flags: u8,
    header_blob: Option<&[u8]>,
) -> Vec<u8> {
    let node_header_offset = match header_blob {
        Some(blob) => 4 + 32 + blob.len(),
        None => 4,
    };
    let mut data = vec![0u8; node_header_offset];
    data[0..4].copy_from_slice(&(node_header_offset as u32).to_le_bytes());
    if let Some(blob) = header_blob {
        data[4..6].copy_from_slice(&((32 + blob.len()) as u16).to_le_bytes());
        data[36..36 + blob.len()].copy_from_slice(blob);
    }

    let node_header_at = data.len();
    data.extend_from_slice(&[0u8; 32]);

    let mut record_offsets = Vec::with_capacity(records.len());
    for (key, value, flags) in records {
        record_offsets.push((data.len() - node_header_at) as u32);
        let record_size = 16 + key.len() + value.len();
        data.extend_from_slice(&(record_size as u32).to_le_bytes());
        data.extend_from_slice(&16u16.to_le_bytes());
        data.extend_from_slice(&(key.len() as u16).to_le_bytes());
        data.extend_from_slice(&flags.to_le_bytes());
        data.extend_from_slice(&((16 + key.len()) as u16).to_le_bytes());
        data.extend_from_slice(&(value.len() as u16).to_le_bytes());
        data.extend_from_slice(&[0u8; 2]);
        data.extend_from_slice(key);
        data.extend_from_slice(value);
    }

    let data_area_end = (data.len() - node_header_at) as u32;
    for record_offset in &record_offsets {
        data.extend_from_slice(&record_offset.to_le_bytes());
    }
    let record_offsets_end = (data.len() - node_header_at) as u32;

    let header = &mut data[node_header_at..node_header_at + 32];
    header[0..4].copy_from_slice(&32u32.to_le_bytes());
    header[4..8].copy_from_slice(&data_area_end.to_le_bytes());
    header[13] = node_type_flags;
    header[16..20].copy_from_slice(&data_area_end.to_le_bytes());
    header[20..24].copy_from_slice(&(records.len() as u32).to_le_bytes());
    header[24..28].copy_from_slice(&record_offsets_end.to_le_bytes());
    data
}

/// A whole v1 metadata block: 48-byte header plus payload.
fn metadata_block(block_number: u64, payload: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; BLOCK_SIZE];
    data[0..8].copy_from_slice(&block_number.to_le_bytes());
    data[8..16].copy_from_slice(&1u64.to_le_bytes());
    data[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    data
}

fn superblock_block(block_number: u64) -> Vec<u8> {
    let mut payload = vec![0u8; 128];
    payload[0..16].copy_from_slice(&VOLUME_IDENTIFIER);
    payload[32..36].copy_from_slice(&((HEADER_SIZE + 48) as u32).to_le_bytes());
    payload[36..40].copy_from_slice(&2u32.to_le_bytes());
    payload[40..44].copy_from_slice(&((HEADER_SIZE + 64) as u32).to_le_bytes());
    payload[44..48].copy_from_slice(&16u32.to_le_bytes());
    payload[48..56].copy_from_slice(&PRIMARY_CHECKPOINT_BLOCK.to_le_bytes());
    payload[56..64].copy_from_slice(&SECONDARY_CHECKPOINT_BLOCK.to_le_bytes());
    let self_reference = reference(block_number);
    payload[64..64 + self_reference.len()].copy_from_slice(&self_reference);
    metadata_block(block_number, &payload)
}

fn checkpoint_block(block_number: u64, sequence_number: u64) -> Vec<u8> {
    let trailer_size = 28;
    let tree_references = [reference(OBJECTS_TREE_BLOCK)];
    let offsets_start = 16 + trailer_size;
    let self_reference_offset = offsets_start + 4 * tree_references.len();
    let self_reference = reference(block_number);

    let mut payload = vec![0u8; 256];
    payload[4..6].copy_from_slice(&1u16.to_le_bytes());
    payload[6..8].copy_from_slice(&2u16.to_le_bytes());
    payload[8..12]
        .copy_from_slice(&((self_reference_offset + HEADER_SIZE) as u32).to_le_bytes());
    payload[12..16].copy_from_slice(&16u32.to_le_bytes());
    payload[16..24].copy_from_slice(&sequence_number.to_le_bytes());
    payload[16 + trailer_size - 4..16 + trailer_size]
        .copy_from_slice(&(tree_references.len() as u32).to_le_bytes());

    let mut cursor = self_reference_offset + self_reference.len();
    for (index, tree_reference) in tree_references.iter().enumerate() {
        payload[offsets_start + 4 * index..offsets_start + 4 * index + 4]
            .copy_from_slice(&((cursor + HEADER_SIZE) as u32).to_le_bytes());
        payload[cursor..cursor + tree_reference.len()].copy_from_slice(tree_reference);
        cursor += tree_reference.len();
    }
    payload[self_reference_offset..self_reference_offset + self_reference.len()]
        .copy_from_slice(&self_reference);
    metadata_block(block_number, &payload)
}

fn object_key(object_identifier: u64) -> Vec<u8> {
    let mut key = vec![0u8; 16];
    key[8..16].copy_from_slice(&object_identifier.to_le_bytes());
    key
}

fn objects_tree_block() -> Vec<u8> {
    let records = vec![
        (object_key(0x500), reference(VOLUME_OBJECT_BLOCK), 0),
        (object_key(0x600), reference(ROOT_DIRECTORY_BLOCK), 0),
        (object_key(0x700), reference(DOCS_DIRECTORY_BLOCK), 0),
    ];
    metadata_block(OBJECTS_TREE_BLOCK, &node_payload(&records, 0x02, None))
}

fn directory_entry_key(entry_type: u16, name: &str) -> Vec<u8> {
    let mut key = Vec::new();
    key.extend_from_slice(&0x0030u16.to_le_bytes());
    key.extend_from_slice(&entry_type.to_le_bytes());
    key.extend_from_slice(&utf16le(name));
    key
}

fn directory_values(object_identifier: u64, times: [u64; 4], flags: u32) -> Vec<u8> {
    let mut data = vec![0u8; 72];
    data[0..8].copy_from_slice(&object_identifier.to_le_bytes());
    for (index, time) in times.iter().enumerate() {
        data[16 + index * 8..24 + index * 8].copy_from_slice(&time.to_le_bytes());
    }
    data[64..68].copy_from_slice(&flags.to_le_bytes());
    data
}

/// Embedded file node: file values blob and one resident unnamed $DATA
/// attribute.
fn file_values(times: [u64; 4], flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut blob = vec![0u8; 128];
    for (index, time) in times.iter().enumerate() {
        blob[index * 8..index * 8 + 8].copy_from_slice(&time.to_le_bytes());
    }
    blob[32..36].copy_from_slice(&flags.to_le_bytes());
    blob[40..48].copy_from_slice(&0x2au64.to_le_bytes());
    blob[64..72].copy_from_slice(&(payload.len() as u64).to_le_bytes());
    blob[72..80].copy_from_slice(&16384u64.to_le_bytes());

    let mut attribute_key = vec![0u8; 14];
    attribute_key[8..12].copy_from_slice(&0x80u32.to_le_bytes());
    let mut attribute_value = vec![0u8; 60];
    attribute_value[4..8].copy_from_slice(&60u32.to_le_bytes());
    attribute_value[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    attribute_value.extend_from_slice(payload);

    node_payload(&[(attribute_key, attribute_value, 0)], 0x02, Some(&blob))
}

fn root_directory_block() -> Vec<u8> {
    // Key order under the right-to-left comparator: "docs" before
    // "readme.txt".
    let records = vec![
        (
            directory_entry_key(2, "docs"),
            directory_values(0x700, [11, 12, 13, 14], 0x0010),
            0,
        ),
        (
            directory_entry_key(1, "readme.txt"),
            file_values([21, 22, 23, 24], 0x0020, b"resilient"),
            0,
        ),
    ];
    metadata_block(ROOT_DIRECTORY_BLOCK, &node_payload(&records, 0x02, None))
}

fn volume_object_block() -> Vec<u8> {
    let records = vec![
        (0x510u64.to_le_bytes().to_vec(), utf16le("TESTVOL"), 0),
        (0x520u64.to_le_bytes().to_vec(), vec![0u8; 16], 0),
    ];
    metadata_block(VOLUME_OBJECT_BLOCK, &node_payload(&records, 0x02, None))
}

fn docs_directory_block() -> Vec<u8> {
    metadata_block(DOCS_DIRECTORY_BLOCK, &node_payload(&[], 0x02, None))
}

fn build_image() -> Vec<u8> {
    let mut image = vec![0u8; BLOCK_COUNT * BLOCK_SIZE];
    let mut place = |block_number: u64, data: Vec<u8>| {
        let offset = block_number as usize * BLOCK_SIZE;
        image[offset..offset + data.len()].copy_from_slice(&data);
    };
    place(SUPERBLOCK_BLOCK, superblock_block(SUPERBLOCK_BLOCK));
    place(
        BACKUP_SUPERBLOCK_BLOCK,
        superblock_block(BACKUP_SUPERBLOCK_BLOCK),
    );
    place(PRIMARY_CHECKPOINT_BLOCK, checkpoint_block(PRIMARY_CHECKPOINT_BLOCK, 7));
    place(
        SECONDARY_CHECKPOINT_BLOCK,
        checkpoint_block(SECONDARY_CHECKPOINT_BLOCK, 8),
    );
    place(OBJECTS_TREE_BLOCK, objects_tree_block());
    place(ROOT_DIRECTORY_BLOCK, root_directory_block());
    place(VOLUME_OBJECT_BLOCK, volume_object_block());
    place(DOCS_DIRECTORY_BLOCK, docs_directory_block());
    image[0..512].copy_from_slice(&boot_sector());
    image
}

#[test]
fn open_and_enumerate() {
    let image = build_image();
    let volume = Volume::open(image.as_slice()).unwrap();

    assert_eq!(volume.volume_identifier(), VOLUME_IDENTIFIER);
    assert_eq!(volume.volume_name().as_deref(), Some("TESTVOL"));
    assert_eq!(volume.version(), (1, 2));
    assert_eq!(volume.serial_number(), 0xfeed_beef);
    assert_eq!(volume.bytes_per_sector(), 512);
    assert_eq!(volume.cluster_block_size(), 4096);
    assert_eq!(volume.metadata_block_size(), 16384);
    assert_eq!(volume.volume_size(), (BLOCK_COUNT * BLOCK_SIZE) as u64);
    // The secondary checkpoint carries the higher sequence number.
    assert_eq!(volume.checkpoint_sequence_number(), 8);

    let root = volume.root_directory().unwrap();
    assert!(root.is_directory());
    assert_eq!(root.name(), None);
    assert_eq!(root.object_identifier(), Some(0x600));

    let children: Vec<_> = root
        .sub_entries()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let names: Vec<_> = children.iter().map(|entry| entry.name().unwrap()).collect();
    assert_eq!(names, ["docs", "readme.txt"]);

    let docs = &children[0];
    assert!(docs.is_directory());
    assert_eq!(docs.object_identifier(), Some(0x700));
    assert_eq!(
        docs.times(),
        FileTimes {
            creation: 11,
            modification: 12,
            entry_modification: 13,
            access: 14,
        }
    );
    assert_eq!(docs.file_attribute_flags(), 0x0010);
    assert_eq!(docs.sub_entries().count(), 0);

    let readme = &children[1];
    assert!(!readme.is_directory());
    assert_eq!(readme.data_size(), 9);
    assert_eq!(readme.file_attribute_flags(), 0x0020);
    assert_eq!(
        readme.times(),
        FileTimes {
            creation: 21,
            modification: 22,
            entry_modification: 23,
            access: 24,
        }
    );
    assert_eq!(readme.sub_entries().count(), 0);
    let attributes = readme.attributes();
    assert_eq!(attributes.len(), 1);
    assert!(attributes[0].is_unnamed_data());
    match &attributes[0].data {
        AttributeData::Resident { data } => assert_eq!(data, b"resilient"),
        _ => panic!("expected a resident stream"),
    }
}

#[test]
fn enumeration_is_deterministic() {
    let image = build_image();
    let volume = Volume::open(image.as_slice()).unwrap();
    let root = volume.root_directory().unwrap();

    let first: Vec<_> = root
        .sub_entries()
        .map(|entry| entry.unwrap().name().unwrap())
        .collect();
    let second: Vec<_> = root
        .sub_entries()
        .map(|entry| entry.unwrap().name().unwrap())
        .collect();
    assert_eq!(first, second);
}

#[test]
fn corrupt_primary_superblock_falls_back_to_backup_copy() {
    let mut image = build_image();
    let offset = SUPERBLOCK_BLOCK as usize * BLOCK_SIZE;
    image[offset..offset + BLOCK_SIZE].fill(0);

    let volume = Volume::open(image.as_slice()).unwrap();
    assert_eq!(volume.volume_identifier(), VOLUME_IDENTIFIER);
}

#[test]
fn missing_volume_object_yields_no_name() {
    let mut image = build_image();
    // Rebuild the objects tree without the volume object.
    let records = vec![
        (object_key(0x600), reference(ROOT_DIRECTORY_BLOCK), 0),
        (object_key(0x700), reference(DOCS_DIRECTORY_BLOCK), 0),
    ];
    let block = metadata_block(OBJECTS_TREE_BLOCK, &node_payload(&records, 0x02, None));
    let offset = OBJECTS_TREE_BLOCK as usize * BLOCK_SIZE;
    image[offset..offset + BLOCK_SIZE].copy_from_slice(&block);

    let volume = Volume::open(image.as_slice()).unwrap();
    assert_eq!(volume.volume_name(), None);
    assert!(volume.root_directory().is_ok());
}

#[test]
fn abort_interrupts_the_next_read() {
    let image = build_image();
    let volume = Volume::open(image.as_slice()).unwrap();
    volume.signal_abort();
    assert!(matches!(
        volume.root_directory(),
        Err(Error::Io(IoError::Aborted))
    ));
}
