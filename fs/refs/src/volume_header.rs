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

/// "ReFS" followed by four zero bytes, at offset 3 of the volume.
pub const FILE_SYSTEM_SIGNATURE: [u8; 8] = *b"ReFS\x00\x00\x00\x00";

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
struct BootSector {
    /// Boot loader jump instruction, not interpreted.
    jump: [u8; 3],
    /// The file system signature "ReFS\x00\x00\x00\x00".
    file_system_signature: [u8; 8],
    /// Must be 0.
    reserved: [u8; 5],
    /// The file system recognition structure signature "FSRS".
    fsrs_signature: [u8; 4],
    /// The size of the file system recognition structure.
    fsrs_size: U16,
    /// Checksum over the file system recognition structure.
    fsrs_checksum: U16,
    /// The total number of sectors of the volume.
    number_of_sectors: U64,
    /// The number of bytes per sector. Shall be a power of two within
    /// [512, 4096].
    bytes_per_sector: U32,
    /// The number of sectors per cluster block. Shall be a power of two.
    sectors_per_cluster_block: U32,
    /// The major format version, 1 (Windows Server 2012) or 3
    /// (Windows Server 2016 and later).
    major_format_version: u8,
    /// The minor format version.
    minor_format_version: u8,
    unknown1: [u8; 2],
    unknown2: [u8; 4],
    unknown3: [u8; 8],
    /// The volume serial number.
    serial_number: U64,
    /// The size of a container in bytes, 0 when the volume predates
    /// containers.
    container_size: U64,
}

/// Decoded boot sector. Consumed once per volume open to build the IO
/// context.
#[derive(Debug)]
pub struct VolumeHeader {
    pub volume_size: u64,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster_block: u32,
    pub major_format_version: u8,
    pub minor_format_version: u8,
    pub serial_number: u64,
    /// Container size in bytes, as stored.
    pub container_size: u64,
}

impl VolumeHeader {
    pub fn read<DS: DataStorage>(data_storage: &DS) -> Result<Self> {
        let mut data = [0u8; size_of::<BootSector>()];
        data_storage.read(0, &mut data)?;

        let boot_sector = crate::bytes::read_struct::<BootSector>(&data, "boot sector")?;
        if boot_sector.file_system_signature != FILE_SYSTEM_SIGNATURE {
            error!("Volume is not a ReFS volume");
            return Err(FormatError::InvalidSignature { offset: 3 }.into());
        }

        let bytes_per_sector = boot_sector.bytes_per_sector.get();
        if !bytes_per_sector.is_power_of_two()
            || !(9..=12).contains(&bytes_per_sector.ilog2())
        {
            error!("Bytes per sector ({bytes_per_sector}) shall be a power of 2 within [512, 4096]");
            return Err(FormatError::InvalidFormat {
                context: "bytes per sector",
            }
            .into());
        }
        let sectors_per_cluster_block = boot_sector.sectors_per_cluster_block.get();
        if !sectors_per_cluster_block.is_power_of_two() {
            error!("Sectors per cluster block ({sectors_per_cluster_block}) shall be a power of 2");
            return Err(FormatError::InvalidFormat {
                context: "sectors per cluster block",
            }
            .into());
        }

        Ok(Self {
            volume_size: boot_sector.number_of_sectors.get()
                * u64::from(bytes_per_sector),
            bytes_per_sector,
            sectors_per_cluster_block,
            major_format_version: boot_sector.major_format_version,
            minor_format_version: boot_sector.minor_format_version,
            serial_number: boot_sector.serial_number.get(),
            container_size: boot_sector.container_size.get(),
        })
    }
}
