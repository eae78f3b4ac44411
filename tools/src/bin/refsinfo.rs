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

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use marmot_ds_file::FileDataStorage;
use marmot_fs_refs::{Result, Volume};

/// Prints ReFS volume metadata.
#[derive(Parser)]
#[command(name = "refsinfo", version)]
struct Arguments {
    /// Path of the volume image.
    image: PathBuf,
    /// Byte offset of the volume within the image.
    #[arg(short = 'o', long = "offset", default_value_t = 0)]
    offset: u64,
}

fn main() -> ExitCode {
    env_logger::init();
    let arguments = match Arguments::try_parse() {
        Ok(arguments) => arguments,
        Err(error) => {
            let _ = error.print();
            return match error.kind() {
                clap::error::ErrorKind::DisplayHelp
                | clap::error::ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };
    match run(&arguments) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("refsinfo: {error}");
            ExitCode::from(2)
        }
    }
}

fn run(arguments: &Arguments) -> Result<()> {
    let data_storage = FileDataStorage::open_at(&arguments.image, arguments.offset)?;
    let volume = Volume::open(data_storage)?;
    let (major, minor) = volume.version();

    println!("ReFS volume information:");
    println!("\tVolume identifier\t: {}", format_guid(&volume.volume_identifier()));
    println!(
        "\tVolume name\t\t: {}",
        volume.volume_name().unwrap_or_default()
    );
    println!("\tFormat version\t\t: {major}.{minor}");
    println!("\tSerial number\t\t: 0x{:016x}", volume.serial_number());
    println!("\tBytes per sector\t: {}", volume.bytes_per_sector());
    println!("\tCluster block size\t: {}", volume.cluster_block_size());
    println!("\tMetadata block size\t: {}", volume.metadata_block_size());
    println!("\tVolume size\t\t: {}", volume.volume_size());
    Ok(())
}

/// GUID mixed-endian text form: the first three groups are little-endian.
fn format_guid(identifier: &[u8; 16]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        identifier[3], identifier[2], identifier[1], identifier[0],
        identifier[5], identifier[4],
        identifier[7], identifier[6],
        identifier[8], identifier[9],
        identifier[10], identifier[11], identifier[12], identifier[13], identifier[14],
        identifier[15],
    )
}
