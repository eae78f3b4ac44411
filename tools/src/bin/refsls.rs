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
use marmot_ds::DataStorage;
use marmot_ds_file::FileDataStorage;
use marmot_fs_refs::{Error, FileEntry, FormatError, Result, Volume};

/// Lists a directory of a ReFS volume.
#[derive(Parser)]
#[command(name = "refsls", version)]
struct Arguments {
    /// Path of the volume image.
    image: PathBuf,
    /// Directory to list, '/'-separated.
    #[arg(default_value = "/")]
    path: String,
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
            eprintln!("refsls: {error}");
            ExitCode::from(2)
        }
    }
}

fn run(arguments: &Arguments) -> Result<()> {
    let data_storage = FileDataStorage::open_at(&arguments.image, arguments.offset)?;
    let volume = Volume::open(data_storage)?;
    let entry = resolve(&volume, &arguments.path)?;

    if entry.is_directory() {
        for child in entry.sub_entries() {
            print_entry(&child?);
        }
    } else {
        print_entry(&entry);
    }
    Ok(())
}

/// Walks the '/'-separated path from the root directory by exact name
/// match.
fn resolve<'volume, DS: DataStorage>(
    volume: &'volume Volume<DS>,
    path: &str,
) -> Result<FileEntry<'volume, DS>> {
    let mut current = volume.root_directory()?;
    for component in path.split('/').filter(|component| !component.is_empty()) {
        let mut next = None;
        for entry in current.sub_entries() {
            let entry = entry?;
            if entry.name().as_deref() == Some(component) {
                next = Some(entry);
                break;
            }
        }
        match next {
            Some(entry) => current = entry,
            None => {
                log::error!("No entry named {component:?}");
                return Err(Error::Format(FormatError::KeyNotFound));
            }
        }
    }
    Ok(current)
}

fn print_entry<DS: DataStorage>(entry: &FileEntry<'_, DS>) {
    let times = entry.times();
    println!(
        "{} 0x{:08x} {:>12} {:>20} {}",
        if entry.is_directory() { 'd' } else { '-' },
        entry.file_attribute_flags(),
        entry.data_size(),
        times.modification,
        entry.name().unwrap_or_else(|| "/".into()),
    );
}
