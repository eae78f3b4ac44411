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

use marmot_err::{FormatError, Result};
use zerocopy::FromBytes;

/// Copies a fixed on-disk structure out of the front of `data`.
pub(crate) fn read_struct<T: FromBytes>(data: &[u8], field: &'static str) -> Result<T> {
    T::read_from_prefix(data)
        .map(|(value, _)| value)
        .map_err(|_| {
            FormatError::OutOfBounds {
                field,
                value: size_of::<T>() as u64,
                limit: data.len() as u64,
            }
            .into()
        })
}

pub(crate) fn subslice<'data>(
    data: &'data [u8],
    offset: usize,
    size: usize,
    field: &'static str,
) -> Result<&'data [u8]> {
    let end = offset.checked_add(size).filter(|&end| end <= data.len());
    match end {
        Some(end) => Ok(&data[offset..end]),
        None => Err(FormatError::OutOfBounds {
            field,
            value: offset as u64 + size as u64,
            limit: data.len() as u64,
        }
        .into()),
    }
}

pub(crate) fn le_u32(data: &[u8], offset: usize, field: &'static str) -> Result<u32> {
    let bytes = subslice(data, offset, 4, field)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn le_u64(data: &[u8], offset: usize, field: &'static str) -> Result<u64> {
    let bytes = subslice(data, offset, 8, field)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}
