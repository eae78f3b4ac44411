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

use log::{debug, error};
use marmot_ds::DataStorage;
use marmot_err::{FormatError, Result};

use crate::{
    block::BlockReference,
    checkpoint::{Checkpoint, OBJECTS_TREE_INDEX},
    context::IoContext,
    node::MinistoreNode,
};

/// Object identifier of the root directory.
pub const ROOT_DIRECTORY_IDENTIFIER: u64 = 0x600;
/// Object identifier of the volume object (label, volume information).
pub const VOLUME_IDENTIFIER: u64 = 0x500;

/// Depth bound for branch descent; real objects trees are far shallower.
const MAXIMUM_TREE_DEPTH: usize = 16;

/// The tree behind checkpoint slot 0: maps 64-bit object identifiers to the
/// root ministore node of each object's own tree.
#[derive(Debug)]
pub struct ObjectsTree {
    root_node: MinistoreNode,
}

impl ObjectsTree {
    pub fn read<DS: DataStorage>(
        context: &IoContext,
        data_storage: &DS,
        checkpoint: &Checkpoint,
    ) -> Result<Self> {
        let reference = checkpoint
            .tree_reference(OBJECTS_TREE_INDEX)
            .ok_or(FormatError::InvalidFormat {
                context: "checkpoint shall reference the objects tree",
            })?;
        let root_node = MinistoreNode::read(context, data_storage, reference)?;
        if !root_node.is_root() {
            error!("Objects tree root node is missing the is-root flag");
            return Err(FormatError::InvalidFormat {
                context: "objects tree root node shall have the is-root flag",
            }
            .into());
        }
        Ok(Self { root_node })
    }

    /// Resolves an object identifier to the root node of that object's
    /// tree. Branch nodes are descended by the largest-key-at-most rule.
    pub fn object_root_node<DS: DataStorage>(
        &self,
        context: &IoContext,
        data_storage: &DS,
        object_identifier: u64,
    ) -> Result<MinistoreNode> {
        let mut key_data = [0u8; 16];
        key_data[8..16].copy_from_slice(&object_identifier.to_le_bytes());

        let mut current: Option<MinistoreNode> = None;
        for _ in 0..MAXIMUM_TREE_DEPTH {
            let node = current.as_ref().unwrap_or(&self.root_node);
            let record = if node.is_leaf() {
                node.find(&key_data)
            } else {
                node.find_branch(&key_data)
            };
            let Some(record) = record else {
                debug!("Object 0x{object_identifier:04x} not in the objects tree");
                return Err(FormatError::ObjectNotFound {
                    identifier: object_identifier,
                }
                .into());
            };
            let reference = BlockReference::read(context, record.value)?;
            let child = MinistoreNode::read(context, data_storage, &reference)?;
            if node.is_leaf() {
                return Ok(child);
            }
            current = Some(child);
        }
        Err(FormatError::InvalidFormat {
            context: "objects tree deeper than supported",
        }
        .into())
    }
}
