/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2025 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! SHA-256 wrappers shared by the frame checksums and the Merkle tree.

use sha2::{Digest, Sha256};

/// Hash of a leaf: SHA-256 over the 64-byte `key || value` concatenation.
pub fn leaf_hash(key: &[u8; 32], value: &[u8; 32]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(key);
    h.update(value);
    h.finalize().into()
}

/// Hash of an inner node: SHA-256 over the 65-byte `left || right || bit`
/// concatenation, with the child hashes taken as the children are viewed
/// from this node.
pub fn inner_hash(bit: u8, left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(left);
    h.update(right);
    h.update([bit]);
    h.finalize().into()
}

/// Hash of the empty tree: SHA-256 of the empty string.
pub fn empty_tree_hash() -> [u8; 32] {
    Sha256::digest([]).into()
}
