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

//! Self-describing proof encoding and its verifier.
//!
//! ```text
//! "mptproof" || tag
//! tag 0x00: empty tree, no payload
//! tag 0x01: confirm; 32-byte value, then path
//! tag 0x02: deny;    32-byte alternative key, 32-byte value, then path
//! ```
//!
//! The path is zero or more `(bit, sibling-hash)` elements read from the
//! proved leaf toward the root: one split-bit byte followed by a 32-byte
//! sibling hash, with strictly decreasing bits. Verification folds the
//! leaf hash with each sibling and must land exactly on the snapshot's
//! root hash with no bytes left over.

use crate::{
    hash::{empty_tree_hash, inner_hash, leaf_hash},
    Error, Result,
};

use super::{node::key_bit, Snapshot};

/// Leading magic of every proof.
pub const PROOF_MAGIC: [u8; 8] = *b"mptproof";

/// Proof of an empty tree.
pub const TAG_EMPTY: u8 = 0x00;

/// Inclusion proof: the target key is present.
pub const TAG_CONFIRM: u8 = 0x01;

/// Exclusion proof: a search for the target key finds another leaf.
pub const TAG_DENY: u8 = 0x02;

/// Check a proof against a snapshot. Returns the proved value and whether
/// the key is present; an exclusion proof yields the zero value.
pub fn verify(snap: &Snapshot, key: &[u8; 32], proof: &[u8]) -> Result<([u8; 32], bool)> {
    let Some(rest) = proof.strip_prefix(&PROOF_MAGIC[..]) else {
        return Err(Error::MalformedProof("missing magic"))
    };
    let Some((&tag, mut rest)) = rest.split_first() else {
        return Err(Error::MalformedProof("missing tag"))
    };

    let (leaf_key, value, present) = match tag {
        TAG_EMPTY => {
            if !rest.is_empty() {
                return Err(Error::MalformedProof("trailing bytes after empty proof"))
            }
            if snap.hash != empty_tree_hash() {
                return Err(Error::ProofMismatch)
            }
            return Ok(([0u8; 32], false))
        }
        TAG_CONFIRM => {
            let value = take32(&mut rest)?;
            (*key, value, true)
        }
        TAG_DENY => {
            let alt_key = take32(&mut rest)?;
            let value = take32(&mut rest)?;
            if &alt_key == key {
                return Err(Error::MalformedProof("exclusion proof names the target key"))
            }
            (alt_key, value, false)
        }
        _ => return Err(Error::MalformedProof("unknown tag")),
    };

    let mut h = leaf_hash(&leaf_key, &value);
    let mut cap: i32 = 256;
    while !rest.is_empty() {
        let Some((&bit, tail)) = rest.split_first() else {
            return Err(Error::MalformedProof("truncated path element"))
        };
        rest = tail;
        let sibling = take32(&mut rest)?;

        if i32::from(bit) >= cap {
            return Err(Error::MalformedProof("path bits out of order"))
        }
        // A search for the target must reach the proved leaf: both keys
        // take the same direction at every branch on the path.
        if key_bit(key, bit.into()) != key_bit(&leaf_key, bit.into()) {
            return Err(Error::MalformedProof("path diverges from the proved leaf"))
        }

        h = if key_bit(key, bit.into()) == 0 {
            inner_hash(bit, &h, &sibling)
        } else {
            inner_hash(bit, &sibling, &h)
        };
        cap = i32::from(bit);
    }

    if h != snap.hash {
        return Err(Error::ProofMismatch)
    }

    if present {
        Ok((value, true))
    } else {
        Ok(([0u8; 32], false))
    }
}

fn take32(rest: &mut &[u8]) -> Result<[u8; 32]> {
    if rest.len() < 32 {
        return Err(Error::MalformedProof("truncated 32-byte field"))
    }
    let (head, tail) = rest.split_at(32);
    let mut out = [0u8; 32];
    out.copy_from_slice(head);
    *rest = tail;
    Ok(out)
}
