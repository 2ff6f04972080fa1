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

//! Merkle Patricia Tree over a persistent memory arena.
//!
//! The tree is a path-compressed binary trie over 256-bit keys. Every
//! stored record is one leaf joined with an optional inner node; an edge
//! decides which face it sees by comparing the parent's split bit with
//! the child's. All structure (pointers, split bits, dirty flags, hashes)
//! lives at fixed offsets inside the arena and every write goes through
//! [`Pmem::mutate`], so each tree operation is a logged, recoverable
//! mutation of durable state.
//!
//! Inserting runs inside one mutation group: crash recovery observes a
//! whole insertion or none of it. Hashing is lazy: [`Mpt::set`] only
//! marks the touched path dirty and [`Mpt::snap`] recomputes the dirty
//! hashes bottom-up. Proofs can only be taken from a snapshotted (clean)
//! tree and verify offline against its `(version, hash)`.

use log::debug;

use crate::{
    hash::{empty_tree_hash, inner_hash, leaf_hash},
    pmem::{BackingFile, Pmem},
    Error, Result,
};

/// Record layout and key arithmetic
pub mod node;
use node::{
    key_bit, key_overlap, put48, Header, Node, HDR_DIRTY, HDR_SIZE, NODE_DIRTY, NODE_HASH,
    NODE_LEFT, NODE_RIGHT, NODE_SIZE, NODE_VAL,
};

/// Proof codec and verifier
pub mod proof;
pub use proof::verify;
use proof::{PROOF_MAGIC, TAG_CONFIRM, TAG_DENY, TAG_EMPTY};

/// Identifier of one published tree state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub version: i64,
    pub hash: [u8; 32],
}

enum Ins {
    /// The key landed; the caller only marks its path dirty.
    Done,
    /// The walk bottomed out on a leaf diverging at this bit; the edge
    /// whose node bit is below it must graft a new inner node.
    Split(u16),
}

/// Merkle Patricia Tree handle owning its persistent memory.
pub struct Mpt {
    pm: Pmem,
}

impl Mpt {
    /// Create a fresh tree over an empty file pair.
    pub fn create(
        magic: &str,
        file1: Box<dyn BackingFile>,
        file2: Box<dyn BackingFile>,
        disk: Option<Box<dyn BackingFile>>,
    ) -> Result<Self> {
        let mut pm = Pmem::create(magic, file1, file2, disk)?;
        pm.expand(HDR_SIZE)?;
        let hdr =
            Header { version: 0, dirty: false, root: 0, hash: empty_tree_hash(), count: 0 };
        pm.begin_group()?;
        pm.mutate(0, &hdr.encode())?;
        pm.end_group()?;
        pm.sync()?;
        Ok(Self { pm })
    }

    /// Open a persisted tree, replaying its files.
    pub fn open(
        magic: &str,
        file1: Box<dyn BackingFile>,
        file2: Box<dyn BackingFile>,
        disk: Option<Box<dyn BackingFile>>,
    ) -> Result<Self> {
        let pm = Pmem::open(magic, file1, file2, disk)?;
        if pm.len() < HDR_SIZE {
            return Err(Error::Corrupt("memory too short for tree header"))
        }
        let tree = Self { pm };
        let hdr = tree.header();
        debug!(
            target: "mpt::tree",
            "Opened tree at version {} with {} nodes (dirty: {})",
            hdr.version, hdr.count, hdr.dirty
        );
        Ok(tree)
    }

    /// Tree that lives only as long as the handle.
    pub fn in_memory() -> Result<Self> {
        use crate::pmem::NullFile;
        Self::create("mpt", Box::new(NullFile), Box::new(NullFile), None)
    }

    /// Direct access to the underlying memory, for callers that co-locate
    /// their own records in the arena's disk side channel.
    pub fn pmem(&mut self) -> &mut Pmem {
        &mut self.pm
    }

    fn header(&self) -> Header {
        Header::read(self.pm.data())
    }

    /// Whether the tree changed since the last snapshot.
    pub fn dirty(&self) -> bool {
        self.pm.status().is_ok() && self.header().dirty
    }

    /// Number of stored keys.
    pub fn len(&self) -> u64 {
        if self.pm.status().is_err() {
            return 0
        }
        self.header().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or overwrite a key. Runs as one atomic mutation group.
    pub fn set(&mut self, key: &[u8; 32], value: &[u8; 32]) -> Result<()> {
        self.pm.begin_group()?;
        let res = self.set_inner(key, value);
        // Balance the bracket even when the insertion failed; a broken
        // memory returns its stored error from both calls.
        match self.pm.end_group() {
            Ok(()) => res,
            Err(e) => res.and(Err(e)),
        }
    }

    fn set_inner(&mut self, key: &[u8; 32], value: &[u8; 32]) -> Result<()> {
        let hdr = self.header();

        let root = if hdr.root == 0 {
            // First key: the solitary join leaf.
            self.alloc_node(Node {
                key: *key,
                value: *value,
                bit: 0,
                dirty: false,
                left: 0,
                right: 0,
                ihash: [0u8; 32],
            })?
        } else {
            match self.insert(hdr.root, -1, key, value)? {
                Ins::Done => hdr.root,
                Ins::Split(bit) => self.graft(key, value, bit, hdr.root)?,
            }
        };

        // Publish the (possibly new) root and the dirty flag in one
        // atomic mutation: bytes [HDR_DIRTY, HDR_ROOT+6) are contiguous.
        let mut buf = [0u8; 8];
        buf[0] = 1;
        buf[2..8].copy_from_slice(&put48(root));
        self.pm.mutate(HDR_DIRTY, &buf)
    }

    /// Recursive insertion step arriving at `addr` over an edge with
    /// parent split bit `pbit`.
    fn insert(&mut self, addr: u64, pbit: i32, key: &[u8; 32], value: &[u8; 32]) -> Result<Ins> {
        let n = Node::read(self.pm.data(), addr)?;

        if !n.is_inner(pbit) {
            let bit = key_overlap(&n.key, key);
            if bit == 256 {
                // Same key: overwrite the value in place.
                self.pm.mutate(addr as usize + NODE_VAL, value)?;
                return Ok(Ins::Done)
            }
            return Ok(Ins::Split(bit))
        }

        let dir = key_bit(key, n.bit.into());
        let child = n.child(dir);
        match self.insert(child, n.bit.into(), key, value)? {
            Ins::Done => {
                self.mark_dirty(addr, &n)?;
                Ok(Ins::Done)
            }
            Ins::Split(bit) if i32::from(bit) > i32::from(n.bit) => {
                // The new branch belongs on the edge we just descended.
                let graft = self.graft(key, value, bit, child)?;
                let field = if dir == 0 { NODE_LEFT } else { NODE_RIGHT };
                self.pm.mutate(addr as usize + field, &put48(graft))?;
                self.mark_dirty(addr, &n)?;
                Ok(Ins::Done)
            }
            // The divergence is above this node; keep ascending.
            split => Ok(split),
        }
    }

    /// Allocate the node realizing a split at `bit`: its leaf face carries
    /// the new pair, its inner face branches between itself and the
    /// subtree it displaces.
    fn graft(&mut self, key: &[u8; 32], value: &[u8; 32], bit: u16, displaced: u64) -> Result<u64> {
        let addr = self.next_addr()?;
        let (left, right) =
            if key_bit(key, bit) == 0 { (addr, displaced) } else { (displaced, addr) };
        let node =
            Node { key: *key, value: *value, bit: bit as u8, dirty: true, left, right, ihash: [0u8; 32] };
        let written = self.alloc_node(node)?;
        debug_assert_eq!(written, addr);
        Ok(addr)
    }

    fn next_addr(&self) -> Result<u64> {
        let hdr = self.header();
        Ok(HDR_SIZE as u64 + hdr.count * NODE_SIZE as u64)
    }

    fn alloc_node(&mut self, node: Node) -> Result<u64> {
        let hdr = self.header();
        let addr = HDR_SIZE as u64 + hdr.count * NODE_SIZE as u64;
        let end = addr as usize + NODE_SIZE;
        self.pm.expand(end)?;
        self.pm.mutate(addr as usize, &node.encode())?;
        self.pm.mutate(node::HDR_COUNT, &(hdr.count + 1).to_be_bytes())?;
        Ok(addr)
    }

    fn mark_dirty(&mut self, addr: u64, n: &Node) -> Result<()> {
        if n.dirty {
            return Ok(())
        }
        self.pm.mutate(addr as usize + NODE_DIRTY, &[1])
    }

    /// Publish the current tree state as `(version, hash)`.
    ///
    /// On a clean tree this returns the stored snapshot and only requires
    /// `version` to not regress. On a dirty tree the version must strictly
    /// increase; the dirty hashes are then recomputed bottom-up, each node
    /// updated atomically, so an interrupted snapshot is simply resumed by
    /// the next one.
    pub fn snap(&mut self, version: i64) -> Result<Snapshot> {
        self.pm.status()?;
        let hdr = self.header();

        if !hdr.dirty {
            if version < hdr.version {
                return Err(Error::VersionNotBumped)
            }
            return Ok(Snapshot { version: hdr.version, hash: hdr.hash })
        }
        if version <= hdr.version {
            return Err(Error::VersionNotBumped)
        }

        let hash =
            if hdr.root == 0 { empty_tree_hash() } else { self.rehash(hdr.root, -1)? };

        let new = Header { version, dirty: false, hash, ..hdr };
        self.pm.begin_group()?;
        // Version, dirty flag, root and hash are the leading 48 header
        // bytes; one mutation publishes them together.
        self.pm.mutate(0, &new.encode()[..48])?;
        self.pm.end_group()?;

        debug!(target: "mpt::tree", "Snapshotted version {} over {} nodes", version, hdr.count);
        Ok(Snapshot { version, hash })
    }

    /// Hash of the record at `addr` as seen over an edge with parent bit
    /// `pbit`, recomputing and persisting stale inner hashes on the way.
    fn rehash(&mut self, addr: u64, pbit: i32) -> Result<[u8; 32]> {
        let n = Node::read(self.pm.data(), addr)?;

        if !n.is_inner(pbit) {
            return Ok(leaf_hash(&n.key, &n.value))
        }
        if !n.dirty {
            return Ok(n.ihash)
        }

        let left = self.rehash(n.left, n.bit.into())?;
        let right = self.rehash(n.right, n.bit.into())?;
        let h = inner_hash(n.bit, &left, &right);

        // Hash and dirty flag must move together or a crash could leave a
        // stale hash marked clean.
        self.pm.begin_group()?;
        self.pm.mutate(addr as usize + NODE_HASH, &h)?;
        self.pm.mutate(addr as usize + NODE_DIRTY, &[0])?;
        self.pm.end_group()?;
        Ok(h)
    }

    /// Produce an inclusion or exclusion proof for `key` against the last
    /// snapshot. The tree must be clean.
    pub fn prove(&self, key: &[u8; 32]) -> Result<Vec<u8>> {
        self.pm.status()?;
        let hdr = self.header();
        if hdr.dirty {
            return Err(Error::TreeDirty)
        }

        let mut out = PROOF_MAGIC.to_vec();
        if hdr.root == 0 {
            out.push(TAG_EMPTY);
            return Ok(out)
        }

        // Walk to the terminal leaf, remembering each branch taken.
        let mut path: Vec<(u8, u64)> = vec![];
        let mut addr = hdr.root;
        let mut pbit: i32 = -1;
        loop {
            let n = Node::read(self.pm.data(), addr)?;
            if !n.is_inner(pbit) {
                if &n.key == key {
                    out.push(TAG_CONFIRM);
                    out.extend_from_slice(&n.value);
                } else {
                    out.push(TAG_DENY);
                    out.extend_from_slice(&n.key);
                    out.extend_from_slice(&n.value);
                }
                break
            }
            let dir = key_bit(key, n.bit.into());
            path.push((n.bit, n.child(1 - dir)));
            pbit = n.bit.into();
            addr = n.child(dir);
        }

        // Append the path leaf-first: one sibling hash per branch, each
        // viewed with its parent's bit so leaf/inner faces match the tree.
        for &(bit, sibling) in path.iter().rev() {
            let n = Node::read(self.pm.data(), sibling)?;
            let h = if n.is_inner(bit.into()) { n.ihash } else { leaf_hash(&n.key, &n.value) };
            out.push(bit);
            out.extend_from_slice(&h);
        }

        Ok(out)
    }

    /// Flush and durably sync the underlying files.
    pub fn sync(&mut self) -> Result<()> {
        self.pm.sync()
    }

    /// Sync and release the tree's memory. The handle only returns
    /// [`Error::Closed`] afterwards.
    pub fn close(&mut self) -> Result<()> {
        self.pm.release()
    }
}
