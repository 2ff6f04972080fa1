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

use std::io;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// General crate errors.
/// The enum is `Clone` on purpose: a persistent memory instance stores its
/// first error and hands it back verbatim from every later call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    // ==============
    // I/O and OS
    // ==============
    #[error("io error: {0:?}")]
    Io(io::ErrorKind),

    #[error("Failed reserving address space: {0}")]
    SpanReserve(&'static str),

    #[error("Failed committing reserved pages: {0}")]
    SpanCommit(&'static str),

    // ==================
    // Persistence files
    // ==================
    #[error("Corrupt persistence file: {0}")]
    Corrupt(&'static str),

    #[error("Bad magic in persistence file")]
    BadMagic,

    #[error("Invalid magic string")]
    InvalidMagic,

    #[error("Memory id mismatch between persistence files")]
    IdMismatch,

    #[error("Persistence files share the same nonzero sequence number")]
    SeqClash,

    // ====================
    // Contract violations
    // ====================
    #[error("Memory is closed")]
    Closed,

    #[error("Mutation group already open")]
    GroupAlreadyOpen,

    #[error("No mutation group is open")]
    GroupNotOpen,

    #[error("Mutation group exceeds {0} bytes")]
    GroupTooLarge(usize),

    #[error("Mutation exceeds {0} bytes")]
    MutationTooLarge(usize),

    #[error("Empty mutation")]
    EmptyMutation,

    #[error("Mutation outside memory bounds")]
    OutOfBounds,

    #[error("No disk file attached to this memory")]
    NoDiskFile,

    #[error("Read past end of disk region")]
    DiskEof,

    // ==========
    // Tree
    // ==========
    #[error("Snapshot version must increase on a modified tree")]
    VersionNotBumped,

    #[error("Tree was modified since last snapshot")]
    TreeDirty,

    #[error("Malformed proof: {0}")]
    MalformedProof(&'static str),

    #[error("Proof does not match snapshot root hash")]
    ProofMismatch,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err.kind())
    }
}
