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

//! A crash-safe, append-optimized persistent memory arena (`pmem`) and the
//! Merkle Patricia Tree (`mpt`) living inside it. The arena mirrors a
//! byte-addressable memory image into a pair of alternating files through
//! checksummed patch frames; the tree stores all of its structure as fixed
//! offsets within that image, so every tree mutation is also a logged
//! mutation of durable state.

/// Error library
pub mod error;
pub use error::{Error, Result};

/// Growable reserved virtual-address span
pub mod span;

/// Checksum and Merkle hashing
pub mod hash;

/// Persistent memory core
pub mod pmem;
pub use pmem::Pmem;

/// Merkle Patricia Tree
pub mod mpt;
pub use mpt::{verify, Mpt, Snapshot};
