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

//! Wire codec for the persistence files.
//!
//! A file is `magic || frame₀ || frame₁ || …`. Every frame is
//! self-delimiting and checksum-protected:
//!
//! ```text
//! [0..16)           id    : constant random bytes of one memory
//! [16..24)          seq   : big-endian file generation, 0 = incomplete
//! [24..32)          len   : big-endian payload length
//! [32..32+len)      payload
//! [32+len..+32)     sha256 of bytes [0..32+len)
//! ```
//!
//! A patch frame's payload is a run of mutations, each
//! `offset-uvarint || length-uvarint || bytes`. The offset's low bit
//! selects the disk side channel (1) or the memory image (0); the
//! remaining bits carry the real offset. Varints are unsigned,
//! little-endian, 7 bits per byte. All other integers are big-endian.

use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Frame header length: id, sequence, payload length.
pub const FRAME_HDR: usize = 32;

/// Checksum length appended after the payload.
pub const FRAME_SUM: usize = 32;

/// Total framing overhead around a payload.
pub const FRAME_OVERHEAD: usize = FRAME_HDR + FRAME_SUM;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHdr {
    pub id: [u8; 16],
    pub seq: u64,
    pub len: u64,
}

impl FrameHdr {
    pub fn encode(&self) -> [u8; FRAME_HDR] {
        let mut buf = [0u8; FRAME_HDR];
        buf[..16].copy_from_slice(&self.id);
        buf[16..24].copy_from_slice(&self.seq.to_be_bytes());
        buf[24..32].copy_from_slice(&self.len.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; FRAME_HDR]) -> Self {
        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[..16]);
        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[16..24]);
        let seq = u64::from_be_bytes(word);
        word.copy_from_slice(&buf[24..32]);
        let len = u64::from_be_bytes(word);
        Self { id, seq, len }
    }
}

/// Checksum over a frame's header and payload.
pub fn frame_sum(hdr: &[u8; FRAME_HDR], payload: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(hdr);
    h.update(payload);
    h.finalize().into()
}

/// Append an unsigned varint.
pub fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push(v as u8 | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Decode an unsigned varint, returning the value and encoded length.
pub fn uvarint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut x = 0u64;
    let mut s = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if i == 10 || (i == 9 && b > 1) {
            return Err(Error::Corrupt("varint overflows u64"))
        }
        if b < 0x80 {
            return Ok((x | ((b as u64) << s), i + 1))
        }
        x |= ((b & 0x7f) as u64) << s;
        s += 7;
    }
    Err(Error::Corrupt("truncated varint"))
}

/// Append one encoded mutation to a patch payload.
pub fn put_mutation(buf: &mut Vec<u8>, disk: bool, off: u64, data: &[u8]) {
    put_uvarint(buf, off << 1 | disk as u64);
    put_uvarint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Worst-case varint framing around one mutation's data.
pub const fn mutation_overhead() -> usize {
    // 48-bit offsets shifted by the disk bit need at most 7 varint bytes,
    // lengths at most another 7.
    14
}

/// One decoded patch mutation, borrowing its data from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutation<'a> {
    pub disk: bool,
    pub off: u64,
    pub data: &'a [u8],
}

/// Iterator over the mutations of one patch payload.
pub struct MutationIter<'a> {
    buf: &'a [u8],
}

impl<'a> MutationIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for MutationIter<'a> {
    type Item = Result<Mutation<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None
        }

        let mut step = || -> Result<Mutation<'a>> {
            let (tagged, n) = uvarint(self.buf)?;
            self.buf = &self.buf[n..];
            let (len, n) = uvarint(self.buf)?;
            self.buf = &self.buf[n..];
            let len = usize::try_from(len).map_err(|_| Error::Corrupt("mutation length overflow"))?;
            if len > self.buf.len() {
                return Err(Error::Corrupt("mutation data truncated"))
            }
            let (data, rest) = self.buf.split_at(len);
            self.buf = rest;
            Ok(Mutation { disk: tagged & 1 == 1, off: tagged >> 1, data })
        };

        match step() {
            Ok(m) => Some(Ok(m)),
            Err(e) => {
                // Poison the iterator so a decode error surfaces once
                self.buf = &[];
                Some(Err(e))
            }
        }
    }
}
