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

//! Persistent memory core.
//!
//! A [`Pmem`] owns a byte-addressable memory image mirrored to a pair of
//! alternating files. Mutations funnel through [`Pmem::mutate`], which logs
//! each change into a patch buffer before copying it into memory; full
//! buffers are flushed as checksummed patch frames appended to the current
//! file. Mutation groups bracket sequences of mutations that crash
//! recovery observes all-or-nothing. When the current file outgrows twice
//! the live image, a cooperative compaction progressively writes a fresh
//! image into the idle file and swaps the pair.
//!
//! Any I/O or corruption error permanently breaks the instance: the first
//! error is stored and every later call returns it. Closing exchanges the
//! stored error for the closed sentinel after releasing the memory.

use log::{debug, info, warn};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::{span::Span, Error, Result};

/// Storage seam and simulators
pub mod file;
pub use file::{BackingFile, NullFile, SimFile};

/// Frame and patch wire codec
pub mod frame;
use frame::{mutation_overhead, FrameHdr, MutationIter, FRAME_HDR, FRAME_OVERHEAD, FRAME_SUM};

/// Address-space reservation backing one memory image.
pub const DEFAULT_RESERVE: usize = 16 << 40;

/// Smallest reservation the fallback will settle for.
pub const MIN_RESERVE: usize = 1 << 30;

/// Hard cap on one mutation group's encoded patch bytes. A group must fit
/// in a single patch frame for its all-or-nothing recovery guarantee.
pub const MAX_GROUP: usize = 1 << 20;

/// Hard cap on a single mutation's data length.
pub const MAX_MUTATION: usize = 64 << 10;

// Patch buffer capacity: a full group, one maximum mutation and the
// trailing memory-length record always fit without a mid-group flush.
const PATCH_CAP: usize = MAX_GROUP + 2 * (MAX_MUTATION + mutation_overhead());

// A replayed data mutation may extend memory by at most this much past its
// current length; farther offsets are rejected as corruption.
const OFFSET_SLACK: usize = MAX_GROUP;

enum Health {
    Open,
    Broken(Error),
    Closed,
}

struct FileState {
    file: Box<dyn BackingFile>,
    /// Append offset: end of the acknowledged frames.
    size: u64,
    /// Written since the last sync.
    dirty: bool,
}

impl FileState {
    fn new(file: Box<dyn BackingFile>) -> Self {
        Self { file, size: 0, dirty: false }
    }
}

struct DiskState {
    file: Box<dyn BackingFile>,
    dirty: bool,
}

struct Group {
    /// Patch buffer index where the group began. Bytes before it may be
    /// flushed mid-group; bytes after it may not.
    start: usize,
}

struct Compact {
    /// Sequence number the next file takes when the swap commits.
    seq: u64,
    /// Image length snapshotted when the compaction began.
    total: usize,
    /// Image bytes copied so far.
    written: usize,
    /// Running checksum over the real frame header and the copied image.
    hasher: Sha256,
    /// Append offset in the next file for mirrored patch frames.
    tail: u64,
}

/// Crash-safe persistent memory image.
pub struct Pmem {
    span: Span,
    len: usize,
    id: [u8; 16],
    magic: Vec<u8>,
    files: [FileState; 2],
    cur: usize,
    seq: u64,
    disk: Option<DiskState>,
    patch: Vec<u8>,
    group: Option<Group>,
    compact: Option<Compact>,
    constant_flush: bool,
    health: Health,
}

impl Pmem {
    /// Create a fresh memory over an empty file pair. Writes and syncs the
    /// initial empty frames of both files.
    pub fn create(
        magic: &str,
        file1: Box<dyn BackingFile>,
        file2: Box<dyn BackingFile>,
        disk: Option<Box<dyn BackingFile>>,
    ) -> Result<Self> {
        let magic = pad_magic(magic)?;
        let mut id = [0u8; 16];
        OsRng.fill_bytes(&mut id);

        let span = reserve_span()?;
        let mut pm = Self {
            span,
            len: 0,
            id,
            magic,
            files: [FileState::new(file1), FileState::new(file2)],
            cur: 0,
            seq: 1,
            disk: disk.map(|file| DiskState { file, dirty: false }),
            patch: Vec::with_capacity(PATCH_CAP),
            group: None,
            compact: None,
            constant_flush: false,
            health: Health::Open,
        };

        pm.write_initial(0, 1)?;
        pm.write_initial(1, 0)?;
        if let Some(d) = &mut pm.disk {
            let hdr = FrameHdr { id: pm.id, seq: 1, len: 0 }.encode();
            let sum = frame::frame_sum(&hdr, &[]);
            d.file.write_at(&pm.magic, 0)?;
            d.file.write_at(&hdr, pm.magic.len() as u64)?;
            d.file.write_at(&sum, (pm.magic.len() + FRAME_HDR) as u64)?;
            d.file.sync()?;
        }
        for f in pm.files.iter_mut() {
            f.file.sync()?;
            f.dirty = false;
        }

        let size = pm.files[0].size;
        pm.files[0].file.set_current(true, size);
        let size = pm.files[1].size;
        pm.files[1].file.set_current(false, size);

        info!(target: "pmem::store", "Created persistent memory (seq 1)");
        Ok(pm)
    }

    /// Open an existing memory: pick the current file of the pair, load its
    /// initial image and replay every valid patch frame. A truncated or
    /// corrupt file tail is silently treated as end of file; the recovered
    /// prefix is authoritative.
    pub fn open(
        magic: &str,
        mut file1: Box<dyn BackingFile>,
        mut file2: Box<dyn BackingFile>,
        disk: Option<Box<dyn BackingFile>>,
    ) -> Result<Self> {
        let magic = pad_magic(magic)?;

        let h1 = read_intro(file1.as_mut(), &magic)?;
        let h2 = read_intro(file2.as_mut(), &magic)?;
        if h1.id != h2.id {
            return Err(Error::IdMismatch)
        }
        if h1.seq == h2.seq {
            // Two idle files cannot elect a current one, two equal live
            // sequences are a split brain. Refuse both.
            return Err(if h1.seq == 0 { Error::Corrupt("no current file") } else { Error::SeqClash })
        }
        let cur = usize::from(h2.seq > h1.seq);
        let hdr = if cur == 0 { h1 } else { h2 };

        let span = reserve_span()?;
        let mut pm = Self {
            span,
            len: 0,
            id: hdr.id,
            magic,
            files: [FileState::new(file1), FileState::new(file2)],
            cur,
            seq: hdr.seq,
            disk: disk.map(|file| DiskState { file, dirty: false }),
            patch: Vec::with_capacity(PATCH_CAP),
            group: None,
            compact: None,
            constant_flush: false,
            health: Health::Open,
        };

        if let Some(d) = &mut pm.disk {
            let dh = read_intro(d.file.as_mut(), &pm.magic)?;
            if dh.id != pm.id {
                return Err(Error::IdMismatch)
            }
        }

        pm.recover(hdr)?;

        // The losing file is abandoned; the next compaction rebuilds it.
        pm.files[1 - cur].size = pm.data_start();

        let size = pm.files[cur].size;
        pm.files[cur].file.set_current(true, size);
        let size = pm.files[1 - cur].size;
        pm.files[1 - cur].file.set_current(false, size);

        Ok(pm)
    }

    /// Memory-only mode: both files are write sinks, nothing survives the
    /// instance.
    pub fn in_memory(magic: &str) -> Result<Self> {
        Self::create(magic, Box::new(NullFile), Box::new(NullFile), None)
    }

    /// Read-only view of the current memory image. Must not be held across
    /// mutations; never write through it.
    pub fn data(&self) -> &[u8] {
        if matches!(self.health, Health::Closed) {
            return &[]
        }
        self.span.slice(0, self.len)
    }

    /// Current memory image length.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The stored first error, if the instance is broken or closed.
    pub fn status(&self) -> Result<()> {
        match &self.health {
            Health::Open => Ok(()),
            Health::Broken(e) => Err(e.clone()),
            Health::Closed => Err(Error::Closed),
        }
    }

    pub fn is_compacting(&self) -> bool {
        self.compact.is_some()
    }

    /// Write a patch frame after every ungrouped mutation and group end.
    /// Only the crash tests want this.
    pub fn set_constant_flush(&mut self, on: bool) {
        self.constant_flush = on;
    }

    /// Grow the memory image to at least `n` bytes. The new length becomes
    /// durable with the next flushed patch frame.
    pub fn expand(&mut self, n: usize) -> Result<()> {
        self.status()?;
        if n <= self.len {
            return Ok(())
        }
        self.span.expand(n)?;
        self.len = n;
        Ok(())
    }

    /// Copy `src` into memory at `off`, recording the change in the patch
    /// buffer first. The destination must lie within the current image.
    pub fn mutate(&mut self, off: usize, src: &[u8]) -> Result<()> {
        self.status()?;
        if src.is_empty() {
            return Err(Error::EmptyMutation)
        }
        if src.len() > MAX_MUTATION {
            return Err(Error::MutationTooLarge(MAX_MUTATION))
        }
        if off.checked_add(src.len()).is_none_or(|end| end > self.len) {
            return Err(Error::OutOfBounds)
        }
        self.mutate_inner(off, src).map_err(|e| self.sticky(e))
    }

    fn mutate_inner(&mut self, off: usize, src: &[u8]) -> Result<()> {
        self.append_mutation(false, off as u64, src)?;
        self.span.slice_mut(off, src.len()).copy_from_slice(src);
        if self.constant_flush && self.group.is_none() {
            self.flush()?;
        }
        Ok(())
    }

    /// Write to the disk-only side channel at `off`. Logged as a patch
    /// mutation so recovery replays it in order with memory mutations.
    pub fn write_disk(&mut self, src: &[u8], off: u64) -> Result<()> {
        self.status()?;
        if self.disk.is_none() {
            return Err(Error::NoDiskFile)
        }
        if src.is_empty() {
            return Err(Error::EmptyMutation)
        }
        if src.len() > MAX_MUTATION {
            return Err(Error::MutationTooLarge(MAX_MUTATION))
        }
        self.write_disk_inner(src, off).map_err(|e| self.sticky(e))
    }

    fn write_disk_inner(&mut self, src: &[u8], off: u64) -> Result<()> {
        self.append_mutation(true, off, src)?;
        let dstart = self.data_start();
        let Some(d) = &mut self.disk else { return Err(Error::NoDiskFile) };
        d.file.write_at(src, dstart + off)?;
        d.dirty = true;
        if self.constant_flush && self.group.is_none() {
            self.flush()?;
        }
        Ok(())
    }

    /// Read back from the disk-only side channel.
    pub fn read_disk(&mut self, dst: &mut [u8], off: u64) -> Result<()> {
        self.status()?;
        let dstart = self.data_start();
        let Some(d) = &mut self.disk else { return Err(Error::NoDiskFile) };
        let n = match d.file.read_at(dst, dstart + off) {
            Ok(n) => n,
            Err(e) => return Err(self.sticky(e)),
        };
        if n < dst.len() {
            return Err(Error::DiskEof)
        }
        Ok(())
    }

    /// Start an atomic mutation group. Until the group ends, recovery will
    /// observe either all of its mutations or none.
    pub fn begin_group(&mut self) -> Result<()> {
        self.status()?;
        if self.group.is_some() {
            return Err(Error::GroupAlreadyOpen)
        }
        self.group = Some(Group { start: self.patch.len() });
        Ok(())
    }

    /// Close the open mutation group, permitting patch flushes again.
    pub fn end_group(&mut self) -> Result<()> {
        self.status()?;
        if self.group.is_none() {
            return Err(Error::GroupNotOpen)
        }
        self.group = None;
        if self.constant_flush {
            return self.flush().map_err(|e| self.sticky(e))
        }
        Ok(())
    }

    /// Flush the pending patch and durably sync every file with
    /// outstanding writes.
    pub fn sync(&mut self) -> Result<()> {
        self.status()?;
        self.sync_inner().map_err(|e| self.sticky(e))
    }

    fn sync_inner(&mut self) -> Result<()> {
        self.flush()?;
        self.try_finish_compaction()?;
        if let Some(d) = &mut self.disk {
            if d.dirty {
                d.file.sync()?;
                d.dirty = false;
            }
        }
        for f in self.files.iter_mut() {
            if f.dirty {
                f.file.sync()?;
                f.dirty = false;
            }
        }
        Ok(())
    }

    /// Sync, mark the instance closed and release the memory image. The
    /// memory is released on every exit path; a stored first error is
    /// reported but never masks that cleanup.
    pub fn release(&mut self) -> Result<()> {
        let prior = match &self.health {
            Health::Closed => return Ok(()),
            Health::Broken(e) => Some(e.clone()),
            Health::Open => None,
        };

        let mut res = Ok(());
        if prior.is_none() {
            res = self.sync_inner();
        }
        let span_res = self.span.release();
        self.health = Health::Closed;

        info!(target: "pmem::store", "Released persistent memory (seq {})", self.seq);
        if let Some(e) = prior {
            return Err(e)
        }
        res?;
        span_res
    }

    // File offset where patch frames begin over an empty image; also the
    // start of the disk side channel's data region.
    fn data_start(&self) -> u64 {
        (self.magic.len() + FRAME_OVERHEAD) as u64
    }

    fn sticky(&mut self, e: Error) -> Error {
        match &e {
            Error::Io(_) | Error::Corrupt(_) => {
                if matches!(self.health, Health::Open) {
                    self.health = Health::Broken(e.clone());
                }
                e
            }
            _ => e,
        }
    }

    /// Write `magic || empty frame` with sequence `seq` at the head of a
    /// file, resetting its append offset.
    fn write_initial(&mut self, idx: usize, seq: u64) -> Result<()> {
        let hdr = FrameHdr { id: self.id, seq, len: 0 }.encode();
        let sum = frame::frame_sum(&hdr, &[]);
        let magic_len = self.magic.len();
        self.files[idx].file.write_at(&self.magic, 0)?;
        self.files[idx].file.write_at(&hdr, magic_len as u64)?;
        self.files[idx].file.write_at(&sum, (magic_len + FRAME_HDR) as u64)?;
        self.files[idx].size = self.data_start();
        self.files[idx].dirty = true;
        Ok(())
    }

    fn append_mutation(&mut self, disk: bool, off: u64, data: &[u8]) -> Result<()> {
        let enc = data.len() + mutation_overhead();
        if let Some(g) = &self.group {
            if self.patch.len() - g.start + enc > MAX_GROUP {
                return Err(Error::GroupTooLarge(MAX_GROUP))
            }
        }
        // Keep room for this mutation plus the trailing length record
        if self.patch.len() + enc + mutation_overhead() > PATCH_CAP {
            self.flush()?;
        }
        frame::put_mutation(&mut self.patch, disk, off, data);
        Ok(())
    }

    /// Write the flushable prefix of the patch buffer as one patch frame.
    /// With a group open only the bytes preceding it are flushed.
    fn flush(&mut self) -> Result<()> {
        let cut = self.group.as_ref().map_or(self.patch.len(), |g| g.start);
        if cut == 0 {
            return Ok(())
        }

        // The trailing synthetic mutation publishes the memory length so
        // replay resizes the image even when no data mutation reached the
        // new end.
        let mut payload = Vec::with_capacity(cut + mutation_overhead());
        payload.extend_from_slice(&self.patch[..cut]);
        frame::put_mutation(&mut payload, false, self.len as u64, &[]);

        let at = self.files[self.cur].size;
        let n = self.write_frame(self.cur, self.seq, &payload, at)?;
        self.files[self.cur].size += n;

        if let Some(c) = &self.compact {
            let (cseq, tail) = (c.seq, c.tail);
            let n = self.write_frame(1 - self.cur, cseq, &payload, tail)?;
            if let Some(c) = &mut self.compact {
                c.tail += n;
            }
        }

        self.patch.drain(..cut);
        if let Some(g) = &mut self.group {
            g.start = 0;
        }

        self.advance_compaction(2 * (payload.len() + FRAME_OVERHEAD))?;

        if self.compact.is_none() &&
            self.files[self.cur].size > 2 * (self.data_start() + self.len as u64)
        {
            self.start_compaction()?;
        }

        Ok(())
    }

    fn write_frame(&mut self, idx: usize, seq: u64, payload: &[u8], off: u64) -> Result<u64> {
        let hdr = FrameHdr { id: self.id, seq, len: payload.len() as u64 }.encode();
        let sum = frame::frame_sum(&hdr, payload);
        let f = &mut self.files[idx];
        f.file.write_at(&hdr, off)?;
        f.file.write_at(payload, off + FRAME_HDR as u64)?;
        f.file.write_at(&sum, off + (FRAME_HDR + payload.len()) as u64)?;
        f.dirty = true;
        Ok((FRAME_OVERHEAD + payload.len()) as u64)
    }

    /// Begin compacting: reserve the image frame in the idle file with a
    /// zeroed sequence so a crash cannot promote the incomplete file.
    fn start_compaction(&mut self) -> Result<()> {
        let nxt = 1 - self.cur;
        let seq = self.seq + 1;
        let total = self.len;
        let magic_len = self.magic.len();

        let hdr = FrameHdr { id: self.id, seq, len: total as u64 }.encode();
        let mut hasher = Sha256::new();
        hasher.update(hdr);
        let mut zeroed = hdr;
        zeroed[16..24].fill(0);

        self.files[nxt].file.write_at(&self.magic, 0)?;
        self.files[nxt].file.write_at(&zeroed, magic_len as u64)?;
        self.files[nxt].dirty = true;

        self.compact = Some(Compact {
            seq,
            total,
            written: 0,
            hasher,
            tail: (magic_len + FRAME_HDR + total + FRAME_SUM) as u64,
        });

        debug!(target: "pmem::compact", "Compacting {} bytes into the idle file (seq {})", total, seq);
        Ok(())
    }

    /// Copy up to `budget` image bytes into the next file.
    fn advance_compaction(&mut self, budget: usize) -> Result<()> {
        let nxt = 1 - self.cur;
        let img_base = (self.magic.len() + FRAME_HDR) as u64;
        let Some(c) = &mut self.compact else { return Ok(()) };

        if c.written < c.total {
            let n = budget.min(c.total - c.written);
            let data = self.span.slice(c.written, n);
            c.hasher.update(data);
            self.files[nxt].file.write_at(data, img_base + c.written as u64)?;
            self.files[nxt].dirty = true;
            c.written += n;
        }

        self.try_finish_compaction()
    }

    /// Finalize the compaction once the image is fully copied and nothing
    /// is buffered: append the checksum, sync, commit the real sequence
    /// header, sync again, then swap the pair and demote the old file.
    fn try_finish_compaction(&mut self) -> Result<()> {
        let done = matches!(&self.compact, Some(c) if c.written >= c.total) &&
            self.group.is_none() &&
            self.patch.is_empty();
        if !done {
            return Ok(())
        }
        let Some(c) = self.compact.take() else { return Ok(()) };

        let nxt = 1 - self.cur;
        let magic_len = self.magic.len();

        let sum: [u8; 32] = c.hasher.finalize().into();
        self.files[nxt].file.write_at(&sum, (magic_len + FRAME_HDR + c.total) as u64)?;

        // The side channel first: replayed disk mutations must never be
        // ahead of the image that replays them.
        if let Some(d) = &mut self.disk {
            if d.dirty {
                d.file.sync()?;
                d.dirty = false;
            }
        }
        self.files[nxt].file.sync()?;

        // Commit point
        let hdr = FrameHdr { id: self.id, seq: c.seq, len: c.total as u64 }.encode();
        self.files[nxt].file.write_at(&hdr, magic_len as u64)?;
        self.files[nxt].file.sync()?;
        self.files[nxt].dirty = false;

        let old = self.cur;
        self.cur = nxt;
        self.seq = c.seq;
        self.files[nxt].size = c.tail;
        self.files[nxt].file.set_current(true, c.tail);

        self.write_initial(old, 0)?;
        let size = self.files[old].size;
        self.files[old].file.set_current(false, size);

        info!(target: "pmem::compact", "Compaction complete, current file now at seq {}", self.seq);
        Ok(())
    }

    /// Load the current file's initial image and replay its patch tail.
    fn recover(&mut self, hdr: FrameHdr) -> Result<()> {
        let m = usize::try_from(hdr.len).map_err(|_| Error::Corrupt("image length overflow"))?;
        self.span.expand(m)?;

        let img_base = (self.magic.len() + FRAME_HDR) as u64;
        if m > 0 {
            let n = self.files[self.cur].file.read_at(self.span.slice_mut(0, m), img_base)?;
            if n < m {
                return Err(Error::Corrupt("truncated initial frame"))
            }
        }
        let mut sum = [0u8; FRAME_SUM];
        let n = self.files[self.cur].file.read_at(&mut sum, img_base + m as u64)?;
        if n < FRAME_SUM {
            return Err(Error::Corrupt("truncated initial frame"))
        }

        let mut h = Sha256::new();
        h.update(hdr.encode());
        h.update(self.span.slice(0, m));
        if <[u8; 32]>::from(h.finalize()) != sum {
            return Err(Error::Corrupt("initial frame checksum mismatch"))
        }
        self.len = m;

        let mut off = img_base + (m + FRAME_SUM) as u64;
        let mut patches = 0usize;
        loop {
            let mut hb = [0u8; FRAME_HDR];
            if self.files[self.cur].file.read_at(&mut hb, off)? < FRAME_HDR {
                break
            }
            let fh = FrameHdr::decode(&hb);
            if fh.id != self.id || fh.seq != self.seq {
                break
            }
            let dlen = fh.len as usize;
            if dlen > PATCH_CAP + mutation_overhead() {
                break
            }
            let mut payload = vec![0u8; dlen];
            if self.files[self.cur].file.read_at(&mut payload, off + FRAME_HDR as u64)? < dlen {
                break
            }
            let mut sum = [0u8; FRAME_SUM];
            if self.files[self.cur].file.read_at(&mut sum, off + (FRAME_HDR + dlen) as u64)? <
                FRAME_SUM
            {
                break
            }
            if frame::frame_sum(&hb, &payload) != sum {
                break
            }

            self.apply_patch(&payload)?;
            off += (FRAME_OVERHEAD + dlen) as u64;
            patches += 1;
        }
        self.files[self.cur].size = off;

        debug!(
            target: "pmem::store",
            "Recovered {} bytes of memory from {} patch frames (seq {})",
            self.len, patches, self.seq
        );
        Ok(())
    }

    /// Apply one checksum-validated patch payload. Offsets past the
    /// current length are honored up to a small slack; farther ones are
    /// corruption even inside a validated frame.
    fn apply_patch(&mut self, payload: &[u8]) -> Result<()> {
        let dstart = self.data_start();
        let mut iter = MutationIter::new(payload);
        while let Some(m) = iter.next() {
            let m = m?;
            if m.disk {
                let Some(d) = &mut self.disk else {
                    return Err(Error::Corrupt("disk mutation without disk file"))
                };
                d.file.write_at(m.data, dstart + m.off)?;
                d.dirty = true;
                continue
            }

            let off = usize::try_from(m.off).map_err(|_| Error::Corrupt("patch offset overflow"))?;
            let Some(end) = off.checked_add(m.data.len()) else {
                return Err(Error::Corrupt("patch offset overflow"))
            };
            if end > self.len {
                // Zero-length records publish the memory length and may
                // grow it arbitrarily; data mutations only by the slack.
                if !m.data.is_empty() && end > self.len + OFFSET_SLACK {
                    return Err(Error::Corrupt("patch offset out of range"))
                }
                self.span.expand(end)?;
                self.len = end;
            }
            if !m.data.is_empty() {
                self.span.slice_mut(off, m.data.len()).copy_from_slice(m.data);
            }
        }
        Ok(())
    }
}

/// Reserve address space for one memory image, halving the request while
/// the OS refuses. Address space is plentiful but not infinite when many
/// instances coexist in one process.
fn reserve_span() -> Result<Span> {
    let mut size = DEFAULT_RESERVE;
    loop {
        match Span::reserve(size) {
            Ok(span) => {
                if size != DEFAULT_RESERVE {
                    warn!(target: "pmem::store", "Address-space reservation reduced to {} bytes", size);
                }
                return Ok(span)
            }
            Err(e) => {
                if size <= MIN_RESERVE {
                    return Err(e)
                }
                size /= 2;
            }
        }
    }
}

/// NUL-pad the caller's magic to a multiple of 8 bytes. The magic must be
/// 1 to 8 bytes and free of NUL.
fn pad_magic(magic: &str) -> Result<Vec<u8>> {
    let bytes = magic.as_bytes();
    if bytes.is_empty() || bytes.len() > 8 || bytes.contains(&0) {
        return Err(Error::InvalidMagic)
    }
    let mut padded = bytes.to_vec();
    padded.resize(bytes.len().div_ceil(8) * 8, 0);
    Ok(padded)
}

fn read_intro(file: &mut dyn BackingFile, magic: &[u8]) -> Result<FrameHdr> {
    let mut m = vec![0u8; magic.len()];
    if file.read_at(&mut m, 0)? < m.len() {
        return Err(Error::Corrupt("missing magic"))
    }
    if m != magic {
        return Err(Error::BadMagic)
    }
    let mut hb = [0u8; FRAME_HDR];
    if file.read_at(&mut hb, magic.len() as u64)? < FRAME_HDR {
        return Err(Error::Corrupt("missing initial frame"))
    }
    Ok(FrameHdr::decode(&hb))
}
