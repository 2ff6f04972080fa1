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

//! Storage seam of the persistent memory core.
//!
//! The core runs over anything providing positional read/write and sync:
//! ordinary OS files for on-disk mode, [`NullFile`] for memory-only mode,
//! and [`SimFile`] for crash and corruption injection in tests.

use std::{cell::RefCell, io, rc::Rc};

use crate::{Error, Result};

/// Positional storage under one half of the persistence file pair.
pub trait BackingFile {
    /// Read up to `buf.len()` bytes at `off`. Returns the number of bytes
    /// read; fewer than requested means end of file.
    fn read_at(&mut self, buf: &mut [u8], off: u64) -> Result<usize>;

    /// Write all of `buf` at `off`, extending the file as needed.
    fn write_at(&mut self, buf: &[u8], off: u64) -> Result<()>;

    /// Durably flush all writes.
    fn sync(&mut self) -> Result<()>;

    /// Test-double hook: simulators track which file of the pair is
    /// current and where its live region ends. Real files ignore it.
    fn set_current(&mut self, _current: bool, _off: u64) {}
}

impl BackingFile for std::fs::File {
    fn read_at(&mut self, buf: &mut [u8], off: u64) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        let mut n = 0;
        while n < buf.len() {
            match FileExt::read_at(self, &mut buf[n..], off + n as u64) {
                Ok(0) => break,
                Ok(m) => n += m,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], off: u64) -> Result<()> {
        use std::os::unix::fs::FileExt;
        FileExt::write_all_at(self, buf, off)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.sync_data()?;
        Ok(())
    }
}

/// Write sink for memory-only stores: discards writes, reads as empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFile;

impl BackingFile for NullFile {
    fn read_at(&mut self, _buf: &mut [u8], _off: u64) -> Result<usize> {
        Ok(0)
    }

    fn write_at(&mut self, _buf: &[u8], _off: u64) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SimInner {
    data: Vec<u8>,
    synced: Vec<u8>,
    fail_writes: bool,
    current: Option<bool>,
    current_off: u64,
}

/// In-memory file simulator used by the crash tests.
///
/// The handle is a shared reference: tests keep a clone while the memory
/// core owns another, so a test can crash or corrupt the file underneath
/// the core and inspect what reached "disk". Tracks the contents at the
/// last sync so [`SimFile::crash`] can rewind to the durable state.
#[derive(Debug, Default, Clone)]
pub struct SimFile(Rc<RefCell<SimInner>>);

impl SimFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind the file to its contents at the last sync, as a power loss
    /// would.
    pub fn crash(&self) {
        let mut inner = self.0.borrow_mut();
        let synced = inner.synced.clone();
        inner.data = synced;
    }

    /// Cut the file to `len` bytes.
    pub fn truncate(&self, len: usize) {
        let mut inner = self.0.borrow_mut();
        inner.data.truncate(len);
        inner.synced.truncate(len);
    }

    /// Flip one byte.
    pub fn corrupt(&self, off: usize) {
        let mut inner = self.0.borrow_mut();
        inner.data[off] ^= 0xff;
        if off < inner.synced.len() {
            inner.synced[off] ^= 0xff;
        }
    }

    /// Make every subsequent write and sync fail.
    pub fn fail_writes(&self, fail: bool) {
        self.0.borrow_mut().fail_writes = fail;
    }

    pub fn len(&self) -> usize {
        self.0.borrow().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().data.clone()
    }

    /// Last value passed through the [`BackingFile::set_current`] hook,
    /// `None` before the store ever designated this file.
    pub fn current(&self) -> Option<bool> {
        self.0.borrow().current
    }

    pub fn current_off(&self) -> u64 {
        self.0.borrow().current_off
    }
}

impl BackingFile for SimFile {
    fn read_at(&mut self, buf: &mut [u8], off: u64) -> Result<usize> {
        let inner = self.0.borrow();
        let off = off as usize;
        if off >= inner.data.len() {
            return Ok(0)
        }
        let n = buf.len().min(inner.data.len() - off);
        buf[..n].copy_from_slice(&inner.data[off..off + n]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], off: u64) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_writes {
            return Err(Error::Io(io::ErrorKind::Other))
        }
        let off = off as usize;
        if inner.data.len() < off + buf.len() {
            inner.data.resize(off + buf.len(), 0);
        }
        inner.data[off..off + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_writes {
            return Err(Error::Io(io::ErrorKind::Other))
        }
        let data = inner.data.clone();
        inner.synced = data;
        Ok(())
    }

    fn set_current(&mut self, current: bool, off: u64) {
        let mut inner = self.0.borrow_mut();
        inner.current = Some(current);
        inner.current_off = off;
    }
}
