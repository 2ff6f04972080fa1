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

//! A very large contiguous virtual-address reservation, committed one page
//! range at a time. The whole reservation is mapped `PROT_NONE` up front so
//! the region never moves; [`Span::expand`] flips the leading pages to
//! read-write as the memory image grows. Releasing hands the physical pages
//! back to the kernel while keeping the reservation inaccessible, so any
//! stale access faults instead of reading recycled memory.

use std::{ptr, slice};

use log::debug;

use crate::{Error, Result};

/// Reserved contiguous address range with an incrementally committed prefix.
pub struct Span {
    base: *mut u8,
    reserved: usize,
    committed: usize,
    released: bool,
}

// The span is owned by exactly one memory instance and all access is
// externally serialized, so the raw base pointer may move across threads.
unsafe impl Send for Span {}

impl Span {
    /// Reserve `max` bytes (rounded up to a page multiple) of inaccessible
    /// address space.
    pub fn reserve(max: usize) -> Result<Self> {
        let reserved = round_up(max.max(1), page_size());

        // SAFETY: fresh anonymous mapping, no fd, no existing aliases.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                reserved,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(Error::SpanReserve("mmap refused the reservation"))
        }

        debug!(target: "pmem::span", "Reserved {} bytes of address space", reserved);
        Ok(Self { base: base as *mut u8, reserved, committed: 0, released: false })
    }

    /// Make the first `n` bytes readable and writable. Calls that do not
    /// grow the committed prefix are no-ops.
    pub fn expand(&mut self, n: usize) -> Result<()> {
        if self.released {
            return Err(Error::Closed)
        }

        let n = round_up(n, page_size());
        if n <= self.committed {
            return Ok(())
        }
        if n > self.reserved {
            return Err(Error::SpanCommit("grew past the reservation"))
        }

        // SAFETY: the range lies inside our own reservation.
        let ret =
            unsafe { libc::mprotect(self.base as *mut libc::c_void, n, libc::PROT_READ | libc::PROT_WRITE) };
        if ret != 0 {
            return Err(Error::SpanCommit("mprotect refused to commit pages"))
        }

        self.committed = n;
        Ok(())
    }

    /// Bytes currently committed (a page multiple).
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Read view into committed memory.
    ///
    /// Panics outside the committed prefix. The public `Pmem` API bounds all
    /// offsets before reaching this point.
    pub fn slice(&self, off: usize, len: usize) -> &[u8] {
        assert!(!self.released, "span was released");
        assert!(off.checked_add(len).is_some_and(|end| end <= self.committed));
        // SAFETY: range checked against the committed prefix above.
        unsafe { slice::from_raw_parts(self.base.add(off), len) }
    }

    /// Write view into committed memory. Same bounds contract as [`Span::slice`].
    pub fn slice_mut(&mut self, off: usize, len: usize) -> &mut [u8] {
        assert!(!self.released, "span was released");
        assert!(off.checked_add(len).is_some_and(|end| end <= self.committed));
        // SAFETY: range checked against the committed prefix above.
        unsafe { slice::from_raw_parts_mut(self.base.add(off), len) }
    }

    /// Return all physical backing to the kernel and make the whole
    /// reservation inaccessible again. The reservation itself stays in
    /// place until the span is dropped, so dangling access faults.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(())
        }
        self.released = true;
        self.committed = 0;

        // SAFETY: whole-reservation range, still mapped.
        let ret = unsafe {
            if libc::madvise(self.base as *mut libc::c_void, self.reserved, libc::MADV_DONTNEED) != 0 {
                -1
            } else {
                libc::mprotect(self.base as *mut libc::c_void, self.reserved, libc::PROT_NONE)
            }
        };
        if ret != 0 {
            return Err(Error::SpanCommit("failed decommitting released span"))
        }

        debug!(target: "pmem::span", "Released {} bytes of committed memory", self.reserved);
        Ok(())
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        // SAFETY: we own the mapping and nothing borrows it past the owner.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.reserved);
        }
    }
}

fn page_size() -> usize {
    // SAFETY: plain sysconf query.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    sz as usize
}

fn round_up(n: usize, page: usize) -> usize {
    n.div_ceil(page) * page
}
