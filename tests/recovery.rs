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

use mptstore::{
    pmem::{
        frame::{frame_sum, FrameHdr, MutationIter, FRAME_HDR, FRAME_SUM},
        SimFile,
    },
    verify, Error, Mpt, Pmem, Result,
};

mod common;
use common::{init_logger, nkey, nval};

fn sim_pair() -> (SimFile, SimFile) {
    (SimFile::new(), SimFile::new())
}

fn sim_tree(f1: &SimFile, f2: &SimFile) -> Result<Mpt> {
    Mpt::create("mpt", Box::new(f1.clone()), Box::new(f2.clone()), None)
}

fn reopen_tree(f1: &SimFile, f2: &SimFile) -> Result<Mpt> {
    Mpt::open("mpt", Box::new(f1.clone()), Box::new(f2.clone()), None)
}

#[test]
fn reopen_restores_snapshot() -> Result<()> {
    init_logger();

    let (f1, f2) = sim_pair();
    let mut t = sim_tree(&f1, &f2)?;
    for i in 0..100 {
        t.set(&nkey(i), &nval(i))?;
    }
    let snap = t.snap(1)?;
    t.sync()?;
    t.close()?;

    let mut t = reopen_tree(&f1, &f2)?;
    assert_eq!(t.len(), 100);
    assert_eq!(t.snap(1)?, snap);

    // The reopened tree is clean and immediately provable
    for i in (0..100).step_by(7) {
        let proof = t.prove(&nkey(i))?;
        assert_eq!(verify(&snap, &nkey(i), &proof)?, (nval(i), true));
    }
    t.close()
}

#[test]
fn crash_rewinds_to_last_sync() -> Result<()> {
    let (f1, f2) = sim_pair();
    let mut t = sim_tree(&f1, &f2)?;
    for i in 0..100 {
        t.set(&nkey(i), &nval(i))?;
    }
    let snap = t.snap(1)?;
    t.sync()?;

    // Unsynced tail: fifty more insertions the crash must erase
    for i in 100..150 {
        t.set(&nkey(i), &nval(i))?;
    }
    drop(t);
    f1.crash();
    f2.crash();

    let mut t = reopen_tree(&f1, &f2)?;
    assert_eq!(t.len(), 100);
    assert!(!t.dirty());
    assert_eq!(t.snap(1)?, snap);
    t.close()
}

#[test]
fn corrupt_tail_recovers_a_group_prefix() -> Result<()> {
    const N: u64 = 12;

    // Root hash of every insertion prefix
    let mut prefix_hashes = vec![];
    for n in 0..=N {
        let mut t = Mpt::in_memory()?;
        for i in 0..n {
            t.set(&nkey(i), &nval(i))?;
        }
        prefix_hashes.push(t.snap(1)?.hash);
        t.close()?;
    }

    let (f1, f2) = sim_pair();
    let mut t = sim_tree(&f1, &f2)?;
    // A wide image keeps the patch tail under the compaction threshold,
    // so every appended frame stays in this file
    t.pmem().expand(1 << 20)?;
    t.pmem().set_constant_flush(true);
    for i in 0..N {
        t.set(&nkey(i), &nval(i))?;
    }
    drop(t);

    // Flip a byte inside the current file's last patch frame. Recovery
    // must stop there and land exactly on an insertion-group boundary.
    assert_eq!(f1.current(), Some(true));
    f1.corrupt(f1.len() - 10);

    let mut t = reopen_tree(&f1, &f2)?;
    let recovered = t.snap(1)?.hash;
    let pos = prefix_hashes.iter().position(|h| *h == recovered);
    assert!(pos.is_some(), "recovered state is not an insertion prefix");
    assert!(pos.unwrap() < N as usize, "corrupt frame survived recovery");
    t.close()
}

#[test]
fn mutation_groups_are_atomic() -> Result<()> {
    let (f1, f2) = sim_pair();
    let mut pm = Pmem::create("test", Box::new(f1.clone()), Box::new(f2.clone()), None)?;
    pm.expand(64)?;

    pm.begin_group()?;
    pm.mutate(0, b"aaaa")?;
    pm.mutate(32, b"bbbb")?;
    pm.end_group()?;
    pm.sync()?;

    // A group left open never reaches the files, even across a sync
    pm.begin_group()?;
    pm.mutate(0, b"cccc")?;
    pm.mutate(32, b"dddd")?;
    pm.sync()?;
    drop(pm);
    f1.crash();
    f2.crash();

    let mut pm = Pmem::open("test", Box::new(f1.clone()), Box::new(f2.clone()), None)?;
    assert_eq!(&pm.data()[..4], b"aaaa");
    assert_eq!(&pm.data()[32..36], b"bbbb");
    pm.release()?;

    // Once the group ends and syncs, both mutations appear together
    let mut pm = Pmem::open("test", Box::new(f1.clone()), Box::new(f2.clone()), None)?;
    pm.begin_group()?;
    pm.mutate(0, b"cccc")?;
    pm.mutate(32, b"dddd")?;
    pm.end_group()?;
    pm.sync()?;
    pm.release()?;

    let mut pm = Pmem::open("test", Box::new(f1), Box::new(f2), None)?;
    assert_eq!(&pm.data()[..4], b"cccc");
    assert_eq!(&pm.data()[32..36], b"dddd");
    pm.release()
}

#[test]
fn compaction_swaps_the_file_pair() -> Result<()> {
    init_logger();

    let (f1, f2) = sim_pair();
    let mut t = sim_tree(&f1, &f2)?;
    t.pmem().set_constant_flush(true);

    for i in 0..8 {
        t.set(&nkey(i), &nval(i))?;
    }

    // Overwrite until the patch tail outgrows the image and the pair swaps
    let mut swapped = false;
    for round in 0..500u64 {
        t.set(&nkey(0), &nval(1000 + round))?;
        if f2.current() == Some(true) {
            swapped = true;
            break
        }
    }
    assert!(swapped, "compaction never swapped the file pair");

    let snap = t.snap(1)?;
    t.sync()?;
    t.close()?;

    let t = reopen_tree(&f1, &f2)?;
    for i in 1..8 {
        let proof = t.prove(&nkey(i))?;
        assert_eq!(verify(&snap, &nkey(i), &proof)?, (nval(i), true));
    }
    Ok(())
}

/// Rebuild the memory image a file pair half encodes: initial image frame,
/// then every valid patch frame, stopping like recovery does.
fn replay(contents: &[u8], magic_len: usize) -> Option<Vec<u8>> {
    let hdr_at = magic_len;
    let hb: [u8; FRAME_HDR] = contents.get(hdr_at..hdr_at + FRAME_HDR)?.try_into().ok()?;
    let hdr = FrameHdr::decode(&hb);
    let mut mem = contents.get(hdr_at + FRAME_HDR..hdr_at + FRAME_HDR + hdr.len as usize)?.to_vec();

    let mut off = hdr_at + FRAME_HDR + hdr.len as usize + FRAME_SUM;
    loop {
        let Some(slice) = contents.get(off..off + FRAME_HDR) else { break };
        let fb: [u8; FRAME_HDR] = slice.try_into().ok()?;
        let fh = FrameHdr::decode(&fb);
        if fh.id != hdr.id || fh.seq != hdr.seq {
            break
        }
        let dlen = fh.len as usize;
        let Some(payload) = contents.get(off + FRAME_HDR..off + FRAME_HDR + dlen) else { break };
        let Some(sum) = contents.get(off + FRAME_HDR + dlen..off + FRAME_HDR + dlen + FRAME_SUM)
        else {
            break
        };
        if frame_sum(&fb, payload).as_slice() != sum {
            break
        }

        for m in MutationIter::new(payload) {
            let m = m.ok()?;
            if m.disk {
                continue
            }
            let end = m.off as usize + m.data.len();
            if mem.len() < end {
                mem.resize(end, 0);
            }
            mem[m.off as usize..end].copy_from_slice(m.data);
        }
        off += FRAME_HDR + dlen + FRAME_SUM;
    }
    Some(mem)
}

#[test]
fn current_file_always_replays_to_memory() -> Result<()> {
    let (f1, f2) = sim_pair();
    let mut pm = Pmem::create("test", Box::new(f1.clone()), Box::new(f2.clone()), None)?;
    pm.set_constant_flush(true);
    pm.expand(4096)?;

    for round in 0..200u64 {
        let data = [round as u8; 48];
        pm.mutate((round as usize * 37) % 4000, &data)?;
        pm.sync()?;

        let cur = if f1.current() == Some(true) { &f1 } else { &f2 };
        let replayed = replay(&cur.contents(), 8).expect("current file must replay");
        assert_eq!(replayed, pm.data(), "divergence at round {round}");
    }

    assert!(f2.current() == Some(true) || f1.current() == Some(true));
    pm.release()
}

#[test]
fn disk_side_channel_is_replayed() -> Result<()> {
    let (f1, f2) = sim_pair();
    let disk = SimFile::new();
    let mut pm = Pmem::create(
        "test",
        Box::new(f1.clone()),
        Box::new(f2.clone()),
        Some(Box::new(disk.clone())),
    )?;

    pm.write_disk(b"first", 0)?;
    pm.write_disk(b"second", 0)?;
    pm.write_disk(b"tail", 100)?;
    pm.sync()?;
    pm.release()?;

    // Wipe the side channel back to its identity header; the patch log in
    // the main pair must rebuild its contents in order.
    disk.truncate(8 + FRAME_HDR + FRAME_SUM);

    let mut pm = Pmem::open(
        "test",
        Box::new(f1),
        Box::new(f2),
        Some(Box::new(disk.clone())),
    )?;
    let mut buf = [0u8; 6];
    pm.read_disk(&mut buf, 0)?;
    assert_eq!(&buf, b"second");
    let mut buf = [0u8; 4];
    pm.read_disk(&mut buf, 100)?;
    assert_eq!(&buf, b"tail");

    // Reads past the written region report end of file
    let mut buf = [0u8; 8];
    assert_eq!(pm.read_disk(&mut buf, 1 << 20), Err(Error::DiskEof));
    pm.release()
}

#[test]
fn open_refuses_empty_or_foreign_files() -> Result<()> {
    // Empty pair: nothing to recover
    let (f1, f2) = sim_pair();
    assert!(Pmem::open("test", Box::new(f1.clone()), Box::new(f2.clone()), None).is_err());

    // Pairing one file with a file from another memory
    let mut pm = Pmem::create("test", Box::new(f1.clone()), Box::new(f2), None)?;
    pm.sync()?;
    pm.release()?;

    let (g1, g2) = sim_pair();
    let mut pm = Pmem::create("test", Box::new(g1.clone()), Box::new(g2), None)?;
    pm.sync()?;
    pm.release()?;

    assert_eq!(
        Pmem::open("test", Box::new(f1), Box::new(g1), None).map(|_| ()),
        Err(Error::IdMismatch)
    );
    Ok(())
}
