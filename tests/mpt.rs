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

use std::collections::HashMap;

use mptstore::{
    hash::{inner_hash, leaf_hash},
    verify, Error, Mpt, Result,
};

mod common;
use common::{nval, rand_key};

// Proof sizes: magic + tag, payload, then 33 bytes per path element.
const CONFIRM_BASE: usize = 8 + 1 + 32;
const DENY_BASE: usize = 8 + 1 + 64;

#[test]
fn two_sibling_leaves() -> Result<()> {
    // Keys diverging at bit 0 make the smallest possible branch.
    let k0 = [0u8; 32];
    let mut k1 = [0u8; 32];
    k1[0] = 0x80;
    let v0 = nval(0);
    let v1 = nval(1);

    let mut t = Mpt::in_memory()?;
    t.set(&k0, &v0)?;
    t.set(&k1, &v1)?;

    let snap = t.snap(1)?;
    assert_eq!(snap.hash, inner_hash(0, &leaf_hash(&k0, &v0), &leaf_hash(&k1, &v1)));

    // One path element per proof
    let proof = t.prove(&k0)?;
    assert_eq!(proof.len(), CONFIRM_BASE + 33);
    assert_eq!(verify(&snap, &k0, &proof)?, (v0, true));
    t.close()
}

#[test]
fn nested_branch_structure() -> Result<()> {
    // k0 and k1 share bits 0..11 and diverge at bit 11; k2 diverges from
    // both at bit 0. The top branch splits at 0, its left subtree at 11.
    let k0 = [0u8; 32];
    let mut k1 = [0u8; 32];
    k1[1] = 0x10;
    let mut k2 = [0u8; 32];
    k2[0] = 0x80;
    let (v0, v1, v2) = (nval(0), nval(1), nval(2));

    let mut t = Mpt::in_memory()?;
    t.set(&k0, &v0)?;
    t.set(&k1, &v1)?;
    t.set(&k2, &v2)?;

    let snap = t.snap(1)?;
    let left = inner_hash(11, &leaf_hash(&k0, &v0), &leaf_hash(&k1, &v1));
    assert_eq!(snap.hash, inner_hash(0, &left, &leaf_hash(&k2, &v2)));

    // Leaves under the nested branch carry two path elements, the
    // top-level leaf one.
    assert_eq!(t.prove(&k0)?.len(), CONFIRM_BASE + 2 * 33);
    assert_eq!(t.prove(&k2)?.len(), CONFIRM_BASE + 33);

    for (k, v) in [(k0, v0), (k1, v1), (k2, v2)] {
        assert_eq!(verify(&snap, &k, &t.prove(&k)?)?, (v, true));
    }
    t.close()
}

#[test]
fn insertion_order_does_not_matter() -> Result<()> {
    let k0 = [0u8; 32];
    let mut k1 = [0u8; 32];
    k1[1] = 0x10;
    let mut k2 = [0u8; 32];
    k2[0] = 0x80;
    let entries = [(k0, nval(0)), (k1, nval(1)), (k2, nval(2))];

    // All six insertion orders land on the same root hash
    let mut hashes = vec![];
    for perm in [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
        let mut t = Mpt::in_memory()?;
        for i in perm {
            let (k, v) = entries[i];
            t.set(&k, &v)?;
        }
        hashes.push(t.snap(1)?.hash);
        t.close()?;
    }
    assert!(hashes.windows(2).all(|w| w[0] == w[1]));
    Ok(())
}

#[test]
fn exhaustive_small_trees() -> Result<()> {
    // A universe mixing shallow and deep divergences
    let mut universe: Vec<[u8; 32]> = vec![];
    for byte in [0x00, 0x01, 0x80, 0x81] {
        let mut k = [0u8; 32];
        k[0] = byte;
        universe.push(k);
        k[31] = 0x01;
        universe.push(k);
    }

    // Every non-empty subset, inserted forwards and backwards
    for mask in 1u32..(1 << universe.len()) {
        let picked: Vec<usize> =
            (0..universe.len()).filter(|i| mask & (1 << i) != 0).collect();

        let mut fwd = Mpt::in_memory()?;
        for &i in &picked {
            fwd.set(&universe[i], &nval(i as u64))?;
        }
        let snap = fwd.snap(1)?;

        let mut rev = Mpt::in_memory()?;
        for &i in picked.iter().rev() {
            rev.set(&universe[i], &nval(i as u64))?;
        }
        assert_eq!(rev.snap(1)?.hash, snap.hash, "order-dependent hash for mask {mask:#b}");
        rev.close()?;

        // Each universe key proves its own presence or absence
        for (i, k) in universe.iter().enumerate() {
            let proof = fwd.prove(k)?;
            let expected = if picked.contains(&i) { (nval(i as u64), true) } else { ([0u8; 32], false) };
            assert_eq!(verify(&snap, k, &proof)?, expected, "bad proof for key {i} in mask {mask:#b}");
        }
        fwd.close()?;
    }
    Ok(())
}

#[test]
fn large_tree_roundtrip() -> Result<()> {
    let mut t = Mpt::in_memory()?;
    let mut entries = HashMap::new();
    for i in 0..4000u64 {
        let k = rand_key();
        let v = nval(i);
        t.set(&k, &v)?;
        entries.insert(k, v);
    }
    // Overwrites must win
    let (&stale, _) = entries.iter().next().expect("nonempty");
    t.set(&stale, &nval(999_999))?;
    entries.insert(stale, nval(999_999));

    let snap = t.snap(1)?;

    for (k, v) in &entries {
        let proof = t.prove(k)?;
        assert_eq!(proof.len() % 33, CONFIRM_BASE % 33);
        assert!(proof.len() >= CONFIRM_BASE + 33);
        assert_eq!(verify(&snap, k, &proof)?, (*v, true));
    }

    // Never-inserted keys yield verifying exclusion proofs
    for _ in 0..100 {
        let k = rand_key();
        if entries.contains_key(&k) {
            continue
        }
        let proof = t.prove(&k)?;
        assert_eq!(proof.len() % 33, DENY_BASE % 33);
        assert_eq!(verify(&snap, &k, &proof)?, ([0u8; 32], false));
    }
    t.close()
}

#[test]
fn proofs_reject_any_byte_flip() -> Result<()> {
    let mut t = Mpt::in_memory()?;
    for i in 0..50u64 {
        let mut k = [0u8; 32];
        k[0] = (i * 5) as u8;
        k[31] = i as u8;
        t.set(&k, &nval(i))?;
    }
    let snap = t.snap(1)?;

    let mut present = [0u8; 32];
    present[0] = 5;
    present[31] = 1;
    let mut absent = [0x33u8; 32];
    absent[0] = 0x7f;

    for key in [present, absent] {
        let proof = t.prove(&key)?;
        verify(&snap, &key, &proof)?;

        for i in 0..proof.len() {
            let mut bad = proof.clone();
            bad[i] ^= 0xff;
            assert!(
                matches!(verify(&snap, &key, &bad), Err(Error::MalformedProof(_) | Error::ProofMismatch)),
                "byte {i} flip slipped through"
            );
        }

        // Truncations are rejected too
        for cut in 0..proof.len() {
            assert!(verify(&snap, &key, &proof[..cut]).is_err());
        }
        // As are trailing bytes
        let mut long = proof.clone();
        long.push(0);
        assert!(verify(&snap, &key, &long).is_err());
    }
    t.close()
}

#[test]
fn proof_against_wrong_snapshot_fails() -> Result<()> {
    let mut t = Mpt::in_memory()?;
    let k = rand_key();
    t.set(&k, &nval(1))?;
    let s1 = t.snap(1)?;
    let proof = t.prove(&k)?;

    t.set(&rand_key(), &nval(2))?;
    let s2 = t.snap(2)?;

    assert_eq!(verify(&s1, &k, &proof)?, (nval(1), true));
    assert_eq!(verify(&s2, &k, &proof), Err(Error::ProofMismatch));
    t.close()
}
