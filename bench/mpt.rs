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

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::OsRng, RngCore};

use mptstore::{verify, Mpt};

fn rand32() -> [u8; 32] {
    let mut buf = [0u8; 32];
    OsRng.fill_bytes(&mut buf);
    buf
}

fn mpt(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");
    for n in [1_000u64, 10_000, 100_000] {
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut tree = Mpt::in_memory().unwrap();
                for _ in 0..n {
                    tree.set(&rand32(), &rand32()).unwrap();
                }
                tree.snap(1).unwrap();
                tree.close().unwrap();
            })
        });
    }
    group.finish();

    let mut tree = Mpt::in_memory().unwrap();
    let mut keys = vec![];
    for _ in 0..100_000 {
        let k = rand32();
        tree.set(&k, &rand32()).unwrap();
        keys.push(k);
    }
    let snap = tree.snap(1).unwrap();

    c.bench_function("prove", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % keys.len();
            tree.prove(&keys[i]).unwrap()
        })
    });

    let proof = tree.prove(&keys[0]).unwrap();
    c.bench_function("verify", |b| b.iter(|| verify(&snap, &keys[0], &proof).unwrap()));
}

criterion_group!(bench, mpt);
criterion_main!(bench);
