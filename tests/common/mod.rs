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

use rand::{rngs::OsRng, RngCore};

#[allow(dead_code)]
pub fn init_logger() {
    let cfg = simplelog::ConfigBuilder::new().build();
    if simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        cfg,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .is_err()
    {
        log::debug!(target: "test_harness", "Logger already initialized");
    }
}

/// Uniformly random key or value.
#[allow(dead_code)]
pub fn rand_key() -> [u8; 32] {
    let mut k = [0u8; 32];
    OsRng.fill_bytes(&mut k);
    k
}

/// Deterministic counter key: the index sits in the trailing bytes, so
/// consecutive keys share long prefixes and branch deep in the tree.
#[allow(dead_code)]
pub fn nkey(i: u64) -> [u8; 32] {
    let mut k = [0u8; 32];
    k[24..32].copy_from_slice(&i.to_be_bytes());
    k
}

/// Deterministic value distinct from every [`nkey`].
#[allow(dead_code)]
pub fn nval(i: u64) -> [u8; 32] {
    let mut v = [0xa5u8; 32];
    v[24..32].copy_from_slice(&i.to_be_bytes());
    v
}
