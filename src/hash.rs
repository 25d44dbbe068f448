//! Zero-sized hash builder for the name-keyed maps inside a block.
//!
//! Property and handler registries are keyed by short names that never come
//! from an adversary, so a fixed-seed foldhash is enough.

use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};
use indexmap::IndexMap;

use crate::Name;

const SEED: u64 = 0x517cc1b727220a95;

/// Fixed-seed foldhash. Every block carries several name-keyed maps and none
/// of them pays for per-map hasher state.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct NameHasher;

impl BuildHasher for NameHasher {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(SEED).build_hasher()
    }
}

/// Name-keyed map with stable insertion order.
pub(crate) type NameMap<V> = IndexMap<Name, V, NameHasher>;
