//! Core algorithms and data structures of ember

use ahash::{AHashMap, AHashSet};

pub mod blacklist;
pub mod corpus;
pub mod dict;
pub mod escape;
pub mod phase;

pub type HashMap<K, V> = AHashMap<K, V>;
pub type HashSet<V> = AHashSet<V>;
pub type RngType = rand::rngs::SmallRng;
