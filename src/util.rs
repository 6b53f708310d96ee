use std::collections::{HashMap, HashSet};
use std::fmt::Write as FWrite;
use std::hash::BuildHasherDefault;

use fnv;
use rand::Rng;
use sha1::{Digest, Sha1};

pub type FHashMap<K, V> = fnv::FnvHashMap<K, V>;
pub type FHashSet<T> = fnv::FnvHashSet<T>;
pub type UHashMap<T> = FHashMap<usize, T>;

pub type FBuildHasher = BuildHasherDefault<fnv::FnvHasher>;
pub type SHashMap<T> = HashMap<String, T, FBuildHasher>;
pub type SHashSet = HashSet<String, FBuildHasher>;

#[macro_export]
macro_rules! div_round_up {
    ($n:expr, $d:expr) => {
        ($n + $d - 1) / $d
    };
}

/// Reservoir-samples a single element from an iterator of unknown
/// length with uniform probability.
pub fn random_sample<A, T, R>(iter: A, rng: &mut R) -> Option<T>
where
    A: Iterator<Item = T>,
    R: Rng,
{
    let mut elem = None;
    let mut i = 1f64;
    for new_item in iter {
        if rng.gen::<f64>() < (1f64 / i) {
            elem = Some(new_item);
        }
        i += 1.0;
    }
    elem
}

pub fn sha1_hash(data: &[u8]) -> [u8; 20] {
    let mut ctx = Sha1::new();
    ctx.update(data);
    ctx.finalize().into()
}

pub fn hash_to_id(hash: &[u8]) -> String {
    let mut hash_str = String::new();
    for i in hash {
        write!(&mut hash_str, "{:02X}", i).unwrap();
    }
    hash_str
}
