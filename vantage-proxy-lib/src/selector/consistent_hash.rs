//! Consistent-hash selection for stream upstreams (spec §4.D, §9 Open
//! Question: consistent hashing is the sole stream selection mode). The
//! teacher has no analogue — its single `load_balancing::round_robin`
//! module only does unweighted round robin — so this ring is built from
//! scratch using the standard virtual-node technique: each member is
//! replicated on the ring proportionally to its weight, bounding how many
//! keys remap when membership changes to roughly `1/N` of the keyspace
//! (spec §8's `ceil(K/N)` remap bound).

use ahash::RandomState;
use std::collections::BTreeMap;
use std::hash::Hash;

const VNODES_PER_WEIGHT_UNIT: u32 = 16;

pub struct ConsistentHashRing {
    ring: BTreeMap<u64, usize>,
    hasher: RandomState,
    member_count: usize,
}

impl ConsistentHashRing {
    /// Builds a ring over `len(weights)` members, indices `0..weights.len()`,
    /// each replicated `weight * VNODES_PER_WEIGHT_UNIT` times.
    pub fn new(weights: &[u32]) -> Self {
        let hasher = RandomState::with_seeds(0, 0, 0, 0);
        let mut ring = BTreeMap::new();
        for (idx, &weight) in weights.iter().enumerate() {
            let vnodes = weight.max(1) * VNODES_PER_WEIGHT_UNIT;
            for v in 0..vnodes {
                let h = hasher.hash_one((idx, v));
                ring.insert(h, idx);
            }
        }
        Self { ring, hasher, member_count: weights.len() }
    }

    /// Returns the member index responsible for `key`, or `None` if the
    /// ring is empty.
    pub fn member_for<T: Hash>(&self, key: &T) -> Option<usize> {
        if self.ring.is_empty() {
            return None;
        }
        let h = self.hasher.hash_one(key);
        self.ring
            .range(h..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, &idx)| idx)
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_always_maps_to_same_member() {
        let ring = ConsistentHashRing::new(&[1, 1, 1]);
        let a = ring.member_for(&"192.168.1.1");
        let b = ring.member_for(&"192.168.1.1");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_ring_returns_none() {
        let ring = ConsistentHashRing::new(&[]);
        assert_eq!(ring.member_for(&"x"), None);
    }

    #[test]
    fn adding_a_member_remaps_a_bounded_fraction_of_keys() {
        let before = ConsistentHashRing::new(&[1, 1, 1]);
        let after = ConsistentHashRing::new(&[1, 1, 1, 1]);

        let keys: Vec<u64> = (0..2000).collect();
        let remapped = keys
            .iter()
            .filter(|k| before.member_for(k) != after.member_for(k))
            .count();

        // Expect roughly 1/4 of keys to remap onto the new member; allow
        // generous slack since vnode placement is hash-dependent.
        let fraction = remapped as f64 / keys.len() as f64;
        assert!(fraction < 0.6, "remapped fraction too high: {fraction}");
    }
}
