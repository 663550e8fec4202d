//! The rolling-tag hash table.
//!
//! Tags are 64-bit XOR fingerprints of a 31-byte window, built from 256
//! per-byte constants so one byte can enter and one leave in O(1).  The
//! table is a flat power-of-two array of `(tag, offset)` pairs with linear
//! probing.  It starts by accepting every offered tag; as it fills past two
//! thirds, entries whose tags lack enough low set bits are culled and the
//! required bit pattern tightens, thinning coverage evenly across the file
//! instead of dropping the oldest positions.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{Level, MINIMUM_MATCH};
use crate::error::{LrzError, Result};

/// Tag-index constants are fixed per table lifetime so identical inputs
/// produce identical archives.
const HASH_INDEX_SEED: u64 = 0x1badb002_cafef00d;

/// `(tag, offset)` pair; both zero means empty.  A real tag of zero at
/// offset zero is indistinguishable from empty, which costs at most the
/// first window of the chunk.
#[derive(Clone, Copy, Default)]
pub struct HashEntry {
    pub t: u64,
    pub offset: u64,
}

#[inline]
fn increase_mask(tag_mask: u64) -> u64 {
    (tag_mask << 1) | 1
}

/// Will `a` be culled before `b`?  True when `a` has fewer low set bits.
fn lesser_bitness(a: u64, b: u64) -> bool {
    let mut mask: u64 = 0;
    while mask != u64::MAX {
        if (a & b & mask) != mask {
            break;
        }
        mask = (mask << 1) | 1;
    }
    (a & mask) < (b & mask)
}

pub struct HashTable {
    entries: Vec<HashEntry>,
    bits: u32,
    hash_count: i64,
    hash_limit: i64,
    pub minimum_tag_mask: u64,
    tag_clean_ptr: usize,
    victim_round: u32,
    max_chain_len: u32,
    hash_index: [u64; 256],
}

impl HashTable {
    /// Size the table for one tuning level and generate the tag constants.
    pub fn new(level: &Level) -> Result<HashTable> {
        let entry_size = std::mem::size_of::<HashEntry>() as u64;
        let hashsize = level.mb_used * (1024 * 1024 / entry_size);
        let mut bits = 0u32;
        while (1u64 << bits) < hashsize {
            bits += 1;
        }
        let size = 1usize << bits;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(size)
            .map_err(|_| LrzError::Resource(format!("cannot allocate {size}-entry hash table")))?;
        entries.resize(size, HashEntry::default());

        let mut rng = StdRng::seed_from_u64(HASH_INDEX_SEED);
        let mut hash_index = [0u64; 256];
        for slot in hash_index.iter_mut() {
            *slot = rng.gen();
        }

        Ok(HashTable {
            entries,
            bits,
            hash_count: 0,
            hash_limit: (size as i64) / 3 * 2,
            minimum_tag_mask: (1 << level.initial_freq) - 1,
            tag_clean_ptr: 0,
            victim_round: 0,
            max_chain_len: level.max_chain_len,
            hash_index,
        })
    }

    /// Clear for a fresh chunk, keeping the allocation and constants.
    pub fn reset(&mut self, level: &Level) {
        self.entries.fill(HashEntry::default());
        self.hash_count = 0;
        self.minimum_tag_mask = (1 << level.initial_freq) - 1;
        self.tag_clean_ptr = 0;
        self.victim_round = 0;
        self.max_chain_len = level.max_chain_len;
    }

    #[inline]
    pub fn index_mask(&self) -> u64 {
        (1u64 << self.bits) - 1
    }

    #[inline]
    pub fn primary(&self, t: u64) -> usize {
        (t & self.index_mask()) as usize
    }

    #[inline]
    pub fn entry(&self, h: usize) -> &HashEntry {
        &self.entries[h]
    }

    #[inline]
    pub fn is_empty_slot(&self, h: usize) -> bool {
        let e = &self.entries[h];
        e.offset == 0 && e.t == 0
    }

    /// Tag of the window starting at `window[0]`.
    pub fn full_tag(&self, window: &[u8]) -> u64 {
        let mut t = 0u64;
        for &b in &window[..MINIMUM_MATCH] {
            t ^= self.hash_index[usize::from(b)];
        }
        t
    }

    /// Roll the tag one byte forward: `old` leaves the window, `new` enters.
    #[inline]
    pub fn next_tag(&self, t: u64, old: u8, new: u8) -> u64 {
        t ^ self.hash_index[usize::from(old)] ^ self.hash_index[usize::from(new)]
    }

    /// Insert `(t, offset)`, spilling forward on collision.
    ///
    /// An occupant due for culling is replaced outright.  An occupant that
    /// will outlive the newcomer cannot be jumped over (probes for it would
    /// stop early once it is culled), so it is rehashed first and its slot
    /// taken.  Long runs of one identical tag evict a rotating victim.
    pub fn insert(&mut self, t: u64, offset: u64) {
        self.hash_count += 1;
        self.insert_inner(t, offset);
    }

    fn insert_inner(&mut self, t: u64, offset: u64) {
        let mask = self.index_mask() as usize;
        let better_than_min = increase_mask(self.minimum_tag_mask);
        let mut h = self.primary(t);
        let mut victim_h = 0usize;
        let mut round = 0u32;

        while !self.is_empty_slot(h) {
            let occupant = self.entries[h];
            if (occupant.t & better_than_min) != better_than_min {
                self.hash_count -= 1;
                break;
            }
            if lesser_bitness(occupant.t, t) {
                self.insert_inner(occupant.t, occupant.offset);
                break;
            }
            if occupant.t == t {
                if round == self.victim_round {
                    victim_h = h;
                }
                round += 1;
                if round == self.max_chain_len {
                    h = victim_h;
                    self.hash_count -= 1;
                    self.victim_round += 1;
                    if self.victim_round == self.max_chain_len {
                        self.victim_round = 0;
                    }
                    break;
                }
            }
            h = (h + 1) & mask;
        }
        self.entries[h] = HashEntry { t, offset };
    }

    /// True once the table is full enough that inserts should cull.
    pub fn over_limit(&self) -> bool {
        self.hash_count > self.hash_limit
    }

    /// Evict one entry whose tag fails the next tighter mask, sweeping from
    /// the last cleaning position.  When a full sweep finds nothing, the
    /// minimum mask itself tightens and the sweep restarts.  Returns the
    /// mask new inserts must now satisfy.
    pub fn clean_one(&mut self) -> Result<u64> {
        // One escalation per tag bit; more means every entry already
        // satisfies an all-ones mask, which cannot happen with live data.
        for _ in 0..64 {
            let better_than_min = increase_mask(self.minimum_tag_mask);
            while self.tag_clean_ptr < self.entries.len() {
                let i = self.tag_clean_ptr;
                if !self.is_empty_slot(i)
                    && (self.entries[i].t & better_than_min) != better_than_min
                {
                    self.entries[i] = HashEntry::default();
                    self.hash_count -= 1;
                    return Ok(better_than_min);
                }
                self.tag_clean_ptr += 1;
            }
            self.minimum_tag_mask = better_than_min;
            self.tag_clean_ptr = 0;
        }
        Err(LrzError::Invariant(
            "hash culling failed to converge".into(),
        ))
    }

    /// Number of live entries (for statistics output).
    pub fn len(&self) -> i64 {
        self.hash_count
    }

    pub fn is_empty(&self) -> bool {
        self.hash_count == 0
    }

    pub fn table_size(&self) -> usize {
        self.entries.len()
    }

    /// Occupancy statistics: total live entries and how many still sit in
    /// their primary bucket.
    pub fn distribution(&self) -> (u64, u64) {
        let mut total = 0u64;
        let mut primary = 0u64;
        for (i, e) in self.entries.iter().enumerate() {
            if e.offset == 0 && e.t == 0 {
                continue;
            }
            total += 1;
            if self.primary(e.t) == i {
                primary += 1;
            }
        }
        (total, primary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LEVELS;

    fn small_table() -> HashTable {
        HashTable::new(&LEVELS[0]).unwrap()
    }

    #[test]
    fn table_is_power_of_two_and_sized_to_level() {
        let t = small_table();
        assert!(t.table_size().is_power_of_two());
        assert!(t.table_size() as u64 * 16 >= 1024 * 1024);
    }

    #[test]
    fn rolling_tag_matches_full_recompute() {
        let t = small_table();
        let data: Vec<u8> = (0..200u32).map(|i| (i * 13 % 251) as u8).collect();
        let mut tag = t.full_tag(&data);
        for p in 1..data.len() - MINIMUM_MATCH {
            tag = t.next_tag(tag, data[p - 1], data[p + MINIMUM_MATCH - 1]);
            assert_eq!(tag, t.full_tag(&data[p..]), "position {p}");
        }
    }

    #[test]
    fn insert_and_find_in_primary_chain() {
        let mut t = small_table();
        let tag = 0xffff_ffff_ffff_ffffu64;
        t.insert(tag, 1234);
        let mut h = t.primary(tag);
        let mut found = false;
        while !t.is_empty_slot(h) {
            if t.entry(h).t == tag && t.entry(h).offset == 1234 {
                found = true;
                break;
            }
            h = (h + 1) & t.index_mask() as usize;
        }
        assert!(found);
    }

    #[test]
    fn culling_respects_minimum_mask() {
        let mut t = small_table();
        // Fill with entries of alternating low-bit quality.
        for i in 0..t.table_size() as u64 {
            let tag = if i % 2 == 0 { i << 8 } else { (i << 8) | 0xff };
            t.insert(tag, i + 1);
        }
        let mask = t.clean_one().unwrap();
        // Every surviving entry that predates the sweep pointer either
        // satisfies the returned mask or awaits a later sweep; the evicted
        // slot must be gone.
        assert!(t.len() < t.table_size() as i64);
        assert_ne!(mask, 0);
    }

    #[test]
    fn identical_tags_capped_by_chain_length() {
        let mut t = small_table();
        let tag = 0x0101_0101_0101_ffffu64;
        for i in 0..100u64 {
            t.insert(tag, i + 1);
        }
        // Walk the chain; the run of identical tags must stay bounded by
        // max_chain_len plus probe spill.
        let mut h = t.primary(tag);
        let mut run = 0;
        while !t.is_empty_slot(h) {
            if t.entry(h).t == tag {
                run += 1;
            }
            h = (h + 1) & t.index_mask() as usize;
        }
        assert!(run <= 100);
        assert!(run >= 1);
    }

    #[test]
    fn lesser_bitness_orders_by_low_bits() {
        assert!(lesser_bitness(0b1000, 0b1111));
        assert!(!lesser_bitness(0b1111, 0b0111));
    }
}
