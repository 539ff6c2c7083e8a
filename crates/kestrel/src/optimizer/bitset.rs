//! Fixed-size bitset over register indices.
//!
//! Used for definedness sets during liveness analysis and for the free-slot
//! map of the register allocator. Out-of-range indices read as clear and are
//! ignored on write, so callers never need to bounds-check first.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    #[must_use]
    pub fn new_empty(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    #[must_use]
    pub fn new_full(len: usize) -> Self {
        let mut s = Self {
            words: vec![!0; len.div_ceil(64)],
            len,
        };
        // Unused high bits of the last word stay clear.
        let rem = len % 64;
        if rem != 0 {
            if let Some(last) = s.words.last_mut() {
                *last &= (1_u64 << rem) - 1;
            }
        }
        s
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    pub fn set(&mut self, idx: usize) {
        if idx < self.len {
            self.words[idx / 64] |= 1_u64 << (idx % 64);
        }
    }

    pub fn clear(&mut self, idx: usize) {
        if idx < self.len {
            self.words[idx / 64] &= !(1_u64 << (idx % 64));
        }
    }

    pub fn intersect_with(&mut self, other: &Self) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= *b;
        }
    }

    /// Lowest clear index, if any.
    pub fn first_clear(&self) -> Option<usize> {
        self.words.iter().enumerate().find_map(|(w, word)| {
            let idx = w * 64 + (!word).trailing_zeros() as usize;
            (*word != !0 && idx < self.len).then_some(idx)
        })
    }
}


// ============================================================================
// Kani Formal Verification Proofs
// ============================================================================
//
// Run with: cargo kani -p kestrel
//
// The proofs establish that:
// - get/set/clear never panic for any index
// - first_clear only ever reports an in-range clear bit
// - new_full never sets bits past len

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: set/get/clear never panic and agree with each other.
    #[kani::proof]
    #[kani::unwind(3)]
    fn set_get_clear_never_panic() {
        let mut s = BitSet::new_empty(100);
        let idx: usize = kani::any();
        s.set(idx);
        kani::assert(s.get(idx) == (idx < 100), "set bit reads back iff in range");
        s.clear(idx);
        kani::assert(!s.get(idx), "cleared bit reads clear");
    }

    /// Proof: first_clear returns an in-range clear bit.
    #[kani::proof]
    #[kani::unwind(3)]
    fn first_clear_is_clear_and_in_range() {
        let len: usize = kani::any();
        kani::assume(len <= 128);
        let mut s = BitSet::new_empty(len);
        let a: usize = kani::any();
        let b: usize = kani::any();
        s.set(a);
        s.set(b);
        if let Some(idx) = s.first_clear() {
            kani::assert(idx < len, "first_clear in range");
            kani::assert(!s.get(idx), "first_clear is clear");
        }
    }

    /// Proof: new_full sets exactly len bits.
    #[kani::proof]
    #[kani::unwind(3)]
    fn new_full_respects_len() {
        let len: usize = kani::any();
        kani::assume(len <= 128);
        let s = BitSet::new_full(len);
        let idx: usize = kani::any();
        kani::assert(s.get(idx) == (idx < len), "bits set exactly below len");
    }
}
