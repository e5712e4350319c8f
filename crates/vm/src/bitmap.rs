//! Fixed-size bitmap for slot accounting.

use alloc::vec::Vec;

const BITS_PER_WORD: usize = u64::BITS as usize;

/// A fixed-size set of bits, one per slot. A set bit means the slot is in use.
#[derive(Debug, Clone)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
    set: usize,
}

impl Bitmap {
    /// Creates a bitmap of `len` clear bits.
    pub fn new(len: usize) -> Self {
        Self {
            words: alloc::vec![0; len.div_ceil(BITS_PER_WORD)],
            len,
            set: 0,
        }
    }

    /// Number of bits in the bitmap.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of set bits.
    pub fn count_set(&self) -> usize {
        self.set
    }

    /// Returns the value of bit `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.len, "bit index out of range");
        self.words[index / BITS_PER_WORD] & (1 << (index % BITS_PER_WORD)) != 0
    }

    /// Finds the lowest clear bit, sets it and returns its index.
    pub fn scan_and_set(&mut self) -> Option<usize> {
        for (word_index, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let index = word_index * BITS_PER_WORD + bit;
            if index >= self.len {
                return None;
            }
            *word |= 1 << bit;
            self.set += 1;
            return Some(index);
        }
        None
    }

    /// Clears bit `index`, returning its previous value.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn clear(&mut self, index: usize) -> bool {
        let was_set = self.test(index);
        if was_set {
            self.words[index / BITS_PER_WORD] &= !(1 << (index % BITS_PER_WORD));
            self.set -= 1;
        }
        was_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_lowest_clear_bit() {
        let mut bitmap = Bitmap::new(130);
        assert_eq!(bitmap.scan_and_set(), Some(0));
        assert_eq!(bitmap.scan_and_set(), Some(1));
        assert!(bitmap.clear(0));
        assert_eq!(bitmap.scan_and_set(), Some(0));
        assert_eq!(bitmap.count_set(), 2);
    }

    #[test]
    fn crosses_word_boundaries() {
        let mut bitmap = Bitmap::new(70);
        for expected in 0..70 {
            assert_eq!(bitmap.scan_and_set(), Some(expected));
        }
        assert_eq!(bitmap.scan_and_set(), None);
        assert!(bitmap.test(69));
    }

    #[test]
    fn clear_is_idempotent() {
        let mut bitmap = Bitmap::new(8);
        bitmap.scan_and_set();
        assert!(bitmap.clear(0));
        assert!(!bitmap.clear(0));
        assert_eq!(bitmap.count_set(), 0);
    }

    #[test]
    fn empty_bitmap_is_full() {
        let mut bitmap = Bitmap::new(0);
        assert_eq!(bitmap.scan_and_set(), None);
    }

    #[test]
    #[should_panic(expected = "bit index out of range")]
    fn out_of_range() {
        Bitmap::new(8).test(8);
    }
}
