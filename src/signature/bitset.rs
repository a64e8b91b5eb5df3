//! Fixed-width bit vectors packed into 64-bit words.
//!
//! Bit `i` lives in word `i / 64` at position `63 - i % 64`, so the first bit
//! of a signature is the most significant bit of its first word. Comparing two
//! word arrays as unsigned integers is then the same as comparing the bit
//! strings lexicographically.

use std::fmt;

/// Number of bits in one storage word.
pub const BITS_PER_WORD: usize = 64;

/// Number of words needed to store `bit_count` bits.
#[inline]
pub fn word_count_for(bit_count: usize) -> usize {
    bit_count.div_ceil(BITS_PER_WORD)
}

#[inline]
fn locate(bit: usize) -> (usize, u64) {
    (bit / BITS_PER_WORD, 1u64 << (63 - bit % BITS_PER_WORD))
}

/// Number of differing bits between two equal-length word arrays.
#[inline]
pub fn count_mismatches(a: &[u64], b: &[u64]) -> usize {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| (x ^ y).count_ones() as usize)
        .sum()
}

/// Read access to a packed bit vector.
pub trait Bits {
    /// The underlying words.
    fn words(&self) -> &[u64];

    /// Returns bit `bit`.
    #[inline]
    fn get(&self, bit: usize) -> bool {
        let (word, mask) = locate(bit);
        self.words()[word] & mask != 0
    }

    /// Packs the bits at `positions` into an integer, the first position
    /// ending up most significant.
    fn get_bits(&self, positions: &[usize]) -> u64 {
        assert!(positions.len() <= BITS_PER_WORD, "at most 64 positions can be packed");
        positions
            .iter()
            .fold(0u64, |acc, &bit| (acc << 1) | u64::from(self.get(bit)))
    }

    /// Number of set bits.
    fn count_ones(&self) -> usize {
        self.words().iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Hamming distance to `other`. Both must have the same word count.
    #[inline]
    fn count_mismatches<B: Bits + ?Sized>(&self, other: &B) -> usize {
        count_mismatches(self.words(), other.words())
    }

    /// Renders the first `bit_count` bits, `x` for set and `_` for clear.
    fn to_bit_string(&self, bit_count: usize) -> String {
        (0..bit_count)
            .map(|bit| if self.get(bit) { 'x' } else { '_' })
            .collect()
    }

    /// Clears `dest`, then sets `dest[i] = self[permutation[i]]` for every i.
    fn permute_bits<D: BitsMut + ?Sized>(&self, permutation: &[usize], dest: &mut D) {
        dest.words_mut().fill(0);
        for (i, &source) in permutation.iter().enumerate() {
            if self.get(source) {
                dest.set(i);
            }
        }
    }
}

/// Write access to a packed bit vector.
pub trait BitsMut: Bits {
    /// The underlying words, mutably.
    fn words_mut(&mut self) -> &mut [u64];

    /// Sets bit `bit` to 1.
    #[inline]
    fn set(&mut self, bit: usize) {
        let (word, mask) = locate(bit);
        self.words_mut()[word] |= mask;
    }

    /// Sets bit `bit` to 0.
    #[inline]
    fn clear(&mut self, bit: usize) {
        let (word, mask) = locate(bit);
        self.words_mut()[word] &= !mask;
    }

    /// Sets bit `bit` to `value`.
    #[inline]
    fn assign(&mut self, bit: usize, value: bool) {
        if value {
            self.set(bit)
        } else {
            self.clear(bit)
        }
    }
}

/// An owned bit vector.
///
/// Ordering compares words as unsigned integers, which is lexicographic
/// order on the bit strings.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    /// Creates a bit vector of at least `bit_count` bits, all clear.
    pub fn new(bit_count: usize) -> Self {
        assert!(bit_count > 0, "a bit set needs at least one bit");
        Self {
            words: vec![0; word_count_for(bit_count)],
        }
    }

    /// Wraps an existing word array.
    pub fn from_words(words: Vec<u64>) -> Self {
        Self { words }
    }

    /// Number of words.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

impl Bits for BitSet {
    #[inline]
    fn words(&self) -> &[u64] {
        &self.words
    }
}

impl BitsMut for BitSet {
    #[inline]
    fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitSet({})", self.to_bit_string(self.words.len() * BITS_PER_WORD))
    }
}

/// A borrowed bit vector, typically one signature inside a [`BitSets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitSetView<'a> {
    words: &'a [u64],
}

impl<'a> BitSetView<'a> {
    /// Views `words` as a bit vector.
    pub fn new(words: &'a [u64]) -> Self {
        Self { words }
    }

    /// Copies into an owned [`BitSet`].
    pub fn to_bit_set(&self) -> BitSet {
        BitSet::from_words(self.words.to_vec())
    }
}

impl Bits for BitSetView<'_> {
    #[inline]
    fn words(&self) -> &[u64] {
        self.words
    }
}

/// A mutably borrowed bit vector.
#[derive(Debug)]
pub struct BitSetViewMut<'a> {
    words: &'a mut [u64],
}

impl<'a> BitSetViewMut<'a> {
    /// Views `words` as a mutable bit vector.
    pub fn new(words: &'a mut [u64]) -> Self {
        Self { words }
    }
}

impl Bits for BitSetViewMut<'_> {
    #[inline]
    fn words(&self) -> &[u64] {
        &*self.words
    }
}

impl BitsMut for BitSetViewMut<'_> {
    #[inline]
    fn words_mut(&mut self) -> &mut [u64] {
        &mut *self.words
    }
}

/// Many bit vectors of the same width stored in one contiguous word array.
#[derive(Clone, PartialEq, Eq)]
pub struct BitSets {
    bit_count: usize,
    word_count: usize,
    words: Vec<u64>,
}

impl BitSets {
    /// Creates `n` bit vectors of `bit_count` bits each, all clear.
    pub fn new(n: usize, bit_count: usize) -> Self {
        assert!(bit_count > 0, "a bit set needs at least one bit");
        let word_count = word_count_for(bit_count);
        Self {
            bit_count,
            word_count,
            words: vec![0; n * word_count],
        }
    }

    /// Wraps a word array holding `words.len() / word_count_for(bit_count)`
    /// bit vectors.
    pub fn from_words(bit_count: usize, words: Vec<u64>) -> Self {
        assert!(bit_count > 0, "a bit set needs at least one bit");
        let word_count = word_count_for(bit_count);
        assert_eq!(words.len() % word_count, 0, "word array is not a whole number of bit sets");
        Self {
            bit_count,
            word_count,
            words,
        }
    }

    /// Number of bit vectors.
    pub fn len(&self) -> usize {
        self.words.len() / self.word_count
    }

    /// Returns true if there are no bit vectors.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Bits per vector.
    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    /// Words per vector.
    pub fn word_count(&self) -> usize {
        self.word_count
    }

    /// Vector `i`.
    #[inline]
    pub fn get(&self, i: usize) -> BitSetView<'_> {
        BitSetView::new(&self.words[i * self.word_count..(i + 1) * self.word_count])
    }

    /// Vector `i`, mutably.
    #[inline]
    pub fn get_mut(&mut self, i: usize) -> BitSetViewMut<'_> {
        let word_count = self.word_count;
        BitSetViewMut::new(&mut self.words[i * word_count..(i + 1) * word_count])
    }

    /// Iterates over all vectors in order.
    pub fn iter(&self) -> impl Iterator<Item = BitSetView<'_>> + '_ {
        self.words.chunks_exact(self.word_count).map(BitSetView::new)
    }

    /// The whole word array.
    pub fn as_words(&self) -> &[u64] {
        &self.words
    }

    pub(crate) fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }
}

impl fmt::Debug for BitSets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitSets")
            .field("len", &self.len())
            .field("bit_count", &self.bit_count)
            .finish()
    }
}
