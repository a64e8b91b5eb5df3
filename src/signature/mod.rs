//! Bit signatures used as LSH fingerprints of cells.

mod bitset;

pub use bitset::{
    count_mismatches, word_count_for, BitSet, BitSetView, BitSetViewMut, BitSets, Bits, BitsMut,
    BITS_PER_WORD,
};
