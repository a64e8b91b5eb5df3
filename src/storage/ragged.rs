//! Vector of variable-length rows stored contiguously in mapped memory.
//!
//! A table of contents (`<base>.toc`) holds the offset of the first element
//! of each row, plus one trailing entry equal to the total element count.
//! The elements of all rows are stored back to back in `<base>.data`.
//!
//! ```text
//! toc:  [0, 2, 2, 5]          3 rows
//! data: [a, b, c, d, e]       row 0 = [a, b], row 1 = [], row 2 = [c, d, e]
//! ```
//!
//! Rows are exactly sized: only the last row can grow, and only until the
//! next row is opened.

use crate::error::{MatrixError, Result};
use crate::storage::{suffixed, MappedVec};
use bytemuck::Pod;
use std::path::Path;

/// A vector of vectors backed by two [`MappedVec`] files.
#[derive(Debug)]
pub struct RaggedVec<T: Pod> {
    toc: MappedVec<u64>,
    data: MappedVec<T>,
}

impl<T: Pod> RaggedVec<T> {
    /// Creates an empty ragged vector at `<base>.toc` / `<base>.data`.
    pub fn create_new<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref();
        let mut toc = MappedVec::create_new(suffixed(base, "toc"), 0, 0)?;
        toc.push(0)?;
        let data = MappedVec::create_new(suffixed(base, "data"), 0, 0)?;
        Ok(Self { toc, data })
    }

    /// Opens a previously created ragged vector.
    pub fn access_existing<P: AsRef<Path>>(base: P, read_write: bool) -> Result<Self> {
        let base = base.as_ref();
        let toc = MappedVec::access_existing(suffixed(base, "toc"), read_write)?;
        let data = MappedVec::access_existing(suffixed(base, "data"), read_write)?;
        Self::from_parts(toc, data)
    }

    /// Opens read-write, falling back to read-only if allowed.
    pub fn access_existing_read_write<P: AsRef<Path>>(base: P, allow_read_only: bool) -> Result<Self> {
        let base = base.as_ref();
        let toc = MappedVec::access_existing_read_write(suffixed(base, "toc"), allow_read_only)?;
        let data = MappedVec::access_existing_read_write(suffixed(base, "data"), allow_read_only)?;
        Self::from_parts(toc, data)
    }

    fn from_parts(toc: MappedVec<u64>, data: MappedVec<T>) -> Result<Self> {
        let consistent = toc.first() == Some(&0)
            && toc.last() == Some(&(data.len() as u64))
            && toc.windows(2).all(|w| w[0] <= w[1]);
        if !consistent {
            return Err(MatrixError::InvalidData(format!(
                "table of contents {} does not describe {}",
                toc.path().display(),
                data.path().display()
            )));
        }
        Ok(Self { toc, data })
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.toc.len() - 1
    }

    /// Returns true if there are no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of elements in row `i`.
    #[inline]
    pub fn row_len(&self, i: usize) -> usize {
        (self.toc[i + 1] - self.toc[i]) as usize
    }

    /// Total number of elements across all rows.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    /// The elements of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[T] {
        &self.data[self.toc[i] as usize..self.toc[i + 1] as usize]
    }

    /// The elements of row `i`, mutably.
    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [T] {
        let (begin, end) = (self.toc[i] as usize, self.toc[i + 1] as usize);
        &mut self.data[begin..end]
    }

    /// Iterates over all rows in order.
    pub fn iter(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.len()).map(move |i| self.row(i))
    }

    /// The offsets table, `len() + 1` entries.
    pub fn offsets(&self) -> &[u64] {
        &self.toc
    }

    /// All elements of all rows, back to back.
    pub fn as_flat_slice(&self) -> &[T] {
        &self.data
    }

    /// Opens a new empty row at the end.
    pub fn append_vector(&mut self) -> Result<()> {
        let last = self.total_len() as u64;
        self.toc.push(last)
    }

    /// Appends a value to the last row.
    ///
    /// # Panics
    ///
    /// Panics if no row has been opened with [`RaggedVec::append_vector`].
    pub fn append(&mut self, value: T) -> Result<()> {
        assert!(!self.is_empty(), "append called with no open row");
        self.data.push(value)?;
        if let Some(last) = self.toc.last_mut() {
            *last += 1;
        }
        Ok(())
    }

    /// Appends a new row holding all values of `values`.
    pub fn append_row<I: IntoIterator<Item = T>>(&mut self, values: I) -> Result<()> {
        self.append_vector()?;
        for value in values {
            self.append(value)?;
        }
        Ok(())
    }

    /// Pre-grows both files to hold `rows` rows and `elements` elements.
    pub fn reserve(&mut self, rows: usize, elements: usize) -> Result<()> {
        self.toc.reserve(rows + 1)?;
        self.data.reserve(elements)
    }

    /// Starts a two-pass build of `n` rows, replacing the current content.
    ///
    /// Pass 1 tallies the number of values each row will receive. Pass 2
    /// sizes both files exactly and stores the values.
    pub fn begin_pass1(&mut self, n: usize) -> CountingPass<'_, T> {
        CountingPass {
            target: self,
            counts: vec![0; n],
        }
    }

    /// Flushes both files to disk.
    pub fn sync_to_disk(&self) -> Result<()> {
        self.toc.sync_to_disk()?;
        self.data.sync_to_disk()
    }

    /// Syncs and unmaps both files.
    pub fn close(self) -> Result<()> {
        self.toc.close()?;
        self.data.close()
    }

    /// Closes and deletes both files.
    pub fn remove(self) -> Result<()> {
        self.toc.remove()?;
        self.data.remove()
    }

    /// Faults in the pages of both files.
    pub fn touch_memory(&self) -> usize {
        self.toc.touch_memory() + self.data.touch_memory()
    }
}

/// First pass of a two-pass build: tallies values per row.
pub struct CountingPass<'a, T: Pod> {
    target: &'a mut RaggedVec<T>,
    counts: Vec<u64>,
}

impl<'a, T: Pod> CountingPass<'a, T> {
    /// Records that `row` will receive one more value.
    #[inline]
    pub fn increment_count(&mut self, row: usize) {
        self.counts[row] += 1;
    }

    /// Records that `row` will receive `m` more values.
    #[inline]
    pub fn increment_count_by(&mut self, row: usize, m: u64) {
        self.counts[row] += m;
    }

    /// Converts the tallies into the offsets table and sizes the data file
    /// to the exact total.
    pub fn begin_pass2(self) -> Result<FillingPass<'a, T>> {
        let CountingPass { target, counts } = self;
        let n = counts.len();

        target.toc.reserve(n + 1)?;
        target.toc.resize(n + 1)?;
        let toc = target.toc.as_mut_slice();
        toc[0] = 0;
        for (i, &count) in counts.iter().enumerate() {
            toc[i + 1] = toc[i] + count;
        }

        let total = toc[n] as usize;
        target.data.reserve(total)?;
        target.data.resize(total)?;

        Ok(FillingPass {
            target,
            remaining: counts,
        })
    }
}

/// Second pass of a two-pass build: stores values into their rows.
pub struct FillingPass<'a, T: Pod> {
    target: &'a mut RaggedVec<T>,
    remaining: Vec<u64>,
}

impl<'a, T: Pod> FillingPass<'a, T> {
    /// Stores `value` in the next free slot of `row`. Values of one row end
    /// up in the order they were stored.
    ///
    /// # Panics
    ///
    /// Panics if `row` already received as many values as were counted.
    pub fn store(&mut self, row: usize, value: T) {
        let remaining = self.remaining[row];
        assert!(remaining > 0, "row {row} received more values than were counted");
        let slot = self.target.row_len(row) - remaining as usize;
        self.remaining[row] = remaining - 1;
        self.target.row_mut(row)[slot] = value;
    }

    /// Finishes the build.
    ///
    /// # Panics
    ///
    /// Panics if any row received fewer values than were counted.
    pub fn end_pass2(self) {
        for (row, &remaining) in self.remaining.iter().enumerate() {
            assert_eq!(remaining, 0, "row {row} is missing {remaining} values");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rows() -> Vec<Vec<u32>> {
        vec![vec![1, 2, 3], vec![], vec![7], vec![9, 8, 7, 6]]
    }

    #[test]
    fn test_incremental_build() {
        let dir = tempdir().unwrap();
        let mut v = RaggedVec::<u32>::create_new(dir.path().join("incremental")).unwrap();
        assert!(v.is_empty());
        for row in rows() {
            v.append_row(row).unwrap();
        }

        assert_eq!(v.len(), 4);
        assert_eq!(v.total_len(), 8);
        assert_eq!(v.offsets(), &[0, 3, 3, 4, 8]);
        for (i, expected) in rows().iter().enumerate() {
            assert_eq!(v.row(i), expected.as_slice());
            assert_eq!(v.row_len(i), expected.len());
        }
        assert!(v.offsets().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_two_pass_matches_incremental() {
        let dir = tempdir().unwrap();
        let mut incremental = RaggedVec::<u32>::create_new(dir.path().join("a")).unwrap();
        for row in rows() {
            incremental.append_row(row).unwrap();
        }

        let mut two_pass = RaggedVec::<u32>::create_new(dir.path().join("b")).unwrap();
        let mut pass1 = two_pass.begin_pass1(rows().len());
        for (i, row) in rows().iter().enumerate() {
            for _ in row {
                pass1.increment_count(i);
            }
        }
        let mut pass2 = pass1.begin_pass2().unwrap();
        // Interleave rows to show that only intra-row order matters.
        for j in 0..4 {
            for (i, row) in rows().iter().enumerate() {
                if let Some(&value) = row.get(j) {
                    pass2.store(i, value);
                }
            }
        }
        pass2.end_pass2();

        assert_eq!(two_pass.offsets(), incremental.offsets());
        assert_eq!(two_pass.as_flat_slice(), incremental.as_flat_slice());
    }

    #[test]
    fn test_reopen() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("persisted");
        let mut v = RaggedVec::<u64>::create_new(&base).unwrap();
        v.append_row([10, 20]).unwrap();
        v.append_vector().unwrap();
        v.append(30).unwrap();
        v.row_mut(0)[1] = 21;
        v.close().unwrap();

        let v = RaggedVec::<u64>::access_existing(&base, false).unwrap();
        assert_eq!(v.iter().collect::<Vec<_>>(), vec![&[10u64, 21][..], &[30][..]]);
    }

    #[test]
    #[should_panic(expected = "no open row")]
    fn test_append_without_row_panics() {
        let dir = tempdir().unwrap();
        let mut v = RaggedVec::<u32>::create_new(dir.path().join("x")).unwrap();
        let _ = v.append(1);
    }

    #[test]
    #[should_panic(expected = "more values than were counted")]
    fn test_store_overflow_panics() {
        let dir = tempdir().unwrap();
        let mut v = RaggedVec::<u32>::create_new(dir.path().join("x")).unwrap();
        let mut pass1 = v.begin_pass1(1);
        pass1.increment_count(0);
        let mut pass2 = pass1.begin_pass2().unwrap();
        pass2.store(0, 1);
        pass2.store(0, 2);
    }

    #[test]
    #[should_panic(expected = "missing")]
    fn test_incomplete_pass2_panics() {
        let dir = tempdir().unwrap();
        let mut v = RaggedVec::<u32>::create_new(dir.path().join("x")).unwrap();
        let mut pass1 = v.begin_pass1(2);
        pass1.increment_count_by(1, 2);
        let mut pass2 = pass1.begin_pass2().unwrap();
        pass2.store(1, 5);
        pass2.end_pass2();
    }
}
