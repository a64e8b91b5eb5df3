//! Growable array of fixed-size records backed by a memory-mapped file.
//!
//! The file is always a whole number of pages. Growing past the current
//! capacity truncates the file to a larger size and maps it again, which moves
//! the base address: slices borrowed from a [`MappedVec`] cannot outlive a
//! call to [`MappedVec::resize`], [`MappedVec::push`] or [`MappedVec::reserve`],
//! and the borrow checker enforces that.
//!
//! ## Format Layout
//!
//! ```text
//! +----------------------------+
//! | Header (256 bytes)         |
//! +----------------------------+
//! | Elements                   |
//! | (capacity * element size)  |
//! +----------------------------+
//! | Zero fill to page boundary |
//! +----------------------------+
//! ```
//!
//! ### Header (256 bytes, u64 fields in host byte order, like the elements)
//! - Header size (always 256)
//! - Element size in bytes
//! - Element count
//! - Page count
//! - File size (page count * 4096)
//! - Capacity in elements
//! - Magic number
//! - Padding

use crate::error::{MatrixError, Result};
use bytemuck::{Pod, Zeroable};
use log::{debug, warn};
use memmap2::{Mmap, MmapMut};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

/// Page size assumed for all mapped files.
pub const PAGE_SIZE: usize = 4096;

/// Magic number stored in every mapped file header.
pub const MAGIC_NUMBER: u64 = 0xa375_6fd4_b5d8_bcc1;

/// Header size in bytes. Elements start right after it.
const HEADER_SIZE: usize = 256;

/// Capacity multiplier applied when a resize outgrows the file.
const GROWTH_FACTOR: f64 = 1.5;

/// Header stored at the beginning of every mapped file.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MappedHeader {
    /// Size of this header in bytes.
    pub header_size: u64,
    /// Size of one element in bytes.
    pub object_size: u64,
    /// Number of elements currently stored.
    pub object_count: u64,
    /// Number of pages in the file.
    pub page_count: u64,
    /// Total file size in bytes.
    pub file_size: u64,
    /// Number of elements the file can hold.
    pub capacity: u64,
    /// Always [`MAGIC_NUMBER`].
    pub magic_number: u64,
    padding: [u64; 25],
}

impl MappedHeader {
    /// Header for `n` elements and at least `requested_capacity` slots,
    /// rounded up to the next page boundary.
    fn new(object_size: usize, n: usize, requested_capacity: usize) -> Self {
        assert!(requested_capacity >= n, "capacity {requested_capacity} < size {n}");
        let page_count = page_count(HEADER_SIZE + object_size * requested_capacity);
        let file_size = page_count * PAGE_SIZE;
        Self {
            header_size: HEADER_SIZE as u64,
            object_size: object_size as u64,
            object_count: n as u64,
            page_count: page_count as u64,
            file_size: file_size as u64,
            capacity: ((file_size - HEADER_SIZE) / object_size) as u64,
            magic_number: MAGIC_NUMBER,
            padding: [0; 25],
        }
    }
}

const _: () = assert!(size_of::<MappedHeader>() == HEADER_SIZE);

/// Number of pages needed to hold `bytes` bytes.
#[inline]
fn page_count(bytes: usize) -> usize {
    (bytes.max(1) - 1) / PAGE_SIZE + 1
}

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(m) => &m[..],
            Mapping::ReadWrite(m) => &m[..],
        }
    }

    fn flush(&self) -> std::io::Result<()> {
        match self {
            Mapping::ReadOnly(_) => Ok(()),
            Mapping::ReadWrite(m) => m.flush(),
        }
    }
}

/// A vector of plain-old-data records stored in a memory-mapped file.
///
/// Only one writer may use a given file at a time. Readers in other
/// processes see a consistent state only after [`MappedVec::sync_to_disk`].
pub struct MappedVec<T: Pod> {
    mapping: Mapping,
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: Pod> MappedVec<T> {
    /// Creates a new file holding `n` zero-initialized elements and room for
    /// at least `required_capacity` elements. An existing file is truncated.
    pub fn create_new<P: AsRef<Path>>(path: P, n: usize, required_capacity: usize) -> Result<Self> {
        assert!(size_of::<T>() > 0, "zero-sized elements cannot be mapped");
        let path = path.as_ref().to_path_buf();
        let header = MappedHeader::new(size_of::<T>(), n, required_capacity.max(n));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| MatrixError::mapping(&path, e))?;
        file.set_len(header.file_size)
            .map_err(|e| MatrixError::mapping(&path, e))?;

        // A freshly truncated file is all zeros, so the first n elements are
        // already zero-initialized.
        let mut mmap = map_read_write(&file, &path)?;
        mmap[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));

        Ok(Self {
            mapping: Mapping::ReadWrite(mmap),
            path,
            _marker: PhantomData,
        })
    }

    /// Opens a previously created file, validating its header against `T`.
    pub fn access_existing<P: AsRef<Path>>(path: P, read_write: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(read_write)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => MatrixError::FileNotFound(path.clone()),
                _ => MatrixError::mapping(&path, e),
            })?;

        let file_size = file
            .metadata()
            .map_err(|e| MatrixError::mapping(&path, e))?
            .len();
        if (file_size as usize) < HEADER_SIZE {
            return Err(MatrixError::invalid_header(&path, "file too small"));
        }

        let mapping = if read_write {
            Mapping::ReadWrite(map_read_write(&file, &path)?)
        } else {
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| MatrixError::mapping(&path, e))?;
            Mapping::ReadOnly(mmap)
        };

        let vec = Self {
            mapping,
            path,
            _marker: PhantomData,
        };
        vec.validate_header(file_size)?;
        Ok(vec)
    }

    /// Opens a previously created file with read-only access.
    pub fn access_existing_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::access_existing(path, false)
    }

    /// Opens a previously created file with read-write access. If that fails
    /// and `allow_read_only` is set, falls back to read-only access.
    pub fn access_existing_read_write<P: AsRef<Path>>(path: P, allow_read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        match Self::access_existing(path, true) {
            Err(MatrixError::Mapping { .. }) if allow_read_only => {
                warn!("{} was opened read-only, writes will panic", path.display());
                Self::access_existing(path, false)
            }
            other => other,
        }
    }

    fn validate_header(&self, file_size: u64) -> Result<()> {
        let header = self.header();
        if header.magic_number != MAGIC_NUMBER {
            return Err(MatrixError::invalid_header(&self.path, "bad magic number"));
        }
        if header.header_size != HEADER_SIZE as u64 {
            return Err(MatrixError::invalid_header(
                &self.path,
                format!("header size {} != {}", header.header_size, HEADER_SIZE),
            ));
        }
        if header.object_size != size_of::<T>() as u64 {
            return Err(MatrixError::invalid_header(
                &self.path,
                format!(
                    "element size {} does not match expected {}",
                    header.object_size,
                    size_of::<T>()
                ),
            ));
        }
        if header.file_size != file_size || file_size % PAGE_SIZE as u64 != 0 {
            return Err(MatrixError::invalid_header(
                &self.path,
                format!("recorded file size {} != actual {}", header.file_size, file_size),
            ));
        }
        if header.object_count > header.capacity
            || HEADER_SIZE as u64 + header.capacity * header.object_size > file_size
        {
            return Err(MatrixError::invalid_header(
                &self.path,
                format!(
                    "count {} and capacity {} do not fit in {} bytes",
                    header.object_count, header.capacity, file_size
                ),
            ));
        }
        Ok(())
    }

    /// Returns the header of the mapped file.
    #[inline]
    pub fn header(&self) -> &MappedHeader {
        bytemuck::from_bytes(&self.mapping.bytes()[..HEADER_SIZE])
    }

    fn header_mut(&mut self) -> &mut MappedHeader {
        bytemuck::from_bytes_mut(&mut self.writable_bytes()[..HEADER_SIZE])
    }

    fn writable_bytes(&mut self) -> &mut [u8] {
        match &mut self.mapping {
            Mapping::ReadWrite(m) => &mut m[..],
            Mapping::ReadOnly(_) => panic!("{} is mapped read-only", self.path.display()),
        }
    }

    /// Number of stored elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.header().object_count as usize
    }

    /// Returns true if no elements are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of elements that fit without remapping.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.header().capacity as usize
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the file was opened with write access.
    pub fn is_writable(&self) -> bool {
        matches!(self.mapping, Mapping::ReadWrite(_))
    }

    /// The stored elements.
    pub fn as_slice(&self) -> &[T] {
        let end = HEADER_SIZE + self.len() * size_of::<T>();
        bytemuck::cast_slice(&self.mapping.bytes()[HEADER_SIZE..end])
    }

    /// The stored elements, mutably.
    ///
    /// # Panics
    ///
    /// Panics if the file was opened read-only.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let end = HEADER_SIZE + self.len() * size_of::<T>();
        bytemuck::cast_slice_mut(&mut self.writable_bytes()[HEADER_SIZE..end])
    }

    /// Resizes to `new_len` elements.
    ///
    /// Shrinking only lowers the element count. Growing within capacity
    /// zero-initializes the new slots in place. Growing beyond capacity
    /// remaps the file with about 1.5 times the requested size.
    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        let old_len = self.len();
        if new_len > self.capacity() {
            let capacity = (GROWTH_FACTOR * new_len as f64) as usize;
            self.remap(old_len, capacity.max(new_len))?;
        }
        self.header_mut().object_count = new_len as u64;
        if new_len > old_len {
            self.as_mut_slice()[old_len..].fill(T::zeroed());
        }
        Ok(())
    }

    /// Appends one element.
    pub fn push(&mut self, value: T) -> Result<()> {
        let n = self.len();
        self.resize(n + 1)?;
        self.as_mut_slice()[n] = value;
        Ok(())
    }

    /// Removes and returns the last element.
    pub fn pop(&mut self) -> Option<T> {
        let value = self.as_slice().last().copied()?;
        self.header_mut().object_count -= 1;
        Some(value)
    }

    /// Grows the backing file so that at least `capacity` elements fit,
    /// without changing the element count. Never shrinks.
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        if capacity <= self.capacity() {
            return Ok(());
        }
        let len = self.len();
        self.remap(len, capacity)
    }

    /// Shrinks the backing file to the smallest page-rounded size holding
    /// the current elements.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        let len = self.len();
        if MappedHeader::new(size_of::<T>(), len, len).capacity == self.header().capacity {
            return Ok(());
        }
        self.remap(len, len)
    }

    fn remap(&mut self, len: usize, capacity: usize) -> Result<()> {
        assert!(self.is_writable(), "{} is mapped read-only", self.path.display());
        self.sync_to_disk()?;

        let header = MappedHeader::new(size_of::<T>(), len, capacity);
        debug!(
            "Remapping {} to {} elements ({} bytes)",
            self.path.display(),
            header.capacity,
            header.file_size
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| MatrixError::mapping(&self.path, e))?;
        file.set_len(header.file_size)
            .map_err(|e| MatrixError::mapping(&self.path, e))?;
        let mut mmap = map_read_write(&file, &self.path)?;
        mmap[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        self.mapping = Mapping::ReadWrite(mmap);
        Ok(())
    }

    /// Flushes all changes to disk.
    pub fn sync_to_disk(&self) -> Result<()> {
        self.mapping
            .flush()
            .map_err(|e| MatrixError::mapping(&self.path, e))
    }

    /// Syncs to disk and unmaps.
    pub fn close(self) -> Result<()> {
        self.sync_to_disk()
    }

    /// Closes and deletes the backing file.
    pub fn remove(self) -> Result<()> {
        let path = self.path.clone();
        self.close()?;
        fs::remove_file(&path).map_err(|e| MatrixError::mapping(&path, e))
    }

    /// Creates a new mapped file at `path` with the same elements.
    pub fn make_copy<P: AsRef<Path>>(&self, path: P) -> Result<MappedVec<T>> {
        let mut copy = MappedVec::create_new(path, self.len(), self.len())?;
        copy.as_mut_slice().copy_from_slice(self.as_slice());
        Ok(copy)
    }

    /// Reads one byte per page so the whole mapping is resident.
    /// The return value only exists to keep the reads from being optimized out.
    pub fn touch_memory(&self) -> usize {
        self.mapping
            .bytes()
            .iter()
            .step_by(PAGE_SIZE)
            .map(|&b| b as usize)
            .sum()
    }
}

fn map_read_write(file: &File, path: &Path) -> Result<MmapMut> {
    unsafe { MmapMut::map_mut(file) }.map_err(|e| MatrixError::mapping(path, e))
}

impl<T: Pod> Deref for MappedVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Pod> DerefMut for MappedVec<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Pod + PartialEq> PartialEq for MappedVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Pod> fmt::Debug for MappedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedVec")
            .field("path", &self.path)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("writable", &self.is_writable())
            .finish()
    }
}

impl<T: Pod> Drop for MappedVec<T> {
    fn drop(&mut self) {
        if let Err(e) = self.mapping.flush() {
            warn!("Failed to sync {}: {}", self.path.display(), e);
        }
    }
}
