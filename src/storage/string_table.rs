//! Persistent table of unique names with dense ids.

use crate::error::{MatrixError, Result};
use crate::storage::RaggedVec;
use std::collections::HashMap;
use std::path::Path;

/// Names stored as UTF-8 rows of a [`RaggedVec<u8>`], with an in-memory
/// reverse index rebuilt on open.
///
/// Ids are assigned in insertion order starting at 0 and never change.
#[derive(Debug)]
pub struct StringTable {
    strings: RaggedVec<u8>,
    ids: HashMap<String, u32>,
}

impl StringTable {
    /// Creates an empty table at `<base>.toc` / `<base>.data`.
    pub fn create_new<P: AsRef<Path>>(base: P) -> Result<Self> {
        Ok(Self {
            strings: RaggedVec::create_new(base)?,
            ids: HashMap::new(),
        })
    }

    /// Opens an existing table and rebuilds the name index.
    pub fn access_existing<P: AsRef<Path>>(base: P, read_write: bool) -> Result<Self> {
        let strings = RaggedVec::<u8>::access_existing(base, read_write)?;
        let mut ids = HashMap::with_capacity(strings.len());
        for (id, bytes) in strings.iter().enumerate() {
            let name = std::str::from_utf8(bytes)
                .map_err(|e| MatrixError::InvalidData(format!("name {id} is not UTF-8: {e}")))?;
            if ids.insert(name.to_string(), id as u32).is_some() {
                return Err(MatrixError::InvalidData(format!("duplicate name {name}")));
            }
        }
        Ok(Self { strings, ids })
    }

    /// Number of names.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns true if the table holds no names.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// The id of `name`, if present.
    pub fn id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    /// The name with id `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    pub fn name(&self, id: u32) -> &str {
        std::str::from_utf8(self.strings.row(id as usize)).unwrap_or_default()
    }

    /// Returns true if `name` is in the table.
    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    /// Returns the id of `name`, inserting it first if needed.
    pub fn get_or_insert(&mut self, name: &str) -> Result<u32> {
        if let Some(id) = self.id(name) {
            return Ok(id);
        }
        let id = self.strings.len() as u32;
        self.strings.append_row(name.bytes())?;
        self.ids.insert(name.to_string(), id);
        Ok(id)
    }

    /// Iterates over all names in id order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.len() as u32).map(move |id| self.name(id))
    }

    /// Pre-grows the backing files for `names` names of `bytes` total length.
    pub fn reserve(&mut self, names: usize, bytes: usize) -> Result<()> {
        self.strings.reserve(names, bytes)
    }

    /// Flushes the backing files to disk.
    pub fn sync_to_disk(&self) -> Result<()> {
        self.strings.sync_to_disk()
    }

    /// Syncs and unmaps the backing files.
    pub fn close(self) -> Result<()> {
        self.strings.close()
    }
}
