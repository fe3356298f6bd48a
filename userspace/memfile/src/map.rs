// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mapped windows onto a memfile's backing store.
//!
//! A mapping is checked against the sealed state when it is created and never
//! afterwards; it keeps the backing store alive and blocks sealing until it is
//! dropped.

use std::fmt;
use std::sync::Arc;

use crate::{span, Error, Result, Shared};

/// Live view of `len` bytes of a payload, starting at `offset`.
pub struct MappedRegion {
    shared: Arc<Shared>,
    offset: u64,
    len: u64,
    writable: bool,
}

impl MappedRegion {
    pub(crate) fn new(shared: Arc<Shared>, offset: u64, len: u64, writable: bool) -> Self {
        Self { shared, offset, len, writable }
    }

    /// Offset of the mapping inside the payload.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` for a zero-length mapping.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` when the mapping was established writable.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Reads `dst.len()` bytes at `at` (relative to the mapping start).
    ///
    /// Fails with [`Error::OutOfRange`] when the access leaves the mapping or the
    /// payload has since been truncated below it.
    pub fn read(&self, at: u64, dst: &mut [u8]) -> Result<()> {
        let absolute = self.absolute(at, dst.len())?;
        let state = self.shared.state.lock();
        let range = span(absolute, dst.len(), state.data.len())?;
        dst.copy_from_slice(&state.data[range]);
        Ok(())
    }

    /// Writes `src` at `at` (relative to the mapping start).
    pub fn write(&self, at: u64, src: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::PermissionDenied);
        }
        let absolute = self.absolute(at, src.len())?;
        let mut state = self.shared.state.lock();
        let range = span(absolute, src.len(), state.data.len())?;
        state.data[range].copy_from_slice(src);
        Ok(())
    }

    /// Copies the whole mapped window.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.len).map_err(|_| Error::OutOfRange)?;
        let mut out = vec![0; len];
        self.read(0, &mut out)?;
        Ok(out)
    }

    fn absolute(&self, at: u64, len: usize) -> Result<u64> {
        let end = at.checked_add(len as u64).ok_or(Error::OutOfRange)?;
        if end > self.len {
            return Err(Error::OutOfRange);
        }
        self.offset.checked_add(at).ok_or(Error::OutOfRange)
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        self.shared.state.lock().mappings -= 1;
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("writable", &self.writable)
            .finish()
    }
}
