// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Sealable shared-memory payloads ("memfiles") attached to bus messages by reference
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + `tests/seal.rs`
//!
//! PUBLIC API:
//!   - Memfile: resizable, mappable, sealable payload handle (clone = new holder)
//!   - MappedRegion: live window onto a payload's backing store
//!   - Control / ControlReply: the four-operation control surface
//!   - Limits: per-payload size bound
//!
//! INVARIANTS:
//!   - Once sealed, no write, no writable mapping and no size change succeeds
//!   - Sealing requires the caller to be the only holder with no live mapping
//!   - Sealing is terminal; a sealed payload never becomes writable again

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod control;
mod map;

pub use control::{Control, ControlReply};
pub use map::MappedRegion;

use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

/// Result alias for memfile operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by memfile operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The payload is sealed (or the requested transition is not allowed from its state).
    #[error("payload is sealed")]
    PermissionDenied,
    /// The requested state already holds; nothing was changed.
    #[error("requested state already in effect")]
    AlreadyDone,
    /// Sealing requires exclusive ownership; other holders or mappings are live.
    #[error("payload has other holders or live mappings")]
    Busy,
    /// The access range falls outside the current payload size.
    #[error("access beyond end of payload")]
    OutOfRange,
    /// The requested size exceeds the configured limit.
    #[error("payload size limit exceeded")]
    ResourceExhausted,
}

/// Size bounds applied to a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest size in bytes the payload may grow to.
    pub max_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_size: 512 * 1024 * 1024 }
    }
}

/// Handle to a shared, sealable payload.
///
/// Every clone counts as one holder. The backing store is freed when the last
/// holder and the last mapping are gone.
pub struct Memfile {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    name: Option<String>,
    limits: Limits,
    pub(crate) state: Mutex<State>,
}

pub(crate) struct State {
    pub(crate) data: Vec<u8>,
    pub(crate) sealed: bool,
    holders: usize,
    pub(crate) mappings: usize,
}

impl Memfile {
    /// Creates an unsealed payload of `size` zeroed bytes with default limits.
    pub fn new(name: Option<&str>, size: u64) -> Result<Self> {
        Self::with_limits(name, size, Limits::default())
    }

    /// Creates an unsealed payload of `size` zeroed bytes bounded by `limits`.
    pub fn with_limits(name: Option<&str>, size: u64, limits: Limits) -> Result<Self> {
        let len = checked_len(size, &limits)?;
        debug!("memfile: create name={:?} size={}", name, size);
        Ok(Self {
            shared: Arc::new(Shared {
                name: name.map(str::to_owned),
                limits,
                state: Mutex::new(State { data: vec![0; len], sealed: false, holders: 1, mappings: 0 }),
            }),
        })
    }

    /// Returns the optional debug name.
    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// Returns the current size in bytes.
    pub fn size(&self) -> u64 {
        self.shared.state.lock().data.len() as u64
    }

    /// Returns `true` once the payload has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.shared.state.lock().sealed
    }

    /// Number of live handles, this one included.
    pub fn holders(&self) -> usize {
        self.shared.state.lock().holders
    }

    /// Number of live mappings.
    pub fn mappings(&self) -> usize {
        self.shared.state.lock().mappings
    }

    /// Grows or shrinks the payload. Shrinking discards the tail.
    ///
    /// On a sealed payload a request for the current size reports
    /// [`Error::AlreadyDone`]; any other size is [`Error::PermissionDenied`].
    pub fn resize(&self, new_size: u64) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.sealed {
            return if new_size == state.data.len() as u64 {
                Err(Error::AlreadyDone)
            } else {
                Err(Error::PermissionDenied)
            };
        }
        let len = checked_len(new_size, &self.shared.limits)?;
        state.data.resize(len, 0);
        Ok(())
    }

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        let state = self.shared.state.lock();
        let range = span(offset, dst.len(), state.data.len())?;
        dst.copy_from_slice(&state.data[range]);
        Ok(())
    }

    /// Copies `src` into the payload at `offset`. Never grows the payload.
    pub fn write(&self, offset: u64, src: &[u8]) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.sealed {
            return Err(Error::PermissionDenied);
        }
        let range = span(offset, src.len(), state.data.len())?;
        state.data[range].copy_from_slice(src);
        Ok(())
    }

    /// Maps `len` bytes at `offset`.
    ///
    /// A writable mapping of a sealed payload is [`Error::PermissionDenied`]. A
    /// writable mapping reaching past the end grows the payload to the mapped
    /// extent first; a read-only one is [`Error::OutOfRange`].
    pub fn map(&self, offset: u64, len: u64, writable: bool) -> Result<MappedRegion> {
        let mut state = self.shared.state.lock();
        if writable && state.sealed {
            return Err(Error::PermissionDenied);
        }
        let end = offset.checked_add(len).ok_or(Error::OutOfRange)?;
        if end > state.data.len() as u64 {
            if !writable {
                return Err(Error::OutOfRange);
            }
            let new_len = checked_len(end, &self.shared.limits)?;
            state.data.resize(new_len, 0);
        }
        state.mappings += 1;
        drop(state);
        Ok(MappedRegion::new(Arc::clone(&self.shared), offset, len, writable))
    }

    /// Seals (`want == true`) the payload.
    ///
    /// The caller must be the only holder and no mapping may be live, otherwise
    /// [`Error::Busy`]. Requesting the state already in effect is
    /// [`Error::AlreadyDone`]. Unsealing a sealed payload is
    /// [`Error::PermissionDenied`].
    pub fn seal(&self, want: bool) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.holders != 1 || state.mappings != 0 {
            return Err(Error::Busy);
        }
        if state.sealed == want {
            return Err(Error::AlreadyDone);
        }
        if !want {
            return Err(Error::PermissionDenied);
        }
        state.sealed = true;
        debug!("memfile: sealed name={:?} size={}", self.shared.name, state.data.len());
        Ok(())
    }

    /// Returns a copy of the whole payload.
    pub fn to_vec(&self) -> Vec<u8> {
        self.shared.state.lock().data.clone()
    }
}

impl Clone for Memfile {
    fn clone(&self) -> Self {
        self.shared.state.lock().holders += 1;
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl Drop for Memfile {
    fn drop(&mut self) {
        self.shared.state.lock().holders -= 1;
    }
}

impl fmt::Debug for Memfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Memfile")
            .field("name", &self.shared.name)
            .field("size", &state.data.len())
            .field("sealed", &state.sealed)
            .field("holders", &state.holders)
            .field("mappings", &state.mappings)
            .finish()
    }
}

fn checked_len(size: u64, limits: &Limits) -> Result<usize> {
    if size > limits.max_size {
        return Err(Error::ResourceExhausted);
    }
    usize::try_from(size).map_err(|_| Error::ResourceExhausted)
}

/// Converts an `(offset, len)` pair into a byte range inside `size`.
pub(crate) fn span(offset: u64, len: usize, size: usize) -> Result<core::ops::Range<usize>> {
    let start = usize::try_from(offset).map_err(|_| Error::OutOfRange)?;
    let end = start.checked_add(len).ok_or(Error::OutOfRange)?;
    if end > size {
        return Err(Error::OutOfRange);
    }
    Ok(start..end)
}
